//! Input validation and sanitization utilities.
//!
//! This module provides functions for validating and sanitizing operator input
//! before it reaches the database or the remote host. Table names end up
//! interpolated into `COPY`, `TRUNCATE` and `SELECT COUNT(*)` statements, so
//! they are validated here and rendered as quoted identifiers.
//!
//! # Security
//!
//! Input validation prevents:
//! - SQL injection via malicious schema/table names
//! - SQL injection via the `ENCODING` option of `COPY`
//! - Relative remote roots that would resolve against an unknown home directory

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length for identifiers (PostgreSQL truncates at 63 bytes)
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Maximum length for remote paths
pub const MAX_REMOTE_PATH_LENGTH: usize = 4096;

/// Errors that can occur during input validation.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum ValidationError {
    /// Input is empty when a value is required
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    /// Input exceeds maximum allowed length
    #[error("{field} exceeds maximum length (max: {max}, got: {actual})")]
    TooLong {
        field: &'static str,
        max: usize,
        actual: usize,
    },

    /// Input contains invalid characters
    #[error("{field} contains invalid characters: {reason}")]
    InvalidCharacters { field: &'static str, reason: String },

    /// Input has invalid format
    #[error("{0}: {1}")]
    InvalidFormat(&'static str, String),

    /// Input is a reserved word
    #[error("{field} cannot be a reserved word: {word}")]
    ReservedWord { field: &'static str, word: String },
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate a schema or table identifier.
///
/// # Rules
///
/// - Must not be empty
/// - Must not exceed 63 characters
/// - Must start with an ASCII letter or underscore
/// - May contain ASCII letters, digits, underscores and `$`
/// - Cannot be a SQL reserved word
///
/// # Examples
///
/// ```
/// use tunnel_ingest::validation::input::validate_identifier;
///
/// assert!(validate_identifier("users_raw", "table name").is_ok());
/// assert!(validate_identifier("raw", "schema name").is_ok());
/// assert!(validate_identifier("", "table name").is_err());
/// assert!(validate_identifier("1users", "table name").is_err());
/// assert!(validate_identifier("users; DROP", "table name").is_err());
/// ```
pub fn validate_identifier(name: &str, field: &'static str) -> ValidationResult<()> {
    let Some(first_char) = name.chars().next() else {
        return Err(ValidationError::Empty(field));
    };

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ValidationError::TooLong {
            field,
            max: MAX_IDENTIFIER_LENGTH,
            actual: name.len(),
        });
    }

    if !first_char.is_ascii_alphabetic() && first_char != '_' {
        return Err(ValidationError::InvalidFormat(
            field,
            "must start with a letter or underscore".to_string(),
        ));
    }

    for c in name.chars() {
        if !c.is_ascii_alphanumeric() && c != '_' && c != '$' {
            return Err(ValidationError::InvalidCharacters {
                field,
                reason: format!("invalid character: '{}'", c),
            });
        }
    }

    if is_sql_reserved_word(name) {
        return Err(ValidationError::ReservedWord {
            field,
            word: name.to_string(),
        });
    }

    Ok(())
}

/// Validate a remote root directory.
///
/// The root must be absolute so the derived data directories do not depend
/// on the remote account's working directory.
pub fn validate_remote_root(path: &str) -> ValidationResult<()> {
    if path.trim().is_empty() {
        return Err(ValidationError::Empty("remote root"));
    }

    if path.len() > MAX_REMOTE_PATH_LENGTH {
        return Err(ValidationError::TooLong {
            field: "remote root",
            max: MAX_REMOTE_PATH_LENGTH,
            actual: path.len(),
        });
    }

    if !path.starts_with('/') {
        return Err(ValidationError::InvalidFormat(
            "remote root",
            format!("must be an absolute path, got '{}'", path),
        ));
    }

    if path.contains('\0') {
        return Err(ValidationError::InvalidCharacters {
            field: "remote root",
            reason: "contains a NUL byte".to_string(),
        });
    }

    Ok(())
}

/// Normalize a client encoding name to the spelling PostgreSQL expects in
/// `COPY ... WITH (ENCODING '...')`.
///
/// Accepts the common aliases (`utf-8`, `latin-1`, `cp1252`, ...) in any case.
///
/// # Examples
///
/// ```
/// use tunnel_ingest::validation::input::normalize_encoding;
///
/// assert_eq!(normalize_encoding("utf-8").unwrap(), "UTF8");
/// assert_eq!(normalize_encoding("Latin-1").unwrap(), "LATIN1");
/// assert!(normalize_encoding("utf8'); DROP TABLE x; --").is_err());
/// ```
pub fn normalize_encoding(name: &str) -> ValidationResult<String> {
    let compact: String = name
        .trim()
        .chars()
        .filter(|c| *c != '-' && *c != '_')
        .collect::<String>()
        .to_ascii_uppercase();

    if compact.is_empty() {
        return Err(ValidationError::Empty("encoding"));
    }

    let canonical = match compact.as_str() {
        "UTF8" | "UNICODE" => "UTF8",
        "LATIN1" | "ISO88591" => "LATIN1",
        "LATIN2" | "ISO88592" => "LATIN2",
        "LATIN9" | "ISO885915" => "LATIN9",
        "WIN1250" | "CP1250" | "WINDOWS1250" => "WIN1250",
        "WIN1251" | "CP1251" | "WINDOWS1251" => "WIN1251",
        "WIN1252" | "CP1252" | "WINDOWS1252" => "WIN1252",
        "SQLASCII" | "ASCII" => "SQL_ASCII",
        "EUCJP" => "EUC_JP",
        "EUCKR" => "EUC_KR",
        "SJIS" | "SHIFTJIS" => "SJIS",
        "GBK" | "CP936" => "GBK",
        "BIG5" => "BIG5",
        "KOI8R" => "KOI8R",
        _ => {
            return Err(ValidationError::InvalidFormat(
                "encoding",
                format!("unsupported client encoding '{}'", name),
            ));
        }
    };

    Ok(canonical.to_string())
}

/// Quote an identifier for PostgreSQL.
///
/// Embedded double quotes are escaped by doubling them.
///
/// # Examples
///
/// ```
/// use tunnel_ingest::validation::input::quote_identifier;
///
/// assert_eq!(quote_identifier("users"), "\"users\"");
/// assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
/// ```
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Check if a word is a SQL reserved word.
///
/// This is a basic check covering the words PostgreSQL refuses as bare
/// table or schema names.
fn is_sql_reserved_word(word: &str) -> bool {
    const RESERVED_WORDS: &[&str] = &[
        "all",
        "analyse",
        "analyze",
        "and",
        "any",
        "as",
        "asc",
        "both",
        "case",
        "check",
        "collate",
        "column",
        "constraint",
        "create",
        "default",
        "desc",
        "distinct",
        "do",
        "else",
        "end",
        "except",
        "false",
        "fetch",
        "for",
        "foreign",
        "from",
        "grant",
        "group",
        "having",
        "in",
        "into",
        "leading",
        "limit",
        "not",
        "null",
        "offset",
        "on",
        "only",
        "or",
        "order",
        "primary",
        "references",
        "returning",
        "select",
        "table",
        "then",
        "to",
        "true",
        "union",
        "unique",
        "user",
        "using",
        "when",
        "where",
        "with",
    ];

    let lower = word.to_lowercase();
    RESERVED_WORDS.contains(&lower.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_accepts_common_names() {
        assert!(validate_identifier("users_raw", "table name").is_ok());
        assert!(validate_identifier("_tmp", "table name").is_ok());
        assert!(validate_identifier("purchases$2024", "table name").is_ok());
    }

    #[test]
    fn test_validate_identifier_rejects_bad_input() {
        assert_eq!(
            validate_identifier("", "table name"),
            Err(ValidationError::Empty("table name"))
        );
        assert!(matches!(
            validate_identifier("9lives", "table name"),
            Err(ValidationError::InvalidFormat(_, _))
        ));
        assert!(matches!(
            validate_identifier("users\"--", "table name"),
            Err(ValidationError::InvalidCharacters { .. })
        ));
        assert!(matches!(
            validate_identifier("select", "table name"),
            Err(ValidationError::ReservedWord { .. })
        ));
        assert!(matches!(
            validate_identifier(&"a".repeat(64), "table name"),
            Err(ValidationError::TooLong { max: 63, .. })
        ));
    }

    #[test]
    fn test_validate_remote_root() {
        assert!(validate_remote_root("/home/loader/pipeline").is_ok());
        assert!(validate_remote_root("relative/path").is_err());
        assert!(validate_remote_root("   ").is_err());
    }

    #[test]
    fn test_normalize_encoding_aliases() {
        assert_eq!(normalize_encoding("UTF8").unwrap(), "UTF8");
        assert_eq!(normalize_encoding("utf_8").unwrap(), "UTF8");
        assert_eq!(normalize_encoding("iso-8859-1").unwrap(), "LATIN1");
        assert_eq!(normalize_encoding("cp1252").unwrap(), "WIN1252");
        assert_eq!(normalize_encoding("ascii").unwrap(), "SQL_ASCII");
        assert!(normalize_encoding("").is_err());
        assert!(normalize_encoding("klingon").is_err());
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("raw"), "\"raw\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }
}
