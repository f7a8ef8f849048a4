//! SQL script application
//!
//! Reads a local SQL script, splits it into statements and executes them in
//! order inside one transaction. Three splitting strategies are available:
//!
//! - `Tokenizer` (default): uses the `sqlparser` PostgreSQL tokenizer, drops
//!   comments and splits on top-level `;` only. Terminators inside string
//!   literals, quoted identifiers and dollar-quoted bodies are left alone.
//! - `Naive`: strips comments with regular expressions and splits on every
//!   `;`. Breaks on literals containing `;` or comment markers.
//! - `Batch`: submits the whole script as one simple-query batch and lets
//!   the server do the splitting.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::tokenizer::{Location, Token, Tokenizer, Whitespace};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::database::{DatabaseBackend, DatabaseError};

// Static regex patterns compiled once for performance
static RE_BLOCK_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("Invalid regex"));
static RE_LINE_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"--[^\n]*").expect("Invalid regex"));

/// Error type for script application
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    /// The script exists but could not be read
    #[error("Failed to read script {path}: {message}")]
    Read { path: PathBuf, message: String },

    /// The script could not be tokenized (unterminated literal, ...)
    #[error("Failed to tokenize script: {0}")]
    Tokenize(String),

    /// A statement failed; the script's transaction was rolled back
    #[error("{label} script statement {index} failed: {source}")]
    Statement {
        label: String,
        index: usize,
        #[source]
        source: DatabaseError,
    },

    /// Transaction control failed
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Result type for script operations
pub type ScriptResult<T> = Result<T, ScriptError>;

/// How a script is split into statements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum StatementSplitter {
    /// SQL tokenizer aware of literals and dollar quoting
    #[default]
    Tokenizer,
    /// Regex comment stripping and split on every `;`
    Naive,
    /// No splitting; one multi-statement batch
    Batch,
}

impl fmt::Display for StatementSplitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatementSplitter::Tokenizer => "tokenizer",
            StatementSplitter::Naive => "naive",
            StatementSplitter::Batch => "batch",
        };
        f.write_str(name)
    }
}

impl FromStr for StatementSplitter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tokenizer" => Ok(StatementSplitter::Tokenizer),
            "naive" => Ok(StatementSplitter::Naive),
            "batch" => Ok(StatementSplitter::Batch),
            other => Err(format!(
                "unknown splitter '{}', expected tokenizer, naive or batch",
                other
            )),
        }
    }
}

/// Remove `/* ... */` and `-- ...` comments with regular expressions
///
/// Comment markers inside string literals are removed too.
pub fn strip_comments(sql: &str) -> String {
    let without_blocks = RE_BLOCK_COMMENT.replace_all(sql, "");
    RE_LINE_COMMENT.replace_all(&without_blocks, "").into_owned()
}

/// Split a script into trimmed, non-empty statements
pub fn split_statements(sql: &str, splitter: StatementSplitter) -> ScriptResult<Vec<String>> {
    match splitter {
        StatementSplitter::Tokenizer => split_tokenized(sql),
        StatementSplitter::Naive => Ok(split_naive(sql)),
        StatementSplitter::Batch => {
            let batch = sql.trim();
            Ok(if batch.is_empty() {
                Vec::new()
            } else {
                vec![batch.to_string()]
            })
        }
    }
}

fn split_naive(sql: &str) -> Vec<String> {
    strip_comments(sql)
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn split_tokenized(sql: &str) -> ScriptResult<Vec<String>> {
    let dialect = PostgreSqlDialect {};
    let tokens = Tokenizer::new(&dialect, sql)
        .tokenize_with_location()
        .map_err(|e| ScriptError::Tokenize(e.to_string()))?;

    let index = SourceIndex::new(sql);
    let mut statements = Vec::new();
    let mut current = String::new();

    for token in &tokens {
        match &token.token {
            Token::SemiColon => push_statement(&mut statements, &mut current),
            Token::Whitespace(Whitespace::SingleLineComment { .. })
            | Token::Whitespace(Whitespace::MultiLineComment(_)) => current.push(' '),
            _ => {
                let start = index.offset(token.span.start);
                let end = index.offset(token.span.end);
                current.push_str(&sql[start..end]);
            }
        }
    }
    push_statement(&mut statements, &mut current);

    Ok(statements)
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let statement = current.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
    current.clear();
}

/// Maps tokenizer locations (1-based line, 1-based char column) to byte
/// offsets into the source text
struct SourceIndex<'a> {
    source: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> SourceIndex<'a> {
    fn new(source: &'a str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            source,
            line_starts,
        }
    }

    fn offset(&self, location: Location) -> usize {
        let line = usize::try_from(location.line).unwrap_or(usize::MAX);
        let Some(&line_start) = line.checked_sub(1).and_then(|l| self.line_starts.get(l)) else {
            return self.source.len();
        };
        let column = usize::try_from(location.column)
            .unwrap_or(usize::MAX)
            .saturating_sub(1);
        self.source[line_start..]
            .char_indices()
            .nth(column)
            .map(|(i, _)| line_start + i)
            .unwrap_or(self.source.len())
    }
}

/// Apply a SQL script
///
/// # Returns
/// `false` if no path is configured or the file does not exist (logged as a
/// warning), `true` once every statement has run and the transaction has
/// committed.
///
/// # Arguments
/// * `db` - Database connection
/// * `path` - Script location, if configured
/// * `label` - Name of the step for logs and errors ("schema", "transform")
/// * `splitter` - Statement splitting strategy
pub async fn apply<D>(
    db: &mut D,
    path: Option<&Path>,
    label: &str,
    splitter: StatementSplitter,
) -> ScriptResult<bool>
where
    D: DatabaseBackend + ?Sized,
{
    let Some(path) = path else {
        debug!(label, "No script configured; skipping");
        return Ok(false);
    };

    let sql = match tokio::fs::read_to_string(path).await {
        Ok(sql) => sql,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(label, path = %path.display(), "Script file not found; skipping");
            return Ok(false);
        }
        Err(e) => {
            return Err(ScriptError::Read {
                path: path.to_path_buf(),
                message: e.to_string(),
            });
        }
    };

    let statements = split_statements(&sql, splitter)?;
    debug!(
        label,
        path = %path.display(),
        %splitter,
        statements = statements.len(),
        "Applying script"
    );

    db.begin().await?;

    if let Err(e) = execute_all(db, &statements, label).await {
        if let Err(rollback) = db.rollback().await {
            warn!(label, error = %rollback, "Rollback after failed script also failed");
        }
        return Err(e);
    }

    db.commit().await?;

    info!(label, path = %path.display(), statements = statements.len(), "Script applied");
    Ok(true)
}

async fn execute_all<D>(db: &mut D, statements: &[String], label: &str) -> ScriptResult<()>
where
    D: DatabaseBackend + ?Sized,
{
    for (i, statement) in statements.iter().enumerate() {
        db.batch_execute(statement)
            .await
            .map_err(|source| ScriptError::Statement {
                label: label.to_string(),
                index: i + 1,
                source,
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMMENTED: &str = "-- comment\nSELECT 1; /* block \n comment */ SELECT 2;";

    #[test]
    fn test_split_commented_script() {
        for splitter in [StatementSplitter::Tokenizer, StatementSplitter::Naive] {
            let statements = split_statements(COMMENTED, splitter).unwrap();
            assert_eq!(statements, vec!["SELECT 1", "SELECT 2"], "{}", splitter);
        }
    }

    #[test]
    fn test_tokenizer_respects_literals() {
        let sql = "INSERT INTO t VALUES ('a;b', 'it''s -- not a comment');\n\
                   SELECT \"odd;name\" FROM t;";
        let statements = split_statements(sql, StatementSplitter::Tokenizer).unwrap();
        assert_eq!(
            statements,
            vec![
                "INSERT INTO t VALUES ('a;b', 'it''s -- not a comment')",
                "SELECT \"odd;name\" FROM t",
            ]
        );

        // The regex splitter is known to break here
        assert_ne!(split_statements(sql, StatementSplitter::Naive).unwrap().len(), 2);
    }

    #[test]
    fn test_tokenizer_respects_dollar_quoting() {
        let sql = "CREATE FUNCTION f() RETURNS int AS $$ SELECT 1; $$ LANGUAGE sql;\nSELECT f();";
        let statements = split_statements(sql, StatementSplitter::Tokenizer).unwrap();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("$$ SELECT 1; $$"));
        assert_eq!(statements[1], "SELECT f()");
    }

    #[test]
    fn test_tokenizer_handles_multibyte_text() {
        let sql = "INSERT INTO t VALUES ('café');\n-- ünïcode\nSELECT 'naïve';";
        let statements = split_statements(sql, StatementSplitter::Tokenizer).unwrap();
        assert_eq!(
            statements,
            vec!["INSERT INTO t VALUES ('café')", "SELECT 'naïve'"]
        );
    }

    #[test]
    fn test_comment_between_tokens_keeps_them_apart() {
        let statements =
            split_statements("SELECT/* x */1;", StatementSplitter::Tokenizer).unwrap();
        assert_eq!(statements, vec!["SELECT 1"]);
    }

    #[test]
    fn test_tokenizer_rejects_unterminated_literal() {
        assert!(matches!(
            split_statements("SELECT 'oops;", StatementSplitter::Tokenizer),
            Err(ScriptError::Tokenize(_))
        ));
    }

    #[test]
    fn test_batch_keeps_script_whole() {
        let statements = split_statements(COMMENTED, StatementSplitter::Batch).unwrap();
        assert_eq!(statements, vec![COMMENTED.trim().to_string()]);
        assert!(split_statements("  \n", StatementSplitter::Batch).unwrap().is_empty());
    }

    #[test]
    fn test_empty_and_comment_only_scripts() {
        for splitter in [StatementSplitter::Tokenizer, StatementSplitter::Naive] {
            assert!(split_statements("", splitter).unwrap().is_empty());
            assert!(split_statements("-- nothing\n/* here */;;", splitter)
                .unwrap()
                .is_empty());
        }
    }

    #[test]
    fn test_strip_comments() {
        assert_eq!(strip_comments("a -- x\nb /* y\nz */ c"), "a \nb  c");
    }

    #[test]
    fn test_splitter_parse() {
        assert_eq!("Naive".parse::<StatementSplitter>().unwrap(), StatementSplitter::Naive);
        assert_eq!(StatementSplitter::default().to_string(), "tokenizer");
        assert!("smart".parse::<StatementSplitter>().is_err());
    }
}
