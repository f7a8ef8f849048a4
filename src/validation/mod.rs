//! Validation functionality
//!
//! Provides input validation and sanitization for identifiers, encodings and
//! remote paths supplied through configuration.

pub mod input;

pub use input::{
    ValidationError, normalize_encoding, quote_identifier, validate_identifier,
    validate_remote_root,
};
