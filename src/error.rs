use std::fmt::Display;

use thiserror::Error;

/// Main error type for all assertion failures and engine faults
#[derive(Error, Debug)]
pub enum AssertError {
    /// One or more XSD violations; the message carries the first one
    #[error("XML schema validation failed: {first}")]
    SchemaValidation { first: String, errors: Vec<String> },

    /// Strict-mode mismatch between received and control content
    #[error("{0}")]
    StructuralMismatch(String),

    /// A dot-shorthand expression did not address any node
    #[error("{0}")]
    UnknownElement(String),

    /// A path-query expression found nothing or could not be evaluated
    #[error("{0}")]
    ExpressionEvaluation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to parse XML payload: {0}")]
    XmlParse(#[from] roxmltree::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal validation error: {0}")]
    Internal(String),

    #[error("LibXML2 internal error: {details}")]
    LibXml2Internal { details: String },
}

impl AssertError {
    /// Builds the standard "expected/but was" mismatch error.
    pub fn mismatch(base: impl Display, expected: impl Display, actual: impl Display) -> Self {
        AssertError::StructuralMismatch(mismatch_message(base, expected, actual))
    }

    pub fn is_mismatch(&self) -> bool {
        matches!(self, AssertError::StructuralMismatch(_))
    }

    pub fn is_unknown_element(&self) -> bool {
        matches!(self, AssertError::UnknownElement(_))
    }

    pub fn is_expression_error(&self) -> bool {
        matches!(self, AssertError::ExpressionEvaluation(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, AssertError::Configuration(_))
    }
}

/// Formats `base, expected 'x' but was 'y'`.
pub fn mismatch_message(base: impl Display, expected: impl Display, actual: impl Display) -> String {
    format!("{}, expected '{}' but was '{}'", base, expected, actual)
}

/// Renders an optional value the way mismatch messages print absent values.
pub fn or_null(value: Option<&str>) -> &str {
    value.unwrap_or("null")
}

/// LibXML2-specific error types
#[derive(Error, Debug, Clone)]
pub enum LibXml2Error {
    #[error("Schema parsing failed: null pointer returned")]
    SchemaParseFailed,

    #[error("Validation context creation failed")]
    ValidationContextCreationFailed,

    #[error("Document could not be parsed by libxml2")]
    DocumentParseFailed,

    #[error("Validation failed with internal code {code}")]
    ValidationFailed { code: i32 },

    #[error("Memory allocation failed in libxml2")]
    MemoryAllocation,

    #[error("Buffer of {size} bytes exceeds the libxml2 size limit")]
    BufferTooLarge { size: usize },

    #[error("Path cannot be passed to libxml2: {}", path.display())]
    InvalidPath { path: std::path::PathBuf },
}

impl From<LibXml2Error> for AssertError {
    fn from(err: LibXml2Error) -> Self {
        AssertError::LibXml2Internal {
            details: err.to_string(),
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AssertError>;

/// LibXML2 result type alias
pub type LibXml2Result<T> = std::result::Result<T, LibXml2Error>;
