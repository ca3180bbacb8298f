//! Error types for the updater XML library.

use std::fmt;
use thiserror::Error;

/// Errors that can occur when reading or writing update documents.
#[derive(Error, Debug)]
pub enum Error {
    /// The embedded schema is missing, not well-formed, or rejected by the
    /// schema compiler
    #[error("Failed to load update schema: {0}")]
    SchemaLoad(String),

    /// The schema does not describe the update document type
    #[error("Failed to bind update document type: {0}")]
    BindingInit(String),

    /// Input is not well-formed XML
    #[error("Malformed update document: {0}")]
    Malformed(#[from] MalformedError),

    /// Document violates the schema
    #[error("Schema validation failed: {0}")]
    SchemaValidation(ValidationErrors),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true if this is a schema validation failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::SchemaValidation(_))
    }

    /// Returns true if the input is not well-formed XML.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Error::Malformed(_))
    }
}

/// Reasons a document could not be decoded.
#[derive(Error, Debug)]
pub enum MalformedError {
    /// XML syntax error
    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// XML attribute parsing error
    #[error("XML attribute error: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),

    /// Input is not valid UTF-8
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Document contains no root element
    #[error("Document has no root element")]
    MissingRoot,

    /// Element or text before or after the root element
    #[error("Content outside the root element: {0}")]
    ContentOutsideRoot(String),

    /// Input ended before an element was closed
    #[error("Unclosed element: {0}")]
    UnclosedElement(String),

    /// Invalid `xs:date` value
    #[error("Invalid date: {0}")]
    InvalidDate(String),

    /// The XML declaration names an encoding we cannot decode
    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    /// libxml2 rejected the document; holds its diagnostics
    #[error("Not well-formed: {0}")]
    NotWellFormed(String),
}

impl From<quick_xml::Error> for Error {
    fn from(e: quick_xml::Error) -> Self {
        Error::Malformed(MalformedError::Xml(e))
    }
}

impl From<quick_xml::events::attributes::AttrError> for Error {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        Error::Malformed(MalformedError::Attribute(e))
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(e: std::str::Utf8Error) -> Self {
        Error::Malformed(MalformedError::Utf8(e))
    }
}

/// A single schema violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Line in the validated document, if known
    pub line: Option<i32>,
    /// Column in the validated document, if known
    pub column: Option<i32>,
    /// Message from the validator
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(col)) if col > 0 => write!(f, "{}:{}: {}", line, col, self.message),
            (Some(line), _) => write!(f, "line {}: {}", line, self.message),
            _ => f.write_str(&self.message),
        }
    }
}

/// All schema violations reported for one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    issues: Vec<ValidationIssue>,
}

impl ValidationErrors {
    /// Creates a set of violations.
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }

    /// Returns the individual violations.
    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    /// Returns true if a violation message contains `needle`.
    pub fn mentions(&self, needle: &str) -> bool {
        self.issues.iter().any(|i| i.message.contains(needle))
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.issues.is_empty() {
            return f.write_str("document is not valid");
        }
        let joined = self
            .issues
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&joined)
    }
}

/// Result type alias for updater XML operations.
pub type Result<T> = std::result::Result<T, Error>;
