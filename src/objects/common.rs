//! Common types shared across update objects.
//!
//! - [`Source`] - A download location for a release or plugin
//! - [`Platform`] - Operating system a source applies to
//! - Element names, text and date helpers used by the reader and writer

use crate::error::{MalformedError, Result};
use chrono::NaiveDate;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Element and attribute names
// ============================================================================

/// Root element of an update document
pub const UPDATE_ELEMENT: &str = "update";

/// Date format used for `xs:date` values
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// Platform
// ============================================================================

/// Operating system a download source is built for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Platform {
    /// Microsoft Windows
    Windows,
    /// Linux
    Linux,
    /// macOS
    MacOs,
    /// Platform independent (e.g. a jar)
    Any,
    /// A value the schema does not know about. Kept so lenient reads
    /// preserve it; writing it fails validation.
    Other(String),
}

impl Platform {
    /// Returns the attribute value for this platform.
    pub fn as_str(&self) -> &str {
        match self {
            Platform::Windows => "windows",
            Platform::Linux => "linux",
            Platform::MacOs => "macos",
            Platform::Any => "any",
            Platform::Other(s) => s,
        }
    }
}

impl From<&str> for Platform {
    fn from(s: &str) -> Self {
        match s {
            "windows" => Platform::Windows,
            "linux" => Platform::Linux,
            "macos" => Platform::MacOs,
            "any" => Platform::Any,
            other => Platform::Other(other.to_string()),
        }
    }
}

impl FromStr for Platform {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Platform::from(s))
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Source
// ============================================================================

/// A download location.
///
/// The URL is the element text; platform and checksum are optional
/// attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Source {
    /// Download URL
    pub url: String,
    /// Platform this download is for
    pub os: Option<Platform>,
    /// Lowercase or uppercase hex SHA-256 of the download
    pub sha256: Option<String>,
}

impl Source {
    /// Creates a source for the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            os: None,
            sha256: None,
        }
    }

    /// Sets the platform.
    pub fn with_os(mut self, os: Platform) -> Self {
        self.os = Some(os);
        self
    }

    /// Sets the SHA-256 checksum.
    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }
}

// ============================================================================
// Text
// ============================================================================

/// XML whitespace characters.
const XML_WHITESPACE: [char; 4] = [' ', '\t', '\n', '\r'];

/// Applies the `collapse` whitespace facet used by `xs:token` and
/// `xs:anyURI`: runs of whitespace become one space, ends are trimmed.
pub fn collapse_whitespace(s: &str) -> String {
    s.split(XML_WHITESPACE)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Returns true if `c` may appear in an XML 1.0 document.
pub fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\t' | '\n' | '\r'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}

// ============================================================================
// Dates
// ============================================================================

/// Parses an `xs:date` value.
///
/// A trailing timezone (`Z` or `+hh:mm`/`-hh:mm`) is accepted and dropped.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    let s = s.trim();
    let date_part = if s.len() > 10 && s.is_char_boundary(10) {
        let (date, zone) = s.split_at(10);
        if zone == "Z" || ((zone.starts_with('+') || zone.starts_with('-')) && zone.len() == 6) {
            date
        } else {
            s
        }
    } else {
        s
    };

    NaiveDate::parse_from_str(date_part, DATE_FORMAT)
        .map_err(|_| MalformedError::InvalidDate(s.to_string()).into())
}

/// Formats a date as an `xs:date` value.
pub fn format_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}
