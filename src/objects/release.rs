//! Release, plugin and changelog objects.
//!
//! Values the schema marks as required are still `Option`s here so that
//! documents can be built up incrementally. Presence is enforced when the
//! document is validated, not by the type.

use crate::objects::common::Source;
use chrono::NaiveDate;

/// A released build of an application (main program or setup).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Release {
    /// Display name (required by the schema)
    pub name: Option<String>,
    /// Version string, e.g. `4.5.1` (required by the schema)
    pub version: Option<String>,
    /// Date of the release
    pub release_date: Option<NaiveDate>,
    /// Download locations (at least one required by the schema)
    pub sources: Vec<Source>,
    /// Free text shown to the user
    pub comment: Option<String>,
}

impl Release {
    /// Creates a release with a name and version.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            version: Some(version.into()),
            ..Default::default()
        }
    }

    /// Sets the release date.
    pub fn with_release_date(mut self, date: NaiveDate) -> Self {
        self.release_date = Some(date);
        self
    }

    /// Sets the comment.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Adds a download source.
    pub fn add_source(&mut self, source: Source) {
        self.sources.push(source);
    }

    /// Adds a download source (builder form).
    pub fn with_source(mut self, source: Source) -> Self {
        self.sources.push(source);
        self
    }
}

/// Kind of plugin an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PluginKind {
    /// URL redirect plugin
    Redirect,
    /// Host plugin
    Host,
}

impl PluginKind {
    /// Returns the element name of a single entry.
    pub fn element_name(&self) -> &'static str {
        match self {
            PluginKind::Redirect => "redirect",
            PluginKind::Host => "host",
        }
    }

    /// Returns the element name of the enclosing list.
    pub fn list_element_name(&self) -> &'static str {
        match self {
            PluginKind::Redirect => "redirects",
            PluginKind::Host => "hosts",
        }
    }
}

/// A separately updatable plugin (host or redirect).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Plugin {
    /// Plugin name (required attribute)
    pub name: Option<String>,
    /// Plugin version (required attribute)
    pub version: Option<String>,
    /// File name the plugin is stored under (required attribute)
    pub filename: Option<String>,
    /// Download locations
    pub sources: Vec<Source>,
}

impl Plugin {
    /// Creates a plugin entry.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            name: Some(name.into()),
            version: Some(version.into()),
            filename: Some(filename.into()),
            sources: Vec::new(),
        }
    }

    /// Adds a download source (builder form).
    pub fn with_source(mut self, source: Source) -> Self {
        self.sources.push(source);
        self
    }
}

/// Changelog entry for one version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChangelogEntry {
    /// Version the changes belong to (required attribute)
    pub version: Option<String>,
    /// Date of the version
    pub date: Option<NaiveDate>,
    /// Individual change lines (at least one required by the schema)
    pub changes: Vec<String>,
}

impl ChangelogEntry {
    /// Creates an empty entry for a version.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: Some(version.into()),
            ..Default::default()
        }
    }

    /// Sets the date.
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Adds a change line (builder form).
    pub fn with_change(mut self, change: impl Into<String>) -> Self {
        self.changes.push(change.into());
        self
    }
}
