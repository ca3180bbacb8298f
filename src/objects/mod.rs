//! Update document object types.
//!
//! This module contains the data structures for an update descriptor:
//!
//! - [`Update`] - The root document
//! - [`Release`] - A released build of the application or its installer
//! - [`Plugin`] - A separately updatable host or redirect plugin
//! - [`ChangelogEntry`] - Changes made in one version
//!
//! Also provides common types:
//! - [`Source`] and [`Platform`] - Download locations

mod common;
mod release;
mod update;

pub use common::{
    collapse_whitespace, format_date, is_xml_char, parse_date, Platform, Source, DATE_FORMAT,
    UPDATE_ELEMENT,
};
pub use release::{ChangelogEntry, Plugin, PluginKind, Release};
pub use update::Update;
