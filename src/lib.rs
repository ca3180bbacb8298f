//! Reading and writing of auto-updater XML descriptors.
//!
//! An update descriptor lists the released versions of an application, its
//! installer and its plugins, together with download locations and a
//! changelog. This crate converts between that XML and typed Rust objects,
//! validating against an embedded XML Schema.
//!
//! # Features
//!
//! - **Core Types**: [`Update`], [`Release`], [`Plugin`] and friends.
//! - **Codec**: [`UpdateXmlCodec`], thread-safe strict and lenient reads
//!   plus schema-validated writes.
//! - **Reader / Writer**: the unvalidated building blocks the codec uses.
//! - **Serde Support**: Optional serialization with the `serde` feature.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use updater_xml::UpdateXmlCodec;
//!
//! let codec = UpdateXmlCodec::new()?;
//!
//! // Strict read: the document must conform to the schema
//! let update = codec.read_path("update.xml", true)?;
//! if let Some(main) = &update.main_release {
//!     println!("Latest: {:?} {:?}", main.name, main.version);
//! }
//!
//! // Writes are always validated, missing directories are created
//! codec.write_path("mirror/update.xml", &update)?;
//! # Ok::<(), updater_xml::Error>(())
//! ```
//!
//! # Module Structure
//!
//! - [`codec`] - Schema-governed, thread-safe codec
//! - [`objects`] - Update document data structures
//! - [`reader`] - XML decoder
//! - [`writer`] - XML encoder
//! - [`validation`] - Embedded schema and libxml2 validation
//! - [`error`] - Error types
//!
//! # Optional Features
//!
//! - `serde` - Enable serde serialization/deserialization support

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod codec;
mod entities;
pub mod error;
pub mod objects;
pub mod reader;
pub mod validation;
pub mod writer;

// Re-export commonly used types at the crate root
pub use codec::UpdateXmlCodec;
pub use error::{Error, MalformedError, Result, ValidationErrors, ValidationIssue};
pub use reader::Input;
pub use objects::{ChangelogEntry, Platform, Plugin, PluginKind, Release, Source, Update};
pub use validation::{SchemaDefinition, UPDATE_SCHEMA};
pub use writer::WriterConfig;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
