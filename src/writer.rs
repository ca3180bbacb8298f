//! Update document writer.
//!
//! Serializes an [`Update`] to indented XML in schema element order. The
//! writer does not check the schema; the codec validates its output before
//! anything is handed to the caller. Values holding characters XML cannot
//! represent are rejected before anything is written.
//!
//! # Example
//!
//! ```rust
//! use updater_xml::objects::{Release, Source, Update};
//! use updater_xml::writer::UpdateWriter;
//!
//! let release = Release::new("App", "1.0.0").with_source(Source::new("https://example.org/app.jar"));
//! let update = Update::with_main_release(release);
//!
//! let xml = UpdateWriter::new().write_to_string(&update).unwrap();
//! assert!(xml.contains("<version>1.0.0</version>"));
//! ```

use crate::error::{Error, Result, ValidationErrors, ValidationIssue};
use crate::objects::{
    format_date, is_xml_char, ChangelogEntry, Plugin, PluginKind, Release, Source, Update,
    UPDATE_ELEMENT,
};
use quick_xml::escape::escape;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Write;

/// Configuration options for the update writer.
///
/// Output is always indented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterConfig {
    /// Number of spaces per indentation level (default: two)
    pub indent_size: usize,
    /// Whether to include the XML declaration
    pub xml_declaration: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            indent_size: 2,
            xml_declaration: true,
        }
    }
}

impl WriterConfig {
    /// Creates a new configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the indentation width. Zero is raised to one.
    pub fn with_indent_size(mut self, indent_size: usize) -> Self {
        self.indent_size = indent_size.max(1);
        self
    }

    /// Sets whether to write the XML declaration.
    pub fn with_xml_declaration(mut self, xml_declaration: bool) -> Self {
        self.xml_declaration = xml_declaration;
        self
    }
}

/// Update XML writer.
#[derive(Debug, Clone, Default)]
pub struct UpdateWriter {
    config: WriterConfig,
}

impl UpdateWriter {
    /// Creates a new writer with default configuration.
    pub fn new() -> Self {
        Self {
            config: WriterConfig::default(),
        }
    }

    /// Creates a new writer with the specified configuration.
    pub fn with_config(config: WriterConfig) -> Self {
        Self {
            config: WriterConfig {
                indent_size: config.indent_size.max(1),
                ..config
            },
        }
    }

    /// Returns the writer configuration.
    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Writes an Update to a string.
    pub fn write_to_string(&self, doc: &Update) -> Result<String> {
        let mut buffer = Vec::new();
        self.write(doc, &mut buffer)?;
        // Only `&str` content is ever written, so the buffer is UTF-8.
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Writes an Update to any Write implementation.
    ///
    /// Fails with [`Error::SchemaValidation`], before writing anything, if a
    /// value contains a character XML does not allow.
    pub fn write<W: Write>(&self, doc: &Update, writer: W) -> Result<()> {
        let issues = unrepresentable_values(doc);
        if !issues.is_empty() {
            return Err(Error::SchemaValidation(ValidationErrors::new(issues)));
        }

        let mut xml_writer = Writer::new_with_indent(writer, b' ', self.config.indent_size);

        if self.config.xml_declaration {
            xml_writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        }

        xml_writer.write_event(Event::Start(BytesStart::new(UPDATE_ELEMENT)))?;

        if let Some(ref release) = doc.setup_release {
            self.write_release(&mut xml_writer, "setupRelease", release)?;
        }
        if let Some(ref release) = doc.main_release {
            self.write_release(&mut xml_writer, "mainRelease", release)?;
        }

        for kind in [PluginKind::Redirect, PluginKind::Host] {
            self.write_plugins(&mut xml_writer, kind, doc.plugins(kind))?;
        }

        if !doc.changelog.is_empty() {
            xml_writer.write_event(Event::Start(BytesStart::new("changelog")))?;
            for entry in &doc.changelog {
                self.write_changelog_entry(&mut xml_writer, entry)?;
            }
            xml_writer.write_event(Event::End(BytesEnd::new("changelog")))?;
        }

        xml_writer.write_event(Event::End(BytesEnd::new(UPDATE_ELEMENT)))?;
        xml_writer.get_mut().write_all(b"\n")?;

        Ok(())
    }

    /// Writes a release element.
    fn write_release<W: Write>(
        &self,
        writer: &mut Writer<W>,
        name: &str,
        release: &Release,
    ) -> Result<()> {
        writer.write_event(Event::Start(BytesStart::new(name)))?;

        // Properties in schema order
        if let Some(ref n) = release.name {
            self.write_simple_element(writer, "name", n)?;
        }
        if let Some(ref version) = release.version {
            self.write_simple_element(writer, "version", version)?;
        }
        if let Some(ref date) = release.release_date {
            self.write_simple_element(writer, "releaseDate", &format_date(date))?;
        }
        self.write_sources(writer, &release.sources)?;
        if let Some(ref comment) = release.comment {
            self.write_simple_element(writer, "comment", comment)?;
        }

        writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    /// Writes a plugin list. Empty lists are omitted.
    fn write_plugins<W: Write>(
        &self,
        writer: &mut Writer<W>,
        kind: PluginKind,
        plugins: &[Plugin],
    ) -> Result<()> {
        if plugins.is_empty() {
            return Ok(());
        }

        writer.write_event(Event::Start(BytesStart::new(kind.list_element_name())))?;
        for plugin in plugins {
            self.write_plugin(writer, kind, plugin)?;
        }
        writer.write_event(Event::End(BytesEnd::new(kind.list_element_name())))?;
        Ok(())
    }

    /// Writes a single plugin entry.
    fn write_plugin<W: Write>(
        &self,
        writer: &mut Writer<W>,
        kind: PluginKind,
        plugin: &Plugin,
    ) -> Result<()> {
        let mut elem = BytesStart::new(kind.element_name());
        if let Some(ref name) = plugin.name {
            push_attribute(&mut elem, "name", name);
        }
        if let Some(ref version) = plugin.version {
            push_attribute(&mut elem, "version", version);
        }
        if let Some(ref filename) = plugin.filename {
            push_attribute(&mut elem, "filename", filename);
        }

        if plugin.sources.is_empty() {
            writer.write_event(Event::Empty(elem))?;
        } else {
            writer.write_event(Event::Start(elem))?;
            self.write_sources(writer, &plugin.sources)?;
            writer.write_event(Event::End(BytesEnd::new(kind.element_name())))?;
        }
        Ok(())
    }

    /// Writes a sources list. Empty lists are omitted.
    fn write_sources<W: Write>(&self, writer: &mut Writer<W>, sources: &[Source]) -> Result<()> {
        if sources.is_empty() {
            return Ok(());
        }

        writer.write_event(Event::Start(BytesStart::new("sources")))?;
        for source in sources {
            let mut elem = BytesStart::new("source");
            if let Some(ref os) = source.os {
                push_attribute(&mut elem, "os", os.as_str());
            }
            if let Some(ref sha256) = source.sha256 {
                push_attribute(&mut elem, "sha256", sha256);
            }
            writer.write_event(Event::Start(elem))?;
            writer.write_event(Event::Text(escape_text(&source.url)))?;
            writer.write_event(Event::End(BytesEnd::new("source")))?;
        }
        writer.write_event(Event::End(BytesEnd::new("sources")))?;
        Ok(())
    }

    /// Writes a changelog entry.
    fn write_changelog_entry<W: Write>(
        &self,
        writer: &mut Writer<W>,
        entry: &ChangelogEntry,
    ) -> Result<()> {
        let mut elem = BytesStart::new("entry");
        if let Some(ref version) = entry.version {
            push_attribute(&mut elem, "version", version);
        }
        if let Some(ref date) = entry.date {
            push_attribute(&mut elem, "date", &format_date(date));
        }

        if entry.changes.is_empty() {
            writer.write_event(Event::Empty(elem))?;
            return Ok(());
        }

        writer.write_event(Event::Start(elem))?;
        for change in &entry.changes {
            self.write_simple_element(writer, "change", change)?;
        }
        writer.write_event(Event::End(BytesEnd::new("entry")))?;
        Ok(())
    }

    /// Writes a simple text element.
    fn write_simple_element<W: Write>(
        &self,
        writer: &mut Writer<W>,
        name: &str,
        value: &str,
    ) -> Result<()> {
        writer.write_event(Event::Start(BytesStart::new(name)))?;
        writer.write_event(Event::Text(escape_text(value)))?;
        writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }
}

/// Escapes element text. Carriage returns become character references so
/// they survive line-end normalization on read.
fn escape_text(value: &str) -> BytesText<'static> {
    BytesText::from_escaped(escape(value).replace('\r', "&#13;"))
}

/// Adds an escaped attribute. Tabs and line breaks become character
/// references so they survive attribute-value normalization on read.
fn push_attribute(elem: &mut BytesStart<'_>, key: &str, value: &str) {
    let escaped = escape(value)
        .replace('\t', "&#9;")
        .replace('\n', "&#10;")
        .replace('\r', "&#13;");
    elem.push_attribute((key.as_bytes(), escaped.as_bytes()));
}

/// Lists every value that holds a character XML 1.0 cannot represent.
fn unrepresentable_values(doc: &Update) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut check = |path: String, value: &str| {
        if let Some(c) = value.chars().find(|c| !is_xml_char(*c)) {
            issues.push(ValidationIssue {
                line: None,
                column: None,
                message: format!(
                    "{}: contains U+{:04X}, which XML does not allow",
                    path, c as u32
                ),
            });
        }
    };

    let releases = [
        ("setupRelease", doc.setup_release.as_ref()),
        ("mainRelease", doc.main_release.as_ref()),
    ];
    for (slot, release) in releases {
        let Some(release) = release else { continue };
        for (field, value) in [
            ("name", &release.name),
            ("version", &release.version),
            ("comment", &release.comment),
        ] {
            if let Some(value) = value {
                check(format!("{}/{}", slot, field), value);
            }
        }
        for (i, source) in release.sources.iter().enumerate() {
            check_source(&mut check, &format!("{}/sources/source[{}]", slot, i + 1), source);
        }
    }

    for kind in [PluginKind::Redirect, PluginKind::Host] {
        for (i, plugin) in doc.plugins(kind).iter().enumerate() {
            let path = format!(
                "{}/{}[{}]",
                kind.list_element_name(),
                kind.element_name(),
                i + 1
            );
            for (attr, value) in [
                ("name", &plugin.name),
                ("version", &plugin.version),
                ("filename", &plugin.filename),
            ] {
                if let Some(value) = value {
                    check(format!("{}/@{}", path, attr), value);
                }
            }
            for (j, source) in plugin.sources.iter().enumerate() {
                check_source(&mut check, &format!("{}/sources/source[{}]", path, j + 1), source);
            }
        }
    }

    for (i, entry) in doc.changelog.iter().enumerate() {
        let path = format!("changelog/entry[{}]", i + 1);
        if let Some(ref version) = entry.version {
            check(format!("{}/@version", path), version);
        }
        for (j, change) in entry.changes.iter().enumerate() {
            check(format!("{}/change[{}]", path, j + 1), change);
        }
    }

    issues
}

fn check_source(check: &mut impl FnMut(String, &str), path: &str, source: &Source) {
    check(path.to_string(), &source.url);
    if let Some(ref sha256) = source.sha256 {
        check(format!("{}/@sha256", path), sha256);
    }
}

/// Convenience function to write an Update to a string with default settings.
///
/// The output is not validated.
pub fn to_string(doc: &Update) -> Result<String> {
    UpdateWriter::new().write_to_string(doc)
}
