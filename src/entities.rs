//! Internal DTD entities.
//!
//! General entities declared in the internal subset of a `<!DOCTYPE>` are
//! expanded in text and attribute values. External entities are never
//! fetched, so a reference to one fails like any undeclared entity.

use std::collections::HashMap;
use std::str;

use quick_xml::escape::{resolve_predefined_entity, unescape_with};
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{MalformedError, Result};

const ENTITY_DECL: &str = "<!ENTITY";

/// General entities declared by one document.
#[derive(Debug, Default, Clone)]
pub(crate) struct Entities {
    values: HashMap<String, String>,
}

impl Entities {
    pub(crate) fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Records the internal general entities of a DOCTYPE body.
    ///
    /// The first declaration of a name binds. Parameter and external
    /// entities are skipped.
    pub(crate) fn declare(&mut self, doctype: &str) -> Result<()> {
        let mut rest = doctype;
        while let Some(pos) = rest.find(ENTITY_DECL) {
            rest = rest[pos + ENTITY_DECL.len()..].trim_start();
            if rest.starts_with('%') {
                continue;
            }

            let name_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            let (name, tail) = rest.split_at(name_end);
            let tail = tail.trim_start();

            let quote = match tail.chars().next() {
                Some(q @ ('"' | '\'')) => q,
                _ => {
                    rest = tail;
                    continue;
                }
            };
            let body = &tail[1..];
            let end = body.find(quote).ok_or_else(|| {
                MalformedError::NotWellFormed(format!("unterminated value of entity {}", name))
            })?;

            let value = self.resolve_text(&body[..end])?;
            self.values.entry(name.to_string()).or_insert(value);
            rest = &body[end + 1..];
        }
        Ok(())
    }

    fn lookup<'a>(&'a self, name: &str) -> Option<&'a str> {
        resolve_predefined_entity(name).or_else(|| self.values.get(name).map(String::as_str))
    }

    /// Expands character and entity references in element text.
    pub(crate) fn resolve_text(&self, raw: &str) -> Result<String> {
        let resolved = unescape_with(raw, |name| self.lookup(name)).map_err(quick_xml::Error::from)?;
        Ok(resolved.into_owned())
    }

    /// Normalizes literal whitespace in an attribute value to spaces, then
    /// expands its references.
    pub(crate) fn resolve_attribute(&self, raw: &str) -> Result<String> {
        self.resolve_text(&raw.replace(['\t', '\n', '\r'], " "))
    }
}

/// Returns a copy of `text` with its internal entities expanded, or `None`
/// if the document declares none.
///
/// The DOCTYPE is replaced by as many line breaks as it spanned and the XML
/// declaration is dropped, so line numbers in the copy match the original.
pub(crate) fn expand_entities(text: &str) -> Result<Option<String>> {
    let mut reader = Reader::from_str(text);
    let mut entities = Entities::default();
    let mut writer = Writer::new(Vec::with_capacity(text.len()));

    loop {
        match reader.read_event()? {
            Event::Decl(_) => {}
            Event::DocType(e) => {
                let doctype = str::from_utf8(&e)?;
                entities.declare(doctype)?;
                let lines = doctype.matches('\n').count();
                writer.get_mut().extend(std::iter::repeat(b'\n').take(lines));
            }
            Event::Start(e) => {
                if entities.is_empty() {
                    return Ok(None);
                }
                writer.write_event(Event::Start(expand_start(&e, &entities)?))?;
            }
            Event::Empty(e) => {
                if entities.is_empty() {
                    return Ok(None);
                }
                writer.write_event(Event::Empty(expand_start(&e, &entities)?))?;
            }
            Event::Text(e) => {
                let resolved = entities.resolve_text(str::from_utf8(&e)?)?;
                writer.write_event(Event::Text(BytesText::new(&resolved)))?;
            }
            Event::Eof => break,
            other => writer.write_event(other)?,
        }
    }

    if entities.is_empty() {
        return Ok(None);
    }
    let expanded = String::from_utf8(writer.into_inner()).map_err(|e| e.utf8_error())?;
    Ok(Some(expanded))
}

fn expand_start(e: &BytesStart<'_>, entities: &Entities) -> Result<BytesStart<'static>> {
    let name = str::from_utf8(e.name().as_ref())?.to_string();
    let mut expanded = BytesStart::new(name);
    for attr in e.attributes() {
        let attr = attr?;
        let key = str::from_utf8(attr.key.as_ref())?;
        let value = entities.resolve_attribute(str::from_utf8(&attr.value)?)?;
        expanded.push_attribute((key, value.as_str()));
    }
    Ok(expanded)
}
