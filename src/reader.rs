//! Update document reader.
//!
//! Decodes update XML into an [`Update`] using `quick-xml`. The reader does
//! not validate against the schema: the root element is mapped whatever its
//! name, unknown elements are skipped, element order is not enforced, and
//! dates that do not parse are dropped. Input must still be well-formed,
//! which libxml2 checks before anything is mapped. Schema checks are layered
//! on top by the codec.
//!
//! Text of `xs:string` fields (`comment`, `change`) is kept exactly as
//! written. Token-typed values (names, versions, URLs) have their whitespace
//! collapsed.
//!
//! # Example
//!
//! ```rust
//! use updater_xml::reader::UpdateReader;
//!
//! let xml = r#"<?xml version="1.0"?>
//! <update>
//!   <mainRelease>
//!     <name>App</name>
//!     <version>1.0.0</version>
//!     <sources><source>https://example.org/app.jar</source></sources>
//!   </mainRelease>
//! </update>"#;
//!
//! let mut reader = UpdateReader::new();
//! let update = reader.read(xml.as_bytes()).unwrap();
//! assert_eq!(update.main_release.unwrap().version.as_deref(), Some("1.0.0"));
//! ```

use crate::entities::Entities;
use crate::error::{MalformedError, Result};
use crate::objects::{
    collapse_whitespace, parse_date, ChangelogEntry, Platform, Plugin, PluginKind, Release,
    Source, Update, UPDATE_ELEMENT,
};
use crate::validation::parse_well_formed;
use chrono::NaiveDate;
use log::debug;
use quick_xml::encoding::{decode, detect_encoding};
use quick_xml::events::BytesStart;
use quick_xml::events::Event as XmlEvent;
use quick_xml::Reader;
use std::borrow::Cow;
use std::str;

/// A document to decode.
#[derive(Debug, Clone, Copy)]
pub enum Input<'a> {
    /// Raw bytes: UTF-8, or the encoding named by a byte order mark or the
    /// XML declaration
    Bytes(&'a [u8]),
    /// Text that is already decoded; a declared encoding is ignored
    Text(&'a str),
}

impl<'a> Input<'a> {
    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &'a [u8] {
        match *self {
            Input::Bytes(bytes) => bytes,
            Input::Text(text) => text.as_bytes(),
        }
    }

    /// Returns the encoding a parser must use instead of the declared one.
    pub fn forced_encoding(&self) -> Option<&'static str> {
        match self {
            Input::Bytes(_) => None,
            Input::Text(_) => Some("UTF-8"),
        }
    }

    /// Decodes the document to text with normalized line endings.
    pub fn decode(&self) -> Result<Cow<'a, str>> {
        let text = match *self {
            Input::Bytes(bytes) => decode_bytes(bytes)?,
            Input::Text(text) => Cow::Borrowed(text),
        };
        Ok(normalize_line_endings(text))
    }
}

/// Decodes raw document bytes.
///
/// A byte order mark wins over the XML declaration. Without either, the
/// input must be UTF-8.
pub fn decode_bytes(bytes: &[u8]) -> Result<Cow<'_, str>> {
    let (encoding, body) = match detect_encoding(bytes) {
        Some((encoding, bom)) if bom > 0 || encoding.name() != "UTF-8" => {
            (Some(encoding), &bytes[bom..])
        }
        _ => {
            let mut sniffer = Reader::from_reader(bytes);
            let declared = match sniffer.read_event() {
                Ok(XmlEvent::Decl(decl)) => match decl.encoding() {
                    Some(label) => {
                        let label = label?;
                        match decl.encoder() {
                            Some(encoding) => Some(encoding),
                            None => {
                                return Err(MalformedError::UnsupportedEncoding(
                                    String::from_utf8_lossy(&label).into_owned(),
                                )
                                .into())
                            }
                        }
                    }
                    None => None,
                },
                _ => None,
            };
            // A UTF-16 label on ASCII-compatible bytes cannot be right
            (declared.filter(|e| !e.name().starts_with("UTF-16")), bytes)
        }
    };

    match encoding {
        Some(encoding) => Ok(decode(body, encoding).map_err(quick_xml::Error::from)?),
        None => Ok(Cow::Borrowed(str::from_utf8(body)?)),
    }
}

/// Replaces `\r\n` and lone `\r` with `\n`, as an XML processor must.
fn normalize_line_endings(text: Cow<'_, str>) -> Cow<'_, str> {
    if text.contains('\r') {
        Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        text
    }
}

/// Which release slot a `<...Release>` element fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReleaseSlot {
    Setup,
    Main,
}

/// Parser state tracking what element we're currently inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    /// Before the root element
    Initial,
    /// Inside the root element
    InUpdate,
    /// Inside <setupRelease> or <mainRelease>
    InRelease(ReleaseSlot),
    /// Inside <redirects> or <hosts>
    InPluginList(PluginKind),
    /// Inside <redirect> or <host>
    InPlugin(PluginKind),
    /// Inside <sources>
    InSources,
    /// Inside <changelog>
    InChangelog,
    /// Inside a changelog <entry>
    InEntry,
    /// Inside a text-only element
    InLeaf,
    /// Inside an element we don't map, including all of its descendants
    Skipped,
    /// Root element closed
    Done,
}

/// An open element and the text directly inside it.
#[derive(Debug)]
struct Frame {
    name: String,
    text: String,
}

/// Context for tracking nested element parsing.
#[derive(Debug, Default)]
struct ElementContext {
    /// Open elements, innermost last (e.g. update, mainRelease, name)
    frames: Vec<Frame>,
}

impl ElementContext {
    fn push(&mut self, name: String) {
        self.frames.push(Frame {
            name,
            text: String::new(),
        });
    }

    fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    fn append_text(&mut self, text: &str) {
        if let Some(frame) = self.frames.last_mut() {
            frame.text.push_str(text);
        }
    }

    /// Returns the current element name (for error reporting).
    fn current(&self) -> Option<&str> {
        self.frames.last().map(|f| f.name.as_str())
    }
}

/// Intermediate parsed event data (owned, to avoid borrow conflicts).
enum ParsedEvent {
    Start { name: String, attrs: Vec<(String, String)> },
    End { name: String },
    Empty { name: String, attrs: Vec<(String, String)> },
    Text { text: String },
    DocType { body: String },
    Eof,
}

/// Builds an [`Update`] from a stream of element events.
struct Decoder {
    state: ParserState,
    state_stack: Vec<ParserState>,
    context: ElementContext,
    entities: Entities,

    // Objects being built
    update: Update,
    release: Option<Release>,
    plugin: Option<Plugin>,
    sources: Vec<Source>,
    source: Option<Source>,
    entry: Option<ChangelogEntry>,
}

impl Decoder {
    fn new() -> Self {
        Self {
            state: ParserState::Initial,
            state_stack: Vec::new(),
            context: ElementContext::default(),
            entities: Entities::default(),
            update: Update::new(),
            release: None,
            plugin: None,
            sources: Vec::new(),
            source: None,
            entry: None,
        }
    }

    /// Handles a start element.
    fn handle_start(&mut self, local_name: &str, attrs: Vec<(String, String)>) -> Result<()> {
        let next = match (self.state, local_name) {
            (ParserState::Initial, name) => {
                if name != UPDATE_ELEMENT {
                    debug!("Mapping root element <{}> as <{}>", name, UPDATE_ELEMENT);
                }
                ParserState::InUpdate
            }
            (ParserState::Done, other) => {
                return Err(MalformedError::ContentOutsideRoot(format!("<{}>", other)).into());
            }
            (ParserState::InUpdate, "setupRelease") => {
                self.release = Some(Release::default());
                ParserState::InRelease(ReleaseSlot::Setup)
            }
            (ParserState::InUpdate, "mainRelease") => {
                self.release = Some(Release::default());
                ParserState::InRelease(ReleaseSlot::Main)
            }
            (ParserState::InUpdate, "redirects") => ParserState::InPluginList(PluginKind::Redirect),
            (ParserState::InUpdate, "hosts") => ParserState::InPluginList(PluginKind::Host),
            (ParserState::InUpdate, "changelog") => ParserState::InChangelog,
            (ParserState::InPluginList(kind), name) if name == kind.element_name() => {
                self.plugin = Some(plugin_from_attrs(&attrs));
                ParserState::InPlugin(kind)
            }
            (ParserState::InRelease(_) | ParserState::InPlugin(_), "sources") => {
                self.sources.clear();
                ParserState::InSources
            }
            (ParserState::InSources, "source") => {
                self.source = Some(source_from_attrs(&attrs));
                ParserState::InLeaf
            }
            (ParserState::InRelease(_), "name" | "version" | "releaseDate" | "comment") => {
                ParserState::InLeaf
            }
            (ParserState::InChangelog, "entry") => {
                self.entry = Some(entry_from_attrs(&attrs));
                ParserState::InEntry
            }
            (ParserState::InEntry, "change") => ParserState::InLeaf,
            _ => ParserState::Skipped,
        };

        self.context.push(local_name.to_string());
        self.state_stack.push(self.state);
        self.state = next;
        Ok(())
    }

    /// Handles an end element.
    fn handle_end(&mut self, local_name: &str) {
        let text = self.context.pop().map(|f| f.text).unwrap_or_default();

        let finished = self.state;
        self.state = self.state_stack.pop().unwrap_or(ParserState::Initial);

        match finished {
            ParserState::InLeaf => self.apply_text(local_name, text),
            ParserState::InSources => {
                let sources = std::mem::take(&mut self.sources);
                match self.state {
                    ParserState::InRelease(_) => {
                        if let Some(ref mut release) = self.release {
                            release.sources.extend(sources);
                        }
                    }
                    ParserState::InPlugin(_) => {
                        if let Some(ref mut plugin) = self.plugin {
                            plugin.sources.extend(sources);
                        }
                    }
                    _ => {}
                }
            }
            ParserState::InRelease(slot) => {
                let release = self.release.take();
                match slot {
                    ReleaseSlot::Setup => self.update.setup_release = release,
                    ReleaseSlot::Main => self.update.main_release = release,
                }
            }
            ParserState::InPlugin(kind) => {
                if let Some(plugin) = self.plugin.take() {
                    self.update.add_plugin(kind, plugin);
                }
            }
            ParserState::InEntry => {
                if let Some(entry) = self.entry.take() {
                    self.update.add_changelog_entry(entry);
                }
            }
            ParserState::InUpdate => {
                self.state = ParserState::Done;
            }
            _ => {}
        }
    }

    /// Stores the text of a leaf element on the object it belongs to.
    fn apply_text(&mut self, local_name: &str, text: String) {
        match (self.state, local_name) {
            (ParserState::InSources, "source") => {
                if let Some(mut source) = self.source.take() {
                    source.url = collapse_whitespace(&text);
                    self.sources.push(source);
                }
            }
            (ParserState::InEntry, "change") => {
                if let Some(ref mut entry) = self.entry {
                    entry.changes.push(text);
                }
            }
            (ParserState::InRelease(_), name) => {
                if let Some(ref mut release) = self.release {
                    match name {
                        "name" => release.name = Some(collapse_whitespace(&text)),
                        "version" => release.version = Some(collapse_whitespace(&text)),
                        "releaseDate" => release.release_date = lenient_date(&text),
                        "comment" => release.comment = Some(text),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    fn handle_text(&mut self, text: &str) -> Result<()> {
        match self.state {
            ParserState::Initial | ParserState::Done => {
                if is_blank(text) {
                    Ok(())
                } else {
                    Err(MalformedError::ContentOutsideRoot(text.trim().to_string()).into())
                }
            }
            _ => {
                self.context.append_text(text);
                Ok(())
            }
        }
    }

    /// Finishes decoding at end of input.
    fn finish(self) -> Result<Update> {
        match self.state {
            ParserState::Done => Ok(self.update),
            ParserState::Initial => Err(MalformedError::MissingRoot.into()),
            _ => Err(MalformedError::UnclosedElement(
                self.context.current().unwrap_or(UPDATE_ELEMENT).to_string(),
            )
            .into()),
        }
    }
}

/// Reusable update document reader.
///
/// Keeps its event buffer between calls, so a reader should be owned by one
/// caller at a time.
#[derive(Debug, Default)]
pub struct UpdateReader {
    buf: Vec<u8>,
}

impl UpdateReader {
    /// Creates a new reader.
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(4096),
        }
    }

    /// Decodes a complete document from raw bytes.
    ///
    /// Fails with [`Error::Malformed`](crate::Error::Malformed) if the input
    /// cannot be decoded or is not well-formed XML.
    pub fn read(&mut self, input: &[u8]) -> Result<Update> {
        self.read_input(Input::Bytes(input))
    }

    /// Decodes a complete document from text.
    pub fn read_str(&mut self, xml: &str) -> Result<Update> {
        self.read_input(Input::Text(xml))
    }

    /// Decodes a complete document.
    pub fn read_input(&mut self, input: Input<'_>) -> Result<Update> {
        let text = input.decode()?;
        parse_well_formed(input)?;
        self.map(&text)
    }

    /// Maps decoded text onto an [`Update`].
    ///
    /// Catches the syntax errors quick-xml detects but not XML character
    /// rules; callers check well-formedness with libxml2 first.
    pub(crate) fn map(&mut self, text: &str) -> Result<Update> {
        let mut reader = Reader::from_str(text);
        let mut decoder = Decoder::new();

        loop {
            self.buf.clear();

            // Read the event and immediately extract what we need as owned data
            let event_data = {
                let event = reader.read_event_into(&mut self.buf)?;
                match event {
                    XmlEvent::Start(ref e) => {
                        let local_name = e.local_name();
                        let name = str::from_utf8(local_name.as_ref())?.to_string();
                        let attrs = extract_attrs(e, &decoder.entities)?;
                        Some(ParsedEvent::Start { name, attrs })
                    }
                    XmlEvent::End(ref e) => {
                        let local_name = e.local_name();
                        let name = str::from_utf8(local_name.as_ref())?.to_string();
                        Some(ParsedEvent::End { name })
                    }
                    XmlEvent::Empty(ref e) => {
                        let local_name = e.local_name();
                        let name = str::from_utf8(local_name.as_ref())?.to_string();
                        let attrs = extract_attrs(e, &decoder.entities)?;
                        Some(ParsedEvent::Empty { name, attrs })
                    }
                    XmlEvent::Text(ref e) => {
                        let text = decoder.entities.resolve_text(str::from_utf8(e)?)?;
                        Some(ParsedEvent::Text { text })
                    }
                    XmlEvent::CData(ref e) => {
                        let text = str::from_utf8(e)?.to_string();
                        Some(ParsedEvent::Text { text })
                    }
                    XmlEvent::DocType(ref e) => {
                        let body = str::from_utf8(e)?.to_string();
                        Some(ParsedEvent::DocType { body })
                    }
                    XmlEvent::Eof => Some(ParsedEvent::Eof),
                    _ => None,
                }
            };

            match event_data {
                Some(ParsedEvent::Start { name, attrs }) => decoder.handle_start(&name, attrs)?,
                Some(ParsedEvent::End { name }) => decoder.handle_end(&name),
                Some(ParsedEvent::Empty { name, attrs }) => {
                    decoder.handle_start(&name, attrs)?;
                    decoder.handle_end(&name);
                }
                Some(ParsedEvent::Text { text }) => decoder.handle_text(&text)?,
                Some(ParsedEvent::DocType { body }) => decoder.entities.declare(&body)?,
                Some(ParsedEvent::Eof) => break,
                None => {}
            }
        }

        decoder.finish()
    }
}

/// Extracts attributes from a BytesStart element as owned data.
fn extract_attrs(e: &BytesStart<'_>, entities: &Entities) -> Result<Vec<(String, String)>> {
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = str::from_utf8(attr.key.local_name().as_ref())?.to_string();
        let value = entities.resolve_attribute(str::from_utf8(&attr.value)?)?;
        attrs.push((key, value));
    }
    Ok(attrs)
}

fn plugin_from_attrs(attrs: &[(String, String)]) -> Plugin {
    let mut plugin = Plugin::default();
    for (key, value) in attrs {
        match key.as_str() {
            "name" => plugin.name = Some(collapse_whitespace(value)),
            "version" => plugin.version = Some(collapse_whitespace(value)),
            "filename" => plugin.filename = Some(collapse_whitespace(value)),
            _ => {}
        }
    }
    plugin
}

fn source_from_attrs(attrs: &[(String, String)]) -> Source {
    let mut source = Source::default();
    for (key, value) in attrs {
        match key.as_str() {
            "os" => source.os = Some(Platform::from(collapse_whitespace(value).as_str())),
            "sha256" => source.sha256 = Some(value.clone()),
            _ => {}
        }
    }
    source
}

fn entry_from_attrs(attrs: &[(String, String)]) -> ChangelogEntry {
    let mut entry = ChangelogEntry::default();
    for (key, value) in attrs {
        match key.as_str() {
            "version" => entry.version = Some(collapse_whitespace(value)),
            "date" => entry.date = lenient_date(value),
            _ => {}
        }
    }
    entry
}

/// Parses a date, dropping values that are empty or don't parse.
fn lenient_date(s: &str) -> Option<NaiveDate> {
    let s = collapse_whitespace(s);
    if s.is_empty() {
        return None;
    }
    match parse_date(&s) {
        Ok(date) => Some(date),
        Err(e) => {
            debug!("Ignoring {}", e);
            None
        }
    }
}

fn is_blank(text: &str) -> bool {
    text.chars().all(|c| matches!(c, ' ' | '\t' | '\n' | '\r'))
}

/// Convenience function to decode a document without keeping a reader.
pub fn parse(input: &[u8]) -> Result<Update> {
    UpdateReader::new().read(input)
}
