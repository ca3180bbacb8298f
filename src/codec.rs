//! Schema-governed reading and writing of update documents.
//!
//! [`UpdateXmlCodec`] owns the compiled update schema and three converters:
//!
//! - a strict reader that validates input against the schema,
//! - a lenient reader that only decodes,
//! - a writer that always validates its output.
//!
//! Each converter sits behind its own mutex, so a lenient read, a strict
//! read and a write can run at the same time, while two calls using the
//! same converter take turns. Only the conversion step holds a lock; file
//! and stream I/O happen outside of it.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use updater_xml::UpdateXmlCodec;
//!
//! let codec = Arc::new(UpdateXmlCodec::new()?);
//!
//! let mut update = codec.read_path("update.xml", true)?;
//! if let Some(ref mut main) = update.main_release {
//!     main.version = Some("4.6.0".to_string());
//! }
//! codec.write_path("out/update.xml", &update)?;
//! # Ok::<(), updater_xml::Error>(())
//! ```

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::str;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, trace};

use crate::entities::expand_entities;
use crate::error::{Error, MalformedError, Result, ValidationErrors, ValidationIssue};
use crate::objects::{Update, UPDATE_ELEMENT};
use crate::reader::{Input, UpdateReader};
use crate::validation::{parse_well_formed, SchemaDefinition, SchemaValidator, UPDATE_SCHEMA_PATH};
use crate::writer::{UpdateWriter, WriterConfig};

/// Decodes and validates against the schema.
#[derive(Debug)]
struct StrictReader {
    reader: UpdateReader,
    validator: SchemaValidator,
}

impl StrictReader {
    /// Input that is not well-formed is `Malformed`; anything else the
    /// schema rejects is `SchemaValidation`.
    fn read(&mut self, input: Input<'_>) -> Result<Update> {
        let text = input.decode()?;
        let doc = parse_well_formed(input)?;

        // libxml2's schema validator cannot see through entity references
        match expand_entities(&text)? {
            Some(expanded) => {
                debug!("Validating entity-expanded copy of the document");
                self.validator.validate(&expanded)?
            }
            None => self.validator.validate_document(&doc)?,
        }

        self.reader.map(&text)
    }
}

/// Encodes and validates; the only way to produce output.
#[derive(Debug)]
struct ValidatingWriter {
    writer: UpdateWriter,
    validator: SchemaValidator,
}

impl ValidatingWriter {
    fn encode(&mut self, doc: &Update) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.writer.write(doc, &mut buffer)?;

        let checked = str::from_utf8(&buffer)
            .map_err(Error::from)
            .and_then(|xml| self.validator.validate(xml));
        match checked {
            Ok(()) => Ok(buffer),
            Err(Error::Malformed(e)) => Err(Error::SchemaValidation(ValidationErrors::new(vec![
                ValidationIssue {
                    line: None,
                    column: None,
                    message: format!("output is not well-formed: {}", e),
                },
            ]))),
            Err(e) => Err(e),
        }
    }
}

/// Reads and writes update documents against the embedded schema.
///
/// Cheap to share: wrap it in an [`Arc`] (or keep it in a `static`) and call
/// it from any thread.
#[derive(Debug)]
pub struct UpdateXmlCodec {
    schema: Arc<SchemaDefinition>,
    strict: Mutex<StrictReader>,
    lenient: Mutex<UpdateReader>,
    writer: Mutex<ValidatingWriter>,
}

impl UpdateXmlCodec {
    /// Builds a codec for the embedded schema.
    ///
    /// Fails with [`Error::SchemaLoad`] if the schema cannot be loaded or
    /// compiled, and with [`Error::BindingInit`] if it does not declare the
    /// `<update>` root element.
    pub fn new() -> Result<Self> {
        Self::with_config(WriterConfig::default())
    }

    /// Builds a codec for the embedded schema with custom output settings.
    pub fn with_config(config: WriterConfig) -> Result<Self> {
        Self::from_schema(SchemaDefinition::embedded()?, config)
    }

    fn from_schema(schema: SchemaDefinition, config: WriterConfig) -> Result<Self> {
        let strict_validator = schema.compile()?;

        if !schema.declares_element(UPDATE_ELEMENT) {
            return Err(Error::BindingInit(format!(
                "{} declares no global <{}> element (found: {})",
                UPDATE_SCHEMA_PATH,
                UPDATE_ELEMENT,
                schema.global_elements().join(", ")
            )));
        }

        let writer_validator = schema.compile()?;
        debug!(
            "Compiled update schema {} ({} bytes)",
            UPDATE_SCHEMA_PATH,
            schema.source().len()
        );

        Ok(Self {
            schema: Arc::new(schema),
            strict: Mutex::new(StrictReader {
                reader: UpdateReader::new(),
                validator: strict_validator,
            }),
            lenient: Mutex::new(UpdateReader::new()),
            writer: Mutex::new(ValidatingWriter {
                writer: UpdateWriter::with_config(config),
                validator: writer_validator,
            }),
        })
    }

    /// Returns the schema this codec validates against.
    pub fn schema(&self) -> &Arc<SchemaDefinition> {
        &self.schema
    }

    /// Reads an update document from a file.
    ///
    /// With `validate` set the document must conform to the schema.
    pub fn read_path<P: AsRef<Path>>(&self, path: P, validate: bool) -> Result<Update> {
        let path = path.as_ref();
        trace!("Reading update document from {}", path.display());
        let file = File::open(path)?;
        self.read(BufReader::new(file), validate)
    }

    /// Reads an update document from a stream.
    ///
    /// The stream is read to the end before any converter is locked. Bytes
    /// are decoded as their byte order mark or XML declaration says.
    pub fn read<R: Read>(&self, mut input: R, validate: bool) -> Result<Update> {
        let mut bytes = Vec::new();
        input.read_to_end(&mut bytes)?;
        self.decode(Input::Bytes(&bytes), validate)
    }

    /// Reads an update document from a string.
    ///
    /// The text is already decoded, so a declared encoding is ignored.
    pub fn read_str(&self, xml: &str, validate: bool) -> Result<Update> {
        self.decode(Input::Text(xml), validate)
    }

    fn decode(&self, input: Input<'_>, validate: bool) -> Result<Update> {
        trace!(
            "Decoding {} bytes ({})",
            input.as_bytes().len(),
            if validate { "strict" } else { "lenient" }
        );
        if validate {
            lock(&self.strict).read(input)
        } else {
            lock(&self.lenient).read_input(input)
        }
    }

    /// Writes an update document to a file.
    ///
    /// Missing parent directories are created and an existing file is
    /// overwritten. The document is validated before the file is opened, so
    /// an invalid document leaves any existing file untouched.
    pub fn write_path<P: AsRef<Path>>(&self, path: P, doc: &Update) -> Result<()> {
        let bytes = self.encode(doc)?;

        let path = std::path::absolute(path.as_ref())?;
        if let Some(parent) = path.parent() {
            if !parent.is_dir() {
                debug!("Creating directory {}", parent.display());
            }
            fs::create_dir_all(parent)?;
        }

        trace!("Writing update document to {}", path.display());
        let mut out = BufWriter::new(File::create(&path)?);
        out.write_all(&bytes)?;
        out.flush()?;
        Ok(())
    }

    /// Writes an update document to a stream.
    ///
    /// Nothing is written if the document fails validation.
    pub fn write<W: Write>(&self, mut output: W, doc: &Update) -> Result<()> {
        let bytes = self.encode(doc)?;
        output.write_all(&bytes)?;
        output.flush()?;
        Ok(())
    }

    /// Writes an update document to a string.
    pub fn to_string(&self, doc: &Update) -> Result<String> {
        let bytes = self.encode(doc)?;
        String::from_utf8(bytes)
            .map_err(|e| Error::from(MalformedError::Utf8(e.utf8_error())))
    }

    fn encode(&self, doc: &Update) -> Result<Vec<u8>> {
        let bytes = lock(&self.writer).encode(doc)?;
        trace!("Encoded update document ({} bytes)", bytes.len());
        Ok(bytes)
    }
}

/// Locks a converter, recovering from poisoning.
///
/// Converters reset their scratch state at the start of every call, so a
/// panic during an earlier conversion leaves nothing behind.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{ChangelogEntry, Platform, Plugin, PluginKind, Release, Source};
    use chrono::NaiveDate;
    use std::io::Cursor;
    use std::thread;

    fn valid_update(version: &str) -> Update {
        let main = Release::new("App", version)
            .with_release_date(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
            .with_source(
                Source::new(format!("https://example.org/app-{}.jar", version))
                    .with_os(Platform::Any)
                    .with_sha256("a".repeat(64)),
            )
            .with_comment("Bugfix release");

        let mut update = Update::with_main_release(main);
        update.setup_release = Some(
            Release::new("App Setup", version)
                .with_source(Source::new("https://example.org/setup.exe").with_os(Platform::Windows)),
        );
        update.add_plugin(
            PluginKind::Redirect,
            Plugin::new("Imagebam", "1.2", "RedirectImagebam.xml"),
        );
        update.add_plugin(
            PluginKind::Host,
            Plugin::new("HostA", "3", "HostA.jar")
                .with_source(Source::new("https://example.org/HostA.jar")),
        );
        update.add_changelog_entry(
            ChangelogEntry::new(version)
                .with_date(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
                .with_change("Fixed downloads")
                .with_change("Updated translations"),
        );
        update
    }

    const NONCONFORMANT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<update>
  <mainRelease>
    <name>App</name>
    <sources>
      <source>https://example.org/app.jar</source>
    </sources>
  </mainRelease>
</update>"#;

    #[test]
    fn test_codec_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<UpdateXmlCodec>();
    }

    #[test]
    fn test_roundtrip_validated() {
        let codec = UpdateXmlCodec::new().unwrap();
        let update = valid_update("4.5.1");

        let mut buffer = Vec::new();
        codec.write(&mut buffer, &update).unwrap();
        let parsed = codec.read(Cursor::new(&buffer), true).unwrap();

        assert_eq!(parsed, update);
    }

    #[test]
    fn test_write_rejects_missing_required_field() {
        let codec = UpdateXmlCodec::new().unwrap();
        let mut update = valid_update("1.0.0");
        update.main_release.as_mut().unwrap().version = None;

        let mut buffer = Vec::new();
        let err = codec.write(&mut buffer, &update).unwrap_err();
        assert!(err.is_validation(), "unexpected error: {}", err);
        assert!(buffer.is_empty());

        update.main_release = None;
        assert!(codec.to_string(&update).unwrap_err().is_validation());
    }

    #[test]
    fn test_strict_read_rejects_missing_required_field() {
        let codec = UpdateXmlCodec::new().unwrap();
        let err = codec.read_str(NONCONFORMANT, true).unwrap_err();
        match err {
            Error::SchemaValidation(errors) => assert!(errors.mentions("version"), "{}", errors),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_lenient_accepts_what_strict_rejects() {
        let codec = UpdateXmlCodec::new().unwrap();

        let update = codec.read_str(NONCONFORMANT, false).unwrap();
        let main = update.main_release.unwrap();
        assert_eq!(main.name.as_deref(), Some("App"));
        assert!(main.version.is_none());

        assert!(codec.read_str(NONCONFORMANT, true).unwrap_err().is_validation());
    }

    #[test]
    fn test_lenient_keeps_unknown_platform() {
        let codec = UpdateXmlCodec::new().unwrap();
        let xml = NONCONFORMANT.replace("<source>", "<source os=\"solaris\">");

        let update = codec.read_str(&xml, false).unwrap();
        assert_eq!(
            update.main_release.unwrap().sources[0].os,
            Some(Platform::Other("solaris".to_string()))
        );
        assert!(codec.read_str(&xml, true).unwrap_err().is_validation());
    }

    #[test]
    fn test_malformed_input_in_both_modes() {
        let codec = UpdateXmlCodec::new().unwrap();
        let inputs: [&[u8]; 4] = [
            b"<update><mainRelease></update>",
            b"<update>",
            b"not xml at all",
            b"",
        ];

        for input in inputs {
            for validate in [true, false] {
                let err = codec.read(input, validate).unwrap_err();
                assert!(
                    err.is_malformed(),
                    "input {:?} (validate={}) gave {}",
                    String::from_utf8_lossy(input),
                    validate,
                    err
                );
            }
        }
    }

    #[test]
    fn test_strict_prefers_validation_over_mapping_errors() {
        let codec = UpdateXmlCodec::new().unwrap();
        let xml = r#"<update><mainRelease><name>App</name><version>1</version><releaseDate>soon</releaseDate><sources><source>https://example.org/a</source></sources></mainRelease></update>"#;

        assert!(codec.read_str(xml, true).unwrap_err().is_validation());
        let update = codec.read_str(xml, false).unwrap();
        let main = update.main_release.unwrap();
        assert_eq!(main.release_date, None);
        assert_eq!(main.version.as_deref(), Some("1"));

        let wrong_root = "<updates><mainRelease><name>App</name></mainRelease></updates>";
        assert!(codec.read_str(wrong_root, true).unwrap_err().is_validation());
        let update = codec.read_str(wrong_root, false).unwrap();
        assert_eq!(update.main_release.unwrap().name.as_deref(), Some("App"));
    }

    #[test]
    fn test_illegal_characters_in_both_modes() {
        let codec = UpdateXmlCodec::new().unwrap();
        for comment in ["bad\u{1}char", "a ]]> b", "&#1;"] {
            let xml = NONCONFORMANT.replace(
                "</sources>",
                &format!("</sources>\n    <comment>{}</comment>", comment),
            );
            for validate in [true, false] {
                let err = codec.read_str(&xml, validate).unwrap_err();
                assert!(
                    matches!(err, Error::Malformed(MalformedError::NotWellFormed(_))),
                    "{:?} (validate={}) gave {:?}",
                    comment,
                    validate,
                    err
                );
            }
        }
    }

    #[test]
    fn test_strict_read_of_declared_encoding() {
        let codec = UpdateXmlCodec::new().unwrap();
        let mut update = valid_update("1.0.0");
        update.main_release.as_mut().unwrap().comment = Some("Caf\u{e9}".to_string());

        let xml = codec
            .to_string(&update)
            .unwrap()
            .replace("encoding=\"UTF-8\"", "encoding=\"ISO-8859-1\"");
        let latin1: Vec<u8> = xml.chars().map(|c| c as u32 as u8).collect();

        assert_eq!(codec.read(latin1.as_slice(), true).unwrap(), update);
        assert_eq!(codec.read(latin1.as_slice(), false).unwrap(), update);
    }

    #[test]
    fn test_strict_read_with_internal_entities() {
        let codec = UpdateXmlCodec::new().unwrap();
        let xml = r#"<?xml version="1.0"?>
<!DOCTYPE update [
  <!ENTITY v "4.5.1">
]>
<update>
  <mainRelease>
    <name>App</name>
    <version>&v;</version>
    <sources><source>https://example.org/app.jar</source></sources>
  </mainRelease>
</update>"#;

        let update = codec.read_str(xml, true).unwrap();
        assert_eq!(update.main_release.unwrap().version.as_deref(), Some("4.5.1"));

        let bad = xml.replace(r#""4.5.1""#, r#""four""#);
        match codec.read_str(&bad, true).unwrap_err() {
            Error::SchemaValidation(errors) => {
                assert!(errors.issues().iter().any(|i| i.line == Some(8)), "{}", errors)
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_write_rejects_illegal_characters() {
        let codec = UpdateXmlCodec::new().unwrap();
        let mut update = valid_update("1.0.0");
        update.main_release.as_mut().unwrap().comment = Some("bad\u{1}char".to_string());

        let mut buffer = Vec::new();
        match codec.write(&mut buffer, &update).unwrap_err() {
            Error::SchemaValidation(errors) => {
                assert!(errors.mentions("mainRelease/comment"), "{}", errors);
                assert!(errors.mentions("XML does not allow"), "{}", errors);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_roundtrip_keeps_text_whitespace() {
        let codec = UpdateXmlCodec::new().unwrap();
        let mut update = valid_update("1.0.0");
        update.main_release.as_mut().unwrap().comment = Some("  indented\n".to_string());
        update.changelog[0].changes = vec![" - item".to_string(), "line one\nline two\n".to_string()];

        let xml = codec.to_string(&update).unwrap();
        assert_eq!(codec.read_str(&xml, true).unwrap(), update);
        assert_eq!(codec.read_str(&xml, false).unwrap(), update);
    }

    #[test]
    fn test_write_path_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a").join("b").join("update.xml");
        let codec = UpdateXmlCodec::new().unwrap();

        codec.write_path(&target, &valid_update("1.0.0")).unwrap();
        assert!(dir.path().join("a").is_dir());
        assert!(dir.path().join("a").join("b").is_dir());
        assert_eq!(
            codec.read_path(&target, true).unwrap(),
            valid_update("1.0.0")
        );

        // Second write overwrites
        codec.write_path(&target, &valid_update("2.0.0")).unwrap();
        assert_eq!(
            codec.read_path(&target, true).unwrap(),
            valid_update("2.0.0")
        );
        let text = fs::read_to_string(&target).unwrap();
        assert!(!text.contains("1.0.0"));
        assert_eq!(text.matches("<update>").count(), 1);
    }

    #[test]
    fn test_write_path_in_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("update.xml");
        let codec = UpdateXmlCodec::new().unwrap();

        codec.write_path(&target, &valid_update("1.0.0")).unwrap();
        codec.write_path(&target, &valid_update("1.0.0")).unwrap();
        assert!(target.is_file());
    }

    #[test]
    fn test_invalid_write_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("update.xml");
        let codec = UpdateXmlCodec::new().unwrap();

        codec.write_path(&target, &valid_update("1.0.0")).unwrap();
        let before = fs::read_to_string(&target).unwrap();

        let err = codec.write_path(&target, &Update::new()).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(fs::read_to_string(&target).unwrap(), before);
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let codec = UpdateXmlCodec::new().unwrap();
        let err = codec
            .read_path(dir.path().join("missing.xml"), false)
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_output_is_indented() {
        let codec = UpdateXmlCodec::new().unwrap();
        let xml = codec.to_string(&valid_update("1.0.0")).unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("\n  <mainRelease>"));

        let codec = UpdateXmlCodec::with_config(WriterConfig::new().with_indent_size(4)).unwrap();
        let xml = codec.to_string(&valid_update("1.0.0")).unwrap();
        assert!(xml.contains("\n    <mainRelease>"));
    }

    #[test]
    fn test_concurrent_strict_reads() {
        let codec = Arc::new(UpdateXmlCodec::new().unwrap());
        let documents: Vec<(Update, String)> = (0..16)
            .map(|i| {
                let update = valid_update(&format!("1.{}.0", i));
                let xml = codec.to_string(&update).unwrap();
                (update, xml)
            })
            .collect();

        thread::scope(|s| {
            let handles: Vec<_> = documents
                .iter()
                .map(|(expected, xml)| {
                    let codec = Arc::clone(&codec);
                    s.spawn(move || {
                        for _ in 0..10 {
                            let parsed = codec.read_str(xml, true).unwrap();
                            assert_eq!(&parsed, expected);
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }
        });
    }

    #[test]
    fn test_concurrent_mixed_operations() {
        let codec = Arc::new(UpdateXmlCodec::new().unwrap());
        let dir = tempfile::tempdir().unwrap();

        thread::scope(|s| {
            for i in 0..8 {
                let codec = Arc::clone(&codec);
                let dir = dir.path();
                s.spawn(move || {
                    let update = valid_update(&format!("2.{}.0", i));
                    let path = dir.join(format!("t{}", i)).join("update.xml");
                    codec.write_path(&path, &update).unwrap();
                    assert_eq!(codec.read_path(&path, true).unwrap(), update);
                    assert_eq!(codec.read_path(&path, false).unwrap(), update);
                });
            }
        });
    }

    #[test]
    fn test_missing_schema_fails_construction() {
        let err = SchemaDefinition::load("")
            .and_then(|schema| UpdateXmlCodec::from_schema(schema, WriterConfig::default()))
            .unwrap_err();
        assert!(matches!(err, Error::SchemaLoad(_)));
    }

    #[test]
    fn test_schema_without_root_fails_binding() {
        let source = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="somethingElse" type="xs:string"/>
</xs:schema>"#;
        let schema = SchemaDefinition::load(source).unwrap();
        let err = UpdateXmlCodec::from_schema(schema, WriterConfig::default()).unwrap_err();
        match err {
            Error::BindingInit(msg) => assert!(msg.contains("somethingElse")),
            other => panic!("expected binding error, got {:?}", other),
        }
    }

    #[test]
    fn test_shared_schema() {
        let codec = UpdateXmlCodec::new().unwrap();
        assert!(codec.schema().declares_element("update"));
    }
}
