//! XSD validation for update documents.
//!
//! The update schema ships inside the crate ([`UPDATE_SCHEMA`]) and is
//! compiled with libxml2 when a codec is built.
//!
//! # Requirements
//!
//! Validation depends on libxml2 being installed on the system.
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libxml2-dev
//! ```
//!
//! **macOS:**
//! ```bash
//! brew install libxml2
//! ```

use std::str;

use libxml::error::{StructuredError, XmlErrorLevel};
use libxml::parser::{Parser, ParserOptions, XmlParseFailure};
use libxml::schemas::{SchemaParserContext, SchemaValidationContext};
use libxml::tree::Document;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{Error, MalformedError, Result, ValidationErrors, ValidationIssue};
use crate::reader::Input;

/// Resource path of the embedded schema, relative to the crate root.
pub const UPDATE_SCHEMA_PATH: &str = "schema/update.xsd";

/// The embedded update schema.
pub const UPDATE_SCHEMA: &str = include_str!("../schema/update.xsd");

/// An XML Schema loaded from source.
///
/// Immutable once loaded. Validators compiled from it are independent of
/// each other and of the definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDefinition {
    source: String,
    global_elements: Vec<String>,
}

impl SchemaDefinition {
    /// Loads the embedded update schema.
    pub fn embedded() -> Result<Self> {
        Self::load(UPDATE_SCHEMA)
    }

    /// Loads a schema from its source text.
    ///
    /// Fails with [`Error::SchemaLoad`] if the source is empty, is not
    /// well-formed XML, or its root is not `xs:schema`.
    pub fn load(source: &str) -> Result<Self> {
        if source.trim().is_empty() {
            return Err(Error::SchemaLoad(format!(
                "schema resource {} is empty",
                UPDATE_SCHEMA_PATH
            )));
        }

        let global_elements = scan_global_elements(source)
            .map_err(|e| Error::SchemaLoad(format!("{}: {}", UPDATE_SCHEMA_PATH, e)))?;

        Ok(Self {
            source: source.to_string(),
            global_elements,
        })
    }

    /// Returns the schema source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the names of the top-level element declarations.
    pub fn global_elements(&self) -> &[String] {
        &self.global_elements
    }

    /// Returns true if the schema declares a top-level element `name`.
    pub fn declares_element(&self, name: &str) -> bool {
        self.global_elements.iter().any(|e| e == name)
    }

    /// Compiles the schema into a fresh validator.
    pub fn compile(&self) -> Result<SchemaValidator> {
        let mut parser = SchemaParserContext::from_buffer(self.source.as_bytes());
        let context = SchemaValidationContext::from_parser(&mut parser).map_err(|errors| {
            let msg = errors
                .iter()
                .map(|e| e.message.clone().unwrap_or_default().trim().to_string())
                .collect::<Vec<_>>()
                .join("; ");
            Error::SchemaLoad(format!("failed to compile schema: {}", msg))
        })?;
        Ok(SchemaValidator { context })
    }
}

/// Collects the `name` of every `xs:element` directly below `xs:schema`.
fn scan_global_elements(source: &str) -> std::result::Result<Vec<String>, String> {
    let mut reader = Reader::from_str(source);
    reader.config_mut().trim_text(true);

    let mut depth = 0usize;
    let mut saw_root = false;
    let mut elements = Vec::new();

    loop {
        let event = reader.read_event().map_err(|e| e.to_string())?;
        let (start, is_empty) = match event {
            Event::Start(e) => (e, false),
            Event::Empty(e) => (e, true),
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                continue;
            }
            Event::Eof => break,
            _ => continue,
        };

        let local_name = start.local_name();
        let local_name = str::from_utf8(local_name.as_ref()).map_err(|e| e.to_string())?;

        if depth == 0 {
            if saw_root {
                return Err("content after the schema element".to_string());
            }
            if local_name != "schema" {
                return Err(format!("root element is <{}>, not xs:schema", local_name));
            }
            saw_root = true;
        } else if depth == 1 && local_name == "element" {
            for attr in start.attributes() {
                let attr = attr.map_err(|e| e.to_string())?;
                if attr.key.as_ref() == b"name" {
                    let value = attr
                        .decode_and_unescape_value(reader.decoder())
                        .map_err(|e| e.to_string())?;
                    elements.push(value.into_owned());
                }
            }
        }

        if !is_empty {
            depth += 1;
        }
    }

    if !saw_root {
        return Err("no schema element".to_string());
    }
    if depth != 0 {
        return Err("unclosed schema element".to_string());
    }
    Ok(elements)
}

/// A compiled schema bound to a libxml2 validation context.
///
/// Validation contexts carry per-run state and must not be used from two
/// threads at once. Callers serialize access (the codec keeps each
/// validator behind a mutex).
pub struct SchemaValidator {
    context: SchemaValidationContext,
}

// SAFETY: `SchemaValidationContext` holds three raw pointers: `ctxt` (the
// libxml2 validation context), `errlog` (a boxed `Vec<StructuredError>`) and
// `_schema` (the compiled `xmlSchema`). All three are heap objects owned
// solely by the context, with no thread-local state, and are freed in its
// `Drop`. Every method that touches them takes `&mut self`, so moving the
// validator to another thread cannot create shared access.
unsafe impl Send for SchemaValidator {}

impl SchemaValidator {
    /// Validates a document held in memory.
    ///
    /// Returns [`Error::SchemaValidation`] with every reported violation, or
    /// [`Error::Malformed`] if the text is not well-formed.
    pub fn validate(&mut self, xml: &str) -> Result<()> {
        let doc = parse_well_formed(Input::Text(xml))?;
        self.validate_document(&doc)
    }

    /// Validates a document libxml2 has already parsed.
    pub fn validate_document(&mut self, doc: &Document) -> Result<()> {
        self.context
            .validate_document(doc)
            .map_err(|errors| Error::SchemaValidation(to_validation_errors(&errors)))
    }
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidator").finish_non_exhaustive()
    }
}

/// Parses a document with libxml2, rejecting anything that is not
/// well-formed XML.
///
/// Recovery and network access are off. Byte input is decoded as its byte
/// order mark or XML declaration says; text input is always UTF-8.
pub fn parse_well_formed(input: Input<'_>) -> Result<Document> {
    let options = ParserOptions {
        recover: false,
        no_net: true,
        encoding: input.forced_encoding(),
        ..ParserOptions::default()
    };

    match Parser::default().parse_string_with_diagnostics(input.as_bytes(), options) {
        Ok((doc, diagnostics)) => {
            let errors: Vec<StructuredError> = diagnostics
                .into_iter()
                .filter(|d| matches!(d.level, XmlErrorLevel::Error | XmlErrorLevel::Fatal))
                .collect();
            if errors.is_empty() {
                Ok(doc)
            } else {
                Err(not_well_formed(&errors))
            }
        }
        Err(XmlParseFailure::ParseFailed(diagnostics)) => Err(not_well_formed(&diagnostics)),
        Err(other) => Err(MalformedError::NotWellFormed(other.to_string()).into()),
    }
}

fn not_well_formed(diagnostics: &[StructuredError]) -> Error {
    MalformedError::NotWellFormed(to_validation_errors(diagnostics).to_string()).into()
}

fn to_validation_errors(errors: &[StructuredError]) -> ValidationErrors {
    ValidationErrors::new(
        errors
            .iter()
            .map(|e| ValidationIssue {
                line: e.line,
                column: e.col,
                message: e.message.clone().unwrap_or_default().trim().to_string(),
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_VALID: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<update>
  <mainRelease>
    <name>App</name>
    <version>1.0.0</version>
    <sources>
      <source>https://example.org/app.jar</source>
    </sources>
  </mainRelease>
</update>"#;

    #[test]
    fn test_embedded_schema_loads() {
        let schema = SchemaDefinition::embedded().unwrap();
        assert!(schema.declares_element("update"));
        assert_eq!(schema.global_elements(), ["update".to_string()]);
        assert_eq!(schema.source(), UPDATE_SCHEMA);
    }

    #[test]
    fn test_empty_schema_fails() {
        let err = SchemaDefinition::load("   \n").unwrap_err();
        assert!(matches!(err, Error::SchemaLoad(_)));
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_malformed_schema_fails() {
        let err = SchemaDefinition::load("<xs:schema xmlns:xs=\"x\"><xs:element").unwrap_err();
        assert!(matches!(err, Error::SchemaLoad(_)));

        let err = SchemaDefinition::load("<notaschema/>").unwrap_err();
        assert!(matches!(err, Error::SchemaLoad(_)));
    }

    #[test]
    fn test_invalid_schema_fails_to_compile() {
        let source = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="update" type="doesNotExist"/>
</xs:schema>"#;
        let schema = SchemaDefinition::load(source).unwrap();
        let err = schema.compile().unwrap_err();
        assert!(matches!(err, Error::SchemaLoad(_)));
    }

    #[test]
    fn test_validate_minimal_document() {
        let mut validator = SchemaDefinition::embedded().unwrap().compile().unwrap();
        let result = validator.validate(MINIMAL_VALID);
        assert!(result.is_ok(), "Validation failed: {:?}", result.err());
    }

    #[test]
    fn test_validate_missing_version() {
        let xml = MINIMAL_VALID.replace("<version>1.0.0</version>", "");
        let mut validator = SchemaDefinition::embedded().unwrap().compile().unwrap();

        match validator.validate(&xml) {
            Err(Error::SchemaValidation(errors)) => {
                assert!(!errors.issues().is_empty());
                assert!(errors.mentions("version"), "{}", errors);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_bad_attribute_values() {
        let xml = MINIMAL_VALID.replace("<source>", "<source os=\"solaris\" sha256=\"xyz\">");
        let mut validator = SchemaDefinition::embedded().unwrap().compile().unwrap();
        let err = validator.validate(&xml).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_parse_well_formed() {
        assert!(parse_well_formed(Input::Text(MINIMAL_VALID)).is_ok());

        for xml in [
            "<update><comment>bad\u{1}char</comment></update>",
            "<update><comment>a ]]> b</comment></update>",
            "<update><comment>&#1;</comment></update>",
            "<update><comment></update>",
            "<update/><update/>",
            "",
        ] {
            let err = parse_well_formed(Input::Text(xml)).err().unwrap();
            assert!(
                matches!(err, Error::Malformed(MalformedError::NotWellFormed(_))),
                "{:?}: {:?}",
                xml,
                err
            );
        }
    }

    #[test]
    fn test_parse_well_formed_reports_position() {
        let err = parse_well_formed(Input::Text("<update>\n<a>\u{1}</a>\n</update>")).err().unwrap();
        match err {
            Error::Malformed(MalformedError::NotWellFormed(msg)) => {
                assert!(msg.starts_with("2:") || msg.starts_with("line 2"), "{}", msg)
            }
            other => panic!("expected not well-formed, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_well_formed_honors_declared_encoding() {
        let mut xml = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><update>".to_vec();
        xml.push(0xE9);
        xml.extend_from_slice(b"</update>");
        assert!(parse_well_formed(Input::Bytes(&xml)).is_ok());

        let xml = "<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><update>\u{e9}</update>";
        assert!(parse_well_formed(Input::Text(xml)).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_characters() {
        let xml = MINIMAL_VALID.replace("<name>App</name>", "<name>A\u{1}pp</name>");
        let mut validator = SchemaDefinition::embedded().unwrap().compile().unwrap();
        assert!(validator.validate(&xml).unwrap_err().is_malformed());
    }

    #[test]
    fn test_validator_is_reusable() {
        let mut validator = SchemaDefinition::embedded().unwrap().compile().unwrap();
        assert!(validator.validate(MINIMAL_VALID).is_ok());
        assert!(validator.validate("<update/>").is_err());
        assert!(validator.validate(MINIMAL_VALID).is_ok());
    }
}
