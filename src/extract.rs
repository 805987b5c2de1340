//! Plain-text extraction for downloaded documents.
//!
//! Dispatch is a table from content type to backend function, so supporting
//! a new format is one [`Extractor::register`] call. Backends may fail; the
//! failure is folded into [`Extraction::Unsupported`] here and never reaches
//! the caller as an error.

use std::collections::HashMap;
use std::io::Read;

use tracing::debug;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Error raised by an individual extraction backend.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
}

/// Result of running the extractor over one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Text(String),
    /// No usable text: the type has no backend, or the backend failed.
    Unsupported { reason: String },
}

impl Extraction {
    /// Extracted text, if any non-blank text was recovered.
    pub fn text(&self) -> Option<&str> {
        match self {
            Extraction::Text(t) if !t.trim().is_empty() => Some(t.as_str()),
            _ => None,
        }
    }
}

pub type Backend = Box<dyn Fn(&[u8]) -> Result<String, ExtractError> + Send + Sync>;

/// Content-type keyed strategy table.
pub struct Extractor {
    backends: HashMap<String, Backend>,
}

impl Default for Extractor {
    fn default() -> Self {
        let mut ex = Self::empty();
        ex.register(MIME_PDF, extract_pdf);
        ex.register(MIME_DOCX, extract_docx);
        ex.register("text/plain", extract_utf8);
        ex.register("text/markdown", extract_utf8);
        ex.register("text/csv", extract_utf8);
        // Native Google Docs arrive as a plain-text export.
        ex.register(crate::connector_drive::MIME_GOOGLE_DOC, extract_utf8);
        ex
    }
}

impl Extractor {
    /// An extractor with no registered formats.
    pub fn empty() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    /// Register (or replace) the backend for `content_type`.
    pub fn register<F>(&mut self, content_type: &str, backend: F)
    where
        F: Fn(&[u8]) -> Result<String, ExtractError> + Send + Sync + 'static,
    {
        self.backends
            .insert(normalize_content_type(content_type), Box::new(backend));
    }

    pub fn supports(&self, content_type: &str) -> bool {
        self.backends
            .contains_key(&normalize_content_type(content_type))
    }

    pub fn extract(&self, bytes: &[u8], content_type: &str) -> Extraction {
        let key = normalize_content_type(content_type);
        let Some(backend) = self.backends.get(&key) else {
            return Extraction::Unsupported {
                reason: format!("unsupported content-type: {}", content_type),
            };
        };
        match backend(bytes) {
            Ok(text) => Extraction::Text(text),
            Err(e) => {
                debug!(content_type = %key, error = %e, "extraction backend failed");
                Extraction::Unsupported {
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// Lowercase and drop parameters such as `; charset=utf-8`.
fn normalize_content_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    // pdf-extract can panic on malformed xref tables.
    std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
        .map_err(|_| ExtractError::Pdf("parser panicked".to_string()))?
        .map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_utf8(bytes: &[u8]) -> Result<String, ExtractError> {
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    docx_runs_to_text(&doc_xml)
}

/// Concatenate `w:t` runs, breaking lines at paragraph ends and `w:tab`/`w:br`.
fn docx_runs_to_text(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" if !out.is_empty() && !out.ends_with('\n') => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Docx(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}
