//! Document parsers: file on disk → ordered text segments.
//!
//! One [`DocumentParser`] adapter per format family. Segments are pages for
//! PDF, paragraphs for docx/pptx, sheets for xlsx and the whole file for
//! plain text; [`parse_document`] joins them with newlines.
//!
//! Parsers never panic on malformed input; every problem surfaces as an
//! [`ExtractError`] and the ingest pipeline records it and moves on.

use std::io::Read;
use std::path::Path;

use crate::error::IndexError;

const XLSX_MAX_SHEETS: usize = 100;
/// Cells scanned across the whole workbook before extraction stops early.
const XLSX_MAX_CELLS: usize = 50_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug)]
pub enum ExtractError {
    UnsupportedExtension(String),
    Io(String),
    Pdf(String),
    Ooxml(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedExtension(ext) => {
                write!(f, "unsupported extension: {}", ext)
            }
            ExtractError::Io(e) => write!(f, "read failed: {}", e),
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
            ExtractError::Ooxml(e) => write!(f, "OOXML extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

impl From<ExtractError> for IndexError {
    fn from(e: ExtractError) -> Self {
        IndexError::Parse(e.to_string())
    }
}

pub trait DocumentParser: Send + Sync {
    fn name(&self) -> &'static str;

    /// Extract ordered text segments from raw file bytes.
    fn parse_bytes(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractError>;

    fn parse(&self, path: &Path) -> Result<Vec<String>, ExtractError> {
        let bytes = std::fs::read(path).map_err(|e| ExtractError::Io(e.to_string()))?;
        self.parse_bytes(&bytes)
    }
}

pub struct PlainTextParser;
pub struct PdfParser;
pub struct DocxParser;
pub struct PptxParser;
pub struct XlsxParser;

/// Lowercased extension of `path`, without the dot.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn is_supported(path: &Path) -> bool {
    parser_for(path).is_some()
}

pub fn parser_for(path: &Path) -> Option<&'static dyn DocumentParser> {
    match extension_of(path)?.as_str() {
        "txt" | "md" | "markdown" => Some(&PlainTextParser),
        "pdf" => Some(&PdfParser),
        "docx" => Some(&DocxParser),
        "pptx" => Some(&PptxParser),
        "xlsx" => Some(&XlsxParser),
        _ => None,
    }
}

/// Parse `path` with the adapter for its extension and join the segments.
pub fn parse_document(path: &Path) -> Result<String, ExtractError> {
    let parser = parser_for(path).ok_or_else(|| {
        ExtractError::UnsupportedExtension(extension_of(path).unwrap_or_default())
    })?;
    let segments = parser.parse(path)?;
    tracing::debug!(parser = parser.name(), path = %path.display(), segments = segments.len(), "parsed");
    Ok(segments
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n"))
}

impl DocumentParser for PlainTextParser {
    fn name(&self) -> &'static str {
        "text"
    }

    fn parse_bytes(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
        let text: String = String::from_utf8_lossy(bytes)
            .chars()
            .filter(|c| *c != char::REPLACEMENT_CHARACTER)
            .collect();
        Ok(vec![text])
    }
}

impl DocumentParser for PdfParser {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn parse_bytes(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
        if contains(bytes, b"/Encrypt") {
            return Err(ExtractError::Pdf("encrypted PDF".to_string()));
        }
        let text =
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;

        // Raw PDF bytes must never reach the ledger.
        if text.trim_start().starts_with("%PDF-") {
            return Err(ExtractError::Pdf("raw PDF bytes detected in extracted text".to_string()));
        }

        Ok(text
            .split('\u{c}')
            .map(|page| page.trim().to_string())
            .filter(|page| !page.is_empty())
            .collect())
    }
}

impl DocumentParser for DocxParser {
    fn name(&self) -> &'static str {
        "docx"
    }

    fn parse_bytes(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
        let mut archive = open_zip(bytes)?;
        let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
        extract_paragraphs(&xml)
    }
}

impl DocumentParser for PptxParser {
    fn name(&self) -> &'static str {
        "pptx"
    }

    fn parse_bytes(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
        let mut archive = open_zip(bytes)?;
        let slide_names = numbered_entries(&archive, "ppt/slides/slide");
        let mut out = Vec::new();
        for name in slide_names {
            let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
            out.extend(extract_paragraphs(&xml)?);
        }
        Ok(out)
    }
}

impl DocumentParser for XlsxParser {
    fn name(&self) -> &'static str {
        "xlsx"
    }

    fn parse_bytes(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
        let mut archive = open_zip(bytes)?;
        let shared_strings = read_shared_strings(&mut archive)?;
        let sheet_names = numbered_entries(&archive, "xl/worksheets/sheet");

        let mut budget = XLSX_MAX_CELLS;
        let mut out = Vec::new();
        for name in sheet_names.into_iter().take(XLSX_MAX_SHEETS) {
            if budget == 0 {
                tracing::debug!(cap = XLSX_MAX_CELLS, "xlsx cell cap reached, remaining sheets skipped");
                break;
            }
            let sheet_xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
            out.push(extract_sheet_cells(&sheet_xml, &shared_strings, &mut budget)?);
        }
        Ok(out)
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn open_zip(bytes: &[u8]) -> Result<zip::ZipArchive<std::io::Cursor<&[u8]>>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

/// Entries named `{prefix}{n}.xml`, sorted by `n`.
fn numbered_entries(archive: &zip::ZipArchive<std::io::Cursor<&[u8]>>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Text of every `<p>` element (WordprocessingML `w:p` or DrawingML `a:p`),
/// concatenating its `<t>` runs. Table cells hold paragraphs too.
fn extract_paragraphs(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_t = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_t = true;
                }
            }
            Ok(Event::Text(te)) if in_t => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => {
                    let para = current.trim();
                    if !para.is_empty() {
                        out.push(para.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    let tail = current.trim();
    if !tail.is_empty() {
        out.push(tail.to_string());
    }
    Ok(out)
}

fn read_shared_strings(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    // Workbooks with only numeric cells have no shared string table.
    if !archive.file_names().any(|n| n == "xl/sharedStrings.xml") {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current = String::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => strings.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn extract_sheet_cells(
    xml: &[u8],
    shared_strings: &[String],
    budget: &mut usize,
) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut cells: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_value = false;
    let mut cell_type: Vec<u8> = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    if *budget == 0 {
                        break;
                    }
                    *budget -= 1;
                    cell_type = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.as_ref() == b"t")
                        .map(|a| a.value.into_owned())
                        .unwrap_or_default();
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"c" => {
                if *budget == 0 {
                    break;
                }
                *budget -= 1;
            }
            Ok(Event::Text(te)) if in_value => {
                let raw = te.unescape().unwrap_or_default();
                let s = raw.trim();
                if !s.is_empty() {
                    if cell_type == b"s" {
                        if let Some(v) = s.parse::<usize>().ok().and_then(|i| shared_strings.get(i)) {
                            cells.push(v.trim().to_string());
                        }
                    } else {
                        cells.push(s.to_string());
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => cell_type.clear(),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    cells.retain(|c| !c.is_empty());
    Ok(cells.join("\n"))
}
