//! DOCX run extraction and reassembly.
//!
//! A `.docx` is a ZIP of XML parts. [`extract`] reads every entry, scans the
//! text-bearing parts with `quick-xml`, and splits each part into segments:
//! verbatim byte ranges and text slots addressed by [`RunId`]. Everything
//! outside a text node (styles, tables, images, relationships) stays in the
//! verbatim ranges and is written back byte-for-byte by
//! [`DocxPackage::reassemble`].
//!
//! Text elements are matched by namespace, so a producer that binds the
//! WordprocessingML namespace to a prefix other than `w` is still read.
//!
//! | Part | Text element |
//! |------|--------------|
//! | `word/document.xml` | `w:t` |
//! | `word/header*.xml`, `word/footer*.xml` | `w:t` |
//! | `word/footnotes.xml`, `word/endnotes.xml` | `w:t` |
//! | `word/charts/chart*.xml` | `a:t` |
//! | `word/diagrams/data*.xml` | `a:t` |
//!
//! Parts are visited in the order of that table (each group by numeric
//! suffix), so run ids are stable for the same input bytes. Whitespace-only
//! text nodes are not runs; they stay verbatim.

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::ops::Range;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

use translatex_core::error::{Result, TranslateError};
use translatex_core::models::{Run, RunId, StyleContext};

pub const DOCUMENT_PART: &str = "word/document.xml";

/// Maximum decompressed bytes read from a single XML part (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PartKind {
    Document,
    Header,
    Footer,
    Footnotes,
    Endnotes,
    Chart,
    Diagram,
}

impl PartKind {
    fn classify(name: &str) -> Option<PartKind> {
        let in_word_root = |prefix: &str| {
            name.starts_with(prefix)
                && name.ends_with(".xml")
                && !name["word/".len()..].contains('/')
        };
        if name == DOCUMENT_PART {
            Some(PartKind::Document)
        } else if in_word_root("word/header") {
            Some(PartKind::Header)
        } else if in_word_root("word/footer") {
            Some(PartKind::Footer)
        } else if name == "word/footnotes.xml" {
            Some(PartKind::Footnotes)
        } else if name == "word/endnotes.xml" {
            Some(PartKind::Endnotes)
        } else if name.starts_with("word/charts/chart") && name.ends_with(".xml") {
            Some(PartKind::Chart)
        } else if name.starts_with("word/diagrams/data") && name.ends_with(".xml") {
            Some(PartKind::Diagram)
        } else {
            None
        }
    }

    /// Namespaces whose `t` element carries text in this part, and the
    /// prefix assumed when a part never declares one.
    fn text_namespace(self) -> (&'static [&'static [u8]], &'static [u8]) {
        match self {
            PartKind::Chart | PartKind::Diagram => (DRAWINGML_NAMESPACES, &b"a"[..]),
            _ => (WORDML_NAMESPACES, &b"w"[..]),
        }
    }
}

const WORDML_NAMESPACES: &[&[u8]] = &[
    b"http://schemas.openxmlformats.org/wordprocessingml/2006/main",
    b"http://purl.oclc.org/ooxml/wordprocessingml/main",
];

const DRAWINGML_NAMESPACES: &[&[u8]] = &[
    b"http://schemas.openxmlformats.org/drawingml/2006/main",
    b"http://purl.oclc.org/ooxml/drawingml/main",
];

/// In-scope prefix bindings while scanning a part.
#[derive(Default)]
struct Namespaces {
    bindings: HashMap<Vec<u8>, Vec<u8>>,
    /// Per open element, the bindings it shadowed.
    scopes: Vec<Vec<(Vec<u8>, Option<Vec<u8>>)>>,
}

impl Namespaces {
    fn push(&mut self, element: &BytesStart<'_>) {
        let mut shadowed = Vec::new();
        for attr in element.attributes().flatten() {
            let key = attr.key.as_ref();
            let prefix = if key == b"xmlns" {
                Vec::new()
            } else if let Some(prefix) = key.strip_prefix(b"xmlns:") {
                prefix.to_vec()
            } else {
                continue;
            };
            let previous = self.bindings.insert(prefix.clone(), attr.value.into_owned());
            shadowed.push((prefix, previous));
        }
        self.scopes.push(shadowed);
    }

    fn pop(&mut self) {
        let Some(shadowed) = self.scopes.pop() else {
            return;
        };
        for (prefix, previous) in shadowed.into_iter().rev() {
            match previous {
                Some(uri) => self.bindings.insert(prefix, uri),
                None => self.bindings.remove(&prefix),
            };
        }
    }

    /// True when `name` is the text element of `kind`, whatever prefix the
    /// producer bound to its namespace.
    fn is_text_element(&self, name: QName<'_>, kind: PartKind) -> bool {
        if name.local_name().as_ref() != b"t" {
            return false;
        }
        let prefix = name.prefix().map(|p| p.as_ref().to_vec()).unwrap_or_default();
        let (namespaces, conventional) = kind.text_namespace();
        match self.bindings.get(&prefix) {
            Some(uri) => namespaces.contains(&uri.as_slice()),
            None => prefix == conventional,
        }
    }
}

fn numeric_suffix(name: &str) -> u32 {
    let stem = name.rsplit('/').next().unwrap_or(name);
    stem.chars()
        .filter(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
enum Segment {
    Verbatim(Range<usize>),
    Text(RunId),
}

#[derive(Debug, Clone)]
struct TextPart {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone)]
struct Entry {
    name: String,
    data: Vec<u8>,
    compression: CompressionMethod,
    is_dir: bool,
    text_part: Option<usize>,
}

/// The parsed package: every ZIP entry plus segment maps for text parts.
#[derive(Debug, Clone)]
pub struct DocxPackage {
    entries: Vec<Entry>,
    parts: Vec<TextPart>,
}

/// Output of [`extract`]: the package skeleton and the run arena.
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub package: DocxPackage,
    pub runs: Vec<Run>,
}

fn extraction(msg: impl std::fmt::Display) -> TranslateError {
    TranslateError::Extraction(msg.to_string())
}

fn zip_write_err(e: zip::result::ZipError) -> TranslateError {
    TranslateError::Io(std::io::Error::other(e))
}

/// Extract all translatable runs from DOCX bytes.
///
/// Fails with [`TranslateError::Extraction`] if the bytes are not a ZIP,
/// `word/document.xml` is missing or has no `w:body`, or any text part is
/// malformed XML.
pub fn extract(bytes: &[u8]) -> Result<ExtractedDocument> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(extraction)?;

    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index(i).map_err(extraction)?;
        let name = entry.name().to_string();
        let compression = entry.compression();
        let is_dir = entry.is_dir();
        let bounded = PartKind::classify(&name).is_some();

        let mut data = Vec::new();
        if bounded {
            entry
                .take(MAX_XML_ENTRY_BYTES)
                .read_to_end(&mut data)
                .map_err(extraction)?;
            if data.len() as u64 >= MAX_XML_ENTRY_BYTES {
                return Err(extraction(format!(
                    "ZIP entry {} exceeds size limit ({} bytes)",
                    name, MAX_XML_ENTRY_BYTES
                )));
            }
        } else {
            let mut entry = entry;
            entry.read_to_end(&mut data).map_err(extraction)?;
        }

        entries.push(Entry {
            name,
            data,
            compression,
            is_dir,
            text_part: None,
        });
    }

    let mut order: Vec<(PartKind, u32, usize)> = entries
        .iter()
        .enumerate()
        .filter(|(_, e)| !e.is_dir)
        .filter_map(|(i, e)| PartKind::classify(&e.name).map(|k| (k, numeric_suffix(&e.name), i)))
        .collect();
    if !order.iter().any(|(k, _, _)| *k == PartKind::Document) {
        return Err(extraction(format!("{DOCUMENT_PART} not found")));
    }
    order.sort_by(|a, b| (a.0, a.1, &entries[a.2].name).cmp(&(b.0, b.1, &entries[b.2].name)));

    let mut runs = Vec::new();
    let mut parts = Vec::new();
    let mut next_id = 0u32;
    for (kind, _, idx) in order {
        let entry = &entries[idx];
        let part = scan_part(&entry.name, kind, &entry.data, &mut next_id, &mut runs)?;
        entries[idx].text_part = Some(parts.len());
        parts.push(part);
    }

    Ok(ExtractedDocument {
        package: DocxPackage { entries, parts },
        runs,
    })
}

fn scan_part(
    name: &str,
    kind: PartKind,
    xml: &[u8],
    next_id: &mut u32,
    runs: &mut Vec<Run>,
) -> Result<TextPart> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut namespaces = Namespaces::default();

    let mut buf = Vec::new();
    let mut segments = Vec::new();
    let mut cursor = 0usize;
    let mut in_text = false;
    let mut saw_body = false;
    let mut paragraph: Option<u32> = None;
    let mut paragraphs_seen = 0u32;
    let mut run_properties: Option<String> = None;
    let mut rpr_start: Option<usize> = None;

    loop {
        let before = reader.buffer_position() as usize;
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| extraction(format!("{name}: malformed XML: {e}")))?;
        let after = reader.buffer_position() as usize;

        match event {
            Event::Start(e) => {
                namespaces.push(&e);
                match e.local_name().as_ref() {
                    b"body" => saw_body = true,
                    b"p" => {
                        paragraph = Some(paragraphs_seen);
                        paragraphs_seen += 1;
                    }
                    b"r" => run_properties = None,
                    b"rPr" => rpr_start = Some(before),
                    _ => {}
                }
                if namespaces.is_text_element(e.name(), kind) {
                    in_text = true;
                }
            }
            Event::Empty(e) => match e.local_name().as_ref() {
                b"body" => saw_body = true,
                b"rPr" => {
                    run_properties = xml
                        .get(before..after)
                        .map(|s| String::from_utf8_lossy(s).into_owned());
                }
                _ => {}
            },
            Event::End(e) => {
                match e.local_name().as_ref() {
                    b"p" => paragraph = None,
                    b"rPr" => {
                        if let Some(start) = rpr_start.take() {
                            run_properties = xml
                                .get(start..after)
                                .map(|s| String::from_utf8_lossy(s).into_owned());
                        }
                    }
                    _ => {}
                }
                if namespaces.is_text_element(e.name(), kind) {
                    in_text = false;
                }
                namespaces.pop();
            }
            Event::Text(te) if in_text => {
                let raw: &[u8] = &te;
                let raw_end = before + raw.len();
                if xml.get(before..raw_end) != Some(raw) {
                    return Err(extraction(format!(
                        "{name}: could not locate text node at byte {before}"
                    )));
                }
                let text = te
                    .unescape()
                    .map_err(|e| extraction(format!("{name}: bad text escape: {e}")))?
                    .into_owned();
                if !text.trim().is_empty() {
                    segments.push(Segment::Verbatim(cursor..before));
                    let id = RunId(*next_id);
                    *next_id += 1;
                    runs.push(Run::new(
                        id,
                        text,
                        StyleContext {
                            part: name.to_string(),
                            paragraph,
                            run_properties: run_properties.clone(),
                        },
                    ));
                    segments.push(Segment::Text(id));
                    cursor = raw_end;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if kind == PartKind::Document && !saw_body {
        return Err(extraction(format!("{name}: missing w:body element")));
    }

    segments.push(Segment::Verbatim(cursor..xml.len()));
    Ok(TextPart { segments })
}

impl DocxPackage {
    /// Run ids the reassembler will write, in document order.
    pub fn run_ids(&self) -> Vec<RunId> {
        self.parts
            .iter()
            .flat_map(|p| p.segments.iter())
            .filter_map(|s| match s {
                Segment::Text(id) => Some(*id),
                Segment::Verbatim(_) => None,
            })
            .collect()
    }

    /// Names of the parts that were scanned for text, in visiting order.
    pub fn text_part_names(&self) -> Vec<&str> {
        let mut named: Vec<(usize, &str)> = self
            .entries
            .iter()
            .filter_map(|e| e.text_part.map(|i| (i, e.name.as_str())))
            .collect();
        named.sort_by_key(|(i, _)| *i);
        named.into_iter().map(|(_, n)| n).collect()
    }

    /// Rebuild the DOCX with each run's output text in place.
    ///
    /// Entry order, names, and compression methods are preserved; only the
    /// content of text nodes changes.
    pub fn reassemble(&self, runs: &[Run]) -> Result<Vec<u8>> {
        let lookup: HashMap<RunId, &Run> = runs.iter().map(|r| (r.id, r)).collect();
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));

        for entry in &self.entries {
            let method = match entry.compression {
                CompressionMethod::Stored => CompressionMethod::Stored,
                _ => CompressionMethod::Deflated,
            };
            let options = SimpleFileOptions::default().compression_method(method);

            if entry.is_dir {
                writer
                    .add_directory(entry.name.as_str(), options)
                    .map_err(zip_write_err)?;
                continue;
            }

            writer
                .start_file(entry.name.as_str(), options)
                .map_err(zip_write_err)?;
            match entry.text_part {
                Some(idx) => {
                    let rendered = render_part(&entry.data, &self.parts[idx], &lookup)?;
                    writer.write_all(&rendered)?;
                }
                None => writer.write_all(&entry.data)?,
            }
        }

        let cursor = writer.finish().map_err(zip_write_err)?;
        Ok(cursor.into_inner())
    }
}

fn render_part(xml: &[u8], part: &TextPart, lookup: &HashMap<RunId, &Run>) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(xml.len());
    for segment in &part.segments {
        match segment {
            Segment::Verbatim(range) => out.extend_from_slice(&xml[range.clone()]),
            Segment::Text(id) => {
                let run = lookup
                    .get(id)
                    .ok_or_else(|| TranslateError::Extraction(format!("run {id} missing from arena")))?;
                out.extend_from_slice(quick_xml::escape::escape(run.output_text()).as_bytes());
            }
        }
    }
    Ok(out)
}
