//! ARXML Document Parsing
//!
//! Turns raw ARXML text into an owned element tree, parses several
//! documents in parallel and merges them into one logical tree.

use crate::error::{ImportError, PipelineResult};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use rayon::prelude::*;
use tracing::{debug, info};

/// Raw input document as handed to the importer
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub file_name: String,
    pub content: String,
}

impl SourceDocument {
    pub fn new(file_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            content: content.into(),
        }
    }
}

/// One element of a parsed document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlElement {
    /// Tag name without namespace prefix
    pub tag: String,
    /// Attributes in document order (namespace declarations excluded)
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    /// Trimmed text content, if any
    pub text: Option<String>,
}

impl XmlElement {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn child(&self, tag: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.tag == tag)
    }

    /// Text of the first child with the given tag
    pub fn child_text(&self, tag: &str) -> Option<&str> {
        self.child(tag).and_then(|c| c.text.as_deref())
    }

    /// A leaf has no child elements; it may carry text and attributes
    pub fn is_scalar(&self) -> bool {
        self.children.is_empty()
    }

    #[cfg(test)]
    pub fn with_attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.push((name.to_string(), value.to_string()));
        self
    }

    #[cfg(test)]
    pub fn with_text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    #[cfg(test)]
    pub fn with_child(mut self, child: XmlElement) -> Self {
        self.children.push(child);
        self
    }
}

// ============================================================================
// Parsing
// ============================================================================

fn local_tag(name: &[u8]) -> String {
    let name = String::from_utf8_lossy(name);
    match name.rfind(':') {
        Some(pos) => name[pos + 1..].to_string(),
        None => name.to_string(),
    }
}

fn open_element(file_name: &str, start: &BytesStart) -> PipelineResult<XmlElement> {
    let mut element = XmlElement::new(local_tag(start.name().as_ref()));

    for attr in start.attributes() {
        let attr = attr.map_err(|e| ImportError::parse(file_name, e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        if key == "xmlns" || key.starts_with("xmlns:") {
            continue;
        }
        let value = attr
            .unescape_value()
            .map_err(|e| ImportError::parse(file_name, e.to_string()))?;
        element.attributes.push((local_tag(key.as_bytes()), value.to_string()));
    }

    Ok(element)
}

fn append_text(element: &mut XmlElement, text: &str) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }
    match element.text.as_mut() {
        Some(existing) => existing.push_str(trimmed),
        None => element.text = Some(trimmed.to_string()),
    }
}

/// Attach a closed element to its parent, or make it the document root
fn close_element(
    file_name: &str,
    stack: &mut Vec<XmlElement>,
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> PipelineResult<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
    } else if root.is_some() {
        return Err(ImportError::parse(file_name, "multiple root elements"));
    } else {
        *root = Some(element);
    }
    Ok(())
}

/// Parse a single ARXML document into an element tree
pub fn parse_document(file_name: &str, content: &str) -> PipelineResult<XmlElement> {
    let mut reader = Reader::from_str(content);
    reader.trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let position = reader.buffer_position();
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                stack.push(open_element(file_name, e)?);
            }
            Ok(Event::Empty(ref e)) => {
                let element = open_element(file_name, e)?;
                close_element(file_name, &mut stack, &mut root, element)?;
            }
            Ok(Event::End(_)) => {
                let element = stack.pop().ok_or_else(|| {
                    ImportError::parse(file_name, format!("unexpected end tag at byte {}", position))
                })?;
                close_element(file_name, &mut stack, &mut root, element)?;
            }
            Ok(Event::Text(ref e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| ImportError::parse(file_name, err.to_string()))?;
                if let Some(current) = stack.last_mut() {
                    append_text(current, &text);
                }
            }
            Ok(Event::CData(e)) => {
                let raw = e.into_inner();
                if let Some(current) = stack.last_mut() {
                    append_text(current, &String::from_utf8_lossy(&raw));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ImportError::parse(
                    file_name,
                    format!("{} (near byte {})", e, position),
                ));
            }
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(ImportError::parse(
            file_name,
            format!("unclosed element <{}> at end of document", open.tag),
        ));
    }

    let root = root.ok_or_else(|| ImportError::parse(file_name, "document has no root element"))?;
    debug!("Parsed {} (root <{}>, {} children)", file_name, root.tag, root.children.len());
    Ok(root)
}

/// Parse all documents in parallel, keeping input order
pub fn parse_documents(documents: &[SourceDocument]) -> PipelineResult<Vec<XmlElement>> {
    let parsed: PipelineResult<Vec<XmlElement>> = documents
        .par_iter()
        .map(|doc| parse_document(&doc.file_name, &doc.content))
        .collect();

    let parsed = parsed?;
    info!("📄 Parsed {} ARXML documents", parsed.len());
    Ok(parsed)
}

/// Merge parsed roots into one logical tree.
///
/// The first root's tag and attributes are kept; children of every root are
/// concatenated in input order. Packages split across files end up as
/// siblings with equal short names, which yields identical semantic paths.
pub fn merge_documents(documents: Vec<XmlElement>) -> PipelineResult<XmlElement> {
    let mut roots = documents.into_iter();
    let mut merged = roots.next().ok_or(ImportError::NoDocuments)?;

    for root in roots {
        if root.tag != merged.tag {
            debug!("Merging <{}> root into <{}>", root.tag, merged.tag);
        }
        merged.children.extend(root.children);
        if merged.text.is_none() {
            merged.text = root.text;
        }
    }

    Ok(merged)
}
