use crate::utils::error::{LcrError, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;
use std::collections::BTreeMap;

/// Element tree of a parsed XML document.
///
/// Whitespace-only text is dropped and remaining text is trimmed, so two
/// documents that differ only in indentation produce equal trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlNode {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    fn from_start(start: &BytesStart<'_>) -> Result<Self> {
        let name = std::str::from_utf8(start.name().as_ref())
            .map_err(|e| LcrError::xml(format!("element name is not UTF-8: {}", e)))?
            .to_string();

        let mut attributes = BTreeMap::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| LcrError::xml(format!("bad attribute on <{}>: {}", name, e)))?;
            let key = std::str::from_utf8(attr.key.as_ref())
                .map_err(|e| LcrError::xml(format!("attribute name is not UTF-8: {}", e)))?
                .to_string();
            let value = attr
                .unescape_value()
                .map_err(|e| LcrError::xml(format!("bad value for {}@{}: {}", name, key, e)))?
                .into_owned();
            if attributes.insert(key.clone(), value).is_some() {
                return Err(LcrError::xml(format!("duplicate attribute {} on <{}>", key, name)));
            }
        }

        Ok(Self {
            name,
            attributes,
            text: String::new(),
            children: Vec::new(),
        })
    }

    /// Order-independent fingerprint: attributes are already sorted, children are sorted by
    /// their own fingerprint.
    pub fn canonical_key(&self) -> String {
        let mut children: Vec<String> = self.children.iter().map(XmlNode::canonical_key).collect();
        children.sort();

        let mut key = format!("<{}", self.name);
        for (name, value) in &self.attributes {
            key.push_str(&format!(" {}={:?}", name, value));
        }
        key.push('>');
        if !self.text.is_empty() {
            key.push_str(&format!("{:?}", self.text));
        }
        for child in children {
            key.push_str(&child);
        }
        key.push_str(&format!("</{}>", self.name));
        key
    }

    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }
}

/// Parses `xml` and returns the root element, failing on anything that is not a single
/// well-formed element tree.
pub fn parse_tree(xml: &str) -> Result<XmlNode> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            LcrError::xml(format!("at byte {}: {}", reader.buffer_position(), e))
        })?;

        match event {
            Event::Start(start) => {
                if root.is_some() {
                    return Err(LcrError::xml("content after the root element"));
                }
                stack.push(XmlNode::from_start(&start)?);
            }
            Event::Empty(start) => {
                if root.is_some() {
                    return Err(LcrError::xml("content after the root element"));
                }
                let node = XmlNode::from_start(&start)?;
                close_node(node, &mut stack, &mut root);
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| LcrError::xml("closing tag without an open element"))?;
                close_node(node, &mut stack, &mut root);
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|e| LcrError::xml(format!("bad text content: {}", e)))?;
                push_text(&text, &mut stack)?;
            }
            Event::CData(data) => {
                let text = String::from_utf8_lossy(&data).into_owned();
                push_text(&text, &mut stack)?;
            }
            Event::Eof => break,
            // declaration, comments, processing instructions, doctype
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(LcrError::xml(format!("unexpected end of document inside <{}>", open.name)));
    }
    root.ok_or_else(|| LcrError::xml("document has no root element"))
}

fn close_node(node: XmlNode, stack: &mut Vec<XmlNode>, root: &mut Option<XmlNode>) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => *root = Some(node),
    }
}

fn push_text(text: &str, stack: &mut [XmlNode]) -> Result<()> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(());
    }
    match stack.last_mut() {
        Some(node) => {
            node.text.push_str(trimmed);
            Ok(())
        }
        None => Err(LcrError::xml("text outside the root element")),
    }
}

/// Re-serializes `xml` with two-space indentation. Only whitespace between elements
/// changes.
pub fn pretty_print(xml: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    loop {
        match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(event) => writer
                .write_event(event)
                .map_err(|e| LcrError::xml(format!("re-serialization failed: {}", e)))?,
            Err(e) => {
                return Err(LcrError::xml(format!(
                    "at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
    }

    let mut pretty = String::from_utf8(writer.into_inner())
        .map_err(|e| LcrError::xml(format!("re-serialized document is not UTF-8: {}", e)))?;
    pretty.push('\n');
    Ok(pretty)
}
