//! XML decoding of complete fixture messages.
//!
//! A complete message is one `TestResult` document. Decoding is synchronous
//! and side-effect free; malformed markup is an error the caller reports to
//! the observer, never a panic or a connection teardown.

use anyhow::{bail, Context, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::path::PathBuf;

/// One parsed element: name, attributes, concatenated text, children in
/// document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    /// First child with the given element name.
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Trimmed text of the first child with the given name, if non-empty.
    /// Matches the original schema's single-element sequences: only the first
    /// occurrence counts.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name)
            .map(|c| c.text.trim())
            .filter(|t| !t.is_empty())
    }
}

/// Decoded form of one complete message. Only the `TestResult` envelope is
/// understood today; unrecognized roots are preserved as raw trees so new
/// message kinds can be added without reshaping this API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedMessage {
    TestResult(TestResult),
    Other(XmlNode),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestResult {
    pub blocks: Vec<BlockTestComplete>,
}

/// One `BlockTestComplete` entry: a completed test block and, optionally,
/// where the fixture wrote its result files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockTestComplete {
    pub path: Option<PathBuf>,
    pub result_path: Option<PathBuf>,
}

pub fn decode(xml: &str) -> Result<DecodedMessage> {
    let root = parse_tree(xml)?;
    if root.name != "TestResult" {
        return Ok(DecodedMessage::Other(root));
    }
    let blocks = root
        .children_named("BlockTestComplete")
        .map(|node| BlockTestComplete {
            path: node.child_text("Path").map(PathBuf::from),
            result_path: node.child_text("ResultPath").map(PathBuf::from),
        })
        .collect();
    Ok(DecodedMessage::TestResult(TestResult { blocks }))
}

fn element_node(start: &BytesStart<'_>) -> Result<XmlNode> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.with_context(|| format!("malformed attribute on <{name}>"))?;
        attributes.push((
            String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
            String::from_utf8_lossy(&attr.value).into_owned(),
        ));
    }
    Ok(XmlNode {
        name,
        attributes,
        ..Default::default()
    })
}

fn parse_tree(xml: &str) -> Result<XmlNode> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;
    loop {
        match reader.read_event().context("malformed XML")? {
            Event::Start(start) => stack.push(element_node(&start)?),
            Event::Empty(start) => {
                let node = element_node(&start)?;
                attach(&mut stack, &mut root, node)?;
            }
            Event::End(_) => {
                // Mismatched names are rejected by the reader before we get
                // here, so the top of the stack is the element being closed.
                let node = stack.pop().context("unexpected closing tag")?;
                attach(&mut stack, &mut root, node)?;
            }
            Event::Text(text) => {
                let text = text.unescape().context("malformed XML text")?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Event::CData(cdata) => {
                if let Some(top) = stack.last_mut() {
                    top.text
                        .push_str(&String::from_utf8_lossy(&cdata.into_inner()));
                }
            }
            Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => {}
            Event::Eof => break,
        }
    }
    if let Some(open) = stack.last() {
        bail!("truncated XML: <{}> never closed", open.name);
    }
    root.context("empty XML document")
}

fn attach(stack: &mut [XmlNode], root: &mut Option<XmlNode>, node: XmlNode) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => {
            if root.is_some() {
                bail!("multiple root elements");
            }
            *root = Some(node);
        }
    }
    Ok(())
}
