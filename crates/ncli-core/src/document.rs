//! Structured document tree exchanged with the protocol collaborator.
//!
//! Requests, replies, notifications, the shadow configuration and recorded
//! snapshots are all `Node` trees. The wire codec is owned by the transport;
//! this module only renders trees for display and files (plain text, XML,
//! JSON) and parses XML snapshot files back.

use crate::error::{NcliError, Result};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// One element of a structured document.
///
/// A node with a `value` and no children is a leaf. A node with neither is an
/// empty flag (for example `<running/>` inside `<source>`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

impl Node {
    /// Creates an empty container (or flag) node.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            children: Vec::new(),
        }
    }

    /// Creates a leaf node holding a value.
    pub fn leaf(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            children: Vec::new(),
        }
    }

    /// Builder-style child append.
    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn push(&mut self, child: Node) {
        self.children.push(child);
    }

    /// Returns the first child with the given name.
    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    /// Iterates over all children with the given name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Removes and returns the first child with the given name.
    pub fn take_child(&mut self, name: &str) -> Option<Node> {
        let pos = self.children.iter().position(|c| c.name == name)?;
        Some(self.children.remove(pos))
    }

    /// Follows a path of child names from this node.
    pub fn find_path(&self, path: &[&str]) -> Option<&Node> {
        let mut cur = self;
        for name in path {
            cur = cur.child(name)?;
        }
        Some(cur)
    }

    /// Leaf text, if any.
    pub fn text(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_empty_flag(&self) -> bool {
        self.children.is_empty() && self.value.is_none()
    }

    /// Renames the node in place and returns it.
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    // ============================================================================
    // Rendering
    // ============================================================================

    /// Renders the tree in the requested display format.
    pub fn render(&self, format: DisplayMode, indent: usize) -> Result<String> {
        match format {
            DisplayMode::Plain => Ok(self.to_text(indent)),
            DisplayMode::Xml => self.to_xml(indent),
            DisplayMode::Json => self.to_json(),
        }
    }

    /// Plain text rendering, `name value` for leaves and braces for containers.
    pub fn to_text(&self, indent: usize) -> String {
        let mut out = String::new();
        self.write_text(&mut out, 0, indent);
        out
    }

    fn write_text(&self, out: &mut String, level: usize, indent: usize) {
        let pad = " ".repeat(level * indent);
        if self.children.is_empty() {
            match &self.value {
                Some(v) if needs_quotes(v) => out.push_str(&format!("{pad}{} '{}'\n", self.name, v)),
                Some(v) => out.push_str(&format!("{pad}{} {}\n", self.name, v)),
                None => out.push_str(&format!("{pad}{}\n", self.name)),
            }
            return;
        }
        out.push_str(&format!("{pad}{} {{\n", self.name));
        for child in &self.children {
            child.write_text(out, level + 1, indent);
        }
        out.push_str(&format!("{pad}}}\n"));
    }

    /// XML rendering. The output is stable for a given tree, so two renders of
    /// equal trees compare byte-for-byte.
    pub fn to_xml(&self, indent: usize) -> Result<String> {
        let mut writer = if indent > 0 {
            Writer::new_with_indent(Vec::new(), b' ', indent)
        } else {
            Writer::new(Vec::new())
        };
        self.write_xml(&mut writer)?;
        let mut text = String::from_utf8(writer.into_inner())
            .map_err(|e| xml_error(e.to_string()))?;
        text.push('\n');
        Ok(text)
    }

    fn write_xml(&self, writer: &mut Writer<Vec<u8>>) -> Result<()> {
        if self.is_empty_flag() {
            return writer
                .write_event(Event::Empty(BytesStart::new(self.name.as_str())))
                .map_err(|e| xml_error(e.to_string()));
        }
        writer
            .write_event(Event::Start(BytesStart::new(self.name.as_str())))
            .map_err(|e| xml_error(e.to_string()))?;
        if let Some(value) = &self.value {
            writer
                .write_event(Event::Text(BytesText::new(value)))
                .map_err(|e| xml_error(e.to_string()))?;
        }
        for child in &self.children {
            child.write_xml(writer)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(self.name.as_str())))
            .map_err(|e| xml_error(e.to_string()))
    }

    /// Parses an XML document into a tree. Attributes and namespaces are
    /// dropped; only local names are kept. Text is kept only on elements
    /// without child elements.
    pub fn from_xml(text: &str) -> Result<Node> {
        let mut reader = Reader::from_str(text);

        let mut stack: Vec<(Node, String)> = Vec::new();
        let mut root: Option<Node> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    stack.push((Node::new(local_name(e.local_name().as_ref())?), String::new()));
                }
                Ok(Event::Empty(e)) => {
                    let node = Node::new(local_name(e.local_name().as_ref())?);
                    attach(&mut stack, &mut root, node)?;
                }
                Ok(Event::Text(t)) => {
                    let raw = std::str::from_utf8(&t).map_err(|e| xml_error(e.to_string()))?;
                    let unescaped =
                        quick_xml::escape::unescape(raw).map_err(|e| xml_error(e.to_string()))?;
                    append_text(&mut stack, &unescaped);
                }
                Ok(Event::CData(c)) => {
                    let raw = std::str::from_utf8(&c).map_err(|e| xml_error(e.to_string()))?;
                    append_text(&mut stack, raw);
                }
                Ok(Event::GeneralRef(r)) => {
                    let name = std::str::from_utf8(&r).map_err(|e| xml_error(e.to_string()))?;
                    let entity = format!("&{name};");
                    let resolved =
                        quick_xml::escape::unescape(&entity).map_err(|e| xml_error(e.to_string()))?;
                    append_text(&mut stack, &resolved);
                }
                Ok(Event::End(_)) => {
                    let (mut node, text) = stack
                        .pop()
                        .ok_or_else(|| xml_error("unbalanced end tag"))?;
                    if node.children.is_empty() && !text.is_empty() {
                        node.value = Some(text);
                    }
                    attach(&mut stack, &mut root, node)?;
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(xml_error(e.to_string())),
            }
        }

        if !stack.is_empty() {
            return Err(xml_error("unterminated element"));
        }
        root.ok_or_else(|| xml_error("empty document"))
    }

    /// JSON rendering: `{"name": body}` where repeated children become arrays.
    pub fn to_json_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(self.name.clone(), self.json_body());
        Value::Object(map)
    }

    fn json_body(&self) -> Value {
        if self.children.is_empty() {
            return match &self.value {
                Some(v) => Value::String(v.clone()),
                None => Value::Null,
            };
        }
        let mut map = Map::new();
        for child in &self.children {
            let body = child.json_body();
            match map.get_mut(&child.name) {
                Some(Value::Array(items)) => items.push(body),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, body]);
                }
                None => {
                    map.insert(child.name.clone(), body);
                }
            }
        }
        Value::Object(map)
    }

    pub fn to_json(&self) -> Result<String> {
        let mut text = serde_json::to_string_pretty(&self.to_json_value())?;
        text.push('\n');
        Ok(text)
    }
}

fn local_name(raw: &[u8]) -> Result<String> {
    std::str::from_utf8(raw)
        .map(str::to_string)
        .map_err(|e| xml_error(e.to_string()))
}

fn append_text(stack: &mut [(Node, String)], text: &str) {
    if let Some((_, buf)) = stack.last_mut() {
        buf.push_str(text);
    }
}

fn attach(stack: &mut [(Node, String)], root: &mut Option<Node>, node: Node) -> Result<()> {
    match stack.last_mut() {
        Some((parent, _)) => {
            parent.children.push(node);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(node);
            Ok(())
        }
        None => Err(xml_error("multiple root elements")),
    }
}

fn xml_error(message: impl Into<String>) -> NcliError {
    NcliError::Serialization {
        format: "XML".to_string(),
        message: message.into(),
    }
}

/// Returns true if a string value must be quoted on a command line.
pub fn needs_quotes(value: &str) -> bool {
    value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '=' | '$' | '@'))
}

/// Output format for echoed replies and file results.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DisplayMode {
    #[default]
    Plain,
    Xml,
    Json,
}

impl DisplayMode {
    /// Picks the file format from a file name extension.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("xml") => Self::Xml,
            Some("json") => Self::Json,
            _ => Self::Plain,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Node {
        Node::new("data").with_child(
            Node::new("interfaces")
                .with_child(Node::new("interface").with_child(Node::leaf("name", "eth0")))
                .with_child(Node::new("interface").with_child(Node::leaf("name", "eth1"))),
        )
    }

    #[test]
    fn test_child_lookup() {
        let node = sample();
        let ifs = node.child("interfaces").unwrap();
        assert_eq!(ifs.children_named("interface").count(), 2);
        assert_eq!(
            node.find_path(&["interfaces", "interface", "name"]).unwrap().text(),
            Some("eth0")
        );
        assert!(node.child("missing").is_none());
    }

    #[test]
    fn test_xml_parse_rendered_tree() {
        let node = sample();
        let xml = node.to_xml(2).unwrap();
        let parsed = Node::from_xml(&xml).unwrap();
        assert_eq!(parsed, node);
    }

    #[test]
    fn test_xml_escapes_text() {
        let node = Node::leaf("descr", "a < b & c");
        let xml = node.to_xml(0).unwrap();
        assert!(xml.contains("a &lt; b &amp; c"));
        assert_eq!(Node::from_xml(&xml).unwrap().text(), Some("a < b & c"));
    }

    #[test]
    fn test_empty_flag_renders_self_closing() {
        let node = Node::new("source").with_child(Node::new("running"));
        let xml = node.to_xml(0).unwrap();
        assert!(xml.contains("<running/>"));
    }

    #[test]
    fn test_json_groups_repeated_children() {
        let json = sample().to_json_value();
        let list = &json["data"]["interfaces"]["interface"];
        assert!(list.is_array());
        assert_eq!(list[1]["name"], "eth1");
    }

    #[test]
    fn test_text_rendering() {
        let text = Node::new("top").with_child(Node::leaf("a", "1")).to_text(2);
        assert_eq!(text, "top {\n  a 1\n}\n");
    }

    #[test]
    fn test_display_mode_from_extension() {
        assert_eq!(DisplayMode::from_path(Path::new("out.XML")), DisplayMode::Xml);
        assert_eq!(DisplayMode::from_path(Path::new("out.json")), DisplayMode::Json);
        assert_eq!(DisplayMode::from_path(Path::new("out.txt")), DisplayMode::Plain);
    }

    #[test]
    fn test_from_xml_rejects_garbage() {
        assert!(Node::from_xml("").is_err());
        assert!(Node::from_xml("<a><b></a>").is_err());
    }
}
