//! # Tree Nodes
//!
//! The document tree is made of two node kinds:
//!
//! - **Element**: named branch with attributes and ordered children
//! - **Text**: non-empty run of characters with attributes
//!
//! ## Offsets
//!
//! Children of an element are addressed by *offset*, not by index. An
//! element child occupies one offset, a text child occupies one offset per
//! `char`. Offsets therefore stay stable when adjacent text nodes are split
//! or merged, which happens freely: after every mutation the children are
//! normalized so that no text node is empty and no two adjacent text nodes
//! share the same attributes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Ordered, unique attribute set
pub type Attributes = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Node {
    Element(Element),
    Text(Text),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Text {
    pub data: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
}

impl Node {
    pub fn element(name: impl Into<String>) -> Self {
        Node::Element(Element::new(name))
    }

    pub fn text(data: impl Into<String>) -> Self {
        Node::Text(Text::new(data))
    }

    /// Number of offsets this node occupies in its parent
    pub fn offset_size(&self) -> usize {
        match self {
            Node::Element(_) => 1,
            Node::Text(text) => text.len(),
        }
    }

    pub fn attributes(&self) -> &Attributes {
        match self {
            Node::Element(element) => &element.attributes,
            Node::Text(text) => &text.attributes,
        }
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        match self {
            Node::Element(element) => &mut element.attributes,
            Node::Text(text) => &mut text.attributes,
        }
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&Text> {
        match self {
            Node::Text(text) => Some(text),
            Node::Element(_) => None,
        }
    }

    /// Plain text of this node and its descendants
    pub fn text_content(&self) -> String {
        match self {
            Node::Element(element) => element.text_content(),
            Node::Text(text) => text.data.clone(),
        }
    }
}

impl Text {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Length in chars
    pub fn len(&self) -> usize {
        self.data.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Slice of `len` chars starting at char offset `start`
    pub fn slice(&self, start: usize, len: usize) -> &str {
        let from = byte_index(&self.data, start);
        let to = byte_index(&self.data, start + len);
        &self.data[from..to]
    }

    fn split_off(&mut self, offset: usize) -> Text {
        let at = byte_index(&self.data, offset);
        Text {
            data: self.data.split_off(at),
            attributes: self.attributes.clone(),
        }
    }
}

fn byte_index(data: &str, char_offset: usize) -> usize {
    data.char_indices()
        .nth(char_offset)
        .map(|(index, _)| index)
        .unwrap_or(data.len())
}

impl From<Element> for Node {
    fn from(element: Element) -> Self {
        Node::Element(element)
    }
}

impl From<Text> for Node {
    fn from(text: Text) -> Self {
        Node::Text(text)
    }
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Attributes::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.children.extend(children);
        self.normalize();
        self
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Total offset size of all children
    pub fn max_offset(&self) -> usize {
        self.children.iter().map(Node::offset_size).sum()
    }

    pub fn offset_of_index(&self, index: usize) -> usize {
        self.children[..index.min(self.children.len())]
            .iter()
            .map(Node::offset_size)
            .sum()
    }

    /// Index and start offset of the child that covers `offset`
    pub fn node_at_offset(&self, offset: usize) -> Option<(usize, usize)> {
        let mut start = 0;
        for (index, child) in self.children.iter().enumerate() {
            let end = start + child.offset_size();
            if offset < end {
                return Some((index, start));
            }
            start = end;
        }
        None
    }

    /// Text node strictly containing `offset` (not at one of its edges)
    pub fn text_node_at(&self, offset: usize) -> Option<(usize, usize)> {
        self.node_at_offset(offset)
            .filter(|(index, start)| self.children[*index].as_text().is_some() && *start < offset)
    }

    /// Node ending exactly at `offset`, ignoring positions inside text
    pub fn node_before(&self, offset: usize) -> Option<&Node> {
        if offset == 0 || self.text_node_at(offset).is_some() {
            return None;
        }
        self.node_at_offset(offset - 1)
            .map(|(index, _)| &self.children[index])
    }

    /// Node starting exactly at `offset`, ignoring positions inside text
    pub fn node_after(&self, offset: usize) -> Option<&Node> {
        if self.text_node_at(offset).is_some() {
            return None;
        }
        self.node_at_offset(offset)
            .map(|(index, _)| &self.children[index])
    }

    /// Element starting at `offset`, used when resolving paths
    pub fn child_element(&self, offset: usize) -> Option<&Element> {
        let (index, start) = self.node_at_offset(offset)?;
        if start != offset {
            return None;
        }
        self.children[index].as_element()
    }

    pub fn child_element_mut(&mut self, offset: usize) -> Option<&mut Element> {
        let (index, start) = self.node_at_offset(offset)?;
        if start != offset {
            return None;
        }
        self.children[index].as_element_mut()
    }

    pub fn text_content(&self) -> String {
        self.children.iter().map(Node::text_content).collect()
    }

    /// Splits a text child so a node boundary exists at `offset`.
    ///
    /// Returns the index of the first child at or after `offset`.
    pub(crate) fn split_at(&mut self, offset: usize) -> usize {
        match self.node_at_offset(offset) {
            None => self.children.len(),
            Some((index, start)) if start == offset => index,
            Some((index, start)) => {
                let tail = match &mut self.children[index] {
                    Node::Text(text) => text.split_off(offset - start),
                    Node::Element(_) => return index,
                };
                self.children.insert(index + 1, Node::Text(tail));
                index + 1
            }
        }
    }

    pub(crate) fn insert_nodes(&mut self, offset: usize, nodes: Vec<Node>) {
        let index = self.split_at(offset);
        self.children.splice(index..index, nodes);
        self.normalize();
    }

    pub(crate) fn remove_nodes(&mut self, offset: usize, how_many: usize) -> Vec<Node> {
        let start = self.split_at(offset);
        let end = self.split_at(offset + how_many);
        let removed = normalize_nodes(self.children.drain(start..end).collect());
        self.normalize();
        removed
    }

    /// Applies `f` to every child in `[offset, offset + how_many)`
    pub(crate) fn update_range(
        &mut self,
        offset: usize,
        how_many: usize,
        mut f: impl FnMut(&mut Node),
    ) {
        let start = self.split_at(offset);
        let end = self.split_at(offset + how_many);
        for child in &mut self.children[start..end] {
            f(child);
        }
        self.normalize();
    }

    /// Iterates children in `[offset, offset + how_many)` without splitting
    pub(crate) fn for_each_in_range(
        &self,
        offset: usize,
        how_many: usize,
        mut f: impl FnMut(&Node),
    ) {
        let end = offset + how_many;
        let mut start = 0;
        for child in &self.children {
            let child_end = start + child.offset_size();
            if child_end > offset && start < end {
                f(child);
            }
            start = child_end;
        }
    }

    fn normalize(&mut self) {
        let children = std::mem::take(&mut self.children);
        self.children = normalize_nodes(children);
    }
}

/// Drops empty text and merges adjacent text with equal attributes
pub(crate) fn normalize_nodes(nodes: Vec<Node>) -> Vec<Node> {
    let mut result: Vec<Node> = Vec::with_capacity(nodes.len());
    for node in nodes {
        if let Node::Text(text) = &node {
            if text.is_empty() {
                continue;
            }
            if let Some(Node::Text(previous)) = result.last_mut() {
                if previous.attributes == text.attributes {
                    previous.data.push_str(&text.data);
                    continue;
                }
            }
        }
        result.push(node);
    }
    result
}

/// Total offset size of a node list
pub fn offset_size_of(nodes: &[Node]) -> usize {
    nodes.iter().map(Node::offset_size).sum()
}
