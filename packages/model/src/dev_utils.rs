//! # Markup Helpers
//!
//! Compact text form of a root and its selection, for tests and debugging:
//!
//! ```text
//! <paragraph>f[o]o</paragraph><paragraph><$text bold="true">b[]ar</$text></paragraph>
//! ```
//!
//! - Elements print as tags with their attributes
//! - Text with attributes is wrapped in a `$text` tag
//! - `[` and `]` mark selection range starts and ends
//!
//! Attribute values are JSON when they parse as JSON, plain strings
//! otherwise. No escaping is done.

use serde_json::Value;
use std::fmt::Write;

use crate::document::Document;
use crate::errors::{ModelError, ModelResult};
use crate::model::Model;
use crate::node::{Attributes, Element, Node, Text};
use crate::position::Position;
use crate::range::Range;
use crate::selection::Selection;

const TEXT_TAG: &str = "$text";

/// Markup of the document's main root and its selection
pub fn get_data(document: &Document) -> ModelResult<String> {
    let selection = document.selection().get();
    let model = document.model();
    stringify(&model, model.main_root_name(), Some(&selection))
}

/// Replace the main root's content and the selection in one change. Markup
/// without markers resets the selection to its default place.
pub fn set_data(document: &Document, markup: &str) -> ModelResult<()> {
    let root = document.model().main_root_name().to_string();
    let (nodes, selection) = parse(markup, &root)?;

    document.change(|writer| {
        let existing = Range::in_element(&writer.model(), &root, &[])?;
        writer.remove(&existing)?;
        writer.insert(&Position::at_start(root.as_str()), nodes)?;
        writer.set_selection(selection)
    })
}

pub fn stringify(model: &Model, root: &str, selection: Option<&Selection>) -> ModelResult<String> {
    let mut markers: Vec<(&Position, char)> = Vec::new();
    for range in selection.map(Selection::ranges).unwrap_or_default() {
        markers.push((&range.start, '['));
        markers.push((&range.end, ']'));
    }

    let mut out = String::new();
    let mut path = Vec::new();
    write_children(model.root(root)?, root, &mut path, &markers, &mut out);
    Ok(out)
}

fn write_markers(root: &str, path: &[usize], markers: &[(&Position, char)], out: &mut String) {
    for (position, marker) in markers {
        if position.root == root && position.path == path {
            out.push(*marker);
        }
    }
}

fn write_attributes(attributes: &Attributes, out: &mut String) {
    for (key, value) in attributes {
        let value = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        let _ = write!(out, " {}=\"{}\"", key, value);
    }
}

fn write_children(
    element: &Element,
    root: &str,
    path: &mut Vec<usize>,
    markers: &[(&Position, char)],
    out: &mut String,
) {
    let mut offset = 0;
    let depth = path.len();
    path.push(offset);

    for child in element.children() {
        path[depth] = offset;
        write_markers(root, path, markers, out);
        match child {
            Node::Element(child) => {
                let _ = write!(out, "<{}", child.name);
                write_attributes(&child.attributes, out);
                out.push('>');
                write_children(child, root, path, markers, out);
                let _ = write!(out, "</{}>", child.name);
                offset += 1;
            }
            Node::Text(text) => {
                let wrapped = !text.attributes.is_empty();
                if wrapped {
                    let _ = write!(out, "<{}", TEXT_TAG);
                    write_attributes(&text.attributes, out);
                    out.push('>');
                }
                for (index, c) in text.data.chars().enumerate() {
                    if index > 0 {
                        path[depth] = offset;
                        write_markers(root, path, markers, out);
                    }
                    out.push(c);
                    offset += 1;
                }
                if wrapped {
                    let _ = write!(out, "</{}>", TEXT_TAG);
                }
            }
        }
    }

    path[depth] = offset;
    write_markers(root, path, markers, out);
    path.pop();
}

/// Parse markup into nodes for `root` plus the selection it marks
pub fn parse(markup: &str, root: &str) -> ModelResult<(Vec<Node>, Selection)> {
    MarkupParser::new(markup, root).parse()
}

struct MarkupParser {
    chars: Vec<char>,
    pos: usize,
    root: String,
    /// Open elements; the first one collects the result
    stack: Vec<Element>,
    path: Vec<usize>,
    text: String,
    text_attributes: Attributes,
    starts: Vec<Position>,
    ends: Vec<Position>,
}

impl MarkupParser {
    fn new(markup: &str, root: &str) -> Self {
        Self {
            chars: markup.chars().collect(),
            pos: 0,
            root: root.to_string(),
            stack: vec![Element::new(crate::model::ROOT_ELEMENT)],
            path: Vec::new(),
            text: String::new(),
            text_attributes: Attributes::new(),
            starts: Vec::new(),
            ends: Vec::new(),
        }
    }

    fn parse(mut self) -> ModelResult<(Vec<Node>, Selection)> {
        while let Some(c) = self.peek() {
            match c {
                '[' | ']' => {
                    self.pos += 1;
                    self.flush_text();
                    let position = self.current_position()?;
                    if c == '[' {
                        self.starts.push(position);
                    } else {
                        self.ends.push(position);
                    }
                }
                '<' => {
                    self.flush_text();
                    self.parse_tag()?;
                }
                _ => {
                    self.pos += 1;
                    self.text.push(c);
                }
            }
        }
        self.flush_text();

        if self.stack.len() != 1 {
            return Err(ModelError::markup(self.pos, "unclosed element"));
        }
        if self.starts.len() != self.ends.len() {
            return Err(ModelError::markup(self.pos, "unbalanced selection markers"));
        }

        let ranges = self
            .starts
            .into_iter()
            .zip(self.ends)
            .map(|(start, end)| Range::try_new(start, end))
            .collect::<ModelResult<Vec<_>>>()?;
        let nodes = self.stack.pop().map(|root| root.children().to_vec()).unwrap_or_default();
        Ok((nodes, Selection::from_ranges(ranges, false)))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn expect(&mut self, expected: char) -> ModelResult<()> {
        match self.peek() {
            Some(c) if c == expected => {
                self.pos += 1;
                Ok(())
            }
            found => Err(ModelError::markup(
                self.pos,
                format!("expected '{}', found {:?}", expected, found),
            )),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn read_name(&mut self) -> ModelResult<String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || matches!(c, '$' | '_' | '-' | ':'))
        {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(ModelError::markup(self.pos, "expected a name"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn current(&mut self) -> &mut Element {
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }

    fn current_position(&self) -> ModelResult<Position> {
        let element = self
            .stack
            .last()
            .ok_or_else(|| ModelError::markup(self.pos, "marker outside of any element"))?;
        Ok(Position::in_parent(self.root.as_str(), &self.path, element.max_offset()))
    }

    fn flush_text(&mut self) {
        if self.text.is_empty() {
            return;
        }
        let mut text = Text::new(std::mem::take(&mut self.text));
        text.attributes = self.text_attributes.clone();
        let element = self.current();
        let offset = element.max_offset();
        element.insert_nodes(offset, vec![text.into()]);
    }

    fn parse_tag(&mut self) -> ModelResult<()> {
        self.expect('<')?;
        let closing = self.peek() == Some('/');
        if closing {
            self.pos += 1;
        }
        let name = self.read_name()?;

        if closing {
            self.skip_whitespace();
            self.expect('>')?;
            return self.close(&name);
        }

        let mut attributes = Attributes::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('>') => {
                    self.pos += 1;
                    return self.open(name, attributes, false);
                }
                Some('/') => {
                    self.pos += 1;
                    self.expect('>')?;
                    return self.open(name, attributes, true);
                }
                Some(_) => {
                    let (key, value) = self.parse_attribute()?;
                    attributes.insert(key, value);
                }
                None => return Err(ModelError::markup(self.pos, "unterminated tag")),
            }
        }
    }

    fn parse_attribute(&mut self) -> ModelResult<(String, Value)> {
        let key = self.read_name()?;
        self.expect('=')?;
        self.expect('"')?;
        let start = self.pos;
        while self.peek().is_some_and(|c| c != '"') {
            self.pos += 1;
        }
        let raw: String = self.chars[start..self.pos].iter().collect();
        self.expect('"')?;

        let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
        Ok((key, value))
    }

    fn open(
        &mut self,
        name: String,
        attributes: Attributes,
        self_closing: bool,
    ) -> ModelResult<()> {
        if name == TEXT_TAG {
            self.text_attributes = attributes;
            return Ok(());
        }

        let mut element = Element::new(name);
        element.attributes = attributes;
        if self_closing {
            let parent = self.current();
            let offset = parent.max_offset();
            parent.insert_nodes(offset, vec![element.into()]);
        } else {
            let offset = self.current().max_offset();
            self.path.push(offset);
            self.stack.push(element);
        }
        Ok(())
    }

    fn close(&mut self, name: &str) -> ModelResult<()> {
        if name == TEXT_TAG {
            self.text_attributes.clear();
            return Ok(());
        }
        if self.stack.len() < 2 {
            return Err(ModelError::markup(self.pos, format!("unexpected </{}>", name)));
        }

        let element = self
            .stack
            .pop()
            .ok_or_else(|| ModelError::markup(self.pos, "no open element"))?;
        if element.name != name {
            return Err(ModelError::markup(
                self.pos,
                format!("expected </{}>, found </{}>", element.name, name),
            ));
        }
        self.path.pop();
        let parent = self.current();
        let offset = parent.max_offset();
        parent.insert_nodes(offset, vec![element.into()]);
        Ok(())
    }
}
