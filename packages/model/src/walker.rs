//! # Tree Walker
//!
//! Lazy, read-only traversal of the tree between two boundaries (or from a
//! start position to the edge of its root), forward or backward.
//!
//! Each step yields a [`WalkerValue`]:
//!
//! ```text
//! <paragraph>fo<image/>o</paragraph>
//!
//! forward:  ElementStart(paragraph) Text("fo") ElementStart(image)
//!           ElementEnd(image) Text("o") ElementEnd(paragraph)
//! ```
//!
//! The walker borrows the model immutably, so the tree cannot change while a
//! walker is alive. A walker is not resumable; build a new one to restart.

use crate::errors::{ModelError, ModelResult};
use crate::model::Model;
use crate::node::{Attributes, Element, Node, Text};
use crate::position::Position;
use crate::range::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

#[derive(Debug, Clone, Default)]
pub struct WalkerOptions {
    /// Range the walker may not leave
    pub boundaries: Option<Range>,
    /// Start position; defaults to the boundary matching the direction
    pub start_position: Option<Position>,
    pub direction: Direction,
    /// Yield one char per text step instead of whole runs
    pub single_characters: bool,
    /// Do not enter child elements
    pub shallow: bool,
    /// Yield each element once, on entering it
    pub ignore_element_end: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    ElementStart,
    ElementEnd,
    Text,
}

/// Part of a text node
#[derive(Debug, Clone, Copy)]
pub struct TextProxy<'a> {
    text: &'a Text,
    offset_in_text: usize,
    len: usize,
}

impl<'a> TextProxy<'a> {
    pub fn data(&self) -> &'a str {
        self.text.slice(self.offset_in_text, self.len)
    }

    pub fn attributes(&self) -> &'a Attributes {
        &self.text.attributes
    }

    pub fn offset_in_text(&self) -> usize {
        self.offset_in_text
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn text_node(&self) -> &'a Text {
        self.text
    }
}

#[derive(Debug, Clone, Copy)]
pub enum WalkerItem<'a> {
    Element(&'a Element),
    Text(TextProxy<'a>),
}

impl<'a> WalkerItem<'a> {
    pub fn as_element(&self) -> Option<&'a Element> {
        match self {
            WalkerItem::Element(element) => Some(element),
            WalkerItem::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&TextProxy<'a>> {
        match self {
            WalkerItem::Text(proxy) => Some(proxy),
            WalkerItem::Element(_) => None,
        }
    }

    pub fn attributes(&self) -> &'a Attributes {
        match self {
            WalkerItem::Element(element) => &element.attributes,
            WalkerItem::Text(proxy) => proxy.attributes(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WalkerValue<'a> {
    pub kind: StepKind,
    pub item: WalkerItem<'a>,
    /// Position before the step
    pub previous_position: Position,
    /// Position after the step
    pub next_position: Position,
    pub length: usize,
}

pub struct TreeWalker<'a> {
    model: &'a Model,
    boundaries: Option<Range>,
    direction: Direction,
    single_characters: bool,
    shallow: bool,
    ignore_element_end: bool,
    position: Position,
    done: bool,
}

impl<'a> TreeWalker<'a> {
    pub fn new(model: &'a Model, options: WalkerOptions) -> ModelResult<Self> {
        let position = match (&options.start_position, &options.boundaries, options.direction) {
            (Some(start), _, _) => start.clone(),
            (None, Some(boundaries), Direction::Forward) => boundaries.start.clone(),
            (None, Some(boundaries), Direction::Backward) => boundaries.end.clone(),
            (None, None, _) => {
                return Err(ModelError::address("walker needs boundaries or a start position"))
            }
        };

        if !position.is_valid(model) {
            return Err(ModelError::address(format!("walker start {} does not resolve", position)));
        }
        if let Some(boundaries) = &options.boundaries {
            if !boundaries.start.is_valid(model) || !boundaries.end.is_valid(model) {
                let message = format!("walker boundaries {} do not resolve", boundaries);
                return Err(ModelError::address(message));
            }
            if boundaries.root() != position.root {
                return Err(ModelError::InvalidRoot(
                    boundaries.root().to_string(),
                    position.root.clone(),
                ));
            }
        }

        Ok(Self {
            model,
            boundaries: options.boundaries,
            direction: options.direction,
            single_characters: options.single_characters,
            shallow: options.shallow,
            ignore_element_end: options.ignore_element_end,
            position,
            done: false,
        })
    }

    /// Walker from `start` to the edge of its root
    pub fn from_position(
        model: &'a Model,
        start: Position,
        direction: Direction,
    ) -> ModelResult<Self> {
        Self::new(model, WalkerOptions {
            start_position: Some(start),
            direction,
            ..WalkerOptions::default()
        })
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Advance while `predicate` holds. The step that fails the predicate
    /// is rolled back, so the walker stops right before it.
    pub fn skip(&mut self, mut predicate: impl FnMut(&WalkerValue<'a>) -> bool) {
        loop {
            let previous = self.position.clone();
            match self.next() {
                None => return,
                Some(value) if predicate(&value) => continue,
                Some(_) => {
                    self.position = previous;
                    return;
                }
            }
        }
    }

    fn next_forward(&mut self) -> Option<WalkerValue<'a>> {
        let previous = self.position.clone();
        let parent_path = previous.parent_path().to_vec();
        let parent = self.model.element_at(&previous.root, &parent_path).ok()?;
        let offset = previous.offset();

        if parent_path.is_empty() && offset == parent.max_offset() {
            return None;
        }
        // Shallow steps over an element can land past the end.
        if let Some(end) = self.boundaries.as_ref().map(|b| &b.end) {
            if !previous.is_before(end) {
                return None;
            }
        }

        let mut next = previous.clone();
        match parent.node_at_offset(offset) {
            Some((index, start)) => match &parent.children()[index] {
                Node::Element(element) => {
                    if self.shallow {
                        next.set_offset(offset + 1);
                    } else {
                        next.path.push(0);
                    }
                    self.position = next.clone();
                    let item = WalkerItem::Element(element);
                    Some(step(StepKind::ElementStart, item, previous, next, 1))
                }
                Node::Text(text) => {
                    let count = if self.single_characters {
                        1
                    } else {
                        let mut end_offset = start + text.len();
                        if let Some(end) = self.boundaries.as_ref().map(|b| &b.end) {
                            if end.parent_path() == parent_path.as_slice()
                                && end.offset() < end_offset
                            {
                                end_offset = end.offset();
                            }
                        }
                        end_offset - offset
                    };
                    let proxy = TextProxy {
                        text,
                        offset_in_text: offset - start,
                        len: count,
                    };
                    next.set_offset(offset + count);
                    self.position = next.clone();
                    Some(step(StepKind::Text, WalkerItem::Text(proxy), previous, next, count))
                }
            },
            None => {
                next.path.pop();
                let parent_offset = next.offset();
                next.set_offset(parent_offset + 1);
                self.position = next.clone();
                if self.ignore_element_end {
                    return self.next_forward();
                }
                Some(step(StepKind::ElementEnd, WalkerItem::Element(parent), previous, next, 0))
            }
        }
    }

    fn next_backward(&mut self) -> Option<WalkerValue<'a>> {
        let previous = self.position.clone();
        let parent_path = previous.parent_path().to_vec();
        let parent = self.model.element_at(&previous.root, &parent_path).ok()?;
        let offset = previous.offset();

        if parent_path.is_empty() && offset == 0 {
            return None;
        }
        if let Some(start) = self.boundaries.as_ref().map(|b| &b.start) {
            if !start.is_before(&previous) {
                return None;
            }
        }

        let mut next = previous.clone();
        let before = if offset == 0 { None } else { parent.node_at_offset(offset - 1) };
        match before {
            Some((index, start)) => match &parent.children()[index] {
                Node::Element(element) => {
                    next.set_offset(offset - 1);
                    if self.shallow {
                        self.position = next.clone();
                        let item = WalkerItem::Element(element);
                        return Some(step(StepKind::ElementStart, item, previous, next, 1));
                    }
                    next.path.push(element.max_offset());
                    self.position = next.clone();
                    if self.ignore_element_end {
                        return self.next_backward();
                    }
                    let item = WalkerItem::Element(element);
                    Some(step(StepKind::ElementEnd, item, previous, next, 0))
                }
                Node::Text(text) => {
                    let count = if self.single_characters {
                        1
                    } else {
                        let mut start_offset = start;
                        if let Some(boundary) = self.boundaries.as_ref().map(|b| &b.start) {
                            if boundary.parent_path() == parent_path.as_slice()
                                && boundary.offset() > start_offset
                            {
                                start_offset = boundary.offset();
                            }
                        }
                        offset - start_offset
                    };
                    let proxy = TextProxy {
                        text,
                        offset_in_text: offset - start - count,
                        len: count,
                    };
                    next.set_offset(offset - count);
                    self.position = next.clone();
                    Some(step(StepKind::Text, WalkerItem::Text(proxy), previous, next, count))
                }
            },
            None => {
                next.path.pop();
                self.position = next.clone();
                Some(step(StepKind::ElementStart, WalkerItem::Element(parent), previous, next, 1))
            }
        }
    }
}

fn step<'a>(
    kind: StepKind,
    item: WalkerItem<'a>,
    previous_position: Position,
    next_position: Position,
    length: usize,
) -> WalkerValue<'a> {
    WalkerValue {
        kind,
        item,
        previous_position,
        next_position,
        length,
    }
}

impl<'a> Iterator for TreeWalker<'a> {
    type Item = WalkerValue<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let value = match self.direction {
            Direction::Forward => self.next_forward(),
            Direction::Backward => self.next_backward(),
        };
        if value.is_none() {
            self.done = true;
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Element;

    fn pos(path: &[usize]) -> Position {
        Position::new("main", path.to_vec())
    }

    // <paragraph>ab<image/>c</paragraph><paragraph>de</paragraph>
    fn model() -> Model {
        let mut model = Model::new("main");
        let first = Element::new("paragraph").with_children(vec![
            Node::text("ab"),
            Node::element("image"),
            Node::text("c"),
        ]);
        let second = Element::new("paragraph").with_children(vec![Node::text("de")]);
        model
            .insert(&Position::at_start("main"), vec![first.into(), second.into()])
            .unwrap();
        model
    }

    fn kinds(walker: TreeWalker<'_>) -> Vec<(StepKind, String)> {
        walker
            .map(|value| {
                let label = match value.item {
                    WalkerItem::Element(element) => element.name.clone(),
                    WalkerItem::Text(proxy) => proxy.data().to_string(),
                };
                (value.kind, label)
            })
            .collect()
    }

    #[test]
    fn test_forward_walk_over_root() {
        let model = model();
        let range = Range::in_element(&model, "main", &[]).unwrap();
        let steps = kinds(range.walk(&model).unwrap());
        assert_eq!(
            steps,
            vec![
                (StepKind::ElementStart, "paragraph".into()),
                (StepKind::Text, "ab".into()),
                (StepKind::ElementStart, "image".into()),
                (StepKind::ElementEnd, "image".into()),
                (StepKind::Text, "c".into()),
                (StepKind::ElementEnd, "paragraph".into()),
                (StepKind::ElementStart, "paragraph".into()),
                (StepKind::Text, "de".into()),
                (StepKind::ElementEnd, "paragraph".into()),
            ]
        );
    }

    #[test]
    fn test_text_is_clipped_to_boundaries() {
        let model = model();
        let range = Range::new(pos(&[0, 1]), pos(&[1, 1]));
        assert_eq!(range.text(&model).unwrap(), "bcd");
        assert_eq!(range.text_backward(&model).unwrap(), "bcd");
    }

    #[test]
    fn test_single_characters_and_shallow() {
        let model = model();
        let range = Range::in_element(&model, "main", &[0]).unwrap();
        let walker = range
            .walk_with(&model, WalkerOptions {
                single_characters: true,
                shallow: true,
                ..WalkerOptions::default()
            })
            .unwrap();
        let steps = kinds(walker);
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[2], (StepKind::ElementStart, "image".into()));
    }

    #[test]
    fn test_shallow_walk_stops_at_boundaries() {
        let mut model = model();
        let third = Element::new("paragraph").with_children(vec![Node::text("fg")]);
        model.insert(&pos(&[2]), vec![third.into()]).unwrap();

        let range = Range::new(pos(&[0, 1]), pos(&[1, 1]));
        let forward = range
            .walk_with(&model, WalkerOptions {
                shallow: true,
                ..WalkerOptions::default()
            })
            .unwrap();
        let steps: Vec<_> = forward.map(|value| (value.kind, value.next_position)).collect();
        assert_eq!(
            steps,
            vec![
                (StepKind::Text, pos(&[0, 2])),
                (StepKind::ElementStart, pos(&[0, 3])),
                (StepKind::Text, pos(&[0, 4])),
                (StepKind::ElementEnd, pos(&[1])),
                // The last paragraph is only partly inside and is stepped over whole.
                (StepKind::ElementStart, pos(&[2])),
            ]
        );

        let range = Range::new(pos(&[1, 1]), pos(&[2, 1]));
        let backward = range
            .walk_with(&model, WalkerOptions {
                shallow: true,
                direction: Direction::Backward,
                ..WalkerOptions::default()
            })
            .unwrap();
        let steps: Vec<_> = backward.map(|value| (value.kind, value.next_position)).collect();
        assert_eq!(
            steps,
            vec![
                (StepKind::Text, pos(&[2, 0])),
                (StepKind::ElementStart, pos(&[2])),
                (StepKind::ElementStart, pos(&[1])),
            ]
        );
    }

    #[test]
    fn test_ignore_element_end_yields_each_element_once() {
        let model = model();
        let range = Range::in_element(&model, "main", &[]).unwrap();
        let walker = range
            .walk_with(&model, WalkerOptions {
                ignore_element_end: true,
                ..WalkerOptions::default()
            })
            .unwrap();
        let elements = kinds(walker)
            .into_iter()
            .filter(|(kind, _)| *kind != StepKind::Text)
            .count();
        assert_eq!(elements, 3);
    }

    #[test]
    fn test_backward_walk_enters_from_end() {
        let model = model();
        let range = Range::in_element(&model, "main", &[]).unwrap();
        let walker = range
            .walk_with(&model, WalkerOptions {
                direction: Direction::Backward,
                ..WalkerOptions::default()
            })
            .unwrap();
        let steps = kinds(walker);
        assert_eq!(steps[0], (StepKind::ElementEnd, "paragraph".into()));
        assert_eq!(steps[1], (StepKind::Text, "de".into()));
        assert_eq!(steps.last().unwrap(), &(StepKind::ElementStart, "paragraph".into()));
    }

    #[test]
    fn test_skip_rolls_back_one_step() {
        let model = model();
        let mut walker =
            TreeWalker::from_position(&model, pos(&[0, 0]), Direction::Forward).unwrap();
        TreeWalker::skip(&mut walker, |value| value.kind == StepKind::Text);
        assert_eq!(walker.position(), &pos(&[0, 2]));
        let next = walker.next().unwrap();
        assert_eq!(next.kind, StepKind::ElementStart);
    }

    #[test]
    fn test_walker_from_position_stops_at_root_end() {
        let model = model();
        let walker = TreeWalker::from_position(&model, pos(&[1, 1]), Direction::Forward).unwrap();
        let steps = kinds(walker);
        assert_eq!(
            steps,
            vec![(StepKind::Text, "e".into()), (StepKind::ElementEnd, "paragraph".into())]
        );
    }

    #[test]
    fn test_invalid_start_is_rejected() {
        let model = model();
        let result = TreeWalker::from_position(&model, pos(&[5, 0]), Direction::Forward);
        assert!(result.is_err());
    }
}
