//! # Selection
//!
//! Two flavours:
//!
//! - [`Selection`]: a plain value (ranges plus a backward flag) used by the
//!   composer and by callers that want to compute a selection without
//!   touching the document
//! - [`DocumentSelection`]: the document's own selection. Its ranges follow
//!   every applied operation, it never rests in removed content, and it
//!   carries attributes used when typing
//!
//! ## Attributes
//!
//! Attributes set directly (`set_attribute`) have *normal* priority and
//! survive operations. Attributes inferred from the surrounding text have
//! *low* priority and are recomputed after every change. A direct range
//! change drops all priorities and re-infers.
//!
//! Direct attributes set on a collapsed selection in an empty element are
//! stored on that element under the `selection:` key prefix, so they come
//! back when the selection returns there. They are cleared once the element
//! gets content.

use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

use crate::document::Document;
use crate::errors::{ModelError, ModelResult};
use crate::model::{Model, GRAVEYARD};
use crate::node::{Attributes, Node};
use crate::observer::ChangeEvent;
use crate::operation::Operation;
use crate::position::Position;
use crate::range::Range;
use crate::schema::Schema;
use crate::walker::WalkerItem;

/// Ranges with a direction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    ranges: Vec<Range>,
    backward: bool,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_range(range: Range, backward: bool) -> Self {
        Self::from_ranges(vec![range], backward)
    }

    pub fn from_ranges(ranges: Vec<Range>, backward: bool) -> Self {
        let backward = backward && !ranges.is_empty();
        Self { ranges, backward }
    }

    pub fn collapsed_at(position: Position) -> Self {
        Self::from_range(Range::collapsed(position), false)
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    /// Range that starts first in document order
    pub fn first_range(&self) -> Option<&Range> {
        self.ranges
            .iter()
            .reduce(|first, range| if range.start.is_before(&first.start) { range } else { first })
    }

    pub fn last_range(&self) -> Option<&Range> {
        self.ranges
            .iter()
            .reduce(|last, range| if range.end.is_after(&last.end) { range } else { last })
    }

    pub fn first_position(&self) -> Option<&Position> {
        self.first_range().map(|range| &range.start)
    }

    pub fn last_position(&self) -> Option<&Position> {
        self.last_range().map(|range| &range.end)
    }

    /// Where the selection starts, from the most recently added range
    pub fn anchor(&self) -> Option<&Position> {
        self.ranges
            .last()
            .map(|range| if self.backward { &range.end } else { &range.start })
    }

    /// Where the selection ends, from the most recently added range
    pub fn focus(&self) -> Option<&Position> {
        self.ranges
            .last()
            .map(|range| if self.backward { &range.start } else { &range.end })
    }

    pub fn is_collapsed(&self) -> bool {
        self.ranges.len() == 1 && self.ranges[0].is_collapsed()
    }

    pub fn is_backward(&self) -> bool {
        self.backward && !self.is_collapsed()
    }

    pub fn set_ranges(&mut self, ranges: Vec<Range>, backward: bool) {
        *self = Self::from_ranges(ranges, backward);
    }

    /// Add a range; it may not intersect the existing ones
    pub fn add_range(&mut self, range: Range, backward: bool) -> ModelResult<()> {
        if let Some(other) = self.ranges.iter().find(|other| other.is_intersecting(&range)) {
            return Err(ModelError::address(format!("range {} intersects {}", range, other)));
        }
        self.ranges.push(range);
        self.backward = backward;
        Ok(())
    }

    pub fn collapse(&mut self, position: Position) {
        *self = Self::collapsed_at(position);
    }

    pub fn collapse_to_start(&mut self) {
        if let Some(position) = self.first_position().cloned() {
            self.collapse(position);
        }
    }

    pub fn collapse_to_end(&mut self) {
        if let Some(position) = self.last_position().cloned() {
            self.collapse(position);
        }
    }

    /// Move the focus, keeping the anchor where it is
    pub fn set_focus(&mut self, focus: Position) -> ModelResult<()> {
        let anchor = self
            .anchor()
            .cloned()
            .ok_or_else(|| ModelError::address("cannot set focus on an empty selection"))?;
        anchor.compare_with(&focus)?;

        self.ranges.pop();
        let (range, backward) = if focus.is_before(&anchor) {
            (Range::new(focus, anchor), true)
        } else {
            (Range::new(anchor, focus), false)
        };
        self.ranges.push(range);
        self.backward = backward;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributePriority {
    /// Inferred from the surrounding text
    Low,
    /// Set directly
    Normal,
}

/// Selection state owned by the document
#[derive(Debug, Clone)]
pub(crate) struct SelectionState {
    selection: Selection,
    attributes: Attributes,
    priorities: BTreeMap<String, AttributePriority>,
    prefix: String,
}

impl SelectionState {
    pub(crate) fn new(model: &Model, schema: &Schema, prefix: impl Into<String>) -> Self {
        let mut state = Self {
            selection: Selection::new(),
            attributes: Attributes::new(),
            priorities: BTreeMap::new(),
            prefix: prefix.into(),
        };
        state.selection = Selection::from_range(default_range(model, schema), false);
        state.update_attributes(model, true);
        state
    }

    pub(crate) fn selection(&self) -> &Selection {
        &self.selection
    }

    pub(crate) fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub(crate) fn priority(&self, key: &str) -> Option<AttributePriority> {
        self.priorities.get(key).copied()
    }

    pub(crate) fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Replace the ranges as a direct change
    pub(crate) fn set_selection(
        &mut self,
        model: &Model,
        schema: &Schema,
        selection: Selection,
    ) -> ModelResult<Vec<ChangeEvent>> {
        let mut ranges = Vec::with_capacity(selection.range_count());
        for range in selection.ranges() {
            if range.root() == GRAVEYARD {
                warn!(range = %range, "selection range in removed content was rejected");
                continue;
            }
            if !range.start.is_valid(model) || !range.end.is_valid(model) {
                let message = format!("selection range {} does not resolve", range);
                return Err(ModelError::address(message));
            }
            ranges.push(range.clone());
        }
        if ranges.is_empty() {
            ranges.push(default_range(model, schema));
        }

        let replaced = Selection::from_ranges(ranges, selection.backward);
        let previous = std::mem::replace(&mut self.selection, replaced);
        let mut events = Vec::new();
        if previous != self.selection {
            events.push(ChangeEvent::SelectionRangeChanged { direct: true });
        }
        let keys = self.update_attributes(model, true);
        if !keys.is_empty() {
            events.push(ChangeEvent::SelectionAttributesChanged { direct: false, keys });
        }
        Ok(events)
    }

    pub(crate) fn set_focus(
        &mut self,
        model: &Model,
        schema: &Schema,
        focus: Position,
    ) -> ModelResult<Vec<ChangeEvent>> {
        let mut selection = self.selection.clone();
        selection.set_focus(focus)?;
        self.set_selection(model, schema, selection)
    }

    /// Direct attribute change; returns the event when something changed
    pub(crate) fn set_attribute(&mut self, key: &str, value: Value) -> Option<ChangeEvent> {
        self.priorities.insert(key.to_string(), AttributePriority::Normal);
        if self.attributes.get(key) == Some(&value) {
            return None;
        }
        self.attributes.insert(key.to_string(), value);
        Some(ChangeEvent::SelectionAttributesChanged {
            direct: true,
            keys: vec![key.to_string()],
        })
    }

    pub(crate) fn remove_attribute(&mut self, key: &str) -> Option<ChangeEvent> {
        self.priorities.insert(key.to_string(), AttributePriority::Normal);
        self.attributes.remove(key)?;
        Some(ChangeEvent::SelectionAttributesChanged {
            direct: true,
            keys: vec![key.to_string()],
        })
    }

    /// Remap after an applied operation
    pub(crate) fn remap(
        &mut self,
        model: &Model,
        schema: &Schema,
        operation: &Operation,
    ) -> Vec<ChangeEvent> {
        let mut ranges: Vec<Range> = Vec::with_capacity(self.selection.range_count());
        for range in self.selection.ranges() {
            let pieces = range.get_transformed_by_operation(operation, false);
            let Some(mut range) = Range::from_ranges(&pieces) else {
                continue;
            };
            if range.root() == GRAVEYARD {
                let deletion_point = match operation {
                    Operation::Move(op) => op.source_position.clone(),
                    _ => continue,
                };
                match schema.nearest_text_position(model, &deletion_point) {
                    Some(position) => range = Range::collapsed(position),
                    None => continue,
                }
            }
            if !ranges.contains(&range) {
                ranges.push(range);
            }
        }
        if ranges.is_empty() {
            ranges.push(default_range(model, schema));
        }

        let backward = self.selection.backward;
        let previous =
            std::mem::replace(&mut self.selection, Selection::from_ranges(ranges, backward));
        let mut events = Vec::new();
        if previous != self.selection {
            events.push(ChangeEvent::SelectionRangeChanged { direct: false });
        }
        let keys = self.update_attributes(model, false);
        if !keys.is_empty() {
            events.push(ChangeEvent::SelectionAttributesChanged { direct: false, keys });
        }
        events
    }

    /// Attributes stored on the empty element holding a collapsed selection
    pub(crate) fn stored_attributes(&self, model: &Model) -> Attributes {
        let Some(parent) = self.empty_parent(model) else {
            return Attributes::new();
        };
        let Ok(element) = model.element_at(&parent.root, &parent.path) else {
            return Attributes::new();
        };
        element
            .attributes
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(self.prefix.as_str())
                    .map(|key| (key.to_string(), value.clone()))
            })
            .collect()
    }

    /// Position of the empty element (not a root) containing a collapsed
    /// selection, expressed as root + path of the element
    pub(crate) fn empty_parent(&self, model: &Model) -> Option<Position> {
        if !self.selection.is_collapsed() {
            return None;
        }
        let position = self.selection.first_position()?;
        if position.parent_path().is_empty() {
            return None;
        }
        let parent = position.parent(model).ok()?;
        if !parent.is_empty() {
            return None;
        }
        Some(Position::new(position.root.clone(), position.parent_path().to_vec()))
    }

    /// Re-infer low-priority attributes, returning the keys that changed
    fn update_attributes(&mut self, model: &Model, clear_all: bool) -> Vec<String> {
        if clear_all {
            self.priorities.clear();
        }
        let inferred = self.surrounding_attributes(model);
        let mut changed = Vec::new();

        let stale: Vec<String> = self
            .attributes
            .keys()
            .filter(|key| !inferred.contains_key(*key))
            .filter(|key| self.priorities.get(*key) != Some(&AttributePriority::Normal))
            .cloned()
            .collect();
        for key in stale {
            self.attributes.remove(&key);
            self.priorities.remove(&key);
            changed.push(key);
        }

        for (key, value) in inferred {
            if self.priorities.get(&key) == Some(&AttributePriority::Normal) {
                continue;
            }
            if self.attributes.get(&key) != Some(&value) {
                self.attributes.insert(key.clone(), value);
                changed.push(key.clone());
            }
            self.priorities.insert(key, AttributePriority::Low);
        }
        changed.sort();
        changed.dedup();
        changed
    }

    fn surrounding_attributes(&self, model: &Model) -> Attributes {
        if !self.selection.is_collapsed() {
            let Some(range) = self.selection.first_range() else {
                return Attributes::new();
            };
            let Ok(walker) = range.walk(model) else {
                return Attributes::new();
            };
            return walker
                .filter_map(|value| match value.item {
                    WalkerItem::Text(proxy) => Some(proxy.attributes().clone()),
                    WalkerItem::Element(_) => None,
                })
                .next()
                .unwrap_or_default();
        }

        let Some(position) = self.selection.first_position() else {
            return Attributes::new();
        };
        let Ok(parent) = position.parent(model) else {
            return Attributes::new();
        };
        let offset = position.offset();
        let children = parent.children();

        if let Some((index, _)) = parent.text_node_at(offset) {
            return children[index].attributes().clone();
        }

        let before = offset
            .checked_sub(1)
            .and_then(|offset| parent.node_at_offset(offset))
            .map(|(index, _)| index);
        let after = parent.node_at_offset(offset).map(|(index, _)| index);

        let text_attributes = |node: &Node| node.as_text().map(|text| text.attributes.clone());

        let found = before
            .and_then(|index| text_attributes(&children[index]))
            .or_else(|| after.and_then(|index| text_attributes(&children[index])))
            .or_else(|| {
                before.and_then(|index| children[..index].iter().rev().find_map(text_attributes))
            })
            .or_else(|| {
                after.and_then(|index| children[index + 1..].iter().find_map(text_attributes))
            });

        found.unwrap_or_else(|| self.stored_attributes(model))
    }
}

/// Collapsed range at the first place in the main root where text fits
pub(crate) fn default_range(model: &Model, schema: &Schema) -> Range {
    let start = Position::at_start(model.main_root_name());
    let position = schema.nearest_text_position(model, &start).unwrap_or(start);
    Range::collapsed(position)
}

/// The document's selection, borrowed from a [`Document`]
pub struct DocumentSelection<'a> {
    document: &'a Document,
}

impl<'a> DocumentSelection<'a> {
    pub(crate) fn new(document: &'a Document) -> Self {
        Self { document }
    }

    /// Snapshot of the current ranges
    pub fn get(&self) -> Selection {
        self.document.selection_state().selection().clone()
    }

    pub fn ranges(&self) -> Vec<Range> {
        self.get().ranges().to_vec()
    }

    pub fn first_range(&self) -> Option<Range> {
        self.get().first_range().cloned()
    }

    pub fn anchor(&self) -> Option<Position> {
        self.get().anchor().cloned()
    }

    pub fn focus(&self) -> Option<Position> {
        self.get().focus().cloned()
    }

    pub fn is_collapsed(&self) -> bool {
        self.get().is_collapsed()
    }

    pub fn is_backward(&self) -> bool {
        self.get().is_backward()
    }

    pub fn get_attribute(&self, key: &str) -> Option<Value> {
        self.document.selection_state().attributes().get(key).cloned()
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.document.selection_state().attributes().contains_key(key)
    }

    pub fn attributes(&self) -> Attributes {
        self.document.selection_state().attributes().clone()
    }

    pub fn attribute_priority(&self, key: &str) -> Option<AttributePriority> {
        self.document.selection_state().priority(key)
    }

    pub fn get_stored_attributes(&self) -> Attributes {
        let model = self.document.model();
        self.document.selection_state().stored_attributes(&model)
    }

    pub fn set_to(&self, selection: Selection) -> ModelResult<()> {
        self.document.set_selection(selection)
    }

    pub fn set_ranges(&self, ranges: Vec<Range>, backward: bool) -> ModelResult<()> {
        self.set_to(Selection::from_ranges(ranges, backward))
    }

    pub fn add_range(&self, range: Range, backward: bool) -> ModelResult<()> {
        let mut selection = self.get();
        selection.add_range(range, backward)?;
        self.set_to(selection)
    }

    pub fn collapse(&self, position: Position) -> ModelResult<()> {
        self.set_to(Selection::collapsed_at(position))
    }

    pub fn set_focus(&self, focus: Position) -> ModelResult<()> {
        self.document.set_selection_focus(focus)
    }

    /// Set a direct attribute. Runs its own change, so inside a change use
    /// [`crate::Writer::set_selection_attribute`] instead.
    pub fn set_attribute(&self, key: &str, value: impl Into<Value>) -> ModelResult<()> {
        let value = value.into();
        self.document
            .change(|writer| writer.set_selection_attribute(key, value))
    }

    pub fn remove_attribute(&self, key: &str) -> ModelResult<()> {
        self.document.change(|writer| writer.remove_selection_attribute(key))
    }

    /// Replace all attributes with the given set
    pub fn set_attributes_to(&self, attributes: Attributes) -> ModelResult<()> {
        self.document.change(|writer| {
            let current: Vec<String> = writer.selection_attributes().keys().cloned().collect();
            for key in current.iter().filter(|key| !attributes.contains_key(*key)) {
                writer.remove_selection_attribute(key)?;
            }
            for (key, value) in &attributes {
                writer.set_selection_attribute(key, value.clone())?;
            }
            Ok(())
        })
    }

    pub fn clear_attributes(&self) -> ModelResult<()> {
        self.set_attributes_to(Attributes::new())
    }
}
