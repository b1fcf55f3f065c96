//! # Writer
//!
//! The only way to change a [`crate::Document`]. A writer is handed to the
//! closure passed to [`crate::Document::change`]; every helper turns into
//! one or more operations which are applied immediately, so reads made
//! through [`Writer::model`] always see the current tree.
//!
//! After each operation the writer keeps the rest of the document in step:
//! the operation is logged, tracked references and the selection are
//! remapped, and insertion points are remembered so that attributes stored
//! on empty elements for the selection can be cleared once those elements
//! get content.

use std::cell::Ref;

use serde_json::Value;
use tracing::{debug, error};

use crate::batch::Batch;
use crate::document::DocumentCore;
use crate::errors::{ModelError, ModelResult};
use crate::model::{Model, GRAVEYARD};
use crate::node::{Attributes, Element, Node, Text};
use crate::observer::Change;
use crate::operation::{
    graveyard_position, AttributeOperation, MarkerOperation, Operation, RenameOperation,
    RootOperation,
};
use crate::position::Position;
use crate::range::Range;
use crate::schema::Schema;
use crate::selection::{Selection, SelectionState};

pub struct Writer<'a> {
    core: &'a DocumentCore,
    batch: Batch,
    changes: Vec<Change>,
    /// Positions where content was inserted, kept remapped
    touched: Vec<Position>,
    start_version: u64,
    start_graveyard: usize,
    start_events: usize,
    start_selection: SelectionState,
}

impl<'a> Writer<'a> {
    pub(crate) fn new(core: &'a DocumentCore, batch: Batch) -> Self {
        let (start_version, start_graveyard) = {
            let model = core.model.borrow();
            (model.version(), model.graveyard().max_offset())
        };
        Self {
            core,
            batch,
            changes: Vec::new(),
            touched: Vec::new(),
            start_version,
            start_graveyard,
            start_events: core.pending_event_count(),
            start_selection: core.selection.borrow().clone(),
        }
    }

    /// Read access to the tree. Drop the guard before the next write.
    pub fn model(&self) -> Ref<'a, Model> {
        self.core.model.borrow()
    }

    pub fn version(&self) -> u64 {
        self.core.model.borrow().version()
    }

    pub fn schema(&self) -> &'a Schema {
        &self.core.schema
    }

    pub fn batch(&self) -> &Batch {
        &self.batch
    }

    /// Apply a prepared operation. Its base version must equal the current
    /// version.
    pub fn apply_operation(&mut self, operation: Operation) -> ModelResult<()> {
        self.apply_internal(operation)
    }

    pub fn insert(&mut self, position: &Position, nodes: Vec<Node>) -> ModelResult<()> {
        if nodes.is_empty() {
            return Ok(());
        }
        let version = self.version();
        self.apply_internal(Operation::insert(position.clone(), nodes, version))
    }

    pub fn insert_text(
        &mut self,
        position: &Position,
        data: &str,
        attributes: Attributes,
    ) -> ModelResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let mut text = Text::new(data);
        text.attributes = attributes;
        self.insert(position, vec![text.into()])
    }

    pub fn insert_element(&mut self, position: &Position, element: Element) -> ModelResult<()> {
        self.insert(position, vec![element.into()])
    }

    /// Remove everything inside `range`. Elements only partially covered
    /// keep their place; only their covered content goes.
    pub fn remove(&mut self, range: &Range) -> ModelResult<()> {
        if range.is_collapsed() {
            return Ok(());
        }
        let flat_ranges = range.get_minimal_flat_ranges(&self.model())?;
        for flat in flat_ranges.into_iter().rev() {
            let how_many = flat.end.offset() - flat.start.offset();
            let version = self.version();
            self.apply_internal(Operation::remove(flat.start, how_many, version))?;
        }
        Ok(())
    }

    /// Move a flat range to `target` (given before the move)
    pub fn move_range(&mut self, range: &Range, target: &Position) -> ModelResult<()> {
        if !range.is_flat() {
            return Err(ModelError::address(format!("cannot move non-flat range {}", range)));
        }
        if range.is_collapsed() {
            return Ok(());
        }
        let how_many = range.end.offset() - range.start.offset();
        let version = self.version();
        let operation = Operation::move_to(range.start.clone(), how_many, target.clone(), version);
        self.apply_internal(operation)
    }

    /// Merge the elements on both sides of `position`: the right one's
    /// children go to the end of the left one, then the right one is
    /// removed.
    pub fn merge(&mut self, position: &Position) -> ModelResult<()> {
        let (left_size, right_size) = {
            let model = self.model();
            let before = position.node_before(&model)?.and_then(Node::as_element);
            let after = position.node_after(&model)?.and_then(Node::as_element);
            match (before, after) {
                (Some(left), Some(right)) => (left.max_offset(), right.max_offset()),
                _ => {
                    return Err(ModelError::address(format!(
                        "nothing to merge at {}",
                        position
                    )))
                }
            }
        };

        let offset = position.offset();
        let mut left_path = position.parent_path().to_vec();
        left_path.extend([offset - 1, left_size]);
        let mut right_path = position.parent_path().to_vec();
        right_path.extend([offset, 0]);

        if right_size > 0 {
            let version = self.version();
            self.apply_internal(Operation::move_to(
                Position::new(position.root.clone(), right_path),
                right_size,
                Position::new(position.root.clone(), left_path),
                version,
            ))?;
        }
        let version = self.version();
        self.apply_internal(Operation::remove(position.clone(), 1, version))
    }

    pub fn set_attribute(
        &mut self,
        range: &Range,
        key: &str,
        value: impl Into<Value>,
    ) -> ModelResult<()> {
        self.change_attribute(range, key, Some(value.into()))
    }

    pub fn remove_attribute(&mut self, range: &Range, key: &str) -> ModelResult<()> {
        self.change_attribute(range, key, None)
    }

    /// Set or clear `key` on the nodes of `range`, one operation per run of
    /// nodes sharing the same old value
    fn change_attribute(
        &mut self,
        range: &Range,
        key: &str,
        value: Option<Value>,
    ) -> ModelResult<()> {
        let mut operations = Vec::new();
        {
            let model = self.model();
            let flat_ranges = if range.is_flat() {
                vec![range.clone()]
            } else {
                range.get_minimal_flat_ranges(&model)?
            };

            for flat in flat_ranges {
                let parent = flat.start.parent(&model)?;
                let (from, to) = (flat.start.offset(), flat.end.offset());
                let mut chunks: Vec<(usize, usize, Option<Value>)> = Vec::new();
                let mut offset = 0;
                for child in parent.children() {
                    let child_end = offset + child.offset_size();
                    let (start, end) = (offset.max(from), child_end.min(to));
                    if start < end {
                        let old = child.attributes().get(key).cloned();
                        match chunks.last_mut() {
                            Some(last) if last.1 == start && last.2 == old => last.1 = end,
                            _ => chunks.push((start, end, old)),
                        }
                    }
                    offset = child_end;
                }

                let parent_path = flat.start.parent_path();
                for (start, end, old) in chunks.into_iter().filter(|chunk| chunk.2 != value) {
                    operations.push(AttributeOperation {
                        range: Range::new(
                            Position::in_parent(flat.root(), parent_path, start),
                            Position::in_parent(flat.root(), parent_path, end),
                        ),
                        key: key.to_string(),
                        old_value: old,
                        new_value: value.clone(),
                        base_version: 0,
                    });
                }
            }
        }

        for mut operation in operations {
            operation.base_version = self.version();
            self.apply_internal(Operation::Attribute(operation))?;
        }
        Ok(())
    }

    /// Rename the element right after `position`
    pub fn rename(&mut self, position: &Position, new_name: &str) -> ModelResult<()> {
        let old_name = {
            let model = self.model();
            match position.node_after(&model)?.and_then(Node::as_element) {
                Some(element) => element.name.clone(),
                None => {
                    let message = format!("no element to rename at {}", position);
                    return Err(ModelError::address(message));
                }
            }
        };
        if old_name == new_name {
            return Ok(());
        }
        let base_version = self.version();
        self.apply_internal(Operation::Rename(RenameOperation {
            position: position.clone(),
            old_name,
            new_name: new_name.to_string(),
            base_version,
        }))
    }

    pub fn add_marker(&mut self, name: &str, range: Range, affects_data: bool) -> ModelResult<()> {
        if self.model().get_marker(name).is_some() {
            return Err(ModelError::address(format!("marker {} already exists", name)));
        }
        self.marker_operation(name, None, Some(range), affects_data)
    }

    pub fn update_marker(&mut self, name: &str, range: Range) -> ModelResult<()> {
        let (old_range, affects_data) = self.existing_marker(name)?;
        self.marker_operation(name, Some(old_range), Some(range), affects_data)
    }

    pub fn remove_marker(&mut self, name: &str) -> ModelResult<()> {
        let (old_range, affects_data) = self.existing_marker(name)?;
        self.marker_operation(name, Some(old_range), None, affects_data)
    }

    fn existing_marker(&self, name: &str) -> ModelResult<(Range, bool)> {
        self.model()
            .get_marker(name)
            .map(|marker| (marker.range.clone(), marker.affects_data))
            .ok_or_else(|| ModelError::address(format!("marker {} does not exist", name)))
    }

    fn marker_operation(
        &mut self,
        name: &str,
        old_range: Option<Range>,
        new_range: Option<Range>,
        affects_data: bool,
    ) -> ModelResult<()> {
        let base_version = self.version();
        self.apply_internal(Operation::Marker(MarkerOperation {
            name: name.to_string(),
            old_range,
            new_range,
            affects_data,
            base_version,
        }))
    }

    /// Attach a new (or previously detached) root
    pub fn add_root(&mut self, name: &str, element_name: &str) -> ModelResult<()> {
        let base_version = self.version();
        self.apply_internal(Operation::Root(RootOperation {
            root_name: name.to_string(),
            element_name: element_name.to_string(),
            is_add: true,
            base_version,
        }))
    }

    pub fn detach_root(&mut self, name: &str) -> ModelResult<()> {
        let element_name = self.model().root(name)?.name.clone();
        let base_version = self.version();
        self.apply_internal(Operation::Root(RootOperation {
            root_name: name.to_string(),
            element_name,
            is_add: false,
            base_version,
        }))
    }

    pub fn selection(&self) -> Selection {
        self.core.selection.borrow().selection().clone()
    }

    pub fn set_selection(&mut self, selection: Selection) -> ModelResult<()> {
        let events = {
            let model = self.core.model.borrow();
            self.core
                .selection
                .borrow_mut()
                .set_selection(&model, &self.core.schema, selection)?
        };
        self.core.queue_events(events);
        Ok(())
    }

    pub fn set_selection_focus(&mut self, focus: Position) -> ModelResult<()> {
        let events = {
            let model = self.core.model.borrow();
            self.core
                .selection
                .borrow_mut()
                .set_focus(&model, &self.core.schema, focus)?
        };
        self.core.queue_events(events);
        Ok(())
    }

    pub fn selection_attributes(&self) -> Attributes {
        self.core.selection.borrow().attributes().clone()
    }

    /// Set a direct selection attribute. In an empty element it is also
    /// stored on the element so it survives the selection leaving.
    pub fn set_selection_attribute(
        &mut self,
        key: &str,
        value: impl Into<Value>,
    ) -> ModelResult<()> {
        let value = value.into();
        let (event, stored_at) = {
            let model = self.core.model.borrow();
            let mut state = self.core.selection.borrow_mut();
            let event = state.set_attribute(key, value.clone());
            let stored_at = state
                .empty_parent(&model)
                .map(|element| (element, format!("{}{}", state.prefix(), key)));
            (event, stored_at)
        };
        self.core.queue_events(event);
        if let Some((element, stored_key)) = stored_at {
            let range = Range::from_position_and_shift(&element, 1);
            self.change_attribute(&range, &stored_key, Some(value))?;
        }
        Ok(())
    }

    pub fn remove_selection_attribute(&mut self, key: &str) -> ModelResult<()> {
        let (event, stored_at) = {
            let model = self.core.model.borrow();
            let mut state = self.core.selection.borrow_mut();
            let event = state.remove_attribute(key);
            let stored_at = state
                .empty_parent(&model)
                .map(|element| (element, format!("{}{}", state.prefix(), key)));
            (event, stored_at)
        };
        self.core.queue_events(event);
        if let Some((element, stored_key)) = stored_at {
            self.change_attribute(&Range::from_position_and_shift(&element, 1), &stored_key, None)?;
        }
        Ok(())
    }

    fn apply_internal(&mut self, operation: Operation) -> ModelResult<()> {
        let change = operation.apply(&mut self.core.model.borrow_mut())?;

        self.core.history.borrow_mut().log(operation.clone());
        self.core.tracked.borrow_mut().remap(&operation);
        let events = {
            let model = self.core.model.borrow();
            self.core
                .selection
                .borrow_mut()
                .remap(&model, &self.core.schema, &operation)
        };
        self.core.queue_events(events);

        for position in &mut self.touched {
            *position = operation.affects_position(position);
        }
        match &operation {
            Operation::Insert(op) => self.touched.push(op.position.clone()),
            Operation::Move(op) if !op.is_remove() => self.touched.push(op.moved_range_start()),
            _ => {}
        }

        self.changes.extend(change);
        self.batch.push(operation);
        Ok(())
    }

    /// Remove stored selection attributes from elements that got content
    pub(crate) fn clear_stored_selection_attributes(&mut self) -> ModelResult<()> {
        let prefix = self.core.selection.borrow().prefix().to_string();
        let mut removals = Vec::new();
        {
            let model = self.model();
            let mut seen: Vec<(&str, &[usize])> = Vec::new();
            for position in &self.touched {
                let key = (position.root.as_str(), position.parent_path());
                if position.root == GRAVEYARD || key.1.is_empty() || seen.contains(&key) {
                    continue;
                }
                seen.push(key);

                let Ok(parent) = position.parent(&model) else {
                    continue;
                };
                if parent.is_empty() {
                    continue;
                }
                let element = Position::new(position.root.clone(), position.parent_path().to_vec());
                let stored = parent.attributes.iter().filter(|(name, _)| name.starts_with(&prefix));
                for (name, value) in stored {
                    removals.push((element.clone(), name.clone(), value.clone()));
                }
            }
        }

        for (element, key, old_value) in removals {
            let base_version = self.version();
            self.apply_internal(Operation::Attribute(AttributeOperation {
                range: Range::from_position_and_shift(&element, 1),
                key,
                old_value: Some(old_value),
                new_value: None,
                base_version,
            }))?;
        }
        Ok(())
    }

    /// Undo everything applied so far and forget it: the version, the
    /// operation log and the selection go back to where the batch started,
    /// and events queued since are dropped.
    pub(crate) fn rollback(&mut self) {
        let applied = std::mem::take(&mut self.batch.operations);
        debug!(operations = applied.len(), "rolling back batch");

        for operation in applied.iter().rev() {
            let mut reversed = operation.get_reversed();
            reversed.set_base_version(self.version());
            if let Err(e) = self.apply_internal(reversed) {
                error!(error = %e, operation = operation.kind(), "rollback failed");
                break;
            }
        }

        {
            // Removed content lands at the front of the graveyard.
            let mut model = self.core.model.borrow_mut();
            let extra = model.graveyard().max_offset().saturating_sub(self.start_graveyard);
            if extra > 0 {
                if let Err(e) = model.remove(&graveyard_position(), extra) {
                    error!(error = %e, "could not clear rolled back content");
                }
            }
            model.version = self.start_version;
        }
        self.core.history.borrow_mut().truncate(self.start_version);
        *self.core.selection.borrow_mut() = self.start_selection.clone();
        self.core.discard_events_after(self.start_events);
        self.batch.operations.clear();
        self.changes.clear();
        self.touched.clear();
    }

    pub(crate) fn finish(self) -> (Batch, Vec<Change>) {
        (self.batch, self.changes)
    }
}
