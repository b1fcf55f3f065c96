//! # Positions
//!
//! A [`Position`] is an immutable address in the tree: a root name plus a
//! path of offsets. `path[i]` is the offset at depth `i`; the last entry is
//! the offset inside the deepest element (which may fall inside a text
//! node).
//!
//! Positions never hold references into the tree. Every method that needs
//! the tree takes a [`Model`] and resolves the path on demand, failing with
//! [`ModelError::InvalidAddress`] when the path no longer resolves.
//!
//! The remap rules (`transformed_by_*`) are the single place where the
//! effect of a structural change on an address is decided. Operations and
//! tracked objects only call into them.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use crate::errors::{ModelError, ModelResult};
use crate::model::Model;
use crate::node::{Element, Node};
use crate::operation::Operation;

/// Tie-break rule for content inserted exactly at a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stickiness {
    /// Moves with content inserted at the position
    #[default]
    ToNone,
    /// Sticks to the node before, so it stays put on insertion
    ToPrevious,
    /// Sticks to the node after, so it moves along with it
    ToNext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub root: String,
    pub path: Vec<usize>,
    #[serde(default, skip_serializing_if = "is_default_stickiness")]
    pub stickiness: Stickiness,
}

fn is_default_stickiness(stickiness: &Stickiness) -> bool {
    *stickiness == Stickiness::ToNone
}

impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root && self.path == other.path
    }
}

impl Eq for Position {}

impl Hash for Position {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.root.hash(state);
        self.path.hash(state);
    }
}

impl PartialOrd for Position {
    /// Positions in different roots are unordered
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.compare_with(other).ok()
    }
}

impl Position {
    /// Create a position. The path must contain at least the offset.
    pub fn new(root: impl Into<String>, path: Vec<usize>) -> Self {
        debug_assert!(!path.is_empty(), "position path cannot be empty");
        Self {
            root: root.into(),
            path,
            stickiness: Stickiness::ToNone,
        }
    }

    pub fn at_start(root: impl Into<String>) -> Self {
        Self::new(root, vec![0])
    }

    /// Position at `offset` inside the element at `parent_path`
    pub fn in_parent(root: impl Into<String>, parent_path: &[usize], offset: usize) -> Self {
        let mut path = parent_path.to_vec();
        path.push(offset);
        Self::new(root, path)
    }

    pub fn with_stickiness(mut self, stickiness: Stickiness) -> Self {
        self.stickiness = stickiness;
        self
    }

    pub fn offset(&self) -> usize {
        self.path.last().copied().unwrap_or(0)
    }

    pub fn set_offset(&mut self, offset: usize) {
        if let Some(last) = self.path.last_mut() {
            *last = offset;
        }
    }

    pub fn parent_path(&self) -> &[usize] {
        &self.path[..self.path.len().saturating_sub(1)]
    }

    pub fn depth(&self) -> usize {
        self.path.len()
    }

    pub fn compare_with(&self, other: &Position) -> ModelResult<Ordering> {
        if self.root != other.root {
            return Err(ModelError::InvalidRoot(self.root.clone(), other.root.clone()));
        }
        Ok(self.path.cmp(&other.path))
    }

    pub fn is_before(&self, other: &Position) -> bool {
        matches!(self.compare_with(other), Ok(Ordering::Less))
    }

    pub fn is_after(&self, other: &Position) -> bool {
        matches!(self.compare_with(other), Ok(Ordering::Greater))
    }

    pub fn is_equal(&self, other: &Position) -> bool {
        self == other
    }

    pub fn has_same_parent_as(&self, other: &Position) -> bool {
        self.root == other.root && self.parent_path() == other.parent_path()
    }

    /// Same parent, offset moved by `shift` (clamped at zero)
    pub fn get_shifted_by(&self, shift: isize) -> Position {
        let mut shifted = self.clone();
        let offset = self.offset() as isize + shift;
        shifted.set_offset(offset.max(0) as usize);
        shifted
    }

    /// Longest common path prefix, empty for different roots
    pub fn get_common_path(&self, other: &Position) -> Vec<usize> {
        if self.root != other.root {
            return Vec::new();
        }
        self.path
            .iter()
            .zip(&other.path)
            .take_while(|(a, b)| a == b)
            .map(|(a, _)| *a)
            .collect()
    }

    pub fn parent<'a>(&self, model: &'a Model) -> ModelResult<&'a Element> {
        model.element_at(&self.root, self.parent_path())
    }

    /// Whether the path resolves and the offset fits its parent
    pub fn is_valid(&self, model: &Model) -> bool {
        self.parent(model)
            .map(|parent| self.offset() <= parent.max_offset())
            .unwrap_or(false)
    }

    pub fn node_before<'a>(&self, model: &'a Model) -> ModelResult<Option<&'a Node>> {
        Ok(self.parent(model)?.node_before(self.offset()))
    }

    pub fn node_after<'a>(&self, model: &'a Model) -> ModelResult<Option<&'a Node>> {
        Ok(self.parent(model)?.node_after(self.offset()))
    }

    /// Text node that the position is strictly inside of
    pub fn text_node<'a>(&self, model: &'a Model) -> ModelResult<Option<&'a Node>> {
        let parent = self.parent(model)?;
        Ok(parent
            .text_node_at(self.offset())
            .map(|(index, _)| &parent.children()[index]))
    }

    /// Elements from the root down to the parent of this position
    pub fn get_ancestors<'a>(&self, model: &'a Model) -> ModelResult<Vec<&'a Element>> {
        let parent_path = self.parent_path();
        (0..=parent_path.len())
            .map(|depth| model.element_at(&self.root, &parent_path[..depth]))
            .collect()
    }

    /// Deepest element containing both positions
    pub fn get_common_ancestor<'a>(
        &self,
        model: &'a Model,
        other: &Position,
    ) -> ModelResult<Option<&'a Element>> {
        if self.root != other.root {
            return Ok(None);
        }
        let common: Vec<usize> = self
            .parent_path()
            .iter()
            .zip(other.parent_path())
            .take_while(|(a, b)| a == b)
            .map(|(a, _)| *a)
            .collect();
        model.element_at(&self.root, &common).map(Some)
    }

    /// True when only element boundaries lie between the two positions
    pub fn is_touching(&self, model: &Model, other: &Position) -> ModelResult<bool> {
        let ordering = self.compare_with(other)?;
        let (left, right) = match ordering {
            Ordering::Equal => return Ok(true),
            Ordering::Less => (self, other),
            Ordering::Greater => (other, self),
        };

        let mut left_path = left.path.clone();
        let mut right_path = right.path.clone();

        while !left_path.is_empty() && !right_path.is_empty() {
            if left_path == right_path {
                return Ok(true);
            }
            if left_path.len() > right_path.len() {
                let depth = left_path.len() - 1;
                let parent = model.element_at(&left.root, &left_path[..depth])?;
                if left_path[depth] != parent.max_offset() {
                    return Ok(false);
                }
                left_path.pop();
                if let Some(last) = left_path.last_mut() {
                    *last += 1;
                }
            } else {
                if right_path.last() != Some(&0) {
                    return Ok(false);
                }
                right_path.pop();
            }
        }
        Ok(left_path == right_path)
    }

    /// Remap through the given operation
    pub fn get_transformed_by_operation(&self, operation: &Operation) -> Position {
        operation.affects_position(self)
    }

    /// Remap through `how_many` offsets inserted at `insert_position`
    pub fn transformed_by_insertion(
        &self,
        insert_position: &Position,
        how_many: usize,
    ) -> Position {
        let mut transformed = self.clone();
        if self.root != insert_position.root {
            return transformed;
        }

        let insert_parent = insert_position.parent_path();
        if insert_parent == self.parent_path() {
            if insert_position.offset() < self.offset()
                || (insert_position.offset() == self.offset()
                    && self.stickiness != Stickiness::ToPrevious)
            {
                transformed.set_offset(self.offset() + how_many);
            }
        } else if is_strict_prefix(insert_parent, self.parent_path()) {
            let depth = insert_position.path.len() - 1;
            if insert_position.offset() <= self.path[depth] {
                transformed.path[depth] += how_many;
            }
        }
        transformed
    }

    /// Remap through `how_many` offsets removed at `delete_position`.
    ///
    /// Returns `None` when the position was inside the removed content.
    pub fn transformed_by_deletion(
        &self,
        delete_position: &Position,
        how_many: usize,
    ) -> Option<Position> {
        let mut transformed = self.clone();
        if self.root != delete_position.root {
            return Some(transformed);
        }

        let delete_parent = delete_position.parent_path();
        if delete_parent == self.parent_path() {
            if delete_position.offset() < self.offset() {
                if delete_position.offset() + how_many > self.offset() {
                    return None;
                }
                transformed.set_offset(self.offset() - how_many);
            }
        } else if is_strict_prefix(delete_parent, self.parent_path()) {
            let depth = delete_position.path.len() - 1;
            if delete_position.offset() <= self.path[depth] {
                if delete_position.offset() + how_many > self.path[depth] {
                    return None;
                }
                transformed.path[depth] -= how_many;
            }
        }
        Some(transformed)
    }

    /// Remap through a move of `how_many` offsets from `source` to `target`.
    ///
    /// `target` is given in pre-move coordinates.
    pub fn transformed_by_move(
        &self,
        source: &Position,
        target: &Position,
        how_many: usize,
    ) -> Position {
        let target = target
            .transformed_by_deletion(source, how_many)
            .unwrap_or_else(|| target.clone());

        if source == &target {
            return self.clone();
        }

        let after_deletion = self.transformed_by_deletion(source, how_many);
        let is_moved = match &after_deletion {
            None => true,
            Some(_) => {
                (source == self && self.stickiness == Stickiness::ToNext)
                    || (source.get_shifted_by(how_many as isize) == *self
                        && self.stickiness == Stickiness::ToPrevious)
            }
        };

        match after_deletion {
            Some(position) if !is_moved => position.transformed_by_insertion(&target, how_many),
            _ => self.combined(source, &target),
        }
    }

    /// Re-bases this position, which is inside content starting at
    /// `source`, onto the same relative place at `target`
    pub fn combined(&self, source: &Position, target: &Position) -> Position {
        let depth = source.path.len() - 1;
        let mut path = target.path.clone();
        let relative = self.path[depth] - source.offset();
        if let Some(last) = path.last_mut() {
            *last += relative;
        }
        path.extend_from_slice(&self.path[depth + 1..]);
        Position {
            root: target.root.clone(),
            path,
            stickiness: self.stickiness,
        }
    }
}

fn is_strict_prefix(prefix: &[usize], path: &[usize]) -> bool {
    prefix.len() < path.len() && path.starts_with(prefix)
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{:?}", self.root, self.path)
    }
}
