//! # Tracked Positions and Ranges
//!
//! Positions and ranges registered with a document and remapped after
//! every applied operation. They are created through
//! [`Document::track_position`](crate::Document::track_position) and
//! [`Document::track_range`](crate::Document::track_range) and unregister
//! when detached or dropped.

use std::collections::BTreeMap;
use std::rc::Weak;

use crate::document::DocumentCore;
use crate::errors::{ModelError, ModelResult};
use crate::operation::Operation;
use crate::position::Position;
use crate::range::Range;

#[derive(Debug, Clone)]
pub(crate) enum TrackedEntry {
    Position(Position),
    Range(Range),
}

#[derive(Debug, Default)]
pub(crate) struct TrackedRegistry {
    entries: BTreeMap<u64, TrackedEntry>,
    next_id: u64,
}

impl TrackedRegistry {
    pub(crate) fn insert(&mut self, entry: TrackedEntry) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, entry);
        id
    }

    pub(crate) fn remove(&mut self, id: u64) {
        self.entries.remove(&id);
    }

    pub(crate) fn get(&self, id: u64) -> Option<&TrackedEntry> {
        self.entries.get(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn remap(&mut self, operation: &Operation) {
        for entry in self.entries.values_mut() {
            match entry {
                TrackedEntry::Position(position) => {
                    *position = operation.affects_position(position);
                }
                TrackedEntry::Range(range) => {
                    let pieces = range.get_transformed_by_operation(operation, false);
                    if let Some(joined) = Range::from_ranges(&pieces) {
                        *range = joined;
                    }
                }
            }
        }
    }
}

fn lookup(core: &Weak<DocumentCore>, id: u64) -> ModelResult<TrackedEntry> {
    let core = core.upgrade().ok_or(ModelError::DocumentDropped)?;
    let registry = core.tracked.borrow();
    registry
        .get(id)
        .cloned()
        .ok_or_else(|| ModelError::address(format!("tracked entry {} is detached", id)))
}

fn unregister(core: &Weak<DocumentCore>, id: u64) {
    if let Some(core) = core.upgrade() {
        if let Ok(mut registry) = core.tracked.try_borrow_mut() {
            registry.remove(id);
        }
    }
}

/// Position kept up to date by its document
#[derive(Debug)]
pub struct TrackedPosition {
    id: u64,
    core: Weak<DocumentCore>,
}

impl TrackedPosition {
    pub(crate) fn new(id: u64, core: Weak<DocumentCore>) -> Self {
        Self { id, core }
    }

    /// Current value of the position
    pub fn position(&self) -> ModelResult<Position> {
        match lookup(&self.core, self.id)? {
            TrackedEntry::Position(position) => Ok(position),
            TrackedEntry::Range(_) => Err(ModelError::address("tracked entry is a range")),
        }
    }

    /// Stop tracking
    pub fn detach(self) {}
}

impl Drop for TrackedPosition {
    fn drop(&mut self) {
        unregister(&self.core, self.id);
    }
}

/// Range kept up to date by its document
#[derive(Debug)]
pub struct TrackedRange {
    id: u64,
    core: Weak<DocumentCore>,
}

impl TrackedRange {
    pub(crate) fn new(id: u64, core: Weak<DocumentCore>) -> Self {
        Self { id, core }
    }

    pub fn range(&self) -> ModelResult<Range> {
        match lookup(&self.core, self.id)? {
            TrackedEntry::Range(range) => Ok(range),
            TrackedEntry::Position(_) => Err(ModelError::address("tracked entry is a position")),
        }
    }

    pub fn detach(self) {}
}

impl Drop for TrackedRange {
    fn drop(&mut self) {
        unregister(&self.core, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use crate::position::Stickiness;

    fn pos(path: &[usize]) -> Position {
        Position::new("main", path.to_vec())
    }

    #[test]
    fn test_registry_remaps_entries() {
        let mut registry = TrackedRegistry::default();
        let position = registry.insert(TrackedEntry::Position(pos(&[3])));
        let sticky = pos(&[1]).with_stickiness(Stickiness::ToPrevious);
        let sticky = registry.insert(TrackedEntry::Position(sticky));
        let range = registry.insert(TrackedEntry::Range(Range::new(pos(&[1]), pos(&[4]))));

        registry.remap(&Operation::insert(pos(&[1]), vec![Node::text("ab")], 0));

        let at = |id: u64, expected: Position| {
            matches!(registry.get(id), Some(TrackedEntry::Position(p)) if *p == expected)
        };
        assert!(at(position, pos(&[5])));
        assert!(at(sticky, pos(&[1])));
        assert!(matches!(
            registry.get(range),
            Some(TrackedEntry::Range(r)) if *r == Range::new(pos(&[3]), pos(&[6]))
        ));

        registry.remove(position);
        assert_eq!(registry.len(), 2);
    }
}
