//! Change records and document observers.

use serde_json::Value;

use crate::batch::Batch;
use crate::position::Position;
use crate::range::Range;

/// What a single applied operation changed
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Insert {
        position: Position,
        length: usize,
    },
    Remove {
        position: Position,
        length: usize,
    },
    Move {
        source: Position,
        /// Start of the moved content after the move
        target: Position,
        length: usize,
    },
    Attribute {
        range: Range,
        key: String,
        old_value: Option<Value>,
        new_value: Option<Value>,
    },
    Rename {
        position: Position,
        old_name: String,
        new_name: String,
    },
    Marker {
        name: String,
        old_range: Option<Range>,
        new_range: Option<Range>,
    },
    Root {
        name: String,
        attached: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// Fired once per batch after the tree, tracked references and the
    /// selection are consistent
    BatchApplied { batch: Batch, changes: Vec<Change> },

    /// `direct` is false when the change came from remapping
    SelectionRangeChanged { direct: bool },

    SelectionAttributesChanged { direct: bool, keys: Vec<String> },
}

/// Receives document events after each batch
pub trait DocumentObserver {
    fn on_change(&self, event: &ChangeEvent);
}

impl<F> DocumentObserver for F
where
    F: Fn(&ChangeEvent),
{
    fn on_change(&self, event: &ChangeEvent) {
        self(event)
    }
}

/// Handle returned when registering an observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u64);
