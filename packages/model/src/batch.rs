//! Batches group the operations of one user action.

use serde::{Deserialize, Serialize};

use crate::operation::Operation;

/// Where a batch came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BatchKind {
    #[default]
    Local,
    Undo,
    Redo,
    Remote,
}

/// Operations applied together (in application order)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub operations: Vec<Operation>,
    pub description: Option<String>,
    /// Whether the batch goes onto the undo stack
    pub undoable: bool,
    pub kind: BatchKind,
}

impl Batch {
    pub fn new() -> Self {
        Self {
            operations: Vec::new(),
            description: None,
            undoable: true,
            kind: BatchKind::Local,
        }
    }

    pub fn of_kind(kind: BatchKind) -> Self {
        Self {
            kind,
            undoable: kind == BatchKind::Local,
            ..Self::new()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn not_undoable(mut self) -> Self {
        self.undoable = false;
        self
    }

    pub fn push(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Version the first operation was based on
    pub fn base_version(&self) -> Option<u64> {
        self.operations.first().map(Operation::base_version)
    }

    /// Version reached after the last operation
    pub fn end_version(&self) -> Option<u64> {
        self.operations.last().map(|op| op.base_version() + 1)
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}
