//! # History
//!
//! The operation log plus the undo/redo stacks.
//!
//! ## Design
//!
//! - Every applied operation is logged; its index is its base version
//! - Undoable batches go onto the undo stack
//! - A new undoable batch clears the redo stack
//! - Undo pushes the batch it applied onto the redo stack, redo pushes
//!   back onto the undo stack without clearing redo

use crate::batch::Batch;
use crate::operation::Operation;

#[derive(Debug)]
pub struct History {
    /// Every applied operation (index == base version)
    operations: Vec<Operation>,

    /// Undoable batches (most recent last)
    undo_stack: Vec<Batch>,

    /// Batches applied by undo (most recent last)
    redo_stack: Vec<Batch>,

    /// Maximum number of undo levels (0 = unlimited)
    max_levels: usize,
}

impl History {
    pub fn new() -> Self {
        Self::with_max_levels(100)
    }

    pub fn with_max_levels(max_levels: usize) -> Self {
        Self {
            operations: Vec::new(),
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            max_levels,
        }
    }

    pub(crate) fn log(&mut self, operation: Operation) {
        debug_assert_eq!(operation.base_version(), self.operations.len() as u64);
        self.operations.push(operation);
    }

    /// Drop log entries past `version`, used when a batch is rolled back
    pub(crate) fn truncate(&mut self, version: u64) {
        self.operations.truncate(version as usize);
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Operations applied at or after `version`
    pub fn operations_since(&self, version: u64) -> &[Operation] {
        let start = (version as usize).min(self.operations.len());
        &self.operations[start..]
    }

    pub fn get_operation(&self, version: u64) -> Option<&Operation> {
        self.operations.get(version as usize)
    }

    pub(crate) fn push_undo(&mut self, batch: Batch) {
        self.push_undo_keep_redo(batch);
        self.redo_stack.clear();
    }

    pub(crate) fn push_undo_keep_redo(&mut self, batch: Batch) {
        self.undo_stack.push(batch);
        if self.max_levels > 0 && self.undo_stack.len() > self.max_levels {
            self.undo_stack.remove(0);
        }
    }

    pub(crate) fn push_redo(&mut self, batch: Batch) {
        self.redo_stack.push(batch);
    }

    pub(crate) fn pop_undo(&mut self) -> Option<Batch> {
        self.undo_stack.pop()
    }

    pub(crate) fn pop_redo(&mut self) -> Option<Batch> {
        self.redo_stack.pop()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_description(&self) -> Option<&str> {
        self.undo_stack.last().and_then(|batch| batch.description.as_deref())
    }

    pub fn redo_description(&self) -> Option<&str> {
        self.redo_stack.last().and_then(|batch| batch.description.as_deref())
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    /// Forget undo/redo state; the operation log is kept
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use crate::position::Position;

    fn batch(version: u64, description: &str) -> Batch {
        let mut batch = Batch::new().with_description(description);
        batch.push(Operation::insert(Position::at_start("main"), vec![Node::text("x")], version));
        batch
    }

    #[test]
    fn test_log_is_indexed_by_version() {
        let mut history = History::new();
        history.log(Operation::no_op(0));
        history.log(Operation::no_op(1));
        history.log(Operation::no_op(2));
        assert_eq!(history.operations_since(1).len(), 2);
        assert_eq!(history.operations_since(9).len(), 0);
        assert_eq!(history.get_operation(2), Some(&Operation::no_op(2)));

        history.truncate(1);
        assert_eq!(history.operations().len(), 1);
    }

    #[test]
    fn test_new_batch_clears_redo() {
        let mut history = History::new();
        history.push_undo(batch(0, "first"));
        let undone = history.pop_undo().unwrap();
        history.push_redo(undone);
        assert!(history.can_redo());
        assert_eq!(history.redo_description(), Some("first"));

        history.push_undo(batch(1, "second"));
        assert!(!history.can_redo());
        assert_eq!(history.undo_description(), Some("second"));
    }

    #[test]
    fn test_max_levels() {
        let mut history = History::with_max_levels(2);
        for version in 0..4 {
            history.push_undo(batch(version, &format!("batch {}", version)));
        }
        assert_eq!(history.undo_count(), 2);
        assert_eq!(history.undo_description(), Some("batch 3"));
    }
}
