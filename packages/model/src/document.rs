//! # Document Handle
//!
//! A [`Document`] owns the model, its history, the tracked references and
//! the selection. It is a cheap, cloneable handle; tracked references keep
//! a weak link back to it.
//!
//! ## Lifecycle of a change
//!
//! ```text
//! change(f) → Writer::apply(op) → validate → apply → log → remap tracked
//!                                                        → remap selection
//!           → clear stored selection attributes → record undo step
//!           → notify observers (BatchApplied)
//! ```
//!
//! Observers run after the batch, with no internal borrow held, so they
//! can read the document. The application guard stays set until every
//! observer has returned: starting a change, an undo, a redo or a
//! selection write while another one is being applied, including from an
//! observer, fails with [`ModelError::ApplicationInProgress`].

use std::cell::{Cell, Ref, RefCell};
use std::path::Path;
use std::rc::Rc;
use tracing::{debug, info, instrument, warn};

use crate::batch::{Batch, BatchKind};
use crate::config::EditorConfig;
use crate::errors::{ModelError, ModelResult};
use crate::history::History;
use crate::model::Model;
use crate::observer::{ChangeEvent, DocumentObserver, ObserverId};
use crate::operation::Operation;
use crate::position::Position;
use crate::range::Range;
use crate::schema::Schema;
use crate::selection::{DocumentSelection, Selection, SelectionState};
use crate::tracked::{TrackedEntry, TrackedPosition, TrackedRange, TrackedRegistry};
use crate::transform::{transform_sets, TransformContext};
use crate::writer::Writer;

pub(crate) struct DocumentCore {
    pub(crate) config: EditorConfig,
    pub(crate) schema: Schema,
    pub(crate) model: RefCell<Model>,
    pub(crate) history: RefCell<History>,
    pub(crate) tracked: RefCell<TrackedRegistry>,
    pub(crate) selection: RefCell<SelectionState>,
    observers: RefCell<Vec<(ObserverId, Rc<dyn DocumentObserver>)>>,
    next_observer_id: Cell<u64>,
    applying: Cell<bool>,
    pending_events: RefCell<Vec<ChangeEvent>>,
}

impl DocumentCore {
    pub(crate) fn queue_events(&self, events: impl IntoIterator<Item = ChangeEvent>) {
        self.pending_events.borrow_mut().extend(events);
    }

    pub(crate) fn pending_event_count(&self) -> usize {
        self.pending_events.borrow().len()
    }

    /// Drop events queued after the first `count`
    pub(crate) fn discard_events_after(&self, count: usize) {
        self.pending_events.borrow_mut().truncate(count);
    }
}

/// Holds the application flag; released on drop
struct ApplicationGuard<'a> {
    flag: &'a Cell<bool>,
}

impl<'a> ApplicationGuard<'a> {
    fn acquire(flag: &'a Cell<bool>) -> ModelResult<Self> {
        if flag.replace(true) {
            return Err(ModelError::ApplicationInProgress);
        }
        Ok(Self { flag })
    }
}

impl Drop for ApplicationGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

/// Editable document
#[derive(Clone)]
pub struct Document {
    core: Rc<DocumentCore>,
}

impl Document {
    pub fn new() -> Self {
        Self::with_config(EditorConfig::default())
    }

    pub fn with_config(config: EditorConfig) -> Self {
        let model = Model::new(config.main_root.clone());
        let schema = Schema::from_config(&config.schema);
        let selection =
            SelectionState::new(&model, &schema, config.selection_attribute_prefix.clone());
        let history = History::with_max_levels(config.history_limit);

        Self {
            core: Rc::new(DocumentCore {
                config,
                schema,
                model: RefCell::new(model),
                history: RefCell::new(history),
                tracked: RefCell::new(TrackedRegistry::default()),
                selection: RefCell::new(selection),
                observers: RefCell::new(Vec::new()),
                next_observer_id: Cell::new(0),
                applying: Cell::new(false),
                pending_events: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Create a document configured from `folio.config.json` in `dir`
    pub fn load_config(dir: impl AsRef<Path>) -> ModelResult<Self> {
        Ok(Self::with_config(EditorConfig::load(dir)?))
    }

    pub fn config(&self) -> &EditorConfig {
        &self.core.config
    }

    pub fn schema(&self) -> &Schema {
        &self.core.schema
    }

    /// Read access to the tree. Drop the guard before starting a change.
    pub fn model(&self) -> Ref<'_, Model> {
        self.core.model.borrow()
    }

    pub fn version(&self) -> u64 {
        self.core.model.borrow().version()
    }

    pub fn history(&self) -> Ref<'_, History> {
        self.core.history.borrow()
    }

    pub fn selection(&self) -> DocumentSelection<'_> {
        DocumentSelection::new(self)
    }

    pub(crate) fn selection_state(&self) -> Ref<'_, SelectionState> {
        self.core.selection.borrow()
    }

    pub fn is_applying(&self) -> bool {
        self.core.applying.get()
    }

    pub fn can_undo(&self) -> bool {
        self.core.history.borrow().can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.core.history.borrow().can_redo()
    }

    pub fn add_observer(&self, observer: impl DocumentObserver + 'static) -> ObserverId {
        let id = ObserverId(self.core.next_observer_id.get());
        self.core.next_observer_id.set(id.0 + 1);
        let observer: Rc<dyn DocumentObserver> = Rc::new(observer);
        self.core.observers.borrow_mut().push((id, observer));
        id
    }

    pub fn remove_observer(&self, id: ObserverId) {
        self.core.observers.borrow_mut().retain(|(observer_id, _)| *observer_id != id);
    }

    /// Start tracking a position
    pub fn track_position(&self, position: Position) -> ModelResult<TrackedPosition> {
        if !position.is_valid(&self.model()) {
            return Err(ModelError::address(format!("cannot track {}", position)));
        }
        let id = self.core.tracked.borrow_mut().insert(TrackedEntry::Position(position));
        Ok(TrackedPosition::new(id, Rc::downgrade(&self.core)))
    }

    /// Start tracking a range
    pub fn track_range(&self, range: Range) -> ModelResult<TrackedRange> {
        {
            let model = self.model();
            if !range.start.is_valid(&model) || !range.end.is_valid(&model) {
                return Err(ModelError::address(format!("cannot track {}", range)));
            }
        }
        let id = self.core.tracked.borrow_mut().insert(TrackedEntry::Range(range));
        Ok(TrackedRange::new(id, Rc::downgrade(&self.core)))
    }

    pub fn tracked_count(&self) -> usize {
        self.core.tracked.borrow().len()
    }

    /// Run `f` as one undoable batch
    pub fn change<R>(&self, f: impl FnOnce(&mut Writer<'_>) -> ModelResult<R>) -> ModelResult<R> {
        self.change_with_batch(Batch::new(), f)
    }

    /// Run `f` in the given batch (description, undoable flag)
    pub fn change_with_batch<R>(
        &self,
        batch: Batch,
        f: impl FnOnce(&mut Writer<'_>) -> ModelResult<R>,
    ) -> ModelResult<R> {
        self.run_batch(batch, f).map(|(value, _)| value)
    }

    /// Apply a single local operation based on the current version
    pub fn apply_operation(&self, operation: Operation) -> ModelResult<()> {
        self.change(|writer| writer.apply_operation(operation))
    }

    /// Apply an operation from another writer, rebasing it first when it
    /// was based on an older version
    pub fn apply_remote(&self, operation: Operation) -> ModelResult<()> {
        self.apply_remote_batch(vec![operation])
    }

    #[instrument(skip(self, operations), fields(count = operations.len()))]
    pub fn apply_remote_batch(&self, operations: Vec<Operation>) -> ModelResult<()> {
        if self.is_applying() {
            return Err(ModelError::ApplicationInProgress);
        }
        let Some(base_version) = operations.first().map(Operation::base_version) else {
            return Ok(());
        };
        let version = self.version();
        if base_version > version {
            return Err(ModelError::OperationVersionConflict {
                operation: base_version,
                document: version,
            });
        }

        let operations = if base_version < version {
            let history = self.core.history.borrow();
            let since = history.operations_since(base_version);
            debug!(base_version, rebased_over = since.len(), "rebasing remote operations");
            transform_sets(&operations, since, TransformContext::default())
        } else {
            operations
        };

        self.run_batch(Batch::of_kind(BatchKind::Remote), |writer| {
            for operation in operations {
                writer.apply_operation(operation)?;
            }
            Ok(())
        })
        .map(|_| ())
    }

    /// Undo the most recent undoable batch.
    ///
    /// Returns `Ok(false)` when there is nothing to undo.
    #[instrument(skip(self))]
    pub fn undo(&self) -> ModelResult<bool> {
        if self.is_applying() {
            return Err(ModelError::ApplicationInProgress);
        }
        let Some(batch) = self.core.history.borrow_mut().pop_undo() else {
            return Ok(false);
        };

        let applied = self.apply_reversal(&batch, BatchKind::Undo)?;
        self.core.history.borrow_mut().push_redo(applied);
        info!(description = ?batch.description, "undo applied");
        Ok(true)
    }

    /// Redo the most recently undone batch
    #[instrument(skip(self))]
    pub fn redo(&self) -> ModelResult<bool> {
        if self.is_applying() {
            return Err(ModelError::ApplicationInProgress);
        }
        let Some(batch) = self.core.history.borrow_mut().pop_redo() else {
            return Ok(false);
        };

        let applied = self.apply_reversal(&batch, BatchKind::Redo)?;
        self.core.history.borrow_mut().push_undo_keep_redo(applied);
        info!(description = ?batch.description, "redo applied");
        Ok(true)
    }

    /// Apply the reversal of `batch`, rebased over everything applied since
    fn apply_reversal(&self, batch: &Batch, kind: BatchKind) -> ModelResult<Batch> {
        let Some(end_version) = batch.end_version() else {
            return Ok(Batch::of_kind(kind));
        };

        let mut reversed: Vec<Operation> =
            batch.operations.iter().rev().map(Operation::get_reversed).collect();
        for (index, operation) in reversed.iter_mut().enumerate() {
            operation.set_base_version(end_version + index as u64);
        }
        let operations = {
            let history = self.core.history.borrow();
            let later = history.operations_since(end_version);
            if later.is_empty() {
                reversed
            } else {
                transform_sets(&reversed, later, TransformContext::default())
            }
        };

        let reverts_something = batch.operations.iter().any(|op| !op.is_no_op());
        if reverts_something && operations.iter().all(Operation::is_no_op) {
            let error = ModelError::StaleInversion(format!(
                "every reversed operation of {:?} targets removed content",
                batch.description
            ));
            warn!(error = %error, "history step dropped");
            return Err(error);
        }

        let mut reversal = Batch::of_kind(kind);
        reversal.description = batch.description.clone();
        let result = self.run_batch(reversal, |writer| {
            for operation in operations {
                writer
                    .apply_operation(operation)
                    .map_err(|error| ModelError::StaleInversion(error.to_string()))?;
            }
            Ok(())
        });

        match result {
            Ok(((), applied)) => Ok(applied),
            Err(error) => {
                warn!(error = %error, "history step dropped");
                Err(error)
            }
        }
    }

    pub(crate) fn set_selection(&self, selection: Selection) -> ModelResult<()> {
        let _guard = ApplicationGuard::acquire(&self.core.applying)?;
        let events = {
            let model = self.core.model.borrow();
            self.core
                .selection
                .borrow_mut()
                .set_selection(&model, &self.core.schema, selection)?
        };
        self.core.queue_events(events);
        self.flush_events();
        Ok(())
    }

    pub(crate) fn set_selection_focus(&self, focus: Position) -> ModelResult<()> {
        let _guard = ApplicationGuard::acquire(&self.core.applying)?;
        let events = {
            let model = self.core.model.borrow();
            self.core
                .selection
                .borrow_mut()
                .set_focus(&model, &self.core.schema, focus)?
        };
        self.core.queue_events(events);
        self.flush_events();
        Ok(())
    }

    fn run_batch<R>(
        &self,
        batch: Batch,
        f: impl FnOnce(&mut Writer<'_>) -> ModelResult<R>,
    ) -> ModelResult<(R, Batch)> {
        let _guard = ApplicationGuard::acquire(&self.core.applying)?;

        let mut writer = Writer::new(&self.core, batch);
        let result = f(&mut writer).and_then(|value| {
            writer.clear_stored_selection_attributes()?;
            Ok(value)
        });
        let result = match result {
            Ok(value) => Ok(value),
            Err(error) => {
                warn!(
                    error = %error,
                    structural = error.is_structural(),
                    applied = writer.batch().operations.len(),
                    "change failed, rolling back"
                );
                writer.rollback();
                Err(error)
            }
        };
        let (batch, changes) = writer.finish();

        if !batch.is_empty() {
            if result.is_ok() && batch.undoable {
                self.core.history.borrow_mut().push_undo(batch.clone());
            }
            debug!(
                kind = ?batch.kind,
                operations = batch.operations.len(),
                version = self.core.model.borrow().version(),
                "batch applied"
            );
            self.core.queue_events([ChangeEvent::BatchApplied {
                batch: batch.clone(),
                changes,
            }]);
        }

        self.flush_events();
        result.map(|value| (value, batch))
    }

    /// Notify observers of queued events. Called with the application
    /// guard held.
    fn flush_events(&self) {
        let events: Vec<ChangeEvent> = self.core.pending_events.borrow_mut().drain(..).collect();
        if events.is_empty() {
            return;
        }
        let observers: Vec<Rc<dyn DocumentObserver>> = self
            .core
            .observers
            .borrow()
            .iter()
            .map(|(_, observer)| Rc::clone(observer))
            .collect();
        for event in &events {
            for observer in &observers {
                observer.on_change(event);
            }
        }
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("version", &self.version())
            .field("applying", &self.is_applying())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Element, Node};

    fn pos(path: &[usize]) -> Position {
        Position::new("main", path.to_vec())
    }

    fn document_with_paragraph(text: &str) -> Document {
        let document = Document::new();
        document
            .change(|writer| {
                let paragraph = Element::new("paragraph").with_children(vec![Node::text(text)]);
                writer.insert(&pos(&[0]), vec![paragraph.into()])
            })
            .unwrap();
        document
    }

    #[test]
    fn test_change_records_undo_step() {
        let document = document_with_paragraph("abc");
        assert_eq!(document.version(), 1);
        assert!(document.can_undo());
        assert_eq!(document.history().operations().len(), 1);
    }

    #[test]
    fn test_nested_change_is_rejected() {
        let document = Document::new();
        let inner = document.clone();
        let result = document.change(|_| {
            Ok(matches!(
                inner.change(|_| Ok(())),
                Err(ModelError::ApplicationInProgress)
            ))
        });
        assert_eq!(result.unwrap(), true);
        assert!(!document.is_applying());
    }

    #[test]
    fn test_failed_change_rolls_back() {
        let document = document_with_paragraph("abc");
        let result = document.change(|writer| {
            writer.insert(&pos(&[0, 1]), vec![Node::text("x")])?;
            writer.insert(&pos(&[7, 0]), vec![Node::text("y")])
        });
        assert!(result.is_err());
        assert_eq!(document.model().main_root().text_content(), "abc");
        assert_eq!(document.history().undo_count(), 1);
    }

    #[test]
    fn test_tracked_position_follows_insertion() {
        let document = document_with_paragraph("abc");
        let tracked = document.track_position(pos(&[0, 2])).unwrap();
        document
            .change(|writer| writer.insert(&pos(&[0, 0]), vec![Node::text("xy")]))
            .unwrap();
        assert_eq!(tracked.position().unwrap(), pos(&[0, 4]));

        tracked.detach();
        assert_eq!(document.tracked_count(), 0);
    }

    #[test]
    fn test_tracked_position_outlives_document() {
        let tracked = {
            let document = Document::new();
            document.track_position(pos(&[0])).unwrap()
        };
        assert!(matches!(tracked.position(), Err(ModelError::DocumentDropped)));
    }

    #[test]
    fn test_undo_redo() {
        let document = document_with_paragraph("abc");
        document
            .change(|writer| writer.insert(&pos(&[0, 3]), vec![Node::text("d")]))
            .unwrap();

        assert!(document.undo().unwrap());
        assert_eq!(document.model().main_root().text_content(), "abc");
        assert!(document.can_redo());

        assert!(document.redo().unwrap());
        assert_eq!(document.model().main_root().text_content(), "abcd");
        assert!(!document.can_redo());

        assert!(document.undo().unwrap());
        assert!(document.undo().unwrap());
        assert!(document.model().main_root().is_empty());
        assert!(!document.undo().unwrap());
    }

    #[test]
    fn test_remote_operation_is_rebased() {
        let document = document_with_paragraph("abc");
        document
            .change(|writer| writer.insert(&pos(&[0, 0]), vec![Node::text("xy")]))
            .unwrap();

        // Based on version 1: insert "!" after "c".
        let remote = Operation::insert(pos(&[0, 3]), vec![Node::text("!")], 1);
        document.apply_remote(remote).unwrap();
        assert_eq!(document.model().main_root().text_content(), "xyabc!");
        assert_eq!(document.version(), 3);
    }

    #[test]
    fn test_remote_from_the_future_is_rejected() {
        let document = Document::new();
        let remote = Operation::insert(pos(&[0]), vec![Node::element("paragraph")], 5);
        assert!(matches!(
            document.apply_remote(remote),
            Err(ModelError::OperationVersionConflict { operation: 5, document: 0 })
        ));
    }
}
