//! # Folio Model
//!
//! Tree document model for rich-text editing.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ composer: delete contents, modify selection │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ document: Document + Writer                 │
//! │  - Batches, history, undo/redo              │
//! │  - Tracked positions/ranges, selection      │
//! │  - Remote replay through transformation     │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ operation: Insert / Move / Attribute / ...  │
//! │ position, range, walker over the Model      │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **Operations are the only mutation**: every edit is an operation that
//!    can be logged, reversed and transformed
//! 2. **Offsets, not indices**: an element counts as one offset, text as one
//!    offset per char
//! 3. **Removed content is kept**: removal moves content to the graveyard
//!    root, so it can come back
//! 4. **Versions are operation counts**: each applied operation bumps the
//!    document version by one
//!
//! ## Usage
//!
//! ```rust,ignore
//! use folio_model::{Document, Element, Node, Position};
//!
//! let document = Document::new();
//! document.change(|writer| {
//!     let paragraph = Element::new("paragraph").with_children(vec![Node::text("foo")]);
//!     writer.insert(&Position::new("main", vec![0]), vec![paragraph.into()])
//! })?;
//!
//! let cursor = document.track_position(Position::new("main", vec![0, 3]))?;
//! document.undo()?;
//! ```

mod batch;
mod composer;
mod config;
pub mod dev_utils;
mod document;
mod errors;
mod history;
mod model;
mod node;
mod observer;
mod operation;
mod position;
mod range;
mod schema;
mod selection;
mod tracked;
mod transform;
mod walker;
mod writer;

pub use batch::{Batch, BatchKind};
pub use composer::{
    Composer, ContentDeletionStrategy, DefaultDeletion, DefaultModification, DeleteOptions,
    ModifyOptions, Outcome, SelectionModificationStrategy, Unit,
};
pub use config::{EditorConfig, SchemaConfig, DEFAULT_CONFIG_NAME};
pub use document::Document;
pub use errors::{ModelError, ModelResult};
pub use history::History;
pub use model::{Marker, Model, RootEntry, GRAVEYARD, ROOT_ELEMENT};
pub use node::{offset_size_of, Attributes, Element, Node, Text};
pub use observer::{Change, ChangeEvent, DocumentObserver, ObserverId};
pub use operation::{
    graveyard_position, AttributeOperation, InsertOperation, MarkerOperation, MoveOperation,
    NoOperation, Operation, RenameOperation, RootOperation,
};
pub use position::{Position, Stickiness};
pub use range::Range;
pub use schema::Schema;
pub use selection::{AttributePriority, DocumentSelection, Selection};
pub use tracked::{TrackedPosition, TrackedRange};
pub use transform::{transform, transform_sets, TransformContext};
pub use walker::{
    Direction, StepKind, TextProxy, TreeWalker, WalkerItem, WalkerOptions, WalkerValue,
};
pub use writer::Writer;
