//! # Content Composer
//!
//! High-level editing algorithms built only from writer operations and the
//! tree walker:
//! - [`Composer::delete_contents`] removes what a selection covers and
//!   merges the elements it cut through
//! - [`Composer::modify_selection`] moves the selection focus by one unit
//!
//! ## Design
//!
//! Each algorithm is a chain of strategies. Custom strategies are
//! registered with a priority and tried from the highest priority down; the
//! first one returning [`Outcome::Handled`] wins. The built-in strategy
//! runs last and always handles.

mod delete;
mod modify;

pub use delete::{DefaultDeletion, DeleteOptions};
pub use modify::{DefaultModification, ModifyOptions, Unit};

use tracing::debug;

use crate::document::Document;
use crate::errors::ModelResult;
use crate::model::Model;
use crate::schema::Schema;
use crate::selection::Selection;
use crate::writer::Writer;

/// Result of offering work to a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Handled,
    /// Let the next strategy in the chain handle it
    Pass,
}

pub trait ContentDeletionStrategy: std::fmt::Debug {
    /// Delete the contents of `selection` and leave it collapsed where the
    /// content was
    fn delete_contents(
        &self,
        writer: &mut Writer<'_>,
        selection: &mut Selection,
        options: &DeleteOptions,
    ) -> ModelResult<Outcome>;
}

pub trait SelectionModificationStrategy: std::fmt::Debug {
    fn modify_selection(
        &self,
        model: &Model,
        schema: &Schema,
        selection: &mut Selection,
        options: &ModifyOptions,
    ) -> ModelResult<Outcome>;
}

#[derive(Debug)]
struct Prioritized<S: ?Sized> {
    priority: i32,
    strategy: Box<S>,
}

/// Insert keeping descending priority; equal priorities keep registration
/// order
fn insert_by_priority<S: ?Sized>(chain: &mut Vec<Prioritized<S>>, entry: Prioritized<S>) {
    let index = chain
        .iter()
        .position(|existing| existing.priority < entry.priority)
        .unwrap_or(chain.len());
    chain.insert(index, entry);
}

#[derive(Debug, Default)]
pub struct Composer {
    deletion: Vec<Prioritized<dyn ContentDeletionStrategy>>,
    modification: Vec<Prioritized<dyn SelectionModificationStrategy>>,
    default_deletion: DefaultDeletion,
    default_modification: DefaultModification,
}

impl Composer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_deletion(
        &mut self,
        priority: i32,
        strategy: impl ContentDeletionStrategy + 'static,
    ) {
        let strategy: Box<dyn ContentDeletionStrategy> = Box::new(strategy);
        insert_by_priority(&mut self.deletion, Prioritized { priority, strategy });
    }

    pub fn register_modification(
        &mut self,
        priority: i32,
        strategy: impl SelectionModificationStrategy + 'static,
    ) {
        let strategy: Box<dyn SelectionModificationStrategy> = Box::new(strategy);
        insert_by_priority(&mut self.modification, Prioritized { priority, strategy });
    }

    pub fn delete_contents(
        &self,
        writer: &mut Writer<'_>,
        selection: &mut Selection,
        options: &DeleteOptions,
    ) -> ModelResult<()> {
        for entry in &self.deletion {
            if entry.strategy.delete_contents(writer, selection, options)? == Outcome::Handled {
                debug!(strategy = ?entry.strategy, priority = entry.priority, "deletion handled");
                return Ok(());
            }
        }
        self.default_deletion.delete_contents(writer, selection, options)?;
        Ok(())
    }

    pub fn modify_selection(
        &self,
        model: &Model,
        schema: &Schema,
        selection: &mut Selection,
        options: &ModifyOptions,
    ) -> ModelResult<()> {
        for entry in &self.modification {
            let outcome = entry.strategy.modify_selection(model, schema, selection, options)?;
            if outcome == Outcome::Handled {
                debug!(
                    strategy = ?entry.strategy,
                    priority = entry.priority,
                    "selection modification handled"
                );
                return Ok(());
            }
        }
        self.default_modification
            .modify_selection(model, schema, selection, options)?;
        Ok(())
    }

    /// Delete the document selection's contents in one change
    pub fn delete_selection(
        &self,
        document: &Document,
        options: &DeleteOptions,
    ) -> ModelResult<()> {
        document.change(|writer| {
            let mut selection = writer.selection();
            self.delete_contents(writer, &mut selection, options)?;
            writer.set_selection(selection)
        })
    }

    /// Move the document selection's focus
    pub fn modify_document_selection(
        &self,
        document: &Document,
        options: &ModifyOptions,
    ) -> ModelResult<()> {
        let mut selection = document.selection().get();
        {
            let model = document.model();
            self.modify_selection(&model, document.schema(), &mut selection, options)?;
        }
        document.selection().set_to(selection)
    }
}
