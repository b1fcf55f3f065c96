//! Default content deletion.
//!
//! ```text
//! <p>fo[o</p><p>ba]r</p>   remove   <p>fo</p><p>r</p>   merge   <p>fo[]r</p>
//! ```
//!
//! Partially covered elements are merged level by level, starting at the
//! deepest one, and end-side ancestors left empty are removed. Limit
//! elements are never merged.

use crate::errors::ModelResult;
use crate::position::{Position, Stickiness};
use crate::range::Range;
use crate::selection::Selection;
use crate::writer::Writer;

use super::{ContentDeletionStrategy, Outcome};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Remove the content but keep the elements it cut through separate
    pub leave_unmerged: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDeletion;

impl ContentDeletionStrategy for DefaultDeletion {
    fn delete_contents(
        &self,
        writer: &mut Writer<'_>,
        selection: &mut Selection,
        options: &DeleteOptions,
    ) -> ModelResult<Outcome> {
        if selection.is_collapsed() || selection.range_count() == 0 {
            return Ok(Outcome::Handled);
        }

        let first_operation = writer.batch().operations.len();
        let first_start = selection.ranges()[0]
            .start
            .clone()
            .with_stickiness(Stickiness::ToPrevious);

        // Later ranges first so earlier ones keep their addresses.
        for range in selection.ranges().iter().rev() {
            delete_range(writer, range, options)?;
        }

        let collapsed_at =
            follow(writer, first_operation, first_start).with_stickiness(Stickiness::ToNone);
        selection.collapse(collapsed_at);
        Ok(Outcome::Handled)
    }
}

fn delete_range(
    writer: &mut Writer<'_>,
    range: &Range,
    options: &DeleteOptions,
) -> ModelResult<()> {
    if range.is_collapsed() {
        return Ok(());
    }

    let first_operation = writer.batch().operations.len();
    let start = range.start.clone().with_stickiness(Stickiness::ToPrevious);
    let end = range.end.clone().with_stickiness(Stickiness::ToNext);

    writer.remove(range)?;
    if options.leave_unmerged || range.is_flat() {
        return Ok(());
    }

    let start = follow(writer, first_operation, start);
    let end = follow(writer, first_operation, end);
    merge_branches(writer, start, end)
}

/// Remap `position` through every operation applied since `from`
fn follow(writer: &Writer<'_>, from: usize, position: Position) -> Position {
    writer.batch().operations[from..]
        .iter()
        .fold(position, |position, operation| operation.affects_position(&position))
}

fn is_ancestor_path(ancestor: &[usize], path: &[usize]) -> bool {
    ancestor.len() < path.len() && path.starts_with(ancestor)
}

/// Merge the parent of `end` into the parent of `start`, then continue one
/// level up
fn merge_branches(
    writer: &mut Writer<'_>,
    mut start: Position,
    mut end: Position,
) -> ModelResult<()> {
    loop {
        if start.root != end.root || start.parent_path() == end.parent_path() {
            return Ok(());
        }
        if start.parent_path().is_empty() || end.parent_path().is_empty() {
            return Ok(());
        }
        if is_ancestor_path(start.parent_path(), end.parent_path())
            || is_ancestor_path(end.parent_path(), start.parent_path())
        {
            return Ok(());
        }
        {
            let model = writer.model();
            let schema = writer.schema();
            if schema.is_limit(&start.parent(&model)?.name)
                || schema.is_limit(&end.parent(&model)?.name)
            {
                return Ok(());
            }
        }

        let first_operation = writer.batch().operations.len();
        let after_start = {
            let mut path = start.parent_path().to_vec();
            if let Some(last) = path.last_mut() {
                *last += 1;
            }
            Position::new(start.root.clone(), path)
        };
        let before_end = Position::new(end.root.clone(), end.parent_path().to_vec());

        if after_start != before_end {
            writer.move_range(&Range::from_position_and_shift(&before_end, 1), &after_start)?;
        }
        writer.merge(&after_start)?;

        // Where the end element used to be; drop ancestors left empty.
        let mut vacated = follow(writer, first_operation, before_end);
        while !vacated.parent_path().is_empty() {
            let removable = {
                let model = writer.model();
                let parent = vacated.parent(&model)?;
                parent.is_empty() && !writer.schema().is_limit(&parent.name)
            };
            if !removable {
                break;
            }
            let element = Position::new(vacated.root.clone(), vacated.parent_path().to_vec());
            writer.remove(&Range::from_position_and_shift(&element, 1))?;
            vacated = element;
        }

        start = after_start;
        end = vacated;
    }
}
