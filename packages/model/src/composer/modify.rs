//! Default selection modification: moves the focus by one character or
//! code point, entering and leaving elements where text is allowed.

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::errors::ModelResult;
use crate::model::Model;
use crate::position::Position;
use crate::schema::Schema;
use crate::selection::Selection;
use crate::walker::{Direction, StepKind, TreeWalker, WalkerOptions, WalkerValue};

use super::{Outcome, SelectionModificationStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Unit {
    /// A user-perceived character: a base character with its combining marks
    #[default]
    Character,
    /// A single Unicode scalar value
    CodePoint,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifyOptions {
    pub direction: Direction,
    pub unit: Unit,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultModification;

impl SelectionModificationStrategy for DefaultModification {
    fn modify_selection(
        &self,
        model: &Model,
        schema: &Schema,
        selection: &mut Selection,
        options: &ModifyOptions,
    ) -> ModelResult<Outcome> {
        let Some(focus) = selection.focus().cloned() else {
            return Ok(Outcome::Handled);
        };

        if let Some(position) = next_focus(model, schema, focus, options)? {
            selection.set_focus(position)?;
        }
        Ok(Outcome::Handled)
    }
}

fn next_focus(
    model: &Model,
    schema: &Schema,
    focus: Position,
    options: &ModifyOptions,
) -> ModelResult<Option<Position>> {
    let forward = options.direction == Direction::Forward;
    let entering = if forward { StepKind::ElementStart } else { StepKind::ElementEnd };

    let walker = TreeWalker::new(
        model,
        WalkerOptions {
            start_position: Some(focus),
            direction: options.direction,
            single_characters: true,
            ..Default::default()
        },
    )?;

    for value in walker {
        let Some(element) = value.item.as_element() else {
            return Ok(Some(text_step(&value, options)));
        };

        if value.kind == entering {
            // Limit elements are stepped over as a whole.
            if schema.is_limit(&element.name) {
                let shift = if forward { 1 } else { -1 };
                return Ok(Some(value.previous_position.get_shifted_by(shift)));
            }
            if schema.allows_text_at(model, &value.next_position) {
                return Ok(Some(value.next_position));
            }
        } else {
            if schema.is_limit(&element.name) {
                return Ok(None);
            }
            if schema.allows_text_at(model, &value.next_position) {
                return Ok(Some(value.next_position));
            }
        }
    }
    Ok(None)
}

/// Position after stepping over one unit of text
fn text_step(value: &WalkerValue<'_>, options: &ModifyOptions) -> Position {
    let Some(proxy) = value.item.as_text() else {
        return value.next_position.clone();
    };
    if options.unit == Unit::CodePoint {
        return value.next_position.clone();
    }

    let stepped = proxy.offset_in_text();
    let (start, end) = grapheme_bounds(&proxy.text_node().data, stepped);
    match options.direction {
        Direction::Forward => value.previous_position.get_shifted_by((end - stepped) as isize),
        Direction::Backward => {
            value.previous_position.get_shifted_by(-((stepped + 1 - start) as isize))
        }
    }
}

/// Char bounds of the grapheme cluster containing char `index`
fn grapheme_bounds(data: &str, index: usize) -> (usize, usize) {
    let mut start = 0;
    for grapheme in data.graphemes(true) {
        let len = grapheme.chars().count();
        if index < start + len {
            return (start, start + len);
        }
        start += len;
    }
    (index, index + 1)
}
