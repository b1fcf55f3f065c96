//! # Ranges
//!
//! A [`Range`] is an ordered pair of positions in one root. Non-collapsed
//! ranges stick inward (`start` to the next node, `end` to the previous
//! node) so content inserted at their edges stays outside of them.

use serde::{Deserialize, Serialize};

use crate::errors::{ModelError, ModelResult};
use crate::model::Model;
use crate::operation::Operation;
use crate::position::{Position, Stickiness};
use crate::walker::{Direction, TreeWalker, WalkerOptions};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    /// Create a range; boundaries must share a root and be ordered
    pub fn new(start: Position, end: Position) -> Self {
        debug_assert!(start.root == end.root, "range boundaries in different roots");
        let collapsed = start == end;
        Self {
            start: start.with_stickiness(if collapsed {
                Stickiness::ToNone
            } else {
                Stickiness::ToNext
            }),
            end: end.with_stickiness(if collapsed {
                Stickiness::ToNone
            } else {
                Stickiness::ToPrevious
            }),
        }
    }

    pub fn try_new(start: Position, end: Position) -> ModelResult<Self> {
        if start.is_after(&end) {
            return Err(ModelError::address(format!("range start {} after end {}", start, end)));
        }
        start.compare_with(&end)?;
        Ok(Self::new(start, end))
    }

    pub fn collapsed(position: Position) -> Self {
        Self::new(position.clone(), position)
    }

    pub fn from_position_and_shift(position: &Position, shift: usize) -> Self {
        Self::new(position.clone(), position.get_shifted_by(shift as isize))
    }

    /// Range covering the whole content of the element at `path`
    pub fn in_element(model: &Model, root: &str, path: &[usize]) -> ModelResult<Self> {
        let element = model.element_at(root, path)?;
        Ok(Self::new(
            Position::in_parent(root, path, 0),
            Position::in_parent(root, path, element.max_offset()),
        ))
    }

    pub fn root(&self) -> &str {
        &self.start.root
    }

    pub fn is_collapsed(&self) -> bool {
        self.start == self.end
    }

    /// Both boundaries in the same parent
    pub fn is_flat(&self) -> bool {
        self.start.has_same_parent_as(&self.end)
    }

    /// Strict containment: boundaries themselves are outside
    pub fn contains_position(&self, position: &Position) -> bool {
        position.is_after(&self.start) && position.is_before(&self.end)
    }

    pub fn contains_range(&self, other: &Range, loose: bool) -> bool {
        let loose = loose && !other.is_collapsed();
        let contains_start =
            self.contains_position(&other.start) || (loose && self.start == other.start);
        let contains_end = self.contains_position(&other.end) || (loose && self.end == other.end);
        contains_start && contains_end
    }

    pub fn is_intersecting(&self, other: &Range) -> bool {
        self.start.is_before(&other.end) && self.end.is_after(&other.start)
    }

    pub fn get_intersection(&self, other: &Range) -> Option<Range> {
        if !self.is_intersecting(other) {
            return None;
        }
        let mut start = self.start.clone();
        let mut end = self.end.clone();
        if self.contains_position(&other.start) {
            start = other.start.clone();
        }
        if self.contains_position(&other.end) {
            end = other.end.clone();
        }
        Some(Range::new(start, end))
    }

    /// Parts of this range not covered by `other` (zero, one or two)
    pub fn get_difference(&self, other: &Range) -> Vec<Range> {
        let mut ranges = Vec::new();
        if self.is_intersecting(other) {
            if self.contains_position(&other.start) {
                ranges.push(Range::new(self.start.clone(), other.start.clone()));
            }
            if self.contains_position(&other.end) {
                ranges.push(Range::new(other.end.clone(), self.end.clone()));
            }
        } else {
            ranges.push(self.clone());
        }
        ranges
    }

    /// Smallest set of flat ranges covering this range, in document order
    pub fn get_minimal_flat_ranges(&self, model: &Model) -> ModelResult<Vec<Range>> {
        let mut ranges = Vec::new();
        let diff_at = self.start.get_common_path(&self.end).len();
        let mut position = self.start.clone();

        // Go up.
        while position.path.len() > diff_at + 1 {
            let parent = position.parent(model)?;
            let how_many = parent.max_offset() - position.offset();
            if how_many != 0 {
                ranges.push(Range::from_position_and_shift(&position, how_many));
            }
            position.path.pop();
            let offset = position.offset();
            position.set_offset(offset + 1);
        }

        // Go down.
        while position.path.len() <= self.end.path.len() {
            let depth = position.path.len() - 1;
            let offset = self.end.path[depth];
            let how_many = offset.saturating_sub(position.offset());
            if how_many != 0 {
                ranges.push(Range::from_position_and_shift(&position, how_many));
            }
            position.set_offset(offset);
            position.path.push(0);
        }

        Ok(ranges)
    }

    /// Walker over this range with default options
    pub fn walk<'a>(&self, model: &'a Model) -> ModelResult<TreeWalker<'a>> {
        self.walk_with(model, WalkerOptions::default())
    }

    pub fn walk_with<'a>(
        &self,
        model: &'a Model,
        options: WalkerOptions,
    ) -> ModelResult<TreeWalker<'a>> {
        TreeWalker::new(model, WalkerOptions {
            boundaries: Some(self.clone()),
            ..options
        })
    }

    /// Plain text inside the range
    pub fn text(&self, model: &Model) -> ModelResult<String> {
        Ok(self
            .walk(model)?
            .filter_map(|value| value.item.as_text().map(|text| text.data().to_string()))
            .collect())
    }

    /// Plain text read by walking backward, in document order
    pub fn text_backward(&self, model: &Model) -> ModelResult<String> {
        let mut pieces: Vec<String> = self
            .walk_with(model, WalkerOptions {
                direction: Direction::Backward,
                ..WalkerOptions::default()
            })?
            .filter_map(|value| value.item.as_text().map(|text| text.data().to_string()))
            .collect();
        pieces.reverse();
        Ok(pieces.concat())
    }

    /// Remap through an operation. Moves may split the range.
    pub fn get_transformed_by_operation(&self, operation: &Operation, spread: bool) -> Vec<Range> {
        match operation {
            Operation::Insert(op) => {
                self.transformed_by_insertion(&op.position, op.how_many(), spread)
            }
            Operation::Move(op) => self.transformed_by_move(
                &op.source_position,
                &op.target_position,
                op.how_many,
                spread,
            ),
            _ => vec![self.clone()],
        }
    }

    pub fn transformed_by_insertion(
        &self,
        insert_position: &Position,
        how_many: usize,
        spread: bool,
    ) -> Vec<Range> {
        if spread && self.contains_position(insert_position) {
            return vec![
                Range::new(self.start.clone(), insert_position.clone()),
                Range::new(
                    insert_position.get_shifted_by(how_many as isize),
                    self.end.transformed_by_insertion(insert_position, how_many),
                ),
            ];
        }
        vec![Range::new(
            self.start.transformed_by_insertion(insert_position, how_many),
            self.end.transformed_by_insertion(insert_position, how_many),
        )]
    }

    pub fn transformed_by_move(
        &self,
        source: &Position,
        target: &Position,
        how_many: usize,
        spread: bool,
    ) -> Vec<Range> {
        if self.is_collapsed() {
            let position = self.start.transformed_by_move(source, target, how_many);
            return vec![Range::collapsed(position)];
        }

        let move_range = Range::from_position_and_shift(source, how_many);
        let insert_position = target
            .transformed_by_deletion(source, how_many)
            .unwrap_or_else(|| target.clone());

        if self.contains_position(target)
            && !spread
            && (move_range.contains_position(&self.start)
                || move_range.contains_position(&self.end))
        {
            let start = self.start.transformed_by_move(source, target, how_many);
            let end = self.end.transformed_by_move(source, target, how_many);
            return vec![Range::new(start, end)];
        }

        let difference_set = self.get_difference(&move_range);
        let common = self.get_intersection(&move_range);

        let difference = match difference_set.len() {
            1 => {
                let part = &difference_set[0];
                let start = part.start.transformed_by_deletion(source, how_many);
                let end = part.end.transformed_by_deletion(source, how_many);
                match (start, end) {
                    (Some(start), Some(end)) => Some(Range::new(start, end)),
                    _ => None,
                }
            }
            2 => self
                .end
                .transformed_by_deletion(source, how_many)
                .map(|end| Range::new(self.start.clone(), end)),
            _ => None,
        };

        let mut result = match difference {
            Some(difference) => difference.transformed_by_insertion(
                &insert_position,
                how_many,
                common.is_some() || spread,
            ),
            None => Vec::new(),
        };

        if let Some(common) = common {
            let moved = Range::new(
                common.start.combined(&move_range.start, &insert_position),
                common.end.combined(&move_range.start, &insert_position),
            );
            if result.len() == 2 {
                result.insert(1, moved);
            } else {
                result.push(moved);
            }
        }

        if result.is_empty() {
            result.push(self.clone());
        }
        result
    }

    /// Join pieces touching the first range into one range
    pub fn from_ranges(ranges: &[Range]) -> Option<Range> {
        let reference = ranges.first()?;
        let mut same_root: Vec<&Range> = ranges
            .iter()
            .filter(|range| range.root() == reference.root())
            .collect();
        same_root.sort_by(|a, b| a.start.path.cmp(&b.start.path));
        let reference_index = same_root.iter().position(|range| *range == reference)?;

        let mut start = reference.start.clone();
        let mut end = reference.end.clone();
        for range in same_root[..reference_index].iter().rev() {
            if range.end == start {
                start = range.start.clone();
            } else {
                break;
            }
        }
        for range in &same_root[reference_index + 1..] {
            if range.start == end {
                end = range.end.clone();
            } else {
                break;
            }
        }
        Some(Range::new(start, end))
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}
