//! # Operation Transformation
//!
//! Rewrites an operation so it can be applied after another operation that
//! was based on the same model version. Used to replay remote operations
//! and to rebase undo steps over later edits.
//!
//! ## Resolution rules
//!
//! - Equal offsets: the later writer lands after the earlier one
//! - Removal wins over a concurrent move of the same content
//! - Attribute, rename and marker values: last writer wins
//! - Addresses that end up in removed content degrade to `NoOp`
//!
//! When a sequence is rebased, addresses follow content into the graveyard
//! and back out again, so an edit survives a later removal that was itself
//! undone. Only addresses still in the graveyard at the end degrade.

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::ModelError;
use crate::model::GRAVEYARD;
use crate::operation::{
    graveyard_position, AttributeOperation, InsertOperation, MarkerOperation, MoveOperation,
    Operation, RenameOperation,
};
use crate::position::{Position, Stickiness};
use crate::range::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformContext {
    /// Whether the transformed operation wins ties against the applied one
    pub op_is_later: bool,
}

impl Default for TransformContext {
    fn default() -> Self {
        Self { op_is_later: true }
    }
}

impl TransformContext {
    fn flipped(self) -> Self {
        Self {
            op_is_later: !self.op_is_later,
        }
    }
}

/// What happens to addresses that land in the graveyard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Removed {
    Degrade,
    Follow,
}

/// Rewrite `op` so it applies after `applied`.
///
/// Both operations must be based on the same version. The result is a
/// sequence: each operation is based on the version after the previous one.
pub fn transform(op: &Operation, applied: &Operation, context: TransformContext) -> Vec<Operation> {
    transform_with(op, applied, context, Removed::Degrade)
}

fn transform_with(
    op: &Operation,
    applied: &Operation,
    context: TransformContext,
    removed: Removed,
) -> Vec<Operation> {
    let mut result = match op {
        Operation::Insert(insert) => transform_insert(insert, applied, context, removed),
        Operation::Move(mv) => transform_move(mv, applied, context, removed),
        Operation::Attribute(attribute) => {
            transform_attribute(attribute, applied, context, removed)
        }
        Operation::Rename(rename) => transform_rename(rename, applied, context, removed),
        Operation::Marker(marker) => transform_marker(marker, applied, context),
        Operation::Root(root) => match applied {
            Operation::Root(other)
                if other.root_name == root.root_name && other.is_add == root.is_add =>
            {
                vec![Operation::no_op(root.base_version)]
            }
            _ => vec![op.clone()],
        },
        Operation::NoOp(_) => vec![op.clone()],
    };

    if result.is_empty() {
        result.push(Operation::no_op(op.base_version()));
    }
    for (index, operation) in result.iter_mut().enumerate() {
        operation.set_base_version(applied.base_version() + 1 + index as u64);
    }
    result
}

/// Rebase the sequence `ops` over the sequence `applied`.
///
/// Both sequences must start at the same version; the result starts at the
/// version reached after `applied`.
pub fn transform_sets(
    ops: &[Operation],
    applied: &[Operation],
    context: TransformContext,
) -> Vec<Operation> {
    let start = applied
        .last()
        .map(|op| op.base_version() + 1)
        .or_else(|| ops.first().map(Operation::base_version))
        .unwrap_or(0);

    let mut applied = applied.to_vec();
    let mut result = Vec::new();
    for op in ops {
        let single = std::slice::from_ref(op);
        let (mut transformed, mut rest) =
            transform_pair(single, &applied, context, Removed::Follow);
        if transformed.iter().any(|candidate| ends_in_graveyard(op, candidate)) {
            (transformed, rest) = transform_pair(single, &applied, context, Removed::Degrade);
        }
        applied = rest;
        result.append(&mut transformed);
    }

    for (index, operation) in result.iter_mut().enumerate() {
        operation.set_base_version(start + index as u64);
    }
    result
}

/// Transforms two sequences based on the same version against each other
fn transform_pair(
    a: &[Operation],
    b: &[Operation],
    context: TransformContext,
    removed: Removed,
) -> (Vec<Operation>, Vec<Operation>) {
    match (a, b) {
        ([], _) | (_, []) => (a.to_vec(), b.to_vec()),
        ([a_op], [b_op]) => (
            transform_with(a_op, b_op, context, removed),
            transform_with(b_op, a_op, context.flipped(), removed),
        ),
        ([first, rest @ ..], _) if !rest.is_empty() => {
            let (first, b) = transform_pair(std::slice::from_ref(first), b, context, removed);
            let (mut rest, b) = transform_pair(rest, &b, context, removed);
            let mut a = first;
            a.append(&mut rest);
            (a, b)
        }
        (_, [first, rest @ ..]) => {
            let (a, first) = transform_pair(a, std::slice::from_ref(first), context, removed);
            let (a, mut rest) = transform_pair(&a, rest, context, removed);
            let mut b = first;
            b.append(&mut rest);
            (a, b)
        }
    }
}

fn degrade(op: &Operation, reason: String) -> Vec<Operation> {
    let error = ModelError::OperationTransformation(reason);
    warn!(kind = op.kind(), error = %error, "operation degraded to no-op");
    vec![Operation::no_op(op.base_version())]
}

/// Remap a single address with the given tie-break
fn remap(position: &Position, applied: &Operation, stickiness: Stickiness) -> Position {
    let original = position.stickiness;
    applied
        .affects_position(&position.clone().with_stickiness(stickiness))
        .with_stickiness(original)
}

/// Address that was live before and now lies in removed content
fn buried(before: &Position, after: &Position) -> bool {
    before.root != GRAVEYARD && after.root == GRAVEYARD
}

/// Whether `candidate`, rebased from `original`, addresses removed content
/// that `original` addressed live
fn ends_in_graveyard(original: &Operation, candidate: &Operation) -> bool {
    match (original, candidate) {
        (Operation::Insert(before), Operation::Insert(after)) => {
            buried(&before.position, &after.position)
        }
        (Operation::Move(before), Operation::Move(after)) => {
            buried(&before.source_position, &after.source_position)
                || (!before.is_remove() && buried(&before.target_position, &after.target_position))
        }
        (Operation::Attribute(before), Operation::Attribute(after)) => {
            buried(&before.range.start, &after.range.start)
        }
        (Operation::Rename(before), Operation::Rename(after)) => {
            buried(&before.position, &after.position)
        }
        _ => false,
    }
}

fn tie_break(context: TransformContext) -> Stickiness {
    if context.op_is_later {
        Stickiness::ToNone
    } else {
        Stickiness::ToPrevious
    }
}

fn transform_insert(
    op: &InsertOperation,
    applied: &Operation,
    context: TransformContext,
    removed: Removed,
) -> Vec<Operation> {
    let position = remap(&op.position, applied, tie_break(context));
    if removed == Removed::Degrade && buried(&op.position, &position) {
        return degrade(
            &Operation::Insert(op.clone()),
            format!("insertion point {} was removed", op.position),
        );
    }
    vec![Operation::Insert(InsertOperation {
        position,
        ..op.clone()
    })]
}

fn transform_move(
    op: &MoveOperation,
    applied: &Operation,
    context: TransformContext,
    removed: Removed,
) -> Vec<Operation> {
    let original = Operation::Move(op.clone());
    let source_range = Range::from_position_and_shift(&op.source_position, op.how_many);
    let pieces = source_range.get_transformed_by_operation(applied, false);

    let target = if op.is_remove() {
        graveyard_position()
    } else {
        let target = remap(&op.target_position, applied, tie_break(context));
        if removed == Removed::Degrade && buried(&op.target_position, &target) {
            return degrade(&original, format!("move target {} was removed", op.target_position));
        }
        target
    };

    let pieces: Vec<Range> = pieces
        .into_iter()
        .filter(|piece| !piece.is_collapsed() || op.how_many == 0)
        .filter(|piece| removed == Removed::Follow || !buried(&op.source_position, &piece.start))
        .collect();
    if pieces.is_empty() {
        debug!(source = %op.source_position, "moved content was removed concurrently");
        return vec![Operation::no_op(op.base_version)];
    }

    let mut sequence: Vec<Operation> = Vec::new();
    for piece in pieces {
        if !piece.is_flat() {
            return degrade(&original, format!("moved range {} is no longer flat", piece));
        }
        let mut candidates = vec![Operation::move_to(
            piece.start.clone().with_stickiness(Stickiness::ToNone),
            piece.end.offset() - piece.start.offset(),
            target.clone(),
            op.base_version,
        )];
        for previous in &sequence {
            candidates = candidates
                .iter()
                .flat_map(|candidate| {
                    transform_with(candidate, previous, TransformContext::default(), removed)
                })
                .collect();
        }
        sequence.extend(candidates);
    }

    sequence
        .into_iter()
        .flat_map(|candidate| match &candidate {
            Operation::Move(mv) if mv.targets_itself() => {
                degrade(&candidate, format!("cannot move {} into itself", mv.source_position))
            }
            _ => vec![candidate],
        })
        .collect()
}

fn transform_attribute(
    op: &AttributeOperation,
    applied: &Operation,
    context: TransformContext,
    removed: Removed,
) -> Vec<Operation> {
    let live = |piece: &Range| removed == Removed::Follow || !buried(&op.range.start, &piece.start);
    let mut parts: Vec<(Range, Option<Value>)> = op
        .range
        .get_transformed_by_operation(applied, true)
        .into_iter()
        .filter(|piece| !piece.is_collapsed() && piece.is_flat() && live(piece))
        .map(|piece| (piece, op.old_value.clone()))
        .collect();

    if let Operation::Attribute(other) = applied {
        if other.key == op.key {
            parts = parts
                .into_iter()
                .flat_map(|(range, old_value)| match range.get_intersection(&other.range) {
                    None => vec![(range, old_value)],
                    Some(common) => {
                        let mut split: Vec<(Range, Option<Value>)> = range
                            .get_difference(&other.range)
                            .into_iter()
                            .map(|part| (part, old_value.clone()))
                            .collect();
                        if context.op_is_later && other.new_value != op.new_value {
                            split.push((common, other.new_value.clone()));
                        }
                        split
                    }
                })
                .collect();
            parts.sort_by(|a, b| a.0.start.path.cmp(&b.0.start.path));
        }
    }

    parts
        .into_iter()
        .filter(|(_, old_value)| *old_value != op.new_value)
        .map(|(range, old_value)| {
            Operation::Attribute(AttributeOperation {
                range,
                key: op.key.clone(),
                old_value,
                new_value: op.new_value.clone(),
                base_version: op.base_version,
            })
        })
        .collect()
}

fn transform_rename(
    op: &RenameOperation,
    applied: &Operation,
    context: TransformContext,
    removed: Removed,
) -> Vec<Operation> {
    let position = remap(&op.position, applied, Stickiness::ToNext);
    if removed == Removed::Degrade && buried(&op.position, &position) {
        return degrade(
            &Operation::Rename(op.clone()),
            format!("renamed element at {} was removed", op.position),
        );
    }

    let mut old_name = op.old_name.clone();
    if let Operation::Rename(other) = applied {
        if other.position == op.position {
            if !context.op_is_later || other.new_name == op.new_name {
                return vec![Operation::no_op(op.base_version)];
            }
            old_name = other.new_name.clone();
        }
    }

    vec![Operation::Rename(RenameOperation {
        position,
        old_name,
        new_name: op.new_name.clone(),
        base_version: op.base_version,
    })]
}

fn transform_marker(
    op: &MarkerOperation,
    applied: &Operation,
    context: TransformContext,
) -> Vec<Operation> {
    let remap_range = |range: &Option<Range>| {
        let range = range.as_ref()?;
        Range::from_ranges(&range.get_transformed_by_operation(applied, false))
    };

    let mut old_range = remap_range(&op.old_range);
    if let Operation::Marker(other) = applied {
        if other.name == op.name {
            if !context.op_is_later {
                return vec![Operation::no_op(op.base_version)];
            }
            old_range = other.new_range.clone();
        }
    }

    vec![Operation::Marker(MarkerOperation {
        name: op.name.clone(),
        old_range,
        new_range: remap_range(&op.new_range),
        affects_data: op.affects_data,
        base_version: op.base_version,
    })]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;
    use crate::node::{Element, Node};

    fn pos(path: &[usize]) -> Position {
        Position::new("main", path.to_vec())
    }

    fn text(data: &str, version: u64) -> Operation {
        Operation::insert(pos(&[0]), vec![Node::text(data)], version)
    }

    #[test]
    fn test_concurrent_inserts_converge() {
        let mut model = Model::new("main");
        text("abc", 0).apply(&mut model).unwrap();

        let ours = Operation::insert(pos(&[1]), vec![Node::text("X")], 1);
        let theirs = Operation::insert(pos(&[1]), vec![Node::text("Y")], 1);

        let mut left = model.clone();
        ours.apply(&mut left).unwrap();
        for op in transform(&theirs, &ours, TransformContext::default()) {
            op.apply(&mut left).unwrap();
        }

        let mut right = model.clone();
        theirs.apply(&mut right).unwrap();
        for op in transform(&ours, &theirs, TransformContext { op_is_later: false }) {
            op.apply(&mut right).unwrap();
        }

        assert_eq!(left.main_root().text_content(), "aXYbc");
        assert_eq!(right.main_root().text_content(), "aXYbc");
    }

    #[test]
    fn test_insert_into_removed_element_degrades() {
        let paragraph = Element::new("paragraph").with_children(vec![Node::text("ab")]);
        let applied = Operation::remove(pos(&[0]), 1, 1);
        let op = Operation::insert(pos(&[0, 1]), vec![Node::text("x")], 1);

        let mut model = Model::new("main");
        Operation::insert(pos(&[0]), vec![paragraph.into()], 0)
            .apply(&mut model)
            .unwrap();
        applied.apply(&mut model).unwrap();

        let result = transform(&op, &applied, TransformContext::default());
        assert_eq!(result, vec![Operation::no_op(2)]);
    }

    #[test]
    fn test_removal_wins_over_concurrent_move() {
        let removal = Operation::remove(pos(&[1]), 2, 3);
        let mv = Operation::move_to(pos(&[1]), 2, pos(&[5]), 3);
        assert_eq!(
            transform(&mv, &removal, TransformContext::default()),
            vec![Operation::no_op(4)]
        );
    }

    #[test]
    fn test_move_shrinks_around_removed_part() {
        let mut model = Model::new("main");
        text("abcdef", 0).apply(&mut model).unwrap();

        // Remove "cd" while a concurrent move relocates "bcde" to the end.
        let removal = Operation::remove(pos(&[2]), 2, 1);
        let mv = Operation::move_to(pos(&[1]), 4, pos(&[6]), 1);
        removal.apply(&mut model).unwrap();

        let result = transform(&mv, &removal, TransformContext::default());
        assert_eq!(result.len(), 1);
        for op in result {
            op.apply(&mut model).unwrap();
        }
        assert_eq!(model.main_root().text_content(), "afbe");
    }

    #[test]
    fn test_attribute_last_writer_wins() {
        let range = Range::new(pos(&[0]), pos(&[3]));
        let first = Operation::Attribute(AttributeOperation {
            range: range.clone(),
            key: "bold".into(),
            old_value: None,
            new_value: Some(true.into()),
            base_version: 1,
        });
        let second = Operation::Attribute(AttributeOperation {
            range: Range::new(pos(&[1]), pos(&[3])),
            key: "bold".into(),
            old_value: None,
            new_value: Some(false.into()),
            base_version: 1,
        });

        let later = transform(&second, &first, TransformContext::default());
        match &later[..] {
            [Operation::Attribute(op)] => assert_eq!(op.old_value, Some(true.into())),
            other => panic!("unexpected {:?}", other),
        }

        let earlier = transform(&second, &first, TransformContext { op_is_later: false });
        assert_eq!(earlier, vec![Operation::no_op(2)]);
    }

    #[test]
    fn test_transform_sets_renumbers_versions() {
        let applied = vec![text("ab", 0), text("cd", 1)];
        let ops = vec![text("x", 0), text("y", 1)];
        let result = transform_sets(&ops, &applied, TransformContext::default());
        let versions: Vec<u64> = result.iter().map(Operation::base_version).collect();
        assert_eq!(versions, vec![2, 3]);
    }
}
