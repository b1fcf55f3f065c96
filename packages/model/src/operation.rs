//! # Operations
//!
//! Atomic, serializable model changes. Every structural edit made through a
//! [`crate::Writer`] is recorded as one of these, which makes it possible
//! to reverse, replay and transform edits.
//!
//! ## Semantics
//!
//! ### Insert
//! - Inserts nodes at a position
//! - Positions at or after it shift by the inserted offset size
//!
//! ### Move
//! - Relocates `how_many` offsets starting at `source_position`
//! - `target_position` is given in pre-move coordinates
//! - A remove is a move into the graveyard root
//!
//! ### Attribute / Rename / Marker / Root
//! - Never shift positions
//! - Carry the old value so they can be reversed
//!
//! Every operation carries the `base_version` of the model it applies to.
//! Applying bumps the version by one.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::errors::{ModelError, ModelResult};
use crate::model::{Marker, Model, GRAVEYARD};
use crate::node::{offset_size_of, Node};
use crate::observer::Change;
use crate::position::Position;
use crate::range::Range;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Operation {
    Insert(InsertOperation),
    Move(MoveOperation),
    Attribute(AttributeOperation),
    Rename(RenameOperation),
    Marker(MarkerOperation),
    Root(RootOperation),
    NoOp(NoOperation),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertOperation {
    pub position: Position,
    pub nodes: Vec<Node>,
    pub base_version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveOperation {
    pub source_position: Position,
    pub how_many: usize,
    pub target_position: Position,
    pub base_version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeOperation {
    pub range: Range,
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub base_version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameOperation {
    /// Position right before the renamed element
    pub position: Position,
    pub old_name: String,
    pub new_name: String,
    pub base_version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerOperation {
    pub name: String,
    pub old_range: Option<Range>,
    pub new_range: Option<Range>,
    #[serde(default)]
    pub affects_data: bool,
    pub base_version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootOperation {
    pub root_name: String,
    pub element_name: String,
    pub is_add: bool,
    pub base_version: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoOperation {
    pub base_version: u64,
}

/// Position where removed content lands
pub fn graveyard_position() -> Position {
    Position::new(GRAVEYARD, vec![0])
}

impl InsertOperation {
    pub fn how_many(&self) -> usize {
        offset_size_of(&self.nodes)
    }
}

impl MoveOperation {
    /// Where the moved content starts once the move is applied
    pub fn moved_range_start(&self) -> Position {
        self.target_position
            .transformed_by_deletion(&self.source_position, self.how_many)
            .unwrap_or_else(|| self.target_position.clone())
    }

    pub fn is_remove(&self) -> bool {
        self.target_position.root == GRAVEYARD
    }

    pub fn is_reinsert(&self) -> bool {
        self.source_position.root == GRAVEYARD && self.target_position.root != GRAVEYARD
    }

    /// Whether the target lies inside the moved range
    pub fn targets_itself(&self) -> bool {
        let source = &self.source_position;
        let target = &self.target_position;
        if source.root != target.root {
            return false;
        }
        let end = source.offset() + self.how_many;
        if source.has_same_parent_as(target) {
            return source.offset() < target.offset() && target.offset() < end;
        }
        let depth = source.depth() - 1;
        target.depth() > source.depth()
            && target.path.starts_with(source.parent_path())
            && source.offset() <= target.path[depth]
            && target.path[depth] < end
    }
}

impl Operation {
    pub fn insert(position: Position, nodes: Vec<Node>, base_version: u64) -> Self {
        Operation::Insert(InsertOperation {
            position,
            nodes,
            base_version,
        })
    }

    pub fn move_to(
        source_position: Position,
        how_many: usize,
        target_position: Position,
        base_version: u64,
    ) -> Self {
        Operation::Move(MoveOperation {
            source_position,
            how_many,
            target_position,
            base_version,
        })
    }

    pub fn remove(position: Position, how_many: usize, base_version: u64) -> Self {
        Self::move_to(position, how_many, graveyard_position(), base_version)
    }

    pub fn no_op(base_version: u64) -> Self {
        Operation::NoOp(NoOperation { base_version })
    }

    pub fn base_version(&self) -> u64 {
        match self {
            Operation::Insert(op) => op.base_version,
            Operation::Move(op) => op.base_version,
            Operation::Attribute(op) => op.base_version,
            Operation::Rename(op) => op.base_version,
            Operation::Marker(op) => op.base_version,
            Operation::Root(op) => op.base_version,
            Operation::NoOp(op) => op.base_version,
        }
    }

    pub fn set_base_version(&mut self, version: u64) {
        let slot = match self {
            Operation::Insert(op) => &mut op.base_version,
            Operation::Move(op) => &mut op.base_version,
            Operation::Attribute(op) => &mut op.base_version,
            Operation::Rename(op) => &mut op.base_version,
            Operation::Marker(op) => &mut op.base_version,
            Operation::Root(op) => &mut op.base_version,
            Operation::NoOp(op) => &mut op.base_version,
        };
        *slot = version;
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Insert(_) => "insert",
            Operation::Move(op) if op.is_remove() => "remove",
            Operation::Move(op) if op.is_reinsert() => "reinsert",
            Operation::Move(_) => "move",
            Operation::Attribute(_) => "attribute",
            Operation::Rename(_) => "rename",
            Operation::Marker(_) => "marker",
            Operation::Root(_) => "root",
            Operation::NoOp(_) => "noOp",
        }
    }

    pub fn is_no_op(&self) -> bool {
        matches!(self, Operation::NoOp(_))
    }

    /// Check structural constraints without mutating
    pub fn validate(&self, model: &Model) -> ModelResult<()> {
        match self {
            Operation::Insert(op) => validate_position(model, &op.position),
            Operation::Move(op) => validate_move(model, op),
            Operation::Attribute(op) => validate_attribute(model, op),
            Operation::Rename(op) => {
                let parent = op.position.parent(model)?;
                let element = parent.child_element(op.position.offset()).ok_or_else(|| {
                    ModelError::address(format!("no element to rename at {}", op.position))
                })?;
                if element.name != op.old_name {
                    return Err(ModelError::address(format!(
                        "element at {} is {}, expected {}",
                        op.position, element.name, op.old_name
                    )));
                }
                Ok(())
            }
            Operation::Marker(op) => {
                for range in op.new_range.iter() {
                    validate_position(model, &range.start)?;
                    validate_position(model, &range.end)?;
                }
                Ok(())
            }
            Operation::Root(op) => {
                if op.root_name == GRAVEYARD || op.root_name == model.main_root_name() {
                    return Err(ModelError::InvalidRoot(
                        op.root_name.clone(),
                        model.main_root_name().to_string(),
                    ));
                }
                let attached = model.root_entry(&op.root_name).map(|entry| entry.attached);
                match (op.is_add, attached) {
                    (true, Some(true)) => Err(ModelError::address(format!(
                        "root {} is already attached",
                        op.root_name
                    ))),
                    (false, None) | (false, Some(false)) => {
                        Err(ModelError::address(format!("root {} is not attached", op.root_name)))
                    }
                    _ => Ok(()),
                }
            }
            Operation::NoOp(_) => Ok(()),
        }
    }

    /// Validate and apply to the model, bumping its version
    pub fn apply(&self, model: &mut Model) -> ModelResult<Option<Change>> {
        if self.base_version() != model.version() {
            return Err(ModelError::OperationVersionConflict {
                operation: self.base_version(),
                document: model.version(),
            });
        }
        self.validate(model)?;

        let change = match self {
            Operation::Insert(op) => {
                model.insert(&op.position, op.nodes.clone())?;
                Some(Change::Insert {
                    position: op.position.clone(),
                    length: op.how_many(),
                })
            }
            Operation::Move(op) => {
                let nodes = model.remove(&op.source_position, op.how_many)?;
                let target = op.moved_range_start();
                model.insert(&target, nodes)?;
                Some(if op.is_remove() {
                    Change::Remove {
                        position: op.source_position.clone(),
                        length: op.how_many,
                    }
                } else if op.is_reinsert() {
                    Change::Insert {
                        position: target,
                        length: op.how_many,
                    }
                } else {
                    Change::Move {
                        source: op.source_position.clone(),
                        target,
                        length: op.how_many,
                    }
                })
            }
            Operation::Attribute(op) => {
                model.set_attribute(&op.range, &op.key, op.new_value.as_ref())?;
                Some(Change::Attribute {
                    range: op.range.clone(),
                    key: op.key.clone(),
                    old_value: op.old_value.clone(),
                    new_value: op.new_value.clone(),
                })
            }
            Operation::Rename(op) => {
                model.rename(&op.position, &op.new_name)?;
                Some(Change::Rename {
                    position: op.position.clone(),
                    old_name: op.old_name.clone(),
                    new_name: op.new_name.clone(),
                })
            }
            Operation::Marker(op) => {
                let marker = op.new_range.clone().map(|range| Marker {
                    name: op.name.clone(),
                    range,
                    affects_data: op.affects_data,
                });
                model.set_marker(&op.name, marker);
                Some(Change::Marker {
                    name: op.name.clone(),
                    old_range: op.old_range.clone(),
                    new_range: op.new_range.clone(),
                })
            }
            Operation::Root(op) => {
                model.set_root_attached(&op.root_name, &op.element_name, op.is_add);
                Some(Change::Root {
                    name: op.root_name.clone(),
                    attached: op.is_add,
                })
            }
            Operation::NoOp(_) => None,
        };

        if !matches!(self, Operation::Marker(_)) {
            remap_markers(model, self);
        }
        model.version += 1;

        debug!(kind = self.kind(), version = model.version(), "applied operation");
        Ok(change)
    }

    /// Operation that undoes this one, based on the version after it
    pub fn get_reversed(&self) -> Operation {
        let base_version = self.base_version() + 1;
        match self {
            Operation::Insert(op) => {
                Operation::remove(op.position.clone(), op.how_many(), base_version)
            }
            Operation::Move(op) => {
                let target = op
                    .source_position
                    .transformed_by_insertion(&op.target_position, op.how_many);
                Operation::move_to(op.moved_range_start(), op.how_many, target, base_version)
            }
            Operation::Attribute(op) => Operation::Attribute(AttributeOperation {
                range: op.range.clone(),
                key: op.key.clone(),
                old_value: op.new_value.clone(),
                new_value: op.old_value.clone(),
                base_version,
            }),
            Operation::Rename(op) => Operation::Rename(RenameOperation {
                position: op.position.clone(),
                old_name: op.new_name.clone(),
                new_name: op.old_name.clone(),
                base_version,
            }),
            Operation::Marker(op) => Operation::Marker(MarkerOperation {
                name: op.name.clone(),
                old_range: op.new_range.clone(),
                new_range: op.old_range.clone(),
                affects_data: op.affects_data,
                base_version,
            }),
            Operation::Root(op) => Operation::Root(RootOperation {
                root_name: op.root_name.clone(),
                element_name: op.element_name.clone(),
                is_add: !op.is_add,
                base_version,
            }),
            Operation::NoOp(_) => Operation::no_op(base_version),
        }
    }

    /// Where `position` ends up once this operation is applied
    pub fn affects_position(&self, position: &Position) -> Position {
        match self {
            Operation::Insert(op) => position.transformed_by_insertion(&op.position, op.how_many()),
            Operation::Move(op) => {
                position.transformed_by_move(&op.source_position, &op.target_position, op.how_many)
            }
            _ => position.clone(),
        }
    }

    pub fn to_json(&self) -> ModelResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> ModelResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn validate_position(model: &Model, position: &Position) -> ModelResult<()> {
    let parent = position.parent(model)?;
    if position.offset() > parent.max_offset() {
        return Err(ModelError::address(format!("offset out of bounds at {}", position)));
    }
    Ok(())
}

fn validate_move(model: &Model, op: &MoveOperation) -> ModelResult<()> {
    let source = &op.source_position;
    let target = &op.target_position;

    let source_parent = source.parent(model)?;
    if source.offset() + op.how_many > source_parent.max_offset() {
        return Err(ModelError::address(format!(
            "cannot move {} offsets from {}",
            op.how_many, source
        )));
    }
    if target.root == GRAVEYARD && target.depth() > 1 {
        return Err(ModelError::InvalidMoveTarget(format!("{} is inside removed content", target)));
    }
    validate_position(model, target)?;

    if op.targets_itself() {
        return Err(ModelError::InvalidMoveTarget(format!("cannot move {} into itself", source)));
    }
    Ok(())
}

fn validate_attribute(model: &Model, op: &AttributeOperation) -> ModelResult<()> {
    if !op.range.is_flat() {
        return Err(ModelError::address(format!("attribute range {} is not flat", op.range)));
    }
    let parent = op.range.start.parent(model)?;
    let start = op.range.start.offset();
    let end = op.range.end.offset();
    if end > parent.max_offset() {
        return Err(ModelError::address(format!("attribute range {} out of bounds", op.range)));
    }

    let mut mismatch = false;
    parent.for_each_in_range(start, end - start, |node| {
        if node.attributes().get(&op.key) != op.old_value.as_ref() {
            mismatch = true;
        }
    });
    if mismatch {
        return Err(ModelError::UnexpectedAttribute(op.key.clone()));
    }
    Ok(())
}

fn remap_markers(model: &mut Model, operation: &Operation) {
    for marker in model.markers_mut() {
        let pieces = marker.range.get_transformed_by_operation(operation, false);
        if let Some(range) = Range::from_ranges(&pieces) {
            marker.range = range;
        }
    }
}
