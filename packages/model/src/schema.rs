//! # Schema
//!
//! The small slice of schema knowledge the engine needs: where text may
//! live and which elements act as limits for merging and selection.

use std::collections::HashSet;

use crate::config::SchemaConfig;
use crate::model::{Model, ROOT_ELEMENT};
use crate::position::Position;
use crate::walker::{Direction, StepKind, TreeWalker};

#[derive(Debug, Clone, Default)]
pub struct Schema {
    text_containers: HashSet<String>,
    limits: HashSet<String>,
}

impl Schema {
    pub fn from_config(config: &SchemaConfig) -> Self {
        Self {
            text_containers: config.text_containers.iter().cloned().collect(),
            limits: config.limits.iter().cloned().collect(),
        }
    }

    /// Whether an element with this name may hold text
    pub fn allows_text(&self, name: &str) -> bool {
        name != ROOT_ELEMENT
            && (self.text_containers.is_empty() || self.text_containers.contains(name))
    }

    pub fn is_limit(&self, name: &str) -> bool {
        name == ROOT_ELEMENT || self.limits.contains(name)
    }

    /// Whether text could be typed at `position`
    pub fn allows_text_at(&self, model: &Model, position: &Position) -> bool {
        if position.parent_path().is_empty() {
            return false;
        }
        position
            .parent(model)
            .map(|parent| self.allows_text(&parent.name))
            .unwrap_or(false)
    }

    /// Closest position around `position` where text is allowed.
    ///
    /// Looks at the position itself, then alternates one step backward and
    /// one step forward until either side finds a text container.
    pub fn nearest_text_position(&self, model: &Model, position: &Position) -> Option<Position> {
        if self.allows_text_at(model, position) {
            return Some(position.clone());
        }

        let walker = |direction| TreeWalker::from_position(model, position.clone(), direction).ok();
        let mut backward = walker(Direction::Backward)?;
        let mut forward = walker(Direction::Forward)?;

        loop {
            let mut progressed = false;
            for (walker, entering) in [
                (&mut backward, StepKind::ElementEnd),
                (&mut forward, StepKind::ElementStart),
            ] {
                let Some(value) = walker.next() else {
                    continue;
                };
                progressed = true;
                if value.kind == entering && self.allows_text_at(model, &value.next_position) {
                    return Some(value.next_position);
                }
            }
            if !progressed {
                return None;
            }
        }
    }
}
