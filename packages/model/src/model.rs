//! # Model State
//!
//! [`Model`] is the tree state owned by a document: named roots, the
//! graveyard root that keeps removed content around for undo, the marker
//! collection and the version counter.
//!
//! Mutation primitives here are `pub(crate)`: the only way to change a
//! model from outside the crate is to apply an operation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::{ModelError, ModelResult};
use crate::node::{Attributes, Element, Node};
use crate::position::Position;
use crate::range::Range;

/// Name of the root holding removed content
pub const GRAVEYARD: &str = "$graveyard";

/// Element name used for roots
pub const ROOT_ELEMENT: &str = "$root";

#[derive(Debug, Clone, PartialEq)]
pub struct RootEntry {
    pub element: Element,
    pub attached: bool,
}

/// Named range kept up to date by the document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    pub name: String,
    pub range: Range,
    #[serde(default)]
    pub affects_data: bool,
}

#[derive(Debug, Clone)]
pub struct Model {
    roots: BTreeMap<String, RootEntry>,
    markers: BTreeMap<String, Marker>,
    main_root: String,
    pub(crate) version: u64,
}

impl Model {
    pub fn new(main_root: impl Into<String>) -> Self {
        let main_root = main_root.into();
        let mut roots = BTreeMap::new();
        roots.insert(
            main_root.clone(),
            RootEntry {
                element: Element::new(ROOT_ELEMENT),
                attached: true,
            },
        );
        roots.insert(
            GRAVEYARD.to_string(),
            RootEntry {
                element: Element::new(ROOT_ELEMENT),
                attached: true,
            },
        );
        Self {
            roots,
            markers: BTreeMap::new(),
            main_root,
            version: 0,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn main_root_name(&self) -> &str {
        &self.main_root
    }

    /// Attached roots, graveyard excluded
    pub fn root_names(&self) -> impl Iterator<Item = &str> {
        self.roots
            .iter()
            .filter(|(name, entry)| entry.attached && name.as_str() != GRAVEYARD)
            .map(|(name, _)| name.as_str())
    }

    pub fn root(&self, name: &str) -> ModelResult<&Element> {
        self.roots
            .get(name)
            .map(|entry| &entry.element)
            .ok_or_else(|| ModelError::address(format!("unknown root {}", name)))
    }

    pub fn root_entry(&self, name: &str) -> Option<&RootEntry> {
        self.roots.get(name)
    }

    pub fn main_root(&self) -> &Element {
        &self.roots[&self.main_root].element
    }

    pub fn graveyard(&self) -> &Element {
        &self.roots[GRAVEYARD].element
    }

    /// Resolve a path of element offsets starting at a root
    pub fn element_at(&self, root: &str, path: &[usize]) -> ModelResult<&Element> {
        let mut element = self.root(root)?;
        for (depth, offset) in path.iter().enumerate() {
            element = element.child_element(*offset).ok_or_else(|| {
                ModelError::address(format!("no element at {}{:?}", root, &path[..=depth]))
            })?;
        }
        Ok(element)
    }

    pub(crate) fn element_at_mut(
        &mut self,
        root: &str,
        path: &[usize],
    ) -> ModelResult<&mut Element> {
        let mut element = self
            .roots
            .get_mut(root)
            .map(|entry| &mut entry.element)
            .ok_or_else(|| ModelError::address(format!("unknown root {}", root)))?;
        for (depth, offset) in path.iter().enumerate() {
            element = element.child_element_mut(*offset).ok_or_else(|| {
                ModelError::address(format!("no element at {}{:?}", root, &path[..=depth]))
            })?;
        }
        Ok(element)
    }

    pub fn markers(&self) -> impl Iterator<Item = &Marker> {
        self.markers.values()
    }

    pub fn get_marker(&self, name: &str) -> Option<&Marker> {
        self.markers.get(name)
    }

    pub(crate) fn markers_mut(&mut self) -> impl Iterator<Item = &mut Marker> {
        self.markers.values_mut()
    }

    /// Whether the element at `path` has any content
    pub fn has_content(&self, root: &str, path: &[usize]) -> bool {
        self.element_at(root, path)
            .map(|element| !element.is_empty())
            .unwrap_or(false)
    }

    /// Insert nodes at a position
    pub(crate) fn insert(&mut self, position: &Position, nodes: Vec<Node>) -> ModelResult<()> {
        let parent = self.element_at_mut(&position.root, position.parent_path())?;
        if position.offset() > parent.max_offset() {
            return Err(ModelError::address(format!("offset out of bounds at {}", position)));
        }
        parent.insert_nodes(position.offset(), nodes);
        Ok(())
    }

    /// Remove `how_many` offsets at a position, returning the removed nodes
    pub(crate) fn remove(
        &mut self,
        position: &Position,
        how_many: usize,
    ) -> ModelResult<Vec<Node>> {
        let parent = self.element_at_mut(&position.root, position.parent_path())?;
        if position.offset() + how_many > parent.max_offset() {
            return Err(ModelError::address(format!("range out of bounds at {}", position)));
        }
        Ok(parent.remove_nodes(position.offset(), how_many))
    }

    pub(crate) fn set_attribute(
        &mut self,
        range: &Range,
        key: &str,
        value: Option<&serde_json::Value>,
    ) -> ModelResult<()> {
        let parent = self.element_at_mut(&range.start.root, range.start.parent_path())?;
        let how_many = range.end.offset() - range.start.offset();
        parent.update_range(range.start.offset(), how_many, |node| {
            let attributes: &mut Attributes = node.attributes_mut();
            match value {
                Some(value) => {
                    attributes.insert(key.to_string(), value.clone());
                }
                None => {
                    attributes.remove(key);
                }
            }
        });
        Ok(())
    }

    pub(crate) fn rename(&mut self, position: &Position, new_name: &str) -> ModelResult<()> {
        let parent = self.element_at_mut(&position.root, position.parent_path())?;
        let element = parent
            .child_element_mut(position.offset())
            .ok_or_else(|| ModelError::address(format!("no element after {}", position)))?;
        element.name = new_name.to_string();
        Ok(())
    }

    pub(crate) fn set_marker(&mut self, name: &str, marker: Option<Marker>) {
        match marker {
            Some(marker) => {
                self.markers.insert(name.to_string(), marker);
            }
            None => {
                self.markers.remove(name);
            }
        }
    }

    pub(crate) fn set_root_attached(&mut self, name: &str, element_name: &str, attached: bool) {
        let entry = self.roots.entry(name.to_string()).or_insert_with(|| RootEntry {
            element: Element::new(element_name),
            attached,
        });
        entry.attached = attached;
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new("main")
    }
}
