//! FEA meshes: a list of nodes plus the elements attached to them.
//!
//! Elements reference their endpoints through `DofRef`, so an element stored
//! in one mesh may connect nodes of another mesh or rigid bodies. This is how
//! an internal mesh is hooked onto boundary interface nodes.

use serde::{Deserialize, Serialize};

use crate::elements::MeshElement;
use crate::node::FeaNode;
use crate::state::StateBlock;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    pub name: String,
    pub nodes: Vec<FeaNode>,
    pub elements: Vec<MeshElement>,
}

impl Mesh {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            elements: Vec::new(),
        }
    }

    /// Adds a node and returns its index in this mesh.
    pub fn add_node(&mut self, node: FeaNode) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn add_element(&mut self, element: impl Into<MeshElement>) -> usize {
        self.elements.push(element.into());
        self.elements.len() - 1
    }

    pub fn coords(&self) -> usize {
        self.nodes.iter().map(|n| n.kind().coords()).sum()
    }

    pub fn coords_w(&self) -> usize {
        self.nodes.iter().map(|n| n.kind().coords_w()).sum()
    }

    pub fn remove_mass(&mut self) {
        for node in &mut self.nodes {
            node.remove_mass();
        }
        for element in &mut self.elements {
            element.remove_mass();
        }
    }
}
