//! Physics items and the state layout of a modal assembly.
//!
//! This crate holds everything a modal assembly is made of: rigid bodies,
//! FEA meshes with nodes and linear elements, lock links and applied forces.
//! Items are stored once in an [`Assembly`] arena and tagged with a [`Role`]
//! (boundary or internal). Every fan-out (state gather/scatter, residuals,
//! Jacobian injection) takes a role filter.

pub mod assembly;
pub mod body;
pub mod descriptor;
pub mod elements;
pub mod error;
pub mod force;
pub mod frame;
pub mod integrable;
pub mod item;
pub mod link;
pub mod mesh;
pub mod node;
pub mod state;

pub use assembly::{Assembly, DofBlock, DofCounts, Offsets};
pub use body::RigidBody;
pub use descriptor::{ConstraintRow, KrmBlock, SystemDescriptor, VariableBlock};
pub use elements::{BeamElement, BeamMaterial, BeamSection, MeshElement, SpringElement};
pub use error::{ModelError, Result};
pub use force::ForceItem;
pub use frame::{FrameMoving, Pose};
pub use integrable::Integrable;
pub use item::{DofRef, Item, ItemId, ItemKind, Role, RoleSet, Scope};
pub use link::Link;
pub use mesh::Mesh;
pub use node::{FeaNode, NodeKind};
pub use state::{BlockKind, State, StateBlock, StateDelta};
