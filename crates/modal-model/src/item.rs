//! The item arena: every physics item is stored once and tagged with the
//! partition it belongs to.

use serde::{Deserialize, Serialize};

use crate::body::RigidBody;
use crate::force::ForceItem;
use crate::link::Link;
use crate::mesh::Mesh;

/// Partition of a modal assembly an item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Interface items, kept as state after reduction
    Boundary,
    /// Items hidden behind the modal coordinates after reduction
    Internal,
}

/// Filter over roles used by every fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleSet {
    Boundary,
    Internal,
    All,
}

impl RoleSet {
    pub fn contains(self, role: Role) -> bool {
        match self {
            RoleSet::Boundary => role == Role::Boundary,
            RoleSet::Internal => role == Role::Internal,
            RoleSet::All => true,
        }
    }
}

impl From<Role> for RoleSet {
    fn from(role: Role) -> Self {
        match role {
            Role::Boundary => RoleSet::Boundary,
            Role::Internal => RoleSet::Internal,
        }
    }
}

/// Which items a fan-out visits.
///
/// With `elastic == false` the element forces, element masses and element
/// Jacobian blocks of the visited meshes are skipped: the nodes still take part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scope {
    pub roles: RoleSet,
    pub elastic: bool,
}

impl Scope {
    pub const ALL: Scope = Scope {
        roles: RoleSet::All,
        elastic: true,
    };

    pub fn new(roles: RoleSet, elastic: bool) -> Self {
        Self { roles, elastic }
    }
}

/// Stable handle into the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub usize);

/// Reference to a block of DOF owned by a body or by a mesh node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DofRef {
    Body(ItemId),
    Node(ItemId, usize),
}

impl DofRef {
    pub fn item(&self) -> ItemId {
        match self {
            DofRef::Body(id) | DofRef::Node(id, _) => *id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    Body,
    Mesh,
    Link,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Item {
    Body(RigidBody),
    Mesh(Mesh),
    Link(Link),
    Other(ForceItem),
}

impl Item {
    pub fn kind(&self) -> ItemKind {
        match self {
            Item::Body(_) => ItemKind::Body,
            Item::Mesh(_) => ItemKind::Mesh,
            Item::Link(_) => ItemKind::Link,
            Item::Other(_) => ItemKind::Other,
        }
    }
}

impl From<RigidBody> for Item {
    fn from(body: RigidBody) -> Self {
        Item::Body(body)
    }
}

impl From<Mesh> for Item {
    fn from(mesh: Mesh) -> Self {
        Item::Mesh(mesh)
    }
}

impl From<Link> for Item {
    fn from(link: Link) -> Self {
        Item::Link(link)
    }
}

impl From<ForceItem> for Item {
    fn from(item: ForceItem) -> Self {
        Item::Other(item)
    }
}
