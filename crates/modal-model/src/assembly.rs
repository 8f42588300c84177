//! The item arena and every fan-out over it.
//!
//! Items live in a single arena and carry a `Role`. `setup()` numbers the
//! state boundary-first: every boundary item gets its offsets before any
//! internal item does, so a reduced assembly can keep the boundary slice of
//! the state unchanged and replace the internal slice with modal coordinates.
//!
//! All offsets stored on items are relative to the start of this assembly.
//! Fan-outs receive the base offsets of the assembly inside a larger state.

use nalgebra::{DMatrix, DVector, Vector3};
use std::collections::BTreeSet;

use crate::descriptor::{ConstraintRow, KrmBlock, SystemDescriptor, VariableBlock};
use crate::elements::{ElementMatrices, Endpoint, MeshElement};
use crate::error::{ModelError, Result};
use crate::frame::Pose;
use crate::item::{DofRef, Item, ItemId, ItemKind, Role, RoleSet, Scope};
use crate::link::Link;
use crate::body::RigidBody;
use crate::mesh::Mesh;
use crate::state::{
    BlockKind, State, StateBlock, StateDelta, get_increment_block, increment_block,
};

/// Offsets of an item in the coordinate, velocity and constraint vectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Offsets {
    pub x: usize,
    pub w: usize,
    pub l: usize,
}

/// Sizes of one partition after `setup()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DofCounts {
    pub coords: usize,
    pub coords_w: usize,
    pub constraints: usize,
    pub bodies: usize,
    pub meshes: usize,
    pub nodes: usize,
    pub links: usize,
    pub others: usize,
}

/// One state block in the numbering produced by `setup()`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DofBlock {
    pub dof: DofRef,
    pub role: Role,
    pub kind: BlockKind,
    pub offset_x: usize,
    pub offset_w: usize,
}

#[derive(Debug, Clone)]
struct ItemSlot {
    role: Role,
    item: Item,
    offsets: Offsets,
    node_offsets: Vec<Offsets>,
}

/// A resolved endpoint: the block, its offsets (`None` when it carries no
/// DOF, e.g. a fixed body) and the partition it lives in.
struct Resolved<'a> {
    block: &'a dyn StateBlock,
    offsets: Option<Offsets>,
    role: Role,
}

struct ElementView<'a> {
    matrices: ElementMatrices,
    /// Relative velocity index of every local element DOF
    dofs: Vec<Option<usize>>,
    ends: [&'a dyn StateBlock; 2],
}

#[derive(Debug, Clone)]
pub struct Assembly {
    slots: Vec<Option<ItemSlot>>,
    pub gravity: Vector3<f64>,
    time: f64,
    boundary: DofCounts,
    internal: DofCounts,
}

impl Default for Assembly {
    fn default() -> Self {
        Self::new()
    }
}

impl Assembly {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            gravity: Vector3::zeros(),
            time: 0.0,
            boundary: DofCounts::default(),
            internal: DofCounts::default(),
        }
    }

    // ------------------------------------------------------------------
    // Membership

    pub fn add(&mut self, role: Role, item: impl Into<Item>) -> ItemId {
        self.slots.push(Some(ItemSlot {
            role,
            item: item.into(),
            offsets: Offsets::default(),
            node_offsets: Vec::new(),
        }));
        ItemId(self.slots.len() - 1)
    }

    /// Removes an item. Its id is never reused.
    pub fn remove(&mut self, id: ItemId) -> Option<(Role, Item)> {
        self.slots
            .get_mut(id.0)
            .and_then(Option::take)
            .map(|slot| (slot.role, slot.item))
    }

    /// Removes every item of `kind` in the given partition.
    pub fn remove_all(&mut self, role: Role, kind: ItemKind) -> usize {
        let mut removed = 0;
        for slot in &mut self.slots {
            if slot
                .as_ref()
                .is_some_and(|s| s.role == role && s.item.kind() == kind)
            {
                *slot = None;
                removed += 1;
            }
        }
        removed
    }

    pub fn get(&self, id: ItemId) -> Option<&Item> {
        self.slot(id).map(|s| &s.item)
    }

    pub fn get_mut(&mut self, id: ItemId) -> Option<&mut Item> {
        self.slots
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .map(|s| &mut s.item)
    }

    pub fn role(&self, id: ItemId) -> Option<Role> {
        self.slot(id).map(|s| s.role)
    }

    pub fn body(&self, id: ItemId) -> Option<&RigidBody> {
        match self.get(id)? {
            Item::Body(b) => Some(b),
            _ => None,
        }
    }

    pub fn body_mut(&mut self, id: ItemId) -> Option<&mut RigidBody> {
        match self.get_mut(id)? {
            Item::Body(b) => Some(b),
            _ => None,
        }
    }

    pub fn mesh(&self, id: ItemId) -> Option<&Mesh> {
        match self.get(id)? {
            Item::Mesh(m) => Some(m),
            _ => None,
        }
    }

    pub fn mesh_mut(&mut self, id: ItemId) -> Option<&mut Mesh> {
        match self.get_mut(id)? {
            Item::Mesh(m) => Some(m),
            _ => None,
        }
    }

    pub fn link(&self, id: ItemId) -> Option<&Link> {
        match self.get(id)? {
            Item::Link(l) => Some(l),
            _ => None,
        }
    }

    /// Items of the given partitions, in id order.
    pub fn items(&self, roles: RoleSet) -> impl Iterator<Item = (ItemId, Role, &Item)> {
        self.slots.iter().enumerate().filter_map(move |(i, s)| {
            s.as_ref()
                .filter(|s| roles.contains(s.role))
                .map(|s| (ItemId(i), s.role, &s.item))
        })
    }

    /// Arena contents with holes, so ids survive a round trip.
    pub fn export_items(&self) -> Vec<Option<(Role, Item)>> {
        self.slots
            .iter()
            .map(|s| s.as_ref().map(|s| (s.role, s.item.clone())))
            .collect()
    }

    /// Rebuilds an arena from `export_items` output. Call `setup()` afterwards.
    pub fn from_items(items: Vec<Option<(Role, Item)>>, gravity: Vector3<f64>, time: f64) -> Self {
        let mut asm = Self::new();
        asm.gravity = gravity;
        asm.time = time;
        asm.slots = items
            .into_iter()
            .map(|entry| {
                entry.map(|(role, item)| ItemSlot {
                    role,
                    item,
                    offsets: Offsets::default(),
                    node_offsets: Vec::new(),
                })
            })
            .collect();
        asm
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn set_time(&mut self, time: f64) {
        self.time = time;
    }

    fn slot(&self, id: ItemId) -> Option<&ItemSlot> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    fn slots(&self, roles: RoleSet) -> impl Iterator<Item = &ItemSlot> {
        self.slots
            .iter()
            .flatten()
            .filter(move |s| roles.contains(s.role))
    }

    // ------------------------------------------------------------------
    // Setup

    /// Captures link anchors from the current configuration and checks that
    /// every element and link can be evaluated.
    pub fn setup_initial(&mut self) -> Result<()> {
        let mut pending = Vec::new();
        for (i, slot) in self.slots.iter().enumerate() {
            let Some(slot) = slot else { continue };
            match &slot.item {
                Item::Link(link) => {
                    let a = self.resolve(&link.a)?;
                    let b = link.b.as_ref().map(|b| self.resolve(b)).transpose()?;
                    if link.locks_rotation() {
                        let ends = std::iter::once((link.a, &a)).chain(link.b.zip(b.as_ref()));
                        for (dof, end) in ends {
                            if end.block.kind() != BlockKind::Frame {
                                return Err(ModelError::IncompatibleEndpoint {
                                    endpoint: dof,
                                    reason: "rotational lock needs rotational DOF".to_string(),
                                });
                            }
                        }
                    }
                    if !link.is_initialized() {
                        pending.push((i, a.block.pose(), b.map(|b| b.block.pose())));
                    }
                }
                Item::Mesh(mesh) => {
                    for element in &mesh.elements {
                        let [a, b] = element.endpoints();
                        let ea = self.endpoint(&a)?;
                        let eb = self.endpoint(&b)?;
                        element.matrices(&ea, &eb)?;
                    }
                }
                Item::Other(force) => {
                    self.resolve(&force.target)?;
                }
                Item::Body(_) => {}
            }
        }

        for (i, pose_a, pose_b) in pending {
            if let Some(Some(ItemSlot {
                item: Item::Link(link),
                ..
            })) = self.slots.get_mut(i)
            {
                link.initialize(&pose_a, pose_b.as_ref());
            }
        }
        Ok(())
    }

    /// Numbers the state boundary-first. Idempotent for unchanged membership.
    pub fn setup(&mut self) {
        let mut x = 0;
        let mut w = 0;
        let mut l = 0;
        for role in [Role::Boundary, Role::Internal] {
            let mut counts = DofCounts::default();
            let (x0, w0, l0) = (x, w, l);
            for slot in self.slots.iter_mut().flatten().filter(|s| s.role == role) {
                let ItemSlot {
                    item,
                    offsets,
                    node_offsets,
                    ..
                } = slot;
                *offsets = Offsets { x, w, l };
                node_offsets.clear();
                match item {
                    Item::Body(body) => {
                        counts.bodies += 1;
                        if body.has_dofs() {
                            x += 7;
                            w += 6;
                        }
                    }
                    Item::Mesh(mesh) => {
                        counts.meshes += 1;
                        for node in &mesh.nodes {
                            node_offsets.push(Offsets { x, w, l });
                            x += node.kind().coords();
                            w += node.kind().coords_w();
                            counts.nodes += 1;
                        }
                    }
                    Item::Link(link) => {
                        counts.links += 1;
                        l += link.n_constraints();
                    }
                    Item::Other(_) => counts.others += 1,
                }
            }
            counts.coords = x - x0;
            counts.coords_w = w - w0;
            counts.constraints = l - l0;
            match role {
                Role::Boundary => self.boundary = counts,
                Role::Internal => self.internal = counts,
            }
        }
    }

    pub fn counts(&self, role: Role) -> DofCounts {
        match role {
            Role::Boundary => self.boundary,
            Role::Internal => self.internal,
        }
    }

    /// State blocks of the given partitions, ordered by velocity offset.
    pub fn blocks(&self, roles: RoleSet) -> Vec<DofBlock> {
        let mut blocks = Vec::new();
        for (i, slot) in self.slots.iter().enumerate() {
            let Some(slot) = slot.as_ref().filter(|s| roles.contains(s.role)) else {
                continue;
            };
            match &slot.item {
                Item::Body(body) if body.has_dofs() => blocks.push(DofBlock {
                    dof: DofRef::Body(ItemId(i)),
                    role: slot.role,
                    kind: BlockKind::Frame,
                    offset_x: slot.offsets.x,
                    offset_w: slot.offsets.w,
                }),
                Item::Mesh(mesh) => {
                    for (n, (node, o)) in mesh.nodes.iter().zip(&slot.node_offsets).enumerate() {
                        blocks.push(DofBlock {
                            dof: DofRef::Node(ItemId(i), n),
                            role: slot.role,
                            kind: node.kind(),
                            offset_x: o.x,
                            offset_w: o.w,
                        });
                    }
                }
                _ => {}
            }
        }
        blocks.sort_by_key(|b| b.offset_w);
        blocks
    }

    // ------------------------------------------------------------------
    // Endpoint resolution

    fn resolve(&self, dof: &DofRef) -> Result<Resolved<'_>> {
        let slot = self
            .slot(dof.item())
            .ok_or(ModelError::UnknownItem(dof.item()))?;
        match (dof, &slot.item) {
            (DofRef::Body(_), Item::Body(body)) => Ok(Resolved {
                block: body,
                offsets: body.has_dofs().then_some(slot.offsets),
                role: slot.role,
            }),
            (DofRef::Node(_, n), Item::Mesh(mesh)) => {
                let node = mesh.nodes.get(*n).ok_or(ModelError::InvalidDofRef(*dof))?;
                Ok(Resolved {
                    block: node,
                    offsets: slot.node_offsets.get(*n).copied(),
                    role: slot.role,
                })
            }
            _ => Err(ModelError::InvalidDofRef(*dof)),
        }
    }

    fn endpoint(&self, dof: &DofRef) -> Result<Endpoint> {
        let resolved = self.resolve(dof)?;
        Ok(Endpoint {
            dof: *dof,
            kind: resolved.block.kind(),
            reference: *resolved.block.reference(),
        })
    }

    /// Partition of the block a `DofRef` points to.
    pub fn role_of(&self, dof: &DofRef) -> Option<Role> {
        self.resolve(dof).ok().map(|r| r.role)
    }

    /// Current pose of a body or node.
    pub fn pose_of(&self, dof: &DofRef) -> Option<Pose> {
        self.resolve(dof).ok().map(|r| r.block.pose())
    }

    /// Kind of a body or node block.
    pub fn kind_of(&self, dof: &DofRef) -> Option<BlockKind> {
        self.resolve(dof).ok().map(|r| r.block.kind())
    }

    fn element_view(&self, element: &MeshElement) -> Option<ElementView<'_>> {
        let [a, b] = element.endpoints();
        let ra = self.resolve(&a).ok()?;
        let rb = self.resolve(&b).ok()?;
        let ea = Endpoint {
            dof: a,
            kind: ra.block.kind(),
            reference: *ra.block.reference(),
        };
        let eb = Endpoint {
            dof: b,
            kind: rb.block.kind(),
            reference: *rb.block.reference(),
        };
        let matrices = element.matrices(&ea, &eb).ok()?;
        let mut dofs = Vec::with_capacity(matrices.stiffness.nrows());
        for end in [&ra, &rb] {
            let n = end.block.kind().coords_w();
            match end.offsets {
                Some(o) => dofs.extend((0..n).map(|k| Some(o.w + k))),
                None => dofs.extend(std::iter::repeat_n(None, n)),
            }
        }
        Some(ElementView {
            matrices,
            dofs,
            ends: [ra.block, rb.block],
        })
    }

    fn elements(&self, scope: Scope) -> impl Iterator<Item = &MeshElement> {
        self.slots(scope.roles)
            .filter(move |_| scope.elastic)
            .filter_map(|s| match &s.item {
                Item::Mesh(mesh) => Some(mesh.elements.iter()),
                _ => None,
            })
            .flatten()
    }

    fn for_each_block(&self, roles: RoleSet, mut f: impl FnMut(&dyn StateBlock, Offsets)) {
        for slot in self.slots(roles) {
            match &slot.item {
                Item::Body(body) if body.has_dofs() => f(body, slot.offsets),
                Item::Mesh(mesh) => {
                    for (node, o) in mesh.nodes.iter().zip(&slot.node_offsets) {
                        f(node, *o);
                    }
                }
                _ => {}
            }
        }
    }

    fn for_each_block_mut(&mut self, roles: RoleSet, mut f: impl FnMut(&mut dyn StateBlock, Offsets)) {
        for slot in self.slots.iter_mut().flatten() {
            if !roles.contains(slot.role) {
                continue;
            }
            match &mut slot.item {
                Item::Body(body) if body.has_dofs() => f(body, slot.offsets),
                Item::Mesh(mesh) => {
                    for (node, o) in mesh.nodes.iter_mut().zip(&slot.node_offsets) {
                        f(node, *o);
                    }
                }
                _ => {}
            }
        }
    }

    // ------------------------------------------------------------------
    // State protocol

    pub fn state_gather(&self, roles: RoleSet, off_x: usize, x: &mut State, off_v: usize, v: &mut StateDelta) {
        self.for_each_block(roles, |block, o| {
            let (nx, nw) = (block.kind().coords(), block.kind().coords_w());
            let xs = &mut x.as_mut_slice()[off_x + o.x..off_x + o.x + nx];
            let vs = &mut v.as_mut_slice()[off_v + o.w..off_v + o.w + nw];
            block.gather_state(xs, vs);
        });
    }

    pub fn state_scatter(&mut self, roles: RoleSet, off_x: usize, x: &State, off_v: usize, v: &StateDelta) {
        self.for_each_block_mut(roles, |block, o| {
            let (nx, nw) = (block.kind().coords(), block.kind().coords_w());
            block.scatter_state(
                &x.as_slice()[off_x + o.x..off_x + o.x + nx],
                &v.as_slice()[off_v + o.w..off_v + o.w + nw],
            );
        });
    }

    pub fn state_gather_acceleration(&self, roles: RoleSet, off_a: usize, a: &mut StateDelta) {
        self.for_each_block(roles, |block, o| {
            let nw = block.kind().coords_w();
            block.gather_acceleration(&mut a.as_mut_slice()[off_a + o.w..off_a + o.w + nw]);
        });
    }

    pub fn state_scatter_acceleration(&mut self, roles: RoleSet, off_a: usize, a: &StateDelta) {
        self.for_each_block_mut(roles, |block, o| {
            let nw = block.kind().coords_w();
            block.scatter_acceleration(&a.as_slice()[off_a + o.w..off_a + o.w + nw]);
        });
    }

    pub fn state_increment(
        &self,
        roles: RoleSet,
        off_x: usize,
        x_new: &mut State,
        x: &State,
        off_v: usize,
        dv: &StateDelta,
    ) {
        for b in self.blocks(roles) {
            let (nx, nw) = (b.kind.coords(), b.kind.coords_w());
            let rx = off_x + b.offset_x..off_x + b.offset_x + nx;
            let rv = off_v + b.offset_w..off_v + b.offset_w + nw;
            increment_block(
                b.kind,
                &mut x_new.as_mut_slice()[rx.clone()],
                &x.as_slice()[rx],
                &dv.as_slice()[rv],
            );
        }
    }

    pub fn state_get_increment(
        &self,
        roles: RoleSet,
        off_x: usize,
        x_new: &State,
        x: &State,
        off_v: usize,
        dv: &mut StateDelta,
    ) {
        for b in self.blocks(roles) {
            let (nx, nw) = (b.kind.coords(), b.kind.coords_w());
            let rx = off_x + b.offset_x..off_x + b.offset_x + nx;
            let rv = off_v + b.offset_w..off_v + b.offset_w + nw;
            get_increment_block(
                b.kind,
                &mut dv.as_mut_slice()[rv],
                &x_new.as_slice()[rx.clone()],
                &x.as_slice()[rx],
            );
        }
    }

    pub fn gather_reactions(&self, roles: RoleSet, off_l: usize, l: &mut DVector<f64>) {
        for slot in self.slots(roles) {
            if let Item::Link(link) = &slot.item {
                for (k, r) in link.reactions.iter().enumerate() {
                    l[off_l + slot.offsets.l + k] = *r;
                }
            }
        }
    }

    pub fn scatter_reactions(&mut self, roles: RoleSet, off_l: usize, l: &DVector<f64>) {
        for slot in self.slots.iter_mut().flatten() {
            if !roles.contains(slot.role) {
                continue;
            }
            if let Item::Link(link) = &mut slot.item {
                let n = link.n_constraints();
                link.reactions = (0..n).map(|k| l[off_l + slot.offsets.l + k]).collect();
            }
        }
    }

    // ------------------------------------------------------------------
    // Residuals

    /// `R += c·F`: gravity, gyroscopic terms, force items and, for elastic
    /// scopes, the elastic and viscous element forces.
    pub fn load_residual_f(&self, scope: Scope, off: usize, r: &mut DVector<f64>, c: f64) {
        let gravity = self.gravity;
        self.for_each_block(scope.roles, |block, o| {
            let nw = block.kind().coords_w();
            block.load_residual_f(&mut r.as_mut_slice()[off + o.w..off + o.w + nw], c, &gravity);
        });

        for slot in self.slots(scope.roles) {
            if let Item::Other(item) = &slot.item
                && let Ok(target) = self.resolve(&item.target)
                && let Some(o) = target.offsets
            {
                for i in 0..3 {
                    r[off + o.w + i] += c * item.force[i];
                }
                if target.block.kind() == BlockKind::Frame {
                    for i in 0..3 {
                        r[off + o.w + 3 + i] += c * item.torque[i];
                    }
                }
            }
        }

        for element in self.elements(scope) {
            let Some(view) = self.element_view(element) else {
                continue;
            };
            let u = DVector::from_vec(
                view.ends.iter().flat_map(|b| b.displacement().as_slice().to_vec()).collect(),
            );
            let u_dt = DVector::from_vec(
                view.ends.iter().flat_map(|b| b.velocity().as_slice().to_vec()).collect(),
            );
            let f = -(&view.matrices.stiffness * u + &view.matrices.damping * u_dt);
            for (k, dof) in view.dofs.iter().enumerate() {
                if let Some(i) = dof {
                    r[off + i] += c * f[k];
                }
            }
        }
    }

    /// `R += c·M·w`.
    pub fn load_residual_mv(&self, scope: Scope, off: usize, r: &mut DVector<f64>, w: &DVector<f64>, c: f64) {
        self.for_each_block(scope.roles, |block, o| {
            let nw = block.kind().coords_w();
            let m = block.mass_block();
            let mw = m * w.rows(off + o.w, nw);
            for i in 0..nw {
                r[off + o.w + i] += c * mw[i];
            }
        });

        for element in self.elements(scope) {
            let Some(view) = self.element_view(element) else {
                continue;
            };
            let local_w = DVector::from_iterator(
                view.dofs.len(),
                view.dofs.iter().map(|d| d.map_or(0.0, |i| w[off + i])),
            );
            let mw = &view.matrices.mass * local_w;
            for (k, dof) in view.dofs.iter().enumerate() {
                if let Some(i) = dof {
                    r[off + i] += c * mw[k];
                }
            }
        }
    }

    /// Constraint rows of every link in `roles`: `(row, [(col, value)])`
    /// with indices relative to this assembly.
    fn link_rows(&self, roles: RoleSet) -> Vec<(usize, Vec<(usize, f64)>)> {
        let mut rows = Vec::new();
        for slot in self.slots(roles) {
            let Item::Link(link) = &slot.item else { continue };
            let Ok(a) = self.resolve(&link.a) else { continue };
            let b = link.b.as_ref().and_then(|b| self.resolve(b).ok());
            let pose_a = a.block.pose();
            let pose_b = b.as_ref().map(|b| b.block.pose());
            let (ja, jb) = link.jacobians(&pose_a, pose_b.as_ref());

            for (k, row) in link.active_rows().enumerate() {
                let mut entries = Vec::new();
                for (end, jac) in [(Some(&a), &ja), (b.as_ref(), &jb)] {
                    let Some(end) = end else { continue };
                    let Some(o) = end.offsets else { continue };
                    for col in 0..end.block.kind().coords_w() {
                        let value = jac[(row, col)];
                        if value != 0.0 {
                            entries.push((o.w + col, value));
                        }
                    }
                }
                rows.push((slot.offsets.l + k, entries));
            }
        }
        rows
    }

    /// `R += c·Cqᵗ·L`.
    pub fn load_residual_cql(
        &self,
        roles: RoleSet,
        off_v: usize,
        off_l: usize,
        r: &mut DVector<f64>,
        l: &DVector<f64>,
        c: f64,
    ) {
        for (row, entries) in self.link_rows(roles) {
            let lambda = l[off_l + row];
            for (col, value) in entries {
                r[off_v + col] += c * value * lambda;
            }
        }
    }

    /// `Qc += c·C`, optionally clamped to `±recovery_clamp`.
    pub fn load_constraint_c(
        &self,
        roles: RoleSet,
        off_l: usize,
        qc: &mut DVector<f64>,
        c: f64,
        do_clamp: bool,
        recovery_clamp: f64,
    ) {
        for slot in self.slots(roles) {
            let Item::Link(link) = &slot.item else { continue };
            let Some(pose_a) = self.pose_of(&link.a) else { continue };
            let pose_b = link.b.as_ref().and_then(|b| self.pose_of(b));
            let violation = link.violation(&pose_a, pose_b.as_ref());
            for (k, row) in link.active_rows().enumerate() {
                let mut value = c * violation[row];
                if do_clamp {
                    value = value.clamp(-recovery_clamp, recovery_clamp);
                }
                qc[off_l + slot.offsets.l + k] += value;
            }
        }
    }

    /// `Qc += c·Ct`. Locks are scleronomic, so this adds nothing.
    pub fn load_constraint_ct(&self, _roles: RoleSet, _off_l: usize, _qc: &mut DVector<f64>, _c: f64) {}

    // ------------------------------------------------------------------
    // Descriptor

    pub fn inject_variables(&self, roles: RoleSet, off_w: usize, desc: &mut SystemDescriptor) {
        self.for_each_block(roles, |block, o| {
            desc.insert_variables(VariableBlock {
                offset: off_w + o.w,
                mass: block.mass_block(),
            });
        });
    }

    pub fn inject_constraints(&self, roles: RoleSet, off_w: usize, off_l: usize, desc: &mut SystemDescriptor) {
        for (row, entries) in self.link_rows(roles) {
            desc.insert_constraint(ConstraintRow {
                offset: off_l + row,
                entries: entries.into_iter().map(|(c, v)| (off_w + c, v)).collect(),
            });
        }
    }

    /// Inserts `K·kf + R·rf + M·mf` of every element in scope.
    pub fn inject_krm_matrices(
        &self,
        scope: Scope,
        off_w: usize,
        desc: &mut SystemDescriptor,
        kf: f64,
        rf: f64,
        mf: f64,
    ) {
        for element in self.elements(scope) {
            let Some(view) = self.element_view(element) else {
                continue;
            };
            let kept: Vec<usize> = (0..view.dofs.len()).filter(|k| view.dofs[*k].is_some()).collect();
            if kept.is_empty() {
                continue;
            }
            let full = &view.matrices.stiffness * kf + &view.matrices.damping * rf + &view.matrices.mass * mf;
            let matrix = DMatrix::from_fn(kept.len(), kept.len(), |i, j| full[(kept[i], kept[j])]);
            let indices = kept.iter().filter_map(|k| view.dofs[*k]).map(|i| off_w + i).collect();
            desc.insert_krm_block(KrmBlock { indices, matrix });
        }
    }

    // ------------------------------------------------------------------
    // Mass bookkeeping

    /// Total mass and center of mass of bodies, nodes and elements.
    pub fn mass_center(&self, roles: RoleSet) -> (f64, Vector3<f64>) {
        let mut mass = 0.0;
        let mut moment = Vector3::zeros();
        for slot in self.slots(roles) {
            match &slot.item {
                Item::Body(body) => {
                    mass += body.mass;
                    moment += body.frame.pos * body.mass;
                }
                Item::Mesh(mesh) => {
                    for node in &mesh.nodes {
                        mass += node.mass;
                        moment += node.frame.pos * node.mass;
                    }
                    for element in &mesh.elements {
                        let [a, b] = element.endpoints();
                        if let (Ok(ea), Ok(eb)) = (self.endpoint(&a), self.endpoint(&b)) {
                            let (m, center) = element.mass_properties(&ea, &eb);
                            mass += m;
                            moment += center * m;
                        }
                    }
                }
                _ => {}
            }
        }
        if mass > 0.0 {
            (mass, moment / mass)
        } else {
            (0.0, Vector3::zeros())
        }
    }

    pub fn remove_mass(&mut self, roles: RoleSet) {
        for slot in self.slots.iter_mut().flatten() {
            if !roles.contains(slot.role) {
                continue;
            }
            match &mut slot.item {
                Item::Body(body) => body.remove_mass(),
                Item::Mesh(mesh) => mesh.remove_mass(),
                _ => {}
            }
        }
    }

    pub fn set_no_speed_no_acceleration(&mut self, roles: RoleSet) {
        self.for_each_block_mut(roles, |block, _| block.set_no_speed_no_acceleration());
    }

    /// Items (by id) that any link or element in `roles` reaches outside of
    /// the same partition set.
    pub fn foreign_references(&self, roles: RoleSet, kinds: &[ItemKind]) -> BTreeSet<ItemId> {
        let mut out = BTreeSet::new();
        for slot in self.slots(roles) {
            if !kinds.contains(&slot.item.kind()) {
                continue;
            }
            let refs: Vec<DofRef> = match &slot.item {
                Item::Link(link) => std::iter::once(link.a).chain(link.b).collect(),
                Item::Mesh(mesh) => mesh.elements.iter().flat_map(|e| e.endpoints()).collect(),
                Item::Other(item) => vec![item.target],
                Item::Body(_) => Vec::new(),
            };
            for dof in refs {
                if let Some(role) = self.role_of(&dof)
                    && !roles.contains(role)
                {
                    out.insert(dof.item());
                }
            }
        }
        out
    }
}
