//! Linear finite elements connecting two DOF blocks.
//!
//! Element matrices are built from the reference configuration of the two
//! endpoints and are ordered as `[endpoint a DOF; endpoint b DOF]`, with
//! the DOF count of each endpoint given by its `BlockKind`.

pub mod beam;
pub mod spring;

use nalgebra::{DMatrix, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::frame::Pose;
use crate::item::DofRef;
use crate::state::BlockKind;

pub use beam::{BeamElement, BeamMaterial, BeamSection};
pub use spring::SpringElement;

/// What an element needs to know about one endpoint.
#[derive(Debug, Clone, Copy)]
pub struct Endpoint {
    pub dof: DofRef,
    pub kind: BlockKind,
    pub reference: Pose,
}

/// Element stiffness, damping and mass in endpoint DOF order.
#[derive(Debug, Clone)]
pub struct ElementMatrices {
    pub stiffness: DMatrix<f64>,
    pub damping: DMatrix<f64>,
    pub mass: DMatrix<f64>,
}

impl ElementMatrices {
    pub fn zeros(n: usize) -> Self {
        Self {
            stiffness: DMatrix::zeros(n, n),
            damping: DMatrix::zeros(n, n),
            mass: DMatrix::zeros(n, n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MeshElement {
    Spring(SpringElement),
    Beam(BeamElement),
}

impl MeshElement {
    pub fn endpoints(&self) -> [DofRef; 2] {
        match self {
            MeshElement::Spring(s) => [s.a, s.b],
            MeshElement::Beam(b) => [b.a, b.b],
        }
    }

    pub fn matrices(&self, a: &Endpoint, b: &Endpoint) -> Result<ElementMatrices> {
        match self {
            MeshElement::Spring(s) => s.matrices(a, b),
            MeshElement::Beam(beam) => beam.matrices(a, b),
        }
    }

    /// Total element mass and its center, from the reference configuration.
    pub fn mass_properties(&self, a: &Endpoint, b: &Endpoint) -> (f64, Vector3<f64>) {
        let center = (a.reference.pos + b.reference.pos) * 0.5;
        let mass = match self {
            MeshElement::Spring(s) => s.mass,
            MeshElement::Beam(beam) => beam.total_mass(a, b),
        };
        (mass, center)
    }

    pub fn remove_mass(&mut self) {
        match self {
            MeshElement::Spring(s) => s.mass = 0.0,
            MeshElement::Beam(beam) => beam.material.density = 0.0,
        }
    }
}

impl From<SpringElement> for MeshElement {
    fn from(element: SpringElement) -> Self {
        MeshElement::Spring(element)
    }
}

impl From<BeamElement> for MeshElement {
    fn from(element: BeamElement) -> Self {
        MeshElement::Beam(element)
    }
}

/// Unit axis and length between two reference positions.
pub(crate) fn axis(a: &Endpoint, b: &Endpoint) -> Result<(Vector3<f64>, f64)> {
    let d = b.reference.pos - a.reference.pos;
    let length = d.norm();
    if length < 1e-12 {
        return Err(crate::error::ModelError::ZeroLength);
    }
    Ok((d / length, length))
}
