//! Generic physics items without DOF of their own.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::item::DofRef;

/// Applies a constant force (absolute frame) and torque (local frame of the
/// target) to a body or node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForceItem {
    pub name: String,
    pub target: DofRef,
    pub force: Vector3<f64>,
    pub torque: Vector3<f64>,
}

impl ForceItem {
    pub fn new(name: impl Into<String>, target: DofRef, force: Vector3<f64>) -> Self {
        Self {
            name: name.into(),
            target,
            force,
            torque: Vector3::zeros(),
        }
    }

    pub fn with_torque(mut self, torque: Vector3<f64>) -> Self {
        self.torque = torque;
        self
    }
}
