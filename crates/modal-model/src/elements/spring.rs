//! Axial spring-damper between two translational DOF triplets.
//!
//! ## Formulation
//!
//! With `n` the unit axis from endpoint a to endpoint b:
//! ```text
//! K = k * [ n nᵀ  -n nᵀ]      R = c * [ n nᵀ  -n nᵀ]
//!         [-n nᵀ   n nᵀ]              [-n nᵀ   n nᵀ]
//! ```
//! Rotational DOF of frame endpoints are not coupled.

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

use super::{ElementMatrices, Endpoint, axis};
use crate::error::Result;
use crate::item::DofRef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpringElement {
    pub a: DofRef,
    pub b: DofRef,
    pub stiffness: f64,
    pub damping: f64,
    /// Spring mass, lumped half on each endpoint
    pub mass: f64,
}

impl SpringElement {
    pub fn new(a: DofRef, b: DofRef, stiffness: f64) -> Self {
        Self {
            a,
            b,
            stiffness,
            damping: 0.0,
            mass: 0.0,
        }
    }

    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    pub fn with_mass(mut self, mass: f64) -> Self {
        self.mass = mass;
        self
    }

    pub fn matrices(&self, a: &Endpoint, b: &Endpoint) -> Result<ElementMatrices> {
        let (n, _) = axis(a, b)?;
        let na = a.kind.coords_w();
        let nn: Matrix3<f64> = n * n.transpose();
        let half_mass = Matrix3::identity() * (0.5 * self.mass);

        let mut out = ElementMatrices::zeros(na + b.kind.coords_w());
        for (i, si) in [(0, 1.0), (na, -1.0)] {
            for (j, sj) in [(0, 1.0), (na, -1.0)] {
                let sign = si * sj;
                out.stiffness
                    .fixed_view_mut::<3, 3>(i, j)
                    .copy_from(&(nn * (sign * self.stiffness)));
                out.damping
                    .fixed_view_mut::<3, 3>(i, j)
                    .copy_from(&(nn * (sign * self.damping)));
            }
            out.mass.fixed_view_mut::<3, 3>(i, i).copy_from(&half_mass);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Pose;
    use crate::item::ItemId;
    use crate::state::BlockKind;
    use nalgebra::{UnitQuaternion, Vector3};

    fn endpoint(node: usize, kind: BlockKind, pos: Vector3<f64>) -> Endpoint {
        Endpoint {
            dof: DofRef::Node(ItemId(0), node),
            kind,
            reference: Pose::new(pos, UnitQuaternion::identity()),
        }
    }

    #[test]
    fn axial_spring_along_x() {
        let a = endpoint(0, BlockKind::Frame, Vector3::zeros());
        let b = endpoint(1, BlockKind::Point, Vector3::new(2.0, 0.0, 0.0));
        let spring = SpringElement::new(a.dof, b.dof, 100.0).with_damping(3.0);
        let m = spring.matrices(&a, &b).unwrap();

        assert_eq!(m.stiffness.shape(), (9, 9));
        assert_eq!(m.stiffness[(0, 0)], 100.0);
        assert_eq!(m.stiffness[(0, 6)], -100.0);
        assert_eq!(m.stiffness[(6, 6)], 100.0);
        assert_eq!(m.stiffness[(1, 1)], 0.0);
        assert_eq!(m.damping[(6, 0)], -3.0);
        // rotational DOF of the frame endpoint stay uncoupled
        assert!(m.stiffness.rows(3, 3).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn zero_length_spring_is_rejected() {
        let a = endpoint(0, BlockKind::Point, Vector3::zeros());
        let b = endpoint(1, BlockKind::Point, Vector3::zeros());
        let spring = SpringElement::new(a.dof, b.dof, 1.0);
        assert!(spring.matrices(&a, &b).is_err());
    }
}
