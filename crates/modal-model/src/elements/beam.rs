/// Two-node Euler-Bernoulli beam between frame endpoints.
///
/// Each endpoint carries 6 degrees of freedom:
/// - 3 translations (ux, uy, uz)
/// - 3 rotations (θx, θy, θz)
///
/// The stiffness is the classic 12×12 linear beam matrix (axial, torsion,
/// bending in two planes), rotated from the beam axes to the global axes.
/// Mass is lumped half on each endpoint, with a small rotational inertia so
/// that the nodal mass blocks stay positive definite.
///
/// References:
/// - "Finite Element Procedures" by K.J. Bathe
/// - Cook et al., "Concepts and Applications of Finite Element Analysis"
use nalgebra::{DMatrix, Matrix3, SMatrix, Vector3};
use serde::{Deserialize, Serialize};

use super::{ElementMatrices, Endpoint, axis};
use crate::error::{ModelError, Result};
use crate::item::DofRef;
use crate::state::BlockKind;

/// Beam section properties
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeamSection {
    /// Cross-sectional area
    pub area: f64,
    /// Second moment of area about local y-axis (Iyy)
    pub iyy: f64,
    /// Second moment of area about local z-axis (Izz)
    pub izz: f64,
    /// Torsional constant (J)
    pub torsion_constant: f64,
}

impl BeamSection {
    /// Solid circular section of the given radius
    pub fn circular(radius: f64) -> Self {
        let area = std::f64::consts::PI * radius.powi(2);
        let i = std::f64::consts::PI * radius.powi(4) / 4.0;
        Self {
            area,
            iyy: i,
            izz: i,
            torsion_constant: 2.0 * i,
        }
    }

    /// Solid rectangle, `width` along local y and `height` along local z
    pub fn rectangular(width: f64, height: f64) -> Self {
        let area = width * height;
        let iyy = width * height.powi(3) / 12.0;
        let izz = height * width.powi(3) / 12.0;
        // Saint-Venant approximation for a thin-walled-free rectangle
        let (a, b) = if width >= height {
            (width, height)
        } else {
            (height, width)
        };
        let j = a * b.powi(3) * (1.0 / 3.0 - 0.21 * (b / a) * (1.0 - b.powi(4) / (12.0 * a.powi(4))));
        Self {
            area,
            iyy,
            izz,
            torsion_constant: j,
        }
    }

    pub fn custom(area: f64, iyy: f64, izz: f64, j: f64) -> Self {
        Self {
            area,
            iyy,
            izz,
            torsion_constant: j,
        }
    }
}

/// Isotropic linear elastic material
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeamMaterial {
    pub young_modulus: f64,
    pub shear_modulus: f64,
    pub density: f64,
}

impl BeamMaterial {
    pub fn new(young_modulus: f64, poisson_ratio: f64, density: f64) -> Self {
        Self {
            young_modulus,
            shear_modulus: young_modulus / (2.0 * (1.0 + poisson_ratio)),
            density,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamElement {
    pub a: DofRef,
    pub b: DofRef,
    pub section: BeamSection,
    pub material: BeamMaterial,
    /// Stiffness-proportional damping, R = β K
    pub rayleigh_beta: f64,
}

impl BeamElement {
    pub fn new(a: DofRef, b: DofRef, section: BeamSection, material: BeamMaterial) -> Self {
        Self {
            a,
            b,
            section,
            material,
            rayleigh_beta: 0.0,
        }
    }

    pub fn with_rayleigh_beta(mut self, beta: f64) -> Self {
        self.rayleigh_beta = beta;
        self
    }

    pub fn total_mass(&self, a: &Endpoint, b: &Endpoint) -> f64 {
        let length = (b.reference.pos - a.reference.pos).norm();
        self.material.density * self.section.area * length
    }

    pub fn matrices(&self, a: &Endpoint, b: &Endpoint) -> Result<ElementMatrices> {
        for end in [a, b] {
            if end.kind != BlockKind::Frame {
                return Err(ModelError::IncompatibleEndpoint {
                    endpoint: end.dof,
                    reason: "beam endpoints need rotational DOF".to_string(),
                });
            }
        }
        let (ex, length) = axis(a, b)?;
        let r = Self::axes(&ex);
        let t = Self::transformation_matrix(&r);

        let k_local = self.local_stiffness(length);
        let stiffness = t.transpose() * k_local * &t;
        let damping = &stiffness * self.rayleigh_beta;
        let mass = self.lumped_mass(length, &r);

        Ok(ElementMatrices {
            stiffness,
            damping,
            mass,
        })
    }

    /// Rows are the local axes: x along the beam, y and z perpendicular.
    fn axes(ex: &Vector3<f64>) -> Matrix3<f64> {
        // Choose a reference vector not parallel to the beam axis
        let reference = if ex.x.abs() < 0.9 {
            Vector3::x()
        } else {
            Vector3::y()
        };
        let ez = ex.cross(&reference).normalize();
        let ey = ez.cross(ex);
        Matrix3::from_rows(&[ex.transpose(), ey.transpose(), ez.transpose()])
    }

    /// 12×12 block-diagonal rotation from global to local components.
    fn transformation_matrix(r: &Matrix3<f64>) -> DMatrix<f64> {
        let mut t = DMatrix::zeros(12, 12);
        for i in 0..4 {
            t.fixed_view_mut::<3, 3>(3 * i, 3 * i).copy_from(r);
        }
        t
    }

    /// Local stiffness in the beam axes: axial, torsion, bending in the
    /// xy plane (Izz) and in the xz plane (Iyy).
    fn local_stiffness(&self, l: f64) -> SMatrix<f64, 12, 12> {
        let e = self.material.young_modulus;
        let g = self.material.shear_modulus;
        let a = self.section.area;
        let iyy = self.section.iyy;
        let izz = self.section.izz;
        let j = self.section.torsion_constant;

        let mut k = SMatrix::<f64, 12, 12>::zeros();

        let k_axial = e * a / l;
        let k_torsion = g * j / l;
        for (d0, d1, kv) in [(0, 6, k_axial), (3, 9, k_torsion)] {
            k[(d0, d0)] = kv;
            k[(d1, d1)] = kv;
            k[(d0, d1)] = -kv;
            k[(d1, d0)] = -kv;
        }

        // Bending in the xy plane couples (v, θz): DOFs 1, 5, 7, 11.
        // Bending in the xz plane couples (w, θy): DOFs 2, 4, 8, 10, where
        // a positive θy lowers w, hence the flipped coupling sign.
        for (v0, r0, v1, r1, inertia, s) in [(1, 5, 7, 11, izz, 1.0), (2, 4, 8, 10, iyy, -1.0)] {
            let k_bend = 12.0 * e * inertia / l.powi(3);
            let k_cpl = s * 6.0 * e * inertia / l.powi(2);
            let k_rot = 4.0 * e * inertia / l;
            let k_rot2 = 2.0 * e * inertia / l;

            k[(v0, v0)] = k_bend;
            k[(v1, v1)] = k_bend;
            k[(v0, v1)] = -k_bend;
            k[(v1, v0)] = -k_bend;

            k[(r0, r0)] = k_rot;
            k[(r1, r1)] = k_rot;
            k[(r0, r1)] = k_rot2;
            k[(r1, r0)] = k_rot2;

            for (vi, ri, sign) in [(v0, r0, 1.0), (v0, r1, 1.0), (v1, r0, -1.0), (v1, r1, -1.0)] {
                k[(vi, ri)] = sign * k_cpl;
                k[(ri, vi)] = sign * k_cpl;
            }
        }

        k
    }

    fn lumped_mass(&self, l: f64, r: &Matrix3<f64>) -> DMatrix<f64> {
        let half = 0.5 * self.material.density * self.section.area * l;
        let torsion = 0.5 * self.material.density * (self.section.iyy + self.section.izz) * l;
        let bending = half * l * l / 12.0;
        let local = Matrix3::from_diagonal(&Vector3::new(torsion, bending, bending));
        let rotational = r.transpose() * local * r;

        let mut m = DMatrix::zeros(12, 12);
        for node in 0..2 {
            let o = 6 * node;
            m.fixed_view_mut::<3, 3>(o, o)
                .copy_from(&(Matrix3::identity() * half));
            m.fixed_view_mut::<3, 3>(o + 3, o + 3).copy_from(&rotational);
        }
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Pose;
    use crate::item::ItemId;
    use approx::assert_relative_eq;
    use nalgebra::{DVector, UnitQuaternion};

    fn frame_endpoint(node: usize, pos: Vector3<f64>) -> Endpoint {
        Endpoint {
            dof: DofRef::Node(ItemId(0), node),
            kind: BlockKind::Frame,
            reference: Pose::new(pos, UnitQuaternion::identity()),
        }
    }

    fn steel() -> BeamMaterial {
        BeamMaterial::new(200e9, 0.3, 7850.0)
    }

    #[test]
    fn axial_stiffness_is_ea_over_l() {
        let a = frame_endpoint(0, Vector3::zeros());
        let b = frame_endpoint(1, Vector3::new(1.0, 0.0, 0.0));
        let beam = BeamElement::new(a.dof, b.dof, BeamSection::custom(0.01, 1e-6, 1e-6, 1e-6), steel());
        let m = beam.matrices(&a, &b).unwrap();

        let expected_axial = 200e9 * 0.01 / 1.0;
        assert_relative_eq!(m.stiffness[(0, 0)], expected_axial, max_relative = 1e-9);
        assert_relative_eq!(m.stiffness[(0, 6)], -expected_axial, max_relative = 1e-9);
    }

    #[test]
    fn stiffness_is_symmetric_for_skewed_beam() {
        let a = frame_endpoint(0, Vector3::new(0.1, 0.2, 0.3));
        let b = frame_endpoint(1, Vector3::new(1.0, -0.5, 0.7));
        let beam = BeamElement::new(a.dof, b.dof, BeamSection::rectangular(0.02, 0.05), steel());
        let k = beam.matrices(&a, &b).unwrap().stiffness;
        assert_relative_eq!(k.clone(), k.transpose(), max_relative = 1e-10, epsilon = 1e-3);
    }

    #[test]
    fn rigid_motions_produce_no_elastic_force() {
        let pa = Vector3::new(0.0, 0.0, 0.0);
        let pb = Vector3::new(0.6, 0.8, 0.0);
        let a = frame_endpoint(0, pa);
        let b = frame_endpoint(1, pb);
        let beam = BeamElement::new(a.dof, b.dof, BeamSection::circular(0.01), steel());
        let k = beam.matrices(&a, &b).unwrap().stiffness;
        let scale = k.amax();

        // three translations
        for axis in 0..3 {
            let mut u = DVector::zeros(12);
            u[axis] = 1.0;
            u[6 + axis] = 1.0;
            assert!((&k * u).amax() < 1e-9 * scale);
        }
        // three small rotations about endpoint a
        for axis in 0..3 {
            let mut theta = Vector3::zeros();
            theta[axis] = 1.0;
            let ub = theta.cross(&(pb - pa));
            let mut u = DVector::zeros(12);
            for i in 0..3 {
                u[3 + i] = theta[i];
                u[6 + i] = ub[i];
                u[9 + i] = theta[i];
            }
            assert!((&k * u).amax() < 1e-9 * scale);
        }
    }

    #[test]
    fn lumped_mass_splits_total_mass() {
        let a = frame_endpoint(0, Vector3::zeros());
        let b = frame_endpoint(1, Vector3::new(0.0, 0.0, 2.0));
        let beam = BeamElement::new(a.dof, b.dof, BeamSection::custom(0.01, 1e-6, 1e-6, 2e-6), steel());
        let m = beam.matrices(&a, &b).unwrap().mass;
        let total = beam.total_mass(&a, &b);
        assert_relative_eq!(m[(0, 0)] + m[(6, 6)], total, max_relative = 1e-12);
        assert!(m.fixed_view::<3, 3>(3, 3).determinant() > 0.0);
    }

    #[test]
    fn point_endpoints_are_rejected() {
        let a = frame_endpoint(0, Vector3::zeros());
        let mut b = frame_endpoint(1, Vector3::x());
        b.kind = BlockKind::Point;
        let beam = BeamElement::new(a.dof, b.dof, BeamSection::circular(0.01), steel());
        assert!(matches!(
            beam.matrices(&a, &b),
            Err(ModelError::IncompatibleEndpoint { .. })
        ));
    }
}
