//! Stepping full and reduced assemblies with the linearized implicit Euler
//! integrator.

use approx::assert_relative_eq;
use modal_model::{Assembly, DofRef, FeaNode, Integrable, ItemId, Link, Mesh, RigidBody, Role, SpringElement};
use modal_solver::{EulerImplicitConfig, EulerImplicitLinearized, ModalAssembly, ModalSolveUndamped, NoDamping};
use nalgebra::{DVector, UnitQuaternion, Vector3};

const K: f64 = 100.0;
const TIP_MASS: f64 = 1.0;
const TIP: DofRef = DofRef::Node(ItemId(1), 0);

/// Free hub (unit mass) with a sprung tip on a ground rail along x.
fn free_spring() -> ModalAssembly {
    let mut asm = Assembly::new();
    let hub = asm.add(
        Role::Boundary,
        RigidBody::new("hub", Vector3::zeros(), UnitQuaternion::identity()),
    );
    let mut mesh = Mesh::new("tip");
    mesh.add_node(FeaNode::xyz(Vector3::new(1.0, 0.0, 0.0)).with_mass(TIP_MASS));
    let mesh_id = asm.add(Role::Internal, mesh);
    assert_eq!(DofRef::Node(mesh_id, 0), TIP);
    asm.mesh_mut(mesh_id)
        .unwrap()
        .add_element(SpringElement::new(DofRef::Body(hub), TIP, K));
    asm.add(
        Role::Internal,
        Link::lock_to_ground("rail", TIP).with_mask([false, true, true, false, false, false]),
    );
    ModalAssembly::new(asm)
}

/// Settings picking the hub/tip oscillation among the free modes.
fn elastic_mode() -> ModalSolveUndamped {
    let omega2 = K * (1.0 + 1.0 / TIP_MASS);
    ModalSolveUndamped::new(1).with_base_freq(omega2.sqrt() / (2.0 * std::f64::consts::PI))
}

fn hub_and_tip_x(modal: &ModalAssembly) -> (f64, f64) {
    let mut x = DVector::zeros(modal.n_coords());
    let mut v = DVector::zeros(modal.n_coords_w());
    modal.int_state_gather(0, &mut x, 0, &mut v);
    let tip = modal.assembly().pose_of(&TIP).unwrap();
    (x[0], tip.pos.x)
}

#[test]
fn reduced_trajectory_matches_full_trajectory() {
    let stepper = EulerImplicitLinearized::new(EulerImplicitConfig::new(0.005));

    let mut full = free_spring();
    full.setup_initial().unwrap();
    full.custom_f_full_mut()[0] = 1.0;

    let mut reduced = free_spring();
    reduced.switch_modal_reduction_on(&elastic_mode(), &NoDamping).unwrap();
    reduced.custom_f_full_mut()[0] = 1.0;

    for _ in 0..100 {
        stepper.step(&mut full).unwrap();
        stepper.step(&mut reduced).unwrap();
    }

    let (hub_full, tip_full) = hub_and_tip_x(&full);
    let (hub_red, tip_red) = hub_and_tip_x(&reduced);
    assert!(hub_full > 0.01);
    assert_relative_eq!(hub_red, hub_full, max_relative = 1e-3);
    assert_relative_eq!(tip_red, tip_full, max_relative = 1e-3);
}

#[test]
fn reduced_assembly_at_rest_stays_at_rest() {
    let mut modal = free_spring();
    modal.switch_modal_reduction_on(&elastic_mode(), &NoDamping).unwrap();
    let mut x0 = DVector::zeros(modal.n_coords());
    let mut v0 = DVector::zeros(modal.n_coords_w());
    modal.int_state_gather(0, &mut x0, 0, &mut v0);

    let stepper = EulerImplicitLinearized::new(EulerImplicitConfig::new(0.01));
    let steps = stepper.advance_to(&mut modal, 0.1).unwrap();
    assert_eq!(steps, 10);

    let mut x = DVector::zeros(modal.n_coords());
    let mut v = DVector::zeros(modal.n_coords_w());
    modal.int_state_gather(0, &mut x, 0, &mut v);
    assert!((&x - &x0).amax() < 1e-12);
    assert!(v.amax() < 1e-12);
}

#[test]
fn modal_force_excites_the_tip_only_through_the_mode() {
    let mut modal = free_spring();
    modal.switch_modal_reduction_on(&elastic_mode(), &NoDamping).unwrap();
    modal.custom_f_modal_mut()[0] = 0.5;

    let stepper = EulerImplicitLinearized::new(EulerImplicitConfig::new(0.01));
    stepper.step(&mut modal).unwrap();
    assert!(modal.modal_q_dt()[0].abs() > 0.0);
    let mut a = DVector::zeros(modal.n_coords_w());
    modal.int_state_gather_acceleration(0, &mut a);
    assert_relative_eq!(a[6], modal.modal_q_dtdt()[0]);
}
