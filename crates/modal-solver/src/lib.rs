//! Modal reduction of multibody + FEA assemblies on a floating frame.
//!
//! A [`ModalAssembly`] holds boundary and internal items. Until it is
//! reduced it behaves like a plain assembly. After
//! [`ModalAssembly::switch_modal_reduction_on`] the internal items are
//! replaced by Craig-Bampton/Herting modal coordinates, expressed in a
//! floating frame that follows the boundary. The reduced system is
//! integrated through the same [`modal_model::Integrable`] protocol, e.g.
//! with [`EulerImplicitLinearized`].

pub mod backend;
pub mod config;
pub mod damping;
pub mod error;
pub mod floating_frame;
pub mod inertial;
pub mod modal_assembly;
pub mod modes;
pub mod reduction;
pub mod selection;
pub mod stats;
pub mod stiffness;
pub mod timestepper;
pub mod transforms;

pub use backend::{
    EigenSolver, EigenSystemData, LinearSolver, LinearSystemData, NativeBackend, SolveInfo,
    SolverBackend, SparseTripletsF64, default_backend,
};
pub use config::{DumpFlags, EulerImplicitConfig, ModalAssemblyConfig, ModalSolveDamped, ModalSolveUndamped};
pub use damping::{DampingModel, ModalRatioDamping, NoDamping, RayleighDamping, ReductionDamping};
pub use error::{ModalError, Result};
pub use modal_assembly::{CustomForceFullCallback, CustomForceModalCallback, ModalAssembly, ModalMatrices};
pub use modes::ModeSet;
pub use reduction::{Partition, ReducedModel};
pub use stats::ReductionStats;
pub use timestepper::EulerImplicitLinearized;
