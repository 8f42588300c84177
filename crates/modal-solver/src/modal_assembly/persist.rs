//! Snapshots of a modal assembly.
//!
//! A reduced assembly is stored together with its [`ReducedModel`], so a
//! restored assembly carries on from the same modal coordinates without
//! running the eigen solve again. Mode sets and timings are not stored.

use std::collections::BTreeMap;
use std::path::Path;

use nalgebra::DVector;
use tracing::info;

use modal_io::{AssemblyRecord, ModalSnapshot, SNAPSHOT_SCHEMA_VERSION};

use super::ModalAssembly;
use crate::error::{ModalError, Result};
use crate::reduction::ReducedModel;

fn modal_vector(values: &[f64], n_modes: usize, name: &str) -> Result<DVector<f64>> {
    if values.len() != n_modes {
        return Err(ModalError::Configuration(format!(
            "snapshot {name} has {} entries for {n_modes} modes",
            values.len()
        )));
    }
    Ok(DVector::from_column_slice(values))
}

impl ModalAssembly {
    /// Captures items, modal coordinates, custom forces and the reduced
    /// model.
    pub fn snapshot(&self) -> ModalSnapshot<ReducedModel> {
        let mut metadata = BTreeMap::new();
        metadata.insert("backend".to_string(), self.backend.name().to_string());
        metadata.insert("n_modes".to_string(), self.n_modes().to_string());
        if let Some(stats) = &self.stats {
            metadata.insert("reduction".to_string(), stats.to_string());
        }
        ModalSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            assembly: AssemblyRecord::capture(&self.assembly),
            is_modal: self.is_modal(),
            internal_nodes_update: self.config.internal_nodes_update,
            modal_q: self.modal_q.as_slice().to_vec(),
            modal_q_dt: self.modal_q_dt.as_slice().to_vec(),
            modal_q_dtdt: self.modal_q_dtdt.as_slice().to_vec(),
            custom_f_modal: self.custom_f_modal.as_slice().to_vec(),
            custom_f_full: self.custom_f_full.as_slice().to_vec(),
            reduced: self.reduced.clone(),
            metadata,
        }
    }

    /// Rebuilds an assembly from a snapshot, with the default backend.
    pub fn from_snapshot(snapshot: ModalSnapshot<ReducedModel>) -> Result<Self> {
        if snapshot.is_modal != snapshot.reduced.is_some() {
            return Err(ModalError::Configuration(
                "snapshot reduction flag disagrees with its reduced model".to_string(),
            ));
        }
        let mut modal = ModalAssembly::new(snapshot.assembly.restore());
        modal.config.internal_nodes_update = snapshot.internal_nodes_update;
        modal.assembly.setup_initial()?;

        if let Some(reduced) = snapshot.reduced {
            let n_modes = reduced.n_modes;
            modal.modal_q = modal_vector(&snapshot.modal_q, n_modes, "modal_q")?;
            modal.modal_q_dt = modal_vector(&snapshot.modal_q_dt, n_modes, "modal_q_dt")?;
            modal.modal_q_dtdt = modal_vector(&snapshot.modal_q_dtdt, n_modes, "modal_q_dtdt")?;
            modal.modes_assembly_x0 = reduced.x_ref.clone();
            modal.reduced = Some(reduced);
        }
        modal.setup();
        if modal.custom_f_modal.len() == snapshot.custom_f_modal.len() {
            modal.custom_f_modal = DVector::from_vec(snapshot.custom_f_modal);
        }
        if modal.custom_f_full.len() == snapshot.custom_f_full.len() {
            modal.custom_f_full = DVector::from_vec(snapshot.custom_f_full);
        }
        modal.refresh_runtime()?;
        Ok(modal)
    }

    /// Writes [`snapshot`](Self::snapshot) as JSON.
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        modal_io::save_snapshot(path, &self.snapshot())?;
        info!(path = %path.display(), modal = self.is_modal(), "snapshot saved");
        Ok(())
    }

    pub fn load_snapshot(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let snapshot = modal_io::load_snapshot(path)?;
        let modal = Self::from_snapshot(snapshot)?;
        info!(path = %path.display(), modal = modal.is_modal(), "snapshot loaded");
        Ok(modal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModalSolveUndamped;
    use crate::damping::NoDamping;
    use modal_model::{Assembly, RigidBody, Role};
    use nalgebra::{UnitQuaternion, Vector3};

    fn reduced_body() -> ModalAssembly {
        let mut asm = Assembly::new();
        asm.add(
            Role::Boundary,
            RigidBody::new("b", Vector3::new(0.0, 1.0, 0.0), UnitQuaternion::identity()).with_mass(2.0),
        );
        let mut modal = ModalAssembly::new(asm);
        modal
            .switch_modal_reduction_on(&ModalSolveUndamped::new(0), &NoDamping)
            .unwrap();
        modal
    }

    #[test]
    fn snapshot_keeps_reduced_model() {
        let modal = reduced_body();
        let snap = modal.snapshot();
        assert!(snap.is_modal);
        assert_eq!(snap.metadata.get("n_modes").map(String::as_str), Some("0"));

        let restored = ModalAssembly::from_snapshot(snap).unwrap();
        assert!(restored.is_modal());
        assert_eq!(restored.reduced_model(), modal.reduced_model());
        assert_eq!(restored.modal_matrices(), modal.modal_matrices());
    }

    #[test]
    fn inconsistent_flag_is_rejected() {
        let mut snap = reduced_body().snapshot();
        snap.reduced = None;
        let err = ModalAssembly::from_snapshot(snap).err();
        assert!(matches!(err, Some(ModalError::Configuration(_))));
    }

    #[test]
    fn modal_vector_length_is_checked() {
        let mut snap = reduced_body().snapshot();
        snap.modal_q = vec![1.0];
        snap.modal_q_dt = vec![0.0];
        snap.modal_q_dtdt = vec![0.0];
        assert!(ModalAssembly::from_snapshot(snap).is_err());
    }
}
