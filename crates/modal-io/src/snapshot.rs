//! Versioned JSON snapshots of a modal assembly.
//!
//! A snapshot stores the item arena (with roles and holes, so `ItemId`s stay
//! valid), the modal coordinates and custom forces, and, for a reduced
//! assembly, the reduced model itself. The reduced model type belongs to the
//! solver, so the snapshot is generic over it.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use modal_model::{Assembly, Item, Role};
use nalgebra::Vector3;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{IoError, Result};

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub role: Role,
    pub item: Item,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyRecord {
    pub gravity: Vector3<f64>,
    pub time: f64,
    /// One entry per arena slot; `None` marks a removed item
    pub items: Vec<Option<ItemRecord>>,
}

impl AssemblyRecord {
    pub fn capture(assembly: &Assembly) -> Self {
        Self {
            gravity: assembly.gravity,
            time: assembly.time(),
            items: assembly
                .export_items()
                .into_iter()
                .map(|e| e.map(|(role, item)| ItemRecord { role, item }))
                .collect(),
        }
    }

    pub fn restore(&self) -> Assembly {
        let items = self
            .items
            .iter()
            .map(|e| e.as_ref().map(|r| (r.role, r.item.clone())))
            .collect();
        Assembly::from_items(items, self.gravity, self.time)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModalSnapshot<R> {
    pub schema_version: u32,
    pub assembly: AssemblyRecord,
    pub is_modal: bool,
    pub internal_nodes_update: bool,
    pub modal_q: Vec<f64>,
    pub modal_q_dt: Vec<f64>,
    pub modal_q_dtdt: Vec<f64>,
    pub custom_f_modal: Vec<f64>,
    pub custom_f_full: Vec<f64>,
    pub reduced: Option<R>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct SchemaHeader {
    schema_version: u32,
}

pub fn save_snapshot<R: Serialize>(path: impl AsRef<Path>, snapshot: &ModalSnapshot<R>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let bytes = serde_json::to_vec_pretty(snapshot)?;
    fs::write(path, bytes)?;
    Ok(())
}

pub fn load_snapshot<R: DeserializeOwned>(path: impl AsRef<Path>) -> Result<ModalSnapshot<R>> {
    let bytes = fs::read(path)?;
    let header: SchemaHeader = serde_json::from_slice(&bytes)?;
    if header.schema_version != SNAPSHOT_SCHEMA_VERSION {
        return Err(IoError::UnsupportedVersion {
            found: header.schema_version,
            expected: SNAPSHOT_SCHEMA_VERSION,
        });
    }
    let snapshot: ModalSnapshot<R> = serde_json::from_slice(&bytes)?;
    if snapshot.modal_q.len() != snapshot.modal_q_dt.len()
        || snapshot.modal_q.len() != snapshot.modal_q_dtdt.len()
    {
        return Err(IoError::InvalidData(
            "modal coordinate vectors have different lengths".to_string(),
        ));
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use modal_model::{DofRef, ForceItem, RigidBody};
    use nalgebra::UnitQuaternion;
    use std::io;

    fn sample() -> ModalSnapshot<Vec<f64>> {
        let mut asm = Assembly::new();
        let body = asm.add(
            Role::Boundary,
            RigidBody::new("hub", Vector3::new(0.0, 1.0, 0.0), UnitQuaternion::identity()),
        );
        let removed = asm.add(
            Role::Internal,
            RigidBody::new("tmp", Vector3::zeros(), UnitQuaternion::identity()),
        );
        asm.add(
            Role::Internal,
            ForceItem::new("push", DofRef::Body(body), Vector3::new(1.0, 0.0, 0.0)),
        );
        asm.remove(removed);
        asm.gravity = Vector3::new(0.0, -9.81, 0.0);

        ModalSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            assembly: AssemblyRecord::capture(&asm),
            is_modal: true,
            internal_nodes_update: false,
            modal_q: vec![0.1, 0.2],
            modal_q_dt: vec![0.0, -1.0],
            modal_q_dtdt: vec![0.0, 0.0],
            custom_f_modal: vec![3.0, 4.0],
            custom_f_full: vec![0.0; 6],
            reduced: Some(vec![1.0, 2.0, 3.0]),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn snapshot_roundtrip_preserves_record() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("snapshot.json");
        let snapshot = sample();

        save_snapshot(&path, &snapshot).expect("save should succeed");
        let loaded: ModalSnapshot<Vec<f64>> = load_snapshot(&path).expect("load should succeed");
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn restored_assembly_keeps_item_ids() {
        let snapshot = sample();
        let asm = snapshot.assembly.restore();
        assert!(asm.body(modal_model::ItemId(0)).is_some());
        assert!(asm.get(modal_model::ItemId(1)).is_none());
        assert_eq!(asm.role(modal_model::ItemId(2)), Some(Role::Internal));
        assert_eq!(asm.gravity.y, -9.81);
    }

    #[test]
    fn unknown_schema_version_is_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("future.json");
        let mut snapshot = sample();
        snapshot.schema_version = SNAPSHOT_SCHEMA_VERSION + 1;
        save_snapshot(&path, &snapshot).expect("save should succeed");

        let err = load_snapshot::<Vec<f64>>(&path).expect_err("version should be rejected");
        assert!(matches!(err, IoError::UnsupportedVersion { found: 2, expected: 1 }));
    }

    #[test]
    fn load_snapshot_fails_for_missing_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = load_snapshot::<Vec<f64>>(dir.path().join("missing.json")).expect_err("missing file");
        match err {
            IoError::Io(e) => assert_eq!(e.kind(), io::ErrorKind::NotFound),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn load_snapshot_fails_for_invalid_payload() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("bad.json");
        fs::write(&path, "{invalid json").expect("write invalid payload");
        let err = load_snapshot::<Vec<f64>>(&path).expect_err("invalid JSON should fail");
        assert!(matches!(err, IoError::Serialization(_)));
    }
}
