//! Error types for modal-model

use thiserror::Error;

use crate::item::{DofRef, ItemId};

pub type Result<T> = std::result::Result<T, ModelError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Unknown item: {0:?}")]
    UnknownItem(ItemId),

    #[error("Endpoint {0:?} does not reference a body or mesh node")]
    InvalidDofRef(DofRef),

    #[error("Element has zero length")]
    ZeroLength,

    #[error("Incompatible endpoint {endpoint:?}: {reason}")]
    IncompatibleEndpoint { endpoint: DofRef, reason: String },
}
