//! Error types for modal-solver

use thiserror::Error;

use crate::backend::BackendError;

pub type Result<T> = std::result::Result<T, ModalError>;

#[derive(Error, Debug)]
pub enum ModalError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Mode {index} is beyond the {available} computed eigenvectors")]
    ModeIndexOutOfRange { index: usize, available: usize },

    #[error("Eigen solver failed: {0}")]
    EigenSolver(String),

    #[error("Bordered internal stiffness ({size}x{size}) is singular")]
    SingularBorderedStiffness { size: usize },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Model error: {0}")]
    Model(#[from] modal_model::ModelError),

    #[error(transparent)]
    Io(#[from] modal_io::IoError),
}
