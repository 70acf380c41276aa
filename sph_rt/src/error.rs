//! Error kinds surfaced by the runtime core, per the error-handling design: math
//! and type errors from the tensor/field layer are programming errors that are
//! never caught inside the core; data-model errors are surfaced to the caller of
//! `Model`/`Group` mutators; `SolverDivergence` is logged and non-fatal.

use thiserror::Error as ThisError;

/// Errors raised by tensor/kernel operations in [`crate::tensor`].
#[derive(Debug, ThisError)]
pub enum MathError {
    #[error("bad argument: {0}")]
    BadArgument(String),
    #[error("operation requires dimension 3, got {0}")]
    BadDimension(usize),
    #[error("singular system encountered during LDL^T solve")]
    Singular,
}

/// Errors raised by the type-erased field storage in [`crate::field`].
#[derive(Debug, ThisError)]
pub enum FieldError {
    #[error("type/shape mismatch accessing field: expected {expected}, got {actual}")]
    BadType { expected: String, actual: String },
    #[error("permutation is not a bijection on 0..{0}")]
    BadPermutation(usize),
}

/// Errors raised by [`crate::model::Group`] and [`crate::model::Model`].
#[derive(Debug, ThisError)]
pub enum ModelError {
    #[error("identifier \"{0}\" is not a valid [A-Za-z][A-Za-z0-9_]* identifier")]
    InvalidIdentifier(String),
    #[error("group \"{0}\" already exists")]
    GroupExists(String),
    #[error("unknown group \"{0}\"")]
    UnknownGroup(String),
    #[error("field \"{0}\" already exists with a different type or shape")]
    FieldExists(String),
    #[error("unknown field \"{0}\"")]
    UnknownField(String),
    #[error(transparent)]
    Field(#[from] FieldError),
}

/// Errors raised by [`crate::neighborhood::NeighborIndex`].
#[derive(Debug, ThisError)]
pub enum NeighborError {
    #[error("neighbor radius must be positive, got {0}")]
    BadRadius(f64),
    #[error("group \"{0}\" is queryable but has no \"position\" field of the right shape")]
    MissingPosition(String),
}

/// Errors raised by loaders (OBJ meshes, scene descriptions, persisted model
/// archives).
#[derive(Debug, ThisError)]
pub enum FileFormatError {
    #[error("bad file format: {0}")]
    BadFormat(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Top-level error type returned by the driver and by scheme `Require`/`Load`.
#[derive(Debug, ThisError)]
pub enum RuntimeError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Field(#[from] FieldError),
    #[error(transparent)]
    Neighbor(#[from] NeighborError),
    #[error(transparent)]
    FileFormat(#[from] FileFormatError),
    #[error("unknown error")]
    Unknown(#[from] anyhow::Error),
}
