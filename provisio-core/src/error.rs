//! Error types for the resolution engine.

use crate::config::ConfigError;
use crate::storage::StorageError;
use provisio_types::EntityKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid value for {kind}.{field}: {reason}")]
    Validation {
        kind: EntityKind,
        field: String,
        reason: String,
    },

    #[error("A {kind} named '{name}' already exists")]
    DuplicateName { kind: EntityKind, name: String },

    #[error("{kind} {index} '{value}' is already used by '{owner}'")]
    DuplicateValue {
        kind: EntityKind,
        index: String,
        value: String,
        owner: String,
    },

    #[error("No {kind} matching '{key}'")]
    NotFound { kind: EntityKind, key: String },

    #[error("Cannot remove {kind} '{name}': still referenced by {dependent_kind} '{dependent}'")]
    Dependency {
        kind: EntityKind,
        name: String,
        dependent_kind: EntityKind,
        dependent: String,
    },

    #[error("Making '{parent}' the parent of {kind} '{name}' would create a cycle")]
    CyclicParent {
        kind: EntityKind,
        name: String,
        parent: String,
    },

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Unknown field '{field}' for {kind}")]
    UnknownField { kind: EntityKind, field: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    pub(crate) fn validation(kind: EntityKind, field: &str, reason: impl Into<String>) -> Self {
        Error::Validation {
            kind,
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(kind: EntityKind, key: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            key: key.into(),
        }
    }

    /// Build an `InvariantViolation`, logging it at error level first.
    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(%message, "internal consistency check failed");
        Error::InvariantViolation(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
