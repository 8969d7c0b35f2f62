//! Error types for the allocation engine and its tables.

use thiserror::Error;

use crate::registry::InstanceState;
use crate::types::{InstanceId, RoleId};

/// Result type alias for engine operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors raised by the allocation engine and its tables.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("no role registered at priority {0}")]
    UnknownPriority(RoleId),

    #[error("unknown instance: {0}")]
    UnknownInstance(InstanceId),

    #[error("illegal instance state transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: InstanceState,
        to: InstanceState,
    },

    #[error("bad configuration: {0}")]
    BadConfiguration(String),

    #[error(transparent)]
    Config(#[from] weft_model::ConfigError),
}
