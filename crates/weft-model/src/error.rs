//! Error types and client exit codes for cluster document handling.

use thiserror::Error;

/// Result type alias for document and option operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Successful run.
pub const EXIT_SUCCESS: i32 = 0;
/// Bad command arguments.
pub const EXIT_USAGE: i32 = 1;
/// Invalid or incomplete cluster document.
pub const EXIT_BAD_CONFIGURATION: i32 = 2;
/// The named cluster document does not exist.
pub const EXIT_UNKNOWN_CLUSTER: i32 = 3;
/// Internal failure.
pub const EXIT_INTERNAL_ERROR: i32 = 4;

/// Errors raised while reading, writing, or querying a cluster document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("missing mandatory option {0}")]
    MissingOption(String),

    #[error("option {key} has invalid value {value:?}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("cluster document not found at {0}")]
    DocumentNotFound(String),

    #[error("failed to read or write cluster document: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed cluster document: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigError {
    /// Map the error onto the client exit codes.
    pub fn exit_code(&self) -> i32 {
        match self {
            ConfigError::DocumentNotFound(_) => EXIT_UNKNOWN_CLUSTER,
            ConfigError::Io(_) => EXIT_INTERNAL_ERROR,
            ConfigError::UnknownRole(_)
            | ConfigError::MissingOption(_)
            | ConfigError::InvalidValue { .. }
            | ConfigError::Json(_) => EXIT_BAD_CONFIGURATION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_map_to_bad_configuration() {
        assert_eq!(
            ConfigError::UnknownRole("ghost".to_string()).exit_code(),
            EXIT_BAD_CONFIGURATION
        );
        assert_eq!(
            ConfigError::MissingOption("cluster.directory".to_string()).exit_code(),
            EXIT_BAD_CONFIGURATION
        );
    }

    #[test]
    fn missing_document_maps_to_unknown_cluster() {
        let err = ConfigError::DocumentNotFound("/tmp/nope.json".to_string());
        assert_eq!(err.exit_code(), EXIT_UNKNOWN_CLUSTER);
    }

    #[test]
    fn io_maps_to_internal_error() {
        let err = ConfigError::Io(std::io::Error::other("disk on fire"));
        assert_eq!(err.exit_code(), EXIT_INTERNAL_ERROR);
    }
}
