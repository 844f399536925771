//! Error types for the toolhost runtime
//!
//! One taxonomy for every capability failure, so heterogeneous capability
//! implementations surface uniformly to the calling agent loop.

use thiserror::Error;

/// Classified failure kinds, surfaced in [`crate::types::ToolOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// Policy violation (command guard or capability-reported). Fatal, never retried.
    Security,
    /// Deadline exceeded. Retry is the caller's discretion, never automatic here.
    Timeout,
    /// Resource exhaustion.
    Resource,
    /// Target does not exist.
    NotFound,
    /// Permission denied by the OS or the capability.
    Permission,
    /// Capability-specific failure with the original preserved.
    Upstream,
    /// Catch-all.
    Unknown,
}

/// Main error type for the toolhost runtime
#[derive(Error, Debug)]
pub enum ToolError {
    /// Command guard denial or capability-reported policy violation
    #[error("security violation in '{capability}': {message}")]
    Security { capability: String, message: String },

    /// Deadline exceeded
    #[error("'{capability}' timed out after {elapsed_ms}ms")]
    Timeout { capability: String, elapsed_ms: u64 },

    /// Resource exhaustion
    #[error("resource limit in '{capability}': {message}")]
    Resource { capability: String, message: String },

    /// Target absent
    #[error("'{capability}': not found: {message}")]
    NotFound { capability: String, message: String },

    /// Permission denied
    #[error("'{capability}': permission denied: {message}")]
    Permission { capability: String, message: String },

    /// Capability-specific failure, original error preserved for diagnostics
    #[error("'{capability}' failed: {source}")]
    Upstream {
        capability: String,
        #[source]
        source: anyhow::Error,
    },

    /// Catch-all for unclassified failures
    #[error("'{capability}': {message}")]
    Unknown { capability: String, message: String },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, ToolError>;

impl ToolError {
    /// Map any error into the classified taxonomy.
    ///
    /// I/O errors are folded by their OS kind; everything without a better
    /// home lands in [`ErrorKind::Unknown`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::Security { .. } => ErrorKind::Security,
            ToolError::Timeout { .. } => ErrorKind::Timeout,
            ToolError::Resource { .. } => ErrorKind::Resource,
            ToolError::NotFound { .. } => ErrorKind::NotFound,
            ToolError::Permission { .. } => ErrorKind::Permission,
            ToolError::Upstream { .. } => ErrorKind::Upstream,
            ToolError::Unknown { .. } => ErrorKind::Unknown,
            ToolError::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorKind::NotFound,
                std::io::ErrorKind::PermissionDenied => ErrorKind::Permission,
                _ => ErrorKind::Unknown,
            },
            ToolError::Json(_) => ErrorKind::Unknown,
        }
    }

    /// Optional remediation hint, surfaced verbatim to the calling agent.
    pub fn remediation(&self) -> Option<&'static str> {
        match self.kind() {
            ErrorKind::Security => {
                Some("This operation is blocked by policy and will not be retried.")
            }
            ErrorKind::Timeout => {
                Some("Increase the timeout in ToolContext or split the work into smaller calls.")
            }
            ErrorKind::Resource => {
                Some("Reduce the requested size or free resources before retrying.")
            }
            ErrorKind::NotFound => Some("Check the path or identifier; it may have been removed."),
            ErrorKind::Permission => {
                Some("The runtime lacks access rights; adjust ownership or run elsewhere.")
            }
            ErrorKind::Upstream | ErrorKind::Unknown => None,
        }
    }

    /// Capability name this failure is attributed to, when known.
    pub fn capability(&self) -> Option<&str> {
        match self {
            ToolError::Security { capability, .. }
            | ToolError::Timeout { capability, .. }
            | ToolError::Resource { capability, .. }
            | ToolError::NotFound { capability, .. }
            | ToolError::Permission { capability, .. }
            | ToolError::Upstream { capability, .. }
            | ToolError::Unknown { capability, .. } => Some(capability),
            _ => None,
        }
    }

    /// Wrap an arbitrary error as an upstream failure of `capability`.
    pub fn upstream(capability: impl Into<String>, err: impl Into<anyhow::Error>) -> Self {
        ToolError::Upstream {
            capability: capability.into(),
            source: err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ToolError::Timeout {
            capability: "run_command".to_string(),
            elapsed_ms: 60000,
        };
        assert!(err.to_string().contains("run_command"));
        assert!(err.to_string().contains("60000"));
    }

    #[test]
    fn test_kind_mapping() {
        let err = ToolError::Security {
            capability: "run_command".to_string(),
            message: "denied".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Security);

        let io = ToolError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(io.kind(), ErrorKind::NotFound);

        let io = ToolError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "nope",
        ));
        assert_eq!(io.kind(), ErrorKind::Permission);
    }

    #[test]
    fn test_remediation_hints() {
        let err = ToolError::Timeout {
            capability: "read_file".to_string(),
            elapsed_ms: 100,
        };
        assert!(err.remediation().is_some());

        let err = ToolError::upstream("search", anyhow::anyhow!("index offline"));
        assert!(err.remediation().is_none());
        assert_eq!(err.kind(), ErrorKind::Upstream);
    }

    #[test]
    fn test_capability_attribution() {
        let err = ToolError::NotFound {
            capability: "read_file".to_string(),
            message: "missing.txt".to_string(),
        };
        assert_eq!(err.capability(), Some("read_file"));

        let io = ToolError::Io(std::io::Error::new(std::io::ErrorKind::Other, "x"));
        assert!(io.capability().is_none());
    }
}
