//! Core call and outcome types
//!
//! A capability invocation is described by a [`CapabilityCall`] and always
//! produces a [`ToolOutcome`], success or classified failure.

use crate::errors::{ErrorKind, ToolError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// How a capability executes relative to the caller's scheduler.
///
/// Declared once at registration; the bridge dispatches on this flag and
/// never inspects the call at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Awaited in place on the caller's cooperative scheduler.
    Suspending,
    /// Occupies a bounded worker-pool thread; never stalls the scheduler.
    Blocking,
}

/// One capability invocation: name plus JSON-compatible arguments.
///
/// Identity is the full (name, args, kwargs) tuple; two calls with the same
/// tuple are the same call for caching purposes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapabilityCall {
    /// Stable capability name
    pub name: String,

    /// Positional arguments
    pub args: Vec<Value>,

    /// Keyword arguments
    pub kwargs: serde_json::Map<String, Value>,
}

impl CapabilityCall {
    /// Create a call with positional arguments only
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
            kwargs: serde_json::Map::new(),
        }
    }

    /// Add a keyword argument
    pub fn with_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }

    /// Content-addressed cache key over the full tuple.
    ///
    /// The serialized form itself is the key, so distinct calls can never
    /// collide regardless of argument size.
    pub fn cache_key(&self) -> String {
        // serde_json keeps map insertion order; kwargs are re-sorted so the
        // key is insensitive to construction order.
        let mut sorted = serde_json::Map::new();
        let mut keys: Vec<&String> = self.kwargs.keys().collect();
        keys.sort();
        for k in keys {
            sorted.insert(k.clone(), self.kwargs[k].clone());
        }
        let tuple = serde_json::json!([self.name, self.args, Value::Object(sorted)]);
        tuple.to_string()
    }

    /// Fetch a kwarg as a string, with a default
    pub fn kwarg_str<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.kwargs.get(key).and_then(|v| v.as_str()).unwrap_or(default)
    }

    /// Fetch a kwarg as a bool, with a default
    pub fn kwarg_bool(&self, key: &str, default: bool) -> bool {
        self.kwargs.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    /// Fetch a positional argument as a string
    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.args.get(index).and_then(|v| v.as_str())
    }
}

/// Result of one capability invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ToolOutcome {
    Success {
        /// JSON-compatible return value
        value: Value,
        /// Wall-clock execution time (zero-ish for cache hits)
        duration: Duration,
        /// Whether the value came from the result cache
        from_cache: bool,
    },
    Failure {
        /// Classified failure kind
        kind: ErrorKind,
        /// Short message, surfaced verbatim
        message: String,
        /// Optional remediation hint, surfaced verbatim
        remediation: Option<String>,
        /// Time spent before the failure
        duration: Duration,
    },
}

impl ToolOutcome {
    /// Successful outcome from a fresh execution
    pub fn success(value: Value, duration: Duration) -> Self {
        ToolOutcome::Success {
            value,
            duration,
            from_cache: false,
        }
    }

    /// Successful outcome served from the cache
    pub fn cached(value: Value) -> Self {
        ToolOutcome::Success {
            value,
            duration: Duration::ZERO,
            from_cache: true,
        }
    }

    /// Failed outcome classified from a [`ToolError`]
    pub fn failure(err: &ToolError, duration: Duration) -> Self {
        ToolOutcome::Failure {
            kind: err.kind(),
            message: err.to_string(),
            remediation: err.remediation().map(String::from),
            duration,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success { .. })
    }

    pub fn from_cache(&self) -> bool {
        matches!(
            self,
            ToolOutcome::Success {
                from_cache: true,
                ..
            }
        )
    }

    /// Return value on success
    pub fn value(&self) -> Option<&Value> {
        match self {
            ToolOutcome::Success { value, .. } => Some(value),
            ToolOutcome::Failure { .. } => None,
        }
    }

    /// Failure kind, if failed
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ToolOutcome::Failure { kind, .. } => Some(*kind),
            ToolOutcome::Success { .. } => None,
        }
    }
}

/// Execution context bound to one working directory
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Working directory all relative paths resolve against
    pub working_dir: std::path::PathBuf,

    /// Per-call execution deadline
    pub timeout: Duration,

    /// Maximum output size (bytes)
    pub max_output_size: usize,
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            working_dir: std::env::current_dir().unwrap_or_else(|_| "/tmp".into()),
            timeout: Duration::from_secs(60),
            max_output_size: 2_097_152, // 2MB
        }
    }
}

impl ToolContext {
    /// Create new context with working directory
    pub fn new(working_dir: std::path::PathBuf) -> Self {
        Self {
            working_dir,
            ..Default::default()
        }
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set max output size
    pub fn with_max_output_size(mut self, size: usize) -> Self {
        self.max_output_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_key_deterministic() {
        let a = CapabilityCall::new("read_file", vec![json!("a.txt")])
            .with_kwarg("encoding", json!("utf-8"))
            .with_kwarg("limit", json!(100));
        let b = CapabilityCall::new("read_file", vec![json!("a.txt")])
            .with_kwarg("limit", json!(100))
            .with_kwarg("encoding", json!("utf-8"));

        // Kwarg construction order must not matter
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn test_cache_key_distinguishes_calls() {
        let a = CapabilityCall::new("read_file", vec![json!("a.txt")]);
        let b = CapabilityCall::new("read_file", vec![json!("b.txt")]);
        let c = CapabilityCall::new("write_file", vec![json!("a.txt")]);

        assert_ne!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), c.cache_key());
    }

    #[test]
    fn test_outcome_success() {
        let outcome = ToolOutcome::success(json!("hi"), Duration::from_millis(5));
        assert!(outcome.is_success());
        assert!(!outcome.from_cache());
        assert_eq!(outcome.value().unwrap(), &json!("hi"));
    }

    #[test]
    fn test_outcome_cached() {
        let outcome = ToolOutcome::cached(json!(42));
        assert!(outcome.is_success());
        assert!(outcome.from_cache());
    }

    #[test]
    fn test_outcome_failure_classification() {
        let err = ToolError::Security {
            capability: "run_command".to_string(),
            message: "denied".to_string(),
        };
        let outcome = ToolOutcome::failure(&err, Duration::from_millis(1));

        assert!(!outcome.is_success());
        assert_eq!(outcome.error_kind(), Some(crate::errors::ErrorKind::Security));
        match outcome {
            ToolOutcome::Failure { remediation, .. } => assert!(remediation.is_some()),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_context_builder() {
        let ctx = ToolContext::default()
            .with_timeout(Duration::from_secs(30))
            .with_max_output_size(1024);

        assert_eq!(ctx.timeout, Duration::from_secs(30));
        assert_eq!(ctx.max_output_size, 1024);
    }

    #[test]
    fn test_kwarg_accessors() {
        let call = CapabilityCall::new("run_command", vec![json!("ls")])
            .with_kwarg("background", json!(true));

        assert_eq!(call.arg_str(0), Some("ls"));
        assert!(call.kwarg_bool("background", false));
        assert_eq!(call.kwarg_str("cwd", "."), ".");
    }
}
