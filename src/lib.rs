//! toolhost - Tool Execution Runtime
//!
//! A tool-execution runtime for embedding in agent platforms: typed
//! capabilities dispatched over a bounded thread pool or awaited in
//! place, with result caching, per-capability metrics, a command
//! safety classifier, and supervised background processes.
//!
//! # Architecture
//!
//! - Capabilities and dispatch: [`capability`], [`invoker`], [`bridge`]
//! - Caching and metrics: [`cache`], [`metrics`]
//! - Command safety: [`security`]
//! - Background processes: [`process`]
//! - One facade per working directory: [`runtime::ToolRuntime`]

pub mod bridge;
pub mod cache;
pub mod capabilities;
pub mod capability;
pub mod config;
pub mod errors;
pub mod invoker;
pub mod metrics;
pub mod process;
pub mod runtime;
pub mod security;
pub mod types;

// Re-export commonly used types
pub use bridge::ConcurrencyBridge;
pub use cache::{EvictionPolicy, ResultCache};
pub use capability::{Capability, CapabilityRegistry};
pub use config::RuntimeConfig;
pub use errors::{ErrorKind, Result, ToolError};
pub use invoker::CapabilityInvoker;
pub use metrics::{CapabilityStats, MetricsRegistry};
pub use process::{ManagedProcess, ProcessManager, ProcessStatus, Supervisor};
pub use runtime::ToolRuntime;
pub use security::{CommandGuard, Verdict};
pub use types::{CapabilityCall, ExecMode, ToolContext, ToolOutcome};
