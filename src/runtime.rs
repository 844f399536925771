//! Unified runtime facade
//!
//! One object per working directory, aggregating the bridge, cache,
//! metrics, command guard, and process manager behind capability-specific
//! convenience methods. External collaborators (retrieval, persistence)
//! register their own capabilities at construction.

use crate::bridge::ConcurrencyBridge;
use crate::cache::ResultCache;
use crate::capability::{Capability, CapabilityRegistry};
use crate::capabilities::{ListDir, ReadFile, RunCommand, WriteFile};
use crate::config::RuntimeConfig;
use crate::errors::{Result, ToolError};
use crate::invoker::CapabilityInvoker;
use crate::metrics::{CapabilityStats, MetricsRegistry};
use crate::process::{ProcessManager, ProcessManagerConfig, Supervisor};
use crate::security::{CommandGuard, Verdict};
use crate::types::{CapabilityCall, ToolContext, ToolOutcome};
use serde_json::json;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Tool-execution runtime bound to one working directory
pub struct ToolRuntime {
    bridge: ConcurrencyBridge,
    processes: Arc<ProcessManager>,
    supervisor: Mutex<Option<Supervisor>>,
    guard: CommandGuard,
    config: RuntimeConfig,
}

impl std::fmt::Debug for ToolRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRuntime").finish_non_exhaustive()
    }
}

impl ToolRuntime {
    /// Create a runtime with default configuration and the built-in
    /// capabilities.
    pub fn new(working_dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(working_dir, RuntimeConfig::default())
    }

    pub fn with_config(working_dir: impl AsRef<Path>, config: RuntimeConfig) -> Result<Self> {
        Self::with_capabilities(working_dir, config, Vec::new())
    }

    /// Create a runtime with additional externally provided capabilities.
    ///
    /// When called from inside an async scheduler the process supervisor
    /// starts immediately; otherwise call [`Self::start_supervisor`] once
    /// a scheduler exists.
    pub fn with_capabilities(
        working_dir: impl AsRef<Path>,
        config: RuntimeConfig,
        extra: Vec<Arc<dyn Capability>>,
    ) -> Result<Self> {
        let working_dir = working_dir.as_ref();
        if !working_dir.is_dir() {
            return Err(ToolError::NotFound {
                capability: "runtime".to_string(),
                message: format!("working directory does not exist: {}", working_dir.display()),
            });
        }

        let context = ToolContext::new(working_dir.to_path_buf())
            .with_timeout(config.command_timeout())
            .with_max_output_size(config.max_output_size);

        let registry = CapabilityRegistry::new();
        registry.register(Arc::new(ReadFile));
        registry.register(Arc::new(WriteFile));
        registry.register(Arc::new(ListDir));
        registry.register(Arc::new(RunCommand));
        for capability in extra {
            registry.register(capability);
        }

        let cache = ResultCache::new(
            config.cache.policy.to_eviction_policy(),
            config.cache.max_size,
        );
        let invoker = CapabilityInvoker::new(
            registry,
            cache,
            MetricsRegistry::new(),
            CommandGuard::new(),
            context,
        );
        let bridge = ConcurrencyBridge::new(invoker, config.pool_size);

        let processes = Arc::new(ProcessManager::new(
            working_dir,
            config.registry_path_for(working_dir),
            ProcessManagerConfig {
                stop_escalation: config.stop_escalation(),
                grace_period: config.grace_period(),
            },
        ));

        let runtime = Self {
            bridge,
            processes,
            supervisor: Mutex::new(None),
            guard: CommandGuard::new(),
            config,
        };
        if tokio::runtime::Handle::try_current().is_ok() {
            runtime.start_supervisor();
        }
        Ok(runtime)
    }

    /// Start the process supervisor if it is not already running.
    pub fn start_supervisor(&self) {
        let mut slot = match self.supervisor.lock() {
            Ok(s) => s,
            Err(_) => return,
        };
        let running = slot.as_ref().map(|s| s.is_running()).unwrap_or(false);
        if !running {
            *slot = Some(Supervisor::start(
                self.processes.clone(),
                self.config.supervisor_interval(),
            ));
        }
    }

    // Capability-specific convenience methods, working directory bound in.

    pub async fn read_file(&self, path: &str) -> ToolOutcome {
        self.call(CapabilityCall::new("read_file", vec![json!(path)]))
            .await
    }

    pub async fn write_file(&self, path: &str, content: &str) -> ToolOutcome {
        self.call(CapabilityCall::new(
            "write_file",
            vec![json!(path), json!(content)],
        ))
        .await
    }

    pub async fn list_dir(&self, path: &str) -> ToolOutcome {
        self.call(CapabilityCall::new("list_dir", vec![json!(path)]))
            .await
    }

    pub async fn run_command(&self, command: &str) -> ToolOutcome {
        self.call(CapabilityCall::new("run_command", vec![json!(command)]))
            .await
    }

    /// Launch a command as a supervised background process and return its
    /// process id immediately.
    pub fn run_command_background(&self, command: &str, auto_cleanup: bool) -> Result<String> {
        let call = CapabilityCall::new("run_command", vec![json!(command)])
            .with_kwarg("auto_cleanup", json!(auto_cleanup));
        self.spawn_background(&call)
    }

    /// Hand a background-flagged call to the process manager.
    ///
    /// Background calls bypass the invoker, so the guard gate lives here:
    /// a denied command never creates a process.
    fn spawn_background(&self, call: &CapabilityCall) -> Result<String> {
        let capability = self
            .bridge
            .invoker()
            .registry()
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound {
                capability: call.name.clone(),
                message: "no such capability registered".to_string(),
            })?;
        if !capability.background_capable() {
            return Err(ToolError::Unknown {
                capability: call.name.clone(),
                message: "capability is not background-capable".to_string(),
            });
        }

        let command = capability
            .guarded_command(call)
            .or_else(|| call.arg_str(0).map(String::from))
            .ok_or_else(|| ToolError::Unknown {
                capability: call.name.clone(),
                message: "call carries no command line to detach".to_string(),
            })?;
        if let Verdict::Denied(reason) = self.guard.classify(&command) {
            return Err(ToolError::Security {
                capability: call.name.clone(),
                message: reason,
            });
        }

        let auto_cleanup = call.kwarg_bool("auto_cleanup", false);
        let process = self.processes.spawn(&command, auto_cleanup)?;
        Ok(process.process_id)
    }

    /// Register an external capability on the live runtime
    pub fn register_capability(&self, capability: Arc<dyn Capability>) {
        self.bridge.invoker().registry().register(capability);
    }

    // Generic passthroughs for registered capabilities.

    /// Invoke one registered capability. A `background=true` kwarg on a
    /// background-capable capability detaches into a managed process and
    /// the outcome carries its `process_id` instead of a result value.
    pub async fn call(&self, call: CapabilityCall) -> ToolOutcome {
        if call.kwarg_bool("background", false) {
            let started = std::time::Instant::now();
            return match self.spawn_background(&call) {
                Ok(id) => {
                    ToolOutcome::success(json!({ "process_id": id }), started.elapsed())
                }
                Err(err) => ToolOutcome::failure(&err, started.elapsed()),
            };
        }
        self.bridge.call(call).await
    }

    pub fn call_sync(&self, call: CapabilityCall) -> ToolOutcome {
        self.bridge.call_sync(call)
    }

    pub async fn call_batch(
        &self,
        calls: Vec<CapabilityCall>,
        max_concurrent: usize,
    ) -> Vec<ToolOutcome> {
        self.bridge.call_batch(calls, max_concurrent).await
    }

    // Process lifecycle passthroughs.

    pub fn processes(&self) -> &ProcessManager {
        &self.processes
    }

    pub async fn stop_process(&self, process_id: &str, force: bool) -> Result<bool> {
        self.processes.stop(process_id, force).await
    }

    pub fn tail_log(&self, process_id: &str, n: usize) -> Result<String> {
        self.processes.tail_log(process_id, n)
    }

    // Metrics.

    /// Flattened per-capability metrics
    pub fn get_stats(&self) -> Vec<CapabilityStats> {
        self.bridge.invoker().metrics().snapshot()
    }

    /// Human-readable status report
    pub fn stats_report(&self) -> String {
        self.bridge.invoker().metrics().report()
    }

    /// Deterministic teardown: stop owned processes, drop the supervisor,
    /// clear the cache, and cancel in-flight work. Safe to call more than
    /// once.
    pub async fn cleanup(&self) {
        if let Ok(mut slot) = self.supervisor.lock() {
            if let Some(supervisor) = slot.take() {
                supervisor.shutdown();
            }
        }
        self.processes.stop_all(false).await;
        self.bridge.invoker().cache().clear();
        self.bridge.cancel_all().await;
    }
}
