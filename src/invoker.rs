//! Capability invoker: cache, guard, execute, classify, record
//!
//! Wraps one opaque capability call with the full pipeline. Offered in a
//! suspending and a blocking form with identical semantics; the bridge
//! picks the form matching the capability's registered mode. Guarantee:
//! metrics and cache state update exactly once per call on every path.

use crate::cache::ResultCache;
use crate::capability::{Capability, CapabilityRegistry};
use crate::errors::{Result, ToolError};
use crate::metrics::MetricsRegistry;
use crate::security::{CommandGuard, Verdict};
use crate::types::{CapabilityCall, ToolContext, ToolOutcome};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Invoker over one registry, cache, and metrics collector
pub struct CapabilityInvoker {
    registry: CapabilityRegistry,
    cache: ResultCache,
    metrics: MetricsRegistry,
    guard: CommandGuard,
    context: ToolContext,
}

/// Outcome of the shared pre-execution steps: either a short-circuit
/// outcome (guard denial, cache hit) or the go-ahead with any warning.
enum PreFlight {
    Done(ToolOutcome),
    Proceed {
        capability: Arc<dyn Capability>,
        warning: Option<String>,
    },
}

impl CapabilityInvoker {
    pub fn new(
        registry: CapabilityRegistry,
        cache: ResultCache,
        metrics: MetricsRegistry,
        guard: CommandGuard,
        context: ToolContext,
    ) -> Self {
        Self {
            registry,
            cache,
            metrics,
            guard,
            context,
        }
    }

    /// Suspending form. Awaits the capability in place; the bridge routes
    /// suspending-mode capabilities here.
    pub async fn invoke(&self, call: &CapabilityCall) -> ToolOutcome {
        let (capability, warning) = match self.pre_flight(call) {
            PreFlight::Done(outcome) => return outcome,
            PreFlight::Proceed {
                capability,
                warning,
            } => (capability, warning),
        };

        let start = Instant::now();
        let result = match tokio::time::timeout(
            self.context.timeout,
            capability.run(call, &self.context),
        )
        .await
        {
            Ok(r) => r,
            Err(_) => Err(ToolError::Timeout {
                capability: call.name.clone(),
                elapsed_ms: start.elapsed().as_millis() as u64,
            }),
        };

        self.settle(call, &capability, result, warning, start.elapsed())
    }

    /// Blocking form, identical semantics. Runs on the caller's thread;
    /// the bridge dispatches this to its worker pool for blocking-mode
    /// capabilities and enforces the per-call deadline around that
    /// dispatch, since a synchronous frame has no timer to race against.
    pub fn invoke_blocking(&self, call: &CapabilityCall) -> ToolOutcome {
        let (capability, warning) = match self.pre_flight(call) {
            PreFlight::Done(outcome) => return outcome,
            PreFlight::Proceed {
                capability,
                warning,
            } => (capability, warning),
        };

        let start = Instant::now();
        let result = capability.run_blocking(call, &self.context);
        self.settle(call, &capability, result, warning, start.elapsed())
    }

    /// Guard gate and cache lookup, shared by both forms.
    fn pre_flight(&self, call: &CapabilityCall) -> PreFlight {
        let capability = match self.registry.get(&call.name) {
            Some(c) => c,
            None => {
                let err = ToolError::NotFound {
                    capability: call.name.clone(),
                    message: "no such capability registered".to_string(),
                };
                let outcome = ToolOutcome::failure(&err, Duration::ZERO);
                self.metrics.record_failure(&call.name, Duration::ZERO);
                return PreFlight::Done(outcome);
            }
        };

        // Guard verdict before anything else: a denied command must not
        // reach execution or the cache.
        let mut warning = None;
        if let Some(command) = capability.guarded_command(call) {
            match self.guard.classify(&command) {
                Verdict::Denied(reason) => {
                    let err = ToolError::Security {
                        capability: call.name.clone(),
                        message: reason,
                    };
                    let outcome = ToolOutcome::failure(&err, Duration::ZERO);
                    self.metrics.record_failure(&call.name, Duration::ZERO);
                    return PreFlight::Done(outcome);
                }
                Verdict::Warned(reason) => warning = Some(reason),
                Verdict::Allowed => {}
            }
        }

        if capability.cacheable() {
            if let Some(value) = self.cache.get(call) {
                self.metrics.record_cache_hit(&call.name);
                // A warned command stays warned on repeat calls; the cached
                // value never carries the warning itself, it is re-attached
                // per verdict.
                let value = match warning {
                    Some(reason) => attach_warning(value, reason),
                    None => value,
                };
                return PreFlight::Done(ToolOutcome::cached(value));
            }
        }

        PreFlight::Proceed {
            capability,
            warning,
        }
    }

    /// Classify, record, and cache the execution result. Runs exactly once
    /// per executed call.
    fn settle(
        &self,
        call: &CapabilityCall,
        capability: &Arc<dyn Capability>,
        result: Result<Value>,
        warning: Option<String>,
        elapsed: Duration,
    ) -> ToolOutcome {
        match result {
            Ok(value) => {
                if capability.cacheable() {
                    self.cache.set(call, value.clone());
                }
                self.metrics.record_success(&call.name, elapsed);
                let value = match warning {
                    Some(reason) => attach_warning(value, reason),
                    None => value,
                };
                ToolOutcome::success(value, elapsed)
            }
            Err(err) => {
                // Failures are never cached.
                self.metrics.record_failure(&call.name, elapsed);
                ToolOutcome::failure(&err, elapsed)
            }
        }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    pub fn guard(&self) -> &CommandGuard {
        &self.guard
    }

    pub fn context(&self) -> &ToolContext {
        &self.context
    }
}

/// Surface a guard warning alongside the result value.
fn attach_warning(value: Value, reason: String) -> Value {
    match value {
        Value::Object(mut map) => {
            map.insert("warning".to_string(), Value::String(reason));
            Value::Object(map)
        }
        other => serde_json::json!({ "result": other, "warning": reason }),
    }
}
