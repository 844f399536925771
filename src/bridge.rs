//! Concurrency bridge between the caller's scheduler and capability work
//!
//! Dispatches each call on the capability's registered mode: suspending
//! work is awaited in place, blocking work occupies a bounded worker pool
//! and its completion is surfaced back through the await point, so blocking
//! capabilities never stall the caller's scheduler. A synchronous entry
//! point escapes re-entrancy by running a second, independent scheduler on
//! a dedicated thread instead of blocking inside the running one.

use crate::errors::ToolError;
use crate::invoker::CapabilityInvoker;
use crate::types::{CapabilityCall, ExecMode, ToolOutcome};
use futures_util::future::join_all;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;

/// Default worker-pool size when not configured
pub fn default_pool_size() -> usize {
    num_cpus::get().min(8).max(1)
}

/// Two-mode dispatcher with a bounded blocking pool
pub struct ConcurrencyBridge {
    invoker: Arc<CapabilityInvoker>,

    /// Hard throttle on simultaneous blocking work
    pool: Arc<Semaphore>,
    pool_size: usize,

    /// Abort handles for spawned batch items. Handles do not keep tasks
    /// alive; finished ones are pruned on insert.
    inflight: Mutex<Vec<AbortHandle>>,
}

impl ConcurrencyBridge {
    pub fn new(invoker: CapabilityInvoker, pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            invoker: Arc::new(invoker),
            pool: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            inflight: Mutex::new(Vec::new()),
        }
    }

    /// Invoke one capability from async code.
    ///
    /// Suspending capabilities run on the caller's scheduler; blocking
    /// capabilities take a pool permit and a worker thread.
    pub async fn call(&self, call: CapabilityCall) -> ToolOutcome {
        Self::dispatch(self.invoker.clone(), self.pool.clone(), call).await
    }

    /// Invoke one capability from plain synchronous code.
    ///
    /// Safe even when the calling thread sits inside an already-running
    /// cooperative scheduler: a dedicated thread runs the call on a second,
    /// independent scheduler instance and this thread blocks on its
    /// completion, sidestepping the nested-block_on failure mode.
    pub fn call_sync(&self, call: CapabilityCall) -> ToolOutcome {
        let nested = tokio::runtime::Handle::try_current().is_ok();
        if nested {
            std::thread::scope(|scope| {
                scope
                    .spawn(|| self.run_on_secondary_runtime(call))
                    .join()
                    .unwrap_or_else(|_| {
                        panicked_outcome("secondary scheduler thread panicked")
                    })
            })
        } else {
            self.run_on_secondary_runtime(call)
        }
    }

    /// Invoke a batch with a bounded number of simultaneous in-flight
    /// calls. Results come back in input order; a failed item occupies its
    /// own position and never aborts its siblings.
    pub async fn call_batch(
        &self,
        calls: Vec<CapabilityCall>,
        max_concurrent: usize,
    ) -> Vec<ToolOutcome> {
        let limiter = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let mut handles = Vec::with_capacity(calls.len());

        for call in calls {
            let limiter = limiter.clone();
            let invoker = self.invoker.clone();
            let pool = self.pool.clone();
            let handle = tokio::spawn(async move {
                let _permit = match limiter.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return panicked_outcome("batch limiter closed"),
                };
                Self::dispatch(invoker, pool, call).await
            });
            self.track(handle.abort_handle());
            handles.push(handle);
        }

        join_all(handles)
            .await
            .into_iter()
            .map(|joined| match joined {
                Ok(outcome) => outcome,
                // Aborted or panicked item: captured at its position
                Err(e) if e.is_cancelled() => panicked_outcome("call cancelled"),
                Err(_) => panicked_outcome("call panicked"),
            })
            .collect()
    }

    /// Request cooperative cancellation of tracked in-flight work and wait
    /// for settlement. Best-effort: work already inside native I/O cannot
    /// be preempted, only its result discarded.
    pub async fn cancel_all(&self) {
        let handles: Vec<AbortHandle> = match self.inflight.lock() {
            Ok(mut inflight) => inflight.drain(..).collect(),
            Err(_) => return,
        };

        for handle in &handles {
            handle.abort();
        }
        while handles.iter().any(|h| !h.is_finished()) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn invoker(&self) -> &CapabilityInvoker {
        &self.invoker
    }

    /// Mode-keyed dispatch shared by every entry point.
    async fn dispatch(
        invoker: Arc<CapabilityInvoker>,
        pool: Arc<Semaphore>,
        call: CapabilityCall,
    ) -> ToolOutcome {
        let mode = invoker
            .registry()
            .get(&call.name)
            .map(|c| c.mode())
            // Unknown names fall through; the invoker reports NotFound.
            .unwrap_or(ExecMode::Suspending);

        match mode {
            ExecMode::Suspending => invoker.invoke(&call).await,
            ExecMode::Blocking => {
                let permit = match pool.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return panicked_outcome("worker pool closed"),
                };
                let deadline = invoker.context().timeout;
                let name = call.name.clone();
                let handle = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    invoker.invoke_blocking(&call)
                });
                let started = Instant::now();
                match tokio::time::timeout(deadline, handle).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(_)) => panicked_outcome("worker thread panicked"),
                    // Same deadline the suspending form enforces. The worker
                    // thread cannot be preempted; its late result is
                    // discarded and the permit frees when it returns.
                    Err(_) => {
                        let err = ToolError::Timeout {
                            capability: name,
                            elapsed_ms: started.elapsed().as_millis() as u64,
                        };
                        ToolOutcome::failure(&err, started.elapsed())
                    }
                }
            }
        }
    }

    fn run_on_secondary_runtime(&self, call: CapabilityCall) -> ToolOutcome {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => return panicked_outcome(&format!("failed to start scheduler: {}", e)),
        };
        runtime.block_on(self.call(call))
    }

    fn track(&self, handle: AbortHandle) {
        if let Ok(mut inflight) = self.inflight.lock() {
            inflight.retain(|h| !h.is_finished());
            inflight.push(handle);
        }
    }
}

fn panicked_outcome(message: &str) -> ToolOutcome {
    let err = ToolError::Unknown {
        capability: "bridge".to_string(),
        message: message.to_string(),
    };
    ToolOutcome::failure(&err, Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{EvictionPolicy, ResultCache};
    use crate::capability::{Capability, CapabilityRegistry};
    use crate::errors::Result;
    use crate::metrics::MetricsRegistry;
    use crate::security::CommandGuard;
    use crate::types::ToolContext;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Suspending capability that records peak simultaneous in-flight calls.
    struct GaugedCapability {
        current: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        hold: Duration,
    }

    #[async_trait]
    impl Capability for GaugedCapability {
        fn name(&self) -> &str {
            "gauged"
        }
        fn mode(&self) -> ExecMode {
            ExecMode::Suspending
        }
        fn cacheable(&self) -> bool {
            false
        }
        async fn run(&self, _call: &CapabilityCall, _ctx: &ToolContext) -> Result<Value> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.hold).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(json!(now))
        }
    }

    struct BlockingSleeper;

    #[async_trait]
    impl Capability for BlockingSleeper {
        fn name(&self) -> &str {
            "blocking_sleeper"
        }
        fn mode(&self) -> ExecMode {
            ExecMode::Blocking
        }
        fn cacheable(&self) -> bool {
            false
        }
        fn run_blocking(&self, _call: &CapabilityCall, _ctx: &ToolContext) -> Result<Value> {
            std::thread::sleep(Duration::from_millis(20));
            Ok(json!("done"))
        }
    }

    struct FailOnOdd;

    #[async_trait]
    impl Capability for FailOnOdd {
        fn name(&self) -> &str {
            "fail_on_odd"
        }
        fn mode(&self) -> ExecMode {
            ExecMode::Suspending
        }
        fn cacheable(&self) -> bool {
            false
        }
        async fn run(&self, call: &CapabilityCall, _ctx: &ToolContext) -> Result<Value> {
            let n = call.args[0].as_u64().unwrap_or(0);
            if n % 2 == 1 {
                Err(ToolError::upstream(
                    "fail_on_odd",
                    anyhow::anyhow!("odd input {}", n),
                ))
            } else {
                Ok(json!(n))
            }
        }
    }

    fn bridge_with(capability: Arc<dyn Capability>) -> ConcurrencyBridge {
        let registry = CapabilityRegistry::new();
        registry.register(capability);
        let invoker = CapabilityInvoker::new(
            registry,
            ResultCache::new(EvictionPolicy::NoCache, 16),
            MetricsRegistry::new(),
            CommandGuard::new(),
            ToolContext::default(),
        );
        ConcurrencyBridge::new(invoker, 8)
    }

    #[tokio::test]
    async fn test_suspending_call() {
        let bridge = bridge_with(Arc::new(GaugedCapability {
            current: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            hold: Duration::from_millis(1),
        }));

        let outcome = bridge.call(CapabilityCall::new("gauged", vec![])).await;
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_blocking_call_does_not_stall_scheduler() {
        let bridge = Arc::new(bridge_with(Arc::new(BlockingSleeper)));

        // A timer on the same scheduler must keep firing while the blocking
        // capability occupies a pool thread.
        let b = bridge.clone();
        let blocking = tokio::spawn(async move {
            b.call(CapabilityCall::new("blocking_sleeper", vec![])).await
        });
        let ticks = tokio::spawn(async {
            let mut n = 0;
            for _ in 0..5 {
                tokio::time::sleep(Duration::from_millis(2)).await;
                n += 1;
            }
            n
        });

        assert!(blocking.await.unwrap().is_success());
        assert_eq!(ticks.await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_blocking_call_honors_deadline() {
        struct BlockingHang;

        #[async_trait]
        impl Capability for BlockingHang {
            fn name(&self) -> &str {
                "blocking_hang"
            }
            fn mode(&self) -> ExecMode {
                ExecMode::Blocking
            }
            fn cacheable(&self) -> bool {
                false
            }
            fn run_blocking(&self, _call: &CapabilityCall, _ctx: &ToolContext) -> Result<Value> {
                std::thread::sleep(Duration::from_millis(500));
                Ok(json!("finished anyway"))
            }
        }

        let registry = CapabilityRegistry::new();
        registry.register(Arc::new(BlockingHang));
        let invoker = CapabilityInvoker::new(
            registry,
            ResultCache::new(EvictionPolicy::NoCache, 16),
            MetricsRegistry::new(),
            CommandGuard::new(),
            ToolContext::default().with_timeout(Duration::from_millis(50)),
        );
        let bridge = ConcurrencyBridge::new(invoker, 2);

        let started = Instant::now();
        let outcome = bridge
            .call(CapabilityCall::new("blocking_hang", vec![]))
            .await;

        // Deadline failure, not the worker's late success
        assert_eq!(
            outcome.error_kind(),
            Some(crate::errors::ErrorKind::Timeout)
        );
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_batch_respects_max_concurrent() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let bridge = bridge_with(Arc::new(GaugedCapability {
            current,
            peak: peak.clone(),
            hold: Duration::from_millis(20),
        }));

        let calls: Vec<CapabilityCall> = (0..10)
            .map(|i| CapabilityCall::new("gauged", vec![json!(i)]))
            .collect();
        let outcomes = bridge.call_batch(calls, 3).await;

        assert_eq!(outcomes.len(), 10);
        assert!(outcomes.iter().all(|o| o.is_success()));
        assert!(peak.load(Ordering::SeqCst) <= 3, "peak concurrency exceeded limit");
    }

    #[tokio::test]
    async fn test_batch_failures_stay_at_position() {
        let bridge = bridge_with(Arc::new(FailOnOdd));

        let calls: Vec<CapabilityCall> = (0..6u64)
            .map(|i| CapabilityCall::new("fail_on_odd", vec![json!(i)]))
            .collect();
        let outcomes = bridge.call_batch(calls, 4).await;

        assert_eq!(outcomes.len(), 6);
        for (i, outcome) in outcomes.iter().enumerate() {
            if i % 2 == 0 {
                assert_eq!(outcome.value(), Some(&json!(i)));
            } else {
                assert!(!outcome.is_success(), "odd item {} should fail", i);
            }
        }
    }

    #[tokio::test]
    async fn test_call_sync_from_inside_running_scheduler() {
        let bridge = bridge_with(Arc::new(BlockingSleeper));

        // Plain synchronous code nested inside the test's scheduler
        let outcome = bridge.call_sync(CapabilityCall::new("blocking_sleeper", vec![]));
        assert!(outcome.is_success());
        assert_eq!(outcome.value(), Some(&json!("done")));
    }

    #[test]
    fn test_call_sync_without_scheduler() {
        let bridge = bridge_with(Arc::new(BlockingSleeper));

        let outcome = bridge.call_sync(CapabilityCall::new("blocking_sleeper", vec![]));
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_cancel_all_settles() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let bridge = Arc::new(bridge_with(Arc::new(GaugedCapability {
            current,
            peak,
            hold: Duration::from_secs(10),
        })));

        let b = bridge.clone();
        let batch = tokio::spawn(async move {
            let calls = (0..4)
                .map(|i| CapabilityCall::new("gauged", vec![json!(i)]))
                .collect();
            b.call_batch(calls, 4).await
        });

        // Let the batch get in flight, then cancel
        tokio::time::sleep(Duration::from_millis(50)).await;
        bridge.cancel_all().await;

        let outcomes = tokio::time::timeout(Duration::from_secs(2), batch)
            .await
            .expect("batch should settle promptly after cancel_all")
            .unwrap();
        assert_eq!(outcomes.len(), 4);
        assert!(outcomes.iter().all(|o| !o.is_success()));
    }

    #[tokio::test]
    async fn test_pool_size_floor() {
        let bridge = bridge_with(Arc::new(BlockingSleeper));
        assert!(bridge.pool_size() >= 1);
        assert!(default_pool_size() >= 1 && default_pool_size() <= 8);
    }
}
