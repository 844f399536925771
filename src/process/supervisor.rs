//! Periodic supervisor task
//!
//! Runs [`ProcessManager::poll_once`] on a fixed interval for as long as
//! the owning runtime lives. The loop is a plain spawned task; dropping
//! the handle aborts it, so a supervisor can never outlive its session.

use super::ProcessManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Default interval between supervisor cycles
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(3);

/// Handle to the running supervisor loop
pub struct Supervisor {
    handle: JoinHandle<()>,
}

impl Supervisor {
    /// Start supervising on the given interval.
    pub fn start(manager: Arc<ProcessManager>, interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick fires immediately; skip it so a freshly started
            // supervisor doesn't race the spawn that created it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let manager = manager.clone();
                // poll_once does blocking fs and proc-table work
                let _ = tokio::task::spawn_blocking(move || manager.poll_once()).await;
            }
        });
        Self { handle }
    }

    /// Stop the loop. Idempotent.
    pub fn shutdown(&self) {
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ProcessManagerConfig, ProcessStatus};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_supervisor_observes_exit() {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(ProcessManager::new(
            dir.path(),
            dir.path().join("processes.json"),
            ProcessManagerConfig {
                stop_escalation: Duration::from_secs(2),
                grace_period: Duration::from_secs(60),
            },
        ));

        let process = manager.spawn("true", false).unwrap();
        let supervisor = Supervisor::start(manager.clone(), Duration::from_millis(50));

        // Within a few cycles the exit edge must be recorded
        let mut status = ProcessStatus::Starting;
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            status = manager.get(&process.process_id).unwrap().status;
            if status.is_terminal() {
                break;
            }
        }
        assert_eq!(status, ProcessStatus::Stopped);

        supervisor.shutdown();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_supervisor_auto_cleanup_end_to_end() {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(ProcessManager::new(
            dir.path(),
            dir.path().join("processes.json"),
            ProcessManagerConfig {
                stop_escalation: Duration::from_secs(2),
                grace_period: Duration::from_millis(100),
            },
        ));

        let process = manager.spawn("true", true).unwrap();
        let _supervisor = Supervisor::start(manager.clone(), Duration::from_millis(50));

        let mut gone = false;
        for _ in 0..60 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            if manager.get(&process.process_id).is_none() {
                gone = true;
                break;
            }
        }
        assert!(gone, "auto_cleanup entry should disappear after the grace window");
    }

    #[tokio::test]
    async fn test_drop_aborts_loop() {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(ProcessManager::new(
            dir.path(),
            dir.path().join("processes.json"),
            ProcessManagerConfig::default(),
        ));

        let supervisor = Supervisor::start(manager, Duration::from_millis(50));
        assert!(supervisor.is_running());
        drop(supervisor);
        // Nothing to assert beyond not hanging; the abort is in Drop
    }
}
