//! Process lifecycle management for background capability calls
//!
//! Tracks native processes launched as background services, keeps a
//! durable registry, and escalates stop requests from a graceful signal to
//! a forced kill. The periodic supervisor lives in [`supervisor`].

pub mod registry;
pub mod supervisor;

pub use registry::{ManagedProcess, ProcessStatus, RegistryFile, ResourceSample};
pub use supervisor::Supervisor;

use crate::errors::{Result, ToolError};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use sysinfo::{Pid, ProcessStatus as NativeStatus, Signal, System};
use uuid::Uuid;

/// Window reserved after SIGKILL for the exit to become observable
const KILL_WAIT: Duration = Duration::from_secs(2);

/// Liveness probe result
enum Probe {
    Alive,
    Exited { code: Option<i32> },
}

struct ManagerState {
    processes: HashMap<String, ManagedProcess>,
    /// Every id this runtime has ever managed, including removed ones;
    /// used as tombstones when reconciling the registry file.
    owned: HashSet<String>,
    /// When each process was first observed terminal, for the grace window
    terminal_seen: HashMap<String, Instant>,
}

/// Tunables for stop escalation and auto-cleanup
#[derive(Debug, Clone)]
pub struct ProcessManagerConfig {
    /// Total window for a graceful stop before forced termination
    pub stop_escalation: Duration,
    /// Delay between terminal observation and auto-cleanup removal
    pub grace_period: Duration,
}

impl Default for ProcessManagerConfig {
    fn default() -> Self {
        Self {
            stop_escalation: Duration::from_secs(8),
            grace_period: Duration::from_secs(5),
        }
    }
}

/// Supervises background processes for one working directory
pub struct ProcessManager {
    working_dir: PathBuf,
    logs_dir: PathBuf,
    registry: RegistryFile,
    config: ProcessManagerConfig,
    state: Mutex<ManagerState>,
    /// Child handles for self-spawned processes, so exits are reaped
    children: Mutex<HashMap<String, Child>>,
    system: Mutex<System>,
}

impl ProcessManager {
    /// Create a manager against a registry file, loading any prior
    /// snapshot so `list()` reflects earlier runtimes before the first
    /// supervisor cycle.
    pub fn new(
        working_dir: impl AsRef<Path>,
        registry_path: impl Into<PathBuf>,
        config: ProcessManagerConfig,
    ) -> Self {
        let registry = RegistryFile::new(registry_path);
        let processes = registry.load();

        let owned: HashSet<String> = processes.keys().cloned().collect();
        let now = Instant::now();
        let terminal_seen = processes
            .iter()
            .filter(|(_, p)| p.status.is_terminal())
            .map(|(id, _)| (id.clone(), now))
            .collect();

        let working_dir = working_dir.as_ref().to_path_buf();
        let logs_dir = working_dir.join(".toolhost").join("logs");

        Self {
            working_dir,
            logs_dir,
            registry,
            config,
            state: Mutex::new(ManagerState {
                processes,
                owned,
                terminal_seen,
            }),
            children: Mutex::new(HashMap::new()),
            system: Mutex::new(System::new()),
        }
    }

    /// Launch a command as a background process and track it.
    ///
    /// Stdout and stderr are appended to a per-process log file; the call
    /// returns as soon as the OS process exists.
    pub fn spawn(&self, command_line: &str, auto_cleanup: bool) -> Result<ManagedProcess> {
        if command_line.trim().is_empty() {
            return Err(ToolError::Unknown {
                capability: "run_command".to_string(),
                message: "background command cannot be empty".to_string(),
            });
        }

        let process_id = Uuid::new_v4().to_string();
        fs::create_dir_all(&self.logs_dir)?;
        let log_file = self.logs_dir.join(format!("{}.log", process_id));
        let log = fs::File::create(&log_file)?;
        let err_log = log.try_clone()?;

        #[cfg(unix)]
        let mut command = {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command_line);
            c
        };
        #[cfg(windows)]
        let mut command = {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(command_line);
            c
        };

        let child = command
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(err_log))
            .spawn()?;

        let process = ManagedProcess {
            process_id: process_id.clone(),
            pid: child.id(),
            command: command_line.to_string(),
            working_dir: self.working_dir.clone(),
            log_file,
            start_time: unix_now(),
            status: ProcessStatus::Starting,
            auto_cleanup,
            last_resource_sample: None,
        };

        if let Ok(mut children) = self.children.lock() {
            children.insert(process_id.clone(), child);
        }
        {
            let mut state = self.lock_state();
            state.owned.insert(process_id.clone());
            state.processes.insert(process_id, process.clone());
        }
        self.persist();

        Ok(process)
    }

    /// Track an externally launched process.
    pub fn register(
        &self,
        pid: u32,
        command: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        log_file: impl Into<PathBuf>,
        auto_cleanup: bool,
    ) -> String {
        let process_id = Uuid::new_v4().to_string();
        let process = ManagedProcess {
            process_id: process_id.clone(),
            pid,
            command: command.into(),
            working_dir: working_dir.into(),
            log_file: log_file.into(),
            start_time: unix_now(),
            status: ProcessStatus::Running,
            auto_cleanup,
            last_resource_sample: None,
        };

        {
            let mut state = self.lock_state();
            state.owned.insert(process_id.clone());
            state.processes.insert(process_id.clone(), process);
        }
        self.persist();
        process_id
    }

    /// Snapshot of all tracked processes
    pub fn list(&self) -> Vec<ManagedProcess> {
        let mut processes: Vec<ManagedProcess> =
            self.lock_state().processes.values().cloned().collect();
        processes.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        processes
    }

    pub fn get(&self, process_id: &str) -> Option<ManagedProcess> {
        self.lock_state().processes.get(process_id).cloned()
    }

    /// Stop a tracked process.
    ///
    /// Graceful signal first, then bounded liveness polling, then forced
    /// termination; `force=true` skips straight to the forced signal.
    /// Returns `Ok(true)` when this call brought the process down and
    /// `Ok(false)` when it was already dead (idempotent success).
    pub async fn stop(&self, process_id: &str, force: bool) -> Result<bool> {
        let (pid, status) = {
            let state = self.lock_state();
            let process = state.processes.get(process_id).ok_or_else(|| {
                ToolError::NotFound {
                    capability: "stop".to_string(),
                    message: format!("no managed process with id {}", process_id),
                }
            })?;
            (process.pid, process.status)
        };

        if status.is_terminal() {
            return Ok(false);
        }

        self.transition(process_id, ProcessStatus::Stopping);
        self.persist();

        if !force {
            self.signal(pid, Signal::Term);
            // The graceful poll leaves room for the forced phase, so the
            // whole stop stays inside the stop_escalation window.
            let term_window = self.config.stop_escalation.saturating_sub(KILL_WAIT);
            let term_deadline = Instant::now() + term_window;
            while Instant::now() < term_deadline {
                if matches!(self.probe(process_id, pid), Probe::Exited { .. }) {
                    self.finalize_stop(process_id);
                    return Ok(true);
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        }

        // Escalate (or force): SIGKILL, then bounded wait for the exit to
        // become observable.
        self.signal(pid, Signal::Kill);
        let kill_deadline = Instant::now() + KILL_WAIT;
        while Instant::now() < kill_deadline {
            if matches!(self.probe(process_id, pid), Probe::Exited { .. }) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.finalize_stop(process_id);
        Ok(true)
    }

    /// Last `n` lines of a process's captured output.
    pub fn tail_log(&self, process_id: &str, n: usize) -> Result<String> {
        let log_file = {
            let state = self.lock_state();
            state
                .processes
                .get(process_id)
                .map(|p| p.log_file.clone())
                .ok_or_else(|| ToolError::NotFound {
                    capability: "tail_log".to_string(),
                    message: format!("no managed process with id {}", process_id),
                })?
        };

        let contents = fs::read_to_string(&log_file).map_err(|_| ToolError::NotFound {
            capability: "tail_log".to_string(),
            message: format!("log file missing: {}", log_file.display()),
        })?;

        let lines: Vec<&str> = contents.lines().collect();
        let start = lines.len().saturating_sub(n);
        Ok(lines[start..].join("\n"))
    }

    /// Stop every non-terminal process. Used by facade cleanup.
    pub async fn stop_all(&self, force: bool) {
        let ids: Vec<String> = self
            .list()
            .into_iter()
            .filter(|p| !p.status.is_terminal())
            .map(|p| p.process_id)
            .collect();
        for id in ids {
            let _ = self.stop(&id, force).await;
        }
    }

    /// One supervisor pass: probe liveness, record terminal edges exactly
    /// once, sample resources, run auto-cleanup after the grace window,
    /// and persist if anything changed.
    pub fn poll_once(&self) {
        let tracked: Vec<(String, u32, ProcessStatus, bool, PathBuf)> = {
            let state = self.lock_state();
            state
                .processes
                .values()
                .map(|p| {
                    (
                        p.process_id.clone(),
                        p.pid,
                        p.status,
                        p.auto_cleanup,
                        p.log_file.clone(),
                    )
                })
                .collect()
        };

        let mut changed = false;

        for (id, pid, status, _, _) in &tracked {
            if status.is_terminal() {
                continue;
            }
            match self.probe(id, *pid) {
                Probe::Alive => {
                    if *status == ProcessStatus::Starting {
                        changed |= self.transition(id, ProcessStatus::Running);
                    }
                    self.sample_resources(id, *pid);
                }
                Probe::Exited { code } => {
                    // First observed alive→dead edge: terminal exactly once
                    let next = match (status, code) {
                        (ProcessStatus::Stopping, _) => ProcessStatus::Stopped,
                        (_, Some(c)) if c != 0 => ProcessStatus::Failed,
                        _ => ProcessStatus::Stopped,
                    };
                    changed |= self.transition(id, next);
                    self.mark_terminal(id);
                }
            }
        }

        // Auto-cleanup of terminal entries past the grace window
        let expired: Vec<(String, PathBuf)> = {
            let state = self.lock_state();
            state
                .processes
                .values()
                .filter(|p| p.status.is_terminal() && p.auto_cleanup)
                .filter(|p| {
                    state
                        .terminal_seen
                        .get(&p.process_id)
                        .map(|t| t.elapsed() >= self.config.grace_period)
                        .unwrap_or(false)
                })
                .map(|p| (p.process_id.clone(), p.log_file.clone()))
                .collect()
        };
        for (id, log_file) in expired {
            {
                let mut state = self.lock_state();
                state.processes.remove(&id);
                state.terminal_seen.remove(&id);
            }
            if let Ok(mut children) = self.children.lock() {
                children.remove(&id);
            }
            let _ = fs::remove_file(&log_file);
            changed = true;
        }

        if changed {
            self.persist();
        }
    }

    pub fn registry_path(&self) -> &Path {
        self.registry.path()
    }

    pub fn config(&self) -> &ProcessManagerConfig {
        &self.config
    }

    /// Forward-only status update; invalid transitions are dropped.
    fn transition(&self, process_id: &str, next: ProcessStatus) -> bool {
        let mut state = self.lock_state();
        if let Some(process) = state.processes.get_mut(process_id) {
            if process.status.can_transition_to(next) {
                process.status = next;
                return true;
            }
        }
        false
    }

    fn mark_terminal(&self, process_id: &str) {
        let mut state = self.lock_state();
        state
            .terminal_seen
            .entry(process_id.to_string())
            .or_insert_with(Instant::now);
    }

    fn finalize_stop(&self, process_id: &str) {
        self.transition(process_id, ProcessStatus::Stopped);
        self.mark_terminal(process_id);
        // Reap the child if we launched it
        if let Ok(mut children) = self.children.lock() {
            if let Some(mut child) = children.remove(process_id) {
                let _ = child.wait();
            }
        }
        self.persist();
    }

    /// Liveness check. Self-spawned children are probed (and reaped)
    /// through their handle; external pids through the system table, where
    /// a zombie counts as exited.
    fn probe(&self, process_id: &str, pid: u32) -> Probe {
        if let Ok(mut children) = self.children.lock() {
            if let Some(child) = children.get_mut(process_id) {
                return match child.try_wait() {
                    Ok(Some(status)) => Probe::Exited {
                        code: status.code(),
                    },
                    Ok(None) => Probe::Alive,
                    Err(_) => Probe::Exited { code: None },
                };
            }
        }

        let mut system = match self.system.lock() {
            Ok(s) => s,
            Err(_) => return Probe::Exited { code: None },
        };
        let sys_pid = Pid::from_u32(pid);
        system.refresh_process(sys_pid);
        match system.process(sys_pid) {
            Some(p) if p.status() != NativeStatus::Zombie => Probe::Alive,
            _ => Probe::Exited { code: None },
        }
    }

    fn sample_resources(&self, process_id: &str, pid: u32) {
        let sample = {
            let mut system = match self.system.lock() {
                Ok(s) => s,
                Err(_) => return,
            };
            let sys_pid = Pid::from_u32(pid);
            system.refresh_process(sys_pid);
            system.process(sys_pid).map(|p| ResourceSample {
                cpu_percent: p.cpu_usage(),
                memory_bytes: p.memory(),
                sampled_at: unix_now(),
            })
        };

        if let Some(sample) = sample {
            let mut state = self.lock_state();
            if let Some(process) = state.processes.get_mut(process_id) {
                // Only the latest sample is retained
                process.last_resource_sample = Some(sample);
            }
        }
    }

    fn signal(&self, pid: u32, signal: Signal) {
        let mut system = match self.system.lock() {
            Ok(s) => s,
            Err(_) => return,
        };
        let sys_pid = Pid::from_u32(pid);
        system.refresh_process(sys_pid);
        if let Some(process) = system.process(sys_pid) {
            // kill_with is None on platforms without signal support
            if process.kill_with(signal).is_none() {
                process.kill();
            }
        }
    }

    fn persist(&self) {
        let (processes, owned) = {
            let state = self.lock_state();
            (state.processes.clone(), state.owned.clone())
        };
        // A failed persist must not take the runtime down; the next
        // changed cycle retries.
        let _ = self.registry.write(&processes, &owned);
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ManagerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> ProcessManager {
        ProcessManager::new(
            dir.path(),
            dir.path().join("processes.json"),
            ProcessManagerConfig {
                stop_escalation: Duration::from_secs(8),
                grace_period: Duration::from_millis(100),
            },
        )
    }

    #[tokio::test]
    async fn test_spawn_and_list() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);

        let process = mgr.spawn("sleep 30", false).unwrap();
        assert_eq!(process.status, ProcessStatus::Starting);
        assert!(process.pid > 0);

        let listed = mgr.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].process_id, process.process_id);

        mgr.stop(&process.process_id, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_supervisor_cycle_promotes_to_running() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);

        let process = mgr.spawn("sleep 30", false).unwrap();
        mgr.poll_once();

        let seen = mgr.get(&process.process_id).unwrap();
        assert_eq!(seen.status, ProcessStatus::Running);
        assert!(seen.last_resource_sample.is_some());

        mgr.stop(&process.process_id, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_exit_edge_recorded_once() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);

        let process = mgr.spawn("true", false).unwrap();
        // Give the short-lived process time to exit
        tokio::time::sleep(Duration::from_millis(300)).await;

        mgr.poll_once();
        let seen = mgr.get(&process.process_id).unwrap();
        assert_eq!(seen.status, ProcessStatus::Stopped);

        // Further cycles leave the terminal status alone
        mgr.poll_once();
        assert_eq!(
            mgr.get(&process.process_id).unwrap().status,
            ProcessStatus::Stopped
        );
    }

    #[tokio::test]
    async fn test_failed_exit_code() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);

        let process = mgr.spawn("exit 3", false).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        mgr.poll_once();
        assert_eq!(
            mgr.get(&process.process_id).unwrap().status,
            ProcessStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_auto_cleanup_after_grace_window() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);

        let process = mgr.spawn("true", true).unwrap();
        let log_file = process.log_file.clone();
        tokio::time::sleep(Duration::from_millis(300)).await;

        // First cycle records the terminal edge; entry survives the grace
        mgr.poll_once();
        assert!(mgr.get(&process.process_id).is_some());

        tokio::time::sleep(Duration::from_millis(200)).await;
        mgr.poll_once();
        assert!(mgr.get(&process.process_id).is_none());
        assert!(!log_file.exists());
    }

    #[tokio::test]
    async fn test_no_auto_cleanup_stays_listed() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);

        let process = mgr.spawn("true", false).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        mgr.poll_once();
        tokio::time::sleep(Duration::from_millis(200)).await;
        mgr.poll_once();

        let seen = mgr.get(&process.process_id).unwrap();
        assert_eq!(seen.status, ProcessStatus::Stopped);
    }

    #[tokio::test]
    async fn test_stop_graceful() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);

        let process = mgr.spawn("sleep 30", false).unwrap();
        let stopped = mgr.stop(&process.process_id, false).await.unwrap();
        assert!(stopped);
        assert_eq!(
            mgr.get(&process.process_id).unwrap().status,
            ProcessStatus::Stopped
        );
    }

    #[tokio::test]
    async fn test_stop_escalates_on_term_ignorer() {
        let dir = TempDir::new().unwrap();
        let mgr = ProcessManager::new(
            dir.path(),
            dir.path().join("processes.json"),
            ProcessManagerConfig {
                stop_escalation: Duration::from_secs(3),
                grace_period: Duration::from_secs(60),
            },
        );

        let process = mgr.spawn("trap '' TERM; sleep 60", false).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        // TERM is ignored; the forced phase must still land inside the
        // escalation window, graceful poll and kill wait combined.
        let started = Instant::now();
        let stopped = mgr.stop(&process.process_id, false).await.unwrap();
        assert!(stopped);
        assert!(started.elapsed() <= Duration::from_secs(4));
        assert_eq!(
            mgr.get(&process.process_id).unwrap().status,
            ProcessStatus::Stopped
        );
    }

    #[tokio::test]
    async fn test_stop_idempotent_and_unknown() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);

        let process = mgr.spawn("true", false).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        mgr.poll_once();

        // Already dead: success, nothing to do
        assert!(!mgr.stop(&process.process_id, false).await.unwrap());

        // Unknown id: NotFound
        let err = mgr.stop("does-not-exist", false).await.unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_tail_log() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);

        let process = mgr.spawn("printf 'one\\ntwo\\nthree\\n'", false).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let tail = mgr.tail_log(&process.process_id, 2).unwrap();
        assert_eq!(tail, "two\nthree");

        let err = mgr.tail_log("does-not-exist", 5).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_crash_recovery_reloads_registry() {
        let dir = TempDir::new().unwrap();
        let registry_path = dir.path().join("processes.json");

        let process_id = {
            let mgr = ProcessManager::new(
                dir.path(),
                &registry_path,
                ProcessManagerConfig::default(),
            );
            let process = mgr.spawn("sleep 30", false).unwrap();
            process.process_id
            // Manager dropped without stopping: simulated crash
        };

        let fresh = ProcessManager::new(
            dir.path(),
            &registry_path,
            ProcessManagerConfig::default(),
        );
        // Prior entry visible before any supervisor cycle
        let listed = fresh.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].process_id, process_id);

        let _ = fresh.stop(&process_id, true).await;
    }

    #[tokio::test]
    async fn test_register_external_process() {
        let dir = TempDir::new().unwrap();
        let mgr = manager(&dir);

        let id = mgr.register(
            std::process::id(),
            "external-service",
            dir.path(),
            dir.path().join("external.log"),
            false,
        );
        let seen = mgr.get(&id).unwrap();
        assert_eq!(seen.status, ProcessStatus::Running);
        assert_eq!(seen.command, "external-service");
    }
}
