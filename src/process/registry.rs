//! Durable process registry
//!
//! Snapshot of every managed process, persisted as a JSON document at a
//! fixed path so a restarted runtime or an external inspector sees prior
//! state. In-memory state is authoritative within a runtime's lifetime;
//! the file is authoritative across restarts and is reconciled, not
//! overwritten, on each write.

use crate::errors::{Result, ToolError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Lifecycle of a managed process. Transitions go forward only:
/// Starting → Running → { Stopping → Stopped | Stopped | Failed }.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl ProcessStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessStatus::Stopped | ProcessStatus::Failed)
    }

    /// Forward-only transition check
    pub fn can_transition_to(self, next: ProcessStatus) -> bool {
        use ProcessStatus::*;
        match self {
            Starting => matches!(next, Running | Stopping | Stopped | Failed),
            Running => matches!(next, Stopping | Stopped | Failed),
            Stopping => matches!(next, Stopped | Failed),
            Stopped | Failed => false,
        }
    }
}

/// Latest resource usage observed for a live process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub cpu_percent: f32,
    pub memory_bytes: u64,
    /// Unix seconds of the sample
    pub sampled_at: u64,
}

/// One tracked native process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedProcess {
    /// Runtime-assigned identifier (uuid), stable across restarts
    pub process_id: String,

    /// Native OS pid
    pub pid: u32,

    /// Command line as launched
    pub command: String,

    /// Working directory the process was launched in
    pub working_dir: PathBuf,

    /// Captured stdout/stderr log
    pub log_file: PathBuf,

    /// Unix seconds at launch
    pub start_time: u64,

    pub status: ProcessStatus,

    /// Remove the entry and its log once terminal, after a grace window
    pub auto_cleanup: bool,

    /// Latest supervisor resource sample; not persisted to disk
    #[serde(skip)]
    pub last_resource_sample: Option<ResourceSample>,
}

/// On-disk registry with atomic writes and reconciling merges
pub struct RegistryFile {
    path: PathBuf,
}

impl RegistryFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the last successful snapshot. A missing file is an empty
    /// registry; an unparseable file (mid-write crash on a filesystem
    /// without atomic rename) also degrades to empty rather than failing
    /// startup.
    pub fn load(&self) -> HashMap<String, ManagedProcess> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return HashMap::new(),
        };
        serde_json::from_str(&contents).unwrap_or_default()
    }

    /// Persist a snapshot, reconciling with whatever is on disk.
    ///
    /// Entries on disk whose ids this runtime has never owned are
    /// preserved verbatim (another runtime may own them); owned ids are
    /// replaced by the in-memory view, including removal. The write is
    /// temp-file-plus-rename so a crash mid-write leaves the previous
    /// snapshot intact.
    pub fn write(
        &self,
        processes: &HashMap<String, ManagedProcess>,
        owned_ids: &HashSet<String>,
    ) -> Result<()> {
        let mut merged = self.load();
        merged.retain(|id, _| !owned_ids.contains(id));
        for (id, process) in processes {
            merged.insert(id.clone(), process.clone());
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&merged)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            ToolError::Unknown {
                capability: "process_registry".to_string(),
                message: format!("failed to commit registry snapshot: {}", e),
            }
        })?;
        Ok(())
    }
}
