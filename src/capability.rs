//! Capability interface and registry
//!
//! A capability is an external operation invocable by name with
//! JSON-compatible arguments. Its execution mode and background flag are
//! declared here, at registration, so the bridge never has to guess at
//! call time.

use crate::errors::{Result, ToolError};
use crate::types::{CapabilityCall, ExecMode, ToolContext};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// An invocable capability.
///
/// Implementors provide the execution method matching their declared
/// [`ExecMode`]; the other method's default returns an error so a
/// mis-registered capability fails loudly rather than silently blocking.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Stable capability name
    fn name(&self) -> &str;

    /// Suspending or blocking execution
    fn mode(&self) -> ExecMode;

    /// Whether a background-flagged call may detach into a managed process
    fn background_capable(&self) -> bool {
        false
    }

    /// Whether successful results may be cached (false for side-effecting
    /// or non-deterministic capabilities)
    fn cacheable(&self) -> bool {
        true
    }

    /// Command line to run past the command guard, if this call executes
    /// one. `None` skips guard classification entirely.
    fn guarded_command(&self, _call: &CapabilityCall) -> Option<String> {
        None
    }

    /// Suspending execution path
    async fn run(&self, _call: &CapabilityCall, _ctx: &ToolContext) -> Result<Value> {
        Err(ToolError::Unknown {
            capability: self.name().to_string(),
            message: "capability is registered as blocking, not suspending".to_string(),
        })
    }

    /// Blocking execution path, dispatched to the worker pool
    fn run_blocking(&self, _call: &CapabilityCall, _ctx: &ToolContext) -> Result<Value> {
        Err(ToolError::Unknown {
            capability: self.name().to_string(),
            message: "capability is registered as suspending, not blocking".to_string(),
        })
    }
}

/// Name-keyed capability registry.
///
/// Shared and registrable after construction, so embedding platforms can
/// add external capabilities to a live runtime. Clones share the same
/// underlying table.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: Arc<RwLock<HashMap<String, Arc<dyn Capability>>>>,
}

impl CapabilityRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability under its declared name.
    ///
    /// Re-registering a name replaces the previous implementation.
    pub fn register(&self, capability: Arc<dyn Capability>) {
        if let Ok(mut capabilities) = self.capabilities.write() {
            capabilities.insert(capability.name().to_string(), capability);
        }
    }

    /// Get capability by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities
            .read()
            .ok()
            .and_then(|c| c.get(name).cloned())
    }

    /// Check if capability exists
    pub fn contains(&self, name: &str) -> bool {
        self.capabilities
            .read()
            .map(|c| c.contains_key(name))
            .unwrap_or(false)
    }

    /// All registered names
    pub fn names(&self) -> Vec<String> {
        self.capabilities
            .read()
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Names of background-capable capabilities
    pub fn background_capable(&self) -> Vec<String> {
        self.capabilities
            .read()
            .map(|c| {
                c.iter()
                    .filter(|(_, cap)| cap.background_capable())
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.capabilities.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
