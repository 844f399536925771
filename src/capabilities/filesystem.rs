//! Filesystem capabilities
//!
//! Blocking-mode capabilities confined to the context's working
//! directory: relative paths resolve against it, and any path that
//! canonicalizes outside it is rejected before touching the filesystem.

use crate::capability::Capability;
use crate::errors::{Result, ToolError};
use crate::types::{CapabilityCall, ExecMode, ToolContext};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Resolve `path` against the working directory and verify it cannot
/// escape it. Nonexistent targets (writes) are verified through their
/// parent directory.
fn confine(capability: &str, path: &str, working_dir: &Path) -> Result<PathBuf> {
    if path.is_empty() {
        return Err(ToolError::NotFound {
            capability: capability.to_string(),
            message: "empty path".to_string(),
        });
    }

    let root = working_dir
        .canonicalize()
        .map_err(|e| ToolError::Unknown {
            capability: capability.to_string(),
            message: format!("working directory unavailable: {}", e),
        })?;

    let requested = Path::new(path);
    let full = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        root.join(requested)
    };

    let escape = || ToolError::Security {
        capability: capability.to_string(),
        message: format!("path escapes working directory: {}", path),
    };

    match full.canonicalize() {
        Ok(canonical) => {
            if canonical.starts_with(&root) {
                Ok(canonical)
            } else {
                Err(escape())
            }
        }
        Err(_) => {
            // Target doesn't exist yet; the parent must
            let parent = full.parent().ok_or_else(escape)?;
            let parent = parent.canonicalize().map_err(|_| ToolError::NotFound {
                capability: capability.to_string(),
                message: format!("parent directory does not exist: {}", path),
            })?;
            if !parent.starts_with(&root) {
                return Err(escape());
            }
            match full.file_name() {
                Some(name) => Ok(parent.join(name)),
                None => Err(escape()),
            }
        }
    }
}

/// Read a file's contents. `args[0]` = path.
pub struct ReadFile;

#[async_trait]
impl Capability for ReadFile {
    fn name(&self) -> &str {
        "read_file"
    }

    fn mode(&self) -> ExecMode {
        ExecMode::Blocking
    }

    fn run_blocking(&self, call: &CapabilityCall, ctx: &ToolContext) -> Result<Value> {
        let path = call.arg_str(0).unwrap_or("");
        let verified = confine(self.name(), path, &ctx.working_dir)?;

        let metadata = fs::metadata(&verified).map_err(|_| ToolError::NotFound {
            capability: self.name().to_string(),
            message: format!("file does not exist: {}", path),
        })?;
        if metadata.len() as usize > ctx.max_output_size {
            return Err(ToolError::Resource {
                capability: self.name().to_string(),
                message: format!(
                    "file is {} bytes, larger than the {} byte limit",
                    metadata.len(),
                    ctx.max_output_size
                ),
            });
        }

        let contents = fs::read_to_string(&verified)?;
        Ok(json!(contents))
    }
}

/// Write content to a file. `args[0]` = path, `args[1]` = content,
/// kwarg `append` selects append over truncate.
pub struct WriteFile;

#[async_trait]
impl Capability for WriteFile {
    fn name(&self) -> &str {
        "write_file"
    }

    fn mode(&self) -> ExecMode {
        ExecMode::Blocking
    }

    // Writes mutate the filesystem; a cached result would go stale
    fn cacheable(&self) -> bool {
        false
    }

    fn run_blocking(&self, call: &CapabilityCall, ctx: &ToolContext) -> Result<Value> {
        let path = call.arg_str(0).unwrap_or("");
        let content = call.arg_str(1).unwrap_or("");
        let append = call.kwarg_bool("append", false);

        let verified = confine(self.name(), path, &ctx.working_dir)?;

        if append {
            use std::io::Write;
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&verified)?;
            file.write_all(content.as_bytes())?;
        } else {
            fs::write(&verified, content)?;
        }

        Ok(json!({ "path": path, "bytes_written": content.len() }))
    }
}

/// List a directory. `args[0]` = path (default "."), kwarg `recursive`.
pub struct ListDir;

#[async_trait]
impl Capability for ListDir {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn mode(&self) -> ExecMode {
        ExecMode::Blocking
    }

    fn run_blocking(&self, call: &CapabilityCall, ctx: &ToolContext) -> Result<Value> {
        let path = call.arg_str(0).unwrap_or(".");
        let recursive = call.kwarg_bool("recursive", false);

        let verified = confine(self.name(), path, &ctx.working_dir)?;
        if !verified.is_dir() {
            return Err(ToolError::NotFound {
                capability: self.name().to_string(),
                message: format!("not a directory: {}", path),
            });
        }

        let mut entries = Vec::new();
        if recursive {
            collect_recursive(&verified, &verified, &mut entries)?;
        } else {
            for entry in fs::read_dir(&verified)? {
                let entry = entry?;
                let kind = if entry.path().is_dir() { "dir" } else { "file" };
                entries.push(json!({
                    "name": entry.file_name().to_string_lossy(),
                    "kind": kind,
                }));
            }
        }
        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

        Ok(Value::Array(entries))
    }
}

fn collect_recursive(base: &Path, current: &Path, entries: &mut Vec<Value>) -> Result<()> {
    for entry in fs::read_dir(current)? {
        let entry = entry?;
        let path = entry.path();
        let relative = path.strip_prefix(base).unwrap_or(&path).to_path_buf();
        if path.is_dir() {
            entries.push(json!({ "name": relative.to_string_lossy(), "kind": "dir" }));
            collect_recursive(base, &path, entries)?;
        } else {
            entries.push(json!({ "name": relative.to_string_lossy(), "kind": "file" }));
        }
    }
    Ok(())
}
