//! Shell command capability
//!
//! Suspending-mode: the child is awaited, not polled on a worker thread.
//! The command line is run past the command guard by the invoker before
//! execution ever starts. Background-capable: with `background=true` the
//! facade hands the command to the process manager instead and returns a
//! process id immediately.

use crate::capability::Capability;
use crate::errors::{Result, ToolError};
use crate::types::{CapabilityCall, ExecMode, ToolContext};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

pub struct RunCommand;

#[async_trait]
impl Capability for RunCommand {
    fn name(&self) -> &str {
        "run_command"
    }

    fn mode(&self) -> ExecMode {
        ExecMode::Suspending
    }

    fn background_capable(&self) -> bool {
        true
    }

    // Command output is not deterministic
    fn cacheable(&self) -> bool {
        false
    }

    fn guarded_command(&self, call: &CapabilityCall) -> Option<String> {
        call.arg_str(0).map(String::from)
    }

    async fn run(&self, call: &CapabilityCall, ctx: &ToolContext) -> Result<Value> {
        let command_line = call.arg_str(0).unwrap_or("");
        if command_line.trim().is_empty() {
            return Err(ToolError::Unknown {
                capability: self.name().to_string(),
                message: "command cannot be empty".to_string(),
            });
        }

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

        let output = command
            .current_dir(&ctx.working_dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ToolError::upstream(self.name(), e))?;

        let stdout = truncated(&output.stdout, ctx.max_output_size);
        let stderr = truncated(&output.stderr, ctx.max_output_size);

        Ok(json!({
            "stdout": stdout,
            "stderr": stderr,
            "exit_code": output.status.code().unwrap_or(-1),
        }))
    }
}

fn truncated(bytes: &[u8], max: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= max {
        text.into_owned()
    } else {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}\n[output truncated at {} bytes]", &text[..end], max)
    }
}
