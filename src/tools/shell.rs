//! Shell tool: run a command with a timeout, output limits, and a
//! metacharacter allow-list.
//!
//! Commands containing shell control characters (`;`, `|`, `&`, `$`,
//! backticks, redirections, subshells) are rejected before anything is
//! spawned; what remains is plain word-splitting and quoting, which `sh -c`
//! resolves through `PATH`.

use std::process::{Command, Stdio};

use serde_json::{Value, json};

use super::{Caps, Tool, ToolContext, ToolOutcome, ToolSpec, require_str};

/// Maximum combined stdout+stderr size (64 KiB).
const MAX_OUTPUT_SIZE: usize = 64 * 1024;

/// Characters allowed in a command besides ASCII alphanumerics.
const ALLOWED_PUNCT: &str = " -_./=:,'\"@+%";

/// Execute shell commands with timeout and output limits.
pub struct ShellTool;

/// The first disallowed character, if any.
fn first_forbidden(command: &str) -> Option<char> {
    command
        .chars()
        .find(|&c| !c.is_ascii_alphanumeric() && !ALLOWED_PUNCT.contains(c))
}

impl Tool for ShellTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "shell".into(),
            description: "Execute a shell command and return its output.".into(),
            args_schema: json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The shell command to execute"
                    }
                },
                "required": ["command"]
            }),
            required_caps: Caps::SHELL,
        }
    }

    fn execute(&self, args: &Value, ctx: &ToolContext) -> ToolOutcome {
        let command = match require_str(args, "command") {
            Ok(c) => c,
            Err(e) => return ToolOutcome::err(e),
        };
        if let Some(c) = first_forbidden(command) {
            return ToolOutcome::err(format!(
                "command rejected: character {c:?} is not on the shell allow-list"
            ));
        }

        let mut child = match Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => return ToolOutcome::err(format!("failed to spawn shell: {e}")),
        };

        // Poll for completion with a timeout loop.
        let deadline = std::time::Instant::now() + ctx.tool_timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if std::time::Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return ToolOutcome::err("timeout");
                    }
                    std::thread::sleep(std::time::Duration::from_millis(50));
                }
                Err(e) => {
                    return ToolOutcome::err(format!("failed to wait on command: {e}"));
                }
            }
        };

        let stdout = child
            .stdout
            .take()
            .and_then(|mut s| {
                let mut buf = Vec::new();
                std::io::Read::read_to_end(&mut s, &mut buf).ok()?;
                Some(buf)
            })
            .unwrap_or_default();
        let stderr = child
            .stderr
            .take()
            .and_then(|mut s| {
                let mut buf = Vec::new();
                std::io::Read::read_to_end(&mut s, &mut buf).ok()?;
                Some(buf)
            })
            .unwrap_or_default();

        let mut output = String::new();
        for (label, bytes) in [("stdout", &stdout), ("stderr", &stderr)] {
            if bytes.is_empty() {
                continue;
            }
            let text = String::from_utf8_lossy(bytes);
            if text.len() > MAX_OUTPUT_SIZE {
                let mut cut = MAX_OUTPUT_SIZE;
                while !text.is_char_boundary(cut) {
                    cut -= 1;
                }
                output.push_str(&format!(
                    "{label} ({} bytes, truncated):\n{}...\n",
                    text.len(),
                    &text[..cut]
                ));
            } else {
                output.push_str(&format!("{label}:\n{text}\n"));
            }
        }

        let exit_code = status.code().unwrap_or(-1);
        let result = format!("Command: {command}\nExit code: {exit_code}\n{output}");
        if status.success() {
            ToolOutcome::ok(result)
        } else {
            ToolOutcome::err(result)
        }
    }
}
