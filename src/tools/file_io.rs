//! File tools: bounded reads from anywhere, writes confined to the scratch
//! directory.

use std::path::{Component, Path, PathBuf};

use serde_json::{Value, json};

use super::{Caps, Tool, ToolContext, ToolOutcome, ToolSpec, require_str};

/// Maximum bytes returned by `read_file` (context budget).
const MAX_READ_BYTES: usize = 32 * 1024;

/// Read the contents of a file, truncated to 32 KiB.
pub struct ReadFileTool;

impl Tool for ReadFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "read_file".into(),
            description: "Read the contents of a file (max 32KB).".into(),
            args_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "File path to read"}
                },
                "required": ["path"]
            }),
            required_caps: Caps::FILESYSTEM,
        }
    }

    fn execute(&self, args: &Value, _ctx: &ToolContext) -> ToolOutcome {
        let path = match require_str(args, "path") {
            Ok(p) => p,
            Err(e) => return ToolOutcome::err(e),
        };
        match std::fs::read(path) {
            Ok(mut bytes) => {
                let total = bytes.len();
                bytes.truncate(MAX_READ_BYTES);
                let mut text = String::from_utf8_lossy(&bytes).into_owned();
                if total > MAX_READ_BYTES {
                    text.push_str(&format!("\n... [truncated, total {total} bytes]"));
                }
                ToolOutcome::ok(text)
            }
            Err(e) => ToolOutcome::err(format!("cannot read \"{path}\": {e}")),
        }
    }
}

/// Write content to a file under the scratch directory.
pub struct WriteFileTool;

/// Resolve a requested path against the scratch dir, refusing escapes.
///
/// Relative paths are joined onto scratch; absolute paths must already lie
/// inside it. `..` components are rejected outright — lexical normalization
/// is enough because the scratch tree contains no symlinks of ours.
fn resolve_write_path(requested: &str, scratch: &Path) -> Result<PathBuf, String> {
    let requested = Path::new(requested);
    if requested
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err("path may not contain '..'".into());
    }
    let resolved = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        scratch.join(requested)
    };
    if !resolved.starts_with(scratch) {
        return Err(format!(
            "writes are restricted to the scratch directory {}",
            scratch.display()
        ));
    }
    Ok(resolved)
}

impl Tool for WriteFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "write_file".into(),
            description: "Write content to a file in the scratch directory.".into(),
            args_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"}
                },
                "required": ["path", "content"]
            }),
            required_caps: Caps::FILESYSTEM,
        }
    }

    fn execute(&self, args: &Value, ctx: &ToolContext) -> ToolOutcome {
        let path = match require_str(args, "path") {
            Ok(p) => p,
            Err(e) => return ToolOutcome::err(e),
        };
        let content = match require_str(args, "content") {
            Ok(c) => c,
            Err(e) => return ToolOutcome::err(e),
        };
        let Some(scratch) = ctx.scratch_dir.as_deref() else {
            return ToolOutcome::err("writes disabled: no scratch directory configured");
        };
        let resolved = match resolve_write_path(path, scratch) {
            Ok(p) => p,
            Err(e) => return ToolOutcome::err(e),
        };
        if let Some(parent) = resolved.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ToolOutcome::err(format!("cannot create {}: {e}", parent.display()));
            }
        }
        match std::fs::write(&resolved, content) {
            Ok(()) => ToolOutcome::ok(format!(
                "wrote {} bytes to {}",
                content.len(),
                resolved.display()
            )),
            Err(e) => ToolOutcome::err(format!("cannot write {}: {e}", resolved.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_ctx() -> (tempfile::TempDir, ToolContext) {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ToolContext::new();
        ctx.scratch_dir = Some(dir.path().to_path_buf());
        (dir, ctx)
    }

    #[test]
    fn read_round_trips_through_write() {
        let (dir, ctx) = scratch_ctx();
        let out = WriteFileTool.execute(
            &json!({"path": "notes/a.txt", "content": "hello"}),
            &ctx,
        );
        assert!(out.success, "{out:?}");

        let written = dir.path().join("notes/a.txt");
        let read = ReadFileTool.execute(
            &json!({"path": written.to_string_lossy()}),
            &ctx,
        );
        assert!(read.success);
        assert_eq!(read.output.as_deref(), Some("hello"));
    }

    #[test]
    fn read_truncates_large_files() {
        let (dir, ctx) = scratch_ctx();
        let big = dir.path().join("big.txt");
        std::fs::write(&big, "y".repeat(MAX_READ_BYTES + 100)).unwrap();
        let out = ReadFileTool.execute(&json!({"path": big.to_string_lossy()}), &ctx);
        let text = out.output.unwrap();
        assert!(text.contains("[truncated"));
        assert!(text.len() < MAX_READ_BYTES + 200);
    }

    #[test]
    fn read_missing_file_is_an_outcome_not_a_panic() {
        let out = ReadFileTool.execute(&json!({"path": "/no/such/file"}), &ToolContext::new());
        assert!(!out.success);
    }

    #[test]
    fn write_rejects_escapes() {
        let (_dir, ctx) = scratch_ctx();
        for path in ["../outside.txt", "/etc/hostile", "a/../../b"] {
            let out = WriteFileTool.execute(&json!({"path": path, "content": "x"}), &ctx);
            assert!(!out.success, "{path} should be rejected");
        }
    }

    #[test]
    fn write_without_scratch_is_disabled() {
        let out = WriteFileTool.execute(
            &json!({"path": "a.txt", "content": "x"}),
            &ToolContext::new(),
        );
        assert!(!out.success);
        assert!(out.error.unwrap().contains("scratch"));
    }
}
