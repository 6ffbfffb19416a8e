//! Memory tools: the agent's explicit interface to the tiered store.
//!
//! `memory_store` is the only writer of the Archival tier; `memory_search`
//! queries both indexed tiers; `memory_core_update` edits the always-in-prompt
//! Core blocks.

use serde_json::{Value, json};

use crate::memory::Tier;

use super::{Caps, Tool, ToolContext, ToolOutcome, ToolSpec, require_str};

/// Default result count for memory searches.
const DEFAULT_TOP_K: usize = 5;

/// Store a fact in long-term archival memory.
pub struct MemoryStoreTool;

impl Tool for MemoryStoreTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "memory_store".into(),
            description: "Save a fact to long-term archival memory.".into(),
            args_schema: json!({
                "type": "object",
                "properties": {
                    "content": {"type": "string", "description": "Fact to remember"}
                },
                "required": ["content"]
            }),
            required_caps: Caps::MEMORY,
        }
    }

    fn execute(&self, args: &Value, ctx: &ToolContext) -> ToolOutcome {
        let content = match require_str(args, "content") {
            Ok(c) => c,
            Err(e) => return ToolOutcome::err(e),
        };
        let Some(memory) = ctx.memory.as_deref() else {
            return ToolOutcome::err("memory store not available");
        };
        match memory.append(Tier::Archival, "tool", content, None) {
            Ok(seq) => ToolOutcome::ok(format!("stored as archival record {seq}")),
            Err(e) => ToolOutcome::err(format!("store failed: {e}")),
        }
    }
}

/// Search recall and archival memory.
pub struct MemorySearchTool;

impl Tool for MemorySearchTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "memory_search".into(),
            description: "Search recall and archival memory for matching records.".into(),
            args_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "k": {"type": "integer", "description": "Max results (default 5)"}
                },
                "required": ["query"]
            }),
            required_caps: Caps::MEMORY,
        }
    }

    fn execute(&self, args: &Value, ctx: &ToolContext) -> ToolOutcome {
        let query = match require_str(args, "query") {
            Ok(q) => q,
            Err(e) => return ToolOutcome::err(e),
        };
        let k = args
            .get("k")
            .and_then(Value::as_u64)
            .map(|k| k as usize)
            .unwrap_or(DEFAULT_TOP_K);
        let Some(memory) = ctx.memory.as_deref() else {
            return ToolOutcome::err("memory store not available");
        };
        match memory.search_all(query, k) {
            Ok(hits) if hits.is_empty() => ToolOutcome::ok("no matching memories"),
            Ok(hits) => {
                let lines: Vec<String> = hits
                    .iter()
                    .map(|r| format!("[{}] ({}) {}", r.seq, r.role, r.text))
                    .collect();
                ToolOutcome::ok(lines.join("\n"))
            }
            Err(e) => ToolOutcome::err(format!("search failed: {e}")),
        }
    }
}

/// Update a named Core memory block.
pub struct MemoryCoreUpdateTool;

impl Tool for MemoryCoreUpdateTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "memory_core_update".into(),
            description: "Set a named core memory block (always visible in the prompt).".into(),
            args_schema: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "value": {"type": "string"}
                },
                "required": ["name", "value"]
            }),
            required_caps: Caps::MEMORY,
        }
    }

    fn execute(&self, args: &Value, ctx: &ToolContext) -> ToolOutcome {
        let name = match require_str(args, "name") {
            Ok(n) => n,
            Err(e) => return ToolOutcome::err(e),
        };
        let value = match require_str(args, "value") {
            Ok(v) => v,
            Err(e) => return ToolOutcome::err(e),
        };
        let Some(memory) = ctx.memory.as_deref() else {
            return ToolOutcome::err("memory store not available");
        };
        match memory.core_set(name, value) {
            Ok(()) => ToolOutcome::ok(format!("core block \"{name}\" updated")),
            Err(e) => ToolOutcome::err(format!("update failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use std::sync::Arc;

    fn memory_ctx() -> (tempfile::TempDir, ToolContext) {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::open(&dir.path().join("memory.db")).unwrap();
        let mut ctx = ToolContext::new();
        ctx.memory = Some(Arc::new(store));
        (dir, ctx)
    }

    #[test]
    fn store_then_search_round_trip() {
        let (_dir, ctx) = memory_ctx();
        let stored = MemoryStoreTool.execute(
            &json!({"content": "the deploy key lives in vault"}),
            &ctx,
        );
        assert!(stored.success, "{stored:?}");

        let found = MemorySearchTool.execute(&json!({"query": "deploy key"}), &ctx);
        assert!(found.success);
        assert!(found.output.unwrap().contains("vault"));
    }

    #[test]
    fn search_with_no_hits_reports_cleanly() {
        let (_dir, ctx) = memory_ctx();
        let found = MemorySearchTool.execute(&json!({"query": "nothing here"}), &ctx);
        assert!(found.success);
        assert_eq!(found.output.as_deref(), Some("no matching memories"));
    }

    #[test]
    fn core_update_writes_block() {
        let (_dir, ctx) = memory_ctx();
        let out = MemoryCoreUpdateTool.execute(
            &json!({"name": "persona", "value": "terse"}),
            &ctx,
        );
        assert!(out.success);
        let memory = ctx.memory.as_deref().unwrap();
        assert_eq!(memory.core_get("persona").unwrap().as_deref(), Some("terse"));
    }

    #[test]
    fn missing_store_is_an_outcome() {
        let out = MemoryStoreTool.execute(&json!({"content": "x"}), &ToolContext::new());
        assert!(!out.success);
        assert!(out.error.unwrap().contains("not available"));
    }
}
