//! Tool system: capability-gated tools with runtime registration.
//!
//! Tools are the agent's interface to the outside world. Each tool implements
//! the [`Tool`] trait and is registered in a [`ToolRegistry`], which derives
//! two artifacts from the registration order: the GBNF `tool-name` fragment
//! constraining the model's tool-call JSON, and the prompt description block.
//!
//! Execution failures never escape as errors — they become
//! [`ToolOutcome`]s that the agent absorbs as observations.

pub mod calculate;
pub mod file_io;
pub mod memory_tools;
pub mod shell;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::ToolError;
use crate::memory::MemoryStore;

/// Maximum registered tools.
pub const MAX_TOOLS: usize = 64;

/// Capability bitset gating tool execution.
///
/// The agent holds one granted mask; a tool runs only if every bit in its
/// required mask is granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Caps(pub u32);

impl Caps {
    pub const NONE: Caps = Caps(0);
    pub const FILESYSTEM: Caps = Caps(1 << 0);
    pub const SHELL: Caps = Caps(1 << 1);
    pub const NETWORK: Caps = Caps(1 << 2);
    pub const MEMORY: Caps = Caps(1 << 3);

    /// Whether every capability in `required` is granted in `self`.
    pub fn grants(self, required: Caps) -> bool {
        self.0 & required.0 == required.0
    }

    pub fn with(self, other: Caps) -> Caps {
        Caps(self.0 | other.0)
    }
}

/// Description of a tool's interface.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Unique name; also the string the grammar lets the model emit.
    pub name: String,
    /// What this tool does, shown in the system prompt.
    pub description: String,
    /// JSON schema for the arguments object.
    pub args_schema: Value,
    /// Capabilities required to execute.
    pub required_caps: Caps,
}

/// Result of a tool execution. Owned by the caller after return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(output: impl Into<String>) -> ToolOutcome {
        ToolOutcome {
            success: true,
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> ToolOutcome {
        ToolOutcome {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }

    /// The text the agent records as its observation.
    pub fn observation(&self) -> &str {
        if self.success {
            self.output.as_deref().unwrap_or("")
        } else {
            self.error.as_deref().unwrap_or("tool failed")
        }
    }
}

/// Shared state handed to every tool execution.
#[derive(Clone, Default)]
pub struct ToolContext {
    /// Memory store for the `memory_*` tools.
    pub memory: Option<Arc<MemoryStore>>,
    /// The only directory `write_file` may write into.
    pub scratch_dir: Option<PathBuf>,
    /// Budget for blocking tools (`shell`).
    pub tool_timeout: Duration,
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("memory", &self.memory.is_some())
            .field("scratch_dir", &self.scratch_dir)
            .field("tool_timeout", &self.tool_timeout)
            .finish()
    }
}

impl ToolContext {
    pub fn new() -> ToolContext {
        ToolContext {
            memory: None,
            scratch_dir: None,
            tool_timeout: Duration::from_secs(30),
        }
    }
}

/// A tool the agent can execute.
///
/// Arguments arrive pre-parsed: the registry runs the single shared JSON
/// parser, so implementations only read typed fields.
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;
    fn execute(&self, args: &Value, ctx: &ToolContext) -> ToolOutcome;
}

/// Pull a required string argument, with a uniform error message.
pub(crate) fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing or non-string '{key}' argument"))
}

/// Registry of available tools.
///
/// Iteration order is registration order, which keeps the derived grammar
/// deterministic; lookup is via a name index.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
    specs: Vec<ToolSpec>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> ToolRegistry {
        ToolRegistry {
            tools: Vec::new(),
            specs: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Register a tool. Fails on duplicate name or capacity overflow,
    /// leaving the registry unchanged.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> Result<(), ToolError> {
        let spec = tool.spec();
        if self.by_name.contains_key(&spec.name) {
            return Err(ToolError::Duplicate { name: spec.name });
        }
        if self.tools.len() >= MAX_TOOLS {
            return Err(ToolError::CapacityExceeded {
                capacity: MAX_TOOLS,
            });
        }
        self.by_name.insert(spec.name.clone(), self.tools.len());
        self.specs.push(spec);
        self.tools.push(tool);
        Ok(())
    }

    /// Register the built-in tool set allowed by `granted`. Tools whose
    /// required capabilities are not granted are simply not registered,
    /// keeping them out of the grammar entirely.
    pub fn register_defaults(&mut self, granted: Caps) -> Result<usize, ToolError> {
        let mut registered = 0;
        let builtins: Vec<Box<dyn Tool>> = vec![
            Box::new(shell::ShellTool),
            Box::new(file_io::ReadFileTool),
            Box::new(file_io::WriteFileTool),
            Box::new(calculate::CalculateTool),
            Box::new(memory_tools::MemoryStoreTool),
            Box::new(memory_tools::MemorySearchTool),
            Box::new(memory_tools::MemoryCoreUpdateTool),
        ];
        for tool in builtins {
            if granted.grants(tool.spec().required_caps) {
                self.register(tool)?;
                registered += 1;
            }
        }
        Ok(registered)
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.by_name.get(name).map(|&i| self.tools[i].as_ref())
    }

    /// Registered specs in registration order.
    pub fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool by name against a raw argument string.
    ///
    /// All failure modes fold into the returned outcome: unknown name,
    /// malformed JSON, missing capability, or the tool's own error.
    pub fn execute(
        &self,
        name: &str,
        args_json: &str,
        granted: Caps,
        ctx: &ToolContext,
    ) -> ToolOutcome {
        let Some(&idx) = self.by_name.get(name) else {
            return ToolOutcome::err("Tool not found");
        };
        let spec = &self.specs[idx];
        if !granted.grants(spec.required_caps) {
            tracing::warn!(tool = name, "tool call denied: missing capability");
            return ToolOutcome::err("permission denied");
        }
        let args: Value = match serde_json::from_str(args_json) {
            Ok(v) => v,
            Err(e) => return ToolOutcome::err(format!("invalid arguments JSON: {e}")),
        };
        tracing::debug!(tool = name, "executing tool");
        self.tools[idx].execute(&args, ctx)
    }

    /// GBNF `tool-name` rule constraining the model's tool-call JSON,
    /// alternatives in registration order.
    pub fn grammar_names(&self) -> String {
        if self.specs.is_empty() {
            return r#"tool-name ::= "\"noop\"""#.to_string();
        }
        let alts: Vec<String> = self
            .specs
            .iter()
            .map(|s| format!("\"\\\"{}\\\"\"", s.name))
            .collect();
        format!("tool-name ::= {}", alts.join(" | "))
    }

    /// Tool listing injected into the system prompt.
    pub fn prompt_description(&self) -> String {
        if self.specs.is_empty() {
            return "No tools available.\n".to_string();
        }
        let mut out = String::from("Available tools:\n");
        for spec in &self.specs {
            out.push_str(&format!(
                "- {}: {} Args schema: {}\n",
                spec.name, spec.description, spec.args_schema
            ));
        }
        out
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.by_name.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct DummyTool {
        name: &'static str,
        caps: Caps,
    }

    impl Tool for DummyTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: self.name.into(),
                description: "A test tool.".into(),
                args_schema: json!({"type": "object"}),
                required_caps: self.caps,
            }
        }
        fn execute(&self, args: &Value, _ctx: &ToolContext) -> ToolOutcome {
            ToolOutcome::ok(format!("ran with {args}"))
        }
    }

    fn dummy(name: &'static str) -> Box<dyn Tool> {
        Box::new(DummyTool {
            name,
            caps: Caps::NONE,
        })
    }

    #[test]
    fn duplicate_registration_leaves_registry_unchanged() {
        let mut reg = ToolRegistry::new();
        reg.register(dummy("echo")).unwrap();
        let err = reg.register(dummy("echo")).unwrap_err();
        assert!(matches!(err, ToolError::Duplicate { .. }));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn unknown_tool_becomes_an_outcome() {
        let reg = ToolRegistry::new();
        let out = reg.execute("ghost", "{}", Caps::NONE, &ToolContext::new());
        assert!(!out.success);
        assert_eq!(out.error.as_deref(), Some("Tool not found"));
    }

    #[test]
    fn capability_gate_is_exact() {
        let mut reg = ToolRegistry::new();
        reg.register(Box::new(DummyTool {
            name: "guarded",
            caps: Caps::SHELL.with(Caps::FILESYSTEM),
        }))
        .unwrap();

        let ctx = ToolContext::new();
        let denied = reg.execute("guarded", "{}", Caps::SHELL, &ctx);
        assert_eq!(denied.error.as_deref(), Some("permission denied"));

        let granted = reg.execute("guarded", "{}", Caps::SHELL.with(Caps::FILESYSTEM), &ctx);
        assert!(granted.success);
    }

    #[test]
    fn malformed_json_is_absorbed() {
        let mut reg = ToolRegistry::new();
        reg.register(dummy("echo")).unwrap();
        let out = reg.execute("echo", "{not json", Caps::NONE, &ToolContext::new());
        assert!(!out.success);
        assert!(out.error.unwrap().contains("invalid arguments JSON"));
    }

    #[test]
    fn grammar_fragment_preserves_registration_order() {
        let mut reg = ToolRegistry::new();
        reg.register(dummy("shell")).unwrap();
        reg.register(dummy("read_file")).unwrap();
        assert_eq!(
            reg.grammar_names(),
            r#"tool-name ::= "\"shell\"" | "\"read_file\"""#
        );
    }

    #[test]
    fn empty_registry_gets_noop_grammar() {
        let reg = ToolRegistry::new();
        assert_eq!(reg.grammar_names(), r#"tool-name ::= "\"noop\"""#);
        assert_eq!(reg.prompt_description(), "No tools available.\n");
    }

    #[test]
    fn prompt_description_lists_schema() {
        let mut reg = ToolRegistry::new();
        reg.register(dummy("echo")).unwrap();
        let desc = reg.prompt_description();
        assert!(desc.starts_with("Available tools:\n"));
        assert!(desc.contains("- echo: A test tool. Args schema: {\"type\":\"object\"}"));
    }

    #[test]
    fn register_defaults_respects_granted_caps() {
        let mut reg = ToolRegistry::new();
        // Only capability-free tools land without any grants.
        reg.register_defaults(Caps::NONE).unwrap();
        assert!(reg.get("calculate").is_some());
        assert!(reg.get("shell").is_none());
        assert!(reg.get("read_file").is_none());

        let mut full = ToolRegistry::new();
        full.register_defaults(
            Caps::FILESYSTEM
                .with(Caps::SHELL)
                .with(Caps::MEMORY),
        )
        .unwrap();
        for name in [
            "shell",
            "read_file",
            "write_file",
            "calculate",
            "memory_store",
            "memory_search",
            "memory_core_update",
        ] {
            assert!(full.get(name).is_some(), "missing builtin {name}");
        }
    }
}
