//! GBNF grammar and decoding for the agent's action JSON.
//!
//! The model must emit exactly one of two shapes:
//!
//! ```json
//! {"action": "tool", "tool": NAME, "args": {...}, "thought": "..."}
//! {"action": "final", "answer": "...", "thought": "..."}
//! ```
//!
//! The grammar embeds the registry's `tool-name` rule so only registered
//! tool names can be sampled.

use serde::Deserialize;
use serde_json::Value;

/// A decoded agent action.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Action {
    /// Intermediate step: call a tool.
    Tool {
        tool: String,
        #[serde(default)]
        args: Value,
        #[serde(default)]
        thought: String,
    },
    /// Terminal step: answer the task.
    Final {
        answer: String,
        #[serde(default)]
        thought: String,
    },
}

impl Action {
    pub fn thought(&self) -> &str {
        match self {
            Action::Tool { thought, .. } | Action::Final { thought, .. } => thought,
        }
    }
}

/// Decode an action from model output. The error string feeds the stricter
/// retry reminder, so it names what was wrong.
pub fn parse_action(text: &str) -> Result<Action, String> {
    let trimmed = text.trim();
    serde_json::from_str(trimmed).map_err(|e| format!("malformed action JSON: {e}"))
}

/// Build the full GBNF action grammar around a `tool-name` rule
/// (see `ToolRegistry::grammar_names`).
pub fn action_grammar(tool_name_rule: &str) -> String {
    format!(
        r#"root ::= tool-action | final-action
tool-action ::= "{{" ws "\"action\"" ws ":" ws "\"tool\"" ws "," ws "\"tool\"" ws ":" ws tool-name ws "," ws "\"args\"" ws ":" ws object ws "," ws "\"thought\"" ws ":" ws string ws "}}"
final-action ::= "{{" ws "\"action\"" ws ":" ws "\"final\"" ws "," ws "\"answer\"" ws ":" ws string ws "," ws "\"thought\"" ws ":" ws string ws "}}"
object ::= "{{" ws ( member ( ws "," ws member )* )? ws "}}"
member ::= string ws ":" ws value
value ::= string | number | object | array | "true" | "false" | "null"
array ::= "[" ws ( value ( ws "," ws value )* )? ws "]"
string ::= "\"" ( [^"\\] | "\\" . )* "\""
number ::= "-"? [0-9]+ ( "." [0-9]+ )?
ws ::= [ \t\n]*
{tool_name_rule}
"#
    )
}
