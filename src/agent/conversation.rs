//! Conversation state: an ordered sequence of turns with an explicit
//! atomic-pair invariant.
//!
//! An assistant turn carrying a tool call and the tool observation that
//! answers it form an *atomic pair*: they are appended together and every
//! compaction boundary falls between pairs, never inside one.

use serde::{Deserialize, Serialize};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// Link from an assistant turn to the tool call it made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRef {
    pub tool: String,
    pub args_json: String,
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Present on assistant turns that called a tool (the pair head).
    pub tool_call: Option<ToolCallRef>,
    /// Marker such as `"compaction_summary"`.
    pub tag: Option<String>,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Turn {
        Turn {
            role: Role::System,
            content: content.into(),
            tool_call: None,
            tag: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Turn {
        Turn {
            role: Role::User,
            content: content.into(),
            tool_call: None,
            tag: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Turn {
        Turn {
            role: Role::Assistant,
            content: content.into(),
            tool_call: None,
            tag: None,
        }
    }

    pub fn assistant_tool_call(
        content: impl Into<String>,
        tool: impl Into<String>,
        args_json: impl Into<String>,
    ) -> Turn {
        Turn {
            role: Role::Assistant,
            content: content.into(),
            tool_call: Some(ToolCallRef {
                tool: tool.into(),
                args_json: args_json.into(),
            }),
            tag: None,
        }
    }

    pub fn tool_observation(content: impl Into<String>) -> Turn {
        Turn {
            role: Role::Tool,
            content: content.into(),
            tool_call: None,
            tag: None,
        }
    }

    /// Head of an atomic pair?
    pub fn is_pair_head(&self) -> bool {
        self.role == Role::Assistant && self.tool_call.is_some()
    }

    /// Render for prompt composition.
    pub fn render(&self) -> String {
        format!("{}: {}", self.role.as_str(), self.content)
    }
}

/// The ordered turn sequence.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Conversation {
        Conversation { turns: Vec::new() }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Append a standalone turn (system, user, or final assistant).
    ///
    /// Pair heads must go through [`Conversation::push_pair`]; pushing one
    /// here would let it sit without its observation.
    pub fn push(&mut self, turn: Turn) {
        debug_assert!(!turn.is_pair_head(), "pair heads go through push_pair");
        self.turns.push(turn);
    }

    /// Append an atomic pair: the tool-calling assistant turn and its
    /// observation, indivisible from here on.
    pub fn push_pair(&mut self, assistant: Turn, observation: Turn) {
        debug_assert!(assistant.is_pair_head());
        debug_assert_eq!(observation.role, Role::Tool);
        self.turns.push(assistant);
        self.turns.push(observation);
    }

    /// Verify the adjacency invariant: every pair head is immediately
    /// followed by its tool observation, and every tool turn follows a head.
    pub fn pairs_intact(&self) -> bool {
        for (i, turn) in self.turns.iter().enumerate() {
            if turn.is_pair_head()
                && self.turns.get(i + 1).map(|t| t.role) != Some(Role::Tool)
            {
                return false;
            }
            if turn.role == Role::Tool
                && !self.turns.get(i.wrapping_sub(1)).is_some_and(Turn::is_pair_head)
            {
                return false;
            }
        }
        true
    }

    /// Exchange boundaries: indices where a new user/assistant(+tool) group
    /// starts. A user turn always opens an exchange; an assistant turn opens
    /// one unless it directly answers the preceding user turn. Tool and
    /// system turns attach to the group in progress.
    pub fn exchange_starts(&self) -> Vec<usize> {
        let mut starts = Vec::new();
        for (i, turn) in self.turns.iter().enumerate() {
            let opens = match turn.role {
                Role::User => true,
                Role::Assistant => {
                    !matches!(self.turns.get(i.wrapping_sub(1)), Some(prev) if prev.role == Role::User)
                }
                Role::System | Role::Tool => false,
            };
            if opens {
                starts.push(i);
            }
        }
        starts
    }

    /// Render all turns for prompt composition.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for turn in &self.turns {
            out.push_str(&turn.render());
            out.push('\n');
        }
        out
    }

    /// Replace `turns[from..to]` with a single summary turn.
    ///
    /// `to` must be an exchange boundary so no atomic pair is split; the
    /// caller keeps the leading system turn by passing `from` past it.
    pub fn replace_with_summary(&mut self, from: usize, to: usize, summary: Turn) {
        debug_assert!(from <= to && to <= self.turns.len());
        debug_assert!(
            self.turns.get(to).is_none_or(|t| t.role != Role::Tool),
            "compaction boundary would split an atomic pair"
        );
        self.turns.splice(from..to, std::iter::once(summary));
        debug_assert!(self.pairs_intact());
    }

    /// The most recent assistant turn, for best-effort answers.
    pub fn last_assistant(&self) -> Option<&Turn> {
        self.turns.iter().rev().find(|t| t.role == Role::Assistant)
    }
}
