//! The ReAct agent controller.
//!
//! A strictly sequential state machine: compose prompt → sample a
//! grammar-constrained action → parse → dispatch → append the observation →
//! repeat until a final answer or the step budget runs out. Tool failures
//! become observations and never abort the run; engine and parse failures
//! are terminal.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::engine::{Engine, GenParams};
use crate::memory::{MemoryStore, Tier};
use crate::tools::{Caps, ToolContext, ToolRegistry};

use super::context::ContextAccountant;
use super::conversation::{Conversation, Turn};
use super::error::{AgentError, AgentResult};
use super::grammar::{Action, action_grammar, parse_action};

/// Controller state. Linear except for the EXECUTING → PROMPTING loop edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Init,
    Prompting,
    Sampling,
    Parsing,
    Executing,
    Final,
    Failed,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    /// The model emitted a final answer.
    Final,
    /// `max_steps` reached; the answer is best-effort.
    StepBudgetExhausted,
    /// Cancelled cooperatively after the in-flight tool call finished.
    Cancelled,
}

/// Result of an agent run.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub status: AgentStatus,
    pub answer: Option<String>,
    pub steps: usize,
    pub elapsed_ms: f64,
}

/// Data handed to the step callback after each cycle.
#[derive(Debug, Clone)]
pub struct StepEvent {
    /// Zero-based step index.
    pub step: usize,
    pub thought: String,
    /// The raw action JSON the model produced.
    pub action_json: String,
    /// Tool observation; `None` on the final step.
    pub observation: Option<String>,
}

/// Agent budgets and policy.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_steps: usize,
    pub max_tokens_per_step: usize,
    pub temperature: f32,
    /// Context window the accountant budgets against.
    pub context_capacity: usize,
    /// Compaction trigger as a fraction of capacity.
    pub compaction_threshold: f32,
    /// Exchanges kept verbatim through compaction.
    pub retention_window: usize,
    /// Observation truncation cap in bytes.
    pub observation_cap: usize,
    /// Capabilities granted to tools.
    pub granted_caps: Caps,
    /// Directory the file tools may write into.
    pub scratch_dir: Option<std::path::PathBuf>,
    pub tool_timeout: std::time::Duration,
    /// Depth limit for tools that re-enter the engine.
    pub max_engine_depth: u8,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 10,
            max_tokens_per_step: 256,
            temperature: 0.7,
            context_capacity: 2048,
            compaction_threshold: 0.85,
            retention_window: 6,
            observation_cap: 4096,
            granted_caps: Caps::FILESYSTEM.with(Caps::MEMORY),
            scratch_dir: None,
            tool_timeout: std::time::Duration::from_secs(30),
            max_engine_depth: 1,
        }
    }
}

/// The ReAct agent: one engine handle, one tool registry, one memory store.
pub struct Agent<'e> {
    engine: &'e mut dyn Engine,
    tools: ToolRegistry,
    memory: Arc<MemoryStore>,
    config: AgentConfig,
    conversation: Conversation,
    accountant: ContextAccountant,
    state: AgentState,
    steps: usize,
    cancel: Arc<AtomicBool>,
    depth: u8,
}

impl<'e> Agent<'e> {
    pub fn new(
        engine: &'e mut dyn Engine,
        tools: ToolRegistry,
        memory: Arc<MemoryStore>,
        config: AgentConfig,
    ) -> Agent<'e> {
        let accountant =
            ContextAccountant::new(config.context_capacity, config.compaction_threshold);
        Agent {
            engine,
            tools,
            memory,
            config,
            conversation: Conversation::new(),
            accountant,
            state: AgentState::Init,
            steps: 0,
            cancel: Arc::new(AtomicBool::new(false)),
            depth: 0,
        }
    }

    /// Handle for cooperative cancellation; set it from anywhere.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Current conversation token usage (excludes the per-step preamble).
    pub fn context_tokens(&mut self) -> usize {
        self.accountant
            .conversation_tokens(&self.conversation, &*self.engine)
    }

    /// Run the loop on a task until FINAL, budget exhaustion, cancellation,
    /// or a terminal error.
    pub fn run(
        &mut self,
        task: &str,
        mut on_step: Option<&mut dyn FnMut(&StepEvent)>,
    ) -> AgentResult<AgentOutcome> {
        self.run_at_depth(task, 0, &mut on_step)
    }

    /// Re-entrant entry point for tools that invoke the engine; `depth`
    /// counts nesting and is limited by config.
    pub(crate) fn run_at_depth(
        &mut self,
        task: &str,
        depth: u8,
        on_step: &mut Option<&mut dyn FnMut(&StepEvent)>,
    ) -> AgentResult<AgentOutcome> {
        if depth > self.config.max_engine_depth {
            return Err(AgentError::ReentrancyExceeded {
                limit: self.config.max_engine_depth,
            });
        }
        self.depth = depth;
        let started = Instant::now();

        self.state = AgentState::Init;
        self.conversation = Conversation::new();
        self.accountant.invalidate();
        self.steps = 0;
        self.conversation.push(Turn::user(task));
        self.memory.append(Tier::Recall, "user", task, None)?;

        tracing::info!(task, tools = self.tools.len(), "agent run starting");

        let grammar = action_grammar(&self.tools.grammar_names());
        let mut parse_retried = false;

        loop {
            if self.cancelled() {
                return Ok(self.finish(AgentStatus::Cancelled, None, started));
            }

            // ── PROMPTING ───────────────────────────────────────────────
            self.state = AgentState::Prompting;
            let preamble = self.compose_preamble()?;
            let preamble_tokens = self.engine.tokenize(&preamble);
            self.accountant.maybe_compact(
                &mut self.conversation,
                &mut *self.engine,
                &self.memory,
                self.config.retention_window,
                preamble_tokens,
            )?;
            let prompt = format!("{preamble}\n{}assistant: ", self.conversation.render());

            // ── SAMPLING ────────────────────────────────────────────────
            self.state = AgentState::Sampling;
            if self.cancelled() {
                return Ok(self.finish(AgentStatus::Cancelled, None, started));
            }
            let cancel = Arc::clone(&self.cancel);
            let mut keep_going = move |_chunk: &str| !cancel.load(Ordering::Relaxed);
            let mut params = GenParams::new(&prompt);
            params.max_tokens = self.config.max_tokens_per_step;
            params.temperature = self.config.temperature;
            params.grammar = Some(&grammar);
            params.on_token = Some(&mut keep_going);
            let generated = self.engine.generate(params)?;

            // ── PARSING ─────────────────────────────────────────────────
            self.state = AgentState::Parsing;
            let action = match parse_action(&generated.text) {
                Ok(action) => {
                    parse_retried = false;
                    action
                }
                Err(message) if !parse_retried => {
                    tracing::warn!(error = %message, "malformed action, retrying once");
                    parse_retried = true;
                    self.conversation.push(Turn::system(format!(
                        "Your last reply was rejected ({message}). Respond with exactly one \
                         JSON object of the documented tool/final shape and nothing else."
                    )));
                    continue;
                }
                Err(message) => {
                    self.state = AgentState::Failed;
                    return Err(AgentError::Parse { message });
                }
            };

            // ── DISPATCH ────────────────────────────────────────────────
            match action {
                Action::Final { answer, thought } => {
                    self.state = AgentState::Final;
                    self.conversation.push(Turn::assistant(generated.text.clone()));
                    self.memory
                        .append(Tier::Recall, "assistant", &generated.text, None)?;
                    emit(
                        on_step,
                        &StepEvent {
                            step: self.steps,
                            thought,
                            action_json: generated.text,
                            observation: None,
                        },
                    );
                    self.steps += 1;
                    return Ok(self.finish(AgentStatus::Final, Some(answer), started));
                }
                Action::Tool {
                    tool,
                    args,
                    thought,
                } => {
                    self.state = AgentState::Executing;
                    let args_json = args.to_string();
                    let ctx = ToolContext {
                        memory: Some(Arc::clone(&self.memory)),
                        scratch_dir: self.config.scratch_dir.clone(),
                        tool_timeout: self.config.tool_timeout,
                    };
                    let outcome =
                        self.tools
                            .execute(&tool, &args_json, self.config.granted_caps, &ctx);
                    let mut observation = if self.tools.get(&tool).is_none() {
                        format!("unknown tool: {tool}")
                    } else {
                        outcome.observation().to_string()
                    };
                    truncate_observation(&mut observation, self.config.observation_cap);

                    // ── APPEND (atomic pair) ────────────────────────────
                    self.conversation.push_pair(
                        Turn::assistant_tool_call(generated.text.clone(), &tool, &args_json),
                        Turn::tool_observation(observation.clone()),
                    );
                    self.memory
                        .append(Tier::Recall, "assistant", &generated.text, None)?;
                    self.memory
                        .append(Tier::Recall, "tool", &observation, None)?;

                    emit(
                        on_step,
                        &StepEvent {
                            step: self.steps,
                            thought,
                            action_json: generated.text,
                            observation: Some(observation),
                        },
                    );
                    self.steps += 1;
                }
            }

            // ── TERMINATE? ──────────────────────────────────────────────
            if self.cancelled() {
                return Ok(self.finish(AgentStatus::Cancelled, None, started));
            }
            if self.steps >= self.config.max_steps {
                self.state = AgentState::Failed;
                let best_effort = self
                    .conversation
                    .last_assistant()
                    .map(|t| t.content.clone());
                return Ok(self.finish(AgentStatus::StepBudgetExhausted, best_effort, started));
            }
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn finish(
        &mut self,
        status: AgentStatus,
        answer: Option<String>,
        started: Instant,
    ) -> AgentOutcome {
        if status != AgentStatus::Final {
            self.state = AgentState::Failed;
        }
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        tracing::info!(?status, steps = self.steps, elapsed_ms, "agent run finished");
        AgentOutcome {
            status,
            answer,
            steps: self.steps,
            elapsed_ms,
        }
    }

    /// System preamble: instructions, tool descriptions, and Core memory.
    fn compose_preamble(&self) -> AgentResult<String> {
        let mut out = String::from(
            "You are NeuronOS, a tool-using assistant. At every step reply with \
             exactly one JSON object, nothing else.\n\
             To call a tool: {\"action\": \"tool\", \"tool\": NAME, \"args\": {...}, \"thought\": \"...\"}\n\
             To finish:      {\"action\": \"final\", \"answer\": \"...\", \"thought\": \"...\"}\n\n",
        );
        out.push_str(&self.tools.prompt_description());
        let blocks = self.memory.core_blocks()?;
        if !blocks.is_empty() {
            out.push_str("\nCore memory:\n");
            for (name, text) in blocks {
                out.push_str(&format!("[{name}]\n{text}\n"));
            }
        }
        Ok(out)
    }
}

fn emit(on_step: &mut Option<&mut dyn FnMut(&StepEvent)>, event: &StepEvent) {
    if let Some(cb) = on_step.as_mut() {
        cb(event);
    }
}

/// Truncate an observation at a char boundary, marking the cut.
fn truncate_observation(text: &mut String, cap: usize) {
    if text.len() <= cap {
        return;
    }
    let mut cut = cap;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str("... [truncated]");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ScriptedEngine;

    fn memory() -> (tempfile::TempDir, Arc<MemoryStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::open(&dir.path().join("memory.db")).unwrap();
        (dir, Arc::new(store))
    }

    fn registry() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools
            .register_defaults(Caps::MEMORY) // calculate + memory tools
            .unwrap();
        tools
    }

    #[test]
    fn two_step_calculation_run() {
        let (_dir, store) = memory();
        let mut engine = ScriptedEngine::with_script(
            2048,
            [
                r#"{"action": "tool", "tool": "calculate", "args": {"expression": "2+2"}, "thought": "arithmetic"}"#,
                r#"{"action": "final", "answer": "4", "thought": "done"}"#,
            ],
        );
        let mut agent = Agent::new(
            &mut engine,
            registry(),
            Arc::clone(&store),
            AgentConfig::default(),
        );

        let mut events = Vec::new();
        let mut cb = |e: &StepEvent| events.push(e.clone());
        let outcome = agent.run("What's 2+2?", Some(&mut cb)).unwrap();

        assert_eq!(outcome.status, AgentStatus::Final);
        assert_eq!(outcome.answer.as_deref(), Some("4"));
        assert_eq!(outcome.steps, 2);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].thought, "arithmetic");
        assert_eq!(events[0].observation.as_deref(), Some("4"));
        assert!(events[1].observation.is_none());

        // Both turns landed in Recall.
        assert!(store.search(Tier::Recall, "calculate expression", 5).unwrap().len() >= 1);
        assert!(agent.conversation().pairs_intact());
    }

    #[test]
    fn unknown_tool_becomes_observation_and_loop_continues() {
        let (_dir, store) = memory();
        let mut engine = ScriptedEngine::with_script(
            2048,
            [
                r#"{"action": "tool", "tool": "teleport", "args": {}, "thought": "try it"}"#,
                r#"{"action": "final", "answer": "no teleporter here", "thought": "recovered"}"#,
            ],
        );
        let mut agent = Agent::new(&mut engine, registry(), store, AgentConfig::default());
        let outcome = agent.run("teleport me", None).unwrap();
        assert_eq!(outcome.status, AgentStatus::Final);
        assert_eq!(outcome.steps, 2);
        let obs = &agent.conversation().turns()[2];
        assert!(obs.content.contains("Tool not found") || obs.content.contains("unknown tool"));
    }

    #[test]
    fn permission_denied_is_an_observation() {
        let (_dir, store) = memory();
        let mut engine = ScriptedEngine::with_script(
            2048,
            [
                r#"{"action": "tool", "tool": "shell", "args": {"command": "id"}, "thought": "poke"}"#,
                r#"{"action": "final", "answer": "denied", "thought": "ok"}"#,
            ],
        );
        let mut tools = ToolRegistry::new();
        // Register shell but grant it nothing at run time.
        tools
            .register(Box::new(crate::tools::shell::ShellTool))
            .unwrap();
        let config = AgentConfig {
            granted_caps: Caps::NONE,
            ..AgentConfig::default()
        };
        let mut agent = Agent::new(&mut engine, tools, store, config);
        let outcome = agent.run("run id", None).unwrap();
        assert_eq!(outcome.status, AgentStatus::Final);
        assert!(
            agent.conversation().turns()[2]
                .content
                .contains("permission denied")
        );
    }

    #[test]
    fn malformed_output_retries_once_then_fails() {
        let (_dir, store) = memory();
        let mut engine = ScriptedEngine::with_script(2048, ["garbage one", "garbage two"]);
        let mut agent = Agent::new(&mut engine, registry(), store, AgentConfig::default());
        let err = agent.run("do something", None).unwrap_err();
        assert!(matches!(err, AgentError::Parse { .. }));
    }

    #[test]
    fn malformed_then_valid_recovers() {
        let (_dir, store) = memory();
        let mut engine = ScriptedEngine::with_script(
            2048,
            [
                "garbage",
                r#"{"action": "final", "answer": "recovered", "thought": ""}"#,
            ],
        );
        let mut agent = Agent::new(&mut engine, registry(), store, AgentConfig::default());
        let outcome = agent.run("do something", None).unwrap();
        assert_eq!(outcome.answer.as_deref(), Some("recovered"));
    }

    #[test]
    fn step_budget_exhaustion_returns_best_effort() {
        let (_dir, store) = memory();
        let loop_action =
            r#"{"action": "tool", "tool": "calculate", "args": {"expression": "1+1"}, "thought": "again"}"#;
        let mut engine =
            ScriptedEngine::with_script(2048, std::iter::repeat_n(loop_action, 5));
        let config = AgentConfig {
            max_steps: 3,
            ..AgentConfig::default()
        };
        let mut agent = Agent::new(&mut engine, registry(), store, config);
        let outcome = agent.run("loop forever", None).unwrap();
        assert_eq!(outcome.status, AgentStatus::StepBudgetExhausted);
        assert_eq!(outcome.steps, 3);
        assert!(outcome.answer.is_some());
    }

    #[test]
    fn budget_safety_holds_after_every_step() {
        let (_dir, store) = memory();
        let loop_action =
            r#"{"action": "tool", "tool": "calculate", "args": {"expression": "2^8"}, "thought": "more work to fill the window"}"#;
        // Extra responses cover the summarization calls compaction makes.
        let mut engine =
            ScriptedEngine::with_script(2048, std::iter::repeat_n(loop_action, 20));
        // Small window forces compaction mid-run.
        let config = AgentConfig {
            max_steps: 12,
            context_capacity: 640,
            retention_window: 2,
            ..AgentConfig::default()
        };
        let mut agent = Agent::new(&mut engine, registry(), store, config);
        let outcome = agent.run("keep calculating", None).unwrap();
        assert_eq!(outcome.status, AgentStatus::StepBudgetExhausted);
        let used = agent.context_tokens();
        assert!(
            used <= 640,
            "conversation tokens {used} exceed context capacity"
        );
        assert!(agent.conversation().pairs_intact());
    }

    #[test]
    fn cancellation_stops_before_next_step() {
        let (_dir, store) = memory();
        let loop_action =
            r#"{"action": "tool", "tool": "calculate", "args": {"expression": "1+1"}, "thought": "x"}"#;
        let mut engine =
            ScriptedEngine::with_script(2048, std::iter::repeat_n(loop_action, 5));
        let mut agent = Agent::new(&mut engine, registry(), store, AgentConfig::default());
        let cancel = agent.cancel_handle();

        let mut cb = move |_: &StepEvent| cancel.store(true, Ordering::Relaxed);
        let outcome = agent.run("work", Some(&mut cb)).unwrap();
        // The in-flight step completes, then the flag is honored.
        assert_eq!(outcome.status, AgentStatus::Cancelled);
        assert_eq!(outcome.steps, 1);
    }

    #[test]
    fn reentrancy_depth_is_limited() {
        let (_dir, store) = memory();
        let mut engine = ScriptedEngine::new(2048);
        let mut agent = Agent::new(&mut engine, registry(), store, AgentConfig::default());
        let err = agent.run_at_depth("nested", 2, &mut None).unwrap_err();
        assert!(matches!(err, AgentError::ReentrancyExceeded { limit: 1 }));
    }
}
