//! Context accounting and compaction.
//!
//! The accountant tracks token usage incrementally: each turn is tokenized
//! once and cached until its text changes, so the per-step cost stays
//! proportional to new turns rather than the whole conversation. When usage
//! crosses the threshold, everything older than the retention window is
//! summarized through the engine and replaced by a single system turn —
//! after each removed turn has been written to Recall, so nothing becomes
//! unreachable.

use crate::engine::{Engine, GenParams};
use crate::memory::{MemoryStore, Tier};

use super::conversation::{Conversation, Role, Turn};
use super::error::AgentResult;

/// Tag carried by the summary turn and its Recall record.
pub const COMPACTION_TAG: &str = "compaction_summary";

/// Sampling temperature for summarization (factual, low-variance).
const SUMMARY_TEMPERATURE: f32 = 0.2;

/// Token budget for the generated summary.
const SUMMARY_MAX_TOKENS: usize = 256;

/// Incremental token accounting against a fixed context capacity.
#[derive(Debug)]
pub struct ContextAccountant {
    capacity: usize,
    /// Compaction trigger as a fraction of capacity.
    threshold: f32,
    /// Per-turn cache of `(content_len, tokens)`, parallel to the turns.
    cache: Vec<(usize, usize)>,
}

impl ContextAccountant {
    pub fn new(capacity: usize, threshold: f32) -> ContextAccountant {
        ContextAccountant {
            capacity,
            threshold,
            cache: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tokens used by the conversation, tokenizing only changed turns.
    pub fn conversation_tokens(&mut self, conv: &Conversation, engine: &dyn Engine) -> usize {
        let turns = conv.turns();
        self.cache.truncate(turns.len());
        for (i, turn) in turns.iter().enumerate() {
            let len = turn.content.len();
            match self.cache.get(i) {
                Some(&(cached_len, _)) if cached_len == len => {}
                _ => {
                    let tokens = engine.tokenize(&turn.render());
                    if i < self.cache.len() {
                        self.cache[i] = (len, tokens);
                    } else {
                        self.cache.push((len, tokens));
                    }
                }
            }
        }
        self.cache.iter().map(|&(_, t)| t).sum()
    }

    /// Would `used` tokens trigger compaction?
    pub fn over_threshold(&self, used: usize) -> bool {
        used as f32 > self.threshold * self.capacity as f32
    }

    /// Drop the cache (after compaction rewrites the turn list).
    pub fn invalidate(&mut self) {
        self.cache.clear();
    }

    /// Compact if the composed prompt is over threshold. Returns whether a
    /// compaction ran; below the threshold this is a no-op.
    pub fn maybe_compact(
        &mut self,
        conv: &mut Conversation,
        engine: &mut dyn Engine,
        memory: &MemoryStore,
        retention_window: usize,
        preamble_tokens: usize,
    ) -> AgentResult<bool> {
        let used = preamble_tokens + self.conversation_tokens(conv, &*engine);
        if !self.over_threshold(used) {
            return Ok(false);
        }
        tracing::info!(
            used,
            capacity = self.capacity,
            "context over threshold, compacting"
        );
        let ran = compact(conv, engine, memory, retention_window)?;
        if ran {
            self.invalidate();
        }
        Ok(ran)
    }
}

/// Summarize everything older than the last `retention_window` exchanges
/// into one tagged system turn.
///
/// Invariants: the first system turn is never summarized; atomic pairs are
/// kept or discarded whole (the boundary is always an exchange start); every
/// removed turn is appended to Recall before it is discarded.
pub fn compact(
    conv: &mut Conversation,
    engine: &mut dyn Engine,
    memory: &MemoryStore,
    retention_window: usize,
) -> AgentResult<bool> {
    let starts = conv.exchange_starts();
    if starts.len() <= retention_window {
        return Ok(false);
    }
    let boundary = starts[starts.len() - retention_window];
    let from = usize::from(
        conv.turns()
            .first()
            .is_some_and(|t| t.role == Role::System),
    );
    if boundary <= from {
        return Ok(false);
    }

    let removed: Vec<Turn> = conv.turns()[from..boundary].to_vec();

    // Write-before-compact: discarded turns stay retrievable via search.
    for turn in &removed {
        memory.append(
            Tier::Recall,
            turn.role.as_str(),
            &turn.content,
            turn.tag.as_deref(),
        )?;
    }

    let mut transcript = String::new();
    for turn in &removed {
        transcript.push_str(&turn.render());
        transcript.push('\n');
    }
    let prompt = format!(
        "Summarize the following conversation history in one short paragraph. \
         Preserve concrete facts, decisions, tool results, and open items.\n\n{transcript}\nSummary:"
    );

    let mut params = GenParams::new(&prompt);
    params.temperature = SUMMARY_TEMPERATURE;
    params.max_tokens = SUMMARY_MAX_TOKENS;
    let outcome = engine.generate(params)?;
    let summary_text = format!("Summary of earlier conversation: {}", outcome.text.trim());

    // Index the summary in Recall alongside the raw turns.
    memory.append(Tier::Recall, "system", &summary_text, Some(COMPACTION_TAG))?;

    let mut summary = Turn::system(summary_text);
    summary.tag = Some(COMPACTION_TAG.into());
    let removed_count = boundary - from;
    conv.replace_with_summary(from, boundary, summary);

    tracing::debug!(removed = removed_count, "conversation compacted");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ScriptedEngine;
    use std::sync::Arc;

    fn store() -> (tempfile::TempDir, Arc<MemoryStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::open(&dir.path().join("memory.db")).unwrap();
        (dir, Arc::new(store))
    }

    fn conversation_with_pairs(pairs: usize) -> Conversation {
        let mut conv = Conversation::new();
        conv.push(Turn::system("You are the test agent."));
        conv.push(Turn::user("please do many things"));
        for n in 0..pairs {
            conv.push_pair(
                Turn::assistant_tool_call(
                    format!("calling tool for subtask {n}"),
                    "shell",
                    "{}",
                ),
                Turn::tool_observation(format!("observation text for subtask {n}")),
            );
        }
        conv
    }

    #[test]
    fn accountant_caches_per_turn() {
        let engine = ScriptedEngine::new(2048);
        let mut acc = ContextAccountant::new(2048, 0.85);
        let mut conv = conversation_with_pairs(2);
        let first = acc.conversation_tokens(&conv, &engine);
        assert!(first > 0);
        // Unchanged conversation: same count.
        assert_eq!(acc.conversation_tokens(&conv, &engine), first);
        // Appending grows the count.
        conv.push(Turn::assistant("done"));
        assert!(acc.conversation_tokens(&conv, &engine) > first);
    }

    #[test]
    fn below_threshold_is_a_noop() {
        let (_dir, memory) = store();
        let mut engine = ScriptedEngine::new(100_000);
        let mut acc = ContextAccountant::new(100_000, 0.85);
        let mut conv = conversation_with_pairs(3);
        let before = conv.len();
        let ran = acc
            .maybe_compact(&mut conv, &mut engine, &memory, 2, 0)
            .unwrap();
        assert!(!ran);
        assert_eq!(conv.len(), before);
    }

    #[test]
    fn compaction_preserves_retention_window_and_recall() {
        let (_dir, memory) = store();
        let mut engine =
            ScriptedEngine::with_script(2048, ["agent ran several subtasks successfully"]);
        let mut conv = conversation_with_pairs(5);

        let ran = compact(&mut conv, &mut engine, &memory, 2).unwrap();
        assert!(ran);
        assert!(conv.pairs_intact());

        // First system turn survives verbatim; summary sits right after it.
        assert_eq!(conv.turns()[0].content, "You are the test agent.");
        assert_eq!(conv.turns()[1].tag.as_deref(), Some(COMPACTION_TAG));
        // Retention window: last 2 exchanges = 2 pairs = 4 turns.
        assert_eq!(conv.len(), 2 + 4);
        assert!(conv.turns()[2].content.contains("subtask 3"));

        // Discarded turns are retrievable through the Recall index.
        let hits = memory
            .search(Tier::Recall, "observation subtask", 10)
            .unwrap();
        assert!(!hits.is_empty());
        // And the summary itself is indexed.
        let summaries = memory.search(Tier::Recall, "subtasks successfully", 5).unwrap();
        assert!(summaries.iter().any(|r| r.tag.as_deref() == Some(COMPACTION_TAG)));
    }

    #[test]
    fn compaction_drops_usage_below_threshold() {
        let (_dir, memory) = store();
        // Small capacity so the 10-turn conversation crosses 85%.
        let mut engine = ScriptedEngine::with_script(2048, ["short summary"]);
        let mut acc = ContextAccountant::new(100, 0.85);
        let mut conv = conversation_with_pairs(4);

        let used = acc.conversation_tokens(&conv, &engine);
        assert!(acc.over_threshold(used), "test premise: {used} tokens");

        let ran = acc
            .maybe_compact(&mut conv, &mut engine, &memory, 2, 0)
            .unwrap();
        assert!(ran);
        let after = acc.conversation_tokens(&conv, &engine);
        assert!(
            !acc.over_threshold(after),
            "usage {after} still over threshold"
        );

        // Running again below threshold changes nothing (idempotent).
        let before = conv.len();
        assert!(
            !acc.maybe_compact(&mut conv, &mut engine, &memory, 2, 0)
                .unwrap()
        );
        assert_eq!(conv.len(), before);
    }
}
