//! Three-tier memory: Core / Recall / Archival in one embedded redb store.
//!
//! - **Core**: a bounded set of named blocks, reflected verbatim at the head
//!   of every prompt
//! - **Recall**: append-only log of past turns and summaries, text-indexed
//! - **Archival**: long-term fact store, written only through the
//!   `memory_store` tool, text-indexed
//!
//! All tiers share one database file (`memory.db`). Every append commits
//! before returning; failed writes are retried once.

pub mod index;

use std::collections::HashMap;
use std::path::Path;

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;

/// Maximum named Core blocks.
pub const CORE_MAX_BLOCKS: usize = 8;

/// Maximum bytes per Core block.
pub const CORE_BLOCK_LIMIT: usize = 2048;

const CORE_TABLE: TableDefinition<&str, &str> = TableDefinition::new("core");
const RECALL_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("recall");
const ARCHIVAL_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("archival");
const FTS_RECALL_TABLE: TableDefinition<(&str, u64), u32> = TableDefinition::new("fts_recall");
const FTS_ARCHIVAL_TABLE: TableDefinition<(&str, u64), u32> = TableDefinition::new("fts_archival");
const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// The two indexed tiers. Core is not a log and has no index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Recall,
    Archival,
}

impl Tier {
    fn record_table(self) -> TableDefinition<'static, u64, &'static [u8]> {
        match self {
            Tier::Recall => RECALL_TABLE,
            Tier::Archival => ARCHIVAL_TABLE,
        }
    }

    fn fts_table(self) -> TableDefinition<'static, (&'static str, u64), u32> {
        match self {
            Tier::Recall => FTS_RECALL_TABLE,
            Tier::Archival => FTS_ARCHIVAL_TABLE,
        }
    }

    fn seq_key(self) -> &'static str {
        match self {
            Tier::Recall => "recall_next_seq",
            Tier::Archival => "archival_next_seq",
        }
    }
}

/// One record in an indexed tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryRecord {
    pub seq: u64,
    /// Seconds since the UNIX epoch.
    pub timestamp: u64,
    /// Originating role ("user", "assistant", "tool", "system").
    pub role: String,
    pub text: String,
    /// Optional marker, e.g. `"compaction_summary"`.
    pub tag: Option<String>,
}

/// The embedded store for all three memory tiers.
///
/// Shareable across agents in one process; redb serializes writers
/// internally, so methods take `&self`.
pub struct MemoryStore {
    db: Database,
}

impl MemoryStore {
    /// Open or create the store at the given path.
    pub fn open(path: &Path) -> Result<MemoryStore, MemoryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MemoryError::Io { source: e })?;
        }
        let db = Database::create(path).map_err(|e| MemoryError::Redb {
            message: format!("failed to open store at {}: {e}", path.display()),
        })?;
        let store = MemoryStore { db };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Create every table so first reads don't race first writes.
    fn ensure_tables(&self) -> Result<(), MemoryError> {
        let txn = self.db.begin_write().map_err(redb_err)?;
        {
            txn.open_table(CORE_TABLE).map_err(redb_err)?;
            txn.open_table(RECALL_TABLE).map_err(redb_err)?;
            txn.open_table(ARCHIVAL_TABLE).map_err(redb_err)?;
            txn.open_table(FTS_RECALL_TABLE).map_err(redb_err)?;
            txn.open_table(FTS_ARCHIVAL_TABLE).map_err(redb_err)?;
            txn.open_table(META_TABLE).map_err(redb_err)?;
        }
        txn.commit().map_err(redb_err)
    }

    // ── Core tier ───────────────────────────────────────────────────────

    /// Set (or overwrite) a named Core block.
    pub fn core_set(&self, name: &str, text: &str) -> Result<(), MemoryError> {
        if text.len() > CORE_BLOCK_LIMIT {
            return Err(MemoryError::CoreBlock {
                name: name.into(),
                message: format!("{} bytes exceeds the {CORE_BLOCK_LIMIT}-byte limit", text.len()),
            });
        }
        let txn = self.db.begin_write().map_err(redb_err)?;
        {
            let mut table = txn.open_table(CORE_TABLE).map_err(redb_err)?;
            let exists = table.get(name).map_err(redb_err)?.is_some();
            if !exists && table.len().map_err(redb_err)? as usize >= CORE_MAX_BLOCKS {
                return Err(MemoryError::CoreBlock {
                    name: name.into(),
                    message: format!("core memory is full ({CORE_MAX_BLOCKS} blocks)"),
                });
            }
            table.insert(name, text).map_err(redb_err)?;
        }
        txn.commit().map_err(redb_err)
    }

    /// Read a Core block.
    pub fn core_get(&self, name: &str) -> Result<Option<String>, MemoryError> {
        let txn = self.db.begin_read().map_err(redb_err)?;
        let table = txn.open_table(CORE_TABLE).map_err(redb_err)?;
        Ok(table
            .get(name)
            .map_err(redb_err)?
            .map(|guard| guard.value().to_string()))
    }

    /// All Core blocks, ordered by name (the prompt-head rendering order).
    pub fn core_blocks(&self) -> Result<Vec<(String, String)>, MemoryError> {
        let txn = self.db.begin_read().map_err(redb_err)?;
        let table = txn.open_table(CORE_TABLE).map_err(redb_err)?;
        let mut blocks = Vec::new();
        for item in table.iter().map_err(redb_err)? {
            let (k, v) = item.map_err(redb_err)?;
            blocks.push((k.value().to_string(), v.value().to_string()));
        }
        Ok(blocks)
    }

    // ── Indexed tiers ───────────────────────────────────────────────────

    /// Append a record to a tier. Committed before returning; retried once.
    pub fn append(
        &self,
        tier: Tier,
        role: &str,
        text: &str,
        tag: Option<&str>,
    ) -> Result<u64, MemoryError> {
        match self.append_once(tier, role, text, tag) {
            Ok(seq) => Ok(seq),
            Err(first) => {
                tracing::warn!(?tier, error = %first, "memory append failed, retrying once");
                self.append_once(tier, role, text, tag)
            }
        }
    }

    fn append_once(
        &self,
        tier: Tier,
        role: &str,
        text: &str,
        tag: Option<&str>,
    ) -> Result<u64, MemoryError> {
        let record_template = MemoryRecord {
            seq: 0,
            timestamp: now_secs(),
            role: role.into(),
            text: text.into(),
            tag: tag.map(Into::into),
        };

        let txn = self.db.begin_write().map_err(redb_err)?;
        let seq;
        {
            let mut meta = txn.open_table(META_TABLE).map_err(redb_err)?;
            seq = meta
                .get(tier.seq_key())
                .map_err(redb_err)?
                .map(|g| g.value())
                .unwrap_or(1);
            meta.insert(tier.seq_key(), seq + 1).map_err(redb_err)?;

            let record = MemoryRecord {
                seq,
                ..record_template
            };
            let encoded = bincode::serialize(&record).map_err(|e| MemoryError::Serialization {
                message: format!("encode record: {e}"),
            })?;

            let mut records = txn.open_table(tier.record_table()).map_err(redb_err)?;
            records.insert(seq, encoded.as_slice()).map_err(redb_err)?;

            let mut fts = txn.open_table(tier.fts_table()).map_err(redb_err)?;
            for (term, tf) in index::terms(text) {
                fts.insert((term.as_str(), seq), tf).map_err(redb_err)?;
            }
        }
        txn.commit().map_err(redb_err)?;
        Ok(seq)
    }

    /// Fetch one record by sequence number.
    pub fn get(&self, tier: Tier, seq: u64) -> Result<Option<MemoryRecord>, MemoryError> {
        let txn = self.db.begin_read().map_err(redb_err)?;
        let table = txn.open_table(tier.record_table()).map_err(redb_err)?;
        match table.get(seq).map_err(redb_err)? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Number of records in a tier.
    pub fn len(&self, tier: Tier) -> Result<usize, MemoryError> {
        let txn = self.db.begin_read().map_err(redb_err)?;
        let table = txn.open_table(tier.record_table()).map_err(redb_err)?;
        Ok(table.len().map_err(redb_err)? as usize)
    }

    /// Feed one tier's term-frequency matches for `query` into `add`.
    fn collect_scores(
        txn: &redb::ReadTransaction,
        tier: Tier,
        query: &str,
        mut add: impl FnMut(u64, u32),
    ) -> Result<(), MemoryError> {
        let fts = txn.open_table(tier.fts_table()).map_err(redb_err)?;
        for term in index::terms(query).into_keys() {
            let range = fts
                .range((term.as_str(), 0u64)..=(term.as_str(), u64::MAX))
                .map_err(redb_err)?;
            for item in range {
                let (key, tf) = item.map_err(redb_err)?;
                add(key.value().1, tf.value());
            }
        }
        Ok(())
    }

    /// Top-k text search over one tier, scored by term-frequency overlap.
    pub fn search(&self, tier: Tier, query: &str, k: usize) -> Result<Vec<MemoryRecord>, MemoryError> {
        let txn = self.db.begin_read().map_err(redb_err)?;
        let mut scores: HashMap<u64, u32> = HashMap::new();
        Self::collect_scores(&txn, tier, query, |seq, tf| {
            index::accumulate(&mut scores, seq, tf);
        })?;

        let records = txn.open_table(tier.record_table()).map_err(redb_err)?;
        let mut out = Vec::new();
        for (seq, _score) in index::ranked(scores, k) {
            if let Some(guard) = records.get(seq).map_err(redb_err)? {
                out.push(decode(guard.value())?);
            }
        }
        Ok(out)
    }

    /// Search Recall and Archival together, best-first across both.
    ///
    /// Scores are merged before top-k selection, with keys tagged by tier
    /// so sequence numbers from the two logs cannot collide — a strong
    /// Archival hit outranks weaker Recall hits instead of being truncated
    /// away behind them.
    pub fn search_all(&self, query: &str, k: usize) -> Result<Vec<MemoryRecord>, MemoryError> {
        let txn = self.db.begin_read().map_err(redb_err)?;
        let tiers = [Tier::Recall, Tier::Archival];
        let mut scores: HashMap<(u8, u64), u32> = HashMap::new();
        for (rank, &tier) in tiers.iter().enumerate() {
            Self::collect_scores(&txn, tier, query, |seq, tf| {
                index::accumulate(&mut scores, (rank as u8, seq), tf);
            })?;
        }

        let mut out = Vec::new();
        for ((rank, seq), _score) in index::ranked(scores, k) {
            let tier = tiers[rank as usize];
            let records = txn.open_table(tier.record_table()).map_err(redb_err)?;
            if let Some(guard) = records.get(seq).map_err(redb_err)? {
                out.push(decode(guard.value())?);
            }
        }
        Ok(out)
    }

    /// Garbage-collect Recall: when the tier exceeds `max_records`, insert
    /// the summary in place of the oldest entries and delete them.
    pub fn recall_gc(&self, max_records: usize, summary: &str) -> Result<usize, MemoryError> {
        let count = self.len(Tier::Recall)?;
        if count <= max_records {
            return Ok(0);
        }
        // The summary itself takes a slot, so clear one extra.
        let excess = count + 1 - max_records;

        // Oldest sequence numbers first.
        let victims: Vec<MemoryRecord> = {
            let txn = self.db.begin_read().map_err(redb_err)?;
            let table = txn.open_table(RECALL_TABLE).map_err(redb_err)?;
            let mut v = Vec::with_capacity(excess);
            for item in table.iter().map_err(redb_err)?.take(excess) {
                let (_, value) = item.map_err(redb_err)?;
                v.push(decode(value.value())?);
            }
            v
        };

        self.append(Tier::Recall, "system", summary, Some("gc_summary"))?;

        let txn = self.db.begin_write().map_err(redb_err)?;
        {
            let mut records = txn.open_table(RECALL_TABLE).map_err(redb_err)?;
            let mut fts = txn.open_table(FTS_RECALL_TABLE).map_err(redb_err)?;
            for victim in &victims {
                records.remove(victim.seq).map_err(redb_err)?;
                for term in index::terms(&victim.text).into_keys() {
                    fts.remove((term.as_str(), victim.seq)).map_err(redb_err)?;
                }
            }
        }
        txn.commit().map_err(redb_err)?;
        tracing::debug!(removed = victims.len(), "recall tier garbage-collected");
        Ok(victims.len())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish()
    }
}

fn redb_err(e: impl std::fmt::Display) -> MemoryError {
    MemoryError::Redb {
        message: e.to_string(),
    }
}

fn decode(bytes: &[u8]) -> Result<MemoryRecord, MemoryError> {
    bincode::deserialize(bytes).map_err(|e| MemoryError::Serialization {
        message: format!("decode record: {e}"),
    })
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, MemoryStore) {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::open(&dir.path().join("memory.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn core_set_get_round_trip() {
        let (_dir, store) = open_store();
        store.core_set("persona", "You are a careful assistant.").unwrap();
        assert_eq!(
            store.core_get("persona").unwrap().as_deref(),
            Some("You are a careful assistant.")
        );
        assert_eq!(store.core_get("missing").unwrap(), None);
    }

    #[test]
    fn core_enforces_block_limit_and_count() {
        let (_dir, store) = open_store();
        let oversize = "x".repeat(CORE_BLOCK_LIMIT + 1);
        assert!(matches!(
            store.core_set("big", &oversize),
            Err(MemoryError::CoreBlock { .. })
        ));

        for i in 0..CORE_MAX_BLOCKS {
            store.core_set(&format!("block{i}"), "v").unwrap();
        }
        assert!(matches!(
            store.core_set("one_too_many", "v"),
            Err(MemoryError::CoreBlock { .. })
        ));
        // Overwriting an existing block is always allowed.
        store.core_set("block0", "updated").unwrap();
        assert_eq!(store.core_get("block0").unwrap().as_deref(), Some("updated"));
    }

    #[test]
    fn append_assigns_increasing_seqs() {
        let (_dir, store) = open_store();
        let a = store.append(Tier::Recall, "user", "first turn", None).unwrap();
        let b = store.append(Tier::Recall, "assistant", "second turn", None).unwrap();
        assert!(b > a);
        assert_eq!(store.len(Tier::Recall).unwrap(), 2);

        let rec = store.get(Tier::Recall, a).unwrap().unwrap();
        assert_eq!(rec.role, "user");
        assert_eq!(rec.text, "first turn");
    }

    #[test]
    fn search_ranks_by_term_overlap() {
        let (_dir, store) = open_store();
        store.append(Tier::Recall, "user", "the weather in tokyo", None).unwrap();
        store.append(Tier::Recall, "assistant", "tokyo weather is sunny today", None).unwrap();
        store.append(Tier::Recall, "user", "unrelated grocery list", None).unwrap();

        let hits = store.search(Tier::Recall, "weather tokyo", 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].text.contains("tokyo"));
        assert!(hits.iter().all(|r| !r.text.contains("grocery")));
    }

    #[test]
    fn tiers_are_isolated() {
        let (_dir, store) = open_store();
        store.append(Tier::Archival, "tool", "the capital of france is paris", None).unwrap();
        assert!(store.search(Tier::Recall, "paris", 5).unwrap().is_empty());
        assert_eq!(store.search(Tier::Archival, "paris", 5).unwrap().len(), 1);
        // Combined search sees it.
        assert_eq!(store.search_all("paris", 5).unwrap().len(), 1);
    }

    #[test]
    fn combined_search_ranks_across_tiers() {
        let (_dir, store) = open_store();
        // Enough weak Recall hits to fill k on their own (score 2 each).
        for i in 0..3 {
            store
                .append(Tier::Recall, "user", &format!("launch checklist item {i}"), None)
                .unwrap();
        }
        // One Archival record matching the query harder (score 3).
        store
            .append(
                Tier::Archival,
                "tool",
                "launch window checklist: fuel at dawn, checklist signed",
                None,
            )
            .unwrap();

        let hits = store.search_all("launch checklist", 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(
            hits[0].role, "tool",
            "the stronger archival hit must outrank the recall hits"
        );
        assert_eq!(hits[1].role, "user");
    }

    #[test]
    fn gc_truncates_oldest_and_inserts_summary() {
        let (_dir, store) = open_store();
        for i in 0..10 {
            store
                .append(Tier::Recall, "user", &format!("old event number {i}"), None)
                .unwrap();
        }
        let removed = store.recall_gc(4, "summary of early events").unwrap();
        assert_eq!(removed, 7); // 11 records after the summary, back to 4.
        assert_eq!(store.len(Tier::Recall).unwrap(), 4);

        // Oldest entries are gone from search; the summary is findable.
        assert!(store.search(Tier::Recall, "number", 10).unwrap().len() < 10);
        let hits = store.search(Tier::Recall, "summary early", 5).unwrap();
        assert_eq!(hits[0].tag.as_deref(), Some("gc_summary"));

        // Below the cap: no-op.
        assert_eq!(store.recall_gc(100, "unused").unwrap(), 0);
    }

    #[test]
    fn persistence_across_reopens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memory.db");
        {
            let store = MemoryStore::open(&path).unwrap();
            store.core_set("k", "v").unwrap();
            store.append(Tier::Archival, "tool", "durable fact", None).unwrap();
        }
        let store = MemoryStore::open(&path).unwrap();
        assert_eq!(store.core_get("k").unwrap().as_deref(), Some("v"));
        assert_eq!(store.search(Tier::Archival, "durable", 1).unwrap().len(), 1);
    }
}
