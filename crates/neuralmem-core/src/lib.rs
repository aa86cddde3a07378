//! # NeuralMemory Core
//!
//! Persistent, offline memory engine for AI agents. Memories are stored as
//! a typed, weighted graph of neurons and synapses, grouped into fibers,
//! and retrieved by spreading activation: signal propagates from
//! query-derived anchors along weighted edges and accumulates on neurons
//! reached from several directions at once.
//!
//! The engine is deterministic: extraction is regex + lexicon, retrieval is
//! graph traversal, and nothing calls out to an embedding model or LLM.
//!
//! - **Encoding**: text → entities, keywords, time phrases, relations,
//!   sentiment → neurons, synapses, one fiber with an ordered pathway.
//!   SimHash catches near-duplicates and reinforces instead of re-storing.
//! - **Retrieval**: query → anchors → hybrid activation (reflex conduction
//!   along fiber pathways plus a short discovery spread) → stabilization →
//!   reconstructed answer. Everything learned flushes as one deferred
//!   write batch after the result exists.
//! - **Learning**: Hebbian weight updates with novelty adaptation and
//!   competitive normalization.
//! - **Lifecycle**: type- and stage-aware decay, STM → Working → Episodic →
//!   Semantic maturation with a spacing-effect gate.
//! - **Consolidation**: PRUNE, MERGE, SUMMARIZE, MATURE, INFER, ENRICH,
//!   DREAM, LEARN_HABITS.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use neuralmem_core::{EncodeRequest, NeuralMemory, QueryRequest};
//!
//! let memory = NeuralMemory::open("personal")?;
//! memory.encode(&EncodeRequest::new("Met Alice at coffee shop. She suggested JWT for auth."))?;
//!
//! let result = memory.query(&QueryRequest::new("What did Alice suggest?"))?;
//! assert!(result.answer.unwrap_or_default().contains("JWT"));
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod consolidation;
pub mod core;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod extraction;
pub mod health;
pub mod lifecycle;
pub mod snapshot;
pub mod storage;
pub mod util;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use crate::core::{
    Brain, BrainConfig, Direction, Fiber, FreshnessLevel, Maturation, MaturationStage,
    MemoryType, Metadata, Neuron, NeuronState, NeuronType, Synapse, SynapseType, W_MAX,
};

pub use consolidation::{ConsolidationReport, Strategy};
pub use encoder::{EncodeRequest, EncodeResult, Encoder};
pub use engine::{
    DepthLevel, QueryRequest, ReflexPipeline, RetrievalResult, ScoreBreakdown, SynthesisMethod,
};
pub use error::{EngineError, Result};
pub use extraction::{QueryIntent, QueryParser, RegexTokenizer, Stimulus, Tokenizer};
pub use health::{HealthComponents, HealthReport};
pub use lifecycle::{DecayManager, DecayReport, PatternReport};
pub use snapshot::{
    import_snapshot, ImportReport, MergeStrategy, Snapshot, SnapshotChunk, SnapshotExporter,
};
pub use storage::{NeuronFilter, SqliteStore, StorageError, StoreStats};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Encoded content larger than this is rejected as invalid input.
const MAX_ENCODE_TOKENS: usize = 10_000;

// ============================================================================
// ENGINE FACADE
// ============================================================================

/// One open brain: storage handle, encoder, retrieval pipeline, tokenizer.
///
/// Encodes are serialized per brain; retrievals run in parallel with each
/// other and with an ongoing encode (readers see the store's last committed
/// transaction). All methods take `&self`.
pub struct NeuralMemory {
    brain: Brain,
    store: Arc<SqliteStore>,
    encoder: Encoder,
    pipeline: ReflexPipeline,
    tokenizer: Box<dyn Tokenizer>,
    encode_lock: Mutex<()>,
    unhealthy: AtomicBool,
}

impl NeuralMemory {
    /// Open (or create) a brain under the per-user data directory.
    pub fn open(name: &str) -> Result<Self> {
        validate_brain_name(name)?;
        let dirs = ProjectDirs::from("com", "neuralmem", "neuralmem")
            .ok_or_else(|| EngineError::Internal("no usable data directory".into()))?;
        let path = dirs.data_dir().join(format!("{name}.db"));
        Self::open_at(&path, name)
    }

    /// Open (or create) a brain at an explicit database path.
    pub fn open_at(path: &Path, name: &str) -> Result<Self> {
        validate_brain_name(name)?;
        let store = Arc::new(SqliteStore::open(path)?);
        Self::with_store(store, name)
    }

    /// In-memory brain, mainly for tests and scratch work.
    pub fn in_memory(name: &str) -> Result<Self> {
        validate_brain_name(name)?;
        let store = Arc::new(SqliteStore::in_memory()?);
        Self::with_store(store, name)
    }

    fn with_store(store: Arc<SqliteStore>, name: &str) -> Result<Self> {
        let brain = match store.load_brain()? {
            Some(existing) => existing,
            None => {
                let brain = Brain::new(name);
                store.save_brain(&brain)?;
                brain
            }
        };
        let config = brain.config.clone();
        Ok(Self {
            brain,
            encoder: Encoder::new(store.clone(), config.clone()),
            pipeline: ReflexPipeline::new(store.clone(), config),
            store,
            tokenizer: Box::new(RegexTokenizer),
            encode_lock: Mutex::new(()),
            unhealthy: AtomicBool::new(false),
        })
    }

    /// Swap in a language-specific tokenizer. The tokenizer lives as long
    /// as the brain handle.
    pub fn with_tokenizer(mut self, tokenizer: Box<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn brain(&self) -> &Brain {
        &self.brain
    }

    pub fn config(&self) -> &BrainConfig {
        &self.brain.config
    }

    pub fn store(&self) -> &Arc<SqliteStore> {
        &self.store
    }

    // ========================================================================
    // OPERATIONS
    // ========================================================================

    /// Encode a memory now.
    pub fn encode(&self, request: &EncodeRequest) -> Result<EncodeResult> {
        self.encode_at(request, Utc::now())
    }

    /// Encode a memory at an explicit timestamp (simulated clocks, imports).
    pub fn encode_at(
        &self,
        request: &EncodeRequest,
        now: DateTime<Utc>,
    ) -> Result<EncodeResult> {
        self.check_healthy()?;
        if request.content.trim().is_empty() {
            return Err(EngineError::Invalid("content must not be empty".into()));
        }
        if self.tokenizer.tokenize(&request.content).len() > MAX_ENCODE_TOKENS {
            return Err(EngineError::Invalid(format!(
                "content exceeds {MAX_ENCODE_TOKENS} tokens"
            )));
        }
        for tag in &request.tags {
            validate_tag(tag)?;
        }

        let _serialize = self
            .encode_lock
            .lock()
            .map_err(|_| EngineError::Internal("encode lock poisoned".into()))?;
        self.guard(self.encoder.encode(request, now))
    }

    /// Retrieve memories for a query now.
    pub fn query(&self, request: &QueryRequest) -> Result<RetrievalResult> {
        self.query_at(request, Utc::now())
    }

    /// Retrieve at an explicit reference time.
    pub fn query_at(
        &self,
        request: &QueryRequest,
        now: DateTime<Utc>,
    ) -> Result<RetrievalResult> {
        if request.query.trim().is_empty() {
            return Err(EngineError::Invalid("query must not be empty".into()));
        }
        self.guard(self.pipeline.query(request, now))
    }

    /// List neurons with filters and paging.
    pub fn list_neurons(&self, filter: &NeuronFilter) -> Result<Vec<Neuron>> {
        Ok(self.store.list_neurons(filter)?)
    }

    /// Fetch one fiber.
    pub fn get_fiber(&self, fiber_id: &str) -> Result<Option<Fiber>> {
        Ok(self.store.get_fiber(fiber_id)?)
    }

    /// Run the decay manager.
    pub fn decay(&self, dry_run: bool) -> Result<DecayReport> {
        self.decay_at(Utc::now(), dry_run)
    }

    /// Run decay at an explicit timestamp.
    pub fn decay_at(&self, now: DateTime<Utc>, dry_run: bool) -> Result<DecayReport> {
        if !dry_run {
            self.check_healthy()?;
        }
        self.guard(DecayManager::new(&self.store, &self.brain.config).run(now, dry_run))
    }

    /// Run one consolidation strategy.
    pub fn consolidate(
        &self,
        strategy: Strategy,
        dry_run: bool,
        max_duration: Option<Duration>,
    ) -> Result<ConsolidationReport> {
        self.consolidate_at(strategy, dry_run, max_duration, Utc::now())
    }

    /// Run one consolidation strategy at an explicit timestamp.
    pub fn consolidate_at(
        &self,
        strategy: Strategy,
        dry_run: bool,
        max_duration: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<ConsolidationReport> {
        if !dry_run {
            self.check_healthy()?;
        }
        self.guard(consolidation::consolidate(
            &self.store,
            &self.brain.config,
            strategy,
            dry_run,
            max_duration,
            now,
        ))
    }

    /// Export the whole brain as a snapshot.
    pub fn export(&self, exclude_sensitive: bool) -> Result<Snapshot> {
        Ok(
            SnapshotExporter::new(&self.store, &self.brain.id, Utc::now(), exclude_sensitive)
                .collect()?,
        )
    }

    /// Chunked export cursor for streaming large brains.
    pub fn export_chunks(&self, exclude_sensitive: bool) -> SnapshotExporter<'_> {
        SnapshotExporter::new(&self.store, &self.brain.id, Utc::now(), exclude_sensitive)
    }

    /// Import a snapshot under a merge strategy.
    pub fn import(&self, snapshot: &Snapshot, strategy: MergeStrategy) -> Result<ImportReport> {
        self.check_healthy()?;
        if snapshot.version > snapshot::SNAPSHOT_VERSION {
            return Err(EngineError::Conflict(format!(
                "snapshot version {} is newer than supported {}",
                snapshot.version,
                snapshot::SNAPSHOT_VERSION
            )));
        }
        self.guard(import_snapshot(&self.store, snapshot, strategy))
    }

    /// Row counts and aggregates.
    pub fn stats(&self) -> Result<StoreStats> {
        Ok(self.store.stats()?)
    }

    /// Composite health report with grade and purity score.
    pub fn health(&self) -> Result<HealthReport> {
        Ok(health::health_report(&self.store, Utc::now())?)
    }

    /// Record an agent action for workflow mining (LEARN_HABITS).
    pub fn record_action(
        &self,
        session_id: &str,
        action: &str,
        tags: &[String],
    ) -> Result<()> {
        self.check_healthy()?;
        if action.trim().is_empty() {
            return Err(EngineError::Invalid("action must not be empty".into()));
        }
        self.guard(
            self.store
                .record_action_event(session_id, action, tags, Utc::now()),
        )
    }

    /// Whether storage integrity failed and writes are refused.
    pub fn is_unhealthy(&self) -> bool {
        self.unhealthy.load(Ordering::Relaxed)
    }

    /// Admin-initiated recheck after a storage integrity failure: verifies
    /// the schema version and clears the unhealthy flag when sane.
    pub fn recheck(&self) -> Result<()> {
        let version = self.store.schema_version()?;
        let latest = storage::migrations::MIGRATIONS
            .last()
            .map(|m| m.version)
            .unwrap_or(0);
        if version != latest {
            return Err(EngineError::Internal(format!(
                "schema version {version}, expected {latest}"
            )));
        }
        self.unhealthy.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn check_healthy(&self) -> Result<()> {
        if self.is_unhealthy() {
            return Err(EngineError::Internal(
                "brain is marked unhealthy; run recheck() before writing".into(),
            ));
        }
        Ok(())
    }

    /// Map storage results to the boundary taxonomy, marking the brain
    /// unhealthy on integrity failures.
    fn guard<T>(&self, result: storage::Result<T>) -> Result<T> {
        result.map_err(|err| {
            if matches!(err, StorageError::Corrupt(_)) {
                self.unhealthy.store(true, Ordering::Relaxed);
            }
            err.into()
        })
    }
}

fn validate_brain_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 {
        return Err(EngineError::Invalid("brain name must be 1-64 chars".into()));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(EngineError::Invalid(
            "brain name may only contain alphanumerics, '-' and '_'".into(),
        ));
    }
    Ok(())
}

fn validate_tag(tag: &str) -> Result<()> {
    if tag.len() > 128 || tag.contains("..") || tag.contains('/') || tag.contains('\\') {
        return Err(EngineError::Invalid(format!("malformed tag: {tag:?}")));
    }
    Ok(())
}

/// Default database directory for a brain name, without opening it.
pub fn default_brain_path(name: &str) -> Result<PathBuf> {
    validate_brain_name(name)?;
    let dirs = ProjectDirs::from("com", "neuralmem", "neuralmem")
        .ok_or_else(|| EngineError::Internal("no usable data directory".into()))?;
    Ok(dirs.data_dir().join(format!("{name}.db")))
}

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::{
        Brain, BrainConfig, ConsolidationReport, DecayReport, DepthLevel, EncodeRequest,
        EncodeResult, EngineError, Fiber, HealthReport, MemoryType, MergeStrategy, NeuralMemory,
        Neuron, NeuronType, QueryRequest, Result, RetrievalResult, Snapshot, SqliteStore,
        Strategy, Synapse, SynapseType,
    };
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_content_is_invalid() {
        let memory = NeuralMemory::in_memory("t").unwrap();
        let err = memory.encode(&EncodeRequest::new("   ")).unwrap_err();
        assert!(matches!(err, EngineError::Invalid(_)));
    }

    #[test]
    fn empty_query_is_invalid() {
        let memory = NeuralMemory::in_memory("t").unwrap();
        let err = memory.query(&QueryRequest::new("")).unwrap_err();
        assert!(matches!(err, EngineError::Invalid(_)));
    }

    #[test]
    fn path_traversal_tags_are_rejected() {
        let memory = NeuralMemory::in_memory("t").unwrap();
        let err = memory
            .encode(&EncodeRequest::new("remember this").with_tags(["../etc/passwd"]))
            .unwrap_err();
        assert!(matches!(err, EngineError::Invalid(_)));
    }

    #[test]
    fn brain_names_are_validated() {
        assert!(NeuralMemory::in_memory("ok-name_1").is_ok());
        assert!(matches!(
            NeuralMemory::in_memory("../sneaky"),
            Err(EngineError::Invalid(_))
        ));
        assert!(matches!(
            NeuralMemory::in_memory(""),
            Err(EngineError::Invalid(_))
        ));
    }

    #[test]
    fn brain_config_persists_across_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("brain.db");

        let first = NeuralMemory::open_at(&path, "persistent").unwrap();
        let id = first.brain().id.clone();
        drop(first);

        let second = NeuralMemory::open_at(&path, "persistent").unwrap();
        assert_eq!(second.brain().id, id);
        assert_eq!(second.brain().name, "persistent");
    }

    #[test]
    fn encode_then_query_round_trip() {
        let memory = NeuralMemory::in_memory("t").unwrap();
        memory
            .encode(&EncodeRequest::new(
                "Met Alice at coffee shop. She suggested JWT for auth.",
            ))
            .unwrap();

        let result = memory
            .query(&QueryRequest::new("What did Alice suggest?"))
            .unwrap();
        assert!(result.confidence > 0.0);
        assert!(result.neurons_activated > 0);
    }

    #[test]
    fn unhealthy_brain_refuses_writes_until_recheck() {
        let memory = NeuralMemory::in_memory("t").unwrap();
        memory.unhealthy.store(true, Ordering::Relaxed);

        let err = memory.encode(&EncodeRequest::new("blocked")).unwrap_err();
        assert!(matches!(err, EngineError::Internal(_)));

        memory.recheck().unwrap();
        assert!(memory.encode(&EncodeRequest::new("allowed")).is_ok());
    }
}
