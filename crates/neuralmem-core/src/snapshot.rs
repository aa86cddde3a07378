//! Brain snapshots: deterministic JSON export and tolerant import.
//!
//! Export walks the store through a chunked cursor so callers can stream a
//! large brain without materializing it; `Snapshot::collect` folds the
//! chunks back together. Field order inside records is deterministic
//! (serde emits struct fields in declaration order; maps are BTreeMaps).
//! Importers tolerate unknown keys and missing optional fields.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{Fiber, Maturation, MemoryType, Neuron, NeuronState};
use crate::storage::{Result, SqliteStore};

/// Snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 2;

/// Rows per cursor chunk.
const CHUNK_SIZE: u64 = 500;

/// How id collisions are handled on import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Keep the existing row.
    #[default]
    Skip,
    /// Replace with the imported row.
    Overwrite,
    /// Keep whichever side has the stronger claim (heavier synapse, later
    /// timestamps); otherwise the imported row wins.
    Merge,
}

/// One fiber's memory-type row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedMemoryRecord {
    pub fiber_id: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
}

/// Aggregate counts carried in the snapshot trailer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotCounts {
    pub neurons: u64,
    pub synapses: u64,
    pub fibers: u64,
    pub neuron_states: u64,
    pub maturations: u64,
}

/// A complete exported brain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub brain_id: String,
    pub exported_at: DateTime<Utc>,
    pub version: u32,
    pub neurons: Vec<Neuron>,
    pub synapses: Vec<crate::core::Synapse>,
    pub fibers: Vec<Fiber>,
    #[serde(default)]
    pub typed_memories: Vec<TypedMemoryRecord>,
    #[serde(default)]
    pub neuron_states: Vec<NeuronState>,
    #[serde(default)]
    pub maturations: Vec<Maturation>,
    #[serde(default)]
    pub metadata: SnapshotCounts,
    /// Unknown future fields survive a round-trip.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// One streamed piece of a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum SnapshotChunk {
    Header {
        brain_id: String,
        exported_at: DateTime<Utc>,
        version: u32,
    },
    Neurons {
        items: Vec<Neuron>,
    },
    Synapses {
        items: Vec<crate::core::Synapse>,
    },
    Fibers {
        items: Vec<Fiber>,
    },
    TypedMemories {
        items: Vec<TypedMemoryRecord>,
    },
    NeuronStates {
        items: Vec<NeuronState>,
    },
    Maturations {
        items: Vec<Maturation>,
    },
    Trailer {
        metadata: SnapshotCounts,
    },
}

/// Import outcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub neurons_imported: u64,
    pub neurons_skipped: u64,
    pub synapses_imported: u64,
    pub synapses_skipped: u64,
    pub fibers_imported: u64,
    pub fibers_skipped: u64,
    pub states_imported: u64,
    pub maturations_imported: u64,
}

// ============================================================================
// EXPORT
// ============================================================================

#[derive(Clone, Copy)]
enum Phase {
    Header,
    Neurons(u64),
    Synapses(u64),
    Fibers(u64),
    TypedMemories,
    States(u64),
    Maturations,
    Trailer,
    Done,
}

/// Lazy chunked export cursor. Each call to [`SnapshotExporter::next_chunk`]
/// reads one bounded slice from the store.
pub struct SnapshotExporter<'a> {
    store: &'a SqliteStore,
    brain_id: String,
    exported_at: DateTime<Utc>,
    exclude_sensitive: bool,
    phase: Phase,
    counts: SnapshotCounts,
}

impl<'a> SnapshotExporter<'a> {
    pub fn new(
        store: &'a SqliteStore,
        brain_id: impl Into<String>,
        exported_at: DateTime<Utc>,
        exclude_sensitive: bool,
    ) -> Self {
        Self {
            store,
            brain_id: brain_id.into(),
            exported_at,
            exclude_sensitive,
            phase: Phase::Header,
            counts: SnapshotCounts::default(),
        }
    }

    /// Produce the next chunk, or `None` when the export is complete.
    pub fn next_chunk(&mut self) -> Result<Option<SnapshotChunk>> {
        loop {
            match self.phase {
                Phase::Header => {
                    self.phase = Phase::Neurons(0);
                    return Ok(Some(SnapshotChunk::Header {
                        brain_id: self.brain_id.clone(),
                        exported_at: self.exported_at,
                        version: SNAPSHOT_VERSION,
                    }));
                }
                Phase::Neurons(offset) => {
                    let mut items = self.store.all_neurons(offset, CHUNK_SIZE)?;
                    if items.is_empty() {
                        self.phase = Phase::Synapses(0);
                        continue;
                    }
                    if self.exclude_sensitive {
                        for n in items.iter_mut() {
                            n.metadata.retain(|k, _| !k.starts_with("_secret"));
                        }
                    }
                    self.counts.neurons += items.len() as u64;
                    self.phase = Phase::Neurons(offset + items.len() as u64);
                    return Ok(Some(SnapshotChunk::Neurons { items }));
                }
                Phase::Synapses(offset) => {
                    let items = self.store.all_synapses(offset, CHUNK_SIZE)?;
                    if items.is_empty() {
                        self.phase = Phase::Fibers(0);
                        continue;
                    }
                    self.counts.synapses += items.len() as u64;
                    self.phase = Phase::Synapses(offset + items.len() as u64);
                    return Ok(Some(SnapshotChunk::Synapses { items }));
                }
                Phase::Fibers(offset) => {
                    let items = self.store.all_fibers(offset, CHUNK_SIZE)?;
                    if items.is_empty() {
                        self.phase = Phase::TypedMemories;
                        continue;
                    }
                    self.counts.fibers += items.len() as u64;
                    self.phase = Phase::Fibers(offset + items.len() as u64);
                    return Ok(Some(SnapshotChunk::Fibers { items }));
                }
                Phase::TypedMemories => {
                    self.phase = Phase::States(0);
                    let items: Vec<TypedMemoryRecord> = self
                        .store
                        .all_memory_types()?
                        .into_iter()
                        .map(|(fiber_id, memory_type)| TypedMemoryRecord {
                            fiber_id,
                            memory_type,
                        })
                        .collect();
                    if items.is_empty() {
                        continue;
                    }
                    return Ok(Some(SnapshotChunk::TypedMemories { items }));
                }
                Phase::States(offset) => {
                    let items = self.store.all_states(offset, CHUNK_SIZE)?;
                    if items.is_empty() {
                        self.phase = Phase::Maturations;
                        continue;
                    }
                    self.counts.neuron_states += items.len() as u64;
                    self.phase = Phase::States(offset + items.len() as u64);
                    return Ok(Some(SnapshotChunk::NeuronStates { items }));
                }
                Phase::Maturations => {
                    self.phase = Phase::Trailer;
                    let items = self.store.all_maturations()?;
                    if items.is_empty() {
                        continue;
                    }
                    self.counts.maturations += items.len() as u64;
                    return Ok(Some(SnapshotChunk::Maturations { items }));
                }
                Phase::Trailer => {
                    self.phase = Phase::Done;
                    return Ok(Some(SnapshotChunk::Trailer {
                        metadata: self.counts.clone(),
                    }));
                }
                Phase::Done => return Ok(None),
            }
        }
    }

    /// Drain the cursor into a full snapshot.
    pub fn collect(mut self) -> Result<Snapshot> {
        let mut snapshot = Snapshot {
            brain_id: self.brain_id.clone(),
            exported_at: self.exported_at,
            version: SNAPSHOT_VERSION,
            neurons: Vec::new(),
            synapses: Vec::new(),
            fibers: Vec::new(),
            typed_memories: Vec::new(),
            neuron_states: Vec::new(),
            maturations: Vec::new(),
            metadata: SnapshotCounts::default(),
            extra: BTreeMap::new(),
        };
        while let Some(chunk) = self.next_chunk()? {
            match chunk {
                SnapshotChunk::Header { .. } => {}
                SnapshotChunk::Neurons { items } => snapshot.neurons.extend(items),
                SnapshotChunk::Synapses { items } => snapshot.synapses.extend(items),
                SnapshotChunk::Fibers { items } => snapshot.fibers.extend(items),
                SnapshotChunk::TypedMemories { items } => snapshot.typed_memories.extend(items),
                SnapshotChunk::NeuronStates { items } => snapshot.neuron_states.extend(items),
                SnapshotChunk::Maturations { items } => snapshot.maturations.extend(items),
                SnapshotChunk::Trailer { metadata } => snapshot.metadata = metadata,
            }
        }
        Ok(snapshot)
    }
}

// ============================================================================
// IMPORT
// ============================================================================

/// Import a snapshot into the store under a merge strategy.
pub fn import_snapshot(
    store: &SqliteStore,
    snapshot: &Snapshot,
    strategy: MergeStrategy,
) -> Result<ImportReport> {
    let mut report = ImportReport::default();

    for neuron in &snapshot.neurons {
        match (strategy, store.get_neuron(&neuron.id)?) {
            (MergeStrategy::Skip, Some(_)) => report.neurons_skipped += 1,
            (MergeStrategy::Merge, Some(existing)) if existing.created_at >= neuron.created_at => {
                report.neurons_skipped += 1;
            }
            _ => {
                store.add_neuron(neuron)?;
                report.neurons_imported += 1;
            }
        }
    }

    for synapse in &snapshot.synapses {
        match (strategy, store.get_synapse(&synapse.id)?) {
            (MergeStrategy::Skip, Some(_)) => report.synapses_skipped += 1,
            (MergeStrategy::Merge, Some(existing)) if existing.weight >= synapse.weight => {
                report.synapses_skipped += 1;
            }
            _ => {
                store.add_synapse(synapse)?;
                report.synapses_imported += 1;
            }
        }
    }

    for fiber in &snapshot.fibers {
        match (strategy, store.get_fiber(&fiber.id)?) {
            (MergeStrategy::Skip, Some(_)) => report.fibers_skipped += 1,
            (MergeStrategy::Merge, Some(existing)) if existing.frequency >= fiber.frequency => {
                report.fibers_skipped += 1;
            }
            _ => {
                store.add_fiber(fiber)?;
                report.fibers_imported += 1;
            }
        }
    }

    for record in &snapshot.typed_memories {
        if store.get_fiber(&record.fiber_id)?.is_some() {
            store.save_memory_type(&record.fiber_id, record.memory_type)?;
        }
    }

    for state in &snapshot.neuron_states {
        if store.get_neuron(&state.neuron_id)?.is_some() {
            store.upsert_state(state)?;
            report.states_imported += 1;
        }
    }

    for maturation in &snapshot.maturations {
        if store.get_fiber(&maturation.fiber_id)?.is_some() {
            store.save_maturation(maturation)?;
            report.maturations_imported += 1;
        }
    }

    tracing::info!(
        neurons = report.neurons_imported,
        synapses = report.synapses_imported,
        fibers = report.fibers_imported,
        "snapshot import complete"
    );
    Ok(report)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Neuron, NeuronType, Synapse, SynapseType};
    use std::collections::BTreeSet;

    fn seeded_store() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        let a = Neuron::new(NeuronType::Entity, "alice");
        let b = Neuron::new(NeuronType::Concept, "jwt");
        store.add_neuron(&a).unwrap();
        store.add_neuron(&b).unwrap();
        store
            .add_synapse(&Synapse::new(&a.id, &b.id, SynapseType::Suggested, 0.7))
            .unwrap();
        let fiber = Fiber::create(
            BTreeSet::from([a.id.clone(), b.id.clone()]),
            BTreeSet::new(),
            a.id.clone(),
            vec![a.id.clone(), b.id.clone()],
            "alice suggested jwt".into(),
        )
        .unwrap();
        store.add_fiber(&fiber).unwrap();
        store.save_memory_type(&fiber.id, MemoryType::Fact).unwrap();
        store
            .save_maturation(&Maturation::new(&fiber.id, Utc::now()))
            .unwrap();
        store
            .upsert_state(&NeuronState::new(&a.id, 0.02))
            .unwrap();
        store
            .upsert_state(&NeuronState::new(&b.id, 0.02))
            .unwrap();
        store
    }

    fn export(store: &SqliteStore) -> Snapshot {
        SnapshotExporter::new(store, "brain-1", Utc::now(), false)
            .collect()
            .unwrap()
    }

    #[test]
    fn export_counts_match_contents() {
        let store = seeded_store();
        let snapshot = export(&store);
        assert_eq!(snapshot.metadata.neurons, 2);
        assert_eq!(snapshot.metadata.synapses, 1);
        assert_eq!(snapshot.metadata.fibers, 1);
        assert_eq!(snapshot.neurons.len(), 2);
        assert_eq!(snapshot.version, SNAPSHOT_VERSION);
    }

    #[test]
    fn chunked_export_starts_with_header_and_ends_with_trailer() {
        let store = seeded_store();
        let mut exporter = SnapshotExporter::new(&store, "brain-1", Utc::now(), false);
        let mut kinds = Vec::new();
        while let Some(chunk) = exporter.next_chunk().unwrap() {
            kinds.push(match chunk {
                SnapshotChunk::Header { .. } => "header",
                SnapshotChunk::Neurons { .. } => "neurons",
                SnapshotChunk::Synapses { .. } => "synapses",
                SnapshotChunk::Fibers { .. } => "fibers",
                SnapshotChunk::TypedMemories { .. } => "typed",
                SnapshotChunk::NeuronStates { .. } => "states",
                SnapshotChunk::Maturations { .. } => "maturations",
                SnapshotChunk::Trailer { .. } => "trailer",
            });
        }
        assert_eq!(kinds.first(), Some(&"header"));
        assert_eq!(kinds.last(), Some(&"trailer"));
        assert!(kinds.contains(&"neurons"));
    }

    #[test]
    fn export_import_round_trip_preserves_the_graph() {
        let store = seeded_store();
        let snapshot = export(&store);

        let target = SqliteStore::in_memory().unwrap();
        let report = import_snapshot(&target, &snapshot, MergeStrategy::Skip).unwrap();
        assert_eq!(report.neurons_imported, 2);
        assert_eq!(report.synapses_imported, 1);
        assert_eq!(report.fibers_imported, 1);

        let back = export(&target);
        let ids = |ns: &[Neuron]| {
            let mut v: Vec<String> = ns.iter().map(|n| n.id.clone()).collect();
            v.sort();
            v
        };
        assert_eq!(ids(&snapshot.neurons), ids(&back.neurons));
        assert_eq!(snapshot.synapses.len(), back.synapses.len());
        assert_eq!(snapshot.fibers.len(), back.fibers.len());
        assert_eq!(snapshot.maturations.len(), back.maturations.len());
    }

    #[test]
    fn skip_strategy_keeps_existing_rows() {
        let store = seeded_store();
        let mut snapshot = export(&store);
        // Tamper with the imported copy.
        snapshot.neurons[0].metadata.insert(
            "tampered".to_string(),
            serde_json::Value::Bool(true),
        );

        let report = import_snapshot(&store, &snapshot, MergeStrategy::Skip).unwrap();
        assert_eq!(report.neurons_imported, 0);
        assert_eq!(report.neurons_skipped, 2);

        let untouched = store.get_neuron(&snapshot.neurons[0].id).unwrap().unwrap();
        assert!(!untouched.metadata.contains_key("tampered"));
    }

    #[test]
    fn importer_tolerates_unknown_keys() {
        let store = seeded_store();
        let snapshot = export(&store);
        let mut value = serde_json::to_value(&snapshot).unwrap();
        value["futureField"] = serde_json::json!({"anything": 1});

        let parsed: Snapshot = serde_json::from_value(value).unwrap();
        assert!(parsed.extra.contains_key("futureField"));

        let target = SqliteStore::in_memory().unwrap();
        import_snapshot(&target, &parsed, MergeStrategy::Overwrite).unwrap();
        assert_eq!(target.count_neurons().unwrap(), 2);
    }

    #[test]
    fn snapshot_json_is_deterministic() {
        let store = seeded_store();
        let at = Utc::now();
        let a = SnapshotExporter::new(&store, "brain-1", at, false)
            .collect()
            .unwrap();
        let b = SnapshotExporter::new(&store, "brain-1", at, false)
            .collect()
            .unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}
