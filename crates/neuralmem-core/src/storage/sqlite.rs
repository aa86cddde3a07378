//! SQLite storage implementation.
//!
//! One database file per brain. Separate writer and reader connections
//! behind mutexes make the store `Send + Sync`; WAL mode gives one writer
//! plus parallel readers. All multi-row writes go through transactions, and
//! a retrieval's deferred batch is applied in a single transaction.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension, Row};
use uuid::Uuid;

use super::deferred::DeferredBatch;
use super::migrations;
use crate::core::{
    Brain, Direction, Fiber, Maturation, MaturationStage, MemoryType, Metadata, Neuron,
    NeuronState, NeuronType, Synapse, SynapseType,
};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Storage error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Row not found
    #[error("not found: {0}")]
    NotFound(String),
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Contention that survived the retry budget
    #[error("busy: {0}")]
    Busy(String),
    /// Broken schema or unparseable row
    #[error("corrupt data: {0}")]
    Corrupt(String),
    /// Initialization error
    #[error("initialization error: {0}")]
    Init(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Corrupt(err.to_string())
    }
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

/// Write retries before surfacing `Busy`.
const WRITE_RETRIES: u32 = 3;

// ============================================================================
// ROW MAPPING
// ============================================================================

fn conv_err(err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(err))
}

fn parse_ts(s: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(conv_err)
}

fn parse_ts_opt(s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(parse_ts).transpose()
}

fn parse_json<T: serde::de::DeserializeOwned>(s: String) -> rusqlite::Result<T> {
    serde_json::from_str(&s).map_err(conv_err)
}

const NEURON_COLS: &str = "id, neuron_type, content, metadata, created_at, content_hash";

fn neuron_from_row(row: &Row<'_>) -> rusqlite::Result<Neuron> {
    Ok(Neuron {
        id: row.get(0)?,
        neuron_type: NeuronType::parse_name(&row.get::<_, String>(1)?),
        content: row.get(2)?,
        metadata: parse_json::<Metadata>(row.get(3)?)?,
        created_at: parse_ts(row.get(4)?)?,
        content_hash: row.get::<_, Option<i64>>(5)?.map(|h| h as u64),
    })
}

const STATE_COLS: &str = "neuron_id, activation_level, access_frequency, last_activated, \
     decay_rate, firing_threshold, refractory_until, refractory_period_ms, \
     homeostatic_target, created_at";

fn state_from_row(row: &Row<'_>) -> rusqlite::Result<NeuronState> {
    Ok(NeuronState {
        neuron_id: row.get(0)?,
        activation_level: row.get(1)?,
        access_frequency: row.get::<_, i64>(2)? as u32,
        last_activated: parse_ts_opt(row.get(3)?)?,
        decay_rate: row.get(4)?,
        firing_threshold: row.get(5)?,
        refractory_until: parse_ts_opt(row.get(6)?)?,
        refractory_period_ms: row.get(7)?,
        homeostatic_target: row.get(8)?,
        created_at: parse_ts(row.get(9)?)?,
    })
}

const SYNAPSE_COLS: &str = "id, source_id, target_id, synapse_type, weight, direction, \
     metadata, reinforced_count, last_activated, created_at";

fn synapse_from_row(row: &Row<'_>) -> rusqlite::Result<Synapse> {
    Ok(Synapse {
        id: row.get(0)?,
        source_id: row.get(1)?,
        target_id: row.get(2)?,
        synapse_type: SynapseType::parse_name(&row.get::<_, String>(3)?),
        weight: row.get(4)?,
        direction: Direction::parse_name(&row.get::<_, String>(5)?),
        metadata: parse_json::<Metadata>(row.get(6)?)?,
        reinforced_count: row.get::<_, i64>(7)? as u32,
        last_activated: parse_ts_opt(row.get(8)?)?,
        created_at: parse_ts(row.get(9)?)?,
    })
}

const FIBER_COLS: &str = "id, neuron_ids, synapse_ids, anchor_neuron_id, summary, salience, \
     frequency, time_start, time_end, metadata, created_at, pathway, conductivity, \
     last_conducted, auto_tags, agent_tags";

fn fiber_from_row(row: &Row<'_>) -> rusqlite::Result<Fiber> {
    Ok(Fiber {
        id: row.get(0)?,
        neuron_ids: parse_json(row.get(1)?)?,
        synapse_ids: parse_json(row.get(2)?)?,
        anchor_neuron_id: row.get(3)?,
        summary: row.get(4)?,
        salience: row.get(5)?,
        frequency: row.get::<_, i64>(6)? as u32,
        time_start: parse_ts_opt(row.get(7)?)?,
        time_end: parse_ts_opt(row.get(8)?)?,
        metadata: parse_json::<Metadata>(row.get(9)?)?,
        created_at: parse_ts(row.get(10)?)?,
        pathway: parse_json(row.get(11)?)?,
        conductivity: row.get(12)?,
        last_conducted: parse_ts_opt(row.get(13)?)?,
        auto_tags: parse_json(row.get(14)?)?,
        agent_tags: parse_json(row.get(15)?)?,
    })
}

const MATURATION_COLS: &str =
    "fiber_id, stage, reinforcement_count, reinforcement_days, stage_entered_at, created_at";

fn maturation_from_row(row: &Row<'_>) -> rusqlite::Result<Maturation> {
    let days: Vec<String> = parse_json(row.get(3)?)?;
    let reinforcement_days = days
        .iter()
        .map(|d| d.parse::<NaiveDate>().map_err(conv_err))
        .collect::<rusqlite::Result<_>>()?;
    Ok(Maturation {
        fiber_id: row.get(0)?,
        stage: MaturationStage::parse_name(&row.get::<_, String>(1)?),
        reinforcement_count: row.get::<_, i64>(2)? as u32,
        reinforcement_days,
        stage_entered_at: parse_ts(row.get(4)?)?,
        created_at: parse_ts(row.get(5)?)?,
    })
}

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

fn ts_opt(t: Option<DateTime<Utc>>) -> Option<String> {
    t.map(ts)
}

fn placeholders(n: usize) -> String {
    let mut s = String::with_capacity(n * 2);
    for i in 0..n {
        if i > 0 {
            s.push(',');
        }
        s.push('?');
    }
    s
}

// ============================================================================
// SUPPORTING TYPES
// ============================================================================

/// Filters for neuron listing.
#[derive(Debug, Clone, Default)]
pub struct NeuronFilter {
    pub neuron_type: Option<NeuronType>,
    pub content_contains: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

/// Aggregated co-activation pair count inside a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoActivationCount {
    pub neuron_a: String,
    pub neuron_b: String,
    pub count: u32,
}

/// One recorded agent action, for workflow mining.
#[derive(Debug, Clone)]
pub struct ActionEvent {
    pub session_id: String,
    pub action: String,
    pub tags: Vec<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Everything one encode produces, applied in a single transaction.
#[derive(Debug, Clone, Default)]
pub struct EncodeBatch {
    /// New or refreshed neurons (idempotent on id).
    pub neurons: Vec<Neuron>,
    /// States for new neurons.
    pub states: Vec<NeuronState>,
    /// New synapses.
    pub synapses: Vec<Synapse>,
    /// The assembled fiber, absent on the dedup path.
    pub fiber: Option<Fiber>,
    /// STM maturation record (or a reinforced one on the dedup path).
    pub maturation: Option<Maturation>,
    /// Memory-type row for the fiber.
    pub memory_type: Option<(String, MemoryType)>,
    /// Dispute markers on pre-existing neurons.
    pub neuron_metadata: Vec<(String, Metadata)>,
    /// Dispute markers on pre-existing synapses.
    pub synapse_metadata: Vec<(String, Metadata)>,
    /// Existing fibers touched by dedup reinforcement.
    pub fiber_updates: Vec<Fiber>,
}

/// Row counts and aggregates for stats and health reporting.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub neurons: u64,
    pub synapses: u64,
    pub fibers: u64,
    pub avg_activation: f64,
    pub avg_synapse_weight: f64,
    pub disputed_neurons: u64,
    pub inferred_synapses: u64,
    pub stage_counts: std::collections::BTreeMap<String, u64>,
    pub schema_version: u32,
}

// ============================================================================
// STORE
// ============================================================================

/// SQLite-backed store for one brain.
///
/// All methods take `&self`; interior mutability comes from the connection
/// mutexes, so callers can share an `Arc<SqliteStore>` freely.
pub struct SqliteStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open (or create) a brain database at `path` and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let writer = Connection::open(&path)?;
        Self::configure_connection(&writer)?;
        migrations::apply_migrations(&writer)?;

        let reader = Connection::open(&path)?;
        Self::configure_connection(&reader)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            path: Some(path),
        })
    }

    /// In-memory store for tests: same contract, shared-cache database so
    /// the writer and reader connections see one graph.
    pub fn in_memory() -> Result<Self> {
        let uri = format!("file:neuralmem_{}?mode=memory&cache=shared", Uuid::new_v4());
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let writer = Connection::open_with_flags(&uri, flags)?;
        writer.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::apply_migrations(&writer)?;

        let reader = Connection::open_with_flags(&uri, flags)?;
        reader.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            path: None,
        })
    }

    /// Database file location, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn write_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| StorageError::Init("writer lock poisoned".into()))
    }

    fn read_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| StorageError::Init("reader lock poisoned".into()))
    }

    /// Run a write closure with retry on lock contention.
    fn with_write<T>(&self, mut op: impl FnMut(&mut Connection) -> rusqlite::Result<T>) -> Result<T> {
        let mut conn = self.write_conn()?;
        let mut delay_ms = 10u64;
        for attempt in 0..=WRITE_RETRIES {
            match op(&mut conn) {
                Ok(v) => return Ok(v),
                Err(err) if is_busy(&err) && attempt < WRITE_RETRIES => {
                    std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                    delay_ms *= 2;
                }
                Err(err) if is_busy(&err) => {
                    return Err(StorageError::Busy(err.to_string()));
                }
                Err(err) => return Err(err.into()),
            }
        }
        unreachable!("retry loop always returns")
    }

    /// Current schema version.
    pub fn schema_version(&self) -> Result<u32> {
        let conn = self.read_conn()?;
        Ok(migrations::get_current_version(&conn)?)
    }

    // ========================================================================
    // BRAIN
    // ========================================================================

    pub fn save_brain(&self, brain: &Brain) -> Result<()> {
        let config = serde_json::to_string(&brain.config)?;
        self.with_write(|conn| {
            conn.execute(
                "INSERT INTO brain_meta (id, name, config, created_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name, config = excluded.config",
                params![brain.id, brain.name, config, ts(brain.created_at)],
            )?;
            Ok(())
        })
    }

    pub fn load_brain(&self) -> Result<Option<Brain>> {
        let conn = self.read_conn()?;
        let row = conn
            .query_row(
                "SELECT id, name, config, created_at FROM brain_meta LIMIT 1",
                [],
                |row| {
                    Ok(Brain {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        config: parse_json(row.get(2)?)?,
                        created_at: parse_ts(row.get(3)?)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    // ========================================================================
    // NEURONS
    // ========================================================================

    /// Idempotent on id: re-adding refreshes metadata and content hash.
    pub fn add_neuron(&self, neuron: &Neuron) -> Result<()> {
        let metadata = serde_json::to_string(&neuron.metadata)?;
        self.with_write(|conn| {
            conn.execute(
                "INSERT INTO neurons (id, neuron_type, content, canonical, metadata, created_at, content_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                     metadata = excluded.metadata,
                     content_hash = excluded.content_hash",
                params![
                    neuron.id,
                    neuron.neuron_type.as_str(),
                    neuron.content,
                    neuron.canonical_content(),
                    metadata,
                    ts(neuron.created_at),
                    neuron.content_hash.map(|h| h as i64),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_neuron(&self, id: &str) -> Result<Option<Neuron>> {
        let conn = self.read_conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {NEURON_COLS} FROM neurons WHERE id = ?1"),
                params![id],
                neuron_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Batched id lookup.
    pub fn get_neurons(&self, ids: &[String]) -> Result<Vec<Neuron>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.read_conn()?;
        let sql = format!(
            "SELECT {NEURON_COLS} FROM neurons WHERE id IN ({})",
            placeholders(ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(ids.iter()), neuron_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Equality lookup on `(type, canonical content)`.
    pub fn find_neuron_by_content(
        &self,
        neuron_type: NeuronType,
        canonical: &str,
    ) -> Result<Option<Neuron>> {
        let conn = self.read_conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {NEURON_COLS} FROM neurons
                     WHERE neuron_type = ?1 AND canonical = ?2 LIMIT 1"
                ),
                params![neuron_type.as_str(), canonical],
                neuron_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// All neurons within `max_distance` Hamming bits of `hash`.
    /// The candidate set (hash-bearing neurons) is filtered in memory.
    pub fn find_neurons_by_hash(&self, hash: u64, max_distance: u32) -> Result<Vec<Neuron>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {NEURON_COLS} FROM neurons WHERE content_hash IS NOT NULL"
        ))?;
        let rows = stmt
            .query_map([], neuron_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows
            .into_iter()
            .filter(|n| {
                n.content_hash
                    .map(|h| (h ^ hash).count_ones() <= max_distance)
                    .unwrap_or(false)
            })
            .collect())
    }

    /// Substring search over canonical content.
    pub fn find_neurons_containing(&self, substring: &str, limit: usize) -> Result<Vec<Neuron>> {
        let pattern = format!("%{}%", substring.to_lowercase().replace('%', ""));
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {NEURON_COLS} FROM neurons WHERE canonical LIKE ?1 ORDER BY id LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![pattern, limit as i64], neuron_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Filtered listing for the public `list_neurons` operation.
    pub fn list_neurons(&self, filter: &NeuronFilter) -> Result<Vec<Neuron>> {
        use rusqlite::types::Value;

        let mut sql = format!("SELECT {NEURON_COLS} FROM neurons WHERE 1=1");
        let mut args: Vec<Value> = Vec::new();
        if let Some(t) = filter.neuron_type {
            sql.push_str(" AND neuron_type = ?");
            args.push(Value::Text(t.as_str().to_string()));
        }
        if let Some(ref contains) = filter.content_contains {
            sql.push_str(" AND canonical LIKE ?");
            args.push(Value::Text(format!(
                "%{}%",
                contains.to_lowercase().replace('%', "")
            )));
        }
        sql.push_str(" ORDER BY created_at, id LIMIT ? OFFSET ?");
        let limit = if filter.limit == 0 { 100 } else { filter.limit };
        args.push(Value::Integer(limit as i64));
        args.push(Value::Integer(filter.offset as i64));

        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(args), neuron_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Paged scan, for export cursors.
    pub fn all_neurons(&self, offset: u64, limit: u64) -> Result<Vec<Neuron>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {NEURON_COLS} FROM neurons ORDER BY id LIMIT ?1 OFFSET ?2"
        ))?;
        let rows = stmt
            .query_map(params![limit as i64, offset as i64], neuron_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn update_neuron_metadata(&self, id: &str, metadata: &Metadata) -> Result<()> {
        let json = serde_json::to_string(metadata)?;
        let changed = self.with_write(|conn| {
            conn.execute(
                "UPDATE neurons SET metadata = ?2 WHERE id = ?1",
                params![id, json],
            )
        })?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("neuron {id}")));
        }
        Ok(())
    }

    pub fn delete_neuron(&self, id: &str) -> Result<()> {
        self.with_write(|conn| {
            conn.execute("DELETE FROM neurons WHERE id = ?1", params![id])?;
            Ok(())
        })
    }

    pub fn count_neurons(&self) -> Result<u64> {
        let conn = self.read_conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM neurons", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    // ========================================================================
    // NEURON STATES
    // ========================================================================

    pub fn get_state(&self, neuron_id: &str) -> Result<Option<NeuronState>> {
        let conn = self.read_conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {STATE_COLS} FROM neuron_states WHERE neuron_id = ?1"),
                params![neuron_id],
                state_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Batched state lookup keyed by neuron id.
    pub fn get_states(&self, ids: &[String]) -> Result<HashMap<String, NeuronState>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.read_conn()?;
        let sql = format!(
            "SELECT {STATE_COLS} FROM neuron_states WHERE neuron_id IN ({})",
            placeholders(ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(ids.iter()), state_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows.into_iter().map(|s| (s.neuron_id.clone(), s)).collect())
    }

    pub fn upsert_state(&self, state: &NeuronState) -> Result<()> {
        self.with_write(|conn| upsert_state_tx(conn, state))
    }

    /// Batch upsert inside one transaction.
    pub fn upsert_states(&self, states: &[NeuronState]) -> Result<()> {
        self.with_write(|conn| {
            let tx = conn.transaction()?;
            for state in states {
                upsert_state_tx(&tx, state)?;
            }
            tx.commit()
        })
    }

    pub fn all_states(&self, offset: u64, limit: u64) -> Result<Vec<NeuronState>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {STATE_COLS} FROM neuron_states ORDER BY neuron_id LIMIT ?1 OFFSET ?2"
        ))?;
        let rows = stmt
            .query_map(params![limit as i64, offset as i64], state_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ========================================================================
    // SYNAPSES
    // ========================================================================

    pub fn add_synapse(&self, synapse: &Synapse) -> Result<()> {
        let metadata = serde_json::to_string(&synapse.metadata)?;
        self.with_write(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO synapses
                 (id, source_id, target_id, synapse_type, weight, direction, metadata,
                  reinforced_count, last_activated, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    synapse.id,
                    synapse.source_id,
                    synapse.target_id,
                    synapse.synapse_type.as_str(),
                    synapse.weight,
                    synapse.direction.as_str(),
                    metadata,
                    synapse.reinforced_count as i64,
                    ts_opt(synapse.last_activated),
                    ts(synapse.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_synapse(&self, id: &str) -> Result<Option<Synapse>> {
        let conn = self.read_conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {SYNAPSE_COLS} FROM synapses WHERE id = ?1"),
                params![id],
                synapse_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_synapse_between(&self, source_id: &str, target_id: &str) -> Result<Option<Synapse>> {
        let conn = self.read_conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {SYNAPSE_COLS} FROM synapses
                     WHERE source_id = ?1 AND target_id = ?2
                     ORDER BY weight DESC LIMIT 1"
                ),
                params![source_id, target_id],
                synapse_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// All synapses touching any neuron in the set: one query, both
    /// directions. This is the spreading-activation hot path.
    pub fn synapses_for_neurons(&self, ids: &[String]) -> Result<Vec<Synapse>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.read_conn()?;
        let ph = placeholders(ids.len());
        let sql = format!(
            "SELECT {SYNAPSE_COLS} FROM synapses
             WHERE source_id IN ({ph}) OR target_id IN ({ph})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let args: Vec<&String> = ids.iter().chain(ids.iter()).collect();
        let rows = stmt
            .query_map(params_from_iter(args), synapse_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn outgoing_synapses(&self, source_id: &str) -> Result<Vec<Synapse>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SYNAPSE_COLS} FROM synapses WHERE source_id = ?1"
        ))?;
        let rows = stmt
            .query_map(params![source_id], synapse_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Inbound degree, for hub detection during pruning.
    pub fn incoming_count(&self, target_id: &str) -> Result<u64> {
        let conn = self.read_conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM synapses WHERE target_id = ?1",
            params![target_id],
            |r| r.get(0),
        )?;
        Ok(n as u64)
    }

    /// Atomic weight/reinforcement update. `last_activated` only moves
    /// forward.
    pub fn update_synapse(
        &self,
        id: &str,
        weight: f64,
        reinforced_count: u32,
        last_activated: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let changed = self.with_write(|conn| {
            conn.execute(
                "UPDATE synapses SET
                     weight = ?2,
                     reinforced_count = MAX(reinforced_count, ?3),
                     last_activated = CASE
                         WHEN ?4 IS NULL THEN last_activated
                         WHEN last_activated IS NULL OR last_activated < ?4 THEN ?4
                         ELSE last_activated
                     END
                 WHERE id = ?1",
                params![id, weight, reinforced_count as i64, ts_opt(last_activated)],
            )
        })?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("synapse {id}")));
        }
        Ok(())
    }

    pub fn update_synapse_metadata(&self, id: &str, metadata: &Metadata) -> Result<()> {
        let json = serde_json::to_string(metadata)?;
        let changed = self.with_write(|conn| {
            conn.execute(
                "UPDATE synapses SET metadata = ?2 WHERE id = ?1",
                params![id, json],
            )
        })?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("synapse {id}")));
        }
        Ok(())
    }

    pub fn delete_synapse(&self, id: &str) -> Result<()> {
        self.with_write(|conn| {
            conn.execute("DELETE FROM synapses WHERE id = ?1", params![id])?;
            Ok(())
        })
    }

    pub fn count_synapses(&self) -> Result<u64> {
        let conn = self.read_conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM synapses", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    pub fn all_synapses(&self, offset: u64, limit: u64) -> Result<Vec<Synapse>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SYNAPSE_COLS} FROM synapses ORDER BY id LIMIT ?1 OFFSET ?2"
        ))?;
        let rows = stmt
            .query_map(params![limit as i64, offset as i64], synapse_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn synapses_of_type(&self, synapse_type: SynapseType) -> Result<Vec<Synapse>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SYNAPSE_COLS} FROM synapses WHERE synapse_type = ?1"
        ))?;
        let rows = stmt
            .query_map(params![synapse_type.as_str()], synapse_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ========================================================================
    // FIBERS
    // ========================================================================

    pub fn add_fiber(&self, fiber: &Fiber) -> Result<()> {
        let row = FiberRow::encode(fiber)?;
        self.with_write(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO fibers
                 (id, neuron_ids, synapse_ids, anchor_neuron_id, summary, salience, frequency,
                  time_start, time_end, metadata, created_at, pathway, conductivity,
                  last_conducted, auto_tags, agent_tags)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    fiber.id,
                    row.neuron_ids,
                    row.synapse_ids,
                    fiber.anchor_neuron_id,
                    fiber.summary,
                    fiber.salience,
                    fiber.frequency as i64,
                    ts_opt(fiber.time_start),
                    ts_opt(fiber.time_end),
                    row.metadata,
                    ts(fiber.created_at),
                    row.pathway,
                    fiber.conductivity,
                    ts_opt(fiber.last_conducted),
                    row.auto_tags,
                    row.agent_tags,
                ],
            )?;
            Ok(())
        })
    }

    /// Full-row update (same SQL as add; fibers are replaced wholesale).
    pub fn update_fiber(&self, fiber: &Fiber) -> Result<()> {
        self.add_fiber(fiber)
    }

    pub fn get_fiber(&self, id: &str) -> Result<Option<Fiber>> {
        let conn = self.read_conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {FIBER_COLS} FROM fibers WHERE id = ?1"),
                params![id],
                fiber_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Single-query batch lookup: every fiber whose member set intersects
    /// `neuron_ids`.
    pub fn find_fibers_containing_any(&self, neuron_ids: &[String]) -> Result<Vec<Fiber>> {
        if neuron_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.read_conn()?;
        let sql = format!(
            "SELECT {FIBER_COLS} FROM fibers WHERE EXISTS (
                 SELECT 1 FROM json_each(fibers.neuron_ids)
                 WHERE json_each.value IN ({})
             ) ORDER BY salience DESC, id",
            placeholders(neuron_ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(neuron_ids.iter()), fiber_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Fibers carrying a tag (auto or agent).
    pub fn list_fibers_by_tag(&self, tag: &str) -> Result<Vec<Fiber>> {
        let conn = self.read_conn()?;
        let sql = format!(
            "SELECT {FIBER_COLS} FROM fibers WHERE
                 EXISTS (SELECT 1 FROM json_each(fibers.auto_tags) WHERE json_each.value = ?1)
                 OR EXISTS (SELECT 1 FROM json_each(fibers.agent_tags) WHERE json_each.value = ?1)
             ORDER BY salience DESC, id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![tag], fiber_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn delete_fiber(&self, id: &str) -> Result<()> {
        self.with_write(|conn| {
            conn.execute("DELETE FROM fibers WHERE id = ?1", params![id])?;
            Ok(())
        })
    }

    pub fn count_fibers(&self) -> Result<u64> {
        let conn = self.read_conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM fibers", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    pub fn all_fibers(&self, offset: u64, limit: u64) -> Result<Vec<Fiber>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FIBER_COLS} FROM fibers ORDER BY id LIMIT ?1 OFFSET ?2"
        ))?;
        let rows = stmt
            .query_map(params![limit as i64, offset as i64], fiber_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ========================================================================
    // TYPED MEMORIES
    // ========================================================================

    pub fn save_memory_type(&self, fiber_id: &str, memory_type: MemoryType) -> Result<()> {
        self.with_write(|conn| {
            conn.execute(
                "INSERT INTO typed_memories (fiber_id, memory_type, created_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(fiber_id) DO UPDATE SET memory_type = excluded.memory_type",
                params![fiber_id, memory_type.as_str(), ts(Utc::now())],
            )?;
            Ok(())
        })
    }

    pub fn get_memory_type(&self, fiber_id: &str) -> Result<Option<MemoryType>> {
        let conn = self.read_conn()?;
        let row: Option<String> = conn
            .query_row(
                "SELECT memory_type FROM typed_memories WHERE fiber_id = ?1",
                params![fiber_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(row.map(|s| MemoryType::parse_name(&s)))
    }

    pub fn all_memory_types(&self) -> Result<Vec<(String, MemoryType)>> {
        let conn = self.read_conn()?;
        let mut stmt =
            conn.prepare("SELECT fiber_id, memory_type FROM typed_memories ORDER BY fiber_id")?;
        let rows = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    MemoryType::parse_name(&r.get::<_, String>(1)?),
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ========================================================================
    // MATURATION
    // ========================================================================

    pub fn save_maturation(&self, maturation: &Maturation) -> Result<()> {
        let days: Vec<String> = maturation
            .reinforcement_days
            .iter()
            .map(NaiveDate::to_string)
            .collect();
        let days_json = serde_json::to_string(&days)?;
        self.with_write(|conn| {
            conn.execute(
                "INSERT INTO maturations
                 (fiber_id, stage, reinforcement_count, reinforcement_days, stage_entered_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(fiber_id) DO UPDATE SET
                     stage = excluded.stage,
                     reinforcement_count = excluded.reinforcement_count,
                     reinforcement_days = excluded.reinforcement_days,
                     stage_entered_at = excluded.stage_entered_at",
                params![
                    maturation.fiber_id,
                    maturation.stage.as_str(),
                    maturation.reinforcement_count as i64,
                    days_json,
                    ts(maturation.stage_entered_at),
                    ts(maturation.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_maturation(&self, fiber_id: &str) -> Result<Option<Maturation>> {
        let conn = self.read_conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {MATURATION_COLS} FROM maturations WHERE fiber_id = ?1"),
                params![fiber_id],
                maturation_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn find_maturations_by_stage(&self, stage: MaturationStage) -> Result<Vec<Maturation>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MATURATION_COLS} FROM maturations WHERE stage = ?1 ORDER BY fiber_id"
        ))?;
        let rows = stmt
            .query_map(params![stage.as_str()], maturation_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn all_maturations(&self) -> Result<Vec<Maturation>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MATURATION_COLS} FROM maturations ORDER BY fiber_id"
        ))?;
        let rows = stmt
            .query_map([], maturation_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ========================================================================
    // CO-ACTIVATION EVENTS
    // ========================================================================

    /// Record one co-activation. Pair order is canonicalized here so the
    /// CHECK constraint can never fire on engine input.
    pub fn record_co_activation(&self, a: &str, b: &str, at: DateTime<Utc>) -> Result<()> {
        if a == b {
            return Ok(());
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        self.with_write(|conn| {
            conn.execute(
                "INSERT INTO co_activation_events (neuron_a, neuron_b, occurred_on, occurred_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![first, second, at.date_naive().to_string(), ts(at)],
            )?;
            Ok(())
        })
    }

    /// Pair counts for events at or after `since`.
    pub fn co_activation_counts(&self, since: DateTime<Utc>) -> Result<Vec<CoActivationCount>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(
            "SELECT neuron_a, neuron_b, COUNT(*) FROM co_activation_events
             WHERE occurred_at >= ?1
             GROUP BY neuron_a, neuron_b
             ORDER BY COUNT(*) DESC, neuron_a, neuron_b",
        )?;
        let rows = stmt
            .query_map(params![ts(since)], |r| {
                Ok(CoActivationCount {
                    neuron_a: r.get(0)?,
                    neuron_b: r.get(1)?,
                    count: r.get::<_, i64>(2)? as u32,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Drop events older than `before`. Returns rows removed.
    pub fn prune_co_activations(&self, before: DateTime<Utc>) -> Result<u64> {
        let n = self.with_write(|conn| {
            conn.execute(
                "DELETE FROM co_activation_events WHERE occurred_at < ?1",
                params![ts(before)],
            )
        })?;
        Ok(n as u64)
    }

    // ========================================================================
    // ACTION EVENTS
    // ========================================================================

    pub fn record_action_event(
        &self,
        session_id: &str,
        action: &str,
        tags: &[String],
        at: DateTime<Utc>,
    ) -> Result<()> {
        let tags_json = serde_json::to_string(tags)?;
        self.with_write(|conn| {
            conn.execute(
                "INSERT INTO action_events (session_id, action, tags, occurred_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![session_id, action, tags_json, ts(at)],
            )?;
            Ok(())
        })
    }

    /// Events grouped by session, each session ordered by time.
    pub fn action_events_by_session(&self) -> Result<HashMap<String, Vec<ActionEvent>>> {
        let conn = self.read_conn()?;
        let mut stmt = conn.prepare(
            "SELECT session_id, action, tags, occurred_at FROM action_events
             ORDER BY session_id, occurred_at, id",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok(ActionEvent {
                    session_id: r.get(0)?,
                    action: r.get(1)?,
                    tags: parse_json(r.get(2)?)?,
                    occurred_at: parse_ts(r.get(3)?)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut grouped: HashMap<String, Vec<ActionEvent>> = HashMap::new();
        for event in rows {
            grouped.entry(event.session_id.clone()).or_default().push(event);
        }
        Ok(grouped)
    }

    pub fn prune_action_events(&self, before: DateTime<Utc>) -> Result<u64> {
        let n = self.with_write(|conn| {
            conn.execute(
                "DELETE FROM action_events WHERE occurred_at < ?1",
                params![ts(before)],
            )
        })?;
        Ok(n as u64)
    }

    // ========================================================================
    // CONSOLIDATION HISTORY
    // ========================================================================

    pub fn record_consolidation(
        &self,
        strategy: &str,
        dry_run: bool,
        duration_ms: u64,
        items_examined: u64,
        items_changed: u64,
        details: &[String],
    ) -> Result<()> {
        let details_json = serde_json::to_string(details)?;
        self.with_write(|conn| {
            conn.execute(
                "INSERT INTO consolidation_history
                 (strategy, dry_run, completed_at, duration_ms, items_examined, items_changed, details)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    strategy,
                    dry_run as i64,
                    ts(Utc::now()),
                    duration_ms as i64,
                    items_examined as i64,
                    items_changed as i64,
                    details_json,
                ],
            )?;
            Ok(())
        })
    }

    /// Timestamp of the most recent committed consolidation run.
    pub fn last_consolidation(&self) -> Result<Option<DateTime<Utc>>> {
        self.last_run_where("dry_run = 0", &[])
    }

    /// Timestamp of the most recent committed run of one strategy.
    pub fn last_consolidation_of(&self, strategy: &str) -> Result<Option<DateTime<Utc>>> {
        self.last_run_where("dry_run = 0 AND strategy = ?1", &[strategy])
    }

    fn last_run_where(&self, clause: &str, args: &[&str]) -> Result<Option<DateTime<Utc>>> {
        let conn = self.read_conn()?;
        let sql = format!(
            "SELECT completed_at FROM consolidation_history
             WHERE {clause} ORDER BY completed_at DESC LIMIT 1"
        );
        let row: Option<String> = conn
            .query_row(&sql, params_from_iter(args.iter()), |r| r.get(0))
            .optional()?;
        Ok(match row {
            Some(s) => Some(
                DateTime::parse_from_rfc3339(&s)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| StorageError::Corrupt(e.to_string()))?,
            ),
            None => None,
        })
    }

    // ========================================================================
    // DEFERRED BATCH
    // ========================================================================

    /// Apply a retrieval's deferred writes in one transaction.
    pub fn apply_deferred(&self, batch: &DeferredBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let when = ts(batch.applied_at);
        let day = batch.applied_at.date_naive().to_string();

        // Serialize ahead of the transaction so serde errors cannot leave it
        // half-applied.
        let mut maturation_rows = Vec::with_capacity(batch.maturation_updates.len());
        for m in &batch.maturation_updates {
            let days: Vec<String> = m.reinforcement_days.iter().map(NaiveDate::to_string).collect();
            maturation_rows.push((m, serde_json::to_string(&days)?));
        }

        self.with_write(|conn| {
            let tx = conn.transaction()?;

            for update in &batch.synapse_updates {
                tx.execute(
                    "UPDATE synapses SET
                         weight = ?2,
                         reinforced_count = reinforced_count + 1,
                         last_activated = CASE
                             WHEN last_activated IS NULL OR last_activated < ?3 THEN ?3
                             ELSE last_activated
                         END
                     WHERE id = ?1",
                    params![update.synapse_id, update.new_weight, when],
                )?;
            }

            for fiber_id in &batch.conductivity_bumps {
                tx.execute(
                    "UPDATE fibers SET
                         conductivity = MIN(1.0, conductivity + 0.02),
                         last_conducted = ?2,
                         frequency = frequency + 1
                     WHERE id = ?1",
                    params![fiber_id, when],
                )?;
            }

            for (a, b) in &batch.co_activations {
                tx.execute(
                    "INSERT INTO co_activation_events (neuron_a, neuron_b, occurred_on, occurred_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![a, b, day, when],
                )?;
            }

            for state in &batch.state_updates {
                upsert_state_tx(&tx, state)?;
            }

            for (m, days_json) in &maturation_rows {
                tx.execute(
                    "INSERT INTO maturations
                     (fiber_id, stage, reinforcement_count, reinforcement_days, stage_entered_at, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(fiber_id) DO UPDATE SET
                         stage = excluded.stage,
                         reinforcement_count = excluded.reinforcement_count,
                         reinforcement_days = excluded.reinforcement_days,
                         stage_entered_at = excluded.stage_entered_at",
                    params![
                        m.fiber_id,
                        m.stage.as_str(),
                        m.reinforcement_count as i64,
                        days_json,
                        ts(m.stage_entered_at),
                        ts(m.created_at),
                    ],
                )?;
            }

            tx.commit()
        })
    }

    // ========================================================================
    // ENCODE BATCH
    // ========================================================================

    /// Apply everything one encode produced in a single transaction, so a
    /// concurrent retrieval sees either the whole memory or none of it and
    /// a cancelled encode changes nothing.
    pub fn apply_encode(&self, batch: &EncodeBatch) -> Result<()> {
        // Serialize outside the transaction; serde failures must not leave
        // it half-applied.
        let mut neuron_rows = Vec::with_capacity(batch.neurons.len());
        for n in &batch.neurons {
            neuron_rows.push((n, serde_json::to_string(&n.metadata)?));
        }
        let mut synapse_rows = Vec::with_capacity(batch.synapses.len());
        for s in &batch.synapses {
            synapse_rows.push((s, serde_json::to_string(&s.metadata)?));
        }
        let mut metadata_rows = Vec::with_capacity(batch.neuron_metadata.len());
        for (id, m) in &batch.neuron_metadata {
            metadata_rows.push((id, serde_json::to_string(m)?));
        }
        let mut synapse_metadata_rows = Vec::with_capacity(batch.synapse_metadata.len());
        for (id, m) in &batch.synapse_metadata {
            synapse_metadata_rows.push((id, serde_json::to_string(m)?));
        }
        let fiber_rows: Vec<(&Fiber, FiberRow)> = {
            let mut rows = Vec::new();
            for f in batch.fiber.iter().chain(batch.fiber_updates.iter()) {
                rows.push((f, FiberRow::encode(f)?));
            }
            rows
        };
        let maturation_row = match &batch.maturation {
            Some(m) => {
                let days: Vec<String> =
                    m.reinforcement_days.iter().map(NaiveDate::to_string).collect();
                Some((m, serde_json::to_string(&days)?))
            }
            None => None,
        };

        self.with_write(|conn| {
            let tx = conn.transaction()?;

            for (n, metadata) in &neuron_rows {
                tx.execute(
                    "INSERT INTO neurons (id, neuron_type, content, canonical, metadata, created_at, content_hash)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(id) DO UPDATE SET
                         metadata = excluded.metadata,
                         content_hash = excluded.content_hash",
                    params![
                        n.id,
                        n.neuron_type.as_str(),
                        n.content,
                        n.canonical_content(),
                        metadata,
                        ts(n.created_at),
                        n.content_hash.map(|h| h as i64),
                    ],
                )?;
            }

            for state in &batch.states {
                upsert_state_tx(&tx, state)?;
            }

            for (s, metadata) in &synapse_rows {
                tx.execute(
                    "INSERT OR REPLACE INTO synapses
                     (id, source_id, target_id, synapse_type, weight, direction, metadata,
                      reinforced_count, last_activated, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        s.id,
                        s.source_id,
                        s.target_id,
                        s.synapse_type.as_str(),
                        s.weight,
                        s.direction.as_str(),
                        metadata,
                        s.reinforced_count as i64,
                        ts_opt(s.last_activated),
                        ts(s.created_at),
                    ],
                )?;
            }

            for (f, row) in &fiber_rows {
                tx.execute(
                    "INSERT OR REPLACE INTO fibers
                     (id, neuron_ids, synapse_ids, anchor_neuron_id, summary, salience, frequency,
                      time_start, time_end, metadata, created_at, pathway, conductivity,
                      last_conducted, auto_tags, agent_tags)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                    params![
                        f.id,
                        row.neuron_ids,
                        row.synapse_ids,
                        f.anchor_neuron_id,
                        f.summary,
                        f.salience,
                        f.frequency as i64,
                        ts_opt(f.time_start),
                        ts_opt(f.time_end),
                        row.metadata,
                        ts(f.created_at),
                        row.pathway,
                        f.conductivity,
                        ts_opt(f.last_conducted),
                        row.auto_tags,
                        row.agent_tags,
                    ],
                )?;
            }

            if let Some((m, days_json)) = &maturation_row {
                tx.execute(
                    "INSERT INTO maturations
                     (fiber_id, stage, reinforcement_count, reinforcement_days, stage_entered_at, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(fiber_id) DO UPDATE SET
                         stage = excluded.stage,
                         reinforcement_count = excluded.reinforcement_count,
                         reinforcement_days = excluded.reinforcement_days,
                         stage_entered_at = excluded.stage_entered_at",
                    params![
                        m.fiber_id,
                        m.stage.as_str(),
                        m.reinforcement_count as i64,
                        days_json,
                        ts(m.stage_entered_at),
                        ts(m.created_at),
                    ],
                )?;
            }

            if let Some((fiber_id, memory_type)) = &batch.memory_type {
                tx.execute(
                    "INSERT INTO typed_memories (fiber_id, memory_type, created_at)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(fiber_id) DO UPDATE SET memory_type = excluded.memory_type",
                    params![fiber_id, memory_type.as_str(), ts(Utc::now())],
                )?;
            }

            for (id, metadata) in &metadata_rows {
                tx.execute(
                    "UPDATE neurons SET metadata = ?2 WHERE id = ?1",
                    params![id, metadata],
                )?;
            }
            for (id, metadata) in &synapse_metadata_rows {
                tx.execute(
                    "UPDATE synapses SET metadata = ?2 WHERE id = ?1",
                    params![id, metadata],
                )?;
            }

            tx.commit()
        })
    }

    // ========================================================================
    // STATS
    // ========================================================================

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.read_conn()?;

        let neurons: i64 = conn.query_row("SELECT COUNT(*) FROM neurons", [], |r| r.get(0))?;
        let synapses: i64 = conn.query_row("SELECT COUNT(*) FROM synapses", [], |r| r.get(0))?;
        let fibers: i64 = conn.query_row("SELECT COUNT(*) FROM fibers", [], |r| r.get(0))?;
        let avg_activation: f64 = conn.query_row(
            "SELECT COALESCE(AVG(activation_level), 0.0) FROM neuron_states",
            [],
            |r| r.get(0),
        )?;
        let avg_synapse_weight: f64 = conn.query_row(
            "SELECT COALESCE(AVG(weight), 0.0) FROM synapses",
            [],
            |r| r.get(0),
        )?;
        let disputed_neurons: i64 = conn.query_row(
            "SELECT COUNT(*) FROM neurons WHERE json_extract(metadata, '$._disputed') = 1",
            [],
            |r| r.get(0),
        )?;
        let inferred_synapses: i64 = conn.query_row(
            "SELECT COUNT(*) FROM synapses WHERE json_extract(metadata, '$._inferred') = 1",
            [],
            |r| r.get(0),
        )?;

        let mut stage_counts = std::collections::BTreeMap::new();
        {
            let mut stmt =
                conn.prepare("SELECT stage, COUNT(*) FROM maturations GROUP BY stage")?;
            let rows = stmt
                .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for (stage, count) in rows {
                stage_counts.insert(stage, count as u64);
            }
        }

        let schema_version = migrations::get_current_version(&conn)?;

        Ok(StoreStats {
            neurons: neurons as u64,
            synapses: synapses as u64,
            fibers: fibers as u64,
            avg_activation,
            avg_synapse_weight,
            disputed_neurons: disputed_neurons as u64,
            inferred_synapses: inferred_synapses as u64,
            stage_counts,
            schema_version,
        })
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::DatabaseBusy
                || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

fn upsert_state_tx(conn: &Connection, state: &NeuronState) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO neuron_states
         (neuron_id, activation_level, access_frequency, last_activated, decay_rate,
          firing_threshold, refractory_until, refractory_period_ms, homeostatic_target, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(neuron_id) DO UPDATE SET
             activation_level = excluded.activation_level,
             access_frequency = MAX(access_frequency, excluded.access_frequency),
             last_activated = CASE
                 WHEN excluded.last_activated IS NULL THEN last_activated
                 WHEN last_activated IS NULL OR last_activated < excluded.last_activated
                     THEN excluded.last_activated
                 ELSE last_activated
             END,
             decay_rate = excluded.decay_rate,
             firing_threshold = excluded.firing_threshold,
             refractory_until = excluded.refractory_until,
             refractory_period_ms = excluded.refractory_period_ms,
             homeostatic_target = excluded.homeostatic_target",
        params![
            state.neuron_id,
            state.activation_level,
            state.access_frequency as i64,
            ts_opt(state.last_activated),
            state.decay_rate,
            state.firing_threshold,
            ts_opt(state.refractory_until),
            state.refractory_period_ms,
            state.homeostatic_target,
            ts(state.created_at),
        ],
    )?;
    Ok(())
}

struct FiberRow {
    neuron_ids: String,
    synapse_ids: String,
    metadata: String,
    pathway: String,
    auto_tags: String,
    agent_tags: String,
}

impl FiberRow {
    fn encode(fiber: &Fiber) -> Result<Self> {
        Ok(Self {
            neuron_ids: serde_json::to_string(&fiber.neuron_ids)?,
            synapse_ids: serde_json::to_string(&fiber.synapse_ids)?,
            metadata: serde_json::to_string(&fiber.metadata)?,
            pathway: serde_json::to_string(&fiber.pathway)?,
            auto_tags: serde_json::to_string(&fiber.auto_tags)?,
            agent_tags: serde_json::to_string(&fiber.agent_tags)?,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fiber::Fiber;
    use std::collections::BTreeSet;

    fn store() -> SqliteStore {
        SqliteStore::in_memory().unwrap()
    }

    fn neuron(content: &str, t: NeuronType) -> Neuron {
        Neuron::new(t, content)
    }

    #[test]
    fn open_file_backed_store_runs_migrations() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path().join("brain.db")).unwrap();
        assert_eq!(
            store.schema_version().unwrap(),
            migrations::MIGRATIONS.last().unwrap().version
        );
    }

    #[test]
    fn neuron_roundtrip_preserves_fields() {
        let store = store();
        let n = neuron("Alice", NeuronType::Entity)
            .with_content_hash(0xDEAD_BEEF_DEAD_BEEF)
            .with_metadata("_disputed", serde_json::Value::Bool(true));
        store.add_neuron(&n).unwrap();

        let back = store.get_neuron(&n.id).unwrap().unwrap();
        assert_eq!(back.content, "Alice");
        assert_eq!(back.neuron_type, NeuronType::Entity);
        assert_eq!(back.content_hash, Some(0xDEAD_BEEF_DEAD_BEEF));
        assert!(back.is_disputed());
    }

    #[test]
    fn add_neuron_is_idempotent_on_id() {
        let store = store();
        let n = neuron("Alice", NeuronType::Entity);
        store.add_neuron(&n).unwrap();
        store.add_neuron(&n).unwrap();
        assert_eq!(store.count_neurons().unwrap(), 1);
    }

    #[test]
    fn find_by_canonical_content() {
        let store = store();
        let n = neuron("  Coffee Shop ", NeuronType::Spatial);
        store.add_neuron(&n).unwrap();

        let found = store
            .find_neuron_by_content(NeuronType::Spatial, "coffee shop")
            .unwrap();
        assert_eq!(found.unwrap().id, n.id);

        let missing = store
            .find_neuron_by_content(NeuronType::Entity, "coffee shop")
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn hash_lookup_respects_hamming_radius() {
        let store = store();
        let a = neuron("db host", NeuronType::Concept).with_content_hash(0b1111);
        let b = neuron("unrelated", NeuronType::Concept).with_content_hash(u64::MAX);
        store.add_neuron(&a).unwrap();
        store.add_neuron(&b).unwrap();

        let near = store.find_neurons_by_hash(0b1011, 2).unwrap();
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].id, a.id);
    }

    #[test]
    fn synapse_update_is_monotone() {
        let store = store();
        let a = neuron("a", NeuronType::Entity);
        let b = neuron("b", NeuronType::Entity);
        store.add_neuron(&a).unwrap();
        store.add_neuron(&b).unwrap();

        let s = Synapse::new(&a.id, &b.id, SynapseType::CoOccurs, 0.5);
        store.add_synapse(&s).unwrap();

        let now = Utc::now();
        store.update_synapse(&s.id, 0.6, 1, Some(now)).unwrap();
        // A stale update must not move last_activated backwards or lower the count.
        store
            .update_synapse(&s.id, 0.65, 0, Some(now - chrono::Duration::hours(1)))
            .unwrap();

        let back = store.get_synapse(&s.id).unwrap().unwrap();
        assert_eq!(back.reinforced_count, 1);
        assert_eq!(back.last_activated.unwrap().timestamp(), now.timestamp());
    }

    #[test]
    fn synapses_for_neurons_batches_both_directions() {
        let store = store();
        let a = neuron("a", NeuronType::Entity);
        let b = neuron("b", NeuronType::Entity);
        let c = neuron("c", NeuronType::Entity);
        for n in [&a, &b, &c] {
            store.add_neuron(n).unwrap();
        }
        store
            .add_synapse(&Synapse::new(&a.id, &b.id, SynapseType::CoOccurs, 0.5))
            .unwrap();
        store
            .add_synapse(&Synapse::new(&c.id, &a.id, SynapseType::RelatedTo, 0.4))
            .unwrap();

        let touching = store.synapses_for_neurons(&[a.id.clone()]).unwrap();
        assert_eq!(touching.len(), 2);
    }

    fn sample_fiber(store: &SqliteStore) -> Fiber {
        let a = neuron("a", NeuronType::Entity);
        let b = neuron("b", NeuronType::Concept);
        store.add_neuron(&a).unwrap();
        store.add_neuron(&b).unwrap();
        let mut f = Fiber::create(
            BTreeSet::from([a.id.clone(), b.id.clone()]),
            BTreeSet::new(),
            a.id.clone(),
            vec![a.id.clone(), b.id.clone()],
            "a and b".into(),
        )
        .unwrap();
        f.auto_tags.insert("alpha".into());
        f.agent_tags.insert("beta".into());
        store.add_fiber(&f).unwrap();
        f
    }

    #[test]
    fn fiber_roundtrip_and_batch_lookup() {
        let store = store();
        let f = sample_fiber(&store);

        let back = store.get_fiber(&f.id).unwrap().unwrap();
        assert_eq!(back.pathway, f.pathway);
        assert_eq!(back.tags().len(), 2);

        let first_neuron = f.pathway[0].clone();
        let found = store.find_fibers_containing_any(&[first_neuron]).unwrap();
        assert_eq!(found.len(), 1);

        let by_tag = store.list_fibers_by_tag("alpha").unwrap();
        assert_eq!(by_tag.len(), 1);
        assert!(store.list_fibers_by_tag("missing").unwrap().is_empty());
    }

    #[test]
    fn co_activation_rows_are_canonical() {
        let store = store();
        let now = Utc::now();
        store.record_co_activation("zeta", "alpha", now).unwrap();
        store.record_co_activation("alpha", "zeta", now).unwrap();
        store.record_co_activation("same", "same", now).unwrap();

        let counts = store
            .co_activation_counts(now - chrono::Duration::days(1))
            .unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].neuron_a, "alpha");
        assert_eq!(counts[0].neuron_b, "zeta");
        assert_eq!(counts[0].count, 2);
    }

    #[test]
    fn co_activation_window_and_prune() {
        let store = store();
        let now = Utc::now();
        store
            .record_co_activation("a", "b", now - chrono::Duration::days(10))
            .unwrap();
        store.record_co_activation("a", "b", now).unwrap();

        let recent = store
            .co_activation_counts(now - chrono::Duration::days(7))
            .unwrap();
        assert_eq!(recent[0].count, 1);

        let pruned = store
            .prune_co_activations(now - chrono::Duration::days(7))
            .unwrap();
        assert_eq!(pruned, 1);
    }

    #[test]
    fn deferred_batch_applies_atomically() {
        let store = store();
        let f = sample_fiber(&store);
        let ids: Vec<String> = f.pathway.clone();
        let s = Synapse::new(&ids[0], &ids[1], SynapseType::CoOccurs, 0.5);
        store.add_synapse(&s).unwrap();

        let now = Utc::now();
        let mut batch = DeferredBatch::new(now);
        batch.synapse_updates.push(super::super::deferred::SynapseUpdate {
            synapse_id: s.id.clone(),
            new_weight: 0.75,
        });
        batch.conductivity_bumps.push(f.id.clone());
        batch.push_co_activation(&ids[0], &ids[1]);
        let mut state = NeuronState::new(&ids[0], 0.02);
        state.activation_level = 0.9;
        batch.state_updates.push(state);

        store.apply_deferred(&batch).unwrap();

        let s2 = store.get_synapse(&s.id).unwrap().unwrap();
        assert_eq!(s2.weight, 0.75);
        assert_eq!(s2.reinforced_count, 1);

        let f2 = store.get_fiber(&f.id).unwrap().unwrap();
        assert_eq!(f2.frequency, 1);
        assert!(f2.last_conducted.is_some());

        let st = store.get_state(&ids[0]).unwrap().unwrap();
        assert_eq!(st.activation_level, 0.9);

        let counts = store
            .co_activation_counts(now - chrono::Duration::days(1))
            .unwrap();
        assert_eq!(counts.len(), 1);
    }

    #[test]
    fn maturation_roundtrip_keeps_days() {
        let store = store();
        let f = sample_fiber(&store);
        let now = Utc::now();
        let mut m = Maturation::new(&f.id, now);
        m.reinforce(now);
        m.reinforce(now + chrono::Duration::days(2));
        store.save_maturation(&m).unwrap();

        let back = store.get_maturation(&f.id).unwrap().unwrap();
        assert_eq!(back.reinforcement_count, 2);
        assert_eq!(back.reinforcement_days.len(), 2);
        assert_eq!(back.stage, MaturationStage::Stm);
    }

    #[test]
    fn stats_aggregate_counts() {
        let store = store();
        let f = sample_fiber(&store);
        store.save_memory_type(&f.id, MemoryType::Decision).unwrap();
        store.save_maturation(&Maturation::new(&f.id, Utc::now())).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.neurons, 2);
        assert_eq!(stats.fibers, 1);
        assert_eq!(stats.stage_counts.get("stm"), Some(&1));
        assert_eq!(stats.schema_version, 9);
    }

    #[test]
    fn brain_meta_roundtrip() {
        let store = store();
        let brain = Brain::new("test-brain");
        store.save_brain(&brain).unwrap();
        let back = store.load_brain().unwrap().unwrap();
        assert_eq!(back.name, "test-brain");
        assert_eq!(back.config, brain.config);
    }
}
