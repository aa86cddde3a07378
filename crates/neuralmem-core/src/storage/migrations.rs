//! Database migrations.
//!
//! Forward-only, additive schema migrations for the per-brain store. The
//! current version lives in `schema_version`; startup applies whatever is
//! pending in order.

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial graph schema: neurons, states, synapses, fibers",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Typed memories with per-type expiry",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "Action events for workflow detection",
        up: MIGRATION_V3_UP,
    },
    Migration {
        version: 4,
        description: "SimHash content fingerprints on neurons",
        up: MIGRATION_V4_UP,
    },
    Migration {
        version: 5,
        description: "Fiber conduction: pathway, conductivity, last_conducted",
        up: MIGRATION_V5_UP,
    },
    Migration {
        version: 6,
        description: "Maturation stages with spacing-effect day tracking",
        up: MIGRATION_V6_UP,
    },
    Migration {
        version: 7,
        description: "Co-activation events in canonical pair order",
        up: MIGRATION_V7_UP,
    },
    Migration {
        version: 8,
        description: "Consolidation run history",
        up: MIGRATION_V8_UP,
    },
    Migration {
        version: 9,
        description: "Split fiber tags into auto and agent sets",
        up: MIGRATION_V9_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Initial graph schema
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS brain_meta (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    config TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS neurons (
    id TEXT PRIMARY KEY,
    neuron_type TEXT NOT NULL,
    content TEXT NOT NULL,
    canonical TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_neurons_type_canonical ON neurons(neuron_type, canonical);
CREATE INDEX IF NOT EXISTS idx_neurons_canonical ON neurons(canonical);

CREATE TABLE IF NOT EXISTS neuron_states (
    neuron_id TEXT PRIMARY KEY REFERENCES neurons(id) ON DELETE CASCADE,
    activation_level REAL NOT NULL DEFAULT 0.0,
    access_frequency INTEGER NOT NULL DEFAULT 0,
    last_activated TEXT,
    decay_rate REAL NOT NULL DEFAULT 0.1,
    firing_threshold REAL NOT NULL DEFAULT 0.3,
    refractory_until TEXT,
    refractory_period_ms INTEGER NOT NULL DEFAULT 500,
    homeostatic_target REAL NOT NULL DEFAULT 0.5,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_states_activation ON neuron_states(activation_level);

CREATE TABLE IF NOT EXISTS synapses (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL REFERENCES neurons(id) ON DELETE CASCADE,
    target_id TEXT NOT NULL REFERENCES neurons(id) ON DELETE CASCADE,
    synapse_type TEXT NOT NULL,
    weight REAL NOT NULL DEFAULT 0.5,
    direction TEXT NOT NULL DEFAULT 'uni',
    metadata TEXT NOT NULL DEFAULT '{}',
    reinforced_count INTEGER NOT NULL DEFAULT 0,
    last_activated TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_synapses_source ON synapses(source_id);
CREATE INDEX IF NOT EXISTS idx_synapses_target ON synapses(target_id);
CREATE INDEX IF NOT EXISTS idx_synapses_pair ON synapses(source_id, target_id);

CREATE TABLE IF NOT EXISTS fibers (
    id TEXT PRIMARY KEY,
    neuron_ids TEXT NOT NULL DEFAULT '[]',
    synapse_ids TEXT NOT NULL DEFAULT '[]',
    anchor_neuron_id TEXT NOT NULL,
    summary TEXT NOT NULL DEFAULT '',
    salience REAL NOT NULL DEFAULT 0.5,
    frequency INTEGER NOT NULL DEFAULT 0,
    tags TEXT NOT NULL DEFAULT '[]',
    time_start TEXT,
    time_end TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_fibers_anchor ON fibers(anchor_neuron_id);
CREATE INDEX IF NOT EXISTS idx_fibers_salience ON fibers(salience);

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// V2: Typed memories
const MIGRATION_V2_UP: &str = r#"
CREATE TABLE IF NOT EXISTS typed_memories (
    fiber_id TEXT PRIMARY KEY REFERENCES fibers(id) ON DELETE CASCADE,
    memory_type TEXT NOT NULL DEFAULT 'fact',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_typed_memories_type ON typed_memories(memory_type);

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

/// V3: Action events for workflow detection
const MIGRATION_V3_UP: &str = r#"
CREATE TABLE IF NOT EXISTS action_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    action TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    occurred_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_action_events_session ON action_events(session_id);
CREATE INDEX IF NOT EXISTS idx_action_events_time ON action_events(occurred_at);

UPDATE schema_version SET version = 3, applied_at = datetime('now');
"#;

/// V4: SimHash fingerprints
const MIGRATION_V4_UP: &str = r#"
ALTER TABLE neurons ADD COLUMN content_hash INTEGER;

CREATE INDEX IF NOT EXISTS idx_neurons_content_hash ON neurons(content_hash);

UPDATE schema_version SET version = 4, applied_at = datetime('now');
"#;

/// V5: Fiber conduction pathway
const MIGRATION_V5_UP: &str = r#"
ALTER TABLE fibers ADD COLUMN pathway TEXT NOT NULL DEFAULT '[]';
ALTER TABLE fibers ADD COLUMN conductivity REAL NOT NULL DEFAULT 1.0;
ALTER TABLE fibers ADD COLUMN last_conducted TEXT;

UPDATE schema_version SET version = 5, applied_at = datetime('now');
"#;

/// V6: Maturation stages
const MIGRATION_V6_UP: &str = r#"
CREATE TABLE IF NOT EXISTS maturations (
    fiber_id TEXT PRIMARY KEY REFERENCES fibers(id) ON DELETE CASCADE,
    stage TEXT NOT NULL DEFAULT 'stm',
    reinforcement_count INTEGER NOT NULL DEFAULT 0,
    reinforcement_days TEXT NOT NULL DEFAULT '[]',
    stage_entered_at TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_maturations_stage ON maturations(stage);

UPDATE schema_version SET version = 6, applied_at = datetime('now');
"#;

/// V7: Co-activation events
/// Pair order is canonical (neuron_a < neuron_b) so counting is a plain
/// GROUP BY with no direction handling.
const MIGRATION_V7_UP: &str = r#"
CREATE TABLE IF NOT EXISTS co_activation_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    neuron_a TEXT NOT NULL,
    neuron_b TEXT NOT NULL,
    occurred_on TEXT NOT NULL,
    occurred_at TEXT NOT NULL,
    CHECK (neuron_a < neuron_b)
);

CREATE INDEX IF NOT EXISTS idx_co_activation_pair ON co_activation_events(neuron_a, neuron_b);
CREATE INDEX IF NOT EXISTS idx_co_activation_time ON co_activation_events(occurred_at);

UPDATE schema_version SET version = 7, applied_at = datetime('now');
"#;

/// V8: Consolidation run history
const MIGRATION_V8_UP: &str = r#"
CREATE TABLE IF NOT EXISTS consolidation_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    strategy TEXT NOT NULL,
    dry_run INTEGER NOT NULL DEFAULT 0,
    completed_at TEXT NOT NULL,
    duration_ms INTEGER NOT NULL DEFAULT 0,
    items_examined INTEGER NOT NULL DEFAULT 0,
    items_changed INTEGER NOT NULL DEFAULT 0,
    details TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS idx_consolidation_completed ON consolidation_history(completed_at);

UPDATE schema_version SET version = 8, applied_at = datetime('now');
"#;

/// V9: Split fiber tags into extraction-derived and agent-supplied sets.
/// Existing rows keep their tags as agent tags (the conservative reading:
/// they were supplied, not derived).
const MIGRATION_V9_UP: &str = r#"
ALTER TABLE fibers ADD COLUMN auto_tags TEXT NOT NULL DEFAULT '[]';
ALTER TABLE fibers ADD COLUMN agent_tags TEXT NOT NULL DEFAULT '[]';

UPDATE fibers SET agent_tags = tags WHERE tags != '[]';

UPDATE schema_version SET version = 9, applied_at = datetime('now');
"#;

/// Get current schema version from database
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply pending migrations, returning how many ran.
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_ordered_and_dense() {
        for (i, m) in MIGRATIONS.iter().enumerate() {
            assert_eq!(m.version, i as u32 + 1);
        }
    }

    #[test]
    fn fresh_database_migrates_to_latest() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let applied = apply_migrations(&conn).unwrap();
        assert_eq!(applied as usize, MIGRATIONS.len());
        assert_eq!(
            get_current_version(&conn).unwrap(),
            MIGRATIONS.last().unwrap().version
        );
    }

    #[test]
    fn reapplying_is_a_no_op() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();
        assert_eq!(apply_migrations(&conn).unwrap(), 0);
    }
}
