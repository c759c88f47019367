//! SQL schema definitions.

/// Complete schema for the Veil client-core database.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Service-node pool & swarms
-- ============================================================

CREATE TABLE IF NOT EXISTS snode_pool (
    ip TEXT NOT NULL,
    port INTEGER NOT NULL,
    ed25519_pub TEXT NOT NULL,
    x25519_pub TEXT NOT NULL,
    PRIMARY KEY (ip, port)
);

CREATE TABLE IF NOT EXISTS swarm (
    recipient TEXT NOT NULL,
    ip TEXT NOT NULL,
    port INTEGER NOT NULL,
    ed25519_pub TEXT NOT NULL,
    x25519_pub TEXT NOT NULL,
    PRIMARY KEY (recipient, ip, port)
);

CREATE INDEX IF NOT EXISTS idx_swarm_recipient ON swarm(recipient);

-- ============================================================
-- Onion paths
-- ============================================================

CREATE TABLE IF NOT EXISTS onion_path (
    path_index INTEGER NOT NULL,
    hop_index INTEGER NOT NULL,
    ip TEXT NOT NULL,
    port INTEGER NOT NULL,
    ed25519_pub TEXT NOT NULL,
    x25519_pub TEXT NOT NULL,
    PRIMARY KEY (path_index, hop_index)
);

-- ============================================================
-- Per-namespace polling state
-- ============================================================

CREATE TABLE IF NOT EXISTS received_message (
    recipient TEXT NOT NULL,
    namespace INTEGER NOT NULL,
    snode_ed25519 TEXT NOT NULL,
    hash TEXT NOT NULL,
    expires_at_ms INTEGER NOT NULL,
    PRIMARY KEY (recipient, namespace, snode_ed25519)
);

CREATE INDEX IF NOT EXISTS idx_received_expiry ON received_message(expires_at_ms);

-- ============================================================
-- Settings (clock offset, refresh timestamps, fork versions)
-- ============================================================

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- ============================================================
-- Job scheduler
-- ============================================================

-- AUTOINCREMENT so deleted job ids are never reissued.
CREATE TABLE IF NOT EXISTS job (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    variant TEXT NOT NULL,
    behavior TEXT NOT NULL,
    should_block INTEGER NOT NULL DEFAULT 0,
    priority INTEGER NOT NULL DEFAULT 0,
    failure_count INTEGER NOT NULL DEFAULT 0,
    next_run_timestamp INTEGER NOT NULL DEFAULT 0,
    thread_id TEXT,
    interaction_id INTEGER,
    details BLOB,
    should_skip_launch_become_active INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_job_variant ON job(variant);
CREATE INDEX IF NOT EXISTS idx_job_behavior ON job(behavior);
CREATE INDEX IF NOT EXISTS idx_job_next_run ON job(next_run_timestamp);

CREATE TABLE IF NOT EXISTS job_dependency (
    job_id INTEGER NOT NULL REFERENCES job(id) ON DELETE CASCADE,
    depends_on_id INTEGER NOT NULL REFERENCES job(id) ON DELETE CASCADE,
    PRIMARY KEY (job_id, depends_on_id)
);

CREATE INDEX IF NOT EXISTS idx_job_dependency_reverse ON job_dependency(depends_on_id);
"#;
