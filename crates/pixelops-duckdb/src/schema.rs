/// DuckDB initialization SQL.
///
/// Executed once at database open time via `Connection::execute_batch`.
/// All statements use `IF NOT EXISTS` so they are safe to re-run on every
/// startup.
///
/// `memory_limit` comes from `Config.duckdb_memory_limit`
/// (env `PIXELOPS_DUCKDB_MEMORY`, default `"1GB"`).
///
/// Indexes only cover columns that are never updated. DuckDB rewrites an
/// UPDATE of an indexed column as delete + insert, which trips unique
/// constraints inside a transaction.
pub fn init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

-- ===========================================
-- PIXELS (owned by the CRUD layer; counters owned here)
-- ===========================================
CREATE TABLE IF NOT EXISTS pixels (
    id                  VARCHAR PRIMARY KEY,
    workspace_id        VARCHAR NOT NULL,
    name                VARCHAR NOT NULL,
    status              VARCHAR NOT NULL DEFAULT 'active',   -- 'active' | 'inactive' | 'error'
    status_reason       VARCHAR,                             -- 'inactivity' when parked by cleanup
    events_count        BIGINT NOT NULL DEFAULT 0,
    conversions_count   BIGINT NOT NULL DEFAULT 0,
    revenue_total       DOUBLE NOT NULL DEFAULT 0,
    last_activity       TIMESTAMP,
    created_at          TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_pixels_workspace ON pixels(workspace_id);

-- ===========================================
-- EVENTS
-- ===========================================
CREATE TABLE IF NOT EXISTS events (
    id                  VARCHAR PRIMARY KEY,                 -- UUID v4
    pixel_id            VARCHAR NOT NULL,
    event_name          VARCHAR NOT NULL,
    event_type          VARCHAR NOT NULL,                    -- 'standard' | 'custom'
    parameters          VARCHAR NOT NULL DEFAULT '{{}}',     -- JSON object
    source              VARCHAR NOT NULL,                    -- 'web' | 'server' | 'mobile'
    created_at          TIMESTAMP NOT NULL,                  -- event timestamp (UTC)
    processing_state    VARCHAR NOT NULL DEFAULT 'pending',  -- 'pending' | 'processed' | 'failed'
    error_reason        VARCHAR,
    processed_at        TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_events_pixel_time ON events(pixel_id, created_at);

-- ===========================================
-- CONVERSIONS
-- ===========================================
CREATE TABLE IF NOT EXISTS conversions (
    id                  VARCHAR PRIMARY KEY,
    pixel_id            VARCHAR NOT NULL,
    name                VARCHAR NOT NULL,
    event_name          VARCHAR NOT NULL,
    rules               VARCHAR NOT NULL DEFAULT '[]',       -- JSON array of rules
    conversion_rate     DOUBLE NOT NULL DEFAULT 0,
    total_conversions   BIGINT NOT NULL DEFAULT 0,
    total_value         DOUBLE NOT NULL DEFAULT 0,
    average_value       DOUBLE NOT NULL DEFAULT 0,
    updated_at          TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_conversions_pixel ON conversions(pixel_id);

-- ===========================================
-- DIAGNOSTICS (upsert key: pixel_id + title)
-- ===========================================
CREATE TABLE IF NOT EXISTS diagnostics (
    id                  VARCHAR PRIMARY KEY,
    pixel_id            VARCHAR NOT NULL,
    severity            VARCHAR NOT NULL,                    -- 'error' | 'warning' | 'info' | 'success'
    category            VARCHAR NOT NULL,                    -- 'implementation' | 'events' | 'performance' | 'connection'
    title               VARCHAR NOT NULL,
    description         VARCHAR NOT NULL,
    status              VARCHAR NOT NULL DEFAULT 'active',   -- 'active' | 'resolved'
    last_checked_at     TIMESTAMP NOT NULL,
    created_at          TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    resolved_at         TIMESTAMP,
    UNIQUE (pixel_id, title)
);
"#
    )
}
