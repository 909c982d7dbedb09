//! Table definitions. Safe to apply on every open.

use rusqlite::Connection;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS robots (
    id          TEXT PRIMARY KEY,
    entity_id   TEXT NOT NULL,
    upload_id   TEXT NOT NULL,
    data        TEXT NOT NULL,
    scraped     INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_robots_upload ON robots (upload_id);

CREATE TABLE IF NOT EXISTS sitemap_index (
    id             TEXT PRIMARY KEY,
    entity_id      TEXT NOT NULL,
    upload_id      TEXT NOT NULL,
    robots_id      TEXT NOT NULL,
    origin_id      TEXT,
    url            TEXT NOT NULL,
    last_modified  INTEGER,
    scraped        INTEGER NOT NULL DEFAULT 0,
    created_at     TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_sitemap_index_origin
    ON sitemap_index (upload_id, robots_id, origin_id);

CREATE TABLE IF NOT EXISTS sitemap_urlset (
    id             TEXT PRIMARY KEY,
    entity_id      TEXT NOT NULL,
    upload_id      TEXT NOT NULL,
    robots_id      TEXT NOT NULL,
    origin_id      TEXT,
    url            TEXT NOT NULL,
    last_modified  INTEGER,
    change_freq    TEXT,
    scraped        INTEGER NOT NULL DEFAULT 0,
    created_at     TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_sitemap_urlset_upload ON sitemap_urlset (upload_id);

CREATE TABLE IF NOT EXISTS staging (
    key         TEXT PRIMARY KEY,
    value       BLOB NOT NULL,
    expires_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS flows (
    flow_id     TEXT PRIMARY KEY,
    kind        TEXT NOT NULL,
    input       TEXT NOT NULL,
    state       TEXT NOT NULL,
    error       TEXT,
    outcome     TEXT,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_flows_state ON flows (state);

CREATE TABLE IF NOT EXISTS flow_steps (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    flow_id      TEXT NOT NULL,
    seq          INTEGER NOT NULL,
    step         TEXT NOT NULL,
    status       TEXT NOT NULL,
    attempt      INTEGER NOT NULL,
    output       TEXT,
    error        TEXT,
    recorded_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_flow_steps_flow ON flow_steps (flow_id, seq);
"#;

/// Create any missing tables and indexes.
pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}
