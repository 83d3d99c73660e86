//! Canonical SQLite schema for the derived-state store.
//!
//! Three consolidators share one database:
//! - `document_versions` keeps the bounded, time-coalesced version history
//! - `reference_links` keeps the reconciled cross-reference set, with
//!   `reference_sync` persisting the per-(document, kind)
//!   "has ever been reconciled" flag
//! - `recent_visits` keeps the capped per-user recency index
//! - `store_meta` tracks the schema version for operational introspection

/// Migration v1: derived-state tables plus store metadata.
pub const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS document_versions (
    version_id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id TEXT NOT NULL CHECK (length(trim(document_id)) > 0),
    content_json TEXT NOT NULL,
    content_html TEXT NOT NULL,
    content_text TEXT NOT NULL,
    saved_by TEXT NOT NULL CHECK (length(trim(saved_by)) > 0),
    saved_at_us INTEGER NOT NULL,
    created_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS reference_links (
    link_id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id TEXT NOT NULL CHECK (length(trim(document_id)) > 0),
    reference_kind TEXT NOT NULL CHECK (reference_kind IN ('user', 'issue', 'page')),
    reference_id TEXT NOT NULL CHECK (length(trim(reference_id)) > 0),
    target_entity_id TEXT NOT NULL,
    target_kind TEXT NOT NULL
        CHECK (target_kind IN ('issue', 'page', 'project', 'cycle', 'module', 'view')),
    created_at_us INTEGER NOT NULL,
    UNIQUE (document_id, reference_kind, reference_id)
);

CREATE TABLE IF NOT EXISTS reference_sync (
    document_id TEXT NOT NULL,
    reference_kind TEXT NOT NULL CHECK (reference_kind IN ('user', 'issue', 'page')),
    first_synced_at_us INTEGER NOT NULL,
    PRIMARY KEY (document_id, reference_kind)
);

CREATE TABLE IF NOT EXISTS recent_visits (
    visit_id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL CHECK (length(trim(user_id)) > 0),
    scope_id TEXT NOT NULL CHECK (length(trim(scope_id)) > 0),
    entity_kind TEXT NOT NULL
        CHECK (entity_kind IN ('issue', 'page', 'project', 'cycle', 'module', 'view')),
    entity_id TEXT NOT NULL CHECK (length(trim(entity_id)) > 0),
    bucket TEXT NOT NULL CHECK (bucket IN ('issues', 'pages', 'general')),
    visited_at_us INTEGER NOT NULL,
    created_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL
);

INSERT OR IGNORE INTO store_meta (id, schema_version) VALUES (1, 1);
"#;

/// Migration v2: read-path and eviction-path indexes.
pub const MIGRATION_V2_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_versions_doc_saved
    ON document_versions(document_id, saved_at_us DESC, version_id DESC);

CREATE INDEX IF NOT EXISTS idx_links_doc_kind_ref
    ON reference_links(document_id, reference_kind, reference_id);

CREATE INDEX IF NOT EXISTS idx_visits_user_scope_bucket
    ON recent_visits(user_id, scope_id, bucket, visited_at_us);

CREATE INDEX IF NOT EXISTS idx_visits_user_scope_entity
    ON recent_visits(user_id, scope_id, entity_kind, entity_id);

UPDATE store_meta
SET schema_version = 2
WHERE id = 1;
"#;

/// Indexes expected by list/eviction query paths.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_versions_doc_saved",
    "idx_links_doc_kind_ref",
    "idx_visits_user_scope_bucket",
    "idx_visits_user_scope_entity",
];
