//! Read APIs over the derived-state store, consumed by the UI layer and
//! other features outside this crate.

use anyhow::{Context, Result};
use rusqlite::{Connection, Row, params, types::Type};

use crate::model::kind::{EntityKind, ReferenceKind};
use crate::model::records::{RecencyEntry, ReferenceLink, Snapshot, VersionRecord};

fn text_column_error(err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(err))
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<VersionRecord> {
    let content_json: String = row.get("content_json")?;
    let structured = serde_json::from_str(&content_json).map_err(text_column_error)?;

    Ok(VersionRecord {
        id: row.get("version_id")?,
        document_id: row.get("document_id")?,
        content: Snapshot {
            structured,
            html: row.get("content_html")?,
            text: row.get("content_text")?,
        },
        saved_by: row.get("saved_by")?,
        saved_at_us: row.get("saved_at_us")?,
        created_at_us: row.get("created_at_us")?,
    })
}

fn link_from_row(row: &Row<'_>) -> rusqlite::Result<ReferenceLink> {
    let kind: String = row.get("reference_kind")?;
    let target_kind: String = row.get("target_kind")?;

    Ok(ReferenceLink {
        id: row.get("link_id")?,
        source_document_id: row.get("document_id")?,
        reference_kind: kind.parse::<ReferenceKind>().map_err(text_column_error)?,
        reference_id: row.get("reference_id")?,
        target_entity_id: row.get("target_entity_id")?,
        target_kind: target_kind.parse::<EntityKind>().map_err(text_column_error)?,
        created_at_us: row.get("created_at_us")?,
    })
}

fn visit_from_row(row: &Row<'_>) -> rusqlite::Result<RecencyEntry> {
    let kind: String = row.get("entity_kind")?;

    Ok(RecencyEntry {
        id: row.get("visit_id")?,
        user_id: row.get("user_id")?,
        scope_id: row.get("scope_id")?,
        entity_kind: kind.parse::<EntityKind>().map_err(text_column_error)?,
        entity_id: row.get("entity_id")?,
        visited_at_us: row.get("visited_at_us")?,
        created_at_us: row.get("created_at_us")?,
    })
}

/// List retained versions for a document, newest first.
///
/// The retention policy bounds the result to at most `retention_limit`
/// rows; no additional limit is applied here.
///
/// # Errors
///
/// Returns an error if the query fails or a row cannot be decoded.
pub fn list_versions(conn: &Connection, document_id: &str) -> Result<Vec<VersionRecord>> {
    let mut stmt = conn
        .prepare(
            "SELECT version_id, document_id, content_json, content_html, content_text,
                    saved_by, saved_at_us, created_at_us
             FROM document_versions
             WHERE document_id = ?1
             ORDER BY saved_at_us DESC, version_id DESC",
        )
        .context("prepare list_versions")?;

    let rows = stmt
        .query_map(params![document_id], |row| version_from_row(row))
        .context("query list_versions")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("decode version rows")?;

    Ok(rows)
}

/// List the live reference set for `(document, kind)`.
///
/// # Errors
///
/// Returns an error if the query fails or a row cannot be decoded.
pub fn list_references(
    conn: &Connection,
    document_id: &str,
    kind: ReferenceKind,
) -> Result<Vec<ReferenceLink>> {
    let mut stmt = conn
        .prepare(
            "SELECT link_id, document_id, reference_kind, reference_id,
                    target_entity_id, target_kind, created_at_us
             FROM reference_links
             WHERE document_id = ?1 AND reference_kind = ?2
             ORDER BY reference_id",
        )
        .context("prepare list_references")?;

    let rows = stmt
        .query_map(params![document_id, kind.as_str()], |row| {
            link_from_row(row)
        })
        .context("query list_references")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("decode reference rows")?;

    Ok(rows)
}

/// List a user's recently-visited entities within a scope, most recent
/// first, optionally filtered to one entity kind.
///
/// # Errors
///
/// Returns an error if the query fails or a row cannot be decoded.
pub fn list_recent(
    conn: &Connection,
    user_id: &str,
    scope_id: &str,
    kind: Option<EntityKind>,
    limit: u32,
) -> Result<Vec<RecencyEntry>> {
    let mut stmt = conn
        .prepare(
            "SELECT visit_id, user_id, scope_id, entity_kind, entity_id,
                    visited_at_us, created_at_us
             FROM recent_visits
             WHERE user_id = ?1
               AND scope_id = ?2
               AND (?3 IS NULL OR entity_kind = ?3)
             ORDER BY visited_at_us DESC, visit_id DESC
             LIMIT ?4",
        )
        .context("prepare list_recent")?;

    let rows = stmt
        .query_map(
            params![user_id, scope_id, kind.map(EntityKind::as_str), limit],
            |row| visit_from_row(row),
        )
        .context("query list_recent")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("decode recent visit rows")?;

    Ok(rows)
}

/// Row counts removed by [`purge_document`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    pub versions: usize,
    pub links: usize,
    pub sync_flags: usize,
}

/// Delete every derived row for a document: versions, reference links,
/// and reconciliation flags. Run when the primary document is
/// hard-deleted upstream. Safe to re-invoke; the second call removes
/// nothing.
///
/// # Errors
///
/// Returns an error if the transaction fails.
pub fn purge_document(conn: &mut Connection, document_id: &str) -> Result<PurgeStats> {
    let tx = conn.transaction().context("begin purge transaction")?;

    let versions = tx
        .execute(
            "DELETE FROM document_versions WHERE document_id = ?1",
            params![document_id],
        )
        .context("purge document versions")?;
    let links = tx
        .execute(
            "DELETE FROM reference_links WHERE document_id = ?1",
            params![document_id],
        )
        .context("purge reference links")?;
    let sync_flags = tx
        .execute(
            "DELETE FROM reference_sync WHERE document_id = ?1",
            params![document_id],
        )
        .context("purge reference sync flags")?;

    tx.commit().context("commit purge transaction")?;

    tracing::info!(document_id, versions, links, sync_flags, "purged derived state");

    Ok(PurgeStats {
        versions,
        links,
        sync_flags,
    })
}
