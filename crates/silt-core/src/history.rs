//! Version history consolidator.
//!
//! Maintains bounded, time-coalesced version snapshots per document.
//! Invoked by the task boundary after a successful document mutation;
//! safe to re-invoke with identical arguments, which is a hard
//! precondition under at-least-once task delivery:
//! - an unchanged rendered projection short-circuits before any write
//! - a redelivered insert lands inside the coalescing window and rewrites
//!   the same row in place
//!
//! The read-modify-write runs inside one `IMMEDIATE` transaction, so two
//! concurrent calls for the same document cannot both append without one
//! seeing the other's effect.

use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use crate::model::records::Snapshot;

/// Tunables for version consolidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryPolicy {
    /// Same-editor saves closer together than this update the newest
    /// record in place instead of appending.
    pub coalesce_window: Duration,
    /// Maximum retained records per document.
    pub retention_limit: u32,
}

/// One consolidation request, as delivered by the task queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidateRequest {
    pub document_id: String,
    pub editor_id: String,
    /// Snapshot before the edit; `None` for events that carry no prior
    /// state (e.g. bulk imports).
    pub previous: Option<Snapshot>,
    pub current: Snapshot,
    /// Document-creation events force an initial record even when the
    /// previous and current projections are equal.
    pub is_creation: bool,
}

/// What the consolidator did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsolidateOutcome {
    /// Rendered projection unchanged; nothing written.
    Unchanged,
    /// Newest record was rewritten in place.
    Coalesced,
    /// A new record was appended.
    Inserted {
        /// Whether retention evicted the oldest record.
        evicted: bool,
    },
}

/// Consolidate one edit into the document's version history.
///
/// # Errors
///
/// Returns an error if the store transaction fails; the caller's queue
/// retry policy owns recovery.
pub fn consolidate(
    conn: &mut Connection,
    policy: &HistoryPolicy,
    req: &ConsolidateRequest,
    now_us: i64,
) -> Result<ConsolidateOutcome> {
    // Redelivery guard: an edit whose rendered projection matches the
    // previous snapshot changed nothing worth versioning. Creation events
    // bypass the guard so every document gets an initial record.
    if !req.is_creation
        && req.previous.as_ref().map(Snapshot::rendered) == Some(req.current.rendered())
    {
        tracing::debug!(
            document_id = %req.document_id,
            editor_id = %req.editor_id,
            "rendered projection unchanged, skipping version consolidation"
        );
        return Ok(ConsolidateOutcome::Unchanged);
    }

    let window_us = i64::try_from(policy.coalesce_window.as_micros()).unwrap_or(i64::MAX);
    let content_json =
        serde_json::to_string(&req.current.structured).context("serialize structured content")?;

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("begin version consolidation transaction")?;

    let newest: Option<(i64, String, i64)> = tx
        .query_row(
            "SELECT version_id, saved_by, saved_at_us
             FROM document_versions
             WHERE document_id = ?1
             ORDER BY saved_at_us DESC, version_id DESC
             LIMIT 1",
            params![req.document_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()
        .context("load newest version record")?;

    if let Some((version_id, saved_by, saved_at_us)) = newest {
        if saved_by == req.editor_id && now_us - saved_at_us <= window_us {
            tx.execute(
                "UPDATE document_versions
                 SET content_json = ?1, content_html = ?2, content_text = ?3, saved_at_us = ?4
                 WHERE version_id = ?5",
                params![
                    content_json,
                    req.current.html,
                    req.current.text,
                    now_us,
                    version_id
                ],
            )
            .context("coalesce newest version record")?;
            tx.commit().context("commit coalesced version")?;

            tracing::debug!(
                document_id = %req.document_id,
                editor_id = %req.editor_id,
                version_id,
                "coalesced edit into newest version record"
            );
            return Ok(ConsolidateOutcome::Coalesced);
        }
    }

    tx.execute(
        "INSERT INTO document_versions (
            document_id, content_json, content_html, content_text,
            saved_by, saved_at_us, created_at_us
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            req.document_id,
            content_json,
            req.current.html,
            req.current.text,
            req.editor_id,
            now_us
        ],
    )
    .context("insert version record")?;

    // An insert adds exactly one row, so at most one eviction is needed.
    let count: i64 = tx
        .query_row(
            "SELECT COUNT(*) FROM document_versions WHERE document_id = ?1",
            params![req.document_id],
            |row| row.get(0),
        )
        .context("count version records")?;

    let mut evicted = false;
    if count > i64::from(policy.retention_limit) {
        let removed = tx
            .execute(
                "DELETE FROM document_versions
                 WHERE version_id = (
                     SELECT version_id FROM document_versions
                     WHERE document_id = ?1
                     ORDER BY saved_at_us ASC, version_id ASC
                     LIMIT 1
                 )",
                params![req.document_id],
            )
            .context("evict oldest version record")?;
        evicted = removed > 0;
    }

    tx.commit().context("commit inserted version")?;

    tracing::debug!(
        document_id = %req.document_id,
        editor_id = %req.editor_id,
        retained = count.min(i64::from(policy.retention_limit)),
        evicted,
        "appended version record"
    );

    Ok(ConsolidateOutcome::Inserted { evicted })
}

#[cfg(test)]
mod tests {
    use super::{ConsolidateOutcome, ConsolidateRequest, HistoryPolicy, consolidate};
    use crate::db::{open_memory_store, query};
    use crate::model::records::Snapshot;
    use std::time::Duration;

    const SECOND_US: i64 = 1_000_000;

    fn policy() -> HistoryPolicy {
        HistoryPolicy {
            coalesce_window: Duration::from_secs(600),
            retention_limit: 20,
        }
    }

    fn snapshot(html: &str) -> Snapshot {
        Snapshot {
            structured: serde_json::json!({"doc": html}),
            html: html.into(),
            text: html.trim_start_matches("<p>").trim_end_matches("</p>").into(),
        }
    }

    fn edit(editor: &str, previous: Option<&str>, current: &str) -> ConsolidateRequest {
        ConsolidateRequest {
            document_id: "doc-1".into(),
            editor_id: editor.into(),
            previous: previous.map(snapshot),
            current: snapshot(current),
            is_creation: false,
        }
    }

    #[test]
    fn creation_forces_initial_record_even_when_rendered_equal() {
        let mut conn = open_memory_store().expect("open store");
        let req = ConsolidateRequest {
            is_creation: true,
            ..edit("user-x", Some("<p>hi</p>"), "<p>hi</p>")
        };

        let outcome = consolidate(&mut conn, &policy(), &req, 0).expect("consolidate");
        assert_eq!(outcome, ConsolidateOutcome::Inserted { evicted: false });

        let versions = query::list_versions(&conn, "doc-1").expect("list");
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].content.html, "<p>hi</p>");
    }

    #[test]
    fn unchanged_rendered_projection_is_a_noop() {
        let mut conn = open_memory_store().expect("open store");
        let req = edit("user-x", Some("<p>same</p>"), "<p>same</p>");

        let outcome = consolidate(&mut conn, &policy(), &req, 0).expect("consolidate");
        assert_eq!(outcome, ConsolidateOutcome::Unchanged);
        assert!(query::list_versions(&conn, "doc-1").expect("list").is_empty());
    }

    #[test]
    fn same_editor_within_window_coalesces() {
        let mut conn = open_memory_store().expect("open store");
        consolidate(&mut conn, &policy(), &edit("user-x", None, "<p>a</p>"), 0)
            .expect("first edit");
        let outcome = consolidate(
            &mut conn,
            &policy(),
            &edit("user-x", Some("<p>a</p>"), "<p>b</p>"),
            30 * SECOND_US,
        )
        .expect("second edit");

        assert_eq!(outcome, ConsolidateOutcome::Coalesced);
        let versions = query::list_versions(&conn, "doc-1").expect("list");
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].content.html, "<p>b</p>");
        assert_eq!(versions[0].saved_at_us, 30 * SECOND_US);
    }

    #[test]
    fn strictly_beyond_window_appends_a_second_record() {
        let mut conn = open_memory_store().expect("open store");
        consolidate(&mut conn, &policy(), &edit("user-x", None, "<p>a</p>"), 0)
            .expect("first edit");
        let outcome = consolidate(
            &mut conn,
            &policy(),
            &edit("user-x", Some("<p>a</p>"), "<p>b</p>"),
            601 * SECOND_US,
        )
        .expect("second edit");

        assert_eq!(outcome, ConsolidateOutcome::Inserted { evicted: false });
        assert_eq!(query::list_versions(&conn, "doc-1").expect("list").len(), 2);
    }

    #[test]
    fn exactly_at_window_boundary_still_coalesces() {
        let mut conn = open_memory_store().expect("open store");
        consolidate(&mut conn, &policy(), &edit("user-x", None, "<p>a</p>"), 0)
            .expect("first edit");
        let outcome = consolidate(
            &mut conn,
            &policy(),
            &edit("user-x", Some("<p>a</p>"), "<p>b</p>"),
            600 * SECOND_US,
        )
        .expect("second edit");
        assert_eq!(outcome, ConsolidateOutcome::Coalesced);
    }

    #[test]
    fn different_editor_never_coalesces() {
        let mut conn = open_memory_store().expect("open store");
        consolidate(&mut conn, &policy(), &edit("user-x", None, "<p>a</p>"), 0)
            .expect("edit by x");
        let outcome = consolidate(
            &mut conn,
            &policy(),
            &edit("user-y", Some("<p>a</p>"), "<p>b</p>"),
            5 * SECOND_US,
        )
        .expect("edit by y");

        assert_eq!(outcome, ConsolidateOutcome::Inserted { evicted: false });
        let versions = query::list_versions(&conn, "doc-1").expect("list");
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].saved_by, "user-y");
    }

    #[test]
    fn retention_evicts_exactly_the_single_oldest() {
        let mut conn = open_memory_store().expect("open store");
        let tight = HistoryPolicy {
            coalesce_window: Duration::from_secs(0),
            retention_limit: 3,
        };

        for i in 0..4_i64 {
            // Alternate editors so nothing coalesces even at window zero.
            let editor = if i % 2 == 0 { "user-x" } else { "user-y" };
            let req = edit(editor, None, &format!("<p>rev {i}</p>"));
            consolidate(&mut conn, &tight, &req, i * 3600 * SECOND_US).expect("edit");
        }

        let versions = query::list_versions(&conn, "doc-1").expect("list");
        assert_eq!(versions.len(), 3);
        let htmls: Vec<&str> = versions.iter().map(|v| v.content.html.as_str()).collect();
        assert_eq!(htmls, ["<p>rev 3</p>", "<p>rev 2</p>", "<p>rev 1</p>"]);
    }

    #[test]
    fn redelivery_with_identical_arguments_changes_nothing() {
        let mut conn = open_memory_store().expect("open store");
        let req = edit("user-x", Some("<p>a</p>"), "<p>b</p>");

        consolidate(&mut conn, &policy(), &req, 10 * SECOND_US).expect("first delivery");
        consolidate(&mut conn, &policy(), &req, 10 * SECOND_US).expect("redelivery");

        let versions = query::list_versions(&conn, "doc-1").expect("list");
        assert_eq!(versions.len(), 1, "redelivery must coalesce, not append");
        assert_eq!(versions[0].content.html, "<p>b</p>");
        assert_eq!(versions[0].saved_at_us, 10 * SECOND_US);
    }
}
