//! Reference reconciler.
//!
//! Keeps the stored cross-reference rows for each `(document, kind)` pair
//! equal to what the extractor currently finds in the document's content,
//! by computing the minimal insert/delete set between the previous and
//! current snapshots.
//!
//! Safe to re-invoke with identical arguments: inserts ignore uniqueness
//! conflicts and deletes of absent rows are no-ops, so a redelivered diff
//! lands on the state it already produced.
//!
//! # First materialization
//!
//! Whether a `(document, kind)` pair has ever been reconciled is a
//! persisted flag in `reference_sync`, written in the same transaction as
//! the diff output. It is deliberately not inferred from "zero rows": a
//! document whose references were all removed is a reconciled document
//! with an empty set, not a new one, and must not re-trigger the backfill
//! on redelivery.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use rusqlite::{Connection, TransactionBehavior, params};

use crate::extract::{ReferenceExtractor, ReferenceTriple};
use crate::model::kind::ReferenceKind;

/// One reconciliation request, as delivered by the task queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileRequest {
    pub document_id: String,
    /// Rendered HTML before the edit; `None` when the producer had no
    /// prior snapshot.
    pub previous_html: Option<String>,
    pub current_html: String,
    /// Reference kinds to reconcile; each is diffed independently.
    pub kinds: Vec<ReferenceKind>,
}

/// Per-kind result of a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub kind: ReferenceKind,
    pub inserted: usize,
    pub removed: usize,
    /// Whether this pass was the one-time full backfill rather than a
    /// steady-state incremental diff.
    pub backfilled: bool,
}

/// Reconcile the stored reference set for each requested kind.
///
/// # Errors
///
/// Returns an error if extraction fails (malformed content; callers drop,
/// never retry) or if the store transaction fails (callers let the queue
/// retry).
pub fn reconcile(
    conn: &mut Connection,
    extractor: &dyn ReferenceExtractor,
    req: &ReconcileRequest,
    now_us: i64,
) -> Result<Vec<ReconcileOutcome>> {
    let mut outcomes = Vec::with_capacity(req.kinds.len());

    for &kind in &req.kinds {
        let current = extractor
            .extract(&req.current_html, kind)
            .with_context(|| format!("extract {kind} references from current content"))?;
        let previous = match req.previous_html.as_deref() {
            Some(html) => extractor
                .extract(html, kind)
                .with_context(|| format!("extract {kind} references from previous content"))?,
            None => BTreeSet::new(),
        };

        outcomes.push(reconcile_kind(
            conn, req, kind, &previous, &current, now_us,
        )?);
    }

    Ok(outcomes)
}

fn reconcile_kind(
    conn: &mut Connection,
    req: &ReconcileRequest,
    kind: ReferenceKind,
    previous: &BTreeSet<ReferenceTriple>,
    current: &BTreeSet<ReferenceTriple>,
    now_us: i64,
) -> Result<ReconcileOutcome> {
    let previous_ids: BTreeSet<&str> = previous.iter().map(|t| t.reference_id.as_str()).collect();
    let current_ids: BTreeSet<&str> = current.iter().map(|t| t.reference_id.as_str()).collect();

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("begin reconciliation transaction")?;

    let synced: bool = tx
        .query_row(
            "SELECT EXISTS(
                SELECT 1 FROM reference_sync
                WHERE document_id = ?1 AND reference_kind = ?2
            )",
            params![req.document_id, kind.as_str()],
            |row| row.get(0),
        )
        .context("read reference sync flag")?;

    // First materialization floods every id found in the current content,
    // not just the delta; afterwards only incremental diffs apply.
    let backfilled = !synced;
    let to_add: Vec<&ReferenceTriple> = if backfilled {
        current.iter().collect()
    } else {
        current
            .iter()
            .filter(|t| !previous_ids.contains(t.reference_id.as_str()))
            .collect()
    };
    let to_remove: Vec<&str> = previous_ids.difference(&current_ids).copied().collect();

    let mut inserted = 0;
    for triple in &to_add {
        inserted += tx
            .execute(
                "INSERT OR IGNORE INTO reference_links (
                    document_id, reference_kind, reference_id,
                    target_entity_id, target_kind, created_at_us
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    req.document_id,
                    kind.as_str(),
                    triple.reference_id,
                    triple.target_entity_id,
                    triple.target_kind.as_str(),
                    now_us
                ],
            )
            .with_context(|| format!("insert {kind} reference '{}'", triple.reference_id))?;
    }

    let mut removed = 0;
    for reference_id in &to_remove {
        removed += tx
            .execute(
                "DELETE FROM reference_links
                 WHERE document_id = ?1 AND reference_kind = ?2 AND reference_id = ?3",
                params![req.document_id, kind.as_str(), reference_id],
            )
            .with_context(|| format!("remove {kind} reference '{reference_id}'"))?;
    }

    tx.execute(
        "INSERT OR IGNORE INTO reference_sync (document_id, reference_kind, first_synced_at_us)
         VALUES (?1, ?2, ?3)",
        params![req.document_id, kind.as_str(), now_us],
    )
    .context("persist reference sync flag")?;

    tx.commit().context("commit reconciliation")?;

    tracing::debug!(
        document_id = %req.document_id,
        kind = %kind,
        inserted,
        removed,
        backfill = backfilled,
        "reconciled reference set"
    );

    Ok(ReconcileOutcome {
        kind,
        inserted,
        removed,
        backfilled,
    })
}
