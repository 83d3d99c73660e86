//! Recency tracker.
//!
//! Maintains a capped, per-user "recently visited" index. Repeat visits
//! inside the suppression TTL are dropped before any store access; other
//! visits either bump the existing entry's `visited_at` or insert a new
//! entry, evicting the single oldest entry in the same retention bucket
//! when the bucket is full.
//!
//! Safe to re-invoke with identical arguments: the redelivered call is
//! either suppressed by the cache or lands on the bump branch. Concurrent
//! calls from separate processes may still race past the cache and insert
//! a duplicate; that duplicate is harmless and gets swept by capacity
//! eviction, an accepted eventual-consistency trade-off.

use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use crate::cache::SuppressionCache;
use crate::model::kind::EntityKind;

/// Tunables for recency tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecencyPolicy {
    /// Maximum live entries per `(user, scope)` retention bucket.
    pub capacity: u32,
    /// Repeat visits inside this window never touch the store.
    pub suppression_ttl: Duration,
}

/// One visit event, as delivered by the task queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitRequest {
    pub user_id: String,
    pub scope_id: String,
    pub entity_kind: EntityKind,
    pub entity_id: String,
}

/// What the tracker did with a visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitOutcome {
    /// Dropped by the suppression cache; the store was not touched.
    Suppressed,
    /// An existing entry's `visited_at` was bumped.
    Bumped,
    /// A new entry was inserted.
    Inserted {
        /// Whether capacity evicted the oldest entry in the bucket.
        evicted: bool,
    },
}

/// Suppression cache key for a visit. Scope is deliberately absent: a
/// visit to the same entity through another scope is still the same
/// high-frequency event.
#[must_use]
pub fn suppression_key(user_id: &str, kind: EntityKind, entity_id: &str) -> String {
    format!("visited:{user_id}:{kind}:{entity_id}")
}

/// Record one visit in the user's recency index.
///
/// # Errors
///
/// Returns an error if the store transaction fails; the caller's queue
/// retry policy owns recovery.
pub fn record_visit(
    conn: &mut Connection,
    cache: &dyn SuppressionCache,
    policy: &RecencyPolicy,
    req: &VisitRequest,
    now_us: i64,
) -> Result<VisitOutcome> {
    let key = suppression_key(&req.user_id, req.entity_kind, &req.entity_id);
    if cache.get(&key).is_some() {
        tracing::trace!(
            user_id = %req.user_id,
            entity_kind = %req.entity_kind,
            entity_id = %req.entity_id,
            "visit suppressed by cache"
        );
        return Ok(VisitOutcome::Suppressed);
    }

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("begin visit transaction")?;

    let existing: Option<i64> = tx
        .query_row(
            "SELECT visit_id FROM recent_visits
             WHERE user_id = ?1 AND scope_id = ?2 AND entity_kind = ?3 AND entity_id = ?4
             ORDER BY visited_at_us DESC, visit_id DESC
             LIMIT 1",
            params![
                req.user_id,
                req.scope_id,
                req.entity_kind.as_str(),
                req.entity_id
            ],
            |row| row.get(0),
        )
        .optional()
        .context("look up existing visit")?;

    let outcome = if let Some(visit_id) = existing {
        tx.execute(
            "UPDATE recent_visits SET visited_at_us = ?1 WHERE visit_id = ?2",
            params![now_us, visit_id],
        )
        .context("bump visited_at")?;
        VisitOutcome::Bumped
    } else {
        let bucket = req.entity_kind.bucket();
        let occupancy: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM recent_visits
                 WHERE user_id = ?1 AND scope_id = ?2 AND bucket = ?3",
                params![req.user_id, req.scope_id, bucket.as_str()],
                |row| row.get(0),
            )
            .context("count bucket occupancy")?;

        let mut evicted = false;
        if occupancy >= i64::from(policy.capacity) {
            let removed = tx
                .execute(
                    "DELETE FROM recent_visits
                     WHERE visit_id = (
                         SELECT visit_id FROM recent_visits
                         WHERE user_id = ?1 AND scope_id = ?2 AND bucket = ?3
                         ORDER BY visited_at_us ASC, visit_id ASC
                         LIMIT 1
                     )",
                    params![req.user_id, req.scope_id, bucket.as_str()],
                )
                .context("evict oldest visit in bucket")?;
            evicted = removed > 0;
        }

        tx.execute(
            "INSERT INTO recent_visits (
                user_id, scope_id, entity_kind, entity_id, bucket,
                visited_at_us, created_at_us
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                req.user_id,
                req.scope_id,
                req.entity_kind.as_str(),
                req.entity_id,
                bucket.as_str(),
                now_us
            ],
        )
        .context("insert visit")?;
        VisitOutcome::Inserted { evicted }
    };

    tx.commit().context("commit visit")?;

    // Populate the key whichever branch ran, so the next repeat visit is
    // free.
    cache.set(&key, "1", policy.suppression_ttl);

    tracing::trace!(
        user_id = %req.user_id,
        scope_id = %req.scope_id,
        entity_kind = %req.entity_kind,
        entity_id = %req.entity_id,
        ?outcome,
        "recorded visit"
    );

    Ok(outcome)
}
