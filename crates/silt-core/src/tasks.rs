//! Task boundary: payloads, enqueue helpers, and handlers.
//!
//! The task queue itself lives outside this crate and guarantees only
//! at-least-once delivery. Every handler here is therefore safe to invoke
//! more than once with identical arguments; that is a documented
//! precondition of the core, not an accident of middleware.
//!
//! Failure mapping (decided once, applied uniformly):
//! - vanished document → logged, [`Disposition::Dropped`], never retried
//! - malformed payload or content → logged, [`Disposition::Dropped`],
//!   never retried (retrying cannot succeed)
//! - store trouble → returned as `Err` so the queue's own
//!   retry-with-backoff policy takes over; no internal retries

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::cache::SuppressionCache;
use crate::config::ConsolidatorConfig;
use crate::extract::{ExtractError, ReferenceExtractor};
use crate::history::{self, ConsolidateRequest};
use crate::model::kind::{EntityKind, ReferenceKind};
use crate::model::records::Snapshot;
use crate::recency::{self, VisitRequest};
use crate::reconcile::{self, ReconcileRequest};

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Payload for one version-consolidation unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidateVersionTask {
    pub document_id: String,
    pub editor_id: String,
    pub previous: Option<Snapshot>,
    pub current: Snapshot,
    #[serde(default)]
    pub is_creation: bool,
}

/// Payload for one reference-reconciliation unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReferencesTask {
    pub document_id: String,
    pub previous_html: Option<String>,
    pub current_html: String,
    pub kinds: Vec<ReferenceKind>,
}

/// Payload for one visit-recording unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordVisitTask {
    pub user_id: String,
    pub scope_id: String,
    pub entity_kind: EntityKind,
    pub entity_id: String,
}

/// Wire envelope the queue carries; tagged so workers can dispatch on the
/// task name alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum TaskEnvelope {
    ConsolidateVersion(ConsolidateVersionTask),
    ReconcileReferences(ReconcileReferencesTask),
    RecordVisit(RecordVisitTask),
}

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// The external at-least-once task queue, as seen from the API layer.
pub trait TaskQueue {
    /// Hand a task to the delivery mechanism. Fire-and-forget: delivery,
    /// scheduling and retry are the queue's business.
    ///
    /// # Errors
    ///
    /// Returns an error if the task could not be accepted.
    fn enqueue(&self, envelope: TaskEnvelope) -> Result<()>;
}

/// Existence probe against the externally-owned primary document store.
///
/// A document can vanish between enqueue and processing; handlers treat
/// that as a benign no-op rather than an error.
pub trait DocumentDirectory {
    /// Whether the primary document still exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the primary store cannot be reached; the queue
    /// retries the whole unit of work.
    fn document_exists(&self, document_id: &str) -> Result<bool>;
}

/// Directory for deployments that do not wire up a primary-store probe.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumePresent;

impl DocumentDirectory for AssumePresent {
    fn document_exists(&self, _document_id: &str) -> Result<bool> {
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Enqueue helpers (inbound interface for the API layer)
// ---------------------------------------------------------------------------

/// Enqueue version consolidation after a successful document mutation.
///
/// # Errors
///
/// Returns an error if the queue refuses the task.
pub fn enqueue_consolidate_version(
    queue: &dyn TaskQueue,
    document_id: &str,
    editor_id: &str,
    previous: Option<Snapshot>,
    current: Snapshot,
    is_creation: bool,
) -> Result<()> {
    queue.enqueue(TaskEnvelope::ConsolidateVersion(ConsolidateVersionTask {
        document_id: document_id.to_string(),
        editor_id: editor_id.to_string(),
        previous,
        current,
        is_creation,
    }))
}

/// Enqueue reference reconciliation after a successful document mutation.
///
/// # Errors
///
/// Returns an error if the queue refuses the task.
pub fn enqueue_reconcile_references(
    queue: &dyn TaskQueue,
    document_id: &str,
    previous_html: Option<String>,
    current_html: String,
    kinds: Vec<ReferenceKind>,
) -> Result<()> {
    queue.enqueue(TaskEnvelope::ReconcileReferences(ReconcileReferencesTask {
        document_id: document_id.to_string(),
        previous_html,
        current_html,
        kinds,
    }))
}

/// Enqueue visit recording after a successful entity view.
///
/// # Errors
///
/// Returns an error if the queue refuses the task.
pub fn enqueue_record_visit(
    queue: &dyn TaskQueue,
    user_id: &str,
    scope_id: &str,
    entity_kind: EntityKind,
    entity_id: &str,
) -> Result<()> {
    queue.enqueue(TaskEnvelope::RecordVisit(RecordVisitTask {
        user_id: user_id.to_string(),
        scope_id: scope_id.to_string(),
        entity_kind,
        entity_id: entity_id.to_string(),
    }))
}

// ---------------------------------------------------------------------------
// Worker side
// ---------------------------------------------------------------------------

/// Terminal result of one task invocation, from the queue's perspective.
///
/// `Err` from a handler means "retry later"; a `Disposition` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Work applied (or idempotently re-applied).
    Done,
    /// Benign or unrecoverable event, logged and discarded.
    Dropped,
}

/// One worker's view of the consolidator core: a store connection plus the
/// injected seams. Holds no other state between invocations.
pub struct TaskRuntime {
    conn: Connection,
    cache: Box<dyn SuppressionCache>,
    extractor: Box<dyn ReferenceExtractor>,
    documents: Box<dyn DocumentDirectory>,
    config: ConsolidatorConfig,
}

impl TaskRuntime {
    #[must_use]
    pub fn new(
        conn: Connection,
        cache: Box<dyn SuppressionCache>,
        extractor: Box<dyn ReferenceExtractor>,
        documents: Box<dyn DocumentDirectory>,
        config: ConsolidatorConfig,
    ) -> Self {
        Self {
            conn,
            cache,
            extractor,
            documents,
            config,
        }
    }

    /// Decode and run one raw payload from the queue.
    ///
    /// Undecodable payloads are the `MalformedEvent` class: logged as an
    /// error and dropped, because redelivery cannot make them parse.
    ///
    /// # Errors
    ///
    /// Returns an error only for store trouble, which the queue retries.
    pub fn handle_json(&mut self, payload: &str) -> Result<Disposition> {
        match serde_json::from_str::<TaskEnvelope>(payload) {
            Ok(envelope) => self.handle(envelope),
            Err(error) => {
                tracing::error!(%error, "dropping malformed task payload");
                Ok(Disposition::Dropped)
            }
        }
    }

    /// Run one decoded task.
    ///
    /// # Errors
    ///
    /// Returns an error only for store trouble, which the queue retries.
    pub fn handle(&mut self, envelope: TaskEnvelope) -> Result<Disposition> {
        let now_us = Utc::now().timestamp_micros();
        self.handle_at(envelope, now_us)
    }

    /// [`Self::handle`] with an explicit wall clock, for deterministic
    /// tests and replays.
    ///
    /// # Errors
    ///
    /// Returns an error only for store trouble, which the queue retries.
    pub fn handle_at(&mut self, envelope: TaskEnvelope, now_us: i64) -> Result<Disposition> {
        match envelope {
            TaskEnvelope::ConsolidateVersion(task) => self.consolidate_version(&task, now_us),
            TaskEnvelope::ReconcileReferences(task) => self.reconcile_references(&task, now_us),
            TaskEnvelope::RecordVisit(task) => self.record_visit(&task, now_us),
        }
    }

    fn consolidate_version(
        &mut self,
        task: &ConsolidateVersionTask,
        now_us: i64,
    ) -> Result<Disposition> {
        if !self
            .documents
            .document_exists(&task.document_id)
            .context("probe document for version consolidation")?
        {
            tracing::info!(
                document_id = %task.document_id,
                "document vanished before version consolidation, dropping"
            );
            return Ok(Disposition::Dropped);
        }

        let req = ConsolidateRequest {
            document_id: task.document_id.clone(),
            editor_id: task.editor_id.clone(),
            previous: task.previous.clone(),
            current: task.current.clone(),
            is_creation: task.is_creation,
        };
        history::consolidate(&mut self.conn, &self.config.history_policy(), &req, now_us)?;
        Ok(Disposition::Done)
    }

    fn reconcile_references(
        &mut self,
        task: &ReconcileReferencesTask,
        now_us: i64,
    ) -> Result<Disposition> {
        if !self
            .documents
            .document_exists(&task.document_id)
            .context("probe document for reference reconciliation")?
        {
            tracing::info!(
                document_id = %task.document_id,
                "document vanished before reconciliation, dropping"
            );
            return Ok(Disposition::Dropped);
        }

        let req = ReconcileRequest {
            document_id: task.document_id.clone(),
            previous_html: task.previous_html.clone(),
            current_html: task.current_html.clone(),
            kinds: task.kinds.clone(),
        };
        match reconcile::reconcile(&mut self.conn, self.extractor.as_ref(), &req, now_us) {
            Ok(_) => Ok(Disposition::Done),
            Err(error) if error.downcast_ref::<ExtractError>().is_some() => {
                tracing::error!(
                    document_id = %task.document_id,
                    %error,
                    "dropping reconciliation for unparseable content"
                );
                Ok(Disposition::Dropped)
            }
            Err(error) => Err(error),
        }
    }

    fn record_visit(&mut self, task: &RecordVisitTask, now_us: i64) -> Result<Disposition> {
        let req = VisitRequest {
            user_id: task.user_id.clone(),
            scope_id: task.scope_id.clone(),
            entity_kind: task.entity_kind,
            entity_id: task.entity_id.clone(),
        };
        recency::record_visit(
            &mut self.conn,
            self.cache.as_ref(),
            &self.config.recency_policy(),
            &req,
            now_us,
        )?;
        Ok(Disposition::Done)
    }

    /// Read access to the underlying store, for the outbound query APIs.
    #[must_use]
    pub const fn store(&self) -> &Connection {
        &self.conn
    }
}
