//! Row types stored in (or read back from) the derived-state tables.
//!
//! Primary documents are owned elsewhere; everything here is secondary
//! state keyed by externally-issued string ids. Timestamps are integer
//! microseconds since the Unix epoch (`*_us`), matching the store's
//! column convention.

use serde::{Deserialize, Serialize};

use crate::model::kind::{EntityKind, ReferenceKind};

/// The three projections of a rich document's content that travel with a
/// mutation event: the editor's structured form, rendered HTML, and a
/// plaintext flattening for search-adjacent consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub structured: serde_json::Value,
    pub html: String,
    pub text: String,
}

impl Snapshot {
    /// The projection compared for the redelivery idempotency guard: two
    /// snapshots are "the same edit" iff their rendered HTML is equal.
    #[must_use]
    pub fn rendered(&self) -> &str {
        &self.html
    }
}

/// One retained version of a document's content.
///
/// At most `retention_limit` live rows exist per `document_id`; eviction
/// is oldest-first, one row at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionRecord {
    pub id: i64,
    pub document_id: String,
    pub content: Snapshot,
    pub saved_by: String,
    pub saved_at_us: i64,
    pub created_at_us: i64,
}

/// One extracted cross-reference embedded in a document's rich content.
///
/// The live set for `(document_id, reference_kind)` mirrors exactly what
/// the extractor currently finds in the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceLink {
    pub id: i64,
    pub source_document_id: String,
    pub reference_kind: ReferenceKind,
    pub reference_id: String,
    pub target_entity_id: String,
    pub target_kind: EntityKind,
    pub created_at_us: i64,
}

/// One entry in a user's capped recently-visited index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecencyEntry {
    pub id: i64,
    pub user_id: String,
    pub scope_id: String,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub visited_at_us: i64,
    pub created_at_us: i64,
}
