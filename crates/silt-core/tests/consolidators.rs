//! End-to-end scenarios for the three consolidators, driven through the
//! task boundary the way a queue worker would drive them.

use silt_core::cache::MemoryCache;
use silt_core::config::ConsolidatorConfig;
use silt_core::db::{open_memory_store, query};
use silt_core::extract::MentionExtractor;
use silt_core::model::kind::{EntityKind, ReferenceKind};
use silt_core::model::records::Snapshot;
use silt_core::{history, reconcile};
use silt_core::tasks::{
    AssumePresent, ConsolidateVersionTask, Disposition, ReconcileReferencesTask, RecordVisitTask,
    TaskEnvelope, TaskRuntime,
};

const SECOND_US: i64 = 1_000_000;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn runtime() -> TaskRuntime {
    TaskRuntime::new(
        open_memory_store().expect("open store"),
        Box::new(MemoryCache::new()),
        Box::new(MentionExtractor::new()),
        Box::new(AssumePresent),
        ConsolidatorConfig::default(),
    )
}

fn snapshot(html: &str) -> Snapshot {
    Snapshot {
        structured: serde_json::json!({"type": "doc", "html": html}),
        html: html.into(),
        text: html.into(),
    }
}

fn edit_task(doc: &str, editor: &str, previous: Option<&str>, current: &str) -> TaskEnvelope {
    TaskEnvelope::ConsolidateVersion(ConsolidateVersionTask {
        document_id: doc.into(),
        editor_id: editor.into(),
        previous: previous.map(snapshot),
        current: snapshot(current),
        is_creation: false,
    })
}

fn creation_task(doc: &str, editor: &str, content: &str) -> TaskEnvelope {
    TaskEnvelope::ConsolidateVersion(ConsolidateVersionTask {
        document_id: doc.into(),
        editor_id: editor.into(),
        previous: None,
        current: snapshot(content),
        is_creation: true,
    })
}

fn user_mentions_html(ids: &[&str]) -> String {
    ids.iter()
        .map(|id| {
            format!(
                "<mention-component entity_name=\"user_mention\" entity_identifier=\"{id}\" \
                 target_identifier=\"doc-1\" target_kind=\"issue\"></mention-component>"
            )
        })
        .collect()
}

fn mentions_task(doc: &str, previous: Option<&[&str]>, current: &[&str]) -> TaskEnvelope {
    TaskEnvelope::ReconcileReferences(ReconcileReferencesTask {
        document_id: doc.into(),
        previous_html: previous.map(user_mentions_html),
        current_html: user_mentions_html(current),
        kinds: vec![ReferenceKind::User],
    })
}

fn visit_task(user: &str, kind: EntityKind, entity: &str) -> TaskEnvelope {
    TaskEnvelope::RecordVisit(RecordVisitTask {
        user_id: user.into(),
        scope_id: "ws-1".into(),
        entity_kind: kind,
        entity_id: entity.into(),
    })
}

// ---------------------------------------------------------------------------
// Version history scenarios
// ---------------------------------------------------------------------------

#[test]
fn document_creation_yields_exactly_one_version() {
    let mut rt = runtime();
    let disposition = rt
        .handle_at(creation_task("doc-1", "user-x", "<p>hi</p>"), 0)
        .expect("consolidate");
    assert_eq!(disposition, Disposition::Done);

    let versions = query::list_versions(rt.store(), "doc-1").expect("list");
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].content.html, "<p>hi</p>");
    assert_eq!(versions[0].saved_by, "user-x");
}

#[test]
fn rapid_edits_by_one_editor_coalesce_to_the_latest_content() {
    let mut rt = runtime();
    rt.handle_at(edit_task("doc-1", "user-x", None, "<p>t0</p>"), 0)
        .expect("edit at t=0");
    rt.handle_at(
        edit_task("doc-1", "user-x", Some("<p>t0</p>"), "<p>t30</p>"),
        30 * SECOND_US,
    )
    .expect("edit at t=30");

    let versions = query::list_versions(rt.store(), "doc-1").expect("list");
    assert_eq!(versions.len(), 1, "window is 600s, edits 30s apart");
    assert_eq!(versions[0].content.html, "<p>t30</p>");
    assert_eq!(versions[0].saved_at_us, 30 * SECOND_US);
}

#[test]
fn edits_by_different_editors_never_coalesce() {
    let mut rt = runtime();
    rt.handle_at(edit_task("doc-1", "user-x", None, "<p>x</p>"), 0)
        .expect("edit by x");
    rt.handle_at(
        edit_task("doc-1", "user-y", Some("<p>x</p>"), "<p>y</p>"),
        5 * SECOND_US,
    )
    .expect("edit by y");

    let versions = query::list_versions(rt.store(), "doc-1").expect("list");
    assert_eq!(versions.len(), 2, "different editors, window irrelevant");
    assert_eq!(versions[0].saved_by, "user-y");
    assert_eq!(versions[1].saved_by, "user-x");
}

#[test]
fn retention_keeps_the_most_recent_records() {
    let mut rt = runtime();
    let limit = i64::from(ConsolidatorConfig::default().retention_limit);

    // Alternate editors and space the edits beyond the window so every
    // delivery appends.
    for i in 0..=limit {
        let editor = if i % 2 == 0 { "user-x" } else { "user-y" };
        rt.handle_at(
            edit_task("doc-1", editor, None, &format!("<p>rev {i}</p>")),
            i * 700 * SECOND_US,
        )
        .expect("edit");
    }

    let versions = query::list_versions(rt.store(), "doc-1").expect("list");
    assert_eq!(versions.len(), usize::try_from(limit).expect("small limit"));
    assert_eq!(versions[0].content.html, format!("<p>rev {limit}</p>"));
    assert_eq!(
        versions.last().expect("non-empty").content.html,
        "<p>rev 1</p>",
        "rev 0 is the single evicted record"
    );
}

// ---------------------------------------------------------------------------
// Reference reconciliation scenarios
// ---------------------------------------------------------------------------

#[test]
fn mention_change_deletes_stale_keeps_shared_inserts_new() {
    let mut rt = runtime();
    rt.handle_at(mentions_task("doc-1", None, &["U1", "U2"]), 0)
        .expect("materialize");

    let before = query::list_references(rt.store(), "doc-1", ReferenceKind::User).expect("list");
    let u2_row_id = before
        .iter()
        .find(|l| l.reference_id == "U2")
        .expect("U2 present")
        .id;

    rt.handle_at(
        mentions_task("doc-1", Some(&["U1", "U2"]), &["U2", "U3"]),
        10 * SECOND_US,
    )
    .expect("reconcile");

    let after = query::list_references(rt.store(), "doc-1", ReferenceKind::User).expect("list");
    let ids: Vec<&str> = after.iter().map(|l| l.reference_id.as_str()).collect();
    assert_eq!(ids, ["U2", "U3"]);

    let u2_after = after
        .iter()
        .find(|l| l.reference_id == "U2")
        .expect("U2 still present");
    assert_eq!(u2_after.id, u2_row_id, "U2 row untouched by the diff");
}

#[test]
fn reconciliation_redelivery_is_idempotent() {
    let mut rt = runtime();
    rt.handle_at(mentions_task("doc-1", None, &["U1"]), 0)
        .expect("materialize");

    let envelope = mentions_task("doc-1", Some(&["U1"]), &["U1", "U2"]);
    rt.handle_at(envelope.clone(), 10).expect("first delivery");
    rt.handle_at(envelope, 10).expect("redelivery");

    let links = query::list_references(rt.store(), "doc-1", ReferenceKind::User).expect("list");
    assert_eq!(links.len(), 2);
}

// ---------------------------------------------------------------------------
// Recency scenarios
// ---------------------------------------------------------------------------

#[test]
fn repeat_visits_inside_ttl_write_once() {
    let mut rt = runtime();
    rt.handle_at(visit_task("user-a", EntityKind::Issue, "issue-1"), 10)
        .expect("first visit");
    rt.handle_at(visit_task("user-a", EntityKind::Issue, "issue-1"), 20)
        .expect("suppressed visit");

    let recent = query::list_recent(rt.store(), "user-a", "ws-1", None, 50).expect("list");
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].visited_at_us, 10);
}

#[test]
fn bucket_capacity_keeps_the_most_recently_visited() {
    let mut rt = runtime();
    let capacity = i64::from(ConsolidatorConfig::default().recency_capacity);

    for i in 0..=capacity {
        rt.handle_at(
            visit_task("user-a", EntityKind::Issue, &format!("issue-{i}")),
            i * 10,
        )
        .expect("visit");
    }

    let recent = query::list_recent(rt.store(), "user-a", "ws-1", None, 100).expect("list");
    assert_eq!(recent.len(), usize::try_from(capacity).expect("small cap"));
    assert_eq!(recent[0].entity_id, format!("issue-{capacity}"));
    assert!(
        recent.iter().all(|e| e.entity_id != "issue-0"),
        "the oldest visit is the one evicted"
    );
}

#[test]
fn issue_churn_cannot_evict_project_recents() {
    let mut rt = runtime();
    rt.handle_at(visit_task("user-a", EntityKind::Project, "proj-1"), 0)
        .expect("project visit");

    let capacity = i64::from(ConsolidatorConfig::default().recency_capacity);
    for i in 0..capacity * 2 {
        rt.handle_at(
            visit_task("user-a", EntityKind::Issue, &format!("issue-{i}")),
            10 + i,
        )
        .expect("issue visit");
    }

    let projects = query::list_recent(rt.store(), "user-a", "ws-1", Some(EntityKind::Project), 10)
        .expect("list projects");
    assert_eq!(projects.len(), 1, "independent bucket survives issue churn");
}

// ---------------------------------------------------------------------------
// Cross-cutting
// ---------------------------------------------------------------------------

#[test]
fn one_document_edit_feeds_both_document_consolidators() {
    let mut rt = runtime();
    let previous_html = user_mentions_html(&["U1"]);
    let current_html = user_mentions_html(&["U1", "U2"]);

    rt.handle_at(
        TaskEnvelope::ConsolidateVersion(ConsolidateVersionTask {
            document_id: "doc-1".into(),
            editor_id: "user-x".into(),
            previous: Some(snapshot(&previous_html)),
            current: snapshot(&current_html),
            is_creation: false,
        }),
        10 * SECOND_US,
    )
    .expect("consolidate version");
    rt.handle_at(
        TaskEnvelope::ReconcileReferences(ReconcileReferencesTask {
            document_id: "doc-1".into(),
            previous_html: Some(previous_html),
            current_html,
            kinds: vec![ReferenceKind::User],
        }),
        10 * SECOND_US,
    )
    .expect("reconcile references");

    assert_eq!(query::list_versions(rt.store(), "doc-1").expect("versions").len(), 1);
    assert_eq!(
        query::list_references(rt.store(), "doc-1", ReferenceKind::User)
            .expect("links")
            .len(),
        2
    );
}

#[test]
fn purge_document_clears_all_derived_rows_for_that_document() {
    let mut conn = open_memory_store().expect("open store");
    let extractor = MentionExtractor::new();
    let config = ConsolidatorConfig::default();

    for doc in ["doc-1", "doc-2"] {
        history::consolidate(
            &mut conn,
            &config.history_policy(),
            &history::ConsolidateRequest {
                document_id: doc.into(),
                editor_id: "user-x".into(),
                previous: None,
                current: snapshot("<p>hi</p>"),
                is_creation: true,
            },
            0,
        )
        .expect("create version");
        reconcile::reconcile(
            &mut conn,
            &extractor,
            &reconcile::ReconcileRequest {
                document_id: doc.into(),
                previous_html: None,
                current_html: user_mentions_html(&["U1"]),
                kinds: vec![ReferenceKind::User],
            },
            0,
        )
        .expect("materialize links");
    }

    let stats = query::purge_document(&mut conn, "doc-1").expect("purge");
    assert_eq!(
        stats,
        query::PurgeStats {
            versions: 1,
            links: 1,
            sync_flags: 1
        }
    );

    assert!(query::list_versions(&conn, "doc-1").expect("versions").is_empty());
    assert!(
        query::list_references(&conn, "doc-1", ReferenceKind::User)
            .expect("links")
            .is_empty()
    );
    // The other document's derived rows are untouched.
    assert_eq!(query::list_versions(&conn, "doc-2").expect("versions").len(), 1);
}
