//! Reference extraction from rich-content snapshots.
//!
//! The reconciler consumes the [`ReferenceExtractor`] trait; the rich-text
//! pipeline that produced the HTML lives outside this crate. The default
//! [`MentionExtractor`] understands the `<mention-component …>` tags the
//! editor embeds in rendered HTML.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::kind::{EntityKind, ReferenceKind};

/// One cross-reference found in a document's content.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReferenceTriple {
    pub reference_id: String,
    pub target_entity_id: String,
    pub target_kind: EntityKind,
}

/// Extraction failure. Content that cannot be parsed will not parse on
/// redelivery either, so callers treat this as drop-and-log, never retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("mention tag missing required attribute '{attribute}'")]
    MissingAttribute { attribute: &'static str },
    #[error("mention tag has unknown target kind '{value}'")]
    UnknownTargetKind { value: String },
}

/// Parses rich-content HTML into the set of references of one kind.
pub trait ReferenceExtractor {
    /// Extract every reference of `kind` from `html`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError`] if a mention tag of the requested kind is
    /// structurally incomplete.
    fn extract(
        &self,
        html: &str,
        kind: ReferenceKind,
    ) -> Result<BTreeSet<ReferenceTriple>, ExtractError>;
}

static MENTION_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<mention-component\b([^>]*)>").expect("mention tag pattern is valid")
});
static ENTITY_NAME: LazyLock<Regex> = LazyLock::new(|| attr_pattern("entity_name"));
static ENTITY_IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| attr_pattern("entity_identifier"));
static TARGET_IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| attr_pattern("target_identifier"));
static TARGET_KIND: LazyLock<Regex> = LazyLock::new(|| attr_pattern("target_kind"));

fn attr_pattern(name: &str) -> Regex {
    Regex::new(&format!(r#"{name}\s*=\s*"([^"]*)""#)).expect("attribute pattern is valid")
}

fn attr<'a>(pattern: &Regex, tag_body: &'a str) -> Option<&'a str> {
    pattern
        .captures(tag_body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Default extractor for editor-emitted mention tags, e.g.
///
/// ```html
/// <mention-component entity_name="user_mention" entity_identifier="u-1"
///                    target_identifier="issue-9" target_kind="issue"></mention-component>
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MentionExtractor;

impl MentionExtractor {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ReferenceExtractor for MentionExtractor {
    fn extract(
        &self,
        html: &str,
        kind: ReferenceKind,
    ) -> Result<BTreeSet<ReferenceTriple>, ExtractError> {
        let mut found = BTreeSet::new();

        for caps in MENTION_TAG.captures_iter(html) {
            let body = caps.get(1).map_or("", |m| m.as_str());

            // Tags of other kinds are someone else's reconciliation pass.
            if attr(&ENTITY_NAME, body) != Some(kind.mention_name()) {
                continue;
            }

            let reference_id = attr(&ENTITY_IDENTIFIER, body).ok_or(
                ExtractError::MissingAttribute {
                    attribute: "entity_identifier",
                },
            )?;
            let target_entity_id = attr(&TARGET_IDENTIFIER, body).ok_or(
                ExtractError::MissingAttribute {
                    attribute: "target_identifier",
                },
            )?;
            let target_raw = attr(&TARGET_KIND, body).ok_or(ExtractError::MissingAttribute {
                attribute: "target_kind",
            })?;
            let target_kind =
                target_raw
                    .parse::<EntityKind>()
                    .map_err(|_| ExtractError::UnknownTargetKind {
                        value: target_raw.to_string(),
                    })?;

            found.insert(ReferenceTriple {
                reference_id: reference_id.to_string(),
                target_entity_id: target_entity_id.to_string(),
                target_kind,
            });
        }

        Ok(found)
    }
}
