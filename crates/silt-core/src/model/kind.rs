use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Error returned when a stored string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {what} '{value}'")]
pub struct UnknownKind {
    what: &'static str,
    value: String,
}

/// The kinds of entity a user can visit.
///
/// The set is closed on purpose: each kind maps at compile time to the
/// retention [`Bucket`] it counts against, so dispatch never rides on
/// free-form strings from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Issue,
    Page,
    Project,
    Cycle,
    Module,
    View,
}

impl EntityKind {
    pub const ALL: [Self; 6] = [
        Self::Issue,
        Self::Page,
        Self::Project,
        Self::Cycle,
        Self::Module,
        Self::View,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Issue => "issue",
            Self::Page => "page",
            Self::Project => "project",
            Self::Cycle => "cycle",
            Self::Module => "module",
            Self::View => "view",
        }
    }

    /// Retention bucket this kind counts against.
    ///
    /// Issues and pages are visited an order of magnitude more often than
    /// the other kinds, so each gets an independent bucket and cannot
    /// evict a user's recently-visited projects, cycles, modules or views.
    #[must_use]
    pub const fn bucket(self) -> Bucket {
        match self {
            Self::Issue => Bucket::Issues,
            Self::Page => Bucket::Pages,
            Self::Project | Self::Cycle | Self::Module | Self::View => Bucket::General,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "issue" => Ok(Self::Issue),
            "page" => Ok(Self::Page),
            "project" => Ok(Self::Project),
            "cycle" => Ok(Self::Cycle),
            "module" => Ok(Self::Module),
            "view" => Ok(Self::View),
            other => Err(UnknownKind {
                what: "entity kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Capacity bucket for recent-visit retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Issues,
    Pages,
    General,
}

impl Bucket {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Issues => "issues",
            Self::Pages => "pages",
            Self::General => "general",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kinds of cross-reference the reconciler maintains.
///
/// Each kind is diffed independently: a document's user mentions are
/// reconciled without touching its issue or page mentions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    User,
    Issue,
    Page,
}

impl ReferenceKind {
    pub const ALL: [Self; 3] = [Self::User, Self::Issue, Self::Page];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Issue => "issue",
            Self::Page => "page",
        }
    }

    /// The `entity_name` attribute value the rich-text editor emits for
    /// mentions of this kind.
    #[must_use]
    pub const fn mention_name(self) -> &'static str {
        match self {
            Self::User => "user_mention",
            Self::Issue => "issue_mention",
            Self::Page => "page_mention",
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferenceKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "issue" => Ok(Self::Issue),
            "page" => Ok(Self::Page),
            other => Err(UnknownKind {
                what: "reference kind",
                value: other.to_string(),
            }),
        }
    }
}
