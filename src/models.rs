use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Opaque EWS folder identifier with an optional change key.
///
/// The change key is only populated by a fresh bind; the enumeration view
/// returns it too, but consumers must not rely on it staying current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderId {
    pub id: String,
    pub change_key: Option<String>,
}

impl FolderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            change_key: None,
        }
    }

    pub fn with_change_key(id: impl Into<String>, change_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            change_key: Some(change_key.into()),
        }
    }
}

impl fmt::Display for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// One folder as returned by enumeration: identifier plus cached display
/// name. Valid for the duration of one run, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRef {
    pub id: FolderId,
    pub display_name: String,
}

/// One page of a deep folder enumeration
#[derive(Debug, Clone)]
pub struct FolderPage {
    pub folders: Vec<FolderRef>,
    pub more_available: bool,
}

/// The two independently settable retention tag slots on a folder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Archive,
    Policy,
}

impl TagKind {
    pub const BOTH: [TagKind; 2] = [TagKind::Archive, TagKind::Policy];

    pub fn as_str(&self) -> &'static str {
        match self {
            TagKind::Archive => "archive",
            TagKind::Policy => "policy",
        }
    }
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A personal retention tag explicitly set on a folder. Presence of the
/// struct means an explicit tag; inherited defaults never appear here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionTag {
    /// Unique token identifying the retention policy definition
    pub retention_id: String,
}

impl RetentionTag {
    pub fn new(retention_id: impl Into<String>) -> Self {
        Self {
            retention_id: retention_id.into(),
        }
    }
}

/// Result of re-reading one folder by identifier: a fresh id (with change
/// key) and the current state of both tag slots.
#[derive(Debug, Clone)]
pub struct FolderTagState {
    pub id: FolderId,
    pub archive_tag: Option<RetentionTag>,
    pub policy_tag: Option<RetentionTag>,
}

impl FolderTagState {
    pub fn tag(&self, kind: TagKind) -> Option<&RetentionTag> {
        match kind {
            TagKind::Archive => self.archive_tag.as_ref(),
            TagKind::Policy => self.policy_tag.as_ref(),
        }
    }

    /// Number of tag slots currently holding an explicit tag
    pub fn tag_count(&self) -> usize {
        usize::from(self.archive_tag.is_some()) + usize::from(self.policy_tag.is_some())
    }
}

/// Tag clears staged against one folder, persisted together in a single
/// update call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagUpdate {
    pub clear_archive: bool,
    pub clear_policy: bool,
}

impl TagUpdate {
    pub fn stage_clear(&mut self, kind: TagKind) {
        match kind {
            TagKind::Archive => self.clear_archive = true,
            TagKind::Policy => self.clear_policy = true,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.clear_archive && !self.clear_policy
    }
}

/// Optional allow-list of retention identifiers. When present it restricts
/// which tagged folders are eligible for removal; when absent every tagged
/// folder is eligible.
#[derive(Debug, Clone, Default)]
pub struct RetentionFilter {
    ids: Option<HashSet<String>>,
}

impl RetentionFilter {
    /// No restriction: every tag is eligible
    pub fn any() -> Self {
        Self { ids: None }
    }

    /// Restrict eligibility to the given identifiers. An empty list behaves
    /// like no restriction.
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: HashSet<String> = ids.into_iter().map(Into::into).collect();
        if set.is_empty() {
            Self::any()
        } else {
            Self { ids: Some(set) }
        }
    }

    /// Parse the comma-separated form used on the command line
    pub fn parse(raw: &str) -> Self {
        Self::from_ids(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        )
    }

    pub fn is_restricted(&self) -> bool {
        self.ids.is_some()
    }

    pub fn allows(&self, retention_id: &str) -> bool {
        match &self.ids {
            Some(ids) => ids.contains(retention_id),
            None => true,
        }
    }
}

/// Counters accumulated over one sweep and reported at the end of the run.
///
/// `found` counts tag instances (a folder with both slots set contributes
/// two); `changed` counts distinct folders persisted. The asymmetry is
/// user-visible in the summary and must not be collapsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub examined: usize,
    pub found: usize,
    pub changed: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "folders examined: {}, retention tags found: {}, folders changed: {}",
            self.examined, self.found, self.changed
        )
    }
}
