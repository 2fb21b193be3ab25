use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

const UNUSABLE_UIDS: &[&str] = &["unknown", "n/a", "none", "-"];

/// A group (team) or container (shared folder) as reported by the admin tool.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct NamedEntity {
    pub name: String,
    pub uid: String,
}

impl NamedEntity {
    pub fn new(name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: uid.into(),
        }
    }

    /// True when the UID can be handed to a mutating command.
    pub fn is_usable(&self) -> bool {
        let uid = self.uid.trim();
        !uid.is_empty()
            && !UNUSABLE_UIDS
                .iter()
                .any(|sentinel| uid.eq_ignore_ascii_case(sentinel))
    }

    /// Matches a user-supplied filter against the UID or, ignoring case, the name.
    pub fn matches_filter(&self, filter: &str) -> bool {
        let filter = filter.trim();
        self.uid == filter || self.name.eq_ignore_ascii_case(filter)
    }
}

impl fmt::Display for NamedEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.uid)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntityKind {
    Group,
    Container,
}

impl EntityKind {
    pub fn label(self) -> &'static str {
        match self {
            EntityKind::Group => "team",
            EntityKind::Container => "shared folder",
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PermissionEntry {
    pub group_uid: Option<String>,
    pub group_name: Option<String>,
    pub manage_records: Option<bool>,
    pub manage_users: Option<bool>,
}

impl PermissionEntry {
    fn refers_to(&self, group: &NamedEntity) -> bool {
        if let Some(uid) = self.group_uid.as_deref()
            && uid == group.uid
        {
            return true;
        }
        self.group_name
            .as_deref()
            .is_some_and(|name| name.eq_ignore_ascii_case(&group.name))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContainerDetail {
    pub entity: NamedEntity,
    pub permissions: Vec<PermissionEntry>,
}

impl ContainerDetail {
    /// Membership is boolean: the first entry naming the group settles it.
    pub fn matches_group(&self, group: &NamedEntity) -> bool {
        self.permissions.iter().any(|entry| entry.refers_to(group))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TargetOrigin {
    Discovered,
    Explicit,
    PreResolved { captured_at: Option<DateTime<Utc>> },
}

/// Containers selected for transfer, unique by UID, in first-seen order.
#[derive(Clone, Debug)]
pub struct TargetSet {
    entries: Vec<NamedEntity>,
    origin: TargetOrigin,
    dropped: usize,
}

impl TargetSet {
    pub fn build<I>(entities: I, origin: TargetOrigin) -> Self
    where
        I: IntoIterator<Item = NamedEntity>,
    {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        let mut dropped = 0;
        for entity in entities {
            if !entity.is_usable() {
                warn!(name = %entity.name, uid = %entity.uid, "dropping target without a usable uid");
                dropped += 1;
                continue;
            }
            if seen.insert(entity.uid.clone()) {
                entries.push(entity);
            }
        }
        Self {
            entries,
            origin,
            dropped,
        }
    }

    pub fn entries(&self) -> &[NamedEntity] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamedEntity> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn origin(&self) -> &TargetOrigin {
        &self.origin
    }

    /// Number of input entities rejected for an unusable UID.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StepOutcome {
    Succeeded,
    Failed(String),
    Skipped,
}

impl StepOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }
}

#[derive(Clone, Debug)]
pub struct TransferOutcome {
    pub uid: String,
    pub name: String,
    pub grant: StepOutcome,
    pub ownership: StepOutcome,
}

impl TransferOutcome {
    pub fn failed_steps(&self) -> usize {
        usize::from(self.grant.is_failure()) + usize::from(self.ownership.is_failure())
    }
}
