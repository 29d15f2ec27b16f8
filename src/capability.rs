//! The closed set of capability tags a group can hold (spec.md §4.1).
//!
//! Modeled after the teacher's bitmask capability constants
//! (`caps.rs`/`constants.rs`): each tag is one bit of a `u32`, so an
//! effective-capability union across a user's groups and the final
//! `has_rights` check are both a single OR and a single AND. The public
//! surface works in terms of the typed tag and `CapabilitySet`, not raw
//! bits — callers never see the mask layout.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the fixed authorization tags the core understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityTag {
    ManageUsers,
    ShareQueriedObjects,
    AccessAllObjects,
    AddingParents,
    AddingTags,
    RemovingTags,
    AddingComments,
    RemovingComments,
    AddingAllAttributes,
    ReadingAllAttributes,
    RemovingAttributes,
    AddingConfigs,
    AddingBlobs,
    UnlimitedRequests,
}

impl CapabilityTag {
    pub const ALL: [CapabilityTag; 14] = [
        CapabilityTag::ManageUsers,
        CapabilityTag::ShareQueriedObjects,
        CapabilityTag::AccessAllObjects,
        CapabilityTag::AddingParents,
        CapabilityTag::AddingTags,
        CapabilityTag::RemovingTags,
        CapabilityTag::AddingComments,
        CapabilityTag::RemovingComments,
        CapabilityTag::AddingAllAttributes,
        CapabilityTag::ReadingAllAttributes,
        CapabilityTag::RemovingAttributes,
        CapabilityTag::AddingConfigs,
        CapabilityTag::AddingBlobs,
        CapabilityTag::UnlimitedRequests,
    ];

    /// The name used in wire payloads and storage, e.g. `"manage_users"`.
    pub fn name(self) -> &'static str {
        match self {
            CapabilityTag::ManageUsers => "manage_users",
            CapabilityTag::ShareQueriedObjects => "share_queried_objects",
            CapabilityTag::AccessAllObjects => "access_all_objects",
            CapabilityTag::AddingParents => "adding_parents",
            CapabilityTag::AddingTags => "adding_tags",
            CapabilityTag::RemovingTags => "removing_tags",
            CapabilityTag::AddingComments => "adding_comments",
            CapabilityTag::RemovingComments => "removing_comments",
            CapabilityTag::AddingAllAttributes => "adding_all_attributes",
            CapabilityTag::ReadingAllAttributes => "reading_all_attributes",
            CapabilityTag::RemovingAttributes => "removing_attributes",
            CapabilityTag::AddingConfigs => "adding_configs",
            CapabilityTag::AddingBlobs => "adding_blobs",
            CapabilityTag::UnlimitedRequests => "unlimited_requests",
        }
    }

    pub fn from_name(name: &str) -> Option<CapabilityTag> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    #[inline]
    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

impl fmt::Display for CapabilityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A set of capability tags, stored compactly as a bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(u32);

impl CapabilitySet {
    pub const EMPTY: CapabilitySet = CapabilitySet(0);

    pub fn from_mask(mask: u32) -> Self {
        CapabilitySet(mask)
    }

    pub fn mask(self) -> u32 {
        self.0
    }

    pub fn contains(self, tag: CapabilityTag) -> bool {
        self.0 & tag.bit() == tag.bit()
    }

    pub fn insert(&mut self, tag: CapabilityTag) {
        self.0 |= tag.bit();
    }

    pub fn remove(&mut self, tag: CapabilityTag) {
        self.0 &= !tag.bit();
    }

    pub fn union(self, other: CapabilitySet) -> CapabilitySet {
        CapabilitySet(self.0 | other.0)
    }

    pub fn iter(self) -> impl Iterator<Item = CapabilityTag> {
        CapabilityTag::ALL.into_iter().filter(move |t| self.contains(*t))
    }

    pub fn names(self) -> Vec<&'static str> {
        self.iter().map(CapabilityTag::name).collect()
    }
}

impl FromIterator<CapabilityTag> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = CapabilityTag>>(iter: I) -> Self {
        let mut set = CapabilitySet::EMPTY;
        for tag in iter {
            set.insert(tag);
        }
        set
    }
}
