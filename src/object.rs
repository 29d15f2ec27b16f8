//! Object graph domain types: objects, ACL rows, comments, tags, typed
//! attributes, and API keys.
//!
//! Grounded in `original_source/model/object.py` (the `Object`,
//! `ObjectPermission`, `AccessType` classes) and `model/comment.py` /
//! `model/api_key.py`, rendered per spec.md §9's "polymorphic Object
//! hierarchy" note as a single struct discriminated by `type_` rather than
//! a class hierarchy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Object {
    pub id: u64,
    /// `file`, `static_config`, `blob`, or any other externally minted tag.
    pub type_: String,
    /// The only externally visible key; internal ids never leave the core.
    pub dhash: String,
    pub upload_time: DateTime<Utc>,
}

/// Provenance of an ACL row, per spec.md §3/§4.3/§4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessReason {
    /// Granted because the uploading user's private group is attached directly.
    Added,
    /// Propagated down from a parent's ACL row (add-parent rule).
    Shared,
    /// Granted by the auto-share rule in the access façade (§4.4 step 4).
    Queried,
    /// Carried over from a legacy import; the source permits this tag but
    /// nothing in the core currently produces it.
    Migrated,
}

/// `(object, group)` ACL row. At most one per pair; immutable once inserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectPermission {
    pub object_id: u64,
    pub group_id: u64,
    pub access_time: DateTime<Utc>,
    pub reason_type: AccessReason,
    pub related_object_id: Option<u64>,
    pub related_user_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub object_id: u64,
    pub user_id: u64,
    pub comment: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: u64,
    pub name: String,
}

/// Process-wide definition of a typed attribute key, with the per-group
/// permissions needed to read or set it gated unless the requestor holds
/// `reading_all_attributes` / `adding_all_attributes` (spec.md §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetakeyDefinition {
    pub id: u64,
    pub key: String,
    pub label: Option<String>,
    pub description: Option<String>,
    pub hidden: bool,
}

pub const METAKEY_CAN_READ: u64 = 0b01;
pub const METAKEY_CAN_SET: u64 = 0b10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetakeyValue {
    pub object_id: u64,
    pub def_id: u64,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: u64,
    pub uuid: String,
    pub user_id: u64,
    pub issued_on: DateTime<Utc>,
    pub issued_by: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_reason_round_trips_through_json() {
        let r = AccessReason::Queried;
        let s = serde_json::to_string(&r).unwrap();
        assert_eq!(s, "\"queried\"");
        let back: AccessReason = serde_json::from_str(&s).unwrap();
        assert_eq!(back, r);
    }
}
