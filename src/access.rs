//! The access façade: the single entry point objects are read through.
//!
//! Grounded directly on `original_source/model/object.py::Object.access`,
//! the four-step algorithm from spec.md §4.4: resolve by digest, compute
//! the visible-parents view, check explicit access, and otherwise
//! auto-share (recording `queried` provenance) if the requestor qualifies.

use chrono::{DateTime, Utc};

use crate::capability::CapabilityTag;
use crate::error::Result;
use crate::identity::{self, Group};
use crate::object::AccessReason;
use crate::permission;
use crate::tx::Tx;

/// A view of an object with only the parents the requestor may see.
#[derive(Debug, Clone)]
pub struct ObjectView {
    pub id: u64,
    pub type_: String,
    pub dhash: String,
    pub upload_time: DateTime<Utc>,
    /// Parents filtered by `visible(requestor)` — spec.md §4.4 step 2.
    /// Graph shape beyond this is intentionally hidden from callers.
    pub visible_parent_dhashes: Vec<String>,
}

/// `Object.access(identifier, requestor)` → view or `None`.
pub fn access(tx: &mut Tx, dhash: &str, requestor_id: u64) -> Result<Option<ObjectView>> {
    let Some(object) = tx.get_object_by_dhash(dhash)? else {
        return Ok(None);
    };

    let group_ids = tx.user_groups(requestor_id)?;
    let mut groups = Vec::with_capacity(group_ids.len());
    for group_id in &group_ids {
        if let Some(group) = tx.get_group(*group_id)? {
            groups.push(group);
        }
    }
    let caps = identity::effective_capabilities(&groups);
    let access_all = caps.contains(CapabilityTag::AccessAllObjects);

    let visible_parent_ids = permission::visible_parent_ids(tx.dbs(), tx.ro(), object.id, &group_ids, access_all)?;
    let mut visible_parent_dhashes = Vec::with_capacity(visible_parent_ids.len());
    for parent_id in visible_parent_ids {
        if let Some(parent) = tx.get_object(parent_id)? {
            visible_parent_dhashes.push(parent.dhash);
        }
    }

    let view = ObjectView {
        id: object.id,
        type_: object.type_.clone(),
        dhash: object.dhash.clone(),
        upload_time: object.upload_time,
        visible_parent_dhashes,
    };

    if permission::explicit_access(tx.dbs(), tx.ro(), &group_ids, access_all, object.id)? {
        return Ok(Some(view));
    }

    if caps.contains(CapabilityTag::ShareQueriedObjects) {
        let qualifying: Vec<Group> = groups
            .into_iter()
            .filter(|g| g.capabilities.contains(CapabilityTag::ShareQueriedObjects))
            .collect();
        for group in qualifying {
            tx.propagate(object.id, group.id, AccessReason::Queried, Some(object.id), Some(requestor_id))?;
        }
        return Ok(Some(view));
    }

    Ok(None)
}
