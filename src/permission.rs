//! The permission engine: idempotent ACL insertion and BFS propagation.
//!
//! This is the load-bearing piece the teacher's inheritance-resolution code
//! (`core.rs::check_access`, `read.rs::resolve`) is adapted from, but the
//! shape changes from "walk a parent chain summing bits" to "walk a DAG of
//! typed objects inserting immutable ACL rows," per
//! `original_source/model/object.py::Object.give_access`. `grant`'s
//! get-before-put is the nested-savepoint stand-in spec.md §5 calls for:
//! LMDB has no per-call savepoint, but it is single-writer, so the
//! existence check inside the one open `RwTxn` is equivalent to SQL's
//! insert-then-rollback-then-recheck.

use std::collections::{HashSet, VecDeque};

use chrono::Utc;
use heed::{RoTxn, RwTxn};

use crate::db::{key, Dbs};
use crate::error::{err, Result};
use crate::object::{AccessReason, ObjectPermission};

/// Idempotent ACL insert. Returns `true` iff *this* call created the row —
/// `propagate`'s termination condition depends on that signal being exact.
pub fn grant(
    dbs: &Dbs,
    tx: &mut RwTxn,
    object_id: u64,
    group_id: u64,
    reason: AccessReason,
    related_object_id: Option<u64>,
    related_user_id: Option<u64>,
) -> Result<bool> {
    let k = key(object_id, group_id);
    if dbs.acl_fwd.get(tx, &k).map_err(err)?.is_some() {
        return Ok(false);
    }
    let row = ObjectPermission {
        object_id,
        group_id,
        access_time: Utc::now(),
        reason_type: reason,
        related_object_id,
        related_user_id,
    };
    dbs.acl_fwd.put(tx, &k, &row).map_err(err)?;
    dbs.acl_rev.put(tx, &key(group_id, object_id), &1).map_err(err)?;
    Ok(true)
}

/// BFS grant along child edges, stopping at any node whose ACL row already
/// existed. Tolerates cycles and concurrent propagations by construction:
/// see module docs.
pub fn propagate(
    dbs: &Dbs,
    tx: &mut RwTxn,
    root_object: u64,
    group_id: u64,
    reason: AccessReason,
    related_object_id: Option<u64>,
    related_user_id: Option<u64>,
) -> Result<()> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(root_object);
    visited.insert(root_object);

    while let Some(node) = queue.pop_front() {
        let inserted = grant(dbs, tx, node, group_id, reason, related_object_id, related_user_id)?;
        if inserted {
            for child in dbs.relation.list_fwd(tx, node)? {
                if visited.insert(child) {
                    queue.push_back(child);
                }
            }
        }
    }
    Ok(())
}

/// Existence check: does an ACL row make `object_id` accessible to any of
/// `user_groups`? `access_all_objects` holders always see everything.
pub fn explicit_access(
    dbs: &Dbs,
    tx: &RoTxn,
    user_groups: &[u64],
    access_all_objects: bool,
    object_id: u64,
) -> Result<bool> {
    if access_all_objects {
        return Ok(true);
    }
    for group_id in user_groups {
        if dbs.acl_fwd.get(tx, &key(object_id, *group_id)).map_err(err)?.is_some() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Every ACL row recorded directly against `object_id`, regardless of
/// which group. Used by `add_parent` to find the rows that need
/// re-propagating to a newly attached child.
pub fn rows_for_object(dbs: &Dbs, tx: &RoTxn, object_id: u64) -> Result<Vec<ObjectPermission>> {
    let mut rows = Vec::new();
    for item in dbs.acl_fwd.prefix_iter(tx, &object_id.to_be_bytes()).map_err(err)? {
        let (_, row) = item.map_err(err)?;
        rows.push(row);
    }
    Ok(rows)
}

/// The parents of `object_id` that are themselves visible to the
/// requestor — the "visible-parents view" from spec.md §4.4 step 2.
pub fn visible_parent_ids(
    dbs: &Dbs,
    tx: &RoTxn,
    object_id: u64,
    user_groups: &[u64],
    access_all_objects: bool,
) -> Result<Vec<u64>> {
    let mut visible = Vec::new();
    for parent_id in dbs.relation.list_rev(tx, object_id)? {
        if explicit_access(dbs, tx, user_groups, access_all_objects, parent_id)? {
            visible.push(parent_id);
        }
    }
    Ok(visible)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn setup() -> tempfile::TempDir {
        let _lock = db::test_lock();
        let dir = tempfile::tempdir().unwrap();
        db::init(dir.path().to_str().unwrap()).ok();
        db::clear_all().unwrap();
        dir
    }

    #[test]
    fn grant_is_idempotent() {
        let _dir = setup();
        let dbs = db::dbs().unwrap();
        let env = db::env().unwrap();
        let mut tx = env.write_txn().unwrap();
        assert!(grant(dbs, &mut tx, 1, 1, AccessReason::Added, None, None).unwrap());
        assert!(!grant(dbs, &mut tx, 1, 1, AccessReason::Added, None, None).unwrap());
        tx.commit().unwrap();
    }

    #[test]
    fn propagate_stops_at_cycles() {
        let _dir = setup();
        let dbs = db::dbs().unwrap();
        let env = db::env().unwrap();
        let mut tx = env.write_txn().unwrap();
        // A -> B -> A (cycle)
        dbs.relation.insert(&mut tx, 1, 2, 1).unwrap();
        dbs.relation.insert(&mut tx, 2, 1, 1).unwrap();
        propagate(dbs, &mut tx, 1, 10, AccessReason::Added, None, None).unwrap();
        assert!(explicit_access(dbs, &tx, &[10], false, 1).unwrap());
        assert!(explicit_access(dbs, &tx, &[10], false, 2).unwrap());
        tx.commit().unwrap();
    }

    #[test]
    fn propagate_respects_multi_parent_visibility() {
        let _dir = setup();
        let dbs = db::dbs().unwrap();
        let env = db::env().unwrap();
        let mut tx = env.write_txn().unwrap();
        // A, B both parents of X; only A is granted to group 10.
        dbs.relation.insert(&mut tx, 1, 3, 1).unwrap(); // A(1) -> X(3)
        dbs.relation.insert(&mut tx, 2, 3, 1).unwrap(); // B(2) -> X(3)
        grant(dbs, &mut tx, 1, 10, AccessReason::Added, None, None).unwrap();
        let visible = visible_parent_ids(dbs, &tx, 3, &[10], false).unwrap();
        assert_eq!(visible, vec![1]);
        tx.commit().unwrap();
    }
}
