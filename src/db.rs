//! LMDB environment, database handles, and process-wide global state.
//!
//! Structured like the teacher's `db.rs`: a single `heed::Env` opened once
//! behind a `OnceLock`, a `Dbs` struct bundling every table, and a `BiPair`
//! helper for relations that need to be walked in both directions
//! (membership, parent/child edges, object/tag). Keys that pair two u64
//! ids reuse the teacher's 16-byte big-endian concatenation (`key(a, b)`)
//! so prefix scans stay cheap range scans.

use std::path::Path;
use std::sync::{Mutex, OnceLock};

use heed::types::{Bytes, SerdeBincode, Str, U64};
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};

use crate::error::{err, CapError, Result};
use crate::identity::{Group, User};
use crate::object::{ApiKey, Comment, MetakeyDefinition, MetakeyValue, Object, ObjectPermission, Tag};

pub type DbStrToU64 = Database<Str, U64<byteorder::BigEndian>>;
/// Prefix-scannable pair index: 16-byte key = `a(8 bytes) || b(8 bytes)`.
pub type DbPair = Database<Bytes, U64<byteorder::BigEndian>>;

#[inline]
pub fn key(a: u64, b: u64) -> [u8; 16] {
    let a = a.to_be_bytes();
    let b = b.to_be_bytes();
    [
        a[0], a[1], a[2], a[3], a[4], a[5], a[6], a[7],
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
    ]
}

/// Bidirectional index: `fwd[a,b]` and `rev[b,a]` are kept in sync so
/// either side of a many-to-many relation can be listed with a prefix scan.
pub struct BiPair {
    pub fwd: DbPair,
    pub rev: DbPair,
}

impl BiPair {
    pub fn contains(&self, tx: &RoTxn, a: u64, b: u64) -> Result<bool> {
        Ok(self.fwd.get(tx, &key(a, b)).map_err(err)?.is_some())
    }

    /// Insert both directions. Returns `false` if the pair already existed,
    /// giving callers the same "did I just create this" signal `grant`
    /// needs for its idempotent-insert contract.
    pub fn insert(&self, tx: &mut RwTxn, a: u64, b: u64, v: u64) -> Result<bool> {
        if self.contains(tx, a, b)? {
            return Ok(false);
        }
        self.fwd.put(tx, &key(a, b), &v).map_err(err)?;
        self.rev.put(tx, &key(b, a), &v).map_err(err)?;
        Ok(true)
    }

    pub fn remove(&self, tx: &mut RwTxn, a: u64, b: u64) -> Result<bool> {
        let removed = self.fwd.delete(tx, &key(a, b)).map_err(err)?;
        self.rev.delete(tx, &key(b, a)).map_err(err)?;
        Ok(removed)
    }

    pub fn list_fwd(&self, tx: &RoTxn, a: u64) -> Result<Vec<u64>> {
        Self::list_pfx(tx, &self.fwd, a)
    }

    pub fn list_rev(&self, tx: &RoTxn, b: u64) -> Result<Vec<u64>> {
        Self::list_pfx(tx, &self.rev, b)
    }

    fn list_pfx(tx: &RoTxn, db: &DbPair, pfx: u64) -> Result<Vec<u64>> {
        let mut out = Vec::new();
        for item in db.prefix_iter(tx, &pfx.to_be_bytes()).map_err(err)? {
            let (k, _) = item.map_err(err)?;
            if k.len() == 16 {
                out.push(u64::from_be_bytes(k[8..16].try_into().unwrap()));
            }
        }
        Ok(out)
    }
}

/// All database handles for the repository core.
pub struct Dbs {
    pub users: Database<U64<byteorder::BigEndian>, SerdeBincode<User>>,
    pub user_login_index: DbStrToU64,

    pub groups: Database<U64<byteorder::BigEndian>, SerdeBincode<Group>>,
    pub group_name_index: DbStrToU64,
    pub membership: BiPair,

    pub objects: Database<U64<byteorder::BigEndian>, SerdeBincode<Object>>,
    pub object_dhash_index: DbStrToU64,
    pub relation: BiPair,

    pub acl_fwd: Database<Bytes, SerdeBincode<ObjectPermission>>,
    pub acl_rev: DbPair,

    pub comments: Database<U64<byteorder::BigEndian>, SerdeBincode<Comment>>,
    pub comments_by_object: BiPair,

    pub tags: Database<U64<byteorder::BigEndian>, SerdeBincode<Tag>>,
    pub tag_name_index: DbStrToU64,
    pub object_tags: BiPair,

    pub metakey_defs: Database<U64<byteorder::BigEndian>, SerdeBincode<MetakeyDefinition>>,
    pub metakey_def_name_index: DbStrToU64,
    pub metakey_permissions: DbPair,
    pub metakeys: Database<Bytes, SerdeBincode<MetakeyValue>>,
    pub metakeys_by_object: BiPair,

    pub api_keys: Database<U64<byteorder::BigEndian>, SerdeBincode<ApiKey>>,
    pub api_key_uuid_index: DbStrToU64,
    pub api_keys_by_user: BiPair,

    pub counters: DbStrToU64,
}

pub static ENV: OnceLock<Env> = OnceLock::new();
pub static DBS: OnceLock<Dbs> = OnceLock::new();
pub static TEST_LOCK: Mutex<()> = Mutex::new(());
pub static INIT_PATH: OnceLock<String> = OnceLock::new();

#[inline]
pub fn dbs() -> Result<&'static Dbs> {
    DBS.get().ok_or_else(|| CapError::storage("not initialized"))
}

#[inline]
pub fn env() -> Result<&'static Env> {
    ENV.get().ok_or_else(|| CapError::storage("not initialized"))
}

pub fn read<T, F: FnOnce(&Dbs, &RoTxn) -> Result<T>>(f: F) -> Result<T> {
    f(dbs()?, &env()?.read_txn().map_err(err)?)
}

/// Allocate the next id for an entity kind (`"user"`, `"group"`, ...).
/// Called from inside an already-open write transaction.
pub fn next_id(tx: &mut RwTxn, kind: &str) -> Result<u64> {
    let counters = dbs()?.counters;
    let current = counters.get(tx, kind).map_err(err)?.unwrap_or(0);
    let next = current + 1;
    counters.put(tx, kind, &next).map_err(err)?;
    Ok(next)
}

const MAX_DBS: u32 = 24;

/// Open (or re-attach to) the LMDB environment at `path`.
pub fn init(path: &str) -> Result<()> {
    if let Some(p) = INIT_PATH.get() {
        return if p == path {
            Ok(())
        } else {
            Err(CapError::storage(format!("already initialized at {p}")))
        };
    }
    std::fs::create_dir_all(path).map_err(err)?;
    // SAFETY: caller guarantees no other process opens this path concurrently.
    let e = unsafe {
        EnvOpenOptions::new()
            .map_size(1 << 30)
            .max_dbs(MAX_DBS)
            .open(Path::new(path))
            .map_err(err)?
    };
    let mut tx = e.write_txn().map_err(err)?;
    let d = Dbs {
        users: e.create_database(&mut tx, Some("users")).map_err(err)?,
        user_login_index: e.create_database(&mut tx, Some("user_login_index")).map_err(err)?,
        groups: e.create_database(&mut tx, Some("groups")).map_err(err)?,
        group_name_index: e.create_database(&mut tx, Some("group_name_index")).map_err(err)?,
        membership: BiPair {
            fwd: e.create_database(&mut tx, Some("membership_fwd")).map_err(err)?,
            rev: e.create_database(&mut tx, Some("membership_rev")).map_err(err)?,
        },
        objects: e.create_database(&mut tx, Some("objects")).map_err(err)?,
        object_dhash_index: e.create_database(&mut tx, Some("object_dhash_index")).map_err(err)?,
        relation: BiPair {
            fwd: e.create_database(&mut tx, Some("relation_fwd")).map_err(err)?,
            rev: e.create_database(&mut tx, Some("relation_rev")).map_err(err)?,
        },
        acl_fwd: e.create_database(&mut tx, Some("acl_fwd")).map_err(err)?,
        acl_rev: e.create_database(&mut tx, Some("acl_rev")).map_err(err)?,
        comments: e.create_database(&mut tx, Some("comments")).map_err(err)?,
        comments_by_object: BiPair {
            fwd: e.create_database(&mut tx, Some("comments_by_object_fwd")).map_err(err)?,
            rev: e.create_database(&mut tx, Some("comments_by_object_rev")).map_err(err)?,
        },
        tags: e.create_database(&mut tx, Some("tags")).map_err(err)?,
        tag_name_index: e.create_database(&mut tx, Some("tag_name_index")).map_err(err)?,
        object_tags: BiPair {
            fwd: e.create_database(&mut tx, Some("object_tags_fwd")).map_err(err)?,
            rev: e.create_database(&mut tx, Some("object_tags_rev")).map_err(err)?,
        },
        metakey_defs: e.create_database(&mut tx, Some("metakey_defs")).map_err(err)?,
        metakey_def_name_index: e.create_database(&mut tx, Some("metakey_def_name_index")).map_err(err)?,
        metakey_permissions: e.create_database(&mut tx, Some("metakey_permissions")).map_err(err)?,
        metakeys: e.create_database(&mut tx, Some("metakeys")).map_err(err)?,
        metakeys_by_object: BiPair {
            fwd: e.create_database(&mut tx, Some("metakeys_by_object_fwd")).map_err(err)?,
            rev: e.create_database(&mut tx, Some("metakeys_by_object_rev")).map_err(err)?,
        },
        api_keys: e.create_database(&mut tx, Some("api_keys")).map_err(err)?,
        api_key_uuid_index: e.create_database(&mut tx, Some("api_key_uuid_index")).map_err(err)?,
        api_keys_by_user: BiPair {
            fwd: e.create_database(&mut tx, Some("api_keys_by_user_fwd")).map_err(err)?,
            rev: e.create_database(&mut tx, Some("api_keys_by_user_rev")).map_err(err)?,
        },
        counters: e.create_database(&mut tx, Some("counters")).map_err(err)?,
    };
    tx.commit().map_err(err)?;
    let _ = (ENV.set(e), DBS.set(d), INIT_PATH.set(path.to_string()));
    Ok(())
}

/// Wipe every table. Test-only: production has no use for dropping data
/// wholesale.
pub fn clear_all() -> Result<()> {
    let env = env()?;
    let mut tx = env.write_txn().map_err(err)?;
    let d = dbs()?;
    d.users.clear(&mut tx).map_err(err)?;
    d.user_login_index.clear(&mut tx).map_err(err)?;
    d.groups.clear(&mut tx).map_err(err)?;
    d.group_name_index.clear(&mut tx).map_err(err)?;
    d.membership.fwd.clear(&mut tx).map_err(err)?;
    d.membership.rev.clear(&mut tx).map_err(err)?;
    d.objects.clear(&mut tx).map_err(err)?;
    d.object_dhash_index.clear(&mut tx).map_err(err)?;
    d.relation.fwd.clear(&mut tx).map_err(err)?;
    d.relation.rev.clear(&mut tx).map_err(err)?;
    d.acl_fwd.clear(&mut tx).map_err(err)?;
    d.acl_rev.clear(&mut tx).map_err(err)?;
    d.comments.clear(&mut tx).map_err(err)?;
    d.comments_by_object.fwd.clear(&mut tx).map_err(err)?;
    d.comments_by_object.rev.clear(&mut tx).map_err(err)?;
    d.tags.clear(&mut tx).map_err(err)?;
    d.tag_name_index.clear(&mut tx).map_err(err)?;
    d.object_tags.fwd.clear(&mut tx).map_err(err)?;
    d.object_tags.rev.clear(&mut tx).map_err(err)?;
    d.metakey_defs.clear(&mut tx).map_err(err)?;
    d.metakey_def_name_index.clear(&mut tx).map_err(err)?;
    d.metakey_permissions.clear(&mut tx).map_err(err)?;
    d.metakeys.clear(&mut tx).map_err(err)?;
    d.metakeys_by_object.fwd.clear(&mut tx).map_err(err)?;
    d.metakeys_by_object.rev.clear(&mut tx).map_err(err)?;
    d.api_keys.clear(&mut tx).map_err(err)?;
    d.api_key_uuid_index.clear(&mut tx).map_err(err)?;
    d.api_keys_by_user.fwd.clear(&mut tx).map_err(err)?;
    d.api_keys_by_user.rev.clear(&mut tx).map_err(err)?;
    d.counters.clear(&mut tx).map_err(err)?;
    tx.commit().map_err(err)
}

/// Hold for the duration of a test to serialize access to the one
/// process-wide LMDB environment across `#[test]` functions.
pub fn test_lock() -> std::sync::MutexGuard<'static, ()> {
    TEST_LOCK.lock().unwrap_or_else(|p| p.into_inner())
}

#[cfg(test)]
pub fn open_temp() -> (tempfile::TempDir, Result<()>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let r = init(dir.path().to_str().unwrap());
    (dir, r)
}
