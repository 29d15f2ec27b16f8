//! System initialization: the public group and the first administrator.
//!
//! Grounded on the teacher's `bootstrap.rs` shape — an idempotent
//! `is_bootstrapped`/`bootstrap` pair run once at process startup — but the
//! teacher bootstraps a root grant on a synthetic `_system` node under its
//! bitmask model; here there is no system object to grant against, so
//! "bootstrapped" means the admin login from [`Config`](crate::config::Config)
//! resolves to an approved user holding every capability tag.

use crate::capability::CapabilitySet;
use crate::error::Result;
use crate::tx::{transact, Tx};

pub fn is_bootstrapped(tx: &mut Tx, admin_login: &str) -> Result<bool> {
    Ok(tx.get_user_by_login(admin_login)?.is_some())
}

/// Ensure the public group exists and the configured admin login resolves
/// to an approved, all-capabilities user. Safe to call on every process
/// start; does nothing past the first successful run.
pub fn bootstrap(admin_login: &str, admin_email: &str, admin_password: &str) -> Result<u64> {
    transact(|tx| {
        tx.ensure_public_group()?;

        if let Some(user) = tx.get_user_by_login(admin_login)? {
            return Ok(user.id);
        }

        let admin_id = tx.register_user(admin_login, admin_email, Some(admin_password))?;
        tx.approve_user(admin_id, admin_id)?;

        let all_caps: CapabilitySet = crate::capability::CapabilityTag::ALL.into_iter().collect();
        let admin_group = tx.create_group(&format!("{admin_login}-admin"), false, all_caps)?;
        tx.add_member(admin_id, admin_group)?;

        Ok(admin_id)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityTag;
    use crate::db;
    use crate::identity::PUBLIC_GROUP_NAME;

    fn setup() -> tempfile::TempDir {
        let _lock = db::test_lock();
        let dir = tempfile::tempdir().unwrap();
        db::init(dir.path().to_str().unwrap()).ok();
        db::clear_all().unwrap();
        dir
    }

    #[test]
    fn bootstrap_creates_admin_with_all_capabilities() {
        let _dir = setup();
        let admin_id = bootstrap("admin", "admin@example.com", "hunter2hunter2").unwrap();
        let caps = transact(|tx| {
            let group_ids = tx.user_groups(admin_id)?;
            let mut caps = CapabilitySet::EMPTY;
            for group_id in group_ids {
                if let Some(group) = tx.get_group(group_id)? {
                    caps = caps.union(group.capabilities);
                }
            }
            Ok(caps)
        })
        .unwrap();
        assert!(caps.contains(CapabilityTag::ManageUsers));
        assert!(caps.contains(CapabilityTag::AccessAllObjects));
    }

    #[test]
    fn bootstrap_is_idempotent() {
        let _dir = setup();
        let first = bootstrap("admin", "admin@example.com", "hunter2hunter2").unwrap();
        let second = bootstrap("admin", "admin@example.com", "hunter2hunter2").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn public_group_exists_after_bootstrap() {
        let _dir = setup();
        bootstrap("admin", "admin@example.com", "hunter2hunter2").unwrap();
        let exists = transact(|tx| Ok(tx.group_id_by_name(PUBLIC_GROUP_NAME)?.is_some())).unwrap();
        assert!(exists);
    }
}
