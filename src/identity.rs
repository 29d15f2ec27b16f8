//! Users, groups, and password hashing.
//!
//! Field layout follows `original_source/model/user.py` and
//! `model/group.py`: a `User` carries its own `password_ver`/`identity_ver`
//! revocation counters (rotated as opaque random hex strings, matching the
//! original's `os.urandom(8).hex()`) instead of the teacher's role-bitmask
//! membership model. Password hashing is Argon2 rather than the teacher's
//! hand-rolled `sha2(salt || password)` in `auth.rs` — grounded instead in
//! `examples/sahays-micros/auth-service/src/utils/password.rs`, which is
//! the pack's only real password-hashing implementation.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use getrandom::getrandom;
use serde::{Deserialize, Serialize};

use crate::capability::CapabilitySet;
use crate::error::{CapError, Result};

pub const PUBLIC_GROUP_NAME: &str = "public";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub login: String,
    pub email: String,
    /// `None` while `pending` — a pending user has no usable password yet.
    pub password_hash: Option<String>,
    /// Rotated on every password change; invalidates session + set-password tokens.
    pub password_ver: String,
    /// Rotated on session reset / disable; invalidates session tokens only.
    pub identity_ver: String,
    pub pending: bool,
    pub disabled: bool,
    pub requested_on: DateTime<Utc>,
    pub registered_on: Option<DateTime<Utc>>,
    pub registered_by: Option<u64>,
    pub logged_on: Option<DateTime<Utc>>,
    pub set_password_on: Option<DateTime<Utc>>,
    pub feed_quality: String,
    pub additional_info: String,
}

impl User {
    pub fn is_member_of(&self, membership: &[u64], group_id: u64) -> bool {
        membership.contains(&group_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: u64,
    pub name: String,
    pub capabilities: CapabilitySet,
    pub private: bool,
}

impl Group {
    /// `private` groups and the `public` group can't be edited through the
    /// ordinary management surface (spec.md §3 Group invariants).
    pub fn immutable(&self) -> bool {
        self.private || self.name == PUBLIC_GROUP_NAME
    }
}

/// The union of capabilities across a user's groups, per spec.md §4.1.
pub fn effective_capabilities(groups: &[Group]) -> CapabilitySet {
    groups.iter().fold(CapabilitySet::EMPTY, |acc, g| acc.union(g.capabilities))
}

/// Hash a plaintext password with Argon2, generating a fresh random salt.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut rand_core_compat());
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| CapError::storage(format!("password hash: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else { return false };
    Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
}

/// `argon2`'s `SaltString::generate` wants an `rand_core::CryptoRngCore`;
/// the rest of this crate standardizes on `getrandom` for randomness, so
/// bridge the two rather than pulling in `rand` for one call site.
fn rand_core_compat() -> impl rand_core::CryptoRngCore {
    struct GetrandomRng;
    impl rand_core::RngCore for GetrandomRng {
        fn next_u32(&mut self) -> u32 {
            let mut buf = [0u8; 4];
            getrandom(&mut buf).expect("getrandom");
            u32::from_ne_bytes(buf)
        }
        fn next_u64(&mut self) -> u64 {
            let mut buf = [0u8; 8];
            getrandom(&mut buf).expect("getrandom");
            u64::from_ne_bytes(buf)
        }
        fn fill_bytes(&mut self, dest: &mut [u8]) {
            getrandom(dest).expect("getrandom");
        }
        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand_core::Error> {
            getrandom(dest).map_err(|_| rand_core::Error::new("getrandom failure"))
        }
    }
    impl rand_core::CryptoRng for GetrandomRng {}
    GetrandomRng
}

/// A fresh revocation-counter value: 8 random bytes, hex-encoded, matching
/// the original's `os.urandom(8).hex()`.
pub fn new_version_tag() -> String {
    let mut buf = [0u8; 8];
    getrandom(&mut buf).expect("getrandom");
    buf.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_round_trips() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse battery staple", &hash));
        assert!(!verify_password("wrong password", &hash));
    }

    #[test]
    fn same_password_hashes_differently_each_time() {
        let a = hash_password("same-password").unwrap();
        let b = hash_password("same-password").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn effective_capabilities_is_union_of_groups() {
        use crate::capability::CapabilityTag;
        let g1 = Group {
            id: 1,
            name: "g1".into(),
            capabilities: [CapabilityTag::ManageUsers].into_iter().collect(),
            private: false,
        };
        let g2 = Group {
            id: 2,
            name: "g2".into(),
            capabilities: [CapabilityTag::AddingTags].into_iter().collect(),
            private: false,
        };
        let caps = effective_capabilities(&[g1, g2]);
        assert!(caps.contains(CapabilityTag::ManageUsers));
        assert!(caps.contains(CapabilityTag::AddingTags));
    }

    #[test]
    fn version_tags_are_not_trivially_repeated() {
        assert_ne!(new_version_tag(), new_version_tag());
    }
}
