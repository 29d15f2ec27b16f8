//! Transaction wrapper threading one write transaction through every
//! mutating core operation, per spec.md §9's "ambient storage session"
//! note. Structured like the teacher's `tx.rs`: a `Tx` bundling a
//! `'static` `RwTxn` with the database handles, and a free `transact`
//! helper that opens, runs, and commits.

use chrono::Utc;
use heed::RwTxn;

use crate::capability::CapabilityTag;
use crate::db::{dbs, env, key, next_id, Dbs};
use crate::error::{err, CapError, Result};
use crate::identity::{self, Group, User, PUBLIC_GROUP_NAME};
use crate::object::{
    AccessReason, ApiKey, Comment, MetakeyDefinition, MetakeyValue, Object, Tag, METAKEY_CAN_READ, METAKEY_CAN_SET,
};
use crate::permission;

pub struct Tx {
    txn: Option<RwTxn<'static>>,
    dbs: &'static Dbs,
}

impl Tx {
    pub(crate) fn new() -> Result<Self> {
        Ok(Tx { txn: Some(env()?.write_txn().map_err(err)?), dbs: dbs()? })
    }

    #[inline]
    pub(crate) fn raw(&mut self) -> &mut RwTxn<'static> {
        self.txn.as_mut().unwrap()
    }

    /// Borrow the open write transaction as a read-only view, for callers
    /// (like the permission engine's read-side helpers) that only need to
    /// look things up.
    pub fn ro(&mut self) -> &heed::RoTxn<'static> {
        self.raw()
    }

    pub fn dbs(&self) -> &'static Dbs {
        self.dbs
    }

    pub fn commit(mut self) -> Result<()> {
        self.txn.take().unwrap().commit().map_err(err)
    }

    // ---- users & groups --------------------------------------------------

    /// Create a group, checking the name against both user logins and
    /// group names (spec.md §3: "`login` is unique across users AND group
    /// names").
    pub fn create_group(
        &mut self,
        name: &str,
        private: bool,
        capabilities: crate::capability::CapabilitySet,
    ) -> Result<u64> {
        self.check_name_free(name)?;
        let id = next_id(self.raw(), "group")?;
        let group = Group { id, name: name.to_string(), capabilities, private };
        self.dbs.groups.put(self.raw(), &id, &group).map_err(err)?;
        self.dbs.group_name_index.put(self.raw(), name, &id).map_err(err)?;
        Ok(id)
    }

    fn check_name_free(&mut self, name: &str) -> Result<()> {
        if self.dbs.user_login_index.get(self.raw(), name).map_err(err)?.is_some()
            || self.dbs.group_name_index.get(self.raw(), name).map_err(err)?.is_some()
        {
            return Err(CapError::conflict(format!("name already in use: {name}")));
        }
        Ok(())
    }

    pub fn add_member(&mut self, user_id: u64, group_id: u64) -> Result<bool> {
        self.dbs.membership.insert(self.raw(), user_id, group_id, 1)
    }

    pub fn remove_member(&mut self, user_id: u64, group_id: u64) -> Result<bool> {
        self.dbs.membership.remove(self.raw(), user_id, group_id)
    }

    /// Ensure the public group exists; idempotent. Every new user is
    /// joined to it immediately (spec.md §4.6).
    pub fn ensure_public_group(&mut self) -> Result<u64> {
        if let Some(id) = self.dbs.group_name_index.get(self.raw(), PUBLIC_GROUP_NAME).map_err(err)? {
            return Ok(id);
        }
        self.create_group(PUBLIC_GROUP_NAME, false, crate::capability::CapabilitySet::EMPTY)
    }

    /// Register a new pending user with a private group, per
    /// `original_source/resources/auth.py::RegisterResource` and
    /// `model/user.py`. Caller is responsible for checking
    /// `enable_registration` and captcha before calling this.
    pub fn register_user(&mut self, login: &str, email: &str, password: Option<&str>) -> Result<u64> {
        self.check_name_free(login)?;
        let public_group = self.ensure_public_group()?;

        let password_hash = password.map(identity::hash_password).transpose()?;
        let id = next_id(self.raw(), "user")?;
        let user = User {
            id,
            login: login.to_string(),
            email: email.to_string(),
            password_hash,
            password_ver: identity::new_version_tag(),
            identity_ver: identity::new_version_tag(),
            pending: true,
            disabled: false,
            requested_on: Utc::now(),
            registered_on: None,
            registered_by: None,
            logged_on: None,
            set_password_on: None,
            feed_quality: "high".to_string(),
            additional_info: String::new(),
        };
        self.dbs.users.put(self.raw(), &id, &user).map_err(err)?;
        self.dbs.user_login_index.put(self.raw(), login, &id).map_err(err)?;

        // private group, named after the login, containing only this user
        let private_group = self.create_group(login, true, crate::capability::CapabilitySet::EMPTY)?;
        self.add_member(id, private_group)?;
        self.add_member(id, public_group)?;
        Ok(id)
    }

    /// Create an already-approved user directly (admin `POST /user/<login>`
    /// path, per `resources/user.py::UserResource.post`).
    pub fn create_user(&mut self, login: &str, email: &str, password: &str, created_by: u64) -> Result<u64> {
        let id = self.register_user(login, email, Some(password))?;
        self.approve_user(id, created_by)?;
        Ok(id)
    }

    pub fn get_user(&mut self, id: u64) -> Result<Option<User>> {
        self.dbs.users.get(self.raw(), &id).map_err(err)
    }

    pub fn get_user_by_login(&mut self, login: &str) -> Result<Option<User>> {
        match self.dbs.user_login_index.get(self.raw(), login).map_err(err)? {
            Some(id) => self.get_user(id),
            None => Ok(None),
        }
    }

    fn put_user(&mut self, user: &User) -> Result<()> {
        self.dbs.users.put(self.raw(), &user.id, user).map_err(err)
    }

    /// Flip `pending` off, recording who approved and when. Dispatching
    /// the set-password email is the caller's job (the core has no
    /// `Notifier`) — see `mail.rs`.
    pub fn approve_user(&mut self, user_id: u64, approved_by: u64) -> Result<()> {
        let mut user = self.get_user(user_id)?.ok_or_else(|| CapError::not_found("no such user"))?;
        user.pending = false;
        user.registered_on = Some(Utc::now());
        user.registered_by = Some(approved_by);
        self.put_user(&user)
    }

    /// Delete a pending user and their private group.
    pub fn reject_user(&mut self, user_id: u64) -> Result<()> {
        let user = self.get_user(user_id)?.ok_or_else(|| CapError::not_found("no such user"))?;
        if let Some(group_id) = self.dbs.group_name_index.get(self.raw(), &user.login).map_err(err)? {
            self.remove_member(user_id, group_id)?;
            self.dbs.groups.delete(self.raw(), &group_id).map_err(err)?;
            self.dbs.group_name_index.delete(self.raw(), &user.login).map_err(err)?;
        }
        self.dbs.users.delete(self.raw(), &user_id).map_err(err)?;
        self.dbs.user_login_index.delete(self.raw(), &user.login).map_err(err)?;
        Ok(())
    }

    /// Rotate `password_ver`, invalidating outstanding session and
    /// set-password tokens (spec.md §4.2).
    pub fn set_password(&mut self, user_id: u64, new_password: &str) -> Result<()> {
        let mut user = self.get_user(user_id)?.ok_or_else(|| CapError::not_found("no such user"))?;
        user.password_hash = Some(identity::hash_password(new_password)?);
        user.password_ver = identity::new_version_tag();
        user.set_password_on = Some(Utc::now());
        self.put_user(&user)
    }

    /// Rotate `identity_ver`, invalidating outstanding session tokens only.
    pub fn reset_sessions(&mut self, user_id: u64) -> Result<()> {
        let mut user = self.get_user(user_id)?.ok_or_else(|| CapError::not_found("no such user"))?;
        user.identity_ver = identity::new_version_tag();
        self.put_user(&user)
    }

    pub fn set_disabled(&mut self, user_id: u64, disabled: bool) -> Result<()> {
        let mut user = self.get_user(user_id)?.ok_or_else(|| CapError::not_found("no such user"))?;
        user.disabled = disabled;
        self.put_user(&user)?;
        if disabled {
            self.reset_sessions(user_id)?;
        }
        Ok(())
    }

    pub fn record_login(&mut self, user_id: u64) -> Result<()> {
        let mut user = self.get_user(user_id)?.ok_or_else(|| CapError::not_found("no such user"))?;
        user.logged_on = Some(Utc::now());
        self.put_user(&user)
    }

    pub fn user_groups(&mut self, user_id: u64) -> Result<Vec<u64>> {
        self.dbs.membership.list_fwd(self.raw(), user_id)
    }

    /// Every registered user, for the `manage_users`-gated listing surface.
    pub fn list_users(&mut self) -> Result<Vec<User>> {
        let mut out = Vec::new();
        for item in self.dbs.users.iter(self.raw()).map_err(err)? {
            let (_, user) = item.map_err(err)?;
            out.push(user);
        }
        Ok(out)
    }

    /// Edit the non-identity fields a self-service profile update or an
    /// admin `PUT /user/<login>` may touch.
    pub fn update_user_profile(&mut self, user_id: u64, feed_quality: Option<&str>, additional_info: Option<&str>) -> Result<()> {
        let mut user = self.get_user(user_id)?.ok_or_else(|| CapError::not_found("no such user"))?;
        if let Some(feed_quality) = feed_quality {
            user.feed_quality = feed_quality.to_string();
        }
        if let Some(additional_info) = additional_info {
            user.additional_info = additional_info.to_string();
        }
        self.put_user(&user)
    }

    /// Resolve a `registered_by` id to the registering admin's login, per
    /// `original_source/model/user.py::User.registrar_login`.
    pub fn registrar_login(&mut self, registered_by: Option<u64>) -> Result<Option<String>> {
        match registered_by {
            Some(id) => Ok(self.get_user(id)?.map(|u| u.login)),
            None => Ok(None),
        }
    }

    pub fn get_group(&mut self, id: u64) -> Result<Option<Group>> {
        self.dbs.groups.get(self.raw(), &id).map_err(err)
    }

    pub fn group_id_by_name(&mut self, name: &str) -> Result<Option<u64>> {
        self.dbs.group_name_index.get(self.raw(), name).map_err(err)
    }

    // ---- objects & the graph ----------------------------------------------

    /// Race-tolerant get-or-create keyed by `dhash`, per
    /// `original_source/model/object.py::Object.get_or_create`. Returns
    /// `(id, created)`.
    pub fn get_or_create_object(&mut self, type_: &str, dhash: &str) -> Result<(u64, bool)> {
        if let Some(id) = self.dbs.object_dhash_index.get(self.raw(), dhash).map_err(err)? {
            return Ok((id, false));
        }
        let id = next_id(self.raw(), "object")?;
        let object = Object { id, type_: type_.to_string(), dhash: dhash.to_string(), upload_time: Utc::now() };
        self.dbs.objects.put(self.raw(), &id, &object).map_err(err)?;
        self.dbs.object_dhash_index.put(self.raw(), dhash, &id).map_err(err)?;
        Ok((id, true))
    }

    pub fn get_object(&mut self, id: u64) -> Result<Option<Object>> {
        self.dbs.objects.get(self.raw(), &id).map_err(err)
    }

    pub fn get_object_by_dhash(&mut self, dhash: &str) -> Result<Option<Object>> {
        match self.dbs.object_dhash_index.get(self.raw(), dhash).map_err(err)? {
            Some(id) => self.get_object(id),
            None => Ok(None),
        }
    }

    /// Every object of `type_`, in storage order, for the search boundary's
    /// full scan (spec.md §4.5 — there is no secondary index on type, so a
    /// query against a small repository just walks the table).
    pub fn list_objects_by_type(&mut self, type_: &str) -> Result<Vec<Object>> {
        let mut out = Vec::new();
        for item in self.dbs.objects.iter(self.raw()).map_err(err)? {
            let (_, object) = item.map_err(err)?;
            if object.type_ == type_ {
                out.push(object);
            }
        }
        Ok(out)
    }

    /// Attach `child_id` under `parent_id` and re-propagate every ACL row
    /// of `parent_id` down to `child_id` (spec.md §4.3 add-parent rule).
    /// Returns `false` if the edge already existed.
    pub fn add_parent(&mut self, child_id: u64, parent_id: u64) -> Result<bool> {
        if !self.dbs.relation.insert(self.raw(), parent_id, child_id, 1)? {
            return Ok(false);
        }
        let dbs = self.dbs;
        let rows = permission::rows_for_object(dbs, self.raw(), parent_id)?;
        for row in rows {
            self.propagate(child_id, row.group_id, row.reason_type, Some(parent_id), row.related_user_id)?;
        }
        Ok(true)
    }

    pub fn grant(
        &mut self,
        object_id: u64,
        group_id: u64,
        reason: AccessReason,
        related_object_id: Option<u64>,
        related_user_id: Option<u64>,
    ) -> Result<bool> {
        permission::grant(self.dbs, self.raw(), object_id, group_id, reason, related_object_id, related_user_id)
    }

    pub fn propagate(
        &mut self,
        root_object: u64,
        group_id: u64,
        reason: AccessReason,
        related_object_id: Option<u64>,
        related_user_id: Option<u64>,
    ) -> Result<()> {
        permission::propagate(self.dbs, self.raw(), root_object, group_id, reason, related_object_id, related_user_id)
    }

    // ---- comments -----------------------------------------------------------

    pub fn add_comment(&mut self, object_id: u64, user_id: u64, text: &str) -> Result<u64> {
        let id = next_id(self.raw(), "comment")?;
        let comment = Comment { id, object_id, user_id, comment: text.to_string(), timestamp: Utc::now() };
        self.dbs.comments.put(self.raw(), &id, &comment).map_err(err)?;
        self.dbs.comments_by_object.insert(self.raw(), object_id, id, 1)?;
        Ok(id)
    }

    /// Every comment on `object_id`, oldest first, per
    /// `original_source/resources/comment.py::CommentListResource`.
    pub fn list_comments(&mut self, object_id: u64) -> Result<Vec<Comment>> {
        let mut ids = self.dbs.comments_by_object.list_fwd(self.raw(), object_id)?;
        ids.sort_unstable();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(comment) = self.dbs.comments.get(self.raw(), &id).map_err(err)? {
                out.push(comment);
            }
        }
        Ok(out)
    }

    pub fn remove_comment(&mut self, comment_id: u64) -> Result<bool> {
        let comment = self.dbs.comments.get(self.raw(), &comment_id).map_err(err)?;
        match comment {
            Some(comment) => {
                self.dbs.comments_by_object.remove(self.raw(), comment.object_id, comment_id)?;
                self.dbs.comments.delete(self.raw(), &comment_id).map_err(err)
            }
            None => Ok(false),
        }
    }

    // ---- tags -----------------------------------------------------------

    fn get_or_create_tag(&mut self, name: &str) -> Result<u64> {
        if let Some(id) = self.dbs.tag_name_index.get(self.raw(), name).map_err(err)? {
            return Ok(id);
        }
        let id = next_id(self.raw(), "tag")?;
        self.dbs.tags.put(self.raw(), &id, &Tag { id, name: name.to_string() }).map_err(err)?;
        self.dbs.tag_name_index.put(self.raw(), name, &id).map_err(err)?;
        Ok(id)
    }

    pub fn add_tag(&mut self, object_id: u64, name: &str) -> Result<bool> {
        let tag_id = self.get_or_create_tag(name)?;
        self.dbs.object_tags.insert(self.raw(), object_id, tag_id, 1)
    }

    pub fn remove_tag(&mut self, object_id: u64, name: &str) -> Result<bool> {
        let Some(tag_id) = self.dbs.tag_name_index.get(self.raw(), name).map_err(err)? else {
            return Ok(false);
        };
        self.dbs.object_tags.remove(self.raw(), object_id, tag_id)
    }

    // ---- metakeys -----------------------------------------------------------

    pub fn define_metakey(
        &mut self,
        key_name: &str,
        label: Option<&str>,
        description: Option<&str>,
        hidden: bool,
    ) -> Result<u64> {
        if let Some(id) = self.dbs.metakey_def_name_index.get(self.raw(), key_name).map_err(err)? {
            return Ok(id);
        }
        let id = next_id(self.raw(), "metakey_def")?;
        let def = MetakeyDefinition {
            id,
            key: key_name.to_string(),
            label: label.map(str::to_string),
            description: description.map(str::to_string),
            hidden,
        };
        self.dbs.metakey_defs.put(self.raw(), &id, &def).map_err(err)?;
        self.dbs.metakey_def_name_index.put(self.raw(), key_name, &id).map_err(err)?;
        Ok(id)
    }

    pub fn set_metakey_permission(&mut self, def_id: u64, group_id: u64, can_read: bool, can_set: bool) -> Result<()> {
        let mut bits = 0u64;
        if can_read {
            bits |= METAKEY_CAN_READ;
        }
        if can_set {
            bits |= METAKEY_CAN_SET;
        }
        self.dbs.metakey_permissions.put(self.raw(), &key(def_id, group_id), &bits).map_err(err)
    }

    pub fn metakey_permission_bits(&mut self, def_id: u64, group_id: u64) -> Result<u64> {
        Ok(self.dbs.metakey_permissions.get(self.raw(), &key(def_id, group_id)).map_err(err)?.unwrap_or(0))
    }

    /// Capability set across every group `requestor_id` belongs to.
    fn requestor_caps(&mut self, requestor_id: u64) -> Result<(Vec<u64>, crate::capability::CapabilitySet)> {
        let group_ids = self.user_groups(requestor_id)?;
        let mut groups = Vec::with_capacity(group_ids.len());
        for group_id in &group_ids {
            if let Some(group) = self.get_group(*group_id)? {
                groups.push(group);
            }
        }
        Ok((group_ids, identity::effective_capabilities(&groups)))
    }

    /// Whether `requestor_id` may set values under `def_id`: either
    /// `adding_all_attributes`, or `can_set` on the permission row for one
    /// of the requestor's groups — per `original_source/model/object.py`'s
    /// `add_metakey` (lines ~373-389).
    fn can_set_metakey(&mut self, def_id: u64, requestor_id: u64) -> Result<bool> {
        let (group_ids, caps) = self.requestor_caps(requestor_id)?;
        if caps.contains(CapabilityTag::AddingAllAttributes) {
            return Ok(true);
        }
        for group_id in group_ids {
            if self.metakey_permission_bits(def_id, group_id)? & METAKEY_CAN_SET != 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether `requestor_id` may read values under `def_id`: either
    /// `reading_all_attributes`, or `can_read` on the permission row for
    /// one of the requestor's groups — per the same method's
    /// `get_metakeys` sibling (lines ~340-371).
    fn can_read_metakey(&mut self, def_id: u64, requestor_id: u64) -> Result<bool> {
        let (group_ids, caps) = self.requestor_caps(requestor_id)?;
        if caps.contains(CapabilityTag::ReadingAllAttributes) {
            return Ok(true);
        }
        for group_id in group_ids {
            if self.metakey_permission_bits(def_id, group_id)? & METAKEY_CAN_READ != 0 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Add a value under `key_name` on `object_id`. The definition must
    /// already exist (`original_source/model/object.py::add_metakey`
    /// raises otherwise), and `requestor_id` must hold
    /// `adding_all_attributes` or a per-group `can_set` permission row on
    /// the definition.
    pub fn add_metakey(&mut self, object_id: u64, key_name: &str, value: &str, requestor_id: u64) -> Result<()> {
        let def_id = self
            .dbs
            .metakey_def_name_index
            .get(self.raw(), key_name)
            .map_err(err)?
            .ok_or_else(|| CapError::not_found(format!("no metakey definition: {key_name}")))?;
        if !self.can_set_metakey(def_id, requestor_id)? {
            return Err(CapError::forbidden(format!("not permitted to set metakey {key_name}")));
        }
        let k = key(object_id, def_id);
        let mut existing = self.dbs.metakeys.get(self.raw(), &k).map_err(err)?.unwrap_or(MetakeyValue {
            object_id,
            def_id,
            values: Vec::new(),
        });
        if !existing.values.iter().any(|v| v == value) {
            existing.values.push(value.to_string());
        }
        self.dbs.metakeys.put(self.raw(), &k, &existing).map_err(err)?;
        self.dbs.metakeys_by_object.insert(self.raw(), object_id, def_id, 1)?;
        Ok(())
    }

    /// Read the value under `def_id` on `object_id`, or `Ok(None)` if
    /// `requestor_id` lacks `reading_all_attributes` and no per-group
    /// `can_read` permission row grants it — filtered the same way
    /// `original_source`'s `get_metakeys` filters its query rather than
    /// raising.
    pub fn get_metakey(&mut self, object_id: u64, def_id: u64, requestor_id: u64) -> Result<Option<MetakeyValue>> {
        if !self.can_read_metakey(def_id, requestor_id)? {
            return Ok(None);
        }
        self.dbs.metakeys.get(self.raw(), &key(object_id, def_id)).map_err(err)
    }

    /// Remove every value under `key_name` on `object_id`. Gated on the
    /// global `removing_attributes` capability — the data model carries no
    /// per-group removal permission row, unlike read/set.
    pub fn remove_metakey(&mut self, object_id: u64, key_name: &str, requestor_id: u64) -> Result<bool> {
        let (_, caps) = self.requestor_caps(requestor_id)?;
        if !caps.contains(CapabilityTag::RemovingAttributes) {
            return Err(CapError::forbidden("not permitted to remove metakeys"));
        }
        let Some(def_id) = self.dbs.metakey_def_name_index.get(self.raw(), key_name).map_err(err)? else {
            return Ok(false);
        };
        let removed = self.dbs.metakeys.delete(self.raw(), &key(object_id, def_id)).map_err(err)?;
        self.dbs.metakeys_by_object.remove(self.raw(), object_id, def_id)?;
        Ok(removed)
    }

    // ---- API keys -----------------------------------------------------------

    pub fn issue_api_key(&mut self, user_id: u64, issued_by: Option<u64>) -> Result<(u64, String)> {
        let uuid = crate::token::random_id();
        let id = next_id(self.raw(), "api_key")?;
        let api_key = ApiKey { id, uuid: uuid.clone(), user_id, issued_on: Utc::now(), issued_by };
        self.dbs.api_keys.put(self.raw(), &id, &api_key).map_err(err)?;
        self.dbs.api_key_uuid_index.put(self.raw(), &uuid, &id).map_err(err)?;
        self.dbs.api_keys_by_user.insert(self.raw(), user_id, id, 1)?;
        Ok((id, uuid))
    }

    pub fn get_api_key_by_uuid(&mut self, uuid: &str) -> Result<Option<ApiKey>> {
        match self.dbs.api_key_uuid_index.get(self.raw(), uuid).map_err(err)? {
            Some(id) => self.dbs.api_keys.get(self.raw(), &id).map_err(err),
            None => Ok(None),
        }
    }

    pub fn revoke_api_key(&mut self, uuid: &str) -> Result<bool> {
        let Some(id) = self.dbs.api_key_uuid_index.get(self.raw(), uuid).map_err(err)? else {
            return Ok(false);
        };
        if let Some(api_key) = self.dbs.api_keys.get(self.raw(), &id).map_err(err)? {
            self.dbs.api_keys_by_user.remove(self.raw(), api_key.user_id, id)?;
        }
        self.dbs.api_keys.delete(self.raw(), &id).map_err(err)?;
        self.dbs.api_key_uuid_index.delete(self.raw(), uuid).map_err(err)
    }
}

/// Run a closure inside one transaction, committing on success.
pub fn transact<T, F: FnOnce(&mut Tx) -> Result<T>>(f: F) -> Result<T> {
    let mut tx = Tx::new()?;
    let r = f(&mut tx)?;
    tx.commit()?;
    Ok(r)
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
    fn register_creates_private_group_and_joins_public() {
        let _dir = setup();
        let user_id = transact(|tx| tx.register_user("alice", "alice@example.com", Some("hunter2hunter2"))).unwrap();
        transact(|tx| {
            let groups = tx.user_groups(user_id)?;
            assert_eq!(groups.len(), 2);
            let mut found_private = false;
            for group_id in groups {
                if let Some(group) = tx.get_group(group_id)? {
                    if group.private {
                        assert_eq!(group.name, "alice");
                        found_private = true;
                    }
                }
            }
            assert!(found_private);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn duplicate_login_conflicts_with_existing_group_name() {
        let _dir = setup();
        transact(|tx| tx.create_group("alice", false, Default::default())).unwrap();
        let result = transact(|tx| tx.register_user("alice", "a@example.com", Some("password123")));
        assert!(result.is_err());
    }

    #[test]
    fn get_or_create_object_is_idempotent() {
        let _dir = setup();
        let (id1, created1) = transact(|tx| tx.get_or_create_object("file", "aaaa")).unwrap();
        let (id2, created2) = transact(|tx| tx.get_or_create_object("file", "aaaa")).unwrap();
        assert_eq!(id1, id2);
        assert!(created1);
        assert!(!created2);
    }

    #[test]
    fn list_users_returns_every_registered_user() {
        let _dir = setup();
        transact(|tx| tx.register_user("alice", "a@example.com", Some("hunter2hunter2"))).unwrap();
        transact(|tx| tx.register_user("bob", "b@example.com", Some("hunter2hunter2"))).unwrap();
        let logins = transact(|tx| Ok(tx.list_users()?.into_iter().map(|u| u.login).collect::<Vec<_>>())).unwrap();
        assert_eq!(logins.len(), 2);
        assert!(logins.contains(&"alice".to_string()));
        assert!(logins.contains(&"bob".to_string()));
    }

    #[test]
    fn add_parent_repropagates_existing_acl_rows() {
        let _dir = setup();
        let (a, _) = transact(|tx| tx.get_or_create_object("file", "a")).unwrap();
        let (b, _) = transact(|tx| tx.get_or_create_object("file", "b")).unwrap();
        transact(|tx| tx.grant(a, 42, AccessReason::Added, None, None)).unwrap();
        transact(|tx| tx.add_parent(b, a)).unwrap();
        let has_access = db::read(|dbs, rtx| permission::explicit_access(dbs, rtx, &[42], false, b)).unwrap();
        assert!(has_access);
    }

    #[test]
    fn list_objects_by_type_filters_out_other_types() {
        let _dir = setup();
        transact(|tx| tx.get_or_create_object("file", "a")).unwrap();
        transact(|tx| tx.get_or_create_object("file", "b")).unwrap();
        transact(|tx| tx.get_or_create_object("blob", "c")).unwrap();
        let files = transact(|tx| tx.list_objects_by_type("file")).unwrap();
        let mut dhashes: Vec<_> = files.into_iter().map(|o| o.dhash).collect();
        dhashes.sort();
        assert_eq!(dhashes, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn registrar_login_resolves_the_admin_who_registered_a_user() {
        let _dir = setup();
        let admin_id = transact(|tx| tx.register_user("admin", "admin@example.com", Some("hunter2hunter2"))).unwrap();
        transact(|tx| tx.create_user("carol", "carol@example.com", "hunter2hunter2", admin_id)).unwrap();
        let carol = transact(|tx| tx.get_user_by_login("carol")).unwrap().unwrap();
        let registrar = transact(|tx| tx.registrar_login(carol.registered_by)).unwrap();
        assert_eq!(registrar, Some("admin".to_string()));
        assert_eq!(transact(|tx| tx.registrar_login(None)).unwrap(), None);
    }

    #[test]
    fn list_comments_returns_oldest_first() {
        let _dir = setup();
        let user_id = transact(|tx| tx.register_user("alice", "a@example.com", Some("hunter2hunter2"))).unwrap();
        let (obj, _) = transact(|tx| tx.get_or_create_object("file", "a")).unwrap();
        transact(|tx| tx.add_comment(obj, user_id, "first")).unwrap();
        transact(|tx| tx.add_comment(obj, user_id, "second")).unwrap();
        let comments = transact(|tx| tx.list_comments(obj)).unwrap();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].comment, "first");
        assert_eq!(comments[1].comment, "second");
    }

    #[test]
    fn add_metakey_requires_adding_all_attributes_or_a_per_group_grant() {
        let _dir = setup();
        let alice = transact(|tx| tx.register_user("alice", "a@example.com", Some("hunter2hunter2"))).unwrap();
        let (obj, _) = transact(|tx| tx.get_or_create_object("file", "a")).unwrap();
        let def_id = transact(|tx| tx.define_metakey("family", None, None, false)).unwrap();

        assert!(transact(|tx| tx.add_metakey(obj, "family", "emotet", alice)).is_err());

        let group_id = transact(|tx| tx.group_id_by_name("alice")).unwrap().unwrap();
        transact(|tx| tx.set_metakey_permission(def_id, group_id, false, true)).unwrap();
        assert!(transact(|tx| tx.add_metakey(obj, "family", "emotet", alice)).is_ok());
    }

    #[test]
    fn adding_all_attributes_bypasses_the_per_group_grant() {
        let _dir = setup();
        let alice = transact(|tx| tx.register_user("alice", "a@example.com", Some("hunter2hunter2"))).unwrap();
        let (obj, _) = transact(|tx| tx.get_or_create_object("file", "a")).unwrap();
        transact(|tx| tx.define_metakey("family", None, None, false)).unwrap();

        let caps: crate::capability::CapabilitySet = [CapabilityTag::AddingAllAttributes].into_iter().collect();
        let admins = transact(|tx| tx.create_group("admins", false, caps)).unwrap();
        transact(|tx| tx.add_member(alice, admins)).unwrap();

        assert!(transact(|tx| tx.add_metakey(obj, "family", "emotet", alice)).is_ok());
    }

    #[test]
    fn get_metakey_is_filtered_without_read_permission() {
        let _dir = setup();
        let alice = transact(|tx| tx.register_user("alice", "a@example.com", Some("hunter2hunter2"))).unwrap();
        let (obj, _) = transact(|tx| tx.get_or_create_object("file", "a")).unwrap();
        let def_id = transact(|tx| tx.define_metakey("family", None, None, false)).unwrap();

        let caps: crate::capability::CapabilitySet = [CapabilityTag::AddingAllAttributes].into_iter().collect();
        let admins = transact(|tx| tx.create_group("admins", false, caps)).unwrap();
        transact(|tx| tx.add_member(alice, admins)).unwrap();
        transact(|tx| tx.add_metakey(obj, "family", "emotet", alice)).unwrap();

        assert!(transact(|tx| tx.get_metakey(obj, def_id, alice)).unwrap().is_none());

        let group_id = transact(|tx| tx.group_id_by_name("alice")).unwrap().unwrap();
        transact(|tx| tx.set_metakey_permission(def_id, group_id, true, false)).unwrap();
        let value = transact(|tx| tx.get_metakey(obj, def_id, alice)).unwrap();
        assert_eq!(value.unwrap().values, vec!["emotet".to_string()]);
    }

    #[test]
    fn remove_metakey_requires_removing_attributes() {
        let _dir = setup();
        let alice = transact(|tx| tx.register_user("alice", "a@example.com", Some("hunter2hunter2"))).unwrap();
        let (obj, _) = transact(|tx| tx.get_or_create_object("file", "a")).unwrap();
        transact(|tx| tx.define_metakey("family", None, None, false)).unwrap();

        let caps: crate::capability::CapabilitySet = [CapabilityTag::AddingAllAttributes].into_iter().collect();
        let admins = transact(|tx| tx.create_group("admins", false, caps)).unwrap();
        transact(|tx| tx.add_member(alice, admins)).unwrap();
        transact(|tx| tx.add_metakey(obj, "family", "emotet", alice)).unwrap();

        assert!(transact(|tx| tx.remove_metakey(obj, "family", alice)).is_err());

        let remover_caps: crate::capability::CapabilitySet = [CapabilityTag::RemovingAttributes].into_iter().collect();
        let removers = transact(|tx| tx.create_group("removers", false, remover_caps)).unwrap();
        transact(|tx| tx.add_member(alice, removers)).unwrap();
        assert!(transact(|tx| tx.remove_metakey(obj, "family", alice)).unwrap());
    }
}
