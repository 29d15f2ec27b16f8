//! HTTP surface over the repository core, per spec.md §6. Only built under
//! the `server` feature — the library itself has no HTTP dependency.
//!
//! Grounded in the teacher's `server.rs`: an `AppState` threaded through
//! `axum::State`, one `async fn` per route returning `Result<Json<T>,
//! CapError>` (leaning on `CapError`'s own `IntoResponse`, unlike the
//! teacher's hand-rolled `(StatusCode, Json<ErrorResponse>)` pairs), and a
//! `Router` assembled in `main` with `CorsLayer`/`TraceLayer`. Route
//! shapes and error-status mapping follow `original_source/resources/auth.py`
//! and `resources/user.py`/`resources/comment.py`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::capability::CapabilityTag;
use crate::config::Config;
use crate::error::{CapError, Result};
use crate::identity;
use crate::mail::{self, NotificationKind, Notifier, TemplateSource};
use crate::token::{TokenFlavor, TokenService};
use crate::tx::{transact, Tx};
use crate::access;
use crate::permission;
use crate::search::{self, AstNode, FieldValue};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub notifier: Arc<dyn Notifier>,
    pub templates: Arc<TemplateSource>,
}

impl AppState {
    pub fn new(config: Config, notifier: Arc<dyn Notifier>) -> Self {
        AppState { config: Arc::new(config), notifier, templates: Arc::new(TemplateSource::default()) }
    }

    fn token_service(&self) -> TokenService<'_> {
        TokenService::new(&self.config.secret_key)
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| CapError::unauthenticated("missing authorization header"))?;
    value
        .strip_prefix("Bearer ")
        .ok_or_else(|| CapError::unauthenticated("authorization header is not a bearer token"))
}

fn authenticate(tx: &mut Tx, svc: &TokenService, headers: &HeaderMap, flavor: TokenFlavor) -> Result<String> {
    let token = bearer_token(headers)?;
    svc.verify(tx, token, flavor)
}

fn require_capability(tx: &mut Tx, user_id: u64, tag: CapabilityTag) -> Result<()> {
    let group_ids = tx.user_groups(user_id)?;
    let mut caps = crate::capability::CapabilitySet::EMPTY;
    for group_id in group_ids {
        if let Some(group) = tx.get_group(group_id)? {
            caps = caps.union(group.capabilities);
        }
    }
    if caps.contains(tag) {
        Ok(())
    } else {
        Err(CapError::forbidden(format!("requires {tag}")))
    }
}

// ---- auth surface ---------------------------------------------------------

#[derive(Deserialize)]
struct LoginRequest {
    login: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    login: String,
    token: String,
    capabilities: Vec<&'static str>,
    groups: Vec<String>,
}

async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> Result<Json<LoginResponse>> {
    let svc = state.token_service();
    let response = transact(|tx| {
        let user = tx
            .get_user_by_login(&req.login)?
            .ok_or_else(|| CapError::forbidden("invalid credentials"))?;
        if state.config.enable_maintenance && req.login != state.config.admin_login {
            return Err(CapError::forbidden("maintenance mode"));
        }
        if user.pending {
            return Err(CapError::forbidden("account pending approval"));
        }
        if user.disabled {
            return Err(CapError::forbidden("account disabled"));
        }
        let hash = user.password_hash.as_deref().ok_or_else(|| CapError::forbidden("invalid credentials"))?;
        if !identity::verify_password(&req.password, hash) {
            return Err(CapError::forbidden("invalid credentials"));
        }

        let group_ids = tx.user_groups(user.id)?;
        let mut groups = Vec::with_capacity(group_ids.len());
        let mut caps = crate::capability::CapabilitySet::EMPTY;
        for group_id in &group_ids {
            if let Some(group) = tx.get_group(*group_id)? {
                caps = caps.union(group.capabilities);
                groups.push(group.name);
            }
        }
        tx.record_login(user.id)?;

        let token = svc.issue_session(&user.login, &user.password_ver, &user.identity_ver)?;
        Ok(LoginResponse { login: user.login, token, capabilities: caps.names(), groups })
    })?;
    Ok(Json(response))
}

#[derive(Deserialize)]
struct RegisterRequest {
    login: String,
    email: String,
    password: String,
    #[serde(default)]
    #[allow(dead_code)]
    recaptcha: Option<String>,
}

async fn register(State(state): State<AppState>, Json(req): Json<RegisterRequest>) -> Result<StatusCode> {
    if !state.config.enable_registration {
        return Err(CapError::forbidden("registration is disabled"));
    }
    // Captcha verification is an external collaborator the core does not
    // implement; a production deployment checks `req.recaptcha` here.
    transact(|tx| tx.register_user(&req.login, &req.email, Some(&req.password)))?;

    if let Ok(notification) = mail::render(&state.templates, NotificationKind::Pending, &req.email, &req.login, &state.config.base_url, None) {
        if let Err(e) = state.notifier.notify(&notification) {
            tracing::warn!(error = %e, "pending-registration notification failed");
        }
    }
    Ok(StatusCode::CREATED)
}

#[derive(Deserialize)]
struct ChangePasswordRequest {
    new_password: String,
}

async fn change_password(State(state): State<AppState>, headers: HeaderMap, Json(req): Json<ChangePasswordRequest>) -> Result<StatusCode> {
    if req.new_password.len() < 8 {
        return Err(CapError::new(crate::error::ErrorKind::SchemaInvalid, "password must be at least 8 characters"));
    }
    let svc = state.token_service();
    transact(|tx| {
        let login = authenticate(tx, &svc, &headers, TokenFlavor::SetPassword)?;
        let user = tx.get_user_by_login(&login)?.ok_or_else(|| CapError::not_found("no such user"))?;
        tx.set_password(user.id, &req.new_password)
    })?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct RecoverPasswordRequest {
    login: String,
    email: String,
}

async fn recover_password(State(state): State<AppState>, Json(req): Json<RecoverPasswordRequest>) -> Result<StatusCode> {
    let svc = state.token_service();
    let (token, email) = transact(|tx| {
        let user = tx
            .get_user_by_login(&req.login)?
            .filter(|u| u.email == req.email && !u.pending)
            .ok_or_else(|| CapError::forbidden("no matching account"))?;
        let token = svc.issue_set_password(&user.login, &user.password_ver)?;
        Ok((token, user.email))
    })?;

    // Recovery has no other delivery path for the new-password link, so a
    // dispatch failure is propagated rather than logged (spec.md §4.6).
    let notification = mail::render(&state.templates, NotificationKind::Recover, &email, &req.login, &state.config.base_url, Some(&token))?;
    state.notifier.notify(&notification)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct TokenResponse {
    token: String,
}

async fn refresh(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<TokenResponse>> {
    let svc = state.token_service();
    let token = transact(|tx| {
        let login = authenticate(tx, &svc, &headers, TokenFlavor::Session)?;
        let user = tx.get_user_by_login(&login)?.ok_or_else(|| CapError::not_found("no such user"))?;
        svc.issue_session(&user.login, &user.password_ver, &user.identity_ver)
    })?;
    Ok(Json(TokenResponse { token }))
}

#[derive(Serialize)]
struct IdentityView {
    login: String,
    capabilities: Vec<&'static str>,
    groups: Vec<String>,
}

async fn validate(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<IdentityView>> {
    let svc = state.token_service();
    let view = transact(|tx| {
        let login = authenticate(tx, &svc, &headers, TokenFlavor::Session)?;
        let user = tx.get_user_by_login(&login)?.ok_or_else(|| CapError::not_found("no such user"))?;
        let group_ids = tx.user_groups(user.id)?;
        let mut groups = Vec::new();
        let mut caps = crate::capability::CapabilitySet::EMPTY;
        for group_id in group_ids {
            if let Some(group) = tx.get_group(group_id)? {
                caps = caps.union(group.capabilities);
                groups.push(group.name);
            }
        }
        Ok(IdentityView { login: user.login, capabilities: caps.names(), groups })
    })?;
    Ok(Json(view))
}

/// `GET /user/<login>/change_password` — admin-triggered password reset,
/// requires `manage_users`.
async fn admin_issue_set_password(State(state): State<AppState>, headers: HeaderMap, Path(login): Path<String>) -> Result<Json<TokenResponse>> {
    let svc = state.token_service();
    let token = transact(|tx| {
        let caller_login = authenticate(tx, &svc, &headers, TokenFlavor::Session)?;
        let caller = tx.get_user_by_login(&caller_login)?.ok_or_else(|| CapError::not_found("no such user"))?;
        require_capability(tx, caller.id, CapabilityTag::ManageUsers)?;
        let target = tx.get_user_by_login(&login)?.ok_or_else(|| CapError::not_found("no such user"))?;
        svc.issue_set_password(&target.login, &target.password_ver)
    })?;
    Ok(Json(TokenResponse { token }))
}

// ---- user management -------------------------------------------------------

#[derive(Serialize)]
struct UserSummary {
    login: String,
    email: String,
    pending: bool,
    disabled: bool,
}

impl From<identity::User> for UserSummary {
    fn from(u: identity::User) -> Self {
        UserSummary { login: u.login, email: u.email, pending: u.pending, disabled: u.disabled }
    }
}

#[derive(Serialize)]
struct UserProfileView {
    login: String,
    email: String,
    pending: bool,
    disabled: bool,
    feed_quality: String,
    additional_info: String,
    registrar_login: Option<String>,
}

#[derive(Deserialize)]
struct UpdateUserProfileRequest {
    feed_quality: Option<String>,
    additional_info: Option<String>,
}

/// `GET /user/<login>` — the requestor's own profile, or any profile for a
/// `manage_users` holder.
async fn get_user_profile(State(state): State<AppState>, headers: HeaderMap, Path(login): Path<String>) -> Result<Json<UserProfileView>> {
    let svc = state.token_service();
    let view = transact(|tx| {
        let caller_login = authenticate(tx, &svc, &headers, TokenFlavor::Session)?;
        let caller = tx.get_user_by_login(&caller_login)?.ok_or_else(|| CapError::not_found("no such user"))?;
        if caller_login != login {
            require_capability(tx, caller.id, CapabilityTag::ManageUsers)?;
        }
        let target = tx.get_user_by_login(&login)?.ok_or_else(|| CapError::not_found("no such user"))?;
        let registrar_login = tx.registrar_login(target.registered_by)?;
        Ok(UserProfileView {
            login: target.login,
            email: target.email,
            pending: target.pending,
            disabled: target.disabled,
            feed_quality: target.feed_quality,
            additional_info: target.additional_info,
            registrar_login,
        })
    })?;
    Ok(Json(view))
}

/// `PUT /user/<login>` — edit the non-identity fields of a profile; the
/// owner may edit their own, `manage_users` holders may edit anyone's.
async fn update_user_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(login): Path<String>,
    Json(req): Json<UpdateUserProfileRequest>,
) -> Result<StatusCode> {
    let svc = state.token_service();
    transact(|tx| {
        let caller_login = authenticate(tx, &svc, &headers, TokenFlavor::Session)?;
        let caller = tx.get_user_by_login(&caller_login)?.ok_or_else(|| CapError::not_found("no such user"))?;
        if caller_login != login {
            require_capability(tx, caller.id, CapabilityTag::ManageUsers)?;
        }
        let target = tx.get_user_by_login(&login)?.ok_or_else(|| CapError::not_found("no such user"))?;
        tx.update_user_profile(target.id, req.feed_quality.as_deref(), req.additional_info.as_deref())
    })?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_users(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Vec<UserSummary>>> {
    let svc = state.token_service();
    let users = transact(|tx| {
        let caller_login = authenticate(tx, &svc, &headers, TokenFlavor::Session)?;
        let caller = tx.get_user_by_login(&caller_login)?.ok_or_else(|| CapError::not_found("no such user"))?;
        require_capability(tx, caller.id, CapabilityTag::ManageUsers)?;
        Ok(tx.list_users()?.into_iter().map(UserSummary::from).collect::<Vec<_>>())
    })?;
    Ok(Json(users))
}

#[derive(Deserialize)]
struct CreateUserRequest {
    email: String,
    password: String,
}

async fn create_user(State(state): State<AppState>, headers: HeaderMap, Path(login): Path<String>, Json(req): Json<CreateUserRequest>) -> Result<StatusCode> {
    let svc = state.token_service();
    transact(|tx| {
        let caller_login = authenticate(tx, &svc, &headers, TokenFlavor::Session)?;
        let caller = tx.get_user_by_login(&caller_login)?.ok_or_else(|| CapError::not_found("no such user"))?;
        require_capability(tx, caller.id, CapabilityTag::ManageUsers)?;
        tx.create_user(&login, &req.email, &req.password, caller.id)
    })?;
    Ok(StatusCode::CREATED)
}

async fn approve_pending(State(state): State<AppState>, headers: HeaderMap, Path(login): Path<String>) -> Result<StatusCode> {
    let svc = state.token_service();
    let (email, token) = transact(|tx| {
        let caller_login = authenticate(tx, &svc, &headers, TokenFlavor::Session)?;
        let caller = tx.get_user_by_login(&caller_login)?.ok_or_else(|| CapError::not_found("no such user"))?;
        require_capability(tx, caller.id, CapabilityTag::ManageUsers)?;
        let target = tx.get_user_by_login(&login)?.ok_or_else(|| CapError::not_found("no such user"))?;
        tx.approve_user(target.id, caller.id)?;
        let token = svc.issue_set_password(&target.login, &target.password_ver)?;
        Ok((target.email, token))
    })?;

    if let Ok(notification) = mail::render(&state.templates, NotificationKind::Register, &email, &login, &state.config.base_url, Some(&token)) {
        if let Err(e) = state.notifier.notify(&notification) {
            tracing::warn!(error = %e, "approval notification failed");
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn reject_pending(State(state): State<AppState>, headers: HeaderMap, Path(login): Path<String>) -> Result<StatusCode> {
    let svc = state.token_service();
    let email = transact(|tx| {
        let caller_login = authenticate(tx, &svc, &headers, TokenFlavor::Session)?;
        let caller = tx.get_user_by_login(&caller_login)?.ok_or_else(|| CapError::not_found("no such user"))?;
        require_capability(tx, caller.id, CapabilityTag::ManageUsers)?;
        let target = tx.get_user_by_login(&login)?.ok_or_else(|| CapError::not_found("no such user"))?;
        let email = target.email.clone();
        tx.reject_user(target.id)?;
        Ok(email)
    })?;

    if let Ok(notification) = mail::render(&state.templates, NotificationKind::Rejection, &email, &login, &state.config.base_url, None) {
        if let Err(e) = state.notifier.notify(&notification) {
            tracing::warn!(error = %e, "rejection notification failed");
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

// ---- search ----------------------------------------------------------------

#[derive(Deserialize)]
struct SearchParams {
    #[serde(rename = "type")]
    type_: String,
    field: String,
    value: String,
}

/// `GET /search?type=&field=&value=` — a single `field:value` term against
/// one object type, visible to the requestor. The grammar a client builds
/// `AstNode`s from lives in the client layer; this endpoint only needs the
/// already-compiled single-term case to exercise the field-mapper registry.
///
/// Visibility is checked with the pure `permission::explicit_access`
/// predicate, not the [`access`] façade — `access::access` has the
/// side effect of auto-granting QUERIED rows to a `share_queried_objects`
/// holder, which would otherwise silently self-grant the requestor access
/// to every matching object a plain field/tag/comment search turns up.
async fn search_objects(State(state): State<AppState>, headers: HeaderMap, Query(params): Query<SearchParams>) -> Result<Json<Vec<String>>> {
    let svc = state.token_service();
    let dhashes = transact(|tx| {
        let login = authenticate(tx, &svc, &headers, TokenFlavor::Session)?;
        let user = tx.get_user_by_login(&login)?.ok_or_else(|| CapError::not_found("no such user"))?;

        let group_ids = tx.user_groups(user.id)?;
        let mut groups = Vec::with_capacity(group_ids.len());
        for group_id in &group_ids {
            if let Some(group) = tx.get_group(*group_id)? {
                groups.push(group);
            }
        }
        let access_all = identity::effective_capabilities(&groups).contains(CapabilityTag::AccessAllObjects);

        let registry = search::default_registry();
        let node = AstNode::SearchField {
            name: params.field.clone(),
            value: Box::new(AstNode::Term(FieldValue::Word(params.value.clone()))),
        };
        let predicate = search::compile(&node, &params.type_, &registry)?;

        let objects = tx.list_objects_by_type(&params.type_)?;
        let mut matches = Vec::new();
        for object in objects {
            let matched = predicate(tx.dbs(), tx.ro(), object.id)?;
            if matched && permission::explicit_access(tx.dbs(), tx.ro(), &group_ids, access_all, object.id)? {
                matches.push(object.dhash);
            }
        }
        Ok(matches)
    })?;
    Ok(Json(dhashes))
}

// ---- comments ---------------------------------------------------------------

#[derive(Deserialize)]
struct CommentRequest {
    comment: String,
}

#[derive(Serialize)]
struct CommentIdResponse {
    comment_id: u64,
}

async fn add_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((_type_, dhash)): Path<(String, String)>,
    Json(req): Json<CommentRequest>,
) -> Result<Json<CommentIdResponse>> {
    let svc = state.token_service();
    let comment_id = transact(|tx| {
        let login = authenticate(tx, &svc, &headers, TokenFlavor::Session)?;
        let user = tx.get_user_by_login(&login)?.ok_or_else(|| CapError::not_found("no such user"))?;
        require_capability(tx, user.id, CapabilityTag::AddingComments)?;
        let view = access::access(tx, &dhash, user.id)?.ok_or_else(|| CapError::not_found("no such object"))?;
        tx.add_comment(view.id, user.id, &req.comment)
    })?;
    Ok(Json(CommentIdResponse { comment_id }))
}

#[derive(Serialize)]
struct CommentView {
    id: u64,
    author: String,
    comment: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}

async fn list_comments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((_type_, dhash)): Path<(String, String)>,
) -> Result<Json<Vec<CommentView>>> {
    let svc = state.token_service();
    let views = transact(|tx| {
        let login = authenticate(tx, &svc, &headers, TokenFlavor::Session)?;
        let user = tx.get_user_by_login(&login)?.ok_or_else(|| CapError::not_found("no such user"))?;
        let view = access::access(tx, &dhash, user.id)?.ok_or_else(|| CapError::not_found("no such object"))?;
        let comments = tx.list_comments(view.id)?;
        let mut out = Vec::with_capacity(comments.len());
        for comment in comments {
            let author = tx.get_user(comment.user_id)?.map(|u| u.login).unwrap_or_else(|| "unknown".to_string());
            out.push(CommentView { id: comment.id, author, comment: comment.comment, timestamp: comment.timestamp });
        }
        Ok(out)
    })?;
    Ok(Json(views))
}

async fn remove_comment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((_type_, _dhash, comment_id)): Path<(String, String, u64)>,
) -> Result<StatusCode> {
    let svc = state.token_service();
    transact(|tx| {
        let login = authenticate(tx, &svc, &headers, TokenFlavor::Session)?;
        let user = tx.get_user_by_login(&login)?.ok_or_else(|| CapError::not_found("no such user"))?;
        // Capability-gated only, not owner-gated — see DESIGN.md's decision
        // on the open question in spec.md §9.
        require_capability(tx, user.id, CapabilityTag::RemovingComments)?;
        if tx.remove_comment(comment_id)? {
            Ok(())
        } else {
            Err(CapError::not_found("no such comment"))
        }
    })?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/auth/change_password", post(change_password))
        .route("/auth/recover_password", post(recover_password))
        .route("/auth/refresh", post(refresh))
        .route("/auth/validate", get(validate))
        .route("/user/:login/change_password", get(admin_issue_set_password))
        .route("/users", get(list_users))
        .route("/search", get(search_objects))
        .route("/user/:login", post(create_user).get(get_user_profile).put(update_user_profile))
        .route("/user/pending/:login", put(approve_pending))
        .route("/user/pending/:login", delete(reject_pending))
        .route("/:type/:dhash/comment", post(add_comment).get(list_comments))
        .route("/:type/:dhash/comment/:comment_id", delete(remove_comment))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}
