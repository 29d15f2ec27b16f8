//! Error kinds for the repository core.
//!
//! Every fallible operation returns [`CapError`], a closed set of kinds that
//! map 1:1 onto the HTTP statuses a caller surfaces them as (see
//! `IntoResponse` under the `server` feature). Control flow never uses
//! exceptions for expected outcomes such as "already exists" or "no access
//! to this subtree" — those are represented as `Ok(false)` / `Ok(None)`.

use std::collections::HashMap;
use thiserror::Error;

/// The closed set of error kinds the core can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Request body failed schema validation; carries per-field messages.
    SchemaInvalid,
    /// Missing, expired, or malformed token.
    Unauthenticated,
    /// Known identity lacks the required capability, or credentials/state forbid the action.
    Forbidden,
    /// No object by digest, or no user by login in an admin-only path.
    NotFound,
    /// Login or group name already exists.
    Conflict,
    /// Search boundary: term used outside a field selector.
    FieldNotQueryable,
    /// Search boundary: grammar node the core does not understand.
    UnsupportedGrammar,
    /// Mail dispatch failed and the caller cannot proceed without it.
    MailSendFailed,
    /// `get_or_create`'s post-rollback existence re-check still found nothing.
    IntegrityConflict,
    /// Storage backend failure (LMDB, I/O).
    Storage,
}

impl ErrorKind {
    /// The HTTP status this kind maps to, per spec.md §7.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::SchemaInvalid => 400,
            ErrorKind::Unauthenticated => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::FieldNotQueryable => 400,
            ErrorKind::UnsupportedGrammar => 400,
            ErrorKind::MailSendFailed => 500,
            ErrorKind::IntegrityConflict => 500,
            ErrorKind::Storage => 500,
        }
    }
}

/// The main error type for repository-core operations.
#[derive(Debug, Error, Clone)]
#[error("{kind:?}: {message}")]
pub struct CapError {
    pub kind: ErrorKind,
    pub message: String,
    /// Per-field validation messages, populated only for `SchemaInvalid`.
    pub field_errors: HashMap<String, String>,
}

impl CapError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        CapError { kind, message: message.into(), field_errors: HashMap::new() }
    }

    pub fn schema_invalid(field_errors: HashMap<String, String>) -> Self {
        CapError { kind: ErrorKind::SchemaInvalid, message: "schema validation failed".into(), field_errors }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthenticated, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn field_not_queryable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FieldNotQueryable, message)
    }

    pub fn unsupported_grammar(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedGrammar, message)
    }

    pub fn mail_send_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MailSendFailed, message)
    }

    pub fn integrity_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IntegrityConflict, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }
}

/// Convert any standard error into a storage-kind [`CapError`].
pub fn err<E: std::error::Error>(e: E) -> CapError {
    CapError::storage(e.to_string())
}

pub type Result<T> = std::result::Result<T, CapError>;

#[cfg(feature = "server")]
mod http {
    use super::{CapError, ErrorKind};
    use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
    use serde::Serialize;

    #[derive(Serialize)]
    struct ErrorBody {
        error: String,
        #[serde(skip_serializing_if = "std::collections::HashMap::is_empty")]
        fields: std::collections::HashMap<String, String>,
    }

    impl IntoResponse for CapError {
        fn into_response(self) -> Response {
            let status = StatusCode::from_u16(self.kind.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            if self.kind != ErrorKind::IntegrityConflict && self.kind != ErrorKind::Storage {
                tracing::warn!(kind = ?self.kind, message = %self.message, "request failed");
            } else {
                tracing::error!(kind = ?self.kind, message = %self.message, "request failed");
            }
            (status, Json(ErrorBody { error: self.message, fields: self.field_errors })).into_response()
        }
    }
}
