//! # sampledepot
//!
//! Core of a multi-tenant malware-sample repository: group capabilities and
//! per-object ACLs, a directed object graph with recursive access-grant
//! propagation, and stateless signed tokens checked against per-user
//! revocation counters.
//!
//! This crate has no HTTP dependency on its own — [`server`] (behind the
//! `server` feature) is the thinnest possible axum surface over the four
//! modules below:
//!
//! - [`capability`] / [`identity`]: capability tags, groups, users.
//! - [`object`] / [`permission`] / [`access`]: the object graph, ACL rows,
//!   and the façade every read goes through.
//! - [`token`]: stateless signed tokens.
//! - [`search`]: the field-mapper query boundary used by object listings.
//! - [`mail`] / [`blobstore`]: the two external collaborators the core
//!   depends on through a trait rather than owning directly.
//!
//! ```rust,no_run
//! use sampledepot::{db, bootstrap, tx::transact};
//!
//! db::init("/tmp/sampledepot.mdb").unwrap();
//! let admin_id = bootstrap::bootstrap("admin", "admin@example.com", "hunter2hunter2").unwrap();
//! let groups = transact(|tx| tx.user_groups(admin_id)).unwrap();
//! assert!(!groups.is_empty());
//! ```

pub mod access;
pub mod blobstore;
pub mod bootstrap;
pub mod capability;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod mail;
pub mod object;
pub mod permission;
pub mod search;
pub mod token;
pub mod tx;

#[cfg(feature = "server")]
pub mod server;

pub use error::{CapError, ErrorKind, Result};
