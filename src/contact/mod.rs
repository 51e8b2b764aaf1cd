//! Contact operation queue.
//!
//! Layout follows the functional core / imperative shell split:
//! - `domain`: persisted operation and identity models.
//! - `engine`: pure decisions (skip, merge, stability, result application).
//! - `runtime`: the [`ContactManager`] executor and its scheduler.
//! - `api`: the backend collaborator and its in-memory mock.
//! - `oplog`: the durable operation log.

pub mod api;
pub mod domain;
pub mod engine;
pub mod oplog;
pub mod runtime;
pub mod token;

pub use engine::{AudienceOverrides, ContactAudienceUpdate, ContactUpdate};
pub use runtime::{ContactDeps, ContactManager};
