//! # Knowledge Hub Core
//!
//! Backend-agnostic logic for Knowledge Hub: data models, object ids,
//! the conversation cursor codec, the store traits and an in-memory store.
//!
//! This crate contains no tokio, sqlx, HTTP or filesystem dependencies.
//! The SQLite-backed store and the HTTP surface live in the `knowledge-hub`
//! crate.

pub mod error;
pub mod models;
pub mod object_id;
pub mod pagination;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use object_id::{IdRef, ObjectId};
