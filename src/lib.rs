//! # Knowledge Hub
//!
//! User-owned knowledge bases that group existing conversations and files,
//! plus schema-level projects, persisted in SQLite and served over an
//! authenticated REST API.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//! │   client     │──▶│  REST server │──▶│  stores  │
//! │ list/dialog  │   │ axum + JWT   │   │ SQLite / │
//! │ route model  │   └──────────────┘   │ in-memory│
//! └──────────────┘          ▲           └──────────┘
//!                           │                ▲
//!                     ┌──────────┐           │
//!                     │   CLI    │───────────┘
//!                     │  (khub)  │
//!                     └──────────┘
//! ```
//!
//! The data model, store traits and the in-memory store live in the
//! `knowledge-hub-core` crate (re-exported as [`knowledge_hub_core`]).
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the store traits |
//! | [`auth`] | JWT tokens and the authenticated-user extractor |
//! | [`server`] | REST server |
//! | [`client`] | HTTP client and headless UI state |
//! | [`commands`] | CLI command implementations |
//! | [`logging`] | Tracing subscriber setup |

pub mod auth;
pub mod client;
pub mod commands;
pub mod config;
pub mod db;
pub mod logging;
pub mod migrate;
pub mod server;
pub mod sqlite_store;

pub use knowledge_hub_core;
