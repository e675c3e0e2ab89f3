//! # shipsec-server - Service Surface for ShipSec Studio
//!
//! Everything around the engine: the REST API (authoring, commits,
//! runs, human inputs, webhook ingress), SQLite persistence for
//! workflows/versions/runs/logs/artifacts, the journal implementation
//! backing the engine's durability, and the cron scheduler.
//!
//! Startup order in the binary: tracing, `SHIPSEC_*` configuration,
//! database + migrations, component registry bootstrap, engine with the
//! SQLite journal, recovery of unfinished runs, router serve. A fatal
//! failure anywhere in that chain exits non-zero.

pub mod api;
pub mod config;
pub mod db;
pub mod journal;
pub mod schedule;
pub mod service;
pub mod sink;
pub mod storage;
pub mod webhook;

pub use api::create_router;
pub use config::ShipsecConfig;
pub use journal::SqliteJournal;
pub use service::{AppState, ServiceError};
