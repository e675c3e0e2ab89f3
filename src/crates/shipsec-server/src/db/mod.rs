//! Database module: connectivity, models, and repositories for the
//! relational store backing workflows, versions, runs, webhooks,
//! schedules, logs, and artifacts.

pub mod connection;
pub mod error;
pub mod models;
pub mod repositories;

pub use connection::{connect, run_migrations, DatabasePool};
pub use error::{DatabaseError, DbResult};
