//! SQLite pool setup and schema migration.

use sqlx::sqlite::SqlitePoolOptions;

use crate::db::error::{DatabaseError, DbResult};

/// The pool type used throughout the server.
pub type DatabasePool = sqlx::SqlitePool;

/// Connect to the database and ensure the schema exists.
pub async fn connect(database_url: &str) -> DbResult<DatabasePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect(database_url)
        .await
        .map_err(DatabaseError::from)?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// Create every table the server relies on. Idempotent.
pub async fn run_migrations(pool: &DatabasePool) -> DbResult<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS workflows (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            draft_graph TEXT NOT NULL,
            current_version_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS workflow_versions (
            id TEXT PRIMARY KEY NOT NULL,
            workflow_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            plan TEXT NOT NULL,
            hash TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(workflow_id, hash)
        )",
        "CREATE TABLE IF NOT EXISTS runs (
            id TEXT PRIMARY KEY NOT NULL,
            workflow_id TEXT NOT NULL,
            version_id TEXT NOT NULL,
            plan_hash TEXT NOT NULL,
            status TEXT NOT NULL,
            trigger_kind TEXT NOT NULL,
            trigger_source TEXT,
            inputs TEXT NOT NULL,
            error TEXT,
            created_at TEXT NOT NULL,
            finished_at TEXT
        )",
        "CREATE TABLE IF NOT EXISTS run_transitions (
            run_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            at TEXT NOT NULL,
            body TEXT NOT NULL,
            PRIMARY KEY (run_id, seq)
        )",
        "CREATE TABLE IF NOT EXISTS webhooks (
            id TEXT PRIMARY KEY NOT NULL,
            path TEXT NOT NULL UNIQUE,
            workflow_id TEXT NOT NULL,
            rules TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS schedules (
            id TEXT PRIMARY KEY NOT NULL,
            workflow_id TEXT NOT NULL,
            cron TEXT NOT NULL,
            inputs TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS execution_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            node_id TEXT NOT NULL,
            level TEXT NOT NULL,
            message TEXT NOT NULL,
            at TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_execution_logs_run ON execution_logs(run_id, id)",
        "CREATE TABLE IF NOT EXISTS artifacts (
            id TEXT PRIMARY KEY NOT NULL,
            run_id TEXT NOT NULL,
            name TEXT NOT NULL,
            mime TEXT NOT NULL,
            scope TEXT NOT NULL,
            file_id TEXT,
            content BLOB NOT NULL,
            created_at TEXT NOT NULL
        )",
    ];
    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// One-connection in-memory pool for tests (an in-memory SQLite
/// database is per-connection).
#[cfg(test)]
pub(crate) async fn test_pool() -> DatabasePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = test_pool().await;
        run_migrations(&pool).await.unwrap();
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM workflows")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }
}
