//! Database pool construction and shared persistence helpers.

use anyhow::{Context, Result};
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection};
use diesel::sql_query;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::models::status;
use crate::schema::contents;

pub type DbPool = r2d2::Pool<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Applies connection-level pragmas on every pooled connection.
#[derive(Debug, Clone)]
struct DeltaConnectionCustomizer;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for DeltaConnectionCustomizer {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        // Wait for locks instead of failing immediately; the dispatcher and
        // the HTTP surface share the pool.
        sql_query("PRAGMA busy_timeout = 5000;")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;

        sql_query("PRAGMA journal_mode = WAL;")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;

        sql_query("PRAGMA synchronous = NORMAL;")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;

        sql_query("PRAGMA foreign_keys = ON;")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;

        Ok(())
    }
}

/// Create the shared connection pool against the configured DSN.
pub fn create_pool(database_url: &str) -> Result<DbPool> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);

    let pool = r2d2::Pool::builder()
        .max_size(30)
        .connection_timeout(std::time::Duration::from_secs(30))
        .connection_customizer(Box::new(DeltaConnectionCustomizer))
        .build(manager)
        .context("Failed to create database connection pool")?;

    Ok(pool)
}

/// Apply all pending embedded migrations.
pub fn run_migrations(pool: &DbPool) -> Result<()> {
    let mut conn = pool.get().context("Failed to get DB connection")?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {e}"))?;
    Ok(())
}

/// Advance a content's status along one legal state-machine edge.
///
/// The update is conditional on the current status still being `from`, which
/// makes duplicate jobs observing a progressed content harmless no-ops.
/// Returns whether a row was actually updated.
pub fn transition_content_status(
    conn: &mut SqliteConnection,
    content_id: i64,
    from: &str,
    to: &str,
    message: Option<&str>,
) -> Result<bool> {
    if !status::is_legal_transition(from, to) {
        anyhow::bail!("illegal content status transition {from} -> {to} for content {content_id}");
    }

    let updated = diesel::update(
        contents::table
            .filter(contents::id.eq(content_id))
            .filter(contents::status.eq(from)),
    )
    .set((
        contents::status.eq(to),
        contents::last_message.eq(message),
        contents::updated_at.eq(chrono::Utc::now().naive_utc()),
    ))
    .execute(conn)
    .with_context(|| format!("Failed to transition content {content_id} to {to}"))?;

    Ok(updated == 1)
}

/// Record a pipeline error on the content without touching its status.
pub fn record_content_message(pool: &DbPool, content_id: i64, message: &str) -> Result<()> {
    let mut conn = pool.get().context("Failed to get DB connection")?;
    diesel::update(contents::table.filter(contents::id.eq(content_id)))
        .set((
            contents::last_message.eq(Some(message)),
            contents::updated_at.eq(chrono::Utc::now().naive_utc()),
        ))
        .execute(&mut conn)
        .with_context(|| format!("Failed to record message on content {content_id}"))?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::content::{Content, NewContent};
    use crate::models::status::{CONTENT_PIECE_COMPUTING, CONTENT_PINNED};
    use tempfile::TempDir;

    #[test]
    fn test_migrations_apply_cleanly() {
        let dir = TempDir::new().unwrap();
        let pool = test_support::test_pool(dir.path());
        let mut conn = pool.get().unwrap();

        let count: i64 = contents::table.count().get_result(&mut conn).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_conditional_transition_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let pool = test_support::test_pool(dir.path());
        let mut conn = pool.get().unwrap();

        let content = Content::create(
            &mut conn,
            NewContent::new("bafytest", "bafytest", 42, "key", "e2e", CONTENT_PINNED),
        )
        .unwrap();

        let first = transition_content_status(
            &mut conn,
            content.id,
            CONTENT_PINNED,
            CONTENT_PIECE_COMPUTING,
            None,
        )
        .unwrap();
        assert!(first);

        // A duplicate job observing the already-progressed status is a no-op.
        let second = transition_content_status(
            &mut conn,
            content.id,
            CONTENT_PINNED,
            CONTENT_PIECE_COMPUTING,
            None,
        )
        .unwrap();
        assert!(!second);
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let dir = TempDir::new().unwrap();
        let pool = test_support::test_pool(dir.path());
        let mut conn = pool.get().unwrap();

        let content = Content::create(
            &mut conn,
            NewContent::new("bafytest", "bafytest", 42, "key", "e2e", CONTENT_PINNED),
        )
        .unwrap();

        let result =
            transition_content_status(&mut conn, content.id, CONTENT_PINNED, "sealed", None);
        assert!(result.is_err());
    }
}
