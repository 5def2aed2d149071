//! Content model and related database operations.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::status;
use crate::schema::contents;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable)]
#[diesel(table_name = contents)]
pub struct Content {
    pub id: i64,
    pub name: String,
    pub size: i64,
    pub cid: String,
    pub requesting_api_key: String,
    pub piece_commitment_id: i64,
    pub status: String,
    pub last_message: Option<String>,
    pub connection_mode: String,
    pub auto_retry: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = contents)]
pub struct NewContent {
    pub name: String,
    pub size: i64,
    pub cid: String,
    pub requesting_api_key: String,
    pub piece_commitment_id: i64,
    pub status: String,
    pub connection_mode: String,
    pub auto_retry: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl NewContent {
    pub fn new(
        name: &str,
        cid: &str,
        size: i64,
        requesting_api_key: &str,
        connection_mode: &str,
        initial_status: &str,
    ) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            name: name.to_string(),
            size,
            cid: cid.to_string(),
            requesting_api_key: requesting_api_key.to_string(),
            piece_commitment_id: 0,
            status: initial_status.to_string(),
            connection_mode: connection_mode.to_string(),
            auto_retry: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_auto_retry(mut self, auto_retry: bool) -> Self {
        self.auto_retry = auto_retry;
        self
    }
}

impl Content {
    pub fn create(conn: &mut SqliteConnection, new_content: NewContent) -> Result<Content> {
        diesel::insert_into(contents::table)
            .values(&new_content)
            .get_result(conn)
            .context("Failed to insert content")
    }

    pub fn find_by_id(conn: &mut SqliteConnection, content_id: i64) -> Result<Content> {
        contents::table
            .filter(contents::id.eq(content_id))
            .first(conn)
            .with_context(|| format!("Content {content_id} not found"))
    }

    pub fn find_by_cid(conn: &mut SqliteConnection, cid: &str) -> Result<Content> {
        contents::table
            .filter(contents::cid.eq(cid))
            .order(contents::id.desc())
            .first(conn)
            .with_context(|| format!("Content with cid {cid} not found"))
    }

    /// Contents whose pipeline is not finished, for startup recovery.
    pub fn find_non_terminal(conn: &mut SqliteConnection) -> Result<Vec<Content>> {
        let terminal: Vec<&str> = status::ALL_CONTENT_STATUSES
            .iter()
            .copied()
            .filter(|s| status::is_terminal(s))
            .collect();
        contents::table
            .filter(contents::status.ne_all(terminal))
            .order(contents::id.asc())
            .load(conn)
            .context("Failed to load non-terminal contents")
    }

    /// Contents the reconciler should look at: in-flight against the
    /// provider and not touched for at least `stale_secs`. The staleness
    /// filter is what keeps at most one reconcile per content in flight.
    pub fn find_reconcilable(
        conn: &mut SqliteConnection,
        stale_secs: i64,
    ) -> Result<Vec<Content>> {
        let cutoff = chrono::Utc::now().naive_utc() - chrono::Duration::seconds(stale_secs);
        contents::table
            .filter(contents::status.eq_any(status::RECONCILABLE_STATUSES))
            .filter(contents::updated_at.lt(cutoff))
            .order(contents::id.asc())
            .load(conn)
            .context("Failed to load reconcilable contents")
    }

    pub fn set_piece_commitment(
        conn: &mut SqliteConnection,
        content_id: i64,
        piece_commitment_id: i64,
    ) -> Result<()> {
        diesel::update(contents::table.filter(contents::id.eq(content_id)))
            .set((
                contents::piece_commitment_id.eq(piece_commitment_id),
                contents::updated_at.eq(chrono::Utc::now().naive_utc()),
            ))
            .execute(conn)
            .with_context(|| format!("Failed to set piece commitment on content {content_id}"))?;
        Ok(())
    }

    /// Bytes currently in flight: sum of sizes of transfer-started contents
    /// created since the instance came up. Used by the admission guard.
    pub fn transfer_started_bytes_since(
        conn: &mut SqliteConnection,
        since: NaiveDateTime,
    ) -> Result<i64> {
        use diesel::dsl::sql;
        use diesel::sql_types::{BigInt, Nullable};
        let total: Option<i64> = contents::table
            .filter(contents::status.eq(status::CONTENT_TRANSFER_STARTED))
            .filter(contents::created_at.gt(since))
            .select(sql::<Nullable<BigInt>>("SUM(size)"))
            .first(conn)
            .context("Failed to sum in-flight transfer bytes")?;
        Ok(total.unwrap_or(0))
    }

    /// Stats responses never leak the caller's API key.
    pub fn redacted(mut self) -> Content {
        self.requesting_api_key = String::new();
        self
    }
}
