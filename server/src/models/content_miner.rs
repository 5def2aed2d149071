//! Storage-provider assignment for a content. At most one row per content.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::content_miners;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable)]
#[diesel(table_name = content_miners)]
pub struct ContentMiner {
    pub id: i64,
    pub content: i64,
    pub miner: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = content_miners)]
pub struct NewContentMiner {
    pub content: i64,
    pub miner: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl NewContentMiner {
    pub fn new(content: i64, miner: &str) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            content,
            miner: miner.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl ContentMiner {
    pub fn create(conn: &mut SqliteConnection, new_miner: NewContentMiner) -> Result<ContentMiner> {
        diesel::insert_into(content_miners::table)
            .values(&new_miner)
            .get_result(conn)
            .context("Failed to insert content miner assignment")
    }

    pub fn find_by_content(conn: &mut SqliteConnection, content_id: i64) -> Result<ContentMiner> {
        content_miners::table
            .filter(content_miners::content.eq(content_id))
            .order(content_miners::id.desc())
            .first(conn)
            .with_context(|| format!("Miner assignment for content {content_id} not found"))
    }

    /// Re-plan onto a different provider after a retryable rejection.
    pub fn reassign(conn: &mut SqliteConnection, content_id: i64, miner: &str) -> Result<()> {
        diesel::update(content_miners::table.filter(content_miners::content.eq(content_id)))
            .set((
                content_miners::miner.eq(miner),
                content_miners::updated_at.eq(chrono::Utc::now().naive_utc()),
            ))
            .execute(conn)
            .with_context(|| format!("Failed to reassign miner for content {content_id}"))?;
        Ok(())
    }
}
