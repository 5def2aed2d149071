//! Content deal model: one row per proposal submission. A content may
//! accumulate several rows across retries; the highest id is current.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::content_deals;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable)]
#[diesel(table_name = content_deals)]
pub struct ContentDeal {
    pub id: i64,
    pub content: i64,
    pub miner: String,
    pub deal_uuid: String,
    pub deal_id: i64,
    pub verified: bool,
    pub failed: bool,
    pub last_message: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = content_deals)]
pub struct NewContentDeal {
    pub content: i64,
    pub miner: String,
    pub deal_uuid: String,
    pub verified: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl NewContentDeal {
    pub fn new(content: i64, miner: &str, deal_uuid: &str, verified: bool) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            content,
            miner: miner.to_string(),
            deal_uuid: deal_uuid.to_string(),
            verified,
            created_at: now,
            updated_at: now,
        }
    }
}

impl ContentDeal {
    pub fn create(conn: &mut SqliteConnection, new_deal: NewContentDeal) -> Result<ContentDeal> {
        diesel::insert_into(content_deals::table)
            .values(&new_deal)
            .get_result(conn)
            .context("Failed to insert content deal")
    }

    /// The current deal for a content: highest id wins.
    pub fn current_for_content(
        conn: &mut SqliteConnection,
        content_id: i64,
    ) -> Result<Option<ContentDeal>> {
        content_deals::table
            .filter(content_deals::content.eq(content_id))
            .order(content_deals::id.desc())
            .first(conn)
            .optional()
            .with_context(|| format!("Failed to load deal for content {content_id}"))
    }

    pub fn find_by_deal_uuid(
        conn: &mut SqliteConnection,
        deal_uuid: &str,
    ) -> Result<Option<ContentDeal>> {
        content_deals::table
            .filter(content_deals::deal_uuid.eq(deal_uuid))
            .order(content_deals::id.desc())
            .first(conn)
            .optional()
            .with_context(|| format!("Failed to load deal {deal_uuid}"))
    }

    pub fn find_by_deal_id(
        conn: &mut SqliteConnection,
        deal_id: i64,
    ) -> Result<Option<ContentDeal>> {
        content_deals::table
            .filter(content_deals::deal_id.eq(deal_id))
            .order(content_deals::id.desc())
            .first(conn)
            .optional()
            .with_context(|| format!("Failed to load deal with chain id {deal_id}"))
    }

    /// Record the on-chain deal id once the publish message lands.
    pub fn set_deal_id(conn: &mut SqliteConnection, id: i64, deal_id: i64) -> Result<()> {
        diesel::update(content_deals::table.filter(content_deals::id.eq(id)))
            .set((
                content_deals::deal_id.eq(deal_id),
                content_deals::updated_at.eq(chrono::Utc::now().naive_utc()),
            ))
            .execute(conn)
            .with_context(|| format!("Failed to set deal id on deal {id}"))?;
        Ok(())
    }

    pub fn mark_failed(conn: &mut SqliteConnection, id: i64, message: &str) -> Result<()> {
        diesel::update(content_deals::table.filter(content_deals::id.eq(id)))
            .set((
                content_deals::failed.eq(true),
                content_deals::last_message.eq(Some(message)),
                content_deals::updated_at.eq(chrono::Utc::now().naive_utc()),
            ))
            .execute(conn)
            .with_context(|| format!("Failed to mark deal {id} failed"))?;
        Ok(())
    }
}
