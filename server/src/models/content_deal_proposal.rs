//! Signed deal proposal records written by the deal maker.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::content_deal_proposals;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable)]
#[diesel(table_name = content_deal_proposals)]
pub struct ContentDealProposal {
    pub id: i64,
    pub content: i64,
    /// Canonical JSON encoding of the unsigned proposal.
    pub unsigned: String,
    /// Hex signature over the unsigned bytes.
    pub signed: String,
    pub meta: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = content_deal_proposals)]
pub struct NewContentDealProposal {
    pub content: i64,
    pub unsigned: String,
    pub signed: String,
    pub meta: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl NewContentDealProposal {
    pub fn new(content: i64, unsigned: &str, signed: &str, meta: Option<String>) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            content,
            unsigned: unsigned.to_string(),
            signed: signed.to_string(),
            meta,
            created_at: now,
            updated_at: now,
        }
    }
}

impl ContentDealProposal {
    pub fn create(
        conn: &mut SqliteConnection,
        new_proposal: NewContentDealProposal,
    ) -> Result<ContentDealProposal> {
        diesel::insert_into(content_deal_proposals::table)
            .values(&new_proposal)
            .get_result(conn)
            .context("Failed to insert content deal proposal")
    }

    pub fn find_by_content(
        conn: &mut SqliteConnection,
        content_id: i64,
    ) -> Result<Option<ContentDealProposal>> {
        content_deal_proposals::table
            .filter(content_deal_proposals::content.eq(content_id))
            .order(content_deal_proposals::id.desc())
            .first(conn)
            .optional()
            .with_context(|| format!("Failed to load proposal for content {content_id}"))
    }
}
