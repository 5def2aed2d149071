//! Signing-wallet assignment for a content. At most one row per content.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::content_wallets;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable)]
#[diesel(table_name = content_wallets)]
pub struct ContentWallet {
    pub id: i64,
    pub content: i64,
    pub wallet_id: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = content_wallets)]
pub struct NewContentWallet {
    pub content: i64,
    pub wallet_id: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl NewContentWallet {
    pub fn new(content: i64, wallet_id: i64) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            content,
            wallet_id,
            created_at: now,
            updated_at: now,
        }
    }
}

impl ContentWallet {
    pub fn create(
        conn: &mut SqliteConnection,
        new_wallet: NewContentWallet,
    ) -> Result<ContentWallet> {
        diesel::insert_into(content_wallets::table)
            .values(&new_wallet)
            .get_result(conn)
            .context("Failed to insert content wallet assignment")
    }

    pub fn find_by_content(
        conn: &mut SqliteConnection,
        content_id: i64,
    ) -> Result<Option<ContentWallet>> {
        content_wallets::table
            .filter(content_wallets::content.eq(content_id))
            .order(content_wallets::id.desc())
            .first(conn)
            .optional()
            .with_context(|| format!("Failed to load wallet assignment for content {content_id}"))
    }
}
