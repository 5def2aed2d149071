//! Registered signing wallets. Lookups are always scoped by the owning
//! API key, so one tenant can never reference another tenant's wallet.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::wallets;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable)]
#[diesel(table_name = wallets)]
pub struct Wallet {
    pub id: i64,
    pub uuid: String,
    pub addr: String,
    pub owner: String,
    pub key_type: String,
    pub private_key: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = wallets)]
pub struct NewWallet {
    pub uuid: String,
    pub addr: String,
    pub owner: String,
    pub key_type: String,
    pub private_key: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl NewWallet {
    pub fn new(addr: &str, owner: &str, key_type: &str, private_key: &str) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            addr: addr.to_string(),
            owner: owner.to_string(),
            key_type: key_type.to_string(),
            private_key: private_key.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl Wallet {
    pub fn create(conn: &mut SqliteConnection, new_wallet: NewWallet) -> Result<Wallet> {
        diesel::insert_into(wallets::table)
            .values(&new_wallet)
            .get_result(conn)
            .context("Failed to insert wallet")
    }

    /// Resolve a wallet reference by address, uuid, or id, in that order,
    /// always scoped to the owning API key.
    pub fn resolve(
        conn: &mut SqliteConnection,
        owner: &str,
        addr: &str,
        wallet_uuid: &str,
        id: i64,
    ) -> Result<Option<Wallet>> {
        let wallet = if !addr.is_empty() {
            wallets::table
                .filter(wallets::addr.eq(addr))
                .filter(wallets::owner.eq(owner))
                .first(conn)
                .optional()?
        } else if !wallet_uuid.is_empty() {
            wallets::table
                .filter(wallets::uuid.eq(wallet_uuid))
                .filter(wallets::owner.eq(owner))
                .first(conn)
                .optional()?
        } else {
            wallets::table
                .filter(wallets::id.eq(id))
                .filter(wallets::owner.eq(owner))
                .first(conn)
                .optional()?
        };
        Ok(wallet)
    }

    pub fn find_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Wallet> {
        wallets::table
            .filter(wallets::id.eq(id))
            .first(conn)
            .with_context(|| format!("Wallet {id} not found"))
    }
}
