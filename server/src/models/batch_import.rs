//! Bulk import grouping: one batch row plus a link row per created content.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::status::BATCH_IMPORT_STATUS_STARTED;
use crate::schema::{batch_import_contents, batch_imports};

#[derive(Debug, Clone, Serialize, Deserialize, Queryable)]
#[diesel(table_name = batch_imports)]
pub struct BatchImport {
    pub id: i64,
    pub uuid: String,
    pub status: String,
    pub last_message: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = batch_imports)]
pub struct NewBatchImport {
    pub uuid: String,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable)]
#[diesel(table_name = batch_import_contents)]
pub struct BatchImportContent {
    pub id: i64,
    pub batch_import_id: i64,
    pub content_id: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = batch_import_contents)]
pub struct NewBatchImportContent {
    pub batch_import_id: i64,
    pub content_id: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl BatchImport {
    pub fn create(conn: &mut SqliteConnection) -> Result<BatchImport> {
        let now = chrono::Utc::now().naive_utc();
        diesel::insert_into(batch_imports::table)
            .values(&NewBatchImport {
                uuid: uuid::Uuid::new_v4().to_string(),
                status: BATCH_IMPORT_STATUS_STARTED.to_string(),
                created_at: now,
                updated_at: now,
            })
            .get_result(conn)
            .context("Failed to insert batch import")
    }

    pub fn find_by_id(conn: &mut SqliteConnection, id: i64) -> Result<BatchImport> {
        batch_imports::table
            .filter(batch_imports::id.eq(id))
            .first(conn)
            .with_context(|| format!("Batch import {id} not found"))
    }

    pub fn set_status(
        conn: &mut SqliteConnection,
        id: i64,
        status: &str,
        message: Option<&str>,
    ) -> Result<()> {
        diesel::update(batch_imports::table.filter(batch_imports::id.eq(id)))
            .set((
                batch_imports::status.eq(status),
                batch_imports::last_message.eq(message),
                batch_imports::updated_at.eq(chrono::Utc::now().naive_utc()),
            ))
            .execute(conn)
            .with_context(|| format!("Failed to update batch import {id}"))?;
        Ok(())
    }

    pub fn link_content(conn: &mut SqliteConnection, batch_id: i64, content_id: i64) -> Result<()> {
        let now = chrono::Utc::now().naive_utc();
        diesel::insert_into(batch_import_contents::table)
            .values(&NewBatchImportContent {
                batch_import_id: batch_id,
                content_id,
                created_at: now,
                updated_at: now,
            })
            .execute(conn)
            .with_context(|| format!("Failed to link content {content_id} to batch {batch_id}"))?;
        Ok(())
    }

    pub fn content_ids(conn: &mut SqliteConnection, batch_id: i64) -> Result<Vec<i64>> {
        batch_import_contents::table
            .filter(batch_import_contents::batch_import_id.eq(batch_id))
            .order(batch_import_contents::content_id.asc())
            .select(batch_import_contents::content_id)
            .load(conn)
            .with_context(|| format!("Failed to load contents for batch {batch_id}"))
    }
}
