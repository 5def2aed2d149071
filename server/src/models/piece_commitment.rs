//! Piece commitment model.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::status::{COMMP_STATUS_COMMITTED, COMMP_STATUS_FAILED};
use crate::schema::piece_commitments;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable)]
#[diesel(table_name = piece_commitments)]
pub struct PieceCommitment {
    pub id: i64,
    pub cid: String,
    pub piece: String,
    pub size: i64,
    pub unpadded_piece_size: i64,
    pub padded_piece_size: i64,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = piece_commitments)]
pub struct NewPieceCommitment {
    pub cid: String,
    pub piece: String,
    pub size: i64,
    pub unpadded_piece_size: i64,
    pub padded_piece_size: i64,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl NewPieceCommitment {
    pub fn new(
        cid: &str,
        piece: &str,
        size: i64,
        unpadded_piece_size: i64,
        padded_piece_size: i64,
        status: &str,
    ) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            cid: cid.to_string(),
            piece: piece.to_string(),
            size,
            unpadded_piece_size,
            padded_piece_size,
            status: status.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl PieceCommitment {
    pub fn create(
        conn: &mut SqliteConnection,
        new_commitment: NewPieceCommitment,
    ) -> Result<PieceCommitment> {
        diesel::insert_into(piece_commitments::table)
            .values(&new_commitment)
            .get_result(conn)
            .context("Failed to insert piece commitment")
    }

    pub fn find_by_id(conn: &mut SqliteConnection, id: i64) -> Result<PieceCommitment> {
        piece_commitments::table
            .filter(piece_commitments::id.eq(id))
            .first(conn)
            .with_context(|| format!("Piece commitment {id} not found"))
    }

    /// Freeze the computed commitment. Once committed, the piece fields are
    /// never rewritten.
    pub fn mark_committed(conn: &mut SqliteConnection, id: i64) -> Result<()> {
        diesel::update(piece_commitments::table.filter(piece_commitments::id.eq(id)))
            .set((
                piece_commitments::status.eq(COMMP_STATUS_COMMITTED),
                piece_commitments::updated_at.eq(chrono::Utc::now().naive_utc()),
            ))
            .execute(conn)
            .with_context(|| format!("Failed to commit piece commitment {id}"))?;
        Ok(())
    }

    /// Write the computed commitment into a caller-declared `open` row and
    /// freeze it in one step.
    pub fn commit_computed(
        conn: &mut SqliteConnection,
        id: i64,
        piece: &str,
        unpadded_piece_size: i64,
        padded_piece_size: i64,
    ) -> Result<()> {
        diesel::update(piece_commitments::table.filter(piece_commitments::id.eq(id)))
            .set((
                piece_commitments::piece.eq(piece),
                piece_commitments::unpadded_piece_size.eq(unpadded_piece_size),
                piece_commitments::padded_piece_size.eq(padded_piece_size),
                piece_commitments::status.eq(COMMP_STATUS_COMMITTED),
                piece_commitments::updated_at.eq(chrono::Utc::now().naive_utc()),
            ))
            .execute(conn)
            .with_context(|| format!("Failed to store computed commitment {id}"))?;
        Ok(())
    }

    pub fn mark_failed(conn: &mut SqliteConnection, id: i64) -> Result<()> {
        diesel::update(piece_commitments::table.filter(piece_commitments::id.eq(id)))
            .set((
                piece_commitments::status.eq(COMMP_STATUS_FAILED),
                piece_commitments::updated_at.eq(chrono::Utc::now().naive_utc()),
            ))
            .execute(conn)
            .with_context(|| format!("Failed to fail piece commitment {id}"))?;
        Ok(())
    }
}
