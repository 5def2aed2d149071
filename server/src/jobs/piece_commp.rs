//! Piece-commitment processor: computes the CommP tuple for a pinned
//! content and hands the content to the deal maker.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use diesel::Connection;
use tracing::{info, warn};

use crate::commp;
use crate::db;
use crate::jobs::{Job, JobContext};
use crate::models::content::Content;
use crate::models::piece_commitment::{NewPieceCommitment, PieceCommitment};
use crate::models::status::*;

/// Bounded retries before the content is marked failed.
const MAX_COMMP_ATTEMPTS: u32 = 3;

/// Delay between compute retries.
const RETRY_DELAY_SECS: u64 = 10;

pub async fn run(ctx: &Arc<JobContext>, content_id: i64, attempt: u32) -> Result<()> {
    let pool = ctx.pool.clone();
    let content = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().context("Failed to get DB connection")?;
        Content::find_by_id(&mut conn, content_id)
    })
    .await
    .context("task join error")??;

    // A duplicate run observing a progressed status is a no-op.
    if content.status != CONTENT_PINNED && content.status != CONTENT_PIECE_COMPUTING {
        return Ok(());
    }

    if content.status == CONTENT_PINNED {
        let pool = ctx.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().context("Failed to get DB connection")?;
            db::transition_content_status(
                &mut conn,
                content_id,
                CONTENT_PINNED,
                CONTENT_PIECE_COMPUTING,
                None,
            )
        })
        .await
        .context("task join error")??;
    }

    let blockstore = Arc::clone(&ctx.blockstore);
    let cid = content.cid.clone();
    let computed = tokio::task::spawn_blocking(move || {
        let payload = blockstore.get(&cid)?;
        commp::generate_piece_commitment(&payload)
    })
    .await
    .context("task join error")?;

    let computed = match computed {
        Ok(c) => c,
        Err(e) => {
            return handle_compute_failure(ctx, &content, attempt, e).await;
        }
    };

    info!(
        content_id,
        piece = %computed.piece,
        padded = computed.padded_piece_size,
        "piece commitment computed"
    );

    // Persist the commitment, link it, and advance the content in one
    // transaction so a crash never leaves a dangling reference.
    let pool = ctx.pool.clone();
    let content_for_txn = content.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().context("Failed to get DB connection")?;
        conn.transaction::<_, anyhow::Error, _>(|conn| {
            let commitment_id = if content_for_txn.piece_commitment_id != 0 {
                // Caller declared a commitment up front; overwrite it with
                // the computed values and freeze it.
                PieceCommitment::commit_computed(
                    conn,
                    content_for_txn.piece_commitment_id,
                    &computed.piece,
                    computed.unpadded_piece_size as i64,
                    computed.padded_piece_size as i64,
                )?;
                content_for_txn.piece_commitment_id
            } else {
                let record = PieceCommitment::create(
                    conn,
                    NewPieceCommitment::new(
                        &content_for_txn.cid,
                        &computed.piece,
                        content_for_txn.size,
                        computed.unpadded_piece_size as i64,
                        computed.padded_piece_size as i64,
                        COMMP_STATUS_COMMITTED,
                    ),
                )?;
                record.id
            };

            Content::set_piece_commitment(conn, content_for_txn.id, commitment_id)?;
            db::transition_content_status(
                conn,
                content_for_txn.id,
                CONTENT_PIECE_COMPUTING,
                CONTENT_PIECE_ASSIGNED,
                None,
            )?;
            Ok(())
        })
    })
    .await
    .context("task join error")??;

    ctx.dispatcher.add_job_and_dispatch(
        Job::DealMaker {
            content_id,
            attempt: 0,
        },
        1,
    );

    Ok(())
}

async fn handle_compute_failure(
    ctx: &Arc<JobContext>,
    content: &Content,
    attempt: u32,
    error: anyhow::Error,
) -> Result<()> {
    let next_attempt = attempt + 1;
    if next_attempt < MAX_COMMP_ATTEMPTS {
        warn!(
            content_id = content.id,
            attempt = next_attempt,
            error = %error,
            "piece commitment computation failed, re-enqueueing"
        );
        ctx.dispatcher.schedule(
            Job::PieceCommp {
                content_id: content.id,
                attempt: next_attempt,
            },
            Duration::from_secs(RETRY_DELAY_SECS * next_attempt as u64),
        );
        return Err(error.context("piece commitment computation failed, retry scheduled"));
    }

    let pool = ctx.pool.clone();
    let content_id = content.id;
    let piece_commitment_id = content.piece_commitment_id;
    let message = error.to_string();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().context("Failed to get DB connection")?;
        if piece_commitment_id != 0 {
            PieceCommitment::mark_failed(&mut conn, piece_commitment_id)?;
        }
        db::transition_content_status(
            &mut conn,
            content_id,
            CONTENT_PIECE_COMPUTING,
            CONTENT_PIECE_COMMITMENT_FAILED,
            Some(&message),
        )
    })
    .await
    .context("task join error")??;

    Err(error.context("piece commitment computation failed permanently"))
}
