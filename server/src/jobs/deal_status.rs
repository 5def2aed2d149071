//! Deal status reconciler: one-shot job that asks the provider where a
//! deal actually is and advances the local state machine to match.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::db;
use crate::jobs::{deal_maker, Job, JobContext};
use crate::models::content::Content;
use crate::models::content_deal::ContentDeal;
use crate::models::content_miner::ContentMiner;
use crate::models::status::*;
use crate::provider::ProviderDealState;

/// Delay before a replanned deal re-enters the pipeline.
const REPLAN_DELAY_SECS: u64 = 30;

pub async fn run(ctx: &Arc<JobContext>, content_id: i64) -> Result<()> {
    let pool = ctx.pool.clone();
    let (content, deal) = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().context("Failed to get DB connection")?;
        let content = Content::find_by_id(&mut conn, content_id)?;
        let deal = ContentDeal::current_for_content(&mut conn, content_id)?;
        Ok::<_, anyhow::Error>((content, deal))
    })
    .await
    .context("task join error")??;

    if !needs_reconcile(&content.status) {
        debug!(content_id, status = %content.status, "content not reconcilable, skipping");
        return Ok(());
    }

    let deal = match deal {
        Some(deal) if !deal.deal_uuid.is_empty() => deal,
        _ => {
            let pool = ctx.pool.clone();
            tokio::task::spawn_blocking(move || {
                db::record_content_message(
                    &pool,
                    content_id,
                    "reconcile skipped: no provider deal on record",
                )
            })
            .await
            .context("task join error")??;
            return Ok(());
        }
    };

    let state = ctx
        .provider
        .deal_status(&deal.miner, &deal.deal_uuid)
        .await
        .map_err(anyhow::Error::new)
        .with_context(|| format!("provider status check failed for deal {}", deal.deal_uuid))?;

    debug!(content_id, deal_uuid = %deal.deal_uuid, state = ?state, "reconciling");

    match state {
        ProviderDealState::Accepted => Ok(()),
        ProviderDealState::TransferStarted => {
            advance(ctx, content_id, CONTENT_DEAL_PROPOSAL_SENT, CONTENT_TRANSFER_STARTED).await?;
            Ok(())
        }
        ProviderDealState::TransferFinished => {
            advance(ctx, content_id, CONTENT_DEAL_PROPOSAL_SENT, CONTENT_TRANSFER_STARTED).await?;
            advance(ctx, content_id, CONTENT_TRANSFER_STARTED, CONTENT_TRANSFER_FINISHED).await?;
            Ok(())
        }
        ProviderDealState::Published { deal_id } | ProviderDealState::Sealed { deal_id } => {
            deal_maker::seal_content(ctx, content_id, deal.id, deal_id).await?;
            info!(content_id, deal_id, "reconciler observed sealed deal");
            Ok(())
        }
        ProviderDealState::Rejected { reason, permanent } => {
            handle_rejection(ctx, &content, &deal, reason, permanent).await
        }
    }
}

async fn handle_rejection(
    ctx: &Arc<JobContext>,
    content: &Content,
    deal: &ContentDeal,
    reason: String,
    permanent: bool,
) -> Result<()> {
    warn!(
        content_id = content.id,
        deal_uuid = %deal.deal_uuid,
        permanent,
        reason = %reason,
        "provider rejected deal"
    );

    let replan = content.auto_retry && !permanent;
    let replanned_miner = if replan {
        ctx.miners.sp_with_given_bytes(content.size).ok()
    } else {
        None
    };

    let pool = ctx.pool.clone();
    let content_id = content.id;
    let deal_row_id = deal.id;
    let message = reason.clone();
    let miner_to_set = replanned_miner.as_ref().map(|p| p.address.clone());
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool.get().context("Failed to get DB connection")?;
        ContentDeal::mark_failed(&mut conn, deal_row_id, &message)?;
        db::transition_content_status(
            &mut conn,
            content_id,
            CONTENT_DEAL_PROPOSAL_SENT,
            CONTENT_FAILED,
            Some(&message),
        )?;
        if let Some(miner) = miner_to_set {
            ContentMiner::reassign(&mut conn, content_id, &miner)?;
        }
        Ok(())
    })
    .await
    .context("task join error")??;

    if replan {
        ctx.dispatcher.schedule(
            Job::DealMaker {
                content_id: content.id,
                attempt: 0,
            },
            Duration::from_secs(REPLAN_DELAY_SECS),
        );
    }

    Ok(())
}

async fn advance(
    ctx: &Arc<JobContext>,
    content_id: i64,
    from: &'static str,
    to: &'static str,
) -> Result<bool> {
    let pool = ctx.pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().context("Failed to get DB connection")?;
        db::transition_content_status(&mut conn, content_id, from, to, None)
    })
    .await
    .context("task join error")?
}
