//! Deal maker: builds the canonical proposal for a content, signs it,
//! transmits it to the assigned storage provider, and tracks the transfer
//! through to sealing.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use diesel::Connection;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use tracing::{info, warn};

use crate::db;
use crate::jobs::{Job, JobContext};
use crate::models::content::Content;
use crate::models::content_deal::{ContentDeal, NewContentDeal};
use crate::models::content_deal_proposal::NewContentDealProposal;
use crate::models::content_miner::{ContentMiner, NewContentMiner};
use crate::models::content_wallet::ContentWallet;
use crate::models::deal_proposal_parameters::ContentDealProposalParameters;
use crate::models::piece_commitment::PieceCommitment;
use crate::models::status::*;
use crate::models::wallet::Wallet;
use crate::provider::{DealError, SignedProposal};

/// Retry budget for auto-retryable failures.
const MAX_DEAL_ATTEMPTS: u32 = 5;

/// Exponential backoff base and cap for deal retries.
const BACKOFF_BASE_SECS: u64 = 30;
const BACKOFF_CAP_SECS: u64 = 900;

/// Consecutive transport failures tolerated while polling a transfer.
const MAX_POLL_FAILURES: u32 = 5;

// ============================================================================
// Proposal signing seam
// ============================================================================

#[derive(Debug, Clone)]
pub struct ProposalSignature {
    pub signature: String,
    pub key_type: String,
}

/// Key-type-specific signing is an external collaborator; the pipeline only
/// needs a stable signature over the canonical proposal bytes.
pub trait ProposalSigner: Send + Sync {
    fn sign(&self, wallet: Option<&Wallet>, payload: &[u8]) -> Result<ProposalSignature>;
}

/// HMAC-SHA256 signer keyed by the wallet's private key, falling back to the
/// node identity when the request carried no wallet.
pub struct HmacProposalSigner {
    node_key: String,
}

impl HmacProposalSigner {
    pub fn new(node_key: &str) -> Self {
        Self {
            node_key: node_key.to_string(),
        }
    }
}

impl ProposalSigner for HmacProposalSigner {
    fn sign(&self, wallet: Option<&Wallet>, payload: &[u8]) -> Result<ProposalSignature> {
        let (key, key_type) = match wallet {
            Some(w) => (w.private_key.as_bytes(), w.key_type.clone()),
            None => (self.node_key.as_bytes(), "node".to_string()),
        };

        let mut mac = Hmac::<Sha256>::new_from_slice(key).context("Failed to key signer")?;
        mac.update(payload);
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(ProposalSignature {
            signature,
            key_type,
        })
    }
}

// ============================================================================
// Proposal construction
// ============================================================================

/// Canonical proposal shape; the serialized JSON is what gets signed and
/// persisted.
#[derive(Debug, Serialize)]
struct DealProposal {
    piece_cid: String,
    payload_cid: String,
    miner: String,
    client: String,
    label: String,
    start_epoch: i64,
    end_epoch: i64,
    verified: bool,
    unverified_deal_max_price: String,
    padded_piece_size: i64,
    remove_unsealed_copy: bool,
    skip_ipni_announce: bool,
    transfer_params: serde_json::Value,
}

struct DealInputs {
    content: Content,
    commitment: PieceCommitment,
    params: ContentDealProposalParameters,
    miner: String,
    wallet: Option<Wallet>,
}

fn load_inputs(ctx: &JobContext, content: Content) -> Result<DealInputs> {
    let mut conn = ctx.pool.get().context("Failed to get DB connection")?;

    if content.piece_commitment_id == 0 {
        anyhow::bail!(
            "content {} reached deal making without a piece commitment",
            content.id
        );
    }
    let commitment = PieceCommitment::find_by_id(&mut conn, content.piece_commitment_id)?;
    if commitment.cid != content.cid {
        anyhow::bail!(
            "piece commitment {} does not describe content {} (cid mismatch)",
            commitment.id,
            content.id
        );
    }
    if commitment.status != COMMP_STATUS_COMMITTED {
        anyhow::bail!(
            "piece commitment {} for content {} is {}, expected committed",
            commitment.id,
            content.id,
            commitment.status
        );
    }

    let params = ContentDealProposalParameters::find_by_content(&mut conn, content.id)?;

    let miner = match ContentMiner::find_by_content(&mut conn, content.id) {
        Ok(assignment) => assignment.miner,
        Err(_) => {
            // Self-heal: assign a provider now, the way ingestion would have.
            let provider = ctx.miners.sp_with_given_bytes(content.size)?;
            ContentMiner::create(&mut conn, NewContentMiner::new(content.id, &provider.address))?;
            provider.address
        }
    };

    let wallet = match ContentWallet::find_by_content(&mut conn, content.id)? {
        Some(assignment) => Some(Wallet::find_by_id(&mut conn, assignment.wallet_id)?),
        None => None,
    };

    Ok(DealInputs {
        content,
        commitment,
        params,
        miner,
        wallet,
    })
}

fn build_signed_proposal(ctx: &JobContext, inputs: &DealInputs) -> Result<(String, SignedProposal)> {
    let transfer_params: serde_json::Value =
        serde_json::from_str(&inputs.params.transfer_params)
            .unwrap_or(serde_json::Value::String(inputs.params.transfer_params.clone()));

    let client = inputs
        .wallet
        .as_ref()
        .map(|w| w.addr.clone())
        .unwrap_or_else(|| ctx.config.transport.host_id.clone());

    let proposal = DealProposal {
        piece_cid: inputs.commitment.piece.clone(),
        payload_cid: inputs.content.cid.clone(),
        miner: inputs.miner.clone(),
        client,
        label: inputs.params.label.clone(),
        start_epoch: inputs.params.start_epoch,
        end_epoch: inputs.params.end_epoch,
        verified: inputs.params.verified_deal,
        unverified_deal_max_price: inputs.params.unverified_deal_max_price.clone(),
        padded_piece_size: inputs.commitment.padded_piece_size,
        remove_unsealed_copy: inputs.params.remove_unsealed_copy,
        skip_ipni_announce: inputs.params.skip_ipni_announce,
        transfer_params,
    };

    let proposal_json =
        serde_json::to_string(&proposal).context("Failed to encode deal proposal")?;
    let signature = ctx
        .signer
        .sign(inputs.wallet.as_ref(), proposal_json.as_bytes())?;

    Ok((
        proposal_json.clone(),
        SignedProposal {
            proposal_json,
            signature: signature.signature,
            key_type: signature.key_type,
        },
    ))
}

// ============================================================================
// Processor
// ============================================================================

pub async fn run(ctx: &Arc<JobContext>, content_id: i64, attempt: u32) -> Result<()> {
    let pool = ctx.pool.clone();
    let content = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().context("Failed to get DB connection")?;
        Content::find_by_id(&mut conn, content_id)
    })
    .await
    .context("task join error")??;

    // Walk the content to deal-making-proposal, or bail out if a duplicate
    // job observes it already past this stage.
    match content.status.as_str() {
        CONTENT_PIECE_ASSIGNED => {
            advance(ctx, content_id, CONTENT_PIECE_ASSIGNED, CONTENT_DEAL_MAKING_PROPOSAL, None)
                .await?;
        }
        CONTENT_DEAL_MAKING_PROPOSAL => {}
        CONTENT_FAILED if content.auto_retry => {
            advance(
                ctx,
                content_id,
                CONTENT_FAILED,
                CONTENT_DEAL_MAKING_PROPOSAL,
                Some("auto-retry re-entry"),
            )
            .await?;
        }
        _ => return Ok(()),
    }

    let ctx_for_load = Arc::clone(ctx);
    let inputs = tokio::task::spawn_blocking(move || {
        let content = {
            let mut conn = ctx_for_load.pool.get().context("Failed to get DB connection")?;
            Content::find_by_id(&mut conn, content_id)?
        };
        load_inputs(&ctx_for_load, content)
    })
    .await
    .context("task join error")??;

    let (proposal_json, signed) = build_signed_proposal(ctx, &inputs)?;

    // Persist the signed proposal and mark the content as sent in one
    // transaction, then transmit. The durable record precedes the wire send
    // so a crash cannot lose a transmitted proposal.
    let pool = ctx.pool.clone();
    let signed_for_txn = signed.clone();
    let transport_meta = inputs.params.transfer_params.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().context("Failed to get DB connection")?;
        conn.transaction::<_, anyhow::Error, _>(|conn| {
            crate::models::content_deal_proposal::ContentDealProposal::create(
                conn,
                NewContentDealProposal::new(
                    content_id,
                    &proposal_json,
                    &signed_for_txn.signature,
                    Some(transport_meta),
                ),
            )?;
            db::transition_content_status(
                conn,
                content_id,
                CONTENT_DEAL_MAKING_PROPOSAL,
                CONTENT_DEAL_PROPOSAL_SENT,
                None,
            )?;
            Ok(())
        })
    })
    .await
    .context("task join error")??;

    let ack = match ctx.provider.propose_deal(&inputs.miner, &signed).await {
        Ok(ack) => ack,
        Err(e) => return handle_failure(ctx, &inputs, None, e, attempt).await,
    };

    info!(
        content_id,
        miner = %inputs.miner,
        deal_uuid = %ack.deal_uuid,
        "deal proposal accepted"
    );

    let pool = ctx.pool.clone();
    let miner = inputs.miner.clone();
    let deal_uuid = ack.deal_uuid.clone();
    let verified = inputs.params.verified_deal;
    let deal = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().context("Failed to get DB connection")?;
        ContentDeal::create(
            &mut conn,
            NewContentDeal::new(content_id, &miner, &deal_uuid, verified),
        )
    })
    .await
    .context("task join error")??;

    if inputs.content.connection_mode == CONNECTION_MODE_IMPORT {
        // The provider pulls from the caller-supplied URL; the reconciler
        // advances the state machine from here.
        return Ok(());
    }

    track_transfer(ctx, &inputs, &deal, attempt).await
}

/// Poll the provider until the transfer reaches a sealing-bound terminal
/// state. Data transfers carry no overall deadline; the job deliberately
/// occupies its worker while the transfer runs.
async fn track_transfer(
    ctx: &Arc<JobContext>,
    inputs: &DealInputs,
    deal: &ContentDeal,
    attempt: u32,
) -> Result<()> {
    let poll_every = Duration::from_secs(ctx.config.dispatcher.dispatch_jobs_every.max(1));
    let content_id = inputs.content.id;
    let mut poll_failures: u32 = 0;

    loop {
        match ctx.provider.deal_status(&inputs.miner, &deal.deal_uuid).await {
            Ok(state) => {
                poll_failures = 0;
                use crate::provider::ProviderDealState::*;
                match state {
                    Accepted => {}
                    TransferStarted => {
                        advance(
                            ctx,
                            content_id,
                            CONTENT_DEAL_PROPOSAL_SENT,
                            CONTENT_TRANSFER_STARTED,
                            None,
                        )
                        .await?;
                    }
                    TransferFinished => {
                        advance(
                            ctx,
                            content_id,
                            CONTENT_DEAL_PROPOSAL_SENT,
                            CONTENT_TRANSFER_STARTED,
                            None,
                        )
                        .await?;
                        advance(
                            ctx,
                            content_id,
                            CONTENT_TRANSFER_STARTED,
                            CONTENT_TRANSFER_FINISHED,
                            None,
                        )
                        .await?;
                    }
                    Published { deal_id } | Sealed { deal_id } => {
                        seal_content(ctx, content_id, deal.id, deal_id).await?;
                        info!(content_id, deal_id, "deal sealed");
                        return Ok(());
                    }
                    Rejected { reason, permanent } => {
                        let error = if permanent {
                            DealError::FatalProtocol(reason)
                        } else {
                            DealError::RetryableProvider(reason)
                        };
                        return handle_failure(ctx, inputs, Some(deal.id), error, attempt).await;
                    }
                }
            }
            Err(e) if e.is_retryable() => {
                poll_failures += 1;
                if poll_failures >= MAX_POLL_FAILURES {
                    return handle_failure(ctx, inputs, Some(deal.id), e, attempt).await;
                }
            }
            Err(e) => return handle_failure(ctx, inputs, Some(deal.id), e, attempt).await,
        }

        tokio::time::sleep(poll_every).await;
    }
}

/// Record the on-chain deal id and walk the content to `sealed` along
/// whichever legal path matches its current status.
pub async fn seal_content(
    ctx: &Arc<JobContext>,
    content_id: i64,
    deal_row_id: i64,
    deal_id: i64,
) -> Result<()> {
    let pool = ctx.pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().context("Failed to get DB connection")?;
        if deal_id != 0 {
            ContentDeal::set_deal_id(&mut conn, deal_row_id, deal_id)?;
        }

        if db::transition_content_status(
            &mut conn,
            content_id,
            CONTENT_TRANSFER_FINISHED,
            CONTENT_SEALED,
            None,
        )? {
            return Ok(());
        }
        if db::transition_content_status(
            &mut conn,
            content_id,
            CONTENT_TRANSFER_STARTED,
            CONTENT_TRANSFER_FINISHED,
            None,
        )? && db::transition_content_status(
            &mut conn,
            content_id,
            CONTENT_TRANSFER_FINISHED,
            CONTENT_SEALED,
            None,
        )? {
            return Ok(());
        }
        db::transition_content_status(
            &mut conn,
            content_id,
            CONTENT_DEAL_PROPOSAL_SENT,
            CONTENT_SEALED,
            None,
        )?;
        Ok(())
    })
    .await
    .context("task join error")?
}

async fn handle_failure(
    ctx: &Arc<JobContext>,
    inputs: &DealInputs,
    deal_row_id: Option<i64>,
    error: DealError,
    attempt: u32,
) -> Result<()> {
    let content_id = inputs.content.id;
    warn!(content_id, error = %error, "deal failed");

    let retrying =
        inputs.content.auto_retry && error.is_retryable() && attempt + 1 < MAX_DEAL_ATTEMPTS;

    let pool = ctx.pool.clone();
    let message = error.to_string();
    let wants_new_miner = error.wants_new_miner();
    let replanned_miner = if retrying && wants_new_miner {
        // Re-plan onto a different provider before the retry lands.
        ctx.miners.sp_with_given_bytes(inputs.content.size).ok()
    } else {
        None
    };

    let miner_to_set = replanned_miner.as_ref().map(|p| p.address.clone());
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool.get().context("Failed to get DB connection")?;
        if let Some(deal_row_id) = deal_row_id {
            ContentDeal::mark_failed(&mut conn, deal_row_id, &message)?;
        }
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

    if retrying {
        let delay_secs =
            (BACKOFF_BASE_SECS.saturating_mul(1u64 << attempt.min(10))).min(BACKOFF_CAP_SECS);
        warn!(
            content_id,
            attempt = attempt + 1,
            delay_secs,
            "scheduling deal retry"
        );
        ctx.dispatcher.schedule(
            Job::DealMaker {
                content_id,
                attempt: attempt + 1,
            },
            Duration::from_secs(delay_secs),
        );
    }

    Err(anyhow::Error::new(error).context(format!("deal failed for content {content_id}")))
}

async fn advance(
    ctx: &Arc<JobContext>,
    content_id: i64,
    from: &'static str,
    to: &'static str,
    message: Option<&'static str>,
) -> Result<bool> {
    let pool = ctx.pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().context("Failed to get DB connection")?;
        db::transition_content_status(&mut conn, content_id, from, to, message)
    })
    .await
    .context("task join error")?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet(key: &str) -> Wallet {
        let now = chrono::Utc::now().naive_utc();
        Wallet {
            id: 1,
            uuid: "u".to_string(),
            addr: "f3addr".to_string(),
            owner: "owner".to_string(),
            key_type: "secp256k1".to_string(),
            private_key: key.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_signature_is_deterministic_per_key() {
        let signer = HmacProposalSigner::new("node-key");
        let w = wallet("private-key");

        let a = signer.sign(Some(&w), b"proposal").unwrap();
        let b = signer.sign(Some(&w), b"proposal").unwrap();
        assert_eq!(a.signature, b.signature);
        assert_eq!(a.key_type, "secp256k1");
    }

    #[test]
    fn test_different_keys_produce_different_signatures() {
        let signer = HmacProposalSigner::new("node-key");
        let a = signer.sign(Some(&wallet("key-one")), b"proposal").unwrap();
        let b = signer.sign(Some(&wallet("key-two")), b"proposal").unwrap();
        assert_ne!(a.signature, b.signature);
    }

    #[test]
    fn test_missing_wallet_falls_back_to_node_identity() {
        let signer = HmacProposalSigner::new("node-key");
        let sig = signer.sign(None, b"proposal").unwrap();
        assert_eq!(sig.key_type, "node");
        assert!(!sig.signature.is_empty());
    }

    #[test]
    fn test_backoff_respects_cap() {
        for attempt in 0u32..12 {
            let delay = (BACKOFF_BASE_SECS.saturating_mul(1u64 << attempt.min(10)))
                .min(BACKOFF_CAP_SECS);
            assert!(delay <= BACKOFF_CAP_SECS);
            if attempt == 0 {
                assert_eq!(delay, BACKOFF_BASE_SECS);
            }
        }
    }
}
