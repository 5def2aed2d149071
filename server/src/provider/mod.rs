//! Storage-provider protocol seam. The wire format is an external concern;
//! the pipeline only depends on this trait and its state vocabulary.

pub mod http;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpProviderClient;

/// Deal-pipeline failure taxonomy. Validation failures never reach the deal
/// maker; everything else lands in one of these classes.
#[derive(Error, Debug, Clone)]
pub enum DealError {
    /// Provider unreachable, timeout, connection reset.
    #[error("transport error: {0}")]
    RetryableTransport(String),

    /// Provider reachable but unable to take the deal right now.
    #[error("provider rejection (retryable): {0}")]
    RetryableProvider(String),

    /// Provider rejected the proposal outright.
    #[error("protocol rejection: {0}")]
    FatalProtocol(String),

    /// The proposal can never be accepted as constructed.
    #[error("policy rejection: {0}")]
    FatalPolicy(String),
}

impl DealError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DealError::RetryableTransport(_) | DealError::RetryableProvider(_)
        )
    }

    /// Whether a retry should re-plan onto a different provider.
    pub fn wants_new_miner(&self) -> bool {
        matches!(self, DealError::RetryableProvider(_))
    }
}

/// A proposal ready for transmission: canonical bytes plus the signature
/// produced by the assigned wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedProposal {
    pub proposal_json: String,
    pub signature: String,
    pub key_type: String,
}

/// Provider acknowledgement of an accepted proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalAck {
    pub deal_uuid: String,
}

/// Provider-side view of a deal, as observed by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderDealState {
    /// Proposal accepted, nothing moving yet.
    Accepted,
    TransferStarted,
    TransferFinished,
    /// Publish message landed on chain.
    Published { deal_id: i64 },
    Sealed { deal_id: i64 },
    Rejected { reason: String, permanent: bool },
}

#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Transmit a signed proposal. `Ok` means the provider accepted and
    /// assigned a deal UUID; rejections surface as `DealError`.
    async fn propose_deal(
        &self,
        miner: &str,
        proposal: &SignedProposal,
    ) -> Result<ProposalAck, DealError>;

    /// Latest provider-side state of a deal.
    async fn deal_status(
        &self,
        miner: &str,
        deal_uuid: &str,
    ) -> Result<ProviderDealState, DealError>;
}
