//! HTTP implementation of the provider seam, speaking to a boost-style
//! deal gateway in front of the storage provider.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use super::{DealError, ProposalAck, ProviderClient, ProviderDealState, SignedProposal};

/// Deadline for control messages; data transfers are not bounded here.
const CONTROL_TIMEOUT_SECS: u64 = 60;

pub struct HttpProviderClient {
    client: reqwest::Client,
    base: String,
}

#[derive(Debug, Deserialize)]
struct ProposeResponse {
    deal_uuid: String,
    accepted: bool,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    retryable: bool,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    state: String,
    #[serde(default)]
    deal_id: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    permanent: bool,
}

impl HttpProviderClient {
    pub fn new(base: &str) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(CONTROL_TIMEOUT_SECS))
            .user_agent(concat!("delta/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    fn classify_http(status: reqwest::StatusCode, body: String) -> DealError {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::SERVICE_UNAVAILABLE
        {
            DealError::RetryableProvider(body)
        } else if status.is_server_error() {
            DealError::RetryableTransport(format!("provider returned {status}: {body}"))
        } else {
            DealError::FatalProtocol(format!("provider returned {status}: {body}"))
        }
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn propose_deal(
        &self,
        miner: &str,
        proposal: &SignedProposal,
    ) -> Result<ProposalAck, DealError> {
        let url = format!("{}/api/v1/deals", self.base);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "miner": miner,
                "proposal": proposal.proposal_json,
                "signature": proposal.signature,
                "key_type": proposal.key_type,
            }))
            .send()
            .await
            .map_err(|e| DealError::RetryableTransport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_http(status, body));
        }

        let ack: ProposeResponse = response
            .json()
            .await
            .map_err(|e| DealError::FatalProtocol(format!("malformed provider response: {e}")))?;

        if !ack.accepted {
            warn!(miner = %miner, reason = %ack.reason, "provider declined proposal");
            return Err(if ack.retryable {
                DealError::RetryableProvider(ack.reason)
            } else {
                DealError::FatalProtocol(ack.reason)
            });
        }

        Ok(ProposalAck {
            deal_uuid: ack.deal_uuid,
        })
    }

    async fn deal_status(
        &self,
        miner: &str,
        deal_uuid: &str,
    ) -> Result<ProviderDealState, DealError> {
        let url = format!("{}/api/v1/deals/{}", self.base, deal_uuid);
        let response = self
            .client
            .get(&url)
            .query(&[("miner", miner)])
            .send()
            .await
            .map_err(|e| DealError::RetryableTransport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_http(status, body));
        }

        let parsed: StatusResponse = response
            .json()
            .await
            .map_err(|e| DealError::FatalProtocol(format!("malformed provider response: {e}")))?;

        Ok(match parsed.state.as_str() {
            "accepted" | "awaiting-transfer" => ProviderDealState::Accepted,
            "transfer-started" => ProviderDealState::TransferStarted,
            "transfer-finished" => ProviderDealState::TransferFinished,
            "published" => ProviderDealState::Published {
                deal_id: parsed.deal_id,
            },
            "sealed" | "active" => ProviderDealState::Sealed {
                deal_id: parsed.deal_id,
            },
            "rejected" | "failed" => ProviderDealState::Rejected {
                reason: parsed.message,
                permanent: parsed.permanent,
            },
            other => {
                return Err(DealError::FatalProtocol(format!(
                    "unknown provider deal state {other}"
                )))
            }
        })
    }
}
