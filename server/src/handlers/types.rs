//! Request and response shapes for the deal-making surface. Absent fields
//! deserialize to their zero values, mirroring what clients actually send.

use serde::{Deserialize, Serialize};

use crate::models::content::Content;
use crate::models::deal_proposal_parameters::ContentDealProposalParameters;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletRequest {
    pub id: i64,
    pub uuid: String,
    pub address: String,
}

impl WalletRequest {
    pub fn is_empty(&self) -> bool {
        self.id == 0 && self.uuid.is_empty() && self.address.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PieceCommitmentRequest {
    pub piece: String,
    pub padded_piece_size: i64,
    pub unpadded_piece_size: i64,
}

impl PieceCommitmentRequest {
    pub fn is_empty(&self) -> bool {
        self.piece.is_empty() && self.padded_piece_size == 0 && self.unpadded_piece_size == 0
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferParameters {
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DealRequest {
    pub cid: String,
    pub size: i64,
    pub miner: String,
    pub wallet: WalletRequest,
    pub piece_commitment: PieceCommitmentRequest,
    pub connection_mode: String,
    pub deal_verify_state: String,
    pub unverified_deal_max_price: String,
    pub start_epoch: i64,
    pub start_epoch_in_days: i64,
    pub duration_in_days: i64,
    pub replication: i64,
    pub remove_unsealed_copy: bool,
    pub skip_ipni_announce: bool,
    pub auto_retry: bool,
    pub label: String,
    pub transfer_parameters: TransferParameters,
}

#[derive(Debug, Clone, Serialize)]
pub struct DealResponse {
    pub status: String,
    pub message: String,
    pub content_id: i64,
    pub deal_request: DealRequest,
    pub deal_proposal_parameter: ContentDealProposalParameters,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub replicated_contents: Vec<DealResponse>,
}

impl DealResponse {
    pub fn received(
        content: &Content,
        request: DealRequest,
        params: ContentDealProposalParameters,
    ) -> Self {
        Self {
            status: "success".to_string(),
            message: "Deal request received. Please take note of the content_id. You can use the content_id to check the status of the deal.".to_string(),
            content_id: content.id,
            deal_request: request,
            deal_proposal_parameter: params,
            replicated_contents: Vec::new(),
        }
    }
}
