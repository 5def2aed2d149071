//! Deal request validation. Every rule rejects before a single row is
//! written; the error strings travel verbatim to the API caller.

use crate::handlers::types::{DealRequest, PieceCommitmentRequest};
use crate::models::status::{CONNECTION_MODE_E2E, CONNECTION_MODE_IMPORT, DEAL_UNVERIFIED};

/// Longest accepted proposal label.
const MAX_LABEL_LENGTH: usize = 100;

/// Hard ceiling on replication regardless of configuration.
const MAX_REPLICATION: i64 = 6;

/// Latest allowed deal start, in days from now.
const MAX_START_DAYS: i64 = 14;

/// Longest allowed deal duration in days.
const MAX_DURATION_DAYS: i64 = 540;

/// Validate a deal request against the API rules. `max_replication` is the
/// configured ceiling; the hard cap of six still applies on top of it.
pub fn validate_deal_request(request: &DealRequest, max_replication: i64) -> Result<(), String> {
    if !request.unverified_deal_max_price.is_empty()
        && request.deal_verify_state != DEAL_UNVERIFIED
    {
        return Err("unverified_deal_max_price is only valid for unverified deals, make sure to pass deal_verify_state as unverified".to_string());
    }

    if request.deal_verify_state == DEAL_UNVERIFIED && request.unverified_deal_max_price.is_empty()
    {
        return Err("unverified_deal_max_price is required for unverified deals".to_string());
    }

    if !request.unverified_deal_max_price.is_empty() {
        match request.unverified_deal_max_price.parse::<f64>() {
            Ok(price) if price >= 0.0 => {}
            Ok(_) => return Err("unverified_deal_max_price cannot be negative".to_string()),
            Err(_) => return Err("unverified_deal_max_price is not a valid number".to_string()),
        }
    }

    if request.replication > 0 && request.connection_mode == CONNECTION_MODE_IMPORT {
        return Err("replication factor is not supported for import mode".to_string());
    }

    if request.replication > max_replication {
        return Err(format!(
            "replication factor can only be up to {max_replication}"
        ));
    }

    if request.replication > MAX_REPLICATION {
        return Err(format!(
            "replication count is more than allowed ({MAX_REPLICATION})"
        ));
    }

    if request.duration_in_days > 0 && request.start_epoch_in_days == 0 {
        return Err("start_epoch_in_days is required when duration_in_days is set".to_string());
    }

    if request.start_epoch_in_days > 0 && request.duration_in_days == 0 {
        return Err("duration_in_days is required when start_epoch_in_days is set".to_string());
    }

    if request.start_epoch_in_days > MAX_START_DAYS {
        return Err(format!(
            "start_epoch_in_days can only be {MAX_START_DAYS} days or less"
        ));
    }

    if request.duration_in_days > MAX_DURATION_DAYS {
        return Err(format!(
            "duration_in_days can only be {MAX_DURATION_DAYS} days or less"
        ));
    }

    if request.start_epoch_in_days > request.duration_in_days {
        return Err("start_epoch_in_days cannot be greater than duration_in_days".to_string());
    }

    if request.label.len() > MAX_LABEL_LENGTH {
        return Err(format!(
            "label length must be less than {MAX_LABEL_LENGTH}"
        ));
    }

    match request.connection_mode.as_str() {
        "" | CONNECTION_MODE_E2E | CONNECTION_MODE_IMPORT => {}
        _ => return Err("connection mode can only be e2e or import".to_string()),
    }

    if request.connection_mode == CONNECTION_MODE_E2E && !request.transfer_parameters.url.is_empty()
    {
        return Err("transfer_parameters is not supported for e2e mode.".to_string());
    }

    if !request.piece_commitment.is_empty() {
        if request.piece_commitment.piece.is_empty() {
            return Err(piece_commitment_error());
        }
        if request.piece_commitment.padded_piece_size == 0
            && request.piece_commitment.unpadded_piece_size == 0
        {
            return Err(piece_commitment_error());
        }
        if request.size == 0 {
            return Err(piece_commitment_error());
        }
    }

    if !request.wallet.is_empty()
        && request.wallet.address.is_empty()
        && request.wallet.uuid.is_empty()
        && request.wallet.id == 0
    {
        return Err("wallet reference requires an address, uuid, or id".to_string());
    }

    Ok(())
}

/// Import deals must carry a usable piece commitment.
pub fn validate_piece_commitment_meta(
    piece_commitment: &PieceCommitmentRequest,
) -> Result<(), String> {
    if piece_commitment.is_empty() {
        return Err(
            "invalid piece_commitment request. piece_commitment is required".to_string()
        );
    }
    Ok(())
}

fn piece_commitment_error() -> String {
    "piece commitment is invalid, make sure you have the cid, piece_cid, size and padded_piece_size or unpadded_piece_size".to_string()
}
