//! Deal-making endpoints: the ingestion coordinator behind
//! `POST /deal/end-to-end`, `/deal/import`, `/deal/imports`, and
//! `/deal/batch/imports`.
//!
//! Each request becomes a durable "pending deal" in one atomic transaction
//! (piece commitment, content, miner and wallet assignments, proposal
//! parameters, replication clones), and only after commit is the first
//! pipeline processor enqueued.

use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use anyhow::{Context as AnyhowContext, Result};
use diesel::prelude::*;
use futures_util::TryStreamExt;
use tracing::{error, info};

use crate::epochs;
use crate::handlers::types::{DealRequest, DealResponse, TransferParameters, WalletRequest};
use crate::jobs::{Job, JobContext};
use crate::middleware::api_key_auth;
use crate::models::batch_import::BatchImport;
use crate::models::content::{Content, NewContent};
use crate::models::content_miner::{ContentMiner, NewContentMiner};
use crate::models::content_wallet::{ContentWallet, NewContentWallet};
use crate::models::deal_proposal_parameters::{
    ContentDealProposalParameters, NewContentDealProposalParameters,
};
use crate::models::piece_commitment::{NewPieceCommitment, PieceCommitment};
use crate::models::status::*;
use crate::models::wallet::Wallet;
use crate::validation::{validate_deal_request, validate_piece_commitment_meta};

/// e2e verified deals below this size are rejected.
const MIN_VERIFIED_FILE_SIZE: usize = 1_000_000;

// ============================================================================
// Shared transaction body
// ============================================================================

pub(crate) enum DealSource {
    EndToEnd {
        file_name: String,
        cid: String,
        size: i64,
    },
    Import,
}

pub(crate) struct PreparedDeal {
    pub content: Content,
    pub params: ContentDealProposalParameters,
    pub commitment_id: i64,
    /// Replication clones: content, proposal parameters, assigned miner.
    pub replicas: Vec<(Content, ContentDealProposalParameters, String)>,
}

/// Build every row for one validated deal request. Runs inside the caller's
/// transaction; any error aborts the whole request with nothing written.
pub(crate) fn persist_deal_request(
    conn: &mut SqliteConnection,
    ctx: &JobContext,
    api_key: &str,
    request: &mut DealRequest,
    source: &DealSource,
) -> Result<PreparedDeal> {
    let (name, cid, size, initial_status) = match source {
        DealSource::EndToEnd {
            file_name,
            cid,
            size,
        } => (file_name.clone(), cid.clone(), *size, CONTENT_PINNED),
        DealSource::Import => (
            request.cid.clone(),
            request.cid.clone(),
            request.size,
            CONTENT_DEAL_MAKING_PROPOSAL,
        ),
    };

    // Caller-declared piece commitment: trusted and frozen for imports,
    // kept open for e2e until the computer confirms it.
    let mut commitment_id = 0i64;
    if !request.piece_commitment.piece.is_empty()
        && request.piece_commitment.padded_piece_size != 0
        && size != 0
    {
        let commitment_status = if request.connection_mode == CONNECTION_MODE_IMPORT {
            COMMP_STATUS_COMMITTED
        } else {
            COMMP_STATUS_OPEN
        };
        let record = PieceCommitment::create(
            conn,
            NewPieceCommitment::new(
                &cid,
                &request.piece_commitment.piece,
                size,
                request.piece_commitment.unpadded_piece_size,
                request.piece_commitment.padded_piece_size,
                commitment_status,
            ),
        )?;
        commitment_id = record.id;
    }

    let mut new_content = NewContent::new(
        &name,
        &cid,
        size,
        api_key,
        &request.connection_mode,
        initial_status,
    )
    .with_auto_retry(request.auto_retry);
    new_content.piece_commitment_id = commitment_id;
    let content = Content::create(conn, new_content)?;
    request.cid = content.cid.clone();

    if request.miner.is_empty() {
        let provider = ctx.miners.sp_with_given_bytes(size)?;
        request.miner = provider.address;
    }
    ContentMiner::create(conn, NewContentMiner::new(content.id, &request.miner))?;

    if !request.wallet.is_empty() {
        let wallet = Wallet::resolve(
            conn,
            api_key,
            &request.wallet.address,
            &request.wallet.uuid,
            request.wallet.id,
        )?
        .ok_or_else(|| {
            anyhow::anyhow!("Wallet not found, please make sure the wallet is registered")
        })?;

        ContentWallet::create(conn, NewContentWallet::new(content.id, wallet.id))?;
        request.wallet = WalletRequest {
            id: wallet.id,
            uuid: wallet.uuid.clone(),
            address: wallet.addr.clone(),
        };
    }

    let params = ContentDealProposalParameters::create(
        conn,
        build_proposal_parameters(ctx, request, &content),
    )?;

    let mut replicas = Vec::new();
    for _ in 0..request.replication {
        let mut clone = NewContent::new(
            &content.name,
            &content.cid,
            content.size,
            api_key,
            &content.connection_mode,
            &content.status,
        )
        .with_auto_retry(content.auto_retry);
        clone.piece_commitment_id = content.piece_commitment_id;
        let replica = Content::create(conn, clone)?;

        let replica_params =
            ContentDealProposalParameters::create(conn, params.replicate_for(replica.id))?;

        // Each clone gets an independently assigned provider.
        let provider = ctx.miners.sp_with_given_bytes(replica.size)?;
        ContentMiner::create(conn, NewContentMiner::new(replica.id, &provider.address))?;

        replicas.push((replica, replica_params, provider.address));
    }

    Ok(PreparedDeal {
        content,
        params,
        commitment_id,
        replicas,
    })
}

fn build_proposal_parameters(
    ctx: &JobContext,
    request: &DealRequest,
    content: &Content,
) -> NewContentDealProposalParameters {
    let label = if request.label.is_empty() {
        content.cid.clone()
    } else {
        request.label.clone()
    };

    let unverified_deal_max_price = if request.unverified_deal_max_price.is_empty() {
        "0".to_string()
    } else {
        request.unverified_deal_max_price.clone()
    };

    let verified_deal = request.deal_verify_state != DEAL_UNVERIFIED;

    let (start_epoch, end_epoch, duration) =
        if request.start_epoch_in_days != 0 && request.duration_in_days != 0 {
            let (start, end) =
                epochs::epoch_window(request.start_epoch_in_days, request.duration_in_days);
            (start, end, end - start)
        } else if request.start_epoch != 0 {
            (
                request.start_epoch,
                request.start_epoch + epochs::DEFAULT_DURATION,
                epochs::DEFAULT_DURATION,
            )
        } else {
            (0, 0, epochs::DEFAULT_DURATION)
        };

    // Imports hand the provider a caller-supplied URL to pull from; e2e
    // publishes this node's libp2p transfer endpoint.
    let transfer_url = if request.connection_mode == CONNECTION_MODE_IMPORT {
        request.transfer_parameters.url.clone()
    } else {
        ctx.config.transport.libp2p_url()
    };
    let transfer_params = serde_json::to_string(&TransferParameters { url: transfer_url })
        .unwrap_or_default();

    let now = chrono::Utc::now().naive_utc();
    NewContentDealProposalParameters {
        content: content.id,
        label,
        verified_deal,
        unverified_deal_max_price,
        start_epoch,
        end_epoch,
        duration,
        remove_unsealed_copy: request.remove_unsealed_copy,
        skip_ipni_announce: request.skip_ipni_announce,
        transfer_params,
        created_at: now,
        updated_at: now,
    }
}

/// Enqueue the first processor for a committed request. Contents with a
/// usable piece commitment go straight to deal making; everything else
/// starts at the piece-commitment computer.
pub(crate) fn enqueue_initial_jobs(ctx: &JobContext, prepared: &PreparedDeal) {
    if prepared.replicas.is_empty() {
        let job = if prepared.commitment_id != 0 {
            Job::DealMaker {
                content_id: prepared.content.id,
                attempt: 0,
            }
        } else {
            Job::PieceCommp {
                content_id: prepared.content.id,
                attempt: 0,
            }
        };
        ctx.dispatcher.add_job_and_dispatch(job, 1);
    } else {
        for (replica, _, _) in &prepared.replicas {
            ctx.dispatcher.add_job(Job::PieceCommp {
                content_id: replica.id,
                attempt: 0,
            });
        }
        ctx.dispatcher.add_job(Job::PieceCommp {
            content_id: prepared.content.id,
            attempt: 0,
        });
        ctx.dispatcher.start(prepared.replicas.len() + 1);
    }
}

fn bad_request(message: impl Into<String>) -> HttpResponse {
    let message: String = message.into();
    HttpResponse::BadRequest().json(serde_json::json!({
        "status": "error",
        "message": message,
    }))
}

fn deal_response(prepared: &PreparedDeal, request: &DealRequest) -> DealResponse {
    let mut response =
        DealResponse::received(&prepared.content, request.clone(), prepared.params.clone());
    for (replica, replica_params, miner) in &prepared.replicas {
        let mut replica_request = request.clone();
        replica_request.miner = miner.clone();
        let mut replica_response =
            DealResponse::received(replica, replica_request, replica_params.clone());
        replica_response.message = "Content replication request successful".to_string();
        response.replicated_contents.push(replica_response);
    }
    response
}

// ============================================================================
// POST /deal/end-to-end
// ============================================================================

pub async fn end_to_end(
    req: HttpRequest,
    ctx: web::Data<JobContext>,
    mut payload: Multipart,
) -> impl Responder {
    let api_key = match api_key_auth::api_key(&req) {
        Some(key) => key,
        None => return HttpResponse::Unauthorized().json("API key required"),
    };

    // Multipart: a `data` file plus a `metadata` JSON string.
    let mut file_bytes: Vec<u8> = Vec::new();
    let mut file_name = String::new();
    let mut metadata = String::new();

    while let Ok(Some(mut field)) = payload.try_next().await {
        match field.name() {
            "data" => {
                file_name = field
                    .content_disposition()
                    .get_filename()
                    .unwrap_or("upload")
                    .to_string();
                while let Ok(Some(chunk)) = field.try_next().await {
                    file_bytes.extend_from_slice(&chunk);
                }
            }
            "metadata" => {
                let mut buf: Vec<u8> = Vec::new();
                while let Ok(Some(chunk)) = field.try_next().await {
                    buf.extend_from_slice(&chunk);
                }
                metadata = String::from_utf8_lossy(&buf).to_string();
            }
            _ => {
                while let Ok(Some(_)) = field.try_next().await {}
            }
        }
    }

    if file_bytes.is_empty() {
        return bad_request("a `data` file is required");
    }

    let mut request: DealRequest = if metadata.is_empty() {
        DealRequest::default()
    } else {
        match serde_json::from_str(&metadata) {
            Ok(request) => request,
            Err(_) => {
                return bad_request(
                    "Error parsing the request, please check the request body if it complies with the spec",
                )
            }
        }
    };

    if request.connection_mode == CONNECTION_MODE_IMPORT {
        return bad_request("Connection mode import is not supported for end-to-end deal endpoint");
    }
    request.connection_mode = CONNECTION_MODE_E2E.to_string();

    if let Err(message) = validate_deal_request(&request, ctx.config.replication_cap()) {
        return bad_request(message);
    }

    if file_bytes.len() < MIN_VERIFIED_FILE_SIZE && request.deal_verify_state != DEAL_UNVERIFIED {
        return bad_request("File size is too small");
    }

    let (cid, size) = match ctx.blockstore.put(&file_bytes) {
        Ok(pinned) => pinned,
        Err(e) => {
            error!("Error pinning the file: {}", e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "status": "error",
                "message": "Error pinning the file",
            }));
        }
    };

    let source = DealSource::EndToEnd {
        file_name,
        cid,
        size,
    };
    let prepared = {
        let mut conn = match ctx.pool.get() {
            Ok(conn) => conn,
            Err(e) => {
                error!("Database connection error: {}", e);
                return HttpResponse::InternalServerError().json("Database connection failed");
            }
        };
        conn.transaction::<_, anyhow::Error, _>(|conn| {
            persist_deal_request(conn, &ctx, &api_key, &mut request, &source)
        })
    };

    match prepared {
        Ok(prepared) => {
            enqueue_initial_jobs(&ctx, &prepared);
            info!(
                content_id = prepared.content.id,
                replicas = prepared.replicas.len(),
                "end-to-end deal request accepted"
            );
            HttpResponse::Ok().json(deal_response(&prepared, &request))
        }
        Err(e) => bad_request(e.to_string()),
    }
}

// ============================================================================
// POST /deal/import
// ============================================================================

pub async fn import(
    req: HttpRequest,
    ctx: web::Data<JobContext>,
    body: web::Json<DealRequest>,
) -> impl Responder {
    let api_key = match api_key_auth::api_key(&req) {
        Some(key) => key,
        None => return HttpResponse::Unauthorized().json("API key required"),
    };

    let mut request = body.into_inner();
    if request.connection_mode == CONNECTION_MODE_E2E {
        return bad_request("Connection mode e2e is not supported on this import endpoint");
    }
    request.connection_mode = CONNECTION_MODE_IMPORT.to_string();

    if let Err(message) = validate_deal_request(&request, ctx.config.replication_cap()) {
        return bad_request(message);
    }
    if let Err(message) = validate_piece_commitment_meta(&request.piece_commitment) {
        return bad_request(message);
    }

    let prepared = {
        let mut conn = match ctx.pool.get() {
            Ok(conn) => conn,
            Err(e) => {
                error!("Database connection error: {}", e);
                return HttpResponse::InternalServerError().json("Database connection failed");
            }
        };
        conn.transaction::<_, anyhow::Error, _>(|conn| {
            persist_deal_request(conn, &ctx, &api_key, &mut request, &DealSource::Import)
        })
    };

    match prepared {
        Ok(prepared) => {
            enqueue_initial_jobs(&ctx, &prepared);
            info!(content_id = prepared.content.id, "import deal request accepted");
            HttpResponse::Ok().json(deal_response(&prepared, &request))
        }
        Err(e) => bad_request(e.to_string()),
    }
}

// ============================================================================
// POST /deal/imports: one transaction for the whole array
// ============================================================================

pub async fn imports(
    req: HttpRequest,
    ctx: web::Data<JobContext>,
    body: web::Json<Vec<DealRequest>>,
) -> impl Responder {
    let api_key = match api_key_auth::api_key(&req) {
        Some(key) => key,
        None => return HttpResponse::Unauthorized().json("API key required"),
    };

    let mut requests = body.into_inner();
    let prepared_all = {
        let mut conn = match ctx.pool.get() {
            Ok(conn) => conn,
            Err(e) => {
                error!("Database connection error: {}", e);
                return HttpResponse::InternalServerError().json("Database connection failed");
            }
        };

        // All-or-nothing: the first invalid item rolls back every row.
        conn.transaction::<_, anyhow::Error, _>(|conn| {
            let mut prepared_all = Vec::with_capacity(requests.len());
            for request in requests.iter_mut() {
                if request.connection_mode == CONNECTION_MODE_E2E {
                    anyhow::bail!("Connection mode e2e is not supported on this import endpoint");
                }
                request.connection_mode = CONNECTION_MODE_IMPORT.to_string();

                validate_deal_request(request, ctx.config.replication_cap())
                    .map_err(|message| anyhow::anyhow!(message))?;
                validate_piece_commitment_meta(&request.piece_commitment)
                    .map_err(|message| anyhow::anyhow!(message))?;

                let prepared =
                    persist_deal_request(conn, &ctx, &api_key, request, &DealSource::Import)?;
                prepared_all.push(prepared);
            }
            Ok(prepared_all)
        })
    };

    match prepared_all {
        Ok(prepared_all) => {
            for prepared in &prepared_all {
                ctx.dispatcher.add_job(Job::DealMaker {
                    content_id: prepared.content.id,
                    attempt: 0,
                });
            }
            ctx.dispatcher.start(prepared_all.len());

            let responses: Vec<DealResponse> = prepared_all
                .iter()
                .zip(requests.iter())
                .map(|(prepared, request)| deal_response(prepared, request))
                .collect();
            info!(count = responses.len(), "bulk import accepted");
            HttpResponse::Ok().json(responses)
        }
        Err(e) => bad_request(e.to_string()),
    }
}

// ============================================================================
// POST /deal/batch/imports: accepted now, processed asynchronously
// ============================================================================

pub async fn batch_imports(
    req: HttpRequest,
    ctx: web::Data<JobContext>,
    body: web::Json<Vec<DealRequest>>,
) -> impl Responder {
    let api_key = match api_key_auth::api_key(&req) {
        Some(key) => key,
        None => return HttpResponse::Unauthorized().json("API key required"),
    };

    let requests = body.into_inner();

    let batch = {
        let mut conn = match ctx.pool.get() {
            Ok(conn) => conn,
            Err(e) => {
                error!("Database connection error: {}", e);
                return HttpResponse::InternalServerError().json("Database connection failed");
            }
        };
        match BatchImport::create(&mut conn) {
            Ok(batch) => batch,
            Err(e) => {
                error!("Error creating a batch import object: {}", e);
                return HttpResponse::InternalServerError()
                    .json("Error creating a batch import object");
            }
        }
    };

    let ctx_for_task = ctx.into_inner();
    let batch_id = batch.id;
    tokio::spawn(async move {
        process_batch(ctx_for_task, api_key, batch_id, requests).await;
    });

    HttpResponse::Ok().json(serde_json::json!({
        "status": "success",
        "message": "Batch import request received. Please take note of the batch_import_id. You can use the batch_import_id to check the status of the deal.",
        "batch_import_id": batch.id,
    }))
}

/// Process one batch in the background. Items commit independently; the
/// first failure marks the batch failed and stops processing, leaving
/// earlier items in the pipeline.
async fn process_batch(
    ctx: Arc<JobContext>,
    api_key: String,
    batch_id: i64,
    requests: Vec<DealRequest>,
) {
    let total = requests.len();

    for mut request in requests {
        if request.connection_mode == CONNECTION_MODE_E2E {
            fail_batch(
                &ctx,
                batch_id,
                "Connection mode e2e is not supported on this import endpoint",
            )
            .await;
            return;
        }
        request.connection_mode = CONNECTION_MODE_IMPORT.to_string();

        if let Err(message) = validate_deal_request(&request, ctx.config.replication_cap()) {
            fail_batch(&ctx, batch_id, &message).await;
            return;
        }
        if let Err(message) = validate_piece_commitment_meta(&request.piece_commitment) {
            fail_batch(&ctx, batch_id, &message).await;
            return;
        }

        let ctx_for_item = Arc::clone(&ctx);
        let api_key_for_item = api_key.clone();
        let persisted = tokio::task::spawn_blocking(move || {
            let mut conn = ctx_for_item
                .pool
                .get()
                .context("Failed to get DB connection")?;
            conn.transaction::<_, anyhow::Error, _>(|conn| {
                let prepared = persist_deal_request(
                    conn,
                    &ctx_for_item,
                    &api_key_for_item,
                    &mut request,
                    &DealSource::Import,
                )?;
                BatchImport::link_content(conn, batch_id, prepared.content.id)?;
                Ok(prepared)
            })
        })
        .await;

        match persisted {
            Ok(Ok(prepared)) => {
                ctx.dispatcher.add_job(Job::DealMaker {
                    content_id: prepared.content.id,
                    attempt: 0,
                });
            }
            Ok(Err(e)) => {
                fail_batch(&ctx, batch_id, &e.to_string()).await;
                return;
            }
            Err(e) => {
                fail_batch(&ctx, batch_id, &format!("batch task join error: {e}")).await;
                return;
            }
        }
    }

    let pool = ctx.pool.clone();
    let marked = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().context("Failed to get DB connection")?;
        BatchImport::set_status(&mut conn, batch_id, BATCH_IMPORT_STATUS_COMPLETED, None)
    })
    .await;
    if let Ok(Err(e)) = marked {
        error!(batch_id, "Failed to complete batch import: {}", e);
    }

    info!(batch_id, total, "batch import processed");
    ctx.dispatcher.start(total);
}

async fn fail_batch(ctx: &Arc<JobContext>, batch_id: i64, message: &str) {
    error!(batch_id, reason = %message, "batch import failed");
    let pool = ctx.pool.clone();
    let message = message.to_string();
    let marked = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get().context("Failed to get DB connection")?;
        BatchImport::set_status(
            &mut conn,
            batch_id,
            BATCH_IMPORT_STATUS_FAILED,
            Some(&message),
        )
    })
    .await;
    if let Ok(Err(e)) = marked {
        error!(batch_id, "Failed to record batch failure: {}", e);
    }
}
