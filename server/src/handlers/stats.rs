//! Status and aggregate endpoints. Reads that observe a content still in
//! flight against its provider enqueue one reconcile job as a side effect,
//! so polling a deal also nudges it forward.

use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;
use tracing::error;

use crate::jobs::{Job, JobContext};
use crate::services::stats::{DealView, StatsService};

fn not_found(message: String) -> HttpResponse {
    HttpResponse::NotFound().json(serde_json::json!({
        "status": "error",
        "message": message,
    }))
}

fn reconcile_if_needed(ctx: &JobContext, view: &DealView) {
    if let Some(content_id) = view.reconcile_content_id {
        ctx.dispatcher
            .add_job_and_dispatch(Job::DealStatusCheck { content_id }, 1);
    }
}

fn respond_with_view(ctx: &JobContext, view: Result<DealView, anyhow::Error>) -> HttpResponse {
    match view {
        Ok(view) => {
            reconcile_if_needed(ctx, &view);
            HttpResponse::Ok().json(&view.body)
        }
        Err(e) => not_found(e.to_string()),
    }
}

// ============================================================================
// Deal lookups
// ============================================================================

pub async fn deal_by_cid(
    ctx: web::Data<JobContext>,
    stats: web::Data<StatsService>,
    path: web::Path<String>,
) -> impl Responder {
    respond_with_view(&ctx, stats.deal_by_cid(&path.into_inner()))
}

pub async fn deal_by_uuid(
    ctx: web::Data<JobContext>,
    stats: web::Data<StatsService>,
    path: web::Path<String>,
) -> impl Responder {
    respond_with_view(&ctx, stats.deal_by_uuid(&path.into_inner()))
}

pub async fn deal_by_deal_id(
    ctx: web::Data<JobContext>,
    stats: web::Data<StatsService>,
    path: web::Path<i64>,
) -> impl Responder {
    respond_with_view(&ctx, stats.deal_by_deal_id(path.into_inner()))
}

// ============================================================================
// Content views
// ============================================================================

pub async fn content_status(
    ctx: web::Data<JobContext>,
    stats: web::Data<StatsService>,
    path: web::Path<i64>,
) -> impl Responder {
    respond_with_view(&ctx, stats.content_status(path.into_inner()))
}

pub async fn contents_status(
    ctx: web::Data<JobContext>,
    stats: web::Data<StatsService>,
    body: web::Json<Vec<i64>>,
) -> impl Responder {
    collect_content_views(&ctx, &stats, body.into_inner())
}

pub async fn all_contents(
    ctx: web::Data<JobContext>,
    stats: web::Data<StatsService>,
) -> impl Responder {
    match stats.all_content_ids() {
        Ok(ids) => collect_content_views(&ctx, &stats, ids),
        Err(e) => {
            error!("Failed to list contents: {}", e);
            HttpResponse::InternalServerError().json("Failed to list contents")
        }
    }
}

pub async fn batch_contents(
    ctx: web::Data<JobContext>,
    stats: web::Data<StatsService>,
    path: web::Path<i64>,
) -> impl Responder {
    match stats.batch_content_ids(path.into_inner()) {
        Ok(ids) => collect_content_views(&ctx, &stats, ids),
        Err(e) => not_found(e.to_string()),
    }
}

fn collect_content_views(ctx: &JobContext, stats: &StatsService, ids: Vec<i64>) -> HttpResponse {
    let mut views = Vec::with_capacity(ids.len());
    for content_id in ids {
        match stats.content_status(content_id) {
            Ok(view) => {
                reconcile_if_needed(ctx, &view);
                views.push(view.body);
            }
            Err(e) => return not_found(e.to_string()),
        }
    }
    HttpResponse::Ok().json(views)
}

// ============================================================================
// Miner and aggregate views
// ============================================================================

pub async fn miner_stats(stats: web::Data<StatsService>, path: web::Path<String>) -> impl Responder {
    match stats.miner_stats(&path.into_inner()) {
        Ok(body) => HttpResponse::Ok().json(body),
        Err(e) => not_found(e.to_string()),
    }
}

pub async fn miner_deals(stats: web::Data<StatsService>, path: web::Path<String>) -> impl Responder {
    match stats.miner_deals(&path.into_inner()) {
        Ok(body) => HttpResponse::Ok().json(body),
        Err(e) => not_found(e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub page: i64,
    #[serde(default)]
    pub page_size: i64,
}

pub async fn deals_paged(
    stats: web::Data<StatsService>,
    query: web::Query<PageQuery>,
) -> impl Responder {
    let page = if query.page < 1 { 1 } else { query.page };
    let page_size = if query.page_size < 1 { 10 } else { query.page_size };
    match stats.deals_paged(page, page_size) {
        Ok(body) => HttpResponse::Ok().json(body),
        Err(e) => {
            error!("Failed to page deals: {}", e);
            HttpResponse::InternalServerError().json("Failed to page deals")
        }
    }
}

pub async fn totals_info(stats: web::Data<StatsService>) -> impl Responder {
    match stats.totals() {
        Ok(body) => HttpResponse::Ok().json(body),
        Err(e) => {
            error!("Failed to compute totals: {}", e);
            HttpResponse::InternalServerError().json("Failed to compute totals")
        }
    }
}
