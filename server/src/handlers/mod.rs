pub mod deal;
pub mod stats;
pub mod types;

use actix_web::dev::HttpServiceFactory;
use actix_web::{web, HttpResponse, Responder};

use crate::db::DbPool;
use crate::middleware::{MetaGuard, RequireApiKey};

pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

/// The authenticated API surface. `/deal/*` additionally passes the
/// kill-switch and transfer-byte admission guards.
pub fn api_routes(pool: web::Data<DbPool>) -> impl HttpServiceFactory {
    web::scope("/api/v1")
        .wrap(RequireApiKey)
        .service(
            web::scope("/deal")
                .wrap(MetaGuard::new(pool))
                .route("/end-to-end", web::post().to(deal::end_to_end))
                .route("/import", web::post().to(deal::import))
                .route("/imports", web::post().to(deal::imports))
                .route("/batch/imports", web::post().to(deal::batch_imports)),
        )
        .service(
            web::scope("/stats")
                .route("/deal/by-cid/{cid}", web::get().to(stats::deal_by_cid))
                .route("/deal/by-uuid/{uuid}", web::get().to(stats::deal_by_uuid))
                .route(
                    "/deal/by-deal-id/{dealId}",
                    web::get().to(stats::deal_by_deal_id),
                )
                .route("/miner/{minerId}", web::get().to(stats::miner_stats))
                .route("/miner/{minerId}/deals", web::get().to(stats::miner_deals))
                .route("/content/{contentId}", web::get().to(stats::content_status))
                .route("/all-contents", web::get().to(stats::all_contents))
                .route("/contents", web::post().to(stats::contents_status))
                .route(
                    "/batch/imports/{batchId}",
                    web::get().to(stats::batch_contents),
                )
                .route("/deals", web::get().to(stats::deals_paged))
                .route("/totals/info", web::get().to(stats::totals_info)),
        )
}
