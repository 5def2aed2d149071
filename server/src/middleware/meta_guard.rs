//! Admission control for the deal-making surface.
//!
//! Two checks run before any `/deal/*` handler:
//! 1. the instance kill switch (`instance_metas.disable_request`), and
//! 2. a crude memory guard: when the bytes of in-flight transfers started
//!    since this instance came up exceed `number_of_cpus * bytes_per_cpu`,
//!    new deal requests are turned away until transfers drain.

use actix_web::{
    body::{BoxBody, EitherBody},
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpResponse,
};
use futures_util::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::rc::Rc;
use tracing::warn;

use crate::db::DbPool;
use crate::models::content::Content;
use crate::models::instance_meta::InstanceMeta;

pub struct MetaGuard {
    pool: actix_web::web::Data<DbPool>,
}

impl MetaGuard {
    pub fn new(pool: actix_web::web::Data<DbPool>) -> Self {
        Self { pool }
    }
}

impl<S, B> Transform<S, ServiceRequest> for MetaGuard
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B, BoxBody>>;
    type Error = Error;
    type InitError = ();
    type Transform = MetaGuardMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetaGuardMiddleware {
            service: Rc::new(service),
            pool: self.pool.clone(),
        }))
    }
}

pub struct MetaGuardMiddleware<S> {
    service: Rc<S>,
    pool: actix_web::web::Data<DbPool>,
}

impl<S, B> Service<ServiceRequest> for MetaGuardMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B, BoxBody>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let svc = self.service.clone();
        let pool = self.pool.clone();

        Box::pin(async move {
            let mut conn = match pool.get() {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!("Database connection error: {}", e);
                    return Ok(req
                        .into_response(HttpResponse::InternalServerError().json(
                            serde_json::json!({
                                "error": "Internal server error",
                                "message": "Database unavailable"
                            }),
                        ))
                        .map_into_right_body());
                }
            };

            let meta = match InstanceMeta::get(&mut conn) {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::error!("Instance meta lookup failed: {}", e);
                    return Ok(req
                        .into_response(HttpResponse::InternalServerError().json(
                            serde_json::json!({
                                "error": "Internal server error",
                                "message": "Instance meta unavailable"
                            }),
                        ))
                        .map_into_right_body());
                }
            };

            if meta.disable_request {
                warn!(path = %req.path(), "request rejected by kill switch");
                return Ok(req
                    .into_response(HttpResponse::Forbidden().json("request is disabled"))
                    .map_into_right_body());
            }

            let in_flight =
                Content::transfer_started_bytes_since(&mut conn, meta.instance_start)
                    .unwrap_or(0);
            if in_flight > meta.transfer_byte_budget() {
                warn!(
                    in_flight,
                    budget = meta.transfer_byte_budget(),
                    "request rejected by transfer byte guard"
                );
                return Ok(req
                    .into_response(HttpResponse::Forbidden().json(serde_json::json!({
                        "status": "error",
                        "message": "Too much data is being transferred, please try again once all other transfers are complete"
                    })))
                    .map_into_right_body());
            }

            let res = svc.call(req).await?;
            Ok(res.map_into_left_body())
        })
    }
}
