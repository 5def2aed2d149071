//! API key authentication middleware.
//!
//! Every request carries `Authorization: Bearer <api-key>`. The key string
//! is opaque to Delta: it scopes wallet lookups and tags each created
//! content via `requesting_api_key`. Requests without a key are rejected
//! before any handler runs.

use actix_web::{
    body::{BoxBody, EitherBody},
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage, HttpRequest, HttpResponse,
};
use futures_util::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::rc::Rc;

/// Authenticated caller context attached to request extensions.
#[derive(Clone, Debug)]
pub struct ApiKeyContext {
    pub api_key: String,
}

/// Fetch the caller's API key from a request previously admitted by
/// [`RequireApiKey`].
pub fn api_key(req: &HttpRequest) -> Option<String> {
    req.extensions().get::<ApiKeyContext>().map(|ctx| ctx.api_key.clone())
}

pub struct RequireApiKey;

impl<S, B> Transform<S, ServiceRequest> for RequireApiKey
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B, BoxBody>>;
    type Error = Error;
    type InitError = ();
    type Transform = RequireApiKeyMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequireApiKeyMiddleware {
            service: Rc::new(service),
        }))
    }
}

pub struct RequireApiKeyMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for RequireApiKeyMiddleware<S>
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

        Box::pin(async move {
            let bearer = extract_bearer(&req);

            let api_key = match bearer {
                Some(key) if !key.is_empty() => key,
                _ => {
                    return Ok(req
                        .into_response(HttpResponse::Unauthorized().json(serde_json::json!({
                            "error": "API key required",
                            "message": "Provide an API key via 'Authorization: Bearer <key>'"
                        })))
                        .map_into_right_body());
                }
            };

            req.extensions_mut().insert(ApiKeyContext { api_key });

            let res = svc.call(req).await?;
            Ok(res.map_into_left_body())
        })
    }
}

fn extract_bearer(req: &ServiceRequest) -> Option<String> {
    let header = req.headers().get("Authorization")?;
    let value = header.to_str().ok()?;
    value.strip_prefix("Bearer ").map(|key| key.trim().to_string())
}
