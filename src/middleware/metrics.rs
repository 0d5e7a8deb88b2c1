//! # Metrics Middleware
//!
//! Counts every request in `AppState`: total, in flight, and per endpoint.
//!
//! ## Endpoint keys:
//! Requests are keyed by method plus the *matched route pattern*
//! (`POST /api/v1/assessment`), not the raw path, so unknown paths and
//! query strings cannot grow the metrics map without bound. Requests that
//! match no route are counted under `"<method> <unmatched>"`.
//!
//! ## How actix middleware works:
//! - **Transform**: a factory, called once per worker, that wraps the next service
//! - **Service**: the wrapper itself, called once per request
//! - The returned future runs the inner service and records the outcome

use crate::state::AppState;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};

pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService { service }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let method = req.method().to_string();
        let state = req.app_data::<web::Data<AppState>>().cloned();

        if let Some(state) = &state {
            state.request_started();
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis() as u64;

            if let Some(state) = state {
                let (pattern, is_error) = match &result {
                    Ok(response) => (
                        response.request().match_pattern(),
                        response.status().is_client_error() || response.status().is_server_error(),
                    ),
                    Err(_) => (None, true),
                };
                let endpoint = format!(
                    "{} {}",
                    method,
                    pattern.as_deref().unwrap_or("<unmatched>")
                );
                state.request_finished(&endpoint, duration_ms, is_error);
            }

            result
        })
    }
}
