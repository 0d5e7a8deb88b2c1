//! HTTP middleware. Request logging comes from `tracing_actix_web::TracingLogger`;
//! this module only adds metrics collection.

pub mod metrics;

pub use metrics::MetricsMiddleware;
