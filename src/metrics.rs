//! Domain counters for document generation, reconciliation and lockouts.
//!
//! HTTP request metrics live on `/metrics` (actix-web-prometheus); these are
//! served separately on `/metrics/engine`.

use actix_web::{HttpResponse, Responder};
use lazy_static::lazy_static;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

const NAMESPACE: &str = "docgen_engine";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref DOCUMENTS_GENERATED: IntCounter = register(IntCounter::with_opts(
        Opts::new("documents_generated_total", "Documents committed to the store").namespace(NAMESPACE)
    ));

    /// Generation requests aborted, labelled by the failing error class.
    pub static ref GENERATIONS_FAILED: IntCounterVec = register(IntCounterVec::new(
        Opts::new("generations_failed_total", "Generation requests that committed nothing").namespace(NAMESPACE),
        &["reason"],
    ));

    pub static ref RENDER_SECONDS: Histogram = register(Histogram::with_opts(
        HistogramOpts::new("render_seconds", "Time spent converting HTML to PDF").namespace(NAMESPACE)
    ));

    pub static ref CLEANUP_FAILURES: IntCounter = register(IntCounter::with_opts(
        Opts::new("cleanup_failures_total", "Files that could not be removed after a failed or deleted generation").namespace(NAMESPACE)
    ));

    pub static ref SWEEP_RUNS: IntCounter = register(IntCounter::with_opts(
        Opts::new("sweep_runs_total", "Completed reconciliation runs").namespace(NAMESPACE)
    ));

    pub static ref ORPHANS_DELETED: IntCounter = register(IntCounter::with_opts(
        Opts::new("orphans_deleted_total", "Orphaned files removed by the sweeper").namespace(NAMESPACE)
    ));

    pub static ref ACCOUNT_LOCKOUTS: IntCounter = register(IntCounter::with_opts(
        Opts::new("account_lockouts_total", "Accounts locked after repeated failed logins").namespace(NAMESPACE)
    ));
}

fn register<M>(metric: prometheus::Result<M>) -> M
where
    M: prometheus::core::Collector + Clone + 'static,
{
    let metric = metric.expect("metric definition is valid");
    REGISTRY
        .register(Box::new(metric.clone()))
        .expect("metric is registered once");
    metric
}

/// Prometheus text exposition of the engine counters
pub async fn engine_metrics() -> impl Responder {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        log::error!("Failed to encode engine metrics: {:?}", e);
        return HttpResponse::InternalServerError().finish();
    }
    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
