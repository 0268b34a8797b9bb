use actix_web::middleware::{Compress, Logger};
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use actix_web_prometheus::PrometheusMetricsBuilder;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub mod auth;
pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod metrics;
pub mod pagination;
pub mod storage;
pub mod template;

pub use crate::db::AppState;
pub use crate::error::AppError;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<String>,
}

impl ErrorResponse {
    pub fn new(error_type: &str, message: &str) -> Self {
        Self {
            error: error_type.to_string(),
            message: message.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            locked_until: None,
        }
    }
}

async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Register every route on an `App`; shared by the server and the HTTP tests.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics/engine", web::get().to(metrics::engine_metrics))
        .service(
            web::scope("/api")
                .configure(auth::handlers::config)
                .configure(template::handlers::config)
                .configure(document::handlers::config),
        );
}

pub async fn run() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = config::AppConfig::from_env().context("invalid configuration")?;
    let bind_address = config.bind_address.clone();

    let app_state = match AppState::new(config).await {
        Ok(state) => web::Data::new(state),
        Err(e) => {
            log::error!("Failed to initialize application state. Please check DATABASE_URL and DOCUMENTS_PATH. Error: {}", e);
            return Err(anyhow::anyhow!(e));
        }
    };

    let shutdown = CancellationToken::new();
    app_state.spawn_background_tasks(shutdown.clone());

    let prometheus = PrometheusMetricsBuilder::new("docgen_server")
        .endpoint("/metrics")
        .build()
        .map_err(|e| anyhow::anyhow!("failed to create Prometheus metrics middleware: {}", e))?;

    log::info!("Starting server at http://{}", bind_address);

    let result = HttpServer::new(move || {
        App::new()
            .wrap(Compress::default())
            .wrap(prometheus.clone())
            .wrap(Logger::default())
            .app_data(app_state.clone())
            .configure(configure_routes)
    })
    .keep_alive(actix_web::http::KeepAlive::Os)
    .bind(&bind_address)
    .with_context(|| format!("failed to bind {}", bind_address))?
    .run()
    .await;

    shutdown.cancel();
    log::info!("Server stopped");
    result.context("server error")
}
