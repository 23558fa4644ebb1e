use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{delete, get, post},
};
use ivm_storage::{
    ChangeSetStorage, DeliveryStorage, MutationStorage, WebhookStorage,
};
use tracing::info;

use crate::api::{create_middleware_stack, handlers};
use crate::config::{ServerConfig, WebhookConfig};
use crate::outbox::OutboxService;
use crate::services::IngestService;
use crate::sinks::SinkRouter;
use crate::webhook::WebhookDispatcher;

#[derive(Clone)]
pub struct AppState {
    pub ingest_service: Arc<IngestService>,
    pub outbox_service: Arc<OutboxService>,
    pub webhook_dispatcher: Arc<WebhookDispatcher>,
    pub mutation_storage: Arc<dyn MutationStorage>,
    pub changeset_storage: Arc<dyn ChangeSetStorage>,
    pub webhook_storage: Arc<dyn WebhookStorage>,
    pub delivery_storage: Arc<dyn DeliveryStorage>,
    pub sink_router: Arc<SinkRouter>,
    pub sink_health_timeout: Duration,
    pub webhook_defaults: WebhookConfig,
}

pub struct ApiServer {
    app: Router,
    config: ServerConfig,
}

impl ApiServer {
    pub fn new(state: AppState, config: ServerConfig) -> Self {
        let app = Router::new()
            // Entity ingest
            .route(
                "/api/v1/entities/{tenant}/{entity_type}/{key}/versions",
                post(handlers::ingest_version),
            )
            .route(
                "/api/v1/entities/{tenant}/{entity_type}/{key}",
                get(handlers::get_latest_version),
            )
            .route(
                "/api/v1/entities/{tenant}/{entity_type}/{key}",
                delete(handlers::delete_entity),
            )
            .route(
                "/api/v1/entities/{tenant}/{entity_type}/{key}/changesets",
                get(handlers::list_change_sets),
            )
            // Contract tooling
            .route(
                "/api/v1/contracts/validate",
                post(handlers::validate_contract),
            )
            .route("/api/v1/contracts/diff", post(handlers::diff_payloads))
            .route(
                "/api/v1/contracts/simulate",
                post(handlers::simulate_contract),
            )
            // Outbox inspection and replay
            .route(
                "/api/v1/outbox/recent",
                get(handlers::list_recent_entries),
            )
            .route(
                "/api/v1/outbox/failed",
                get(handlers::list_failed_entries),
            )
            .route(
                "/api/v1/outbox/dlq",
                get(handlers::list_dead_letter_entries),
            )
            .route("/api/v1/outbox/stale", get(handlers::list_stale_entries))
            .route("/api/v1/outbox/{id}", get(handlers::get_entry))
            .route("/api/v1/outbox/{id}/retry", post(handlers::retry_entry))
            .route(
                "/api/v1/outbox/failed/retry-all",
                post(handlers::retry_all_failed),
            )
            .route(
                "/api/v1/outbox/dlq/{id}/replay",
                post(handlers::replay_dead_letter),
            )
            .route(
                "/api/v1/outbox/stale/release",
                post(handlers::release_stale),
            )
            // Webhook management
            .route("/api/v1/webhooks", post(handlers::create_webhook))
            .route("/api/v1/webhooks", get(handlers::list_webhooks))
            .route("/api/v1/webhooks/{id}", get(handlers::get_webhook))
            .route("/api/v1/webhooks/{id}", delete(handlers::delete_webhook))
            .route("/api/v1/webhooks/{id}/test", post(handlers::test_webhook))
            .route(
                "/api/v1/webhooks/{id}/circuit",
                get(handlers::get_circuit),
            )
            .route(
                "/api/v1/webhooks/{id}/circuit/reset",
                post(handlers::reset_circuit),
            )
            .route(
                "/api/v1/webhooks/{id}/deliveries",
                get(handlers::list_deliveries),
            )
            // Sink health
            .route("/api/v1/sinks/health", get(handlers::sink_health))
            // Health check endpoint
            .route("/health", get(health_check))
            .layer(create_middleware_stack())
            .with_state(state);

        Self { app, config }
    }

    pub async fn serve(self) -> Result<(), Box<dyn std::error::Error>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!("Propagator API server listening on {}", addr);
        info!("Health check available at: http://{}/health", addr);

        axum::serve(listener, self.app).await?;

        Ok(())
    }

    /// Consume and return the underlying Router so tests can drive it with
    /// `tower::ServiceExt::oneshot` or serve it on an ephemeral port.
    pub fn into_router(self) -> Router {
        self.app
    }
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "service": "ivm-propagator",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}
