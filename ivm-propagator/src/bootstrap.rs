use std::sync::Arc;

use ivm_models::SinkRule;
use ivm_storage::{StorageFactory, memory::MemoryStorageFactory};

use crate::config::AppConfig;
use crate::errors::PropagationError;
use crate::outbox::{
    LoggingRebuilder, OutboxService, OutboxWorkerPool, worker::WorkerContext,
};
use crate::registry::{ContractLoader, ContractRegistry};
use crate::server::{ApiServer, AppState};
use crate::services::IngestService;
use crate::sinks::{SinkRouter, SinkShipper};
use crate::webhook::{HttpTransport, WebhookDispatcher, WebhookTransport};

/// Everything main (or an integration test) needs after wiring: the API
/// state and the context the worker pool runs against.
pub struct Components {
    pub state: AppState,
    pub worker_ctx: Arc<WorkerContext>,
    pub registry: Arc<ContractRegistry>,
    pub sinks: Arc<SinkRouter>,
}

/// Wires the propagation core over in-memory storage. Tests call this with
/// a mock transport; `main` passes `HttpTransport`.
pub fn build_components(
    config: &AppConfig,
    loader: Arc<dyn ContractLoader>,
    sinks: Vec<Arc<dyn SinkShipper>>,
    rules: Vec<SinkRule>,
    transport: Arc<dyn WebhookTransport>,
) -> Components {
    let factory = MemoryStorageFactory::new();
    let mutation_storage = Arc::new(factory.create_mutation_storage());
    let changeset_storage = Arc::new(factory.create_changeset_storage());
    let outbox_storage = Arc::new(factory.create_outbox_storage());
    let webhook_storage = Arc::new(factory.create_webhook_storage());
    let delivery_storage = Arc::new(factory.create_delivery_storage());

    let registry_config = config.registry();
    let registry = Arc::new(ContractRegistry::new(
        loader,
        registry_config.cache_ttl,
        registry_config.max_entries,
        registry_config.load_timeout,
    ));

    let router = Arc::new(SinkRouter::new(sinks, rules));

    let dispatcher = Arc::new(WebhookDispatcher::new(
        webhook_storage.clone(),
        delivery_storage.clone(),
        transport,
    ));

    let ingest_service = Arc::new(IngestService::new(
        mutation_storage.clone(),
        registry.clone(),
        router.clone(),
        webhook_storage.clone(),
    ));
    let outbox_service = Arc::new(OutboxService::new(outbox_storage.clone()));

    let worker_ctx = Arc::new(WorkerContext {
        storage: outbox_storage,
        sinks: router.clone(),
        webhooks: dispatcher.clone(),
        rebuilder: Arc::new(LoggingRebuilder),
    });

    let state = AppState {
        ingest_service,
        outbox_service,
        webhook_dispatcher: dispatcher,
        mutation_storage,
        changeset_storage,
        webhook_storage,
        delivery_storage,
        sink_router: router.clone(),
        sink_health_timeout: config.sinks().health_timeout,
        webhook_defaults: config.webhook(),
    };

    Components {
        state,
        worker_ctx,
        registry,
        sinks: router,
    }
}

/// Full service assembly for `main`: HTTP transport, worker pool started,
/// API server ready to serve.
pub fn build_service(
    config: &AppConfig,
    loader: Arc<dyn ContractLoader>,
    sinks: Vec<Arc<dyn SinkShipper>>,
    rules: Vec<SinkRule>,
) -> Result<(ApiServer, OutboxWorkerPool), PropagationError> {
    let transport = Arc::new(HttpTransport::new(&config.webhook())?);
    let components =
        build_components(config, loader, sinks, rules, transport);
    let pool =
        OutboxWorkerPool::start(components.worker_ctx, config.outbox());
    let server = ApiServer::new(components.state, config.server());
    Ok((server, pool))
}
