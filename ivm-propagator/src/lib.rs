pub mod api;
pub mod bootstrap;
pub mod changeset;
pub mod config;
pub mod errors;
pub mod impact;
pub mod outbox;
pub mod registry;
pub mod server;
pub mod services;
pub mod sinks;
pub mod webhook;

pub use config::*;
pub use errors::*;
pub use server::{ApiServer, AppState};

pub use bootstrap::{Components, build_components, build_service};
pub use changeset::ChangeSetBuilder;
pub use outbox::{OutboxService, OutboxWorkerPool};
pub use registry::{ContractLoader, ContractRegistry, StaticContractLoader};
pub use services::{ContractToolsService, IngestService};
pub use sinks::{MemorySearchSink, SinkRouter, SinkShipper};
pub use webhook::{CircuitBreaker, WebhookDispatcher, WebhookTransport};

pub use api::create_middleware_stack;
