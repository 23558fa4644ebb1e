use anyhow::Result;
use envconfig::Envconfig;
use std::time::Duration;

#[derive(Debug, Clone, Envconfig)]
pub struct AppConfig {
    // Server configuration
    #[envconfig(from = "SERVER_HOST", default = "0.0.0.0")]
    pub server_host: String,

    #[envconfig(from = "SERVER_PORT", default = "8080")]
    pub server_port: u16,

    // Contract registry cache
    #[envconfig(from = "REGISTRY_CACHE_TTL_SECONDS", default = "300")]
    pub registry_cache_ttl_seconds: u64,

    #[envconfig(from = "REGISTRY_CACHE_MAX_ENTRIES", default = "256")]
    pub registry_cache_max_entries: usize,

    #[envconfig(from = "REGISTRY_LOAD_TIMEOUT_SECONDS", default = "10")]
    pub registry_load_timeout_seconds: u64,

    // Outbox workers
    #[envconfig(from = "OUTBOX_WORKER_COUNT", default = "2")]
    pub outbox_worker_count: usize,

    #[envconfig(from = "OUTBOX_BATCH_SIZE", default = "16")]
    pub outbox_batch_size: usize,

    #[envconfig(from = "OUTBOX_POLL_INTERVAL_MS", default = "500")]
    pub outbox_poll_interval_ms: u64,

    #[envconfig(from = "OUTBOX_STALE_CLAIM_TIMEOUT_SECONDS", default = "120")]
    pub outbox_stale_claim_timeout_seconds: u64,

    #[envconfig(from = "OUTBOX_STALE_SWEEP_INTERVAL_SECONDS", default = "60")]
    pub outbox_stale_sweep_interval_seconds: u64,

    // Webhook delivery
    #[envconfig(from = "WEBHOOK_REQUEST_TIMEOUT_SECONDS", default = "10")]
    pub webhook_request_timeout_seconds: u64,

    #[envconfig(from = "WEBHOOK_CIRCUIT_FAILURE_THRESHOLD", default = "5")]
    pub webhook_circuit_failure_threshold: u32,

    #[envconfig(from = "WEBHOOK_CIRCUIT_COOL_DOWN_SECONDS", default = "60")]
    pub webhook_circuit_cool_down_seconds: u64,

    // Sinks
    #[envconfig(from = "SINK_HEALTH_TIMEOUT_SECONDS", default = "5")]
    pub sink_health_timeout_seconds: u64,

    // Observability
    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,

    #[envconfig(from = "LOG_FORMAT", default = "json")]
    pub log_format: String,
}

impl AppConfig {
    /// Load configuration from environment variables only.
    pub fn load_from_env() -> Result<Self> {
        Ok(Self::init_from_env()?)
    }

    pub fn server(&self) -> ServerConfig {
        ServerConfig {
            host: self.server_host.clone(),
            port: self.server_port,
        }
    }

    pub fn registry(&self) -> RegistryConfig {
        RegistryConfig {
            cache_ttl: Duration::from_secs(self.registry_cache_ttl_seconds),
            max_entries: self.registry_cache_max_entries,
            load_timeout: Duration::from_secs(
                self.registry_load_timeout_seconds,
            ),
        }
    }

    pub fn outbox(&self) -> OutboxConfig {
        OutboxConfig {
            worker_count: self.outbox_worker_count.max(1),
            batch_size: self.outbox_batch_size.max(1),
            poll_interval: Duration::from_millis(self.outbox_poll_interval_ms),
            stale_claim_timeout: Duration::from_secs(
                self.outbox_stale_claim_timeout_seconds,
            ),
            stale_sweep_interval: Duration::from_secs(
                self.outbox_stale_sweep_interval_seconds,
            ),
        }
    }

    pub fn sinks(&self) -> SinkConfig {
        SinkConfig {
            health_timeout: Duration::from_secs(
                self.sink_health_timeout_seconds,
            ),
        }
    }

    pub fn webhook(&self) -> WebhookConfig {
        WebhookConfig {
            request_timeout: Duration::from_secs(
                self.webhook_request_timeout_seconds,
            ),
            circuit_failure_threshold: self.webhook_circuit_failure_threshold,
            circuit_cool_down: Duration::from_secs(
                self.webhook_circuit_cool_down_seconds,
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub cache_ttl: Duration,
    pub max_entries: usize,
    pub load_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct OutboxConfig {
    pub worker_count: usize,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub stale_claim_timeout: Duration,
    pub stale_sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub health_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub request_timeout: Duration,
    pub circuit_failure_threshold: u32,
    pub circuit_cool_down: Duration,
}
