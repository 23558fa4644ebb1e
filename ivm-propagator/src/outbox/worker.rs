use std::sync::Arc;

use async_trait::async_trait;
use ivm_models::{ChangeType, OutboxEntry, OutboxEventType};
use ivm_storage::OutboxStorage;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::OutboxConfig;
use crate::errors::PropagationError;
use crate::sinks::SinkRouter;
use crate::webhook::WebhookDispatcher;

use super::{ArtifactRebuildPayload, SinkShipPayload, WebhookNotifyPayload};

/// Port to the artifact rebuild pipeline. The pipeline itself lives outside
/// this service; the worker only needs somewhere to hand the rebuild order.
#[async_trait]
pub trait ArtifactRebuilder: Send + Sync {
    async fn rebuild(
        &self,
        order: &ArtifactRebuildPayload,
    ) -> Result<(), PropagationError>;
}

/// Default rebuilder: acknowledges the order in the log. Deployments with a
/// real pipeline swap in their own implementation.
pub struct LoggingRebuilder;

#[async_trait]
impl ArtifactRebuilder for LoggingRebuilder {
    async fn rebuild(
        &self,
        order: &ArtifactRebuildPayload,
    ) -> Result<(), PropagationError> {
        info!(
            tenant = %order.tenant,
            entity_key = %order.entity_key,
            artifact_type = %order.artifact_type,
            change_set = %order.change_set_id,
            "Artifact rebuild ordered"
        );
        Ok(())
    }
}

/// Shared dependencies of every worker in the pool.
pub struct WorkerContext {
    pub storage: Arc<dyn OutboxStorage>,
    pub sinks: Arc<SinkRouter>,
    pub webhooks: Arc<WebhookDispatcher>,
    pub rebuilder: Arc<dyn ArtifactRebuilder>,
}

/// Polls the outbox, claims batches and dispatches entries by event type.
/// One extra task sweeps stale claims back to PENDING so a crashed worker
/// never strands its batch.
pub struct OutboxWorkerPool {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl OutboxWorkerPool {
    pub fn start(ctx: Arc<WorkerContext>, config: OutboxConfig) -> Self {
        let token = CancellationToken::new();
        let mut handles = Vec::with_capacity(config.worker_count + 1);

        for n in 0..config.worker_count {
            let worker = format!("outbox-worker-{}", n);
            let ctx = ctx.clone();
            let config = config.clone();
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                run_worker(worker, ctx, config, token).await;
            }));
        }

        {
            let ctx = ctx.clone();
            let config = config.clone();
            let token = token.clone();
            handles.push(tokio::spawn(async move {
                run_stale_sweeper(ctx, config, token).await;
            }));
        }

        info!(workers = config.worker_count, "Outbox worker pool started");
        Self { token, handles }
    }

    pub async fn shutdown(self) {
        self.token.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Outbox worker task panicked");
            }
        }
        info!("Outbox worker pool stopped");
    }
}

async fn run_worker(
    worker: String,
    ctx: Arc<WorkerContext>,
    config: OutboxConfig,
    token: CancellationToken,
) {
    let mut interval = tokio::time::interval(config.poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!(%worker, "Worker shutting down");
                return;
            }
            _ = interval.tick() => {}
        }

        let batch = match ctx
            .storage
            .claim_pending(&worker, config.batch_size)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                warn!(%worker, error = %e, "Claim failed");
                continue;
            }
        };

        for entry in batch {
            if token.is_cancelled() {
                // Unfinished claims are recovered by the stale sweep.
                return;
            }
            let id = entry.id;
            match process_entry(&ctx, &entry).await {
                Ok(()) => {
                    if let Err(e) = ctx.storage.mark_processed(id).await {
                        error!(%worker, entry = %id, error = %e, "Mark processed failed");
                    }
                }
                Err(e) => {
                    warn!(
                        %worker,
                        entry = %id,
                        event_type = ?entry.event_type,
                        retry_count = entry.retry_count,
                        error = %e,
                        "Outbox entry failed"
                    );
                    if let Err(e) = ctx.storage.mark_failed(id).await {
                        error!(%worker, entry = %id, error = %e, "Mark failed failed");
                    }
                }
            }
        }
    }
}

async fn run_stale_sweeper(
    ctx: Arc<WorkerContext>,
    config: OutboxConfig,
    token: CancellationToken,
) {
    let mut interval = tokio::time::interval(config.stale_sweep_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = interval.tick() => {}
        }
        match ctx.storage.release_stale(config.stale_claim_timeout).await {
            Ok(0) => {}
            Ok(released) => {
                warn!(released, "Stale outbox claims released");
            }
            Err(e) => {
                warn!(error = %e, "Stale sweep failed");
            }
        }
    }
}

async fn process_entry(
    ctx: &WorkerContext,
    entry: &OutboxEntry,
) -> Result<(), PropagationError> {
    match entry.event_type {
        OutboxEventType::ArtifactRebuild => {
            let order: ArtifactRebuildPayload =
                serde_json::from_value(entry.payload.clone())
                    .map_err(ivm_storage::StorageError::from)?;
            ctx.rebuilder.rebuild(&order).await
        }
        OutboxEventType::SinkShip => {
            let ship: SinkShipPayload =
                serde_json::from_value(entry.payload.clone())
                    .map_err(ivm_storage::StorageError::from)?;
            process_sink_ship(ctx, ship).await
        }
        OutboxEventType::WebhookNotify => {
            let notify: WebhookNotifyPayload =
                serde_json::from_value(entry.payload.clone())
                    .map_err(ivm_storage::StorageError::from)?;
            ctx.webhooks
                .dispatch_event(&notify.event_type, &notify.body)
                .await?;
            Ok(())
        }
    }
}

async fn process_sink_ship(
    ctx: &WorkerContext,
    ship: SinkShipPayload,
) -> Result<(), PropagationError> {
    let payload = match (&ship.change_type, &ship.payload) {
        (ChangeType::Delete, _) | (_, None) => None,
        (_, Some(payload)) => Some(payload),
    };
    let Some(payload) = payload else {
        let outcomes = ctx
            .sinks
            .delete_fan_out(
                &ship.entity_type,
                &ship.artifact_type,
                &ship.tenant,
                &ship.entity_key,
            )
            .await;
        for (_, outcome) in outcomes {
            outcome?;
        }
        return Ok(());
    };

    let outcomes = ctx
        .sinks
        .ship_fan_out(
            &ship.entity_type,
            &ship.artifact_type,
            &ship.tenant,
            &ship.entity_key,
            ship.version,
            payload,
        )
        .await;
    // One failing sink fails the whole entry so the retry covers it; sinks
    // that already shipped stay idempotent on the next attempt.
    for (_, outcome) in outcomes {
        outcome?;
    }
    Ok(())
}
