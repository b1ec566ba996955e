#![allow(clippy::missing_docs_in_private_items)]

pub mod export;
pub mod ingress;
pub mod pipeline;

use chrono::Utc;
use common::storage::{
    db::SurrealDbClient,
    types::pipeline_task::{PipelineTask, DEFAULT_LEASE_SECS},
};
pub use pipeline::{IngestionConfig, IngestionTuning, MessagePipeline};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Claim-and-process loop for one background worker. Run several of these
/// concurrently to reach the configured pipeline concurrency; the task lease
/// keeps any one message's stage on a single worker.
pub async fn run_worker_loop(
    db: Arc<SurrealDbClient>,
    pipeline: Arc<MessagePipeline>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let worker_id = format!("pipeline-worker-{}", Uuid::new_v4());
    let lease_duration = Duration::from_secs(DEFAULT_LEASE_SECS as u64);
    let idle_backoff = Duration::from_millis(500);

    loop {
        match PipelineTask::claim_next_ready(&db, &worker_id, Utc::now(), lease_duration).await {
            Ok(Some(task)) => {
                let task_id = task.id.clone();
                info!(
                    %worker_id,
                    %task_id,
                    stage = task.stage.as_str(),
                    attempt = task.attempts,
                    "claimed pipeline task"
                );
                if let Err(err) = pipeline.process_task(task).await {
                    error!(%worker_id, %task_id, error = %err, "pipeline task failed");
                }
            }
            Ok(None) => {
                sleep(idle_backoff).await;
            }
            Err(err) => {
                error!(%worker_id, error = %err, "failed to claim pipeline task");
                warn!("Backing off for 1s after claim error");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
