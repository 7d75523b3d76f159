#![allow(clippy::missing_docs_in_private_items)]

pub mod chunking;
pub mod dedupe;
pub mod facts;
pub mod metadata;
pub mod pipeline;
pub mod reconcile;
pub mod services;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use common::storage::{
    db::SurrealDbClient,
    types::task::{Task, DEFAULT_LEASE_SECS},
};
pub use pipeline::{IngestionPipeline, IngestionTuning};
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

/// How often the idle worker runs the cross-store reconcile sweep.
const RECONCILE_INTERVAL: Duration = Duration::from_secs(300);

pub async fn run_worker_loop(
    db: Arc<SurrealDbClient>,
    pipeline: Arc<IngestionPipeline>,
) -> Result<(), Box<dyn std::error::Error>> {
    let worker_id = format!("worker-{}", Uuid::new_v4());
    let lease_duration = Duration::from_secs(DEFAULT_LEASE_SECS);
    let idle_backoff = Duration::from_millis(500);
    let mut last_sweep = Instant::now();

    info!(%worker_id, "worker loop started");

    loop {
        match Task::claim_next_ready(&db, &worker_id, Utc::now(), lease_duration).await {
            Ok(Some(task)) => {
                let task_id = task.id.clone();
                info!(
                    %worker_id,
                    %task_id,
                    kind = ?task.kind,
                    attempt = task.attempts,
                    "claimed task"
                );
                if let Err(err) = pipeline.process_task(task).await {
                    error!(%worker_id, %task_id, error = %err, "task failed");
                }
            }
            Ok(None) => {
                if last_sweep.elapsed() >= RECONCILE_INTERVAL {
                    last_sweep = Instant::now();
                    if let Err(err) =
                        reconcile::reconcile_vectors(&db, pipeline.vectors(), pipeline.services())
                            .await
                    {
                        warn!(%worker_id, error = %err, "reconcile sweep failed");
                    }
                }
                sleep(idle_backoff).await;
            }
            Err(err) => {
                error!(%worker_id, error = %err, "failed to claim task");
                warn!("Backing off for 1s after claim error");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
