use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;

use crate::errors::StoreError;
use crate::models::run::PipelineRun;

pub const RUNS_CHANNEL: &str = "pipeline_runs";

/// Announces runs that reached a terminal status.
#[async_trait]
pub trait RunNotifier: Send + Sync {
    async fn run_finished(&self, run: &PipelineRun) -> Result<(), StoreError>;
}

/// Publishes the terminal result as JSON on the `pipeline_runs` Redis channel.
#[derive(Clone)]
pub struct RedisNotifier {
    client: redis::Client,
}

impl RedisNotifier {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RunNotifier for RedisNotifier {
    async fn run_finished(&self, run: &PipelineRun) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&run.result())?;
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Backend(format!("Redis connection failed: {e}")))?;
        let receivers: i64 = conn
            .publish(RUNS_CHANNEL, payload)
            .await
            .map_err(|e| StoreError::Backend(format!("Redis publish failed: {e}")))?;
        debug!(run_id = %run.run_id, receivers, "Published run result");
        Ok(())
    }
}
