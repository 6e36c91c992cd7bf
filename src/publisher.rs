use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use serde::Serialize;
use tokio::sync::OnceCell;

/// ============================================================
/// Job events
/// ============================================================
///
/// Messages sent to downstream consumers. Serialized as camelCase
/// JSON with a `type` tag:
///
/// {"type":"runCompleted","jobName":"kline-collection",
///  "completedAt":"2024-01-01T00:00:00Z","success":true,
///  "rowCount":2000,"pairCount":2}
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum JobEvent {
    RunCompleted(RunReport),
    WarmupCompleted(WarmupReport),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub job_name: String,
    pub completed_at: DateTime<Utc>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pair_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmupReport {
    pub completed_at: DateTime<Utc>,
}

impl JobEvent {
    pub fn run_succeeded(job_name: &str, row_count: usize, pair_count: usize) -> Self {
        JobEvent::RunCompleted(RunReport {
            job_name: job_name.to_string(),
            completed_at: Utc::now(),
            success: true,
            row_count: Some(row_count),
            pair_count: Some(pair_count),
            error_detail: None,
        })
    }

    pub fn run_failed(job_name: &str, error_detail: String) -> Self {
        JobEvent::RunCompleted(RunReport {
            job_name: job_name.to_string(),
            completed_at: Utc::now(),
            success: false,
            row_count: None,
            pair_count: None,
            error_detail: Some(error_detail),
        })
    }

    pub fn warmup_completed(at: DateTime<Utc>) -> Self {
        JobEvent::WarmupCompleted(WarmupReport { completed_at: at })
    }
}

/// Sink for job events.
///
/// Callers log publish errors and carry on; a lost notification
/// never changes the outcome of the job that produced it.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &JobEvent) -> anyhow::Result<()>;
}

const CONNECT_RETRIES: usize = 2;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// ============================================================
/// RedisPublisher
/// ============================================================
///
/// Publishes every event as one JSON message on a Redis pub/sub
/// channel.
///
/// The connection is opened on first use; a failed first connect is
/// not cached and is retried by the next publish. After that the
/// `ConnectionManager` re-establishes a dropped connection in the
/// background: the publish that hits the broken link fails, later
/// ones go through the new connection.
pub struct RedisPublisher {
    client: redis::Client,
    channel: String,
    conn: OnceCell<ConnectionManager>,
}

impl RedisPublisher {
    pub fn new(url: &str, channel: &str) -> anyhow::Result<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
            channel: channel.to_string(),
            conn: OnceCell::new(),
        })
    }

    async fn connection(&self) -> anyhow::Result<ConnectionManager> {
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(CONNECT_RETRIES)
            .set_connection_timeout(Some(CONNECT_TIMEOUT));

        let conn = self
            .conn
            .get_or_try_init(|| self.client.get_connection_manager_with_config(config))
            .await
            .context("redis connection failed")?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl EventPublisher for RedisPublisher {
    async fn publish(&self, event: &JobEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.connection().await?;

        let receivers: i64 = conn.publish(&self.channel, payload).await?;
        log::debug!("event published on {} to {} subscriber(s)", self.channel, receivers);
        Ok(())
    }
}

/// ============================================================
/// LogPublisher
/// ============================================================
///
/// DEMO MODE:
/// - No network connections
/// - Events are written to the log only
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, event: &JobEvent) -> anyhow::Result<()> {
        log::info!("DEMO → {}", serde_json::to_string(event)?);
        Ok(())
    }
}

/// Publishes and logs instead of failing.
pub async fn publish_logged(publisher: &dyn EventPublisher, event: &JobEvent) {
    if let Err(e) = publisher.publish(event).await {
        log::error!("failed to publish job event: {:#}", e);
    }
}
