use crate::repo::outbox_repo::{OutboxEvent, OutboxRepo};
use anyhow::Result;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishFailure {
    Retry,
    Terminal,
}

pub fn failure_disposition(retry_count: i32, max_retries: i32) -> PublishFailure {
    if retry_count > max_retries {
        PublishFailure::Terminal
    } else {
        PublishFailure::Retry
    }
}

pub fn truncate_error(message: &str) -> String {
    message.chars().take(500).collect()
}

#[derive(Clone)]
pub struct OutboxRelay {
    pub outbox_repo: OutboxRepo,
    pub redis_client: redis::Client,
    pub topic: String,
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub max_retries: i32,
    pub publish_timeout: Duration,
}

impl OutboxRelay {
    pub async fn run(self) {
        loop {
            if let Err(err) = self.tick().await {
                tracing::error!("outbox relay error: {}", err);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    // Drains the oldest PENDING rows in commit order. A crash between the bus
    // acknowledgement and mark_published re-publishes the event on the next
    // poll; downstream consumers key on the transaction id inside the payload.
    async fn tick(&self) -> Result<()> {
        let batch = self.outbox_repo.fetch_pending(self.batch_size).await?;
        if batch.is_empty() {
            return Ok(());
        }

        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        for event in batch {
            match self.publish(&mut conn, &event).await {
                Ok(_) => {
                    self.outbox_repo.mark_published(event.event_id).await?;
                    tracing::debug!(
                        "published outbox event {} for aggregate {}",
                        event.event_id,
                        event.aggregate_id
                    );
                }
                Err(message) => {
                    let retry_count = event.retry_count + 1;
                    let message = truncate_error(&message);
                    match failure_disposition(retry_count, self.max_retries) {
                        PublishFailure::Retry => {
                            self.outbox_repo
                                .mark_retry(event.event_id, retry_count, &message)
                                .await?;
                            tracing::warn!(
                                "publish failed for outbox event {} (attempt {}): {}",
                                event.event_id,
                                retry_count,
                                message
                            );
                        }
                        PublishFailure::Terminal => {
                            self.outbox_repo
                                .mark_failed(event.event_id, retry_count, &message)
                                .await?;
                            tracing::error!(
                                "outbox event {} moved to FAILED after {} attempts: {}",
                                event.event_id,
                                retry_count,
                                message
                            );
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn publish(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        event: &OutboxEvent,
    ) -> Result<String, String> {
        let xadd = async {
            let res: redis::RedisResult<String> = redis::cmd("XADD")
                .arg(&self.topic)
                .arg("MAXLEN")
                .arg("~")
                .arg(1_000_000)
                .arg("*")
                .arg("key")
                .arg(&event.aggregate_id)
                .arg("event_type")
                .arg(&event.event_type)
                .arg("payload")
                .arg(&event.payload)
                .query_async(conn)
                .await;
            res
        };

        match tokio::time::timeout(self.publish_timeout, xadd).await {
            Ok(Ok(id)) => Ok(id),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("publish timed out".to_string()),
        }
    }
}
