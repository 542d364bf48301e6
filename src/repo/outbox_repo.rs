use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

pub const EVENT_TRANSACTION_COMPLETED: &str = "TRANSACTION_COMPLETED";

#[derive(Debug, Clone)]
pub struct OutboxEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub aggregate_id: String,
    pub payload: String,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct OutboxRepo {
    pub pool: PgPool,
}

impl OutboxRepo {
    pub async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        event_id: Uuid,
        event_type: &str,
        aggregate_id: &str,
        payload: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO outbox_events (event_id, event_type, aggregate_id, payload, status, retry_count)
            VALUES ($1, $2, $3, $4, 'PENDING', 0)
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(aggregate_id)
        .bind(payload)
        .execute(tx.as_mut())
        .await?;

        Ok(())
    }

    pub async fn fetch_pending(&self, batch_size: i64) -> Result<Vec<OutboxEvent>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, event_type, aggregate_id, payload, retry_count, created_at
            FROM outbox_events
            WHERE status = 'PENDING'
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| OutboxEvent {
                event_id: r.get("event_id"),
                event_type: r.get("event_type"),
                aggregate_id: r.get("aggregate_id"),
                payload: r.get("payload"),
                retry_count: r.get("retry_count"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    pub async fn mark_published(&self, event_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE outbox_events SET status = 'PUBLISHED', published_at = now() WHERE event_id = $1",
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_retry(
        &self,
        event_id: Uuid,
        retry_count: i32,
        error_message: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE outbox_events SET retry_count = $2, error_message = $3 WHERE event_id = $1",
        )
        .bind(event_id)
        .bind(retry_count)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(
        &self,
        event_id: Uuid,
        retry_count: i32,
        error_message: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE outbox_events SET status = 'FAILED', retry_count = $2, error_message = $3 WHERE event_id = $1",
        )
        .bind(event_id)
        .bind(retry_count)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
