use crate::domain::transfer::TransactionRecord;
use crate::error::ProcessorError;
use crate::repo::idempotency_repo::{IdempotencyRecord, IdempotencyRepo};
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

#[derive(Clone)]
pub struct IdempotencyService {
    pub repo: IdempotencyRepo,
    pub window_hours: i64,
}

impl IdempotencyService {
    // Read-only duplicate check; runs outside the write-locking critical section.
    pub async fn peek(&self, key: &str) -> Result<Option<TransactionRecord>, ProcessorError> {
        let Some(record) = self.repo.find_by_key(key).await? else {
            return Ok(None);
        };
        if is_expired(&record, Utc::now()) {
            tracing::debug!("idempotency record expired for key {}", key);
            return Ok(None);
        }
        let cached: TransactionRecord = serde_json::from_str(&record.response)?;
        Ok(Some(cached))
    }

    // Must be called inside the transaction that produced the transaction row;
    // false means a concurrent admission won the key and the caller must abort.
    pub async fn bind(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        key: &str,
        transaction_id: Uuid,
        response: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let record = IdempotencyRecord {
            record_id: Uuid::new_v4(),
            idempotency_key: key.to_string(),
            transaction_id,
            response: response.to_string(),
            created_at: now,
            expires_at: expiry(now, self.window_hours),
        };
        IdempotencyRepo::bind(tx, &record).await
    }
}

pub fn expiry(now: DateTime<Utc>, window_hours: i64) -> DateTime<Utc> {
    now + chrono::Duration::hours(window_hours)
}

pub fn is_expired(record: &IdempotencyRecord, now: DateTime<Utc>) -> bool {
    now > record.expires_at
}
