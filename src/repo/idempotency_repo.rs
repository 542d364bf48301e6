use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub record_id: Uuid,
    pub idempotency_key: String,
    pub transaction_id: Uuid,
    pub response: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct IdempotencyRepo {
    pub pool: PgPool,
}

impl IdempotencyRepo {
    pub async fn find_by_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<IdempotencyRecord>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT record_id, idempotency_key, transaction_id, response, created_at, expires_at
            FROM idempotency_records
            WHERE idempotency_key = $1
            "#,
        )
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| IdempotencyRecord {
            record_id: r.get("record_id"),
            idempotency_key: r.get("idempotency_key"),
            transaction_id: r.get("transaction_id"),
            response: r.get("response"),
            created_at: r.get("created_at"),
            expires_at: r.get("expires_at"),
        }))
    }

    // Returns false when an unexpired record already holds the key: the caller
    // lost a concurrent admission race and must abort its transaction. An
    // expired record is overwritten in place (the janitor prunes asynchronously,
    // so rows cannot be assumed absent just because they lapsed).
    pub async fn bind(
        tx: &mut Transaction<'_, Postgres>,
        record: &IdempotencyRecord,
    ) -> Result<bool, sqlx::Error> {
        let done = sqlx::query(
            r#"
            INSERT INTO idempotency_records (
                record_id, idempotency_key, transaction_id, response, created_at, expires_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (idempotency_key) DO UPDATE SET
                record_id = EXCLUDED.record_id,
                transaction_id = EXCLUDED.transaction_id,
                response = EXCLUDED.response,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at
            WHERE idempotency_records.expires_at <= EXCLUDED.created_at
            "#,
        )
        .bind(record.record_id)
        .bind(&record.idempotency_key)
        .bind(record.transaction_id)
        .bind(&record.response)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(tx.as_mut())
        .await?;

        Ok(done.rows_affected() == 1)
    }
}
