use crate::domain::transfer::{TransactionRecord, TransactionStatus};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StoredTransaction {
    pub transaction_id: Uuid,
    pub idempotency_key: String,
    pub status: TransactionStatus,
}

#[derive(Clone)]
pub struct TransactionsRepo {
    pub pool: PgPool,
}

impl TransactionsRepo {
    pub async fn find_by_idempotency_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<StoredTransaction>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT transaction_id, idempotency_key, status FROM transactions WHERE idempotency_key = $1",
        )
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let status: String = r.get("status");
            Ok(StoredTransaction {
                transaction_id: r.get("transaction_id"),
                idempotency_key: r.get("idempotency_key"),
                status: status
                    .parse()
                    .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            })
        })
        .transpose()
    }

    pub async fn find_by_id(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<StoredTransaction>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT transaction_id, idempotency_key, status FROM transactions WHERE transaction_id = $1",
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let status: String = r.get("status");
            Ok(StoredTransaction {
                transaction_id: r.get("transaction_id"),
                idempotency_key: r.get("idempotency_key"),
                status: status
                    .parse()
                    .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            })
        })
        .transpose()
    }

    pub async fn idempotency_key_of(
        tx: &mut Transaction<'_, Postgres>,
        transaction_id: Uuid,
    ) -> Result<Option<String>, sqlx::Error> {
        let row = sqlx::query("SELECT idempotency_key FROM transactions WHERE transaction_id = $1")
            .bind(transaction_id)
            .fetch_optional(tx.as_mut())
            .await?;

        Ok(row.map(|r| r.get("idempotency_key")))
    }

    // A re-submission under the same idempotency key supersedes the stored row
    // only when that row is not COMPLETED (a FAILED attempt retried after the
    // client fixed the rejected condition) or when it carries the same
    // transaction id (a replay after the idempotency window lapsed). A
    // committed COMPLETED transfer is never rewritten to a different
    // transaction id: zero rows affected means the key already belongs to a
    // different completed row and the caller must surface a conflict.
    pub async fn upsert(
        tx: &mut Transaction<'_, Postgres>,
        record: &TransactionRecord,
    ) -> Result<u64, sqlx::Error> {
        let done = sqlx::query(
            r#"
            INSERT INTO transactions (
                transaction_id, idempotency_key, from_account_id, to_account_id,
                amount, currency, type, status, failure_reason, created_at, completed_at, version
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 0)
            ON CONFLICT (idempotency_key) DO UPDATE SET
                transaction_id = EXCLUDED.transaction_id,
                from_account_id = EXCLUDED.from_account_id,
                to_account_id = EXCLUDED.to_account_id,
                amount = EXCLUDED.amount,
                currency = EXCLUDED.currency,
                type = EXCLUDED.type,
                status = EXCLUDED.status,
                failure_reason = EXCLUDED.failure_reason,
                created_at = EXCLUDED.created_at,
                completed_at = EXCLUDED.completed_at,
                version = transactions.version + 1
            WHERE transactions.status <> 'COMPLETED'
               OR transactions.transaction_id = EXCLUDED.transaction_id
            "#,
        )
        .bind(record.transaction_id)
        .bind(&record.idempotency_key)
        .bind(record.from_account_id)
        .bind(record.to_account_id)
        .bind(record.amount)
        .bind(&record.currency)
        .bind(record.kind.as_str())
        .bind(record.status.as_str())
        .bind(&record.failure_reason)
        .bind(record.created_at)
        .bind(record.completed_at)
        .execute(tx.as_mut())
        .await?;

        Ok(done.rows_affected())
    }

    // FAILED audit rows may supersede a prior FAILED attempt under the same
    // key but never a COMPLETED transfer; zero rows affected means the key
    // already belongs to a committed row.
    pub async fn record_failure(
        tx: &mut Transaction<'_, Postgres>,
        record: &TransactionRecord,
    ) -> Result<u64, sqlx::Error> {
        let done = sqlx::query(
            r#"
            INSERT INTO transactions (
                transaction_id, idempotency_key, from_account_id, to_account_id,
                amount, currency, type, status, failure_reason, created_at, completed_at, version
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 0)
            ON CONFLICT (idempotency_key) DO UPDATE SET
                transaction_id = EXCLUDED.transaction_id,
                from_account_id = EXCLUDED.from_account_id,
                to_account_id = EXCLUDED.to_account_id,
                amount = EXCLUDED.amount,
                currency = EXCLUDED.currency,
                type = EXCLUDED.type,
                status = EXCLUDED.status,
                failure_reason = EXCLUDED.failure_reason,
                created_at = EXCLUDED.created_at,
                completed_at = EXCLUDED.completed_at,
                version = transactions.version + 1
            WHERE transactions.status <> 'COMPLETED'
            "#,
        )
        .bind(record.transaction_id)
        .bind(&record.idempotency_key)
        .bind(record.from_account_id)
        .bind(record.to_account_id)
        .bind(record.amount)
        .bind(&record.currency)
        .bind(record.kind.as_str())
        .bind(record.status.as_str())
        .bind(&record.failure_reason)
        .bind(record.created_at)
        .bind(record.completed_at)
        .execute(tx.as_mut())
        .await?;

        Ok(done.rows_affected())
    }
}
