use crate::domain::transfer::Account;
use rust_decimal::Decimal;
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

pub struct AccountsRepo;

impl AccountsRepo {
    pub async fn lock_for_update(
        tx: &mut Transaction<'_, Postgres>,
        account_id: Uuid,
    ) -> Result<Option<Account>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT account_id, account_name, balance, currency, status, created_at, updated_at, version
            FROM accounts
            WHERE account_id = $1
            FOR UPDATE
            "#,
        )
        .bind(account_id)
        .fetch_optional(tx.as_mut())
        .await?;

        row.map(|r| {
            let status: String = r.get("status");
            Ok(Account {
                account_id: r.get("account_id"),
                account_name: r.get("account_name"),
                balance: r.get("balance"),
                currency: r.get::<String, _>("currency").trim_end().to_string(),
                status: status
                    .parse()
                    .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
                created_at: r.get("created_at"),
                updated_at: r.get("updated_at"),
                version: r.get("version"),
            })
        })
        .transpose()
    }

    pub async fn update_balance(
        tx: &mut Transaction<'_, Postgres>,
        account_id: Uuid,
        balance: Decimal,
        expected_version: i64,
    ) -> Result<u64, sqlx::Error> {
        let done = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = $2, updated_at = now(), version = version + 1
            WHERE account_id = $1 AND version = $3
            "#,
        )
        .bind(account_id)
        .bind(balance)
        .bind(expected_version)
        .execute(tx.as_mut())
        .await?;

        Ok(done.rows_affected())
    }
}
