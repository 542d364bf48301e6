use crate::domain::transfer::{
    Account, AccountStatus, TransactionRecord, TransactionStatus, TransferRequest,
};
use crate::error::{is_serialization_conflict, is_unique_violation, ProcessorError};
use crate::repo::accounts_repo::AccountsRepo;
use crate::repo::outbox_repo::{OutboxRepo, EVENT_TRANSACTION_COMPLETED};
use crate::repo::transactions_repo::TransactionsRepo;
use crate::service::idempotency::IdempotencyService;
use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    Completed(TransactionRecord),
    Replayed(TransactionRecord),
    Rejected(TransactionRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    SelfTransfer,
    SourceAccountNotFound,
    DestinationAccountNotFound,
    SourceAccountNotActive,
    DestinationAccountNotActive,
    CurrencyMismatch,
    InsufficientBalance,
}

impl Rejection {
    pub fn reason(self) -> &'static str {
        match self {
            Self::SelfTransfer => "source and destination accounts are the same",
            Self::SourceAccountNotFound => "source account not found",
            Self::DestinationAccountNotFound => "destination account not found",
            Self::SourceAccountNotActive => "source account is not active",
            Self::DestinationAccountNotActive => "destination account is not active",
            Self::CurrencyMismatch => "currency does not match the participating accounts",
            Self::InsufficientBalance => "insufficient balance on source account",
        }
    }
}

#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("{0}")]
    Conflict(String),
    #[error("account version changed underneath the row lock")]
    VersionConflict,
    #[error("idempotency key was bound concurrently")]
    IdempotencyRace,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Codec(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressDisposition {
    Ack,
    DeadLetter,
    Redeliver,
}

#[derive(Clone)]
pub struct TransactionProcessor {
    pub pool: PgPool,
    pub transactions_repo: TransactionsRepo,
    pub idempotency: IdempotencyService,
    pub retry: RetryPolicy,
}

impl TransactionProcessor {
    pub async fn process(&self, req: &TransferRequest) -> Result<ProcessOutcome, ProcessorError> {
        validate_request(req).map_err(ProcessorError::InvalidRequest)?;

        let mut attempt = 0u32;
        loop {
            if let Some(cached) = self.idempotency.peek(&req.idempotency_key).await? {
                tracing::info!(
                    "duplicate transfer detected for key {}, replaying cached response",
                    req.idempotency_key
                );
                return Ok(ProcessOutcome::Replayed(cached));
            }

            match self.attempt(req).await {
                Ok(outcome) => return Ok(outcome),
                Err(AttemptError::Conflict(msg)) => return Err(ProcessorError::Conflict(msg)),
                Err(AttemptError::Codec(e)) => return Err(ProcessorError::Codec(e)),
                Err(AttemptError::Db(e)) if is_unique_violation(&e) => {
                    return Err(self.key_conflict(req).await);
                }
                Err(AttemptError::Db(e)) if !is_serialization_conflict(&e) => {
                    return Err(ProcessorError::Store(e));
                }
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.retry.attempts {
                        return Err(ProcessorError::RetriesExhausted {
                            attempts: self.retry.attempts,
                            reason: err.to_string(),
                        });
                    }
                    let delay = with_jitter(backoff_delay(&self.retry, attempt - 1));
                    tracing::warn!(
                        "transient conflict on transfer {} (attempt {}): {}, retrying in {:?}",
                        req.transaction_id,
                        attempt,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    // One pass through the critical section. Every write lands in a single
    // store transaction: the commit is the serialization point, and an abort
    // at any step leaves no trace.
    async fn attempt(&self, req: &TransferRequest) -> Result<ProcessOutcome, AttemptError> {
        let mut tx = self.pool.begin().await?;

        if let Some(existing_key) =
            TransactionsRepo::idempotency_key_of(&mut tx, req.transaction_id).await?
        {
            if existing_key != req.idempotency_key {
                return Err(AttemptError::Conflict(format!(
                    "transaction {} already exists under a different idempotency key",
                    req.transaction_id
                )));
            }
        }

        if req.from_account_id == req.to_account_id {
            return self.reject(tx, req, Rejection::SelfTransfer).await;
        }

        // Lock both rows in ascending id order so opposing transfers between
        // the same pair cannot deadlock.
        let (first, second) = lock_order(req.from_account_id, req.to_account_id);
        let first_account = AccountsRepo::lock_for_update(&mut tx, first).await?;
        let second_account = AccountsRepo::lock_for_update(&mut tx, second).await?;
        let (from, to) = if first == req.from_account_id {
            (first_account, second_account)
        } else {
            (second_account, first_account)
        };

        let (from, to) = match validate_transfer(req, from, to) {
            Ok(pair) => pair,
            Err(rejection) => return self.reject(tx, req, rejection).await,
        };

        let now = Utc::now();
        let debited =
            AccountsRepo::update_balance(&mut tx, from.account_id, from.balance - req.amount, from.version)
                .await?;
        if debited == 0 {
            return Err(AttemptError::VersionConflict);
        }
        let credited =
            AccountsRepo::update_balance(&mut tx, to.account_id, to.balance + req.amount, to.version)
                .await?;
        if credited == 0 {
            return Err(AttemptError::VersionConflict);
        }

        let record = completed_record(req, now);
        let response = serde_json::to_string(&record)?;

        // Bind the key before superseding any stored row: a false return means
        // another admission holds the key inside the window, and this whole
        // transaction aborts without touching its transaction row.
        let bound = self
            .idempotency
            .bind(&mut tx, &req.idempotency_key, record.transaction_id, &response, now)
            .await?;
        if !bound {
            return Err(AttemptError::IdempotencyRace);
        }

        let written = TransactionsRepo::upsert(&mut tx, &record).await?;
        if written == 0 {
            return Err(AttemptError::Conflict(format!(
                "idempotency key {:?} already belongs to a completed transaction with a different transactionId",
                req.idempotency_key
            )));
        }
        OutboxRepo::insert(
            &mut tx,
            Uuid::new_v4(),
            EVENT_TRANSACTION_COMPLETED,
            &record.transaction_id.to_string(),
            &response,
        )
        .await?;

        tx.commit().await?;
        tracing::info!(
            "transfer {} committed ({} {} from {} to {})",
            record.transaction_id,
            req.amount,
            req.currency,
            req.from_account_id,
            req.to_account_id
        );
        Ok(ProcessOutcome::Completed(record))
    }

    // Business rejections commit a FAILED audit row and nothing else: no
    // balance change, no outbox event, no idempotency record. The write never
    // supersedes a COMPLETED row; losing that race surfaces as a transient
    // conflict and the retry replays the winner's cached response.
    async fn reject(
        &self,
        mut tx: sqlx::Transaction<'_, sqlx::Postgres>,
        req: &TransferRequest,
        rejection: Rejection,
    ) -> Result<ProcessOutcome, AttemptError> {
        let record = failed_record(req, rejection.reason(), Utc::now());
        let written = TransactionsRepo::record_failure(&mut tx, &record).await?;
        if written == 0 {
            return Err(AttemptError::IdempotencyRace);
        }
        tx.commit().await?;
        tracing::warn!(
            "transfer {} rejected: {}",
            req.transaction_id,
            rejection.reason()
        );
        Ok(ProcessOutcome::Rejected(record))
    }

    // A 23505 out of the write path is either the idempotency-key unique
    // index or the transactions primary key (two requests racing the same
    // transactionId under different keys past the in-transaction precheck).
    // Report whichever row actually holds the collision.
    async fn key_conflict(&self, req: &TransferRequest) -> ProcessorError {
        if let Ok(Some(existing)) = self
            .transactions_repo
            .find_by_idempotency_key(&req.idempotency_key)
            .await
        {
            return ProcessorError::Conflict(format!(
                "idempotency key is already bound to {} transaction {}",
                existing.status.as_str(),
                existing.transaction_id
            ));
        }
        if let Ok(Some(existing)) = self.transactions_repo.find_by_id(req.transaction_id).await {
            if existing.idempotency_key != req.idempotency_key {
                return ProcessorError::Conflict(format!(
                    "transaction {} already exists under a different idempotency key",
                    req.transaction_id
                ));
            }
        }
        ProcessorError::Conflict(
            "idempotency key is already bound to another transaction".to_string(),
        )
    }
}

pub fn validate_request(req: &TransferRequest) -> Result<(), String> {
    if req.transaction_id.is_nil() {
        return Err("transactionId must be a non-nil UUID".to_string());
    }
    if req.idempotency_key.is_empty() {
        return Err("idempotencyKey must not be empty".to_string());
    }
    if req.idempotency_key.len() > 255 {
        return Err("idempotencyKey must not exceed 255 characters".to_string());
    }
    if req.amount <= Decimal::ZERO {
        return Err("amount must be strictly positive".to_string());
    }
    if req.amount.scale() > 4 {
        return Err("amount is limited to four fractional digits".to_string());
    }
    if !is_currency_tag(&req.currency) {
        return Err("currency must be a three-letter uppercase tag".to_string());
    }
    Ok(())
}

pub fn is_currency_tag(s: &str) -> bool {
    s.len() == 3 && s.bytes().all(|b| b.is_ascii_uppercase())
}

pub fn validate_transfer(
    req: &TransferRequest,
    from: Option<Account>,
    to: Option<Account>,
) -> Result<(Account, Account), Rejection> {
    let from = from.ok_or(Rejection::SourceAccountNotFound)?;
    let to = to.ok_or(Rejection::DestinationAccountNotFound)?;
    if from.status != AccountStatus::Active {
        return Err(Rejection::SourceAccountNotActive);
    }
    if to.status != AccountStatus::Active {
        return Err(Rejection::DestinationAccountNotActive);
    }
    if from.currency != req.currency || to.currency != req.currency {
        return Err(Rejection::CurrencyMismatch);
    }
    if from.balance < req.amount {
        return Err(Rejection::InsufficientBalance);
    }
    Ok((from, to))
}

pub fn lock_order(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a.as_bytes() <= b.as_bytes() {
        (a, b)
    } else {
        (b, a)
    }
}

pub fn completed_record(req: &TransferRequest, now: DateTime<Utc>) -> TransactionRecord {
    TransactionRecord {
        transaction_id: req.transaction_id,
        idempotency_key: req.idempotency_key.clone(),
        from_account_id: req.from_account_id,
        to_account_id: req.to_account_id,
        amount: req.amount,
        currency: req.currency.clone(),
        kind: req.kind,
        status: TransactionStatus::Completed,
        failure_reason: None,
        created_at: now,
        completed_at: Some(now),
    }
}

pub fn failed_record(req: &TransferRequest, reason: &str, now: DateTime<Utc>) -> TransactionRecord {
    TransactionRecord {
        transaction_id: req.transaction_id,
        idempotency_key: req.idempotency_key.clone(),
        from_account_id: req.from_account_id,
        to_account_id: req.to_account_id,
        amount: req.amount,
        currency: req.currency.clone(),
        kind: req.kind,
        status: TransactionStatus::Failed,
        failure_reason: Some(reason.to_string()),
        created_at: now,
        completed_at: None,
    }
}

pub fn replay_matches(req: &TransferRequest, cached: &TransactionRecord) -> bool {
    cached.transaction_id == req.transaction_id
        && cached.from_account_id == req.from_account_id
        && cached.to_account_id == req.to_account_id
        && cached.amount == req.amount
        && cached.currency == req.currency
        && cached.kind == req.kind
}

pub fn backoff_delay(policy: &RetryPolicy, completed_attempts: u32) -> Duration {
    let factor = 5u64.saturating_pow(completed_attempts);
    let ms = policy
        .initial_backoff_ms
        .saturating_mul(factor)
        .min(policy.max_backoff_ms);
    Duration::from_millis(ms)
}

pub fn with_jitter(base: Duration) -> Duration {
    let quarter = base.as_millis() as u64 / 4;
    base + Duration::from_millis(rand::thread_rng().gen_range(0..=quarter))
}

// Ack only durable outcomes: committed transfers, cached replays, and FAILED
// audit rows. Transient failures leave the entry unacked for redelivery.
pub fn ingress_disposition(result: &Result<ProcessOutcome, ProcessorError>) -> IngressDisposition {
    match result {
        Ok(_) => IngressDisposition::Ack,
        Err(ProcessorError::InvalidRequest(_)) | Err(ProcessorError::Conflict(_)) => {
            IngressDisposition::DeadLetter
        }
        Err(_) => IngressDisposition::Redeliver,
    }
}
