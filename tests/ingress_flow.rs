use chrono::Utc;
use rust_decimal_macros::dec;
use transfer_engine::domain::transfer::{TransactionType, TransferRequest};
use transfer_engine::error::ProcessorError;
use transfer_engine::service::processor::{
    completed_record, failed_record, ingress_disposition, IngressDisposition, ProcessOutcome,
};
use uuid::Uuid;

fn request() -> TransferRequest {
    TransferRequest {
        event_id: Uuid::new_v4(),
        transaction_id: Uuid::new_v4(),
        from_account_id: Uuid::new_v4(),
        to_account_id: Uuid::new_v4(),
        amount: dec!(100.00),
        currency: "USD".to_string(),
        kind: TransactionType::Payment,
        timestamp: Utc::now(),
        idempotency_key: "txn-test-001".to_string(),
    }
}

#[test]
fn committed_transfers_are_acked() {
    let record = completed_record(&request(), Utc::now());
    let result = Ok(ProcessOutcome::Completed(record));
    assert_eq!(ingress_disposition(&result), IngressDisposition::Ack);
}

#[test]
fn cached_replays_are_acked() {
    let record = completed_record(&request(), Utc::now());
    let result = Ok(ProcessOutcome::Replayed(record));
    assert_eq!(ingress_disposition(&result), IngressDisposition::Ack);
}

#[test]
fn business_rejections_are_durable_and_acked() {
    let record = failed_record(&request(), "insufficient balance on source account", Utc::now());
    let result = Ok(ProcessOutcome::Rejected(record));
    assert_eq!(ingress_disposition(&result), IngressDisposition::Ack);
}

#[test]
fn malformed_requests_go_to_the_dead_letter_topic() {
    let result = Err(ProcessorError::InvalidRequest("amount must be strictly positive".to_string()));
    assert_eq!(ingress_disposition(&result), IngressDisposition::DeadLetter);
}

#[test]
fn contract_violations_go_to_the_dead_letter_topic() {
    let result = Err(ProcessorError::Conflict(
        "transaction already exists under a different idempotency key".to_string(),
    ));
    assert_eq!(ingress_disposition(&result), IngressDisposition::DeadLetter);
}

#[test]
fn transient_store_failures_are_redelivered() {
    let result = Err(ProcessorError::Store(sqlx::Error::PoolTimedOut));
    assert_eq!(ingress_disposition(&result), IngressDisposition::Redeliver);

    let result = Err(ProcessorError::RetriesExhausted {
        attempts: 3,
        reason: "deadlock detected".to_string(),
    });
    assert_eq!(ingress_disposition(&result), IngressDisposition::Redeliver);
}
