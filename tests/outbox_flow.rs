use chrono::Utc;
use rust_decimal_macros::dec;
use transfer_engine::domain::transfer::{TransactionRecord, TransactionType, TransferRequest};
use transfer_engine::repo::outbox_repo::EVENT_TRANSACTION_COMPLETED;
use transfer_engine::service::outbox_relay::{failure_disposition, truncate_error, PublishFailure};
use transfer_engine::service::processor::completed_record;
use uuid::Uuid;

fn request() -> TransferRequest {
    TransferRequest {
        event_id: Uuid::new_v4(),
        transaction_id: Uuid::new_v4(),
        from_account_id: Uuid::new_v4(),
        to_account_id: Uuid::new_v4(),
        amount: dec!(100.00),
        currency: "USD".to_string(),
        kind: TransactionType::Transfer,
        timestamp: Utc::now(),
        idempotency_key: "txn-test-001".to_string(),
    }
}

#[test]
fn failures_below_the_ceiling_stay_pending() {
    assert_eq!(failure_disposition(1, 5), PublishFailure::Retry);
    assert_eq!(failure_disposition(5, 5), PublishFailure::Retry);
}

#[test]
fn failure_beyond_the_ceiling_is_terminal() {
    assert_eq!(failure_disposition(6, 5), PublishFailure::Terminal);
}

#[test]
fn error_messages_are_bounded_for_storage() {
    let long = "x".repeat(2000);
    assert_eq!(truncate_error(&long).len(), 500);
    assert_eq!(truncate_error("short"), "short");
}

#[test]
fn ledger_payload_replays_the_committed_transaction() {
    let req = request();
    let record = completed_record(&req, Utc::now());
    let payload = serde_json::to_string(&record).unwrap();

    let replayed: TransactionRecord = serde_json::from_str(&payload).unwrap();
    assert_eq!(replayed.transaction_id, record.transaction_id);
    assert_eq!(replayed.amount, record.amount);
    assert_eq!(replayed.status, record.status);
}

#[test]
fn ledger_events_announce_completion() {
    assert_eq!(EVENT_TRANSACTION_COMPLETED, "TRANSACTION_COMPLETED");
}
