use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use transfer_engine::domain::transfer::{
    Account, AccountStatus, TransactionStatus, TransactionType, TransferRequest,
};
use transfer_engine::service::processor::{
    completed_record, failed_record, lock_order, replay_matches, validate_request,
    validate_transfer, Rejection,
};
use uuid::Uuid;

fn request(amount: Decimal) -> TransferRequest {
    TransferRequest {
        event_id: Uuid::new_v4(),
        transaction_id: Uuid::new_v4(),
        from_account_id: Uuid::new_v4(),
        to_account_id: Uuid::new_v4(),
        amount,
        currency: "USD".to_string(),
        kind: TransactionType::Transfer,
        timestamp: Utc::now(),
        idempotency_key: "txn-test-001".to_string(),
    }
}

fn account(id: Uuid, balance: Decimal, status: AccountStatus, currency: &str) -> Account {
    Account {
        account_id: id,
        account_name: "Test Account".to_string(),
        balance,
        currency: currency.to_string(),
        status,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        version: 0,
    }
}

fn accounts_for(req: &TransferRequest, from_balance: Decimal) -> (Account, Account) {
    (
        account(req.from_account_id, from_balance, AccountStatus::Active, "USD"),
        account(req.to_account_id, dec!(100.0000), AccountStatus::Active, "USD"),
    )
}

#[test]
fn well_formed_request_is_accepted() {
    assert!(validate_request(&request(dec!(100.00))).is_ok());
}

#[test]
fn zero_and_negative_amounts_are_malformed() {
    assert!(validate_request(&request(dec!(0))).is_err());
    assert!(validate_request(&request(dec!(-25.00))).is_err());
}

#[test]
fn amount_scale_beyond_four_is_malformed() {
    assert!(validate_request(&request(dec!(1.00001))).is_err());
    assert!(validate_request(&request(dec!(1.0001))).is_ok());
}

#[test]
fn currency_must_be_three_uppercase_letters() {
    let mut req = request(dec!(10.00));
    req.currency = "usd".to_string();
    assert!(validate_request(&req).is_err());
    req.currency = "DOLLARS".to_string();
    assert!(validate_request(&req).is_err());
}

#[test]
fn blank_idempotency_key_is_malformed() {
    let mut req = request(dec!(10.00));
    req.idempotency_key = String::new();
    assert!(validate_request(&req).is_err());
}

#[test]
fn missing_source_account_is_rejected() {
    let req = request(dec!(100.00));
    let (_, to) = accounts_for(&req, dec!(500.0000));
    let err = validate_transfer(&req, None, Some(to)).unwrap_err();
    assert_eq!(err, Rejection::SourceAccountNotFound);
}

#[test]
fn suspended_source_account_is_rejected() {
    let req = request(dec!(100.00));
    let (mut from, to) = accounts_for(&req, dec!(500.0000));
    from.status = AccountStatus::Suspended;
    let err = validate_transfer(&req, Some(from), Some(to)).unwrap_err();
    assert_eq!(err, Rejection::SourceAccountNotActive);
}

#[test]
fn closed_destination_account_is_rejected() {
    let req = request(dec!(100.00));
    let (from, mut to) = accounts_for(&req, dec!(500.0000));
    to.status = AccountStatus::Closed;
    let err = validate_transfer(&req, Some(from), Some(to)).unwrap_err();
    assert_eq!(err, Rejection::DestinationAccountNotActive);
}

#[test]
fn currency_mismatch_is_rejected() {
    let req = request(dec!(100.00));
    let (from, mut to) = accounts_for(&req, dec!(500.0000));
    to.currency = "EUR".to_string();
    let err = validate_transfer(&req, Some(from), Some(to)).unwrap_err();
    assert_eq!(err, Rejection::CurrencyMismatch);
}

#[test]
fn insufficient_balance_reason_names_the_shortfall() {
    let req = request(dec!(100.00));
    let (from, to) = accounts_for(&req, dec!(50.0000));
    let err = validate_transfer(&req, Some(from), Some(to)).unwrap_err();
    assert_eq!(err, Rejection::InsufficientBalance);
    assert!(err.reason().contains("insufficient"));
}

#[test]
fn amount_equal_to_balance_is_accepted() {
    let req = request(dec!(500.0000));
    let (from, to) = accounts_for(&req, dec!(500.0000));
    let (from, _) = validate_transfer(&req, Some(from), Some(to)).unwrap();
    assert_eq!(from.balance - req.amount, dec!(0));
}

#[test]
fn one_minor_unit_over_balance_is_rejected() {
    let req = request(dec!(50.0001));
    let (from, to) = accounts_for(&req, dec!(50.0000));
    let err = validate_transfer(&req, Some(from), Some(to)).unwrap_err();
    assert_eq!(err, Rejection::InsufficientBalance);
}

#[test]
fn lock_order_is_stable_across_direction() {
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    assert_eq!(lock_order(a, b), lock_order(b, a));
    let (first, second) = lock_order(a, b);
    assert!(first.as_bytes() <= second.as_bytes());
}

#[test]
fn completed_record_stamps_completion() {
    let req = request(dec!(100.00));
    let record = completed_record(&req, Utc::now());
    assert_eq!(record.status, TransactionStatus::Completed);
    assert!(record.completed_at.is_some());
    assert!(record.failure_reason.is_none());
}

#[test]
fn failed_record_carries_reason_and_no_completion() {
    let req = request(dec!(100.00));
    let record = failed_record(&req, Rejection::InsufficientBalance.reason(), Utc::now());
    assert_eq!(record.status, TransactionStatus::Failed);
    assert!(record.completed_at.is_none());
    assert!(record.failure_reason.unwrap().contains("insufficient"));
}

#[test]
fn replay_detects_a_modified_payload() {
    let req = request(dec!(100.00));
    let record = completed_record(&req, Utc::now());
    assert!(replay_matches(&req, &record));

    let mut altered = req.clone();
    altered.amount = dec!(200.00);
    assert!(!replay_matches(&altered, &record));
}

#[test]
fn replay_accepts_equivalent_decimal_scales() {
    let mut req = request(dec!(100.00));
    let record = completed_record(&req, Utc::now());
    req.amount = dec!(100.0000);
    assert!(replay_matches(&req, &record));
}
