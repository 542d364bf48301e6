pub mod config;
pub mod domain {
    pub mod transfer;
}
pub mod error;
pub mod http {
    pub mod handlers {
        pub mod transactions;
    }
}
pub mod repo {
    pub mod accounts_repo;
    pub mod idempotency_repo;
    pub mod outbox_repo;
    pub mod transactions_repo;
}
pub mod service {
    pub mod idempotency;
    pub mod outbox_relay;
    pub mod processor;
}

#[derive(Clone)]
pub struct AppState {
    pub processor: service::processor::TransactionProcessor,
}
