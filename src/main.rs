use axum::routing::{get, post};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use transfer_engine::config::AppConfig;
use transfer_engine::repo::idempotency_repo::IdempotencyRepo;
use transfer_engine::repo::outbox_repo::OutboxRepo;
use transfer_engine::repo::transactions_repo::TransactionsRepo;
use transfer_engine::service::idempotency::IdempotencyService;
use transfer_engine::service::outbox_relay::OutboxRelay;
use transfer_engine::service::processor::{RetryPolicy, TransactionProcessor};
use transfer_engine::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&cfg.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let redis_client = redis::Client::open(cfg.redis_url.clone())?;

    let idempotency = IdempotencyService {
        repo: IdempotencyRepo { pool: pool.clone() },
        window_hours: cfg.idempotency_window_hours,
    };
    let processor = TransactionProcessor {
        pool: pool.clone(),
        transactions_repo: TransactionsRepo { pool: pool.clone() },
        idempotency,
        retry: RetryPolicy {
            attempts: cfg.processor_retry_attempts,
            initial_backoff_ms: cfg.processor_backoff_initial_ms,
            max_backoff_ms: cfg.processor_backoff_max_ms,
        },
    };

    let relay = OutboxRelay {
        outbox_repo: OutboxRepo { pool: pool.clone() },
        redis_client,
        topic: cfg.ledger_topic.clone(),
        poll_interval: Duration::from_millis(cfg.outbox_polling_interval_ms),
        batch_size: cfg.outbox_batch_size,
        max_retries: cfg.outbox_max_retries,
        publish_timeout: Duration::from_secs(5),
    };
    tokio::spawn(relay.run());

    let state = AppState { processor };

    let app = Router::new()
        .route(
            "/api/v1/transactions",
            post(transfer_engine::http::handlers::transactions::submit_transaction),
        )
        .route(
            "/api/v1/transactions/health",
            get(transfer_engine::http::handlers::transactions::health),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", cfg.listen_port)).await?;
    tracing::info!("listening on port {}", cfg.listen_port);
    axum::serve(listener, app).await?;
    Ok(())
}
