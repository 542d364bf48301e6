use anyhow::Result;
use redis::streams::StreamReadReply;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use transfer_engine::config::AppConfig;
use transfer_engine::domain::transfer::TransferRequest;
use transfer_engine::repo::idempotency_repo::IdempotencyRepo;
use transfer_engine::repo::transactions_repo::TransactionsRepo;
use transfer_engine::service::idempotency::IdempotencyService;
use transfer_engine::service::processor::{
    ingress_disposition, IngressDisposition, RetryPolicy, TransactionProcessor,
};

const PROCESS_DEADLINE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&cfg.database_url)
        .await?;

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

    let redis_client = redis::Client::open(cfg.redis_url.clone())?;
    let mut conn = redis_client.get_multiplexed_async_connection().await?;

    let _: redis::RedisResult<String> = redis::cmd("XGROUP")
        .arg("CREATE")
        .arg(&cfg.ingress_topic)
        .arg(&cfg.consumer_group)
        .arg("0")
        .arg("MKSTREAM")
        .query_async(&mut conn)
        .await;

    // Start on this consumer's pending-entries list so records left unacked by
    // a crash are redelivered before new ones are read.
    let mut from_id = "0";

    loop {
        let reply: StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&cfg.consumer_group)
            .arg(&cfg.consumer_name)
            .arg("COUNT")
            .arg(32)
            .arg("BLOCK")
            .arg(2000)
            .arg("STREAMS")
            .arg(&cfg.ingress_topic)
            .arg(from_id)
            .query_async(&mut conn)
            .await
            .unwrap_or(StreamReadReply { keys: vec![] });

        let entries: usize = reply.keys.iter().map(|k| k.ids.len()).sum();
        if entries == 0 {
            if from_id == "0" {
                from_id = ">";
            }
            continue;
        }
        if from_id == "0" {
            // Backlog reads return immediately; pace redelivery of entries
            // that keep failing transiently.
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        for stream_key in reply.keys {
            for entry in stream_key.ids {
                let raw = entry
                    .map
                    .get("payload")
                    .and_then(|v| redis::from_redis_value::<String>(v).ok());

                let Some(raw_json) = raw else {
                    dead_letter(&mut conn, &cfg.dlq_topic, "unknown", "", "missing payload field")
                        .await;
                    ack(&mut conn, &cfg.ingress_topic, &cfg.consumer_group, &entry.id).await;
                    continue;
                };

                let req = match serde_json::from_str::<TransferRequest>(&raw_json) {
                    Ok(req) => req,
                    Err(e) => {
                        tracing::warn!("poison record {}: {}", entry.id, e);
                        dead_letter(&mut conn, &cfg.dlq_topic, "unknown", &raw_json, &e.to_string())
                            .await;
                        ack(&mut conn, &cfg.ingress_topic, &cfg.consumer_group, &entry.id).await;
                        continue;
                    }
                };

                let result = match tokio::time::timeout(PROCESS_DEADLINE, processor.process(&req)).await
                {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!(
                            "processing deadline exceeded for transfer {}, leaving for redelivery",
                            req.transaction_id
                        );
                        continue;
                    }
                };

                match ingress_disposition(&result) {
                    IngressDisposition::Ack => {
                        ack(&mut conn, &cfg.ingress_topic, &cfg.consumer_group, &entry.id).await;
                        tracing::info!("transfer event {} processed", req.transaction_id);
                    }
                    IngressDisposition::DeadLetter => {
                        let error = result
                            .err()
                            .map(|e| e.to_string())
                            .unwrap_or_default();
                        tracing::warn!(
                            "transfer event {} rejected terminally: {}",
                            req.transaction_id,
                            error
                        );
                        dead_letter(
                            &mut conn,
                            &cfg.dlq_topic,
                            &req.transaction_id.to_string(),
                            &raw_json,
                            &error,
                        )
                        .await;
                        ack(&mut conn, &cfg.ingress_topic, &cfg.consumer_group, &entry.id).await;
                    }
                    IngressDisposition::Redeliver => {
                        let error = result
                            .err()
                            .map(|e| e.to_string())
                            .unwrap_or_default();
                        tracing::warn!(
                            "transient failure on transfer event {}, leaving for redelivery: {}",
                            req.transaction_id,
                            error
                        );
                    }
                }
            }
        }
    }
}

async fn ack(conn: &mut redis::aio::MultiplexedConnection, topic: &str, group: &str, id: &str) {
    let _: i64 = redis::cmd("XACK")
        .arg(topic)
        .arg(group)
        .arg(id)
        .query_async(conn)
        .await
        .unwrap_or(0);
}

async fn dead_letter(
    conn: &mut redis::aio::MultiplexedConnection,
    topic: &str,
    key: &str,
    payload: &str,
    error: &str,
) {
    let res: redis::RedisResult<String> = redis::cmd("XADD")
        .arg(topic)
        .arg("*")
        .arg("key")
        .arg(key)
        .arg("payload")
        .arg(payload)
        .arg("error")
        .arg(error)
        .query_async(conn)
        .await;
    if let Err(e) = res {
        tracing::error!("failed to write dead-letter record: {}", e);
    }
}
