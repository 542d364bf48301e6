use crate::domain::transfer::{ErrorEnvelope, ErrorPayload, TransferRequest};
use crate::error::ProcessorError;
use crate::service::processor::{replay_matches, ProcessOutcome};
use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::time::Duration;

const REQUEST_DEADLINE: Duration = Duration::from_secs(30);

pub async fn submit_transaction(
    State(state): State<AppState>,
    Json(req): Json<TransferRequest>,
) -> impl IntoResponse {
    let result = match tokio::time::timeout(REQUEST_DEADLINE, state.processor.process(&req)).await {
        Ok(result) => result,
        Err(_) => {
            return (
                StatusCode::GATEWAY_TIMEOUT,
                Json(err("REQUEST_TIMED_OUT", "processing deadline exceeded")),
            )
                .into_response()
        }
    };

    match result {
        Ok(ProcessOutcome::Completed(record)) => (StatusCode::OK, Json(record)).into_response(),
        Ok(ProcessOutcome::Replayed(record)) => {
            if replay_matches(&req, &record) {
                (StatusCode::OK, Json(record)).into_response()
            } else {
                (
                    StatusCode::CONFLICT,
                    Json(err(
                        "IDEMPOTENCY_KEY_REUSED_WITH_DIFFERENT_PAYLOAD",
                        "idempotency key was already used by a different request",
                    )),
                )
                    .into_response()
            }
        }
        Ok(ProcessOutcome::Rejected(record)) => {
            (StatusCode::UNPROCESSABLE_ENTITY, Json(record)).into_response()
        }
        Err(ProcessorError::InvalidRequest(msg)) => {
            (StatusCode::BAD_REQUEST, Json(err("INVALID_REQUEST", &msg))).into_response()
        }
        Err(ProcessorError::Conflict(msg)) => {
            (StatusCode::CONFLICT, Json(err("CONFLICT", &msg))).into_response()
        }
        Err(e) => {
            tracing::error!("transfer processing failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(err("INTERNAL_ERROR", "transfer processing failed")),
            )
                .into_response()
        }
    }
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

fn err(code: &str, message: &str) -> ErrorEnvelope {
    ErrorEnvelope {
        error: ErrorPayload {
            code: code.to_string(),
            message: message.to_string(),
            details: None,
        },
    }
}
