use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Request refused because existing schedule state blocks it (holiday over a live session).
    #[error("Schedule blocked: {message}")]
    ScheduleBlocked { message: String, details: Value },

    #[error("Conflict: {message}")]
    Conflict { message: String, details: Value },

    #[error("Database error: {0}")]
    Database(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::ScheduleBlocked { .. } => StatusCode::BAD_REQUEST,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = Map::new();
        body.insert("success".to_string(), json!(false));

        match self {
            AppError::NotFound(msg) | AppError::ValidationError(msg) => {
                tracing::warn!("Request rejected: {}: {}", status, msg);
                body.insert("message".to_string(), json!(msg));
            }
            AppError::ScheduleBlocked { message, details }
            | AppError::Conflict { message, details } => {
                tracing::warn!("Request rejected: {}: {}", status, message);
                body.insert("message".to_string(), json!(message));
                if let Value::Object(extra) = details {
                    body.extend(extra);
                }
            }
            AppError::Database(msg) => {
                // Server-side failures never leak details; the correlation id links the log line.
                let correlation_id = Uuid::new_v4();
                tracing::error!(%correlation_id, "Error: {}: {}", status, msg);
                body.insert("message".to_string(), json!("Something went wrong while processing the request"));
                body.insert("correlationId".to_string(), json!(correlation_id));
            }
        }

        (status, Json(Value::Object(body))).into_response()
    }
}
