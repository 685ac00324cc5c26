//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} id '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("invalid primary key: table {table_id} column {column}")]
    InvalidPrimaryKey { table_id: String, column: String },
    #[error("duplicate table name: {0}")]
    DuplicateTable(String),
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// Request processing failures. The first five kinds are client faults, the
/// remaining ones are reported with a generic message and logged in full.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Routing(String),
    #[error("{0}")]
    Field(String),
    #[error("{0}")]
    Value(String),
    #[error("Table `{table}` requires fields: {}.", quote_all(.fields))]
    RequiredFields { table: String, fields: Vec<String> },
    #[error("{0}")]
    MalformedBody(String),
    #[error("{0}")]
    MetadataInference(String),
    #[error("{0}")]
    ResponseEncoding(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
}

fn quote_all(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| format!("`{}`", f))
        .collect::<Vec<_>>()
        .join(", ")
}

pub const RESPONSE_ENCODING_MESSAGE: &str =
    "Request was valid, but response could not be processed correctly.";
const INTERNAL_MESSAGE: &str = "Internal server error.";

impl AppError {
    pub fn is_client_fault(&self) -> bool {
        match self {
            AppError::Routing(_)
            | AppError::Field(_)
            | AppError::Value(_)
            | AppError::RequiredFields { .. }
            | AppError::MalformedBody(_) => true,
            AppError::Db(e) => db_rejected_input(e),
            _ => false,
        }
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Routing(_) => (StatusCode::BAD_REQUEST, "routing_error"),
            AppError::Field(_) => (StatusCode::BAD_REQUEST, "field_error"),
            AppError::Value(_) => (StatusCode::BAD_REQUEST, "value_error"),
            AppError::RequiredFields { .. } => (StatusCode::BAD_REQUEST, "required_fields"),
            AppError::MalformedBody(_) => (StatusCode::BAD_REQUEST, "malformed_body"),
            AppError::MetadataInference(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "metadata_error")
            }
            AppError::ResponseEncoding(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "response_error")
            }
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            AppError::Db(e) => {
                if db_rejected_input(e) {
                    (StatusCode::BAD_REQUEST, "database_rejected")
                } else {
                    (StatusCode::INTERNAL_SERVER_ERROR, "database_error")
                }
            }
        }
    }

    /// Message safe to show to the caller.
    fn public_message(&self) -> String {
        match self {
            AppError::ResponseEncoding(_) => RESPONSE_ENCODING_MESSAGE.to_string(),
            AppError::Db(sqlx::Error::Database(db)) if self.is_client_fault() => {
                db.message().to_string()
            }
            e if e.is_client_fault() => e.to_string(),
            _ => INTERNAL_MESSAGE.to_string(),
        }
    }
}

/// SQLSTATE class 22 (data exception) and 23 (integrity constraint violation)
/// mean the submitted values were rejected, not that the server failed.
fn db_rejected_input(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db
            .code()
            .map(|c| c.starts_with("22") || c.starts_with("23"))
            .unwrap_or(false),
        _ => false,
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(code, error = %self, "request failed");
        }
        let details = match &self {
            AppError::RequiredFields { fields, .. } => Some(serde_json::json!(fields)),
            _ => None,
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.public_message(),
                details,
            },
        };
        (status, Json(body)).into_response()
    }
}
