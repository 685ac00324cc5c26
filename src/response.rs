//! Endpoint response kinds and settings bodies.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug)]
pub enum EndpointResponse {
    /// 204 after a write or delete.
    NoContent,
    /// 304 for an empty array body.
    NotModified,
    /// Plain-text scalar.
    Count(i64),
    Rows(Value),
}

impl IntoResponse for EndpointResponse {
    fn into_response(self) -> Response {
        match self {
            EndpointResponse::NoContent => StatusCode::NO_CONTENT.into_response(),
            EndpointResponse::NotModified => StatusCode::NOT_MODIFIED.into_response(),
            EndpointResponse::Count(n) => (StatusCode::OK, n.to_string()).into_response(),
            EndpointResponse::Rows(v) => (StatusCode::OK, Json(v)).into_response(),
        }
    }
}

#[derive(Serialize)]
pub struct SettingsInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub database_url: String,
}

#[derive(Serialize)]
pub struct ServerTime {
    pub time: String,
}

/// Replace the password of a connection URL with `***`.
pub fn mask_database_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let authority_end = rest.find(['/', '?']).unwrap_or(rest.len());
    let Some(at) = rest[..authority_end].rfind('@') else {
        return url.to_string();
    };
    let credentials = &rest[..at];
    let Some(colon) = credentials.find(':') else {
        return url.to_string();
    };
    format!(
        "{}{}:***{}",
        &url[..scheme_end + 3],
        &credentials[..colon],
        &rest[at..]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_database_url() {
        assert_eq!(
            mask_database_url("postgres://app:s3cr:et@db:5432/main"),
            "postgres://app:***@db:5432/main"
        );
        assert_eq!(
            mask_database_url("postgres://app@db/main"),
            "postgres://app@db/main"
        );
        assert_eq!(mask_database_url("postgres://db/main"), "postgres://db/main");
        assert_eq!(mask_database_url("not a url"), "not a url");
    }

    #[test]
    fn test_endpoint_statuses() {
        assert_eq!(EndpointResponse::NoContent.into_response().status(), StatusCode::NO_CONTENT);
        assert_eq!(
            EndpointResponse::NotModified.into_response().status(),
            StatusCode::NOT_MODIFIED
        );
        assert_eq!(EndpointResponse::Count(3).into_response().status(), StatusCode::OK);
    }
}
