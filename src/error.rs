#![forbid(unsafe_code)]

//! Error taxonomy for the proxy plus its HTTP rendering.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Everything a request can fail with before a response is committed.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The upstream media stream ended without producing a single byte.
    #[error("The requested media stream was empty!")]
    UpstreamEmpty,
    #[error("Invalid subtitle format, valid options are: vtt, ass, srt")]
    InvalidFormat,
    #[error("Could not get meta for requested Video ID!")]
    NotFound,
    #[error("Invalid Video ID!")]
    InvalidContentId,
    #[error("Invalid subtitle language!")]
    InvalidLanguage,
    /// The adapter itself failed (could not launch, crashed, produced garbage).
    #[error("upstream source failed: {0:#}")]
    Upstream(anyhow::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UpstreamEmpty
            | Self::InvalidFormat
            | Self::NotFound
            | Self::InvalidContentId
            | Self::InvalidLanguage => StatusCode::BAD_REQUEST,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<anyhow::Error> for ProxyError {
    fn from(err: anyhow::Error) -> Self {
        Self::Upstream(err)
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        Self {
            status: err.status(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "request failed");
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, headers, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use axum::body::to_bytes;
    use serde_json::Value;

    #[test]
    fn client_errors_map_to_bad_request() {
        for err in [
            ProxyError::UpstreamEmpty,
            ProxyError::InvalidFormat,
            ProxyError::NotFound,
            ProxyError::InvalidContentId,
            ProxyError::InvalidLanguage,
        ] {
            assert_eq!(err.status(), StatusCode::BAD_REQUEST, "{err}");
        }
    }

    #[test]
    fn adapter_failures_map_to_bad_gateway() {
        let err = ProxyError::from(anyhow!("yt-dlp exploded"));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert!(err.to_string().contains("yt-dlp exploded"));
    }

    #[test]
    fn not_found_keeps_fixed_message() {
        let api: ApiError = ProxyError::NotFound.into();
        assert_eq!(api.message, "Could not get meta for requested Video ID!");
    }

    #[tokio::test]
    async fn api_error_serializes_json() {
        let response = ApiError::from(ProxyError::InvalidFormat).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            parsed["error"],
            "Invalid subtitle format, valid options are: vtt, ass, srt"
        );
    }
}
