//! Normalized error record returned by the data-service client

use serde::Serialize;

const GENERIC_MESSAGE: &str = "An error occurred";

/// The single error shape callers branch on: never a raw transport error.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    /// HTTP status, absent when no response arrived
    pub status: Option<u16>,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// 4xx other than 401: bad input to the data service
    Validation,
    Unauthorized,
    /// 5xx from the data service
    Upstream,
    /// Network failure or timeout
    Transport,
    Other,
}

impl ApiError {
    pub fn kind(&self) -> ApiErrorKind {
        match self.status {
            None => ApiErrorKind::Transport,
            Some(401) => ApiErrorKind::Unauthorized,
            Some(400..=499) => ApiErrorKind::Validation,
            Some(500..=599) => ApiErrorKind::Upstream,
            Some(_) => ApiErrorKind::Other,
        }
    }

    /// Error raised before anything was sent
    pub(crate) fn local(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            data: None,
        }
    }

    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            "Request timed out".to_string()
        } else {
            let text = err.to_string();
            if text.is_empty() {
                GENERIC_MESSAGE.to_string()
            } else {
                text
            }
        };
        tracing::warn!("API transport error: {}", message);
        Self {
            status: None,
            message,
            data: None,
        }
    }

    pub(crate) async fn from_response(resp: reqwest::Response) -> Self {
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        Self::from_body(status, &text)
    }

    fn from_body(status: u16, text: &str) -> Self {
        let data = if text.trim().is_empty() {
            None
        } else {
            Some(
                serde_json::from_str(text)
                    .unwrap_or_else(|_| serde_json::Value::String(text.to_string())),
            )
        };

        let message = data
            .as_ref()
            .and_then(|d| d.get("message"))
            .and_then(|m| m.as_str())
            .filter(|m| !m.is_empty())
            .map(String::from)
            .unwrap_or_else(|| format!("Request failed with status code {}", status));

        Self {
            status: Some(status),
            message,
            data,
        }
    }
}
