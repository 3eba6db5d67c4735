//! Authenticated HTTP client for the classroom data service
//!
//! Wraps reqwest::Client with bearer token injection, a single
//! re-authentication attempt on 401, and a normalized error shape.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::error::ApiError;
use crate::auth::{Reauthenticate, TokenStore};
use crate::config::ApiSettings;

/// Client-side route for the sign-in entry point
pub const LOGIN_ROUTE: &str = "/login";

const CLIENT_VERSION: &str = "1.0.0";

/// Navigation target for a terminal authorization failure.
#[async_trait]
pub trait LoginRedirect: Send + Sync {
    async fn redirect_to_login(&self, route: &str);
}

/// One outbound call. `retried` suppresses a second re-authentication.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<serde_json::Value>,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            retried: false,
        }
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn json<B: Serialize>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::local(format!("Failed to encode request body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }
}

/// Client for the classroom data service.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    store: Arc<dyn TokenStore>,
    reauth: Option<Arc<dyn Reauthenticate>>,
    redirect: Arc<dyn LoginRedirect>,
}

impl ApiClient {
    pub fn new(
        settings: &ApiSettings,
        store: Arc<dyn TokenStore>,
        redirect: Arc<dyn LoginRedirect>,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("X-Client-Version", HeaderValue::from_static(CLIENT_VERSION));

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            store,
            reauth: None,
            redirect,
        })
    }

    /// Enable token refresh on 401 instead of going straight to the login route.
    pub fn with_reauthenticator(mut self, reauth: Arc<dyn Reauthenticate>) -> Self {
        self.reauth = Some(reauth);
        self
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let mut request = ApiRequest::new(Method::GET, path);
        for (k, v) in query {
            request = request.query(k, *v);
        }
        self.send_json(request).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send_json(ApiRequest::new(Method::POST, path).json(body)?)
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.execute(ApiRequest::new(Method::DELETE, path)).await?;
        Ok(())
    }

    /// Execute and decode a JSON response body.
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let resp = self.execute(request).await?;
        let status = resp.status();
        resp.json().await.map_err(|e| ApiError {
            status: Some(status.as_u16()),
            message: format!("Failed to parse response: {}", e),
            data: None,
        })
    }

    /// Send a request, re-authenticating at most once on 401.
    pub async fn execute(&self, mut request: ApiRequest) -> Result<reqwest::Response, ApiError> {
        loop {
            let resp = self.send_once(&request).await?;
            let status = resp.status();

            if status != StatusCode::UNAUTHORIZED {
                return check_response(resp).await;
            }

            if !request.retried {
                request.retried = true;
                if self.reauthenticate().await {
                    tracing::debug!("Retrying {} {} with refreshed token", request.method, request.path);
                    continue;
                }
            }

            let err = ApiError::from_response(resp).await;
            self.expire_session().await;
            return Err(err);
        }
    }

    async fn send_once(&self, request: &ApiRequest) -> Result<reqwest::Response, ApiError> {
        let url = format!("{}{}", self.base_url, request.path);

        let mut builder = self.http.request(request.method.clone(), &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        match self.store.credential().await {
            Ok(Some(credential)) => builder = builder.bearer_auth(&credential.access_token.token),
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to read credential: {:#}", e),
        }

        tracing::debug!("API {} {}", request.method, url);
        let resp = builder.send().await.map_err(ApiError::from_transport)?;
        tracing::debug!("API {} {} -> {}", request.method, url, resp.status().as_u16());
        Ok(resp)
    }

    /// Returns true when a fresh credential is stored and the request may be retried.
    async fn reauthenticate(&self) -> bool {
        let reauth = match &self.reauth {
            Some(r) => r,
            None => return false,
        };

        let current = self.store.credential().await.unwrap_or_default();
        match reauth.refresh_credential(current).await {
            Ok(Some(credential)) => match self.store.set_credential(credential).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("Failed to store refreshed credential: {:#}", e);
                    false
                }
            },
            Ok(None) => false,
            Err(e) => {
                tracing::warn!("Re-authentication failed: {:#}", e);
                false
            }
        }
    }

    async fn expire_session(&self) {
        if let Err(e) = self.store.clear_credential().await {
            tracing::warn!("Failed to clear credential: {:#}", e);
        }
        self.redirect.redirect_to_login(LOGIN_ROUTE).await;
    }
}

/// Pass successful responses through; normalize everything else.
async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let err = ApiError::from_response(resp).await;
    tracing::error!(status = ?err.status, "API error: {}", err.message);
    Err(err)
}
