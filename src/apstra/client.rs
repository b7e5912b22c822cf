use std::sync::{Arc, Mutex};

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::ApstraError;
use super::graph::Query;
use crate::config::ProviderConfig;

const AUTH_HEADER: &str = "AuthToken";

#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponse<T> {
    #[serde(default)]
    pub count: usize,
    pub items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

/// Thin Apstra REST client. Cheap to clone: clones share the session token.
#[derive(Clone)]
pub struct ApstraClient {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    token: Arc<Mutex<Option<String>>>,
}

pub fn encode(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

impl ApstraClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ApstraError> {
        Self::create_client(
            config.url.clone(),
            config.username.clone(),
            config.password.clone(),
            config.tls_validation_disabled,
        )
    }

    /// NOTE: Primarily used for testing with mock servers.
    pub fn with_base_url(
        base_url: String,
        username: String,
        password: String,
    ) -> Result<Self, ApstraError> {
        Self::create_client(base_url, username, password, false)
    }

    fn create_client(
        base_url: String,
        username: String,
        password: String,
        tls_validation_disabled: bool,
    ) -> Result<Self, ApstraError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(tls_validation_disabled)
            .build()
            .map_err(ApstraError::Network)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username,
            password,
            token: Arc::new(Mutex::new(None)),
        })
    }

    pub fn api_base(&self) -> &str {
        &self.base_url
    }

    fn current_token(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn store_token(&self, token: Option<String>) {
        *self
            .token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = token;
    }

    /// Opens a new API session and returns its token without adopting it.
    pub async fn new_session_token(&self) -> Result<String, ApstraError> {
        let url = format!("{}/api/aaa/login", self.base_url);
        tracing::debug!(method = "POST", path = "/api/aaa/login", "apstra request");

        let response = self
            .client
            .post(&url)
            .json(&json!({"username": self.username, "password": self.password}))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ApstraError::Auth {
                message: format!("login returned {}: {}", status.as_u16(), error_message(&text)),
            });
        }

        let login: LoginResponse = serde_json::from_str(&text).map_err(|e| ApstraError::Parse {
            message: format!("login response: {}", e),
        })?;
        Ok(login.token)
    }

    pub async fn login(&self) -> Result<(), ApstraError> {
        let token = self.new_session_token().await?;
        self.store_token(Some(token));
        tracing::info!(url = %self.base_url, "logged in to Apstra");
        Ok(())
    }

    pub async fn logout(&self) -> Result<(), ApstraError> {
        if self.current_token().is_none() {
            return Ok(());
        }
        let _: serde_json::Value = self
            .request(Method::POST, "/api/aaa/logout", None::<&()>)
            .await?;
        self.store_token(None);
        Ok(())
    }

    pub async fn request<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ApstraError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let text = self.request_text(method, path, body).await?;
        let text = if text.trim().is_empty() { "null" } else { &text };
        serde_json::from_str(text).map_err(|e| ApstraError::Parse {
            message: format!("{}: {}", path, e),
        })
    }

    async fn request_text<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<String, ApstraError>
    where
        B: Serialize + ?Sized,
    {
        let (status, text) = self.send_raw(method, path, body).await?;
        if status.is_success() {
            return Ok(text);
        }
        Err(status_error(status, path, &text))
    }

    /// Sends a request and hands back the status and body without
    /// interpreting either.
    pub async fn send_raw<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<(StatusCode, String), ApstraError>
    where
        B: Serialize + ?Sized,
    {
        tracing::debug!(method = %method, path = %path, "apstra request");

        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.client.request(method, &url);
        if let Some(token) = self.current_token() {
            builder = builder.header(AUTH_HEADER, token);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;
        Ok((status, text))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApstraError> {
        self.request(Method::GET, path, None::<&()>).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ApstraError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T, ApstraError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::PUT, path, Some(body)).await
    }

    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<T, ApstraError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::PATCH, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApstraError> {
        self.request_text(Method::DELETE, path, None::<&()>).await?;
        Ok(())
    }

    /// Runs a graph query against the staging blueprint.
    pub async fn graph_query<T: DeserializeOwned>(
        &self,
        blueprint_id: &str,
        query: &dyn Query,
    ) -> Result<QueryResponse<T>, ApstraError> {
        let query_string = query.to_string();
        tracing::debug!(blueprint_id = %blueprint_id, query = %query_string, "graph query");
        let path = format!("/api/blueprints/{}/qe?type=staging", encode(blueprint_id));
        self.post(&path, &json!({"query": query_string})).await
    }
}

pub fn status_error(status: StatusCode, path: &str, text: &str) -> ApstraError {
    match status {
        StatusCode::NOT_FOUND => ApstraError::NotFound {
            path: path.to_string(),
        },
        StatusCode::UNAUTHORIZED => ApstraError::Auth {
            message: error_message(text),
        },
        _ => ApstraError::Api {
            status: status.as_u16(),
            message: error_message(text),
        },
    }
}

/// Pulls a human readable message out of an Apstra error body.
pub fn error_message(text: &str) -> String {
    let Ok(body) = serde_json::from_str::<serde_json::Value>(text) else {
        return text.trim().to_string();
    };
    let field = body.get("errors").or_else(|| body.get("error"));
    match field {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|i| i.as_str().map(String::from).unwrap_or_else(|| i.to_string()))
            .collect::<Vec<_>>()
            .join("; "),
        Some(other) => other.to_string(),
        None => text.trim().to_string(),
    }
}

impl std::fmt::Debug for ApstraClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApstraClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("token", &"[REDACTED]")
            .finish()
    }
}
