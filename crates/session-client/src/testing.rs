//! Scripted transport and token fixtures for unit tests

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::StatusCode;
use transport::{ApiRequest, ApiResponse, Transport};

pub(crate) const BASE_URL: &str = "http://api.test/api";
pub(crate) const REFRESH_URL: &str = "http://api.test/api/auth/token/refresh/";

type Reply = Pin<Box<dyn Future<Output = transport::Result<ApiResponse>> + Send>>;
type Handler = dyn Fn(ApiRequest) -> Reply + Send + Sync;

/// Records every request and answers through a handler closure.
pub(crate) struct ScriptedTransport {
    handler: Box<Handler>,
    sent: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new<F, Fut>(handler: F) -> Arc<Self>
    where
        F: Fn(ApiRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = transport::Result<ApiResponse>> + Send + 'static,
    {
        Arc::new(Self {
            handler: Box::new(move |request| -> Reply { Box::pin(handler(request)) }),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn sent(&self) -> Vec<ApiRequest> {
        self.sent.lock().unwrap().clone()
    }

    /// Requests sent to the refresh endpoint.
    pub(crate) fn refresh_calls(&self) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url == REFRESH_URL)
            .count()
    }

    /// Non-refresh requests that carried `token` as their bearer.
    pub(crate) fn calls_with_bearer(&self, token: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url != REFRESH_URL && r.bearer() == Some(token))
            .count()
    }
}

impl Transport for ScriptedTransport {
    fn send(
        &self,
        request: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = transport::Result<ApiResponse>> + Send + '_>> {
        self.sent.lock().unwrap().push(request.clone());
        (self.handler)(request)
    }
}

pub(crate) fn respond(status: u16, body: serde_json::Value) -> transport::Result<ApiResponse> {
    Ok(ApiResponse::new(
        StatusCode::from_u16(status).unwrap(),
        body.to_string(),
    ))
}

fn now_secs() -> u64 {
    session_auth::jwt::now_millis() / 1000
}

/// Unsigned JWT for `subject` with the given `exp`.
pub(crate) fn token(subject: &str, exp: u64) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = serde_json::json!({ "sub": subject, "exp": exp });
    format!("{header}.{}.sig", URL_SAFE_NO_PAD.encode(payload.to_string()))
}

/// Token valid for the next hour. Same subject, same token within a test.
pub(crate) fn valid_token(subject: &str) -> String {
    token(subject, (now_secs() / 3600 + 2) * 3600)
}

pub(crate) fn expired_token(subject: &str) -> String {
    token(subject, now_secs() - 60)
}
