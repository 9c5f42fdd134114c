//! Request preparation
//!
//! Turns a `PendingCall` into a dispatchable `ApiRequest`: absolute URL,
//! caller headers, JSON content type, and the bearer credential when the
//! stored access credential is still valid. The pipeline only reads the
//! store. Whether to refresh is decided by the client after it sees the
//! response.

use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use session_auth::{Credential, CredentialStore};
use tracing::{debug, warn};
use transport::ApiRequest;

use crate::call::PendingCall;

/// A request ready for the transport, plus the credential it carries.
#[derive(Debug)]
pub struct PreparedCall {
    pub request: ApiRequest,
    /// The access credential attached as the bearer header, if any. The
    /// client reports this to the coordinator when the server rejects it.
    pub attached: Option<Credential>,
}

pub struct RequestPipeline {
    base_url: String,
    store: Arc<CredentialStore>,
}

impl RequestPipeline {
    pub fn new(base_url: impl Into<String>, store: Arc<CredentialStore>) -> Self {
        Self {
            base_url: base_url.into(),
            store,
        }
    }

    /// Prepare `call` with whatever valid credential the store holds.
    ///
    /// Missing pair or expired access credential → sent without
    /// `Authorization`.
    pub async fn prepare(&self, call: &PendingCall) -> PreparedCall {
        let credential = match self.store.get().await {
            Some(pair) if !self.store.is_expired(&pair.access) => Some(pair.access),
            Some(_) => {
                debug!(path = call.path(), "access credential expired, sending unauthenticated");
                None
            }
            None => None,
        };
        self.build(call, credential)
    }

    /// Prepare `call` with an explicit credential, bypassing the store.
    ///
    /// Used for the retry after a refresh so the retry carries exactly the
    /// credential that window produced.
    pub fn prepare_with(&self, call: &PendingCall, credential: &Credential) -> PreparedCall {
        self.build(call, Some(credential.clone()))
    }

    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_owned();
        }
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn build(&self, call: &PendingCall, credential: Option<Credential>) -> PreparedCall {
        let mut request = ApiRequest::new(call.method().clone(), self.url_for(call.path()));
        request.headers = call.headers().clone();

        if let Some(body) = call.body() {
            if !request.headers.contains_key(CONTENT_TYPE) {
                request
                    .headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            request.body = Some(body.clone());
        }

        let attached = credential.and_then(|credential| {
            match HeaderValue::from_str(&format!("Bearer {}", credential.token())) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    request.headers.insert(AUTHORIZATION, value);
                    Some(credential)
                }
                Err(e) => {
                    warn!(error = %e, "access credential is not a valid header value, sending unauthenticated");
                    None
                }
            }
        });

        if attached.is_none() {
            // A caller-supplied Authorization header must not masquerade as
            // the session's credential.
            request.headers.remove(AUTHORIZATION);
        }

        PreparedCall { request, attached }
    }
}
