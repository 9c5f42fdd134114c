//! Token endpoint payloads and the refresh exchange
//!
//! Two shapes arrive from the auth backend:
//! 1. Login/registration responses: `{"tokens": {"access": .., "refresh": ..}, ..}`
//! 2. Refresh responses: `{"access": .., "refresh": ..?}`, where `refresh` is
//!    present only when the backend rotates refresh credentials
//!
//! The exchange is sent straight to the transport. It never carries an
//! `Authorization` header and is never retried here; the coordinator owns
//! timeouts and the failure policy.

use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;
use transport::{ApiRequest, Transport};

use crate::credentials::{Credential, CredentialPair};
use crate::error::{Error, Result};

/// Body sent to the refresh endpoint.
#[derive(Debug, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh: &'a str,
}

/// Successful refresh response.
#[derive(Debug, Deserialize, Serialize)]
pub struct RefreshResponse {
    pub access: String,
    /// Present only when the backend rotates the refresh credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
}

impl RefreshResponse {
    /// Build the pair that replaces the current one.
    ///
    /// Keeps `current_refresh` unless the response rotated it. The new access
    /// credential must carry a decodable expiry; one that doesn't would be
    /// dropped by the pipeline on every request.
    pub fn into_pair(self, current_refresh: &Credential) -> Result<CredentialPair> {
        let access = Credential::new(self.access);
        if access.expires_at().is_none() {
            return Err(Error::TokenExchange(
                "refreshed access credential has no expiry claim".into(),
            ));
        }
        let refresh = match self.refresh {
            Some(rotated) => Credential::new(rotated),
            None => current_refresh.clone(),
        };
        Ok(CredentialPair { access, refresh })
    }
}

#[derive(Deserialize)]
struct SessionEnvelope {
    tokens: SessionTokens,
}

#[derive(Deserialize)]
struct SessionTokens {
    access: String,
    refresh: String,
}

/// Extract the credential pair from a login or registration response body.
pub fn session_tokens(body: &serde_json::Value) -> Result<CredentialPair> {
    let envelope = SessionEnvelope::deserialize(body)
        .map_err(|e| Error::TokenExchange(format!("session response carries no tokens: {e}")))?;
    Ok(CredentialPair::new(
        envelope.tokens.access,
        envelope.tokens.refresh,
    ))
}

/// Exchange a refresh credential for a new access credential.
///
/// Any non-2xx status is `Rejected`; a 2xx body that is not a refresh
/// response is `TokenExchange`.
pub async fn refresh_token(
    transport: &dyn Transport,
    url: &str,
    refresh: &Credential,
) -> Result<RefreshResponse> {
    let body = serde_json::to_value(RefreshRequest {
        refresh: refresh.token(),
    })
    .map_err(|e| Error::TokenExchange(format!("serializing refresh request: {e}")))?;

    let mut request = ApiRequest::new(Method::POST, url);
    request
        .headers
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    request.body = Some(body);

    let response = transport.send(request).await?;
    let status = response.status;
    if !status.is_success() {
        return Err(Error::Rejected {
            status: status.as_u16(),
            body: response.text(),
        });
    }

    let parsed = response
        .json::<RefreshResponse>()
        .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))?;
    debug!(rotated = parsed.refresh.is_some(), "refresh exchange succeeded");
    Ok(parsed)
}
