//! The request façade
//!
//! `Client::request` is the single entry point the application uses. It
//! prepares the call, dispatches it, and on a 401 asks the coordinator for a
//! fresh credential and retries exactly once. Every status other than 401 is
//! returned untouched. So is a 401 on a `public()` call.
//!
//! Session lifecycle helpers (`login`, `register`, `logout`) sit on top of
//! `request` and keep the credential store in step with the backend.

use std::sync::Arc;

use session_auth::{Credential, CredentialStore};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};
use transport::{ApiResponse, HttpTransport, Transport};

use crate::call::PendingCall;
use crate::config::ClientConfig;
use crate::coordinator::RefreshCoordinator;
use crate::error::{Error, Result};
use crate::events::{SessionEvent, SessionEvents};
use crate::pipeline::RequestPipeline;

/// Authenticated API client. Share it behind an `Arc`.
pub struct Client {
    pipeline: RequestPipeline,
    coordinator: RefreshCoordinator,
    transport: Arc<dyn Transport>,
    store: Arc<CredentialStore>,
    events: SessionEvents,
    config: ClientConfig,
}

impl Client {
    /// Assemble a client from its parts.
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        store: Arc<CredentialStore>,
    ) -> Self {
        let events = SessionEvents::new();
        let pipeline = RequestPipeline::new(config.api.base_url.clone(), store.clone());
        let coordinator = RefreshCoordinator::new(
            store.clone(),
            transport.clone(),
            pipeline.url_for(&config.auth.refresh_path),
            config.refresh_timeout(),
            events.clone(),
        );
        Self {
            pipeline,
            coordinator,
            transport,
            store,
            events,
            config,
        }
    }

    /// Build the HTTP transport and credential store described by `config`.
    pub async fn from_config(config: ClientConfig) -> Result<Self> {
        let store = match &config.auth.credentials_path {
            Some(path) => CredentialStore::load(path.clone())
                .await
                .map_err(|e| Error::Credential(e.to_string()))?,
            None => CredentialStore::in_memory(),
        };
        let transport = HttpTransport::new(reqwest::Client::new(), config.request_timeout());
        Ok(Self::new(config, Arc::new(transport), Arc::new(store)))
    }

    /// Execute `call`, refreshing credentials and retrying once on a 401.
    #[instrument(skip_all, fields(request_id = %uuid::Uuid::new_v4(), method = %call.method(), path = %call.path()))]
    pub async fn request(&self, mut call: PendingCall) -> Result<ApiResponse> {
        let mut refreshed: Option<Credential> = None;
        loop {
            let prepared = match &refreshed {
                Some(credential) => self.pipeline.prepare_with(&call, credential),
                None => self.pipeline.prepare(&call).await,
            };
            let response = self.transport.send(prepared.request).await?;
            metrics::counter!("session_requests_total", "status" => response.status.as_u16().to_string())
                .increment(1);

            if !response.is_unauthorized() || call.is_public() {
                return Ok(response);
            }

            if call.is_retried() {
                warn!("still unauthorized after credential refresh");
                return Err(Error::RetryExhausted);
            }

            debug!(
                authenticated = prepared.attached.is_some(),
                "unauthorized, refreshing credentials"
            );
            let rejected = prepared.attached.as_ref().map(Credential::token);
            let credential = self
                .coordinator
                .refresh_rejected(rejected)
                .await
                .map_err(Error::SessionExpired)?;

            call.mark_retried();
            refreshed = Some(credential);
        }
    }

    /// Log in and store the returned credential pair.
    ///
    /// `body` is whatever the login endpoint expects. The full JSON response
    /// is returned so the application can read the user profile from it.
    pub async fn login(&self, body: serde_json::Value) -> Result<serde_json::Value> {
        let call = PendingCall::post(self.config.auth.login_path.clone())
            .json(body)
            .public();
        let response = self.request(call).await?;
        self.establish(response).await
    }

    /// Register an account and store the returned credential pair.
    pub async fn register(&self, body: serde_json::Value) -> Result<serde_json::Value> {
        let call = PendingCall::post(self.config.auth.register_path.clone())
            .json(body)
            .public();
        let response = self.request(call).await?;
        self.establish(response).await
    }

    /// Tell the backend the session is over, then clear local credentials.
    ///
    /// Credentials are cleared and `SessionEvent::LoggedOut` is emitted even
    /// when the logout call itself fails.
    pub async fn logout(&self) -> Result<()> {
        let result = self
            .request(PendingCall::post(self.config.auth.logout_path.clone()))
            .await;

        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "failed to remove stored credentials on logout");
        }
        self.events.emit(SessionEvent::LoggedOut);
        info!("logged out");

        let response = result?;
        if !response.status.is_success() {
            return Err(status_error(&response));
        }
        Ok(())
    }

    /// A session is established and its access credential is unexpired.
    pub async fn is_authenticated(&self) -> bool {
        self.store.is_authenticated().await
    }

    /// Receive session lifecycle events (expiry, logout).
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    async fn establish(&self, response: ApiResponse) -> Result<serde_json::Value> {
        if !response.status.is_success() {
            return Err(status_error(&response));
        }
        let body: serde_json::Value = response
            .json()
            .map_err(|e| Error::MalformedSession(format!("response is not JSON: {e}")))?;
        let pair = session_auth::session_tokens(&body)
            .map_err(|e| Error::MalformedSession(e.to_string()))?;
        self.store
            .replace(pair)
            .await
            .map_err(|e| Error::Credential(e.to_string()))?;
        info!("session established");
        Ok(body)
    }
}

fn status_error(response: &ApiResponse) -> Error {
    Error::Status {
        status: response.status.as_u16(),
        body: response.text(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RefreshFailure;
    use crate::testing::{
        BASE_URL, REFRESH_URL, ScriptedTransport, expired_token, respond, valid_token,
    };
    use reqwest::StatusCode;
    use session_auth::CredentialPair;
    use std::time::Duration;
    use transport::TransportError;

    async fn client_with(
        transport: Arc<ScriptedTransport>,
        pair: Option<CredentialPair>,
    ) -> Client {
        let store = Arc::new(CredentialStore::in_memory());
        if let Some(pair) = pair {
            store.replace(pair).await.unwrap();
        }
        Client::new(ClientConfig::new(BASE_URL), transport, store)
    }

    fn session() -> CredentialPair {
        CredentialPair::new(valid_token("T1"), valid_token("R1"))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn five_concurrent_unauthorized_calls_share_one_refresh() {
        let t2 = valid_token("T2");
        let first_round = Arc::new(tokio::sync::Barrier::new(5));
        let transport = {
            let t2 = t2.clone();
            let first_round = first_round.clone();
            ScriptedTransport::new(move |request| {
                let t2 = t2.clone();
                let first_round = first_round.clone();
                async move {
                    if request.url == REFRESH_URL {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        return respond(200, serde_json::json!({ "access": t2 }));
                    }
                    if request.bearer() == Some(t2.as_str()) {
                        return respond(200, serde_json::json!({ "url": request.url }));
                    }
                    // Hold every first attempt until all five have been sent
                    first_round.wait().await;
                    respond(401, serde_json::json!({ "detail": "token not valid" }))
                }
            })
        };
        let client = Arc::new(client_with(transport.clone(), Some(session())).await);

        let mut handles = vec![];
        for i in 0..5 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                client
                    .request(PendingCall::get(format!("/entities/{i}/")))
                    .await
            }));
        }

        for (i, h) in handles.into_iter().enumerate() {
            let response = h.await.unwrap().unwrap();
            assert_eq!(response.status, StatusCode::OK);
            let body: serde_json::Value = response.json().unwrap();
            assert_eq!(body["url"], format!("{BASE_URL}/entities/{i}/"));
        }
        assert_eq!(transport.refresh_calls(), 1);
        assert_eq!(transport.calls_with_bearer(&t2), 5);
        assert_eq!(client.store().get().await.unwrap().access.token(), t2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failed_refresh_expires_every_queued_call() {
        let first_round = Arc::new(tokio::sync::Barrier::new(5));
        let transport = {
            let first_round = first_round.clone();
            ScriptedTransport::new(move |request| {
                let first_round = first_round.clone();
                async move {
                    if request.url == REFRESH_URL {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        return Err(TransportError::Connect("network unreachable".into()));
                    }
                    first_round.wait().await;
                    respond(401, serde_json::json!({}))
                }
            })
        };
        let client = Arc::new(client_with(transport.clone(), Some(session())).await);
        let mut events = client.subscribe();

        let mut handles = vec![];
        for _ in 0..5 {
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                client.request(PendingCall::get("/chatbot/sessions/")).await
            }));
        }

        for h in handles {
            let err = h.await.unwrap().unwrap_err();
            assert!(
                matches!(err, Error::SessionExpired(_)),
                "expected SessionExpired, got {err:?}"
            );
        }
        assert!(client.store().get().await.is_none());
        assert!(!client.is_authenticated().await);
        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::Expired { .. }
        ));
        // Calls arriving after the window found an empty store; none of them
        // reached the exchange endpoint or signalled expiry a second time.
        assert!(events.try_recv().is_err());
        assert_eq!(transport.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn retried_call_unauthorized_again_is_terminal() {
        let transport = ScriptedTransport::new(|request| async move {
            if request.url == REFRESH_URL {
                return respond(200, serde_json::json!({ "access": valid_token("T2") }));
            }
            respond(401, serde_json::json!({ "detail": "forbidden for this user" }))
        });
        let client = client_with(transport.clone(), Some(session())).await;

        let err = client
            .request(PendingCall::get("/entities/7/"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RetryExhausted), "got {err:?}");
        assert_eq!(transport.refresh_calls(), 1);
        assert_eq!(transport.sent().len(), 3, "original, refresh, one retry");
        assert_eq!(transport.calls_with_bearer(&valid_token("T2")), 1);
    }

    #[tokio::test]
    async fn non_auth_errors_pass_through() {
        let transport = ScriptedTransport::new(|request| async move {
            if request.url.ends_with("/missing/") {
                respond(404, serde_json::json!({ "detail": "Not found." }))
            } else {
                respond(500, serde_json::json!({ "detail": "boom" }))
            }
        });
        let client = client_with(transport.clone(), Some(session())).await;

        let missing = client.request(PendingCall::get("/missing/")).await.unwrap();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
        let broken = client.request(PendingCall::get("/broken/")).await.unwrap();
        assert_eq!(broken.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(transport.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn transport_errors_pass_through() {
        let transport = ScriptedTransport::new(|_| async {
            Err(TransportError::Timeout("30s".into()))
        });
        let client = client_with(transport, Some(session())).await;

        let err = client.request(PendingCall::get("/entities/")).await.unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::Timeout(_))));
        assert!(client.store().get().await.is_some());
    }

    #[tokio::test]
    async fn unauthorized_without_session_expires() {
        let transport = ScriptedTransport::new(|_| async { respond(401, serde_json::json!({})) });
        let client = client_with(transport.clone(), None).await;

        let err = client.request(PendingCall::get("/auth/user/")).await.unwrap_err();
        assert!(matches!(
            err,
            Error::SessionExpired(RefreshFailure::MissingRefreshCredential)
        ));
        assert_eq!(transport.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn login_stores_tokens_and_returns_body() {
        let access = valid_token("T1");
        let refresh = valid_token("R1");
        let transport = {
            let (access, refresh) = (access.clone(), refresh.clone());
            ScriptedTransport::new(move |request| {
                let body = serde_json::json!({
                    "user": { "username": "analyst" },
                    "tokens": { "access": access, "refresh": refresh },
                    "sent": request.body,
                });
                async move { respond(200, body) }
            })
        };
        let client = client_with(transport.clone(), None).await;

        let body = client
            .login(serde_json::json!({ "username": "analyst", "password": "pw" }))
            .await
            .unwrap();
        assert_eq!(body["user"]["username"], "analyst");
        assert_eq!(body["sent"]["password"], "pw");
        assert!(client.is_authenticated().await);

        let pair = client.store().get().await.unwrap();
        assert_eq!(pair.access.token(), access);
        assert_eq!(pair.refresh.token(), refresh);
        assert_eq!(transport.sent()[0].url, format!("{BASE_URL}/auth/login/"));
    }

    #[tokio::test]
    async fn bad_password_does_not_trigger_refresh() {
        let transport = ScriptedTransport::new(|_| async {
            respond(
                401,
                serde_json::json!({ "detail": "No active account found with the given credentials" }),
            )
        });
        let client = client_with(transport.clone(), None).await;
        let mut events = client.subscribe();

        let err = client
            .login(serde_json::json!({ "username": "analyst", "password": "wrong" }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Status { status: 401, .. }), "got {err:?}");
        assert_eq!(transport.refresh_calls(), 0);
        assert!(events.try_recv().is_err(), "no session event expected");
    }

    #[tokio::test]
    async fn register_without_tokens_is_malformed() {
        let transport = ScriptedTransport::new(|_| async {
            respond(201, serde_json::json!({ "user": { "id": 9 } }))
        });
        let client = client_with(transport.clone(), None).await;

        let err = client
            .register(serde_json::json!({ "username": "new", "password": "pw" }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedSession(_)), "got {err:?}");
        assert!(client.store().get().await.is_none());
        assert_eq!(transport.sent()[0].url, format!("{BASE_URL}/auth/register/"));
    }

    #[tokio::test]
    async fn logout_clears_even_when_call_fails() {
        let transport = ScriptedTransport::new(|_| async {
            Err(TransportError::Connect("offline".into()))
        });
        let client = client_with(transport.clone(), Some(session())).await;
        let mut events = client.subscribe();

        let result = client.logout().await;
        assert!(matches!(result, Err(Error::Transport(_))));
        assert!(client.store().get().await.is_none());
        assert_eq!(events.recv().await.unwrap(), SessionEvent::LoggedOut);

        let sent = transport.sent();
        assert_eq!(sent[0].url, format!("{BASE_URL}/auth/logout/"));
        assert_eq!(sent[0].bearer(), Some(valid_token("T1").as_str()));
    }

    #[tokio::test]
    async fn logout_succeeds_on_2xx() {
        let transport =
            ScriptedTransport::new(|_| async { respond(205, serde_json::json!({})) });
        let client = client_with(transport, Some(session())).await;

        client.logout().await.unwrap();
        assert!(!client.is_authenticated().await);
    }

    #[tokio::test]
    async fn from_config_uses_persisted_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        CredentialStore::load(path.clone())
            .await
            .unwrap()
            .replace(session())
            .await
            .unwrap();

        let mut config = ClientConfig::new("http://127.0.0.1:8000/api");
        config.auth.credentials_path = Some(path);
        let client = Client::from_config(config).await.unwrap();
        assert!(client.is_authenticated().await);
    }

    #[tokio::test]
    async fn expired_access_is_sent_bare_then_refreshed() {
        let t2 = valid_token("T2");
        let transport = {
            let t2 = t2.clone();
            ScriptedTransport::new(move |request| {
                let t2 = t2.clone();
                async move {
                    if request.url == REFRESH_URL {
                        return respond(200, serde_json::json!({ "access": t2 }));
                    }
                    match request.bearer() {
                        Some(bearer) if bearer == t2 => respond(200, serde_json::json!([])),
                        _ => respond(401, serde_json::json!({})),
                    }
                }
            })
        };
        let pair = CredentialPair::new(expired_token("T1"), valid_token("R1"));
        let client = client_with(transport.clone(), Some(pair)).await;

        let response = client
            .request(PendingCall::get("/chatbot/sessions/"))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);

        let sent = transport.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].bearer(), None);
        assert_eq!(sent[1].url, REFRESH_URL);
        assert_eq!(sent[1].body, Some(serde_json::json!({ "refresh": valid_token("R1") })));
        assert_eq!(sent[2].bearer(), Some(t2.as_str()));
    }

    #[tokio::test]
    async fn public_call_returns_401_untouched() {
        let transport = ScriptedTransport::new(|_| async { respond(401, serde_json::json!({})) });
        let client = client_with(transport.clone(), Some(session())).await;

        let response = client
            .request(PendingCall::get("/status/").public())
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(transport.refresh_calls(), 0);
        assert!(client.store().get().await.is_some());
    }
}
