//! Credential storage for the session's token pair
//!
//! Holds at most one access/refresh pair. The store is either purely in
//! memory or backed by a JSON file holding the two tokens under independent
//! keys. File writes use atomic temp-file + rename so a crash never leaves a
//! half-written pair. A tokio Mutex serializes `replace` and `clear` so the
//! in-memory swap and the file write happen as one step.
//!
//! Expiry is never persisted; it is re-derived from each token's `exp` claim.

use std::path::{Path, PathBuf};

use common::Secret;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::jwt;

/// A bearer token and the expiry decoded from it.
///
/// Immutable once issued. `expires_at` is unix seconds, `None` when the token
/// carries no decodable `exp` claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    token: Secret<String>,
    expires_at: Option<u64>,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        let expires_at = jwt::expiry(&token);
        Self {
            token: Secret::new(token),
            expires_at,
        }
    }

    /// The raw token, for the `Authorization` header or the exchange body.
    pub fn token(&self) -> &str {
        self.token.expose_str()
    }

    pub fn expires_at(&self) -> Option<u64> {
        self.expires_at
    }

    /// Expired as of `now_millis`. A credential without an expiry is always
    /// expired.
    pub fn is_expired_at(&self, now_millis: u64) -> bool {
        match self.expires_at {
            Some(exp) => exp.saturating_mul(1000) < now_millis,
            None => true,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(jwt::now_millis())
    }
}

/// The live access/refresh pair of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPair {
    pub access: Credential,
    pub refresh: Credential,
}

impl CredentialPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: Credential::new(access),
            refresh: Credential::new(refresh),
        }
    }
}

/// On-disk layout: two independent string keys, nothing else.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredTokens {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

/// Thread-safe holder of the session's credential pair.
///
/// Reads lock briefly to clone the pair, so they never wait on anything but
/// an in-progress `replace`/`clear`.
pub struct CredentialStore {
    path: Option<PathBuf>,
    state: Mutex<Option<CredentialPair>>,
}

impl CredentialStore {
    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(None),
        }
    }

    /// Load the pair persisted at `path`.
    ///
    /// A missing file is an empty store; the file is created on the first
    /// `replace`. A file holding only one of the two keys is also treated as
    /// empty, since a lone token cannot form a session.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let stored: StoredTokens = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            match (stored.access_token, stored.refresh_token) {
                (Some(access), Some(refresh)) => {
                    info!(path = %path.display(), "loaded stored credentials");
                    Some(CredentialPair::new(access, refresh))
                }
                (None, None) => None,
                _ => {
                    warn!(path = %path.display(), "credential file holds a partial pair, ignoring it");
                    None
                }
            }
        } else {
            info!(path = %path.display(), "credential file not found, starting signed out");
            None
        };

        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    /// A clone of the current pair, if a session is established.
    pub async fn get(&self) -> Option<CredentialPair> {
        self.state.lock().await.clone()
    }

    /// Whether `credential` is expired. Missing or malformed expiry claims
    /// count as expired.
    pub fn is_expired(&self, credential: &Credential) -> bool {
        credential.is_expired()
    }

    /// A pair is stored and its access credential has not expired.
    pub async fn is_authenticated(&self) -> bool {
        self.state
            .lock()
            .await
            .as_ref()
            .is_some_and(|pair| !pair.access.is_expired())
    }

    /// Swap in a new pair.
    ///
    /// The in-memory swap is visible to `get()` as soon as the lock is
    /// released. A persistence failure is returned, but the swap stands.
    pub async fn replace(&self, pair: CredentialPair) -> Result<()> {
        let mut state = self.state.lock().await;
        self.swap_locked(&mut state, pair).await
    }

    /// Swap in `pair` only if the stored pair still holds `expected_refresh`.
    ///
    /// Returns `Ok(false)` without touching anything when the session was
    /// cleared or replaced since `expected_refresh` was read. As with
    /// `replace`, an `Err` means the swap happened but was not persisted.
    pub async fn replace_if_current(
        &self,
        expected_refresh: &Credential,
        pair: CredentialPair,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !holds_refresh(&state, expected_refresh) {
            debug!("stored pair changed, skipping replace");
            return Ok(false);
        }
        self.swap_locked(&mut state, pair).await.map(|()| true)
    }

    /// Drop the current pair. Calling this on an empty store is a no-op.
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.clear_locked(&mut state).await
    }

    /// Drop the pair only if it still holds `expected_refresh`.
    ///
    /// An empty store counts as cleared and returns `Ok(true)`.
    pub async fn clear_if_current(&self, expected_refresh: &Credential) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.is_some() && !holds_refresh(&state, expected_refresh) {
            debug!("stored pair changed, skipping clear");
            return Ok(false);
        }
        self.clear_locked(&mut state).await.map(|()| true)
    }

    async fn swap_locked(
        &self,
        state: &mut Option<CredentialPair>,
        pair: CredentialPair,
    ) -> Result<()> {
        let stored = StoredTokens {
            access_token: Some(pair.access.token().to_owned()),
            refresh_token: Some(pair.refresh.token().to_owned()),
        };
        *state = Some(pair);
        debug!("replaced credential pair");
        match &self.path {
            Some(path) => write_atomic(path, &stored).await,
            None => Ok(()),
        }
    }

    async fn clear_locked(&self, state: &mut Option<CredentialPair>) -> Result<()> {
        if state.take().is_some() {
            debug!("cleared credential pair");
        }
        let Some(path) = &self.path else {
            return Ok(());
        };
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "removed credential file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(format!("removing credential file: {e}"))),
        }
    }
}

fn holds_refresh(state: &Option<CredentialPair>, expected: &Credential) -> bool {
    state.as_ref().is_some_and(|pair| pair.refresh == *expected)
}

/// Write the token pair to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. The file holds bearer tokens, so on unix its mode is 0600.
async fn write_atomic(path: &Path, data: &StoredTokens) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}
