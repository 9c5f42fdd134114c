//! Session credentials for the API client
//!
//! Provides the access/refresh credential pair, its store (in memory or
//! persisted to a JSON file), JWT expiry decoding, and the refresh exchange
//! against the token endpoint. This crate has no knowledge of request
//! retries or refresh coordination; `session-client` builds those on top.
//!
//! Credential flow:
//! 1. Login/registration response carries `tokens.access` + `tokens.refresh`
//!    → `token::session_tokens()` → `CredentialStore::replace()`
//! 2. Each request reads `CredentialStore::get()` and checks expiry
//! 3. On 401 the coordinator calls `token::refresh_token()` once
//! 4. The refreshed pair replaces the old one; failure calls `clear()`

pub mod constants;
pub mod credentials;
pub mod error;
pub mod jwt;
pub mod token;

pub use constants::*;
pub use credentials::{Credential, CredentialPair, CredentialStore};
pub use error::{Error, Result};
pub use token::{RefreshResponse, refresh_token, session_tokens};
