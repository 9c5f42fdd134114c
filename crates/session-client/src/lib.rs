//! Authenticated request layer with single-flight credential refresh
//!
//! Every outbound call goes through `Client::request`. The pipeline attaches
//! the stored access credential when it is still valid; a 401 sends the
//! caller to the `RefreshCoordinator`, which runs at most one refresh
//! exchange at a time and hands its outcome to every caller that queued
//! behind it. Each original call is retried at most once.
//!
//! Request lifecycle:
//! 1. `RequestPipeline::prepare` → bearer header if the access credential is unexpired
//! 2. Dispatch through the `Transport`; non-401 responses return as-is
//! 3. 401 → `RefreshCoordinator::refresh_rejected` (opens or joins a window)
//! 4. Success → retry once with the new credential; a second 401 is `RetryExhausted`
//! 5. Failure → store cleared, `SessionEvent::Expired` broadcast, `SessionExpired` returned

pub mod call;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod pipeline;

#[cfg(test)]
pub(crate) mod testing;

pub use call::PendingCall;
pub use client::Client;
pub use config::{ApiConfig, AuthConfig, ClientConfig};
pub use coordinator::{RefreshCoordinator, RefreshOutcome};
pub use error::{Error, RefreshFailure, Result};
pub use events::{SessionEvent, SessionEvents};
pub use pipeline::{PreparedCall, RequestPipeline};
