//! Shared types for the API client workspace
//!
//! `Secret` keeps bearer tokens out of logs; `Error` covers configuration
//! loading for every crate that reads a TOML file.

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
