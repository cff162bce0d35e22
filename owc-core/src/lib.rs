//! Core logic for owc-proxy.
//!
//! This crate has no HTTP server in it. It provides:
//! - `token` for the encrypted calendar source format
//! - `source` and `route` for deciding what to ask the upstream for
//! - `sanitize` and `process` for cleaning up what comes back

pub mod config;
pub mod error;
pub mod event;
pub mod process;
pub mod route;
pub mod sanitize;
pub mod source;
pub mod token;

pub use config::ProxyConfig;
pub use error::{ConfigError, ProxyError, ProxyResult, TokenError};
