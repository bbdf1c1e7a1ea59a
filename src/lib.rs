//! V2Ray Finder - share link scraper and checker
//!
//! Collects vmess, vless and trojan links from public subscription sources,
//! checks each one by tunnelling a test request through it, and keeps the
//! ones that work.

pub mod error;
pub mod proxy;

pub use error::{DecodeError, DecodeStage, FetchError, ProbeFailure};
pub use proxy::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
