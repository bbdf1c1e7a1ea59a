//! Share-link discovery and liveness checking
//!
//! This module provides functionality for:
//! - Fetching candidate links from subscription feeds and web pages
//! - Decoding vmess, vless and trojan links into connection parameters
//! - Probing each server through a synthesized proxy endpoint
//! - Writing the links that pass to a results file

pub mod address;
pub mod checker;
pub mod crawler;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod sink;
pub mod socks;
pub mod sources;

pub use address::proxy_endpoint;
pub use checker::{CheckerConfig, LivenessProbe, ProxyChecker};
pub use crawler::{CrawlResult, CrawlerConfig, LinkSource, ProxyCrawler, Source, SourceKind};
pub use models::{LinkConfig, LinkOutcome, Protocol, TrojanConfig, VlessConfig, VmessConfig};
pub use parser::LinkParser;
pub use pipeline::{Pipeline, PipelineConfig, PipelineState, RunSummary};
pub use sink::{ResultSink, SinkAppender};
pub use sources::{default_sources, load_sources};
