//! Orchestrator: fetch every source, probe every link, persist the live ones
//!
//! A run moves through `Fetching -> Probing -> Draining -> Done`. Each stage
//! fans out one task per item, bounded by a semaphore, and joins all of them
//! before the next stage starts. Per-item failures are logged and dropped.

use crate::proxy::address::proxy_endpoint;
use crate::proxy::checker::LivenessProbe;
use crate::proxy::crawler::{CrawlResult, LinkSource, Source};
use crate::proxy::models::{LinkOutcome, Protocol};
use crate::proxy::parser::LinkParser;
use crate::proxy::sink::{ResultSink, SinkAppender};
use crate::Result;
use futures::future::join_all;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tracing::{debug, info, warn};

/// Default number of sources fetched at once
const DEFAULT_FETCH_CONCURRENCY: usize = 32;

/// Default number of probes in flight
const DEFAULT_PROBE_CONCURRENCY: usize = 256;

/// Default output file for verified links
const DEFAULT_OUTPUT: &str = "working_configs.txt";

/// Semaphore size for a configured concurrency, at least one
fn permits(concurrency: usize) -> usize {
    concurrency.clamp(1, Semaphore::MAX_PERMITS)
}

/// Configuration for a pipeline run
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub fetch_concurrency: usize,
    pub probe_concurrency: usize,
    /// File receiving verified links, truncated on each run
    pub output: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            probe_concurrency: DEFAULT_PROBE_CONCURRENCY,
            output: PathBuf::from(DEFAULT_OUTPUT),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fetch_concurrency(mut self, concurrency: usize) -> Self {
        self.fetch_concurrency = concurrency;
        self
    }

    pub fn with_probe_concurrency(mut self, concurrency: usize) -> Self {
        self.probe_concurrency = concurrency;
        self
    }

    pub fn with_output(mut self, output: PathBuf) -> Self {
        self.output = output;
        self
    }
}

/// Stage of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Fetching,
    Probing,
    Draining,
    Done,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Fetching => write!(f, "fetching"),
            PipelineState::Probing => write!(f, "probing"),
            PipelineState::Draining => write!(f, "draining"),
            PipelineState::Done => write!(f, "done"),
        }
    }
}

/// Counters collected over one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub sources: usize,
    pub failed_sources: usize,
    pub candidates: usize,
    pub skipped: usize,
    pub undecodable: usize,
    pub dead: usize,
    /// Lines written to the output file
    pub verified: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: LinkOutcome) {
        match outcome {
            LinkOutcome::Live => {}
            LinkOutcome::Dead => self.dead += 1,
            LinkOutcome::Undecodable => self.undecodable += 1,
            LinkOutcome::Skipped => self.skipped += 1,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sources ({} failed), {} links: {} working, {} dead, {} undecodable, {} skipped",
            self.sources,
            self.failed_sources,
            self.candidates,
            self.verified,
            self.dead,
            self.undecodable,
            self.skipped
        )
    }
}

/// Fetch-and-probe pipeline over a link source and a liveness probe
pub struct Pipeline<S, P> {
    config: PipelineConfig,
    source: Arc<S>,
    probe: Arc<P>,
    observer: Option<mpsc::UnboundedSender<String>>,
    state: watch::Sender<PipelineState>,
}

impl<S, P> Pipeline<S, P>
where
    S: LinkSource + 'static,
    P: LivenessProbe + 'static,
{
    pub fn new(config: PipelineConfig, source: S, probe: P) -> Self {
        let (state, _) = watch::channel(PipelineState::Fetching);
        Self {
            config,
            source: Arc::new(source),
            probe: Arc::new(probe),
            observer: None,
            state,
        }
    }

    /// Forward every verified link to `observer` as it is written
    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<String>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    fn enter(&self, state: PipelineState) {
        info!(%state, "pipeline stage");
        self.state.send_replace(state);
    }

    /// Full run: fetch all sources, then probe everything they yielded
    pub async fn run(&self, sources: &[Source]) -> Result<RunSummary> {
        let (links, results) = self.collect(sources).await;

        let mut summary = self.check_links(links).await?;
        summary.sources = results.len();
        summary.failed_sources = results.iter().filter(|r| !r.is_success()).count();
        Ok(summary)
    }

    /// Fetching stage on its own.
    ///
    /// Returns the pooled links (no ordering across sources, duplicates
    /// kept) and one result per source.
    pub async fn collect(&self, sources: &[Source]) -> (Vec<String>, Vec<CrawlResult>) {
        self.enter(PipelineState::Fetching);
        info!(sources = sources.len(), "fetching sources");

        let pool = Arc::new(Mutex::new(Vec::new()));
        let semaphore = Arc::new(Semaphore::new(permits(self.config.fetch_concurrency)));

        let handles: Vec<_> = sources
            .iter()
            .cloned()
            .map(|source| {
                let fetcher = Arc::clone(&self.source);
                let pool = Arc::clone(&pool);
                let semaphore = Arc::clone(&semaphore);
                tokio::spawn(async move {
                    let Ok(_permit) = semaphore.acquire().await else {
                        return CrawlResult::failure(source.url, "fetch aborted".to_string());
                    };

                    match fetcher.fetch(&source).await {
                        Ok(links) => {
                            info!(source = %source.url, kind = %source.kind, found = links.len(), "source fetched");
                            let found = links.len();
                            pool.lock().await.extend(links);
                            CrawlResult::success(source.url, found)
                        }
                        Err(e) => {
                            warn!(source = %source.url, stage = e.stage(), error = %e, "error scraping source");
                            CrawlResult::failure(source.url, e.to_string())
                        }
                    }
                })
            })
            .collect();

        let results: Vec<CrawlResult> = join_all(handles)
            .await
            .into_iter()
            .zip(sources)
            .map(|(joined, source)| {
                joined.unwrap_or_else(|e| {
                    warn!(source = %source.url, error = %e, "fetch task failed");
                    CrawlResult::failure(source.url.clone(), e.to_string())
                })
            })
            .collect();

        let links = std::mem::take(&mut *pool.lock().await);
        info!(links = links.len(), "fetching finished");
        (links, results)
    }

    /// Probing and draining stages over an already collected link pool
    pub async fn check_links(&self, links: Vec<String>) -> Result<RunSummary> {
        let mut summary = RunSummary {
            candidates: links.len(),
            ..Default::default()
        };

        self.enter(PipelineState::Probing);
        let sink = ResultSink::create(&self.config.output, self.observer.clone()).await?;
        let semaphore = Arc::new(Semaphore::new(permits(self.config.probe_concurrency)));

        let handles: Vec<_> = links
            .into_iter()
            .map(|link| {
                let probe = Arc::clone(&self.probe);
                let appender = sink.appender();
                let semaphore = Arc::clone(&semaphore);
                tokio::spawn(async move {
                    let Ok(_permit) = semaphore.acquire().await else {
                        return LinkOutcome::Skipped;
                    };
                    process_link(link, probe.as_ref(), &appender).await
                })
            })
            .collect();

        for joined in join_all(handles).await {
            match joined {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    warn!(error = %e, "probe task failed");
                    summary.dead += 1;
                }
            }
        }

        self.enter(PipelineState::Draining);
        summary.verified = sink.finalize().await?;

        self.enter(PipelineState::Done);
        info!(%summary, "run finished");
        Ok(summary)
    }
}

/// Decode, build the endpoint, probe, and hand live links to the sink
async fn process_link<P>(link: String, probe: &P, appender: &SinkAppender) -> LinkOutcome
where
    P: LivenessProbe + ?Sized,
{
    let Some(protocol) = Protocol::detect(&link) else {
        warn!(link = %link, "unsupported link scheme, skipping");
        return LinkOutcome::Skipped;
    };

    let config = match LinkParser::parse(&link) {
        Ok(config) => config,
        Err(e) => {
            warn!(%protocol, stage = %e.stage, error = %e, "error parsing link");
            return LinkOutcome::Undecodable;
        }
    };

    let endpoint = proxy_endpoint(&config);
    if !probe.probe(&endpoint).await {
        return LinkOutcome::Dead;
    }

    debug!(%protocol, server = %config.server(), "working server");
    if !appender.append(link) {
        warn!("result sink closed before append");
    }
    LinkOutcome::Live
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::proxy::crawler::SourceKind;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves canned link lists; unknown URLs fail like a refused connection
    struct StubSource {
        feeds: HashMap<String, Vec<String>>,
    }

    #[async_trait]
    impl LinkSource for StubSource {
        async fn fetch(&self, source: &Source) -> std::result::Result<Vec<String>, FetchError> {
            match self.feeds.get(&source.url) {
                Some(links) => Ok(links.clone()),
                None => Err(FetchError::Json {
                    url: source.url.clone(),
                    source: serde_json::from_str::<Vec<String>>("<html>").unwrap_err(),
                }),
            }
        }
    }

    /// Passes endpoints that contain the marker, counts every call
    struct StubProbe {
        live_marker: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LivenessProbe for StubProbe {
        async fn probe(&self, endpoint: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            endpoint.contains(self.live_marker)
        }
    }

    fn pipeline(
        feeds: &[(&str, &[&str])],
        dir: &tempfile::TempDir,
    ) -> Pipeline<StubSource, StubProbe> {
        let feeds: HashMap<String, Vec<String>> = feeds
            .iter()
            .map(|(url, links)| {
                (url.to_string(), links.iter().map(|l| l.to_string()).collect())
            })
            .collect();
        Pipeline::new(
            PipelineConfig::new()
                .with_output(dir.path().join("out.txt"))
                .with_probe_concurrency(4),
            StubSource { feeds },
            StubProbe {
                live_marker: "live",
                calls: AtomicUsize::new(0),
            },
        )
    }

    fn read_lines(dir: &tempfile::TempDir) -> Vec<String> {
        std::fs::read_to_string(dir.path().join("out.txt"))
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_pipeline_config_builder() {
        let config = PipelineConfig::new()
            .with_fetch_concurrency(3)
            .with_probe_concurrency(7)
            .with_output(PathBuf::from("x.txt"));
        assert_eq!(config.fetch_concurrency, 3);
        assert_eq!(config.probe_concurrency, 7);
        assert_eq!(config.output, PathBuf::from("x.txt"));
        assert_eq!(PipelineConfig::default().output, PathBuf::from(DEFAULT_OUTPUT));
    }

    #[test]
    fn test_permits_are_clamped() {
        assert_eq!(permits(0), 1);
        assert_eq!(permits(256), 256);
        assert_eq!(permits(usize::MAX), Semaphore::MAX_PERMITS);
    }

    #[tokio::test]
    async fn test_huge_concurrency_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(
            PipelineConfig::new()
                .with_output(dir.path().join("out.txt"))
                .with_fetch_concurrency(usize::MAX)
                .with_probe_concurrency(usize::MAX),
            StubSource {
                feeds: HashMap::from([(
                    "a".to_string(),
                    vec!["trojan://live@10.0.0.3:443".to_string()],
                )]),
            },
            StubProbe {
                live_marker: "live",
                calls: AtomicUsize::new(0),
            },
        );

        let summary = pipeline.run(&[Source::feed("a")]).await.unwrap();
        assert_eq!(summary.verified, 1);
    }

    #[tokio::test]
    async fn test_run_keeps_only_live_links() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(
            &[(
                "a",
                &[
                    "vless://live@10.0.0.1:443?security=tls",
                    "vless://gone@10.0.0.2:443?security=tls",
                    "trojan://live@10.0.0.3:443",
                ],
            )],
            &dir,
        );

        let summary = pipeline.run(&[Source::feed("a")]).await.unwrap();
        assert_eq!(summary.candidates, 3);
        assert_eq!(summary.verified, 2);
        assert_eq!(summary.dead, 1);
        assert_eq!(pipeline.state(), PipelineState::Done);

        let mut lines = read_lines(&dir);
        lines.sort();
        assert_eq!(
            lines,
            vec!["trojan://live@10.0.0.3:443", "vless://live@10.0.0.1:443?security=tls"]
        );
    }

    #[tokio::test]
    async fn test_failed_source_does_not_abort_others() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&[("good", &["trojan://live@10.0.0.3:443"])], &dir);

        let summary = pipeline
            .run(&[Source::page("missing"), Source::feed("good")])
            .await
            .unwrap();
        assert_eq!(summary.sources, 2);
        assert_eq!(summary.failed_sources, 1);
        assert_eq!(summary.verified, 1);
        assert_eq!(read_lines(&dir), vec!["trojan://live@10.0.0.3:443"]);
    }

    #[tokio::test]
    async fn test_undecodable_and_unsupported_links_are_not_probed() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(
            &[(
                "a",
                &["ss://live@h:1", "vmess://%%%", "vless://h.example:443", "not-a-link"],
            )],
            &dir,
        );

        let summary = pipeline.run(&[Source::feed("a")]).await.unwrap();
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.undecodable, 2);
        assert_eq!(summary.verified, 0);
        assert_eq!(pipeline.probe.calls.load(Ordering::SeqCst), 0);
        assert!(read_lines(&dir).is_empty());
    }

    #[tokio::test]
    async fn test_duplicates_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let link = "vless://live@10.0.0.1:80";
        let pipeline = pipeline(&[("a", &[link]), ("b", &[link])], &dir);

        let summary = pipeline
            .run(&[Source::feed("a"), Source::feed("b")])
            .await
            .unwrap();
        assert_eq!(summary.verified, 2);
        assert_eq!(read_lines(&dir), vec![link, link]);
    }

    #[tokio::test]
    async fn test_collect_pools_links() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(
            &[
                ("a", &["vmess://x", "vmess://y"]),
                ("b", &["trojan://z@h:1", "vless://q@h:2"]),
            ],
            &dir,
        );

        let sources = vec![
            Source::new("a", SourceKind::Feed),
            Source::new("b", SourceKind::Page),
        ];
        let (mut links, results) = pipeline.collect(&sources).await;
        links.sort();
        assert_eq!(links, vec!["trojan://z@h:1", "vless://q@h:2", "vmess://x", "vmess://y"]);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].found, 2);
        assert!(results[1].is_success());
    }

    #[tokio::test]
    async fn test_observer_sees_verified_links() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pipeline = pipeline(&[], &dir).with_observer(tx);

        let summary = pipeline
            .check_links(vec!["trojan://live@10.0.0.3:443".to_string()])
            .await
            .unwrap();
        assert_eq!(summary.verified, 1);
        assert_eq!(rx.recv().await.as_deref(), Some("trojan://live@10.0.0.3:443"));
    }

    #[tokio::test]
    async fn test_empty_run_still_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(&[], &dir);
        let summary = pipeline.run(&[]).await.unwrap();
        assert_eq!(summary, RunSummary::default());
        assert!(dir.path().join("out.txt").exists());
    }
}
