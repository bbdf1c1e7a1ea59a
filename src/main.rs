use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use v2ray_finder::proxy::{
    default_sources, load_sources, CheckerConfig, CrawlerConfig, LinkParser, Pipeline,
    PipelineConfig, ProxyChecker, ProxyCrawler, Source,
};

/// Find working vmess/vless/trojan servers from public subscription sources
#[derive(Parser)]
#[command(name = "v2ray-finder")]
#[command(about = "Find working vmess/vless/trojan servers from public subscription sources")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    // Arguments for the default `run` command
    #[command(flatten)]
    run: RunArgs,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch all sources, test every link and save the working ones (default)
    Run(RunArgs),
    /// Fetch all sources and print every link found, without testing
    List(ListArgs),
    /// Test links from a local file and save the working ones
    Check(CheckArgs),
}

#[derive(Args, Clone)]
struct SourceArgs {
    /// Extra source URLs to crawl (can specify multiple)
    #[arg(short, long)]
    url: Vec<String>,
    /// File containing source URLs (one per line, optional feed:/page: prefix)
    #[arg(short = 'f', long)]
    url_file: Option<PathBuf>,
    /// Do not crawl the built-in source list
    #[arg(long)]
    no_default_sources: bool,
    /// Timeout in seconds for each source request (unbounded if omitted)
    #[arg(long)]
    fetch_timeout: Option<u64>,
    /// Number of sources fetched concurrently
    #[arg(long, default_value = "32")]
    fetch_concurrency: usize,
}

impl SourceArgs {
    fn sources(&self) -> Result<Vec<Source>> {
        let mut sources = if self.no_default_sources {
            Vec::new()
        } else {
            default_sources()
        };

        if let Some(path) = &self.url_file {
            let loaded = load_sources(path)?;
            info!(count = loaded.len(), path = %path.display(), "loaded sources from file");
            sources.extend(loaded);
        }

        sources.extend(self.url.iter().map(|url| Source::classify(url)));
        Ok(sources)
    }

    fn crawler_config(&self) -> CrawlerConfig {
        let config = CrawlerConfig::new();
        match self.fetch_timeout {
            Some(secs) => config.with_timeout(Duration::from_secs(secs)),
            None => config,
        }
    }
}

#[derive(Args, Clone)]
struct ProbeArgs {
    /// Output file for working links
    #[arg(short, long, default_value = "working_configs.txt")]
    output: PathBuf,
    /// Number of links tested concurrently
    #[arg(short = 'n', long, default_value = "256")]
    concurrency: usize,
    /// Timeout in seconds for each test
    #[arg(long, default_value = "5")]
    timeout: u64,
    /// URL fetched through each server
    #[arg(long, default_value = "http://www.google.com/")]
    test_url: String,
}

impl ProbeArgs {
    fn checker_config(&self) -> CheckerConfig {
        CheckerConfig::new()
            .with_timeout(Duration::from_secs(self.timeout))
            .with_test_url(self.test_url.clone())
    }

    fn pipeline_config(&self, fetch_concurrency: usize) -> PipelineConfig {
        PipelineConfig::new()
            .with_fetch_concurrency(fetch_concurrency)
            .with_probe_concurrency(self.concurrency)
            .with_output(self.output.clone())
    }
}

#[derive(Args, Clone)]
struct RunArgs {
    #[command(flatten)]
    sources: SourceArgs,
    #[command(flatten)]
    probe: ProbeArgs,
}

#[derive(Args, Clone)]
struct ListArgs {
    #[command(flatten)]
    sources: SourceArgs,
    /// Write links to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args, Clone)]
struct CheckArgs {
    /// File containing links to test
    input: PathBuf,
    #[command(flatten)]
    probe: ProbeArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command.unwrap_or(Commands::Run(cli.run)) {
        Commands::Run(args) => run(args).await?,
        Commands::List(args) => list(args).await?,
        Commands::Check(args) => check(args).await?,
    }

    println!("Done.");
    Ok(())
}

fn init_tracing(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

/// Print each verified link as soon as the sink writes it
async fn print_working(mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(link) = rx.recv().await {
        println!("Working server: {}", link);
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let sources = args.sources.sources()?;
    if sources.is_empty() {
        warn!("no sources configured, output will be empty");
    }

    let crawler = ProxyCrawler::with_config(args.sources.crawler_config())?;
    let checker = ProxyChecker::with_config(args.probe.checker_config());
    let config = args.probe.pipeline_config(args.sources.fetch_concurrency);

    println!("Fetching from {} sources...", sources.len());
    println!(
        "Checking with {} concurrent tests, timeout: {}s",
        args.probe.concurrency, args.probe.timeout
    );
    println!("Test URL: {}", args.probe.test_url);
    println!();

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_working(rx));

    let pipeline = Pipeline::new(config, crawler, checker).with_observer(tx);
    let summary = pipeline.run(&sources).await?;
    drop(pipeline);
    printer.await?;

    println!();
    println!("Results: {}", summary);
    println!(
        "Saved {} working links to {:?}",
        summary.verified, args.probe.output
    );
    Ok(())
}

async fn list(args: ListArgs) -> Result<()> {
    let sources = args.sources.sources()?;
    let crawler = ProxyCrawler::with_config(args.sources.crawler_config())?;
    let config = PipelineConfig::new().with_fetch_concurrency(args.sources.fetch_concurrency);

    let pipeline = Pipeline::new(config, crawler, ProxyChecker::new());
    let (links, results) = pipeline.collect(&sources).await;

    for result in &results {
        match &result.error {
            None => eprintln!("Found {} links from {}", result.found, result.source),
            Some(error) => eprintln!("Error crawling {}: {}", result.source, error),
        }
    }
    eprintln!("Total links: {}", links.len());

    if let Some(output_path) = args.output {
        LinkParser::save_to_file(&links, &output_path)?;
        println!("Saved links to {:?}", output_path);
    } else {
        for link in &links {
            println!("{}", link);
        }
    }
    Ok(())
}

async fn check(args: CheckArgs) -> Result<()> {
    let links = LinkParser::parse_file(&args.input)?;
    println!("Loaded {} links from {:?}", links.len(), args.input);

    let checker = ProxyChecker::with_config(args.probe.checker_config());
    let config = args.probe.pipeline_config(1);

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_working(rx));

    let pipeline = Pipeline::new(config, ProxyCrawler::new()?, checker).with_observer(tx);
    let summary = pipeline.check_links(links).await?;
    drop(pipeline);
    printer.await?;

    println!();
    println!("Results: {}", summary);
    println!(
        "Saved {} working links to {:?}",
        summary.verified, args.probe.output
    );
    Ok(())
}
