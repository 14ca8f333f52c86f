use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use variant_capture::browser::{ChromeBrowser, ConnectionMode, PageDriver, PageFactory};
use variant_capture::capture::{CaptureRunner, FsArtifactSink, ListingDiscovery, SelectorProfile};
use variant_capture::config::CaptureConfig;
use variant_capture::targets::{self, ProductTarget};

#[derive(Parser, Debug)]
#[command(author, version, about = "Screenshot every variant of product-configurator pages", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture every variant of the products listed in a CSV file
    Capture(CaptureArgs),
    /// Collect product URLs from the site's listing page into a CSV file
    Discover(DiscoverArgs),
}

#[derive(Args, Debug)]
struct CaptureArgs {
    /// CSV file with a `url` column
    #[arg(long, default_value = "product_urls.csv")]
    urls: PathBuf,

    #[command(flatten)]
    site: SiteArgs,

    /// Root directory for screenshots
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Only capture the first N URLs
    #[arg(long)]
    limit: Option<usize>,

    /// Targets captured at once (overrides the configuration)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Write the full run report as JSON
    #[arg(long)]
    report: Option<PathBuf>,

    #[command(flatten)]
    browser: BrowserArgs,
}

#[derive(Args, Debug)]
struct DiscoverArgs {
    #[command(flatten)]
    site: SiteArgs,

    /// Where to write the discovered URLs
    #[arg(short, long, default_value = "product_urls.csv")]
    output: PathBuf,

    #[command(flatten)]
    browser: BrowserArgs,
}

#[derive(Args, Debug)]
struct SiteArgs {
    /// Built-in site profile
    #[arg(long, conflicts_with = "config")]
    site: Option<String>,

    /// JSON capture configuration
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct BrowserArgs {
    #[arg(long)]
    headless: bool,

    #[arg(long)]
    no_sandbox: bool,

    /// Chrome executable; downloaded on first use when omitted
    #[arg(long)]
    chrome_path: Option<String>,

    /// Attach to a running Chrome on this remote debugging port
    #[arg(long)]
    debug_port: Option<u16>,
}

async fn load_config(args: &SiteArgs) -> Result<CaptureConfig> {
    match (&args.config, &args.site) {
        (Some(path), _) => CaptureConfig::from_file(path)
            .await
            .with_context(|| format!("Failed to load config {}", path.display())),
        (None, Some(site)) => match CaptureConfig::for_site(site) {
            Some(config) => Ok(config),
            None => bail!(
                "Unknown site '{}' (available: {})",
                site,
                SelectorProfile::builtin_ids().join(", ")
            ),
        },
        (None, None) => bail!("Either --site or --config is required"),
    }
}

async fn launch(args: &BrowserArgs) -> Result<ChromeBrowser> {
    let browser = match args.debug_port {
        Some(port) => ChromeBrowser::connect_debug_port(port).await,
        None => {
            ChromeBrowser::new(ConnectionMode::Sandboxed {
                chrome_path: args.chrome_path.clone(),
                no_sandbox: args.no_sandbox,
                headless: args.headless,
            })
            .await
        }
    };
    browser.context("Failed to start Chrome")
}

async fn capture(args: CaptureArgs) -> Result<()> {
    let mut config = load_config(&args.site).await?;
    if let Some(concurrency) = args.concurrency {
        config.max_concurrent_targets = concurrency;
    }
    config.validate()?;

    let urls = targets::load_csv(&args.urls, args.limit)
        .with_context(|| format!("Failed to read {}", args.urls.display()))?;
    if urls.is_empty() {
        log::warn!("No URLs found in {}", args.urls.display());
        return Ok(());
    }

    let site_name = config.profile.site_name.clone();
    let targets: Vec<ProductTarget> = urls
        .into_iter()
        .map(|url| ProductTarget::new(url, &args.output, &site_name))
        .collect();

    log::info!(
        "Starting {} capture of {} product(s) into {}",
        site_name,
        targets.len(),
        args.output.display()
    );

    let browser = launch(&args.browser).await?;
    let runner = CaptureRunner::new(browser, config, Arc::new(FsArtifactSink));
    let summary = runner.run(targets).await;

    for result in &summary.results {
        println!("{}", result.summary_line());
    }
    println!(
        "Done: {}/{} target(s) captured, {} aborted, {} artifact(s), {} write failure(s)",
        summary.completed_targets,
        summary.targets,
        summary.aborted_targets,
        summary.total_artifacts,
        summary.write_failures
    );

    if let Some(path) = &args.report {
        summary
            .to_file(path)
            .await
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        log::info!("Report written to {}", path.display());
    }

    if let Err(e) = runner.into_factory().close().await {
        log::warn!("Failed to close Chrome: {}", e);
    }

    Ok(())
}

async fn discover(args: DiscoverArgs) -> Result<()> {
    let config = load_config(&args.site).await?;
    config.validate()?;
    let discovery = ListingDiscovery::new(&config)?;

    let browser = launch(&args.browser).await?;
    let page = browser.open_page().await.context("Failed to open a page")?;
    let discovered = discovery.discover(&page).await;

    if let Err(e) = page.close().await {
        log::warn!("Failed to close page: {}", e);
    }
    if let Err(e) = browser.close().await {
        log::warn!("Failed to close Chrome: {}", e);
    }

    let urls = discovered?;
    targets::write_csv(&args.output, &urls)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    println!(
        "Found {} product URL(s) (saved to {})",
        urls.len(),
        args.output.display()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Capture(args) => capture(args).await,
        Command::Discover(args) => discover(args).await,
    }
}
