mod output;

use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use harvest_client::{
    Adapter, BrowserOptions, ChromiumDriver, CrawlMode, HtmdCleaner, ReqwestFetcher, get_adapter,
    list_adapters,
};
use harvest_core::auth::AuthState;
use harvest_core::models::{CrawlLogEntry, CrawlSummary, PageFilter, RecordFilter};
use harvest_core::util::{AdapterParams, parse_adapter_params, parse_since};
use harvest_core::{
    CrawlEngine, CrawlEvent, CrawlJob, CrawlReporter, CrawlService, EngineConfig, HarvestPaths,
    PageCapture,
};
use harvest_db::{ContentRepository, Database, DatabaseConfig};

use crate::output::ExportFormat;

const DEFAULT_LOG_FILTER: &str = "harvest_core=info,harvest_client=info,harvest_db=info";

#[derive(Parser)]
#[command(
    name = "harvest",
    version,
    about = "Incremental browser crawler with pluggable site adapters"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a browser for manual login and save the session for later crawls
    Login {
        /// Site ID (see `harvest list-sites`)
        site: String,

        /// Override where the login state is written
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Crawl a site; adapter options follow the site, e.g. `harvest crawl threads --user @someone`
    Crawl {
        /// Site ID (see `harvest list-sites`)
        site: String,

        /// Only fetch items newer than this date (YYYY-MM-DD or RFC 3339)
        #[arg(short, long)]
        since: Option<String>,

        /// Ignore any saved login state
        #[arg(long, default_value_t = false)]
        no_state: bool,

        /// Scroll cap per target
        #[arg(long, env = "HARVEST_MAX_PAGES")]
        max_scrolls: Option<u32>,

        /// Adapter-specific options (`--key value` pairs)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        adapter_args: Vec<String>,
    },

    /// List available site adapters and their options
    ListSites,

    /// Display stored items, newest first
    Show {
        /// Filter by site ID
        #[arg(long)]
        site: Option<String>,

        /// Filter by author username
        #[arg(short, long)]
        author: Option<String>,

        /// Items after this date (YYYY-MM-DD or RFC 3339)
        #[arg(short, long)]
        since: Option<String>,

        #[arg(short = 'n', long, default_value_t = 20)]
        limit: u32,

        #[arg(long, default_value_t = 0)]
        offset: u32,
    },

    /// Search stored items by keyword
    Search {
        query: String,

        /// Filter by site ID
        #[arg(long)]
        site: Option<String>,

        #[arg(short = 'n', long, default_value_t = 20)]
        limit: u32,
    },

    /// Export stored items to JSON or CSV
    Export {
        /// Filter by site ID
        #[arg(long)]
        site: Option<String>,

        /// Filter by author username
        #[arg(short, long)]
        author: Option<String>,

        #[arg(short, long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        #[arg(short = 'n', long, default_value_t = 10_000)]
        limit: u32,
    },

    /// Show item counts per site
    Stats {
        /// Filter by site ID
        #[arg(long)]
        site: Option<String>,
    },

    /// List captured pages, or print one page's Markdown with --url
    Pages {
        /// Filter by site ID
        #[arg(long)]
        site: Option<String>,

        /// Print the stored Markdown of this page
        #[arg(long)]
        url: Option<String>,

        #[arg(short = 'n', long, default_value_t = 20)]
        limit: u32,
    },

    /// Show recent crawl runs
    History {
        /// Filter by site ID
        #[arg(long)]
        site: Option<String>,

        #[arg(short = 'n', long, default_value_t = 20)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let paths = HarvestPaths::from_env()?;
    paths
        .ensure_dirs()
        .context("Failed to create the harvest directory")?;

    match cli.command {
        Commands::Login { site, output } => cmd_login(&paths, &site, output).await?,
        Commands::Crawl {
            site,
            since,
            no_state,
            max_scrolls,
            adapter_args,
        } => {
            let repo = open_store(&paths).await?;
            let options = CrawlOptions {
                since: since.as_deref().map(parse_since).transpose()?,
                no_state,
                max_scrolls,
                params: parse_adapter_params(&adapter_args),
            };
            cmd_crawl(&paths, &repo, &site, options).await?;
        }
        Commands::ListSites => {
            let mut out = std::io::stdout().lock();
            output::write_adapters(&mut out, &list_adapters())?;
        }
        Commands::Show {
            site,
            author,
            since,
            limit,
            offset,
        } => {
            let repo = open_store(&paths).await?;
            let filter = RecordFilter {
                source_id: site,
                author_name: author,
                since: since.as_deref().map(parse_since).transpose()?,
            };
            let records = repo.query_records(&filter, limit, offset).await?;
            if records.is_empty() {
                println!("No items found.");
            } else {
                output::write_records(&mut std::io::stdout().lock(), &records)?;
            }
        }
        Commands::Search { query, site, limit } => {
            let repo = open_store(&paths).await?;
            let records = repo.search(&query, site.as_deref(), limit).await?;
            if records.is_empty() {
                println!("No results for '{query}'.");
            } else {
                println!("Found {} results for '{query}':\n", records.len());
                output::write_records(&mut std::io::stdout().lock(), &records)?;
            }
        }
        Commands::Export {
            site,
            author,
            format,
            output: path,
            limit,
        } => {
            let repo = open_store(&paths).await?;
            let filter = RecordFilter {
                source_id: site,
                author_name: author,
                since: None,
            };
            let records = repo.query_records(&filter, limit, 0).await?;
            output::export_records(&records, format, &path)?;
            println!("Exported {} items to {}", records.len(), path.display());
        }
        Commands::Stats { site } => {
            let repo = open_store(&paths).await?;
            let stats = repo.stats(site.as_deref()).await?;
            output::write_stats(&mut std::io::stdout().lock(), &stats)?;
        }
        Commands::Pages { site, url, limit } => {
            let repo = open_store(&paths).await?;
            match url {
                Some(url) => match repo.get_page(&url).await? {
                    Some(page) => {
                        if let Some(title) = &page.title {
                            println!("# {title}\n");
                        }
                        println!("{}", page.body);
                    }
                    None => println!("No page stored for {url}."),
                },
                None => {
                    let filter = PageFilter {
                        source_id: site,
                        url: None,
                    };
                    let pages = repo.query_pages(&filter, limit, 0).await?;
                    if pages.is_empty() {
                        println!("No pages found.");
                    } else {
                        output::write_pages(&mut std::io::stdout().lock(), &pages)?;
                    }
                }
            }
        }
        Commands::History { site, limit } => {
            let repo = open_store(&paths).await?;
            let entries = repo.crawl_history(site.as_deref(), limit).await?;
            if entries.is_empty() {
                println!("No crawls recorded.");
            } else {
                output::write_history(&mut std::io::stdout().lock(), &entries)?;
            }
        }
    }

    Ok(())
}

/// Open the SQLite store (HARVEST_DB_PATH, else `<base>/data.db`).
async fn open_store(paths: &HarvestPaths) -> Result<ContentRepository> {
    let config = DatabaseConfig::from_env(&paths.default_db_path())?;
    let db = Database::open(&config)
        .await
        .context("Failed to open the content store")?;
    Ok(db.content_repo())
}

async fn cmd_login(paths: &HarvestPaths, site: &str, output: Option<PathBuf>) -> Result<()> {
    let adapter = get_adapter(site)?;
    let info = adapter.info();
    let Some(login_url) = info.login_url else {
        bail!("{} does not need a login", info.display_name);
    };
    let state_path = output.unwrap_or_else(|| paths.state_path_for(site));

    println!("Opening browser for {}...", info.display_name);
    println!("State will be saved to: {}", state_path.display());

    let options = BrowserOptions::from_env()?.with_headless(false);
    let driver = ChromiumDriver::launch(&options).await?;

    let wait_for_enter = async {
        println!("Please log in manually in the browser window.");
        println!("Press Enter when you are done logging in...");
        let mut line = String::new();
        let mut stdin = tokio::io::BufReader::new(tokio::io::stdin());
        if let Err(e) = stdin.read_line(&mut line).await {
            tracing::warn!("Failed to read from stdin: {e}");
        }
    };
    let saved = driver.login(login_url, &state_path, wait_for_enter).await;
    driver.shutdown().await;
    let state = saved?;

    println!(
        "Login state saved: {} ({} cookies)",
        state_path.display(),
        state.cookies.len()
    );
    Ok(())
}

struct CrawlOptions {
    since: Option<chrono::DateTime<Utc>>,
    no_state: bool,
    max_scrolls: Option<u32>,
    params: AdapterParams,
}

async fn cmd_crawl(
    paths: &HarvestPaths,
    repo: &ContentRepository,
    site: &str,
    options: CrawlOptions,
) -> Result<()> {
    let adapter = get_adapter(site)?;
    let targets = adapter.targets(&options.params)?;

    let summary = match adapter.info().mode {
        CrawlMode::Http => crawl_http(repo, adapter, &options.params, &targets).await?,
        mode => {
            let auth_state = load_auth_state(paths, adapter, options.no_state)?;
            let mut config = EngineConfig::from_env()?;
            if let Some(max_scrolls) = options.max_scrolls {
                config = config.with_max_scrolls(max_scrolls);
            }

            let cancel = CancellationToken::new();
            let ctrl_c = spawn_ctrl_c_handler(cancel.clone());
            let driver = ChromiumDriver::launch(&BrowserOptions::from_env()?).await?;

            let result = if mode == CrawlMode::Page {
                PageCapture::new(driver.clone(), HtmdCleaner::new(), config.nav_timeout)
                    .with_cancel_token(cancel)
                    .capture_all(site, &targets, auth_state.as_ref(), repo, &ConsoleReporter)
                    .await
            } else {
                let job = CrawlJob {
                    source_id: site.to_string(),
                    targets,
                    capture: adapter.capture_predicate(),
                    parser: adapter.parser(),
                    auth_state,
                    since: options.since,
                    author_scope: adapter.author_scope(&options.params),
                };
                let engine = CrawlEngine::new(driver.clone(), config).with_cancel_token(cancel);
                CrawlService::new(engine, repo.clone())
                    .crawl(&job, &ConsoleReporter)
                    .await
            };

            ctrl_c.abort();
            driver.shutdown().await;
            result?
        }
    };

    print_summary(&summary);
    Ok(())
}

/// Single fetch for adapters that need no browser.
async fn crawl_http(
    repo: &ContentRepository,
    adapter: Adapter,
    params: &AdapterParams,
    targets: &[String],
) -> Result<CrawlSummary> {
    let clock = Instant::now();
    let started_at = Utc::now();
    let fetcher = ReqwestFetcher::new()?;
    let target = targets.first().cloned().unwrap_or_default();
    println!("Fetching {target}...");

    let records = adapter.fetch_records(&fetcher, params).await?;
    let new = repo.upsert_records(&records).await?;
    repo.log_crawl(&CrawlLogEntry {
        source_id: adapter.site_id().to_string(),
        target,
        items_found: records.len() as u64,
        items_new: new,
        started_at,
        finished_at: Utc::now(),
    })
    .await?;

    Ok(CrawlSummary {
        source_id: adapter.site_id().to_string(),
        items_found: records.len() as u64,
        items_new: new,
        duration: clock.elapsed(),
        targets_failed: 0,
        interrupted: false,
    })
}

fn load_auth_state(
    paths: &HarvestPaths,
    adapter: Adapter,
    no_state: bool,
) -> Result<Option<AuthState>> {
    if no_state {
        return Ok(None);
    }
    let site = adapter.site_id();
    let path = paths.state_path_for(site);
    let state = AuthState::load(&path)
        .with_context(|| format!("Failed to read login state at {}", path.display()))?;
    if state.is_none() && adapter.info().requires_login {
        println!(
            "Warning: No login state found at {}. Run `harvest login {site}` first.",
            path.display()
        );
    }
    Ok(state)
}

/// First Ctrl-C cancels the crawl; everything streamed so far stays stored.
fn spawn_ctrl_c_handler(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping crawl");
            cancel.cancel();
        }
    })
}

fn print_summary(summary: &CrawlSummary) {
    if summary.interrupted {
        println!(
            "\nInterrupted. {} items found, {} saved.",
            summary.items_found, summary.items_new
        );
        return;
    }
    println!(
        "\nDone. {} items found, {} new saved in {:.1}s.",
        summary.items_found,
        summary.items_new,
        summary.duration.as_secs_f64()
    );
    if summary.targets_failed > 0 {
        println!("{} target(s) failed; see the log above.", summary.targets_failed);
    }
}

/// Progress lines on stdout while a crawl runs.
struct ConsoleReporter;

impl CrawlReporter for ConsoleReporter {
    fn report(&self, event: CrawlEvent<'_>) {
        let mut out = std::io::stdout().lock();
        let _ = match event {
            CrawlEvent::TargetStarted { target, .. } => writeln!(out, "Crawling {target}..."),
            CrawlEvent::Progress {
                scroll, total_seen, ..
            } => writeln!(out, "  scroll #{scroll}: {total_seen} items so far"),
            CrawlEvent::TargetFailed { target, error } => {
                writeln!(out, "  failed {target}: {error}")
            }
            CrawlEvent::TargetFinished {
                found, new, stop, ..
            } => match stop {
                Some(stop) => writeln!(out, "  {found} found, {new} new ({stop:?})"),
                None => writeln!(out, "  {found} found, {new} new"),
            },
            CrawlEvent::BatchStored { .. } | CrawlEvent::Interrupted { .. } => Ok(()),
        };
    }
}
