use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use homepage_scan_rs::catalog::{CatalogStore, SqliteCatalog};
use homepage_scan_rs::config::EngineConfig;
use homepage_scan_rs::fetch::WebFetcher;
use homepage_scan_rs::icons::IconStore;
use homepage_scan_rs::orchestrator::ScanSupervisor;
use homepage_scan_rs::prober::NmapProber;
use homepage_scan_rs::server::{self, AppState};
use homepage_scan_rs::status::ScanStatus;
use homepage_scan_rs::types::{ScopeId, ServiceRecord};

/// homepage-scan-rs — discovers web services on your LAN and keeps them in a curated launch-page catalog.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "homepage-scan-rs",
    version,
    about = "Discovers web services on your LAN and keeps them in a curated launch-page catalog.",
    long_about = None
)]
struct Cli {
    /// Address the HTTP API listens on.
    #[arg(long, env = "HOMESCAN_BIND", default_value = "127.0.0.1:8000")]
    bind: String,

    /// SQLite catalog file; created on first start.
    #[arg(long, env = "HOMESCAN_DATABASE", default_value = "services.db")]
    database: PathBuf,

    /// Directory served under /static. Favicons are saved to its `icons` subdirectory.
    #[arg(long = "static-dir", env = "HOMESCAN_STATIC_DIR", default_value = "static")]
    static_dir: PathBuf,

    /// Built single-page UI to serve for every non-API path (optional).
    #[arg(long = "ui-dir", env = "HOMESCAN_UI_DIR")]
    ui_dir: Option<PathBuf>,

    /// Explicit path to the nmap binary. Searched on PATH and common locations when omitted.
    #[arg(long, env = "HOMESCAN_NMAP")]
    nmap: Option<PathBuf>,

    /// Timeout for each web probe and favicon download, in milliseconds.
    #[arg(long = "fetch-timeout-ms", env = "HOMESCAN_FETCH_TIMEOUT_MS", default_value_t = 3000)]
    fetch_timeout_ms: u64,

    /// Run a single scan of TARGET (address, CIDR or hostname), print the catalog and exit.
    #[arg(long, value_name = "TARGET")]
    scan: Option<String>,

    /// Profile the one-shot scan writes into.
    #[arg(long, default_value_t = 1, requires = "scan")]
    profile: ScopeId,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut engine = EngineConfig::with_static_dir(&cli.static_dir);
    engine.fetch_timeout = Duration::from_millis(cli.fetch_timeout_ms);
    engine.nmap_path = cli.nmap.clone();

    std::fs::create_dir_all(&engine.icons_dir)
        .with_context(|| format!("failed to create {}", engine.icons_dir.display()))?;

    let catalog: Arc<dyn CatalogStore> = Arc::new(
        SqliteCatalog::open_or_create(&cli.database)
            .with_context(|| format!("failed to open catalog {}", cli.database.display()))?,
    );
    let prober = NmapProber::locate(engine.nmap_path.as_deref());
    let nmap_path = prober.binary().map(Path::to_path_buf);
    let fetcher = WebFetcher::new(
        engine.fetch_timeout,
        IconStore::new(&engine.icons_dir, engine.icons_url_prefix.clone()),
    )
    .context("failed to build http client")?;

    let scans = ScanSupervisor::new(ScanStatus::new(), Arc::new(prober), fetcher, catalog);

    if let Some(target) = cli.scan.as_deref() {
        return run_once(&scans, target, cli.profile).await;
    }

    info!(
        bind = %cli.bind,
        database = %cli.database.display(),
        static_dir = %cli.static_dir.display(),
        nmap = ?nmap_path,
        "starting homepage-scan-rs"
    );
    let app = server::router(
        AppState { scans, nmap_path },
        &cli.static_dir,
        cli.ui_dir.as_deref(),
    );
    server::spawn_server(&cli.bind, app).await
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .init();
}

async fn run_once(scans: &ScanSupervisor, target: &str, profile: ScopeId) -> Result<()> {
    let target = scans.start(target, profile).await?;
    println!("Scanning {target} into profile {profile} (Ctrl+C to cancel)...");

    let interrupt = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            scans.cancel().await.ok();
        }
        std::future::pending::<()>().await
    };
    tokio::select! {
        _ = scans.wait() => {}
        _ = interrupt => {}
    }

    let run = scans.status().snapshot().await;
    for line in run.logs.lines() {
        println!("  {line}");
    }
    let services = scans.catalog().list_visible(profile)?;
    print_services_table(&services);
    Ok(())
}

fn print_services_table(services: &[ServiceRecord]) {
    let mut name_w = "name".len();
    let mut url_w = "url".len();
    for s in services {
        name_w = name_w.max(s.display_name().len().min(40));
        url_w = url_w.max(s.url.len());
    }
    let port_w = 5usize;
    let lock_w = "locked".len();

    println!("\nServices: {}", services.len());
    println!(
        "{:<name_w$}  {:>port_w$}  {:<url_w$}  {:<lock_w$}",
        "name", "port", "url", "locked",
    );
    println!(
        "{:-<name_w$}  {:-<port_w$}  {:-<url_w$}  {:-<lock_w$}",
        "", "", "", "",
    );
    for s in services {
        let mut name = s.display_name().to_string();
        if name.chars().count() > 40 {
            name = name.chars().take(40).collect();
        }
        println!(
            "{:<name_w$}  {:>port_w$}  {:<url_w$}  {:<lock_w$}",
            name,
            s.port,
            s.url,
            if s.is_manual_lock { "yes" } else { "no" },
        );
    }
}
