use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use portscan_svc::engine::{NmapEngine, ScanEngine};
use portscan_svc::orchestrator::ScanOrchestrator;
use portscan_svc::report::{self, ReportMeta, ReportStyle};
use portscan_svc::server::{self, AppState};
use portscan_svc::store::{FsReportStore, MemoryReportStore, ReportStore};
use portscan_svc::types::{
    ExtraArgs, ReportId, ScanProfile, ScanRequest, ScanResult, DEFAULT_PORT_SPEC,
};

/// portscan-svc: run nmap scans one at a time and keep their reports.
#[derive(Debug, Parser)]
#[command(name = "portscan-svc", version, about, long_about = None)]
struct Cli {
    /// Log level filter when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP API.
    Serve {
        #[arg(long, default_value = "127.0.0.1:5001")]
        bind: String,

        /// Persist reports in this directory instead of memory.
        #[arg(long)]
        reports_dir: Option<PathBuf>,

        /// Path to the nmap binary.
        #[arg(long, default_value = "nmap")]
        nmap: PathBuf,

        /// Static UI directory served for non-API paths.
        #[arg(long)]
        ui_dir: Option<PathBuf>,
    },
    /// Run one scan in the foreground and print the report.
    Scan {
        #[arg(short, long)]
        target: String,

        #[arg(short, long, default_value = "1-1000")]
        ports: String,

        #[arg(short, long, default_value = "default")]
        scripts: String,

        #[arg(long, default_value = "basic")]
        profile: ScanProfile,

        /// Extra engine flags, whitespace separated.
        #[arg(long, allow_hyphen_values = true)]
        extra: Option<String>,

        #[arg(short, long, value_enum, default_value_t = Style::Detailed)]
        format: Style,

        /// Also store the report in this directory.
        #[arg(long)]
        reports_dir: Option<PathBuf>,

        #[arg(long, default_value = "nmap")]
        nmap: PathBuf,
    },
    /// List stored reports.
    List {
        #[arg(long, default_value = "reports")]
        reports_dir: PathBuf,
    },
    /// Print one stored report.
    Show {
        #[arg(long, default_value = "reports")]
        reports_dir: PathBuf,

        id: ReportId,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Style {
    Detailed,
    Simple,
    Json,
}

impl From<Style> for ReportStyle {
    fn from(s: Style) -> Self {
        match s {
            Style::Detailed => ReportStyle::Detailed,
            Style::Simple => ReportStyle::Simple,
            Style::Json => ReportStyle::Json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    match cli.command {
        Command::Serve {
            bind,
            reports_dir,
            nmap,
            ui_dir,
        } => serve(&bind, reports_dir.as_deref(), nmap, ui_dir).await,
        Command::Scan {
            target,
            ports,
            scripts,
            profile,
            extra,
            format,
            reports_dir,
            nmap,
        } => {
            let mut req = ScanRequest::new(target)
                .ports(ports)
                .scripts(scripts)
                .profile(profile);
            if let Some(extra) = extra {
                req = req.extra(ExtraArgs::Line(extra));
            }
            scan_once(req, format.into(), reports_dir.as_deref(), NmapEngine::new(nmap)).await
        }
        Command::List { reports_dir } => list_reports(&reports_dir).await,
        Command::Show { reports_dir, id } => show_report(&reports_dir, &id).await,
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn serve(
    bind: &str,
    reports_dir: Option<&Path>,
    nmap: PathBuf,
    ui_dir: Option<PathBuf>,
) -> Result<()> {
    let engine = NmapEngine::new(nmap);
    if !engine.is_available().await {
        warn!("nmap binary not found; scans will fail until it is installed");
    }
    let store: Arc<dyn ReportStore> = match reports_dir {
        Some(dir) => Arc::new(
            FsReportStore::open(dir)
                .await
                .with_context(|| format!("failed to open report directory {}", dir.display()))?,
        ),
        None => Arc::new(MemoryReportStore::new()),
    };
    let orchestrator = ScanOrchestrator::new(Arc::new(engine), store.clone());

    let shutdown = CancellationToken::new();
    let on_ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        on_ctrl_c.cancel();
    });

    server::spawn_server(bind, AppState::new(orchestrator), ui_dir, shutdown).await?;

    let left = store.len().await;
    if reports_dir.is_none() && left > 0 {
        warn!(reports = left, "in-memory reports discarded on shutdown");
    }
    info!("server stopped");
    Ok(())
}

async fn scan_once(
    req: ScanRequest,
    style: ReportStyle,
    reports_dir: Option<&Path>,
    engine: NmapEngine,
) -> Result<()> {
    let arguments = portscan_svc::args::build(
        req.profile,
        &req.port_spec,
        &req.script_selection,
        req.extra_args.as_ref(),
    );
    if req.profile == ScanProfile::Udp && req.port_spec == DEFAULT_PORT_SPEC {
        info!("using the common UDP port list");
    }
    println!("Target    : {}", req.host);
    println!("Ports     : {}", req.port_spec);
    println!("Scripts   : {}", req.script_selection);
    println!("Running   : nmap {} {}", arguments.join(" "), req.host);

    let result = engine
        .scan(&req.host, &arguments)
        .await
        .context("scan failed")?;

    let meta = ReportMeta::from_request(&req, arguments, OffsetDateTime::now_utc());
    println!("\n{}", report::format(&result, &meta, style));
    print_summary(&result);

    if let Some(dir) = reports_dir {
        let store = FsReportStore::open(dir).await?;
        let stored = report::build_report(&result, meta);
        let (id, name) = (stored.id, stored.name.clone());
        store.create(stored).await?;
        println!("Saved report {name} ({id}) in {}", dir.display());
    }
    Ok(())
}

fn print_summary(result: &ScanResult) {
    println!("{}", "=".repeat(50));
    println!("SUMMARY");
    println!("{}", "=".repeat(50));
    if result.hosts.is_empty() {
        println!("No hosts responded.");
    }
    for host in &result.hosts {
        println!("Host: {} ({})", host.address, host.state);
        let open = report::open_ports(host);
        if open.is_empty() {
            println!("  no open ports found");
        }
        for p in open {
            println!("  {p}");
        }
    }
}

async fn list_reports(dir: &Path) -> Result<()> {
    let store = FsReportStore::open(dir).await?;
    let reports = store.list().await?;
    if reports.is_empty() {
        println!("No reports available.");
        return Ok(());
    }

    let name_w = reports.iter().map(|r| r.name.len()).max().unwrap_or(4).max(4);
    let host_w = reports.iter().map(|r| r.host.len()).max().unwrap_or(4).max(4);
    println!(
        "{:<36}  {:<name_w$}  {:<host_w$}  {:>10}",
        "id", "name", "host", "bytes",
        name_w = name_w,
        host_w = host_w
    );
    for r in &reports {
        println!(
            "{:<36}  {:<name_w$}  {:<host_w$}  {:>10}",
            r.id.to_string(),
            r.name,
            r.host,
            r.size_bytes,
            name_w = name_w,
            host_w = host_w
        );
    }
    Ok(())
}

async fn show_report(dir: &Path, id: &ReportId) -> Result<()> {
    let store = FsReportStore::open(dir).await?;
    let report = store.get(id).await?;
    println!("=== {} ===", report.name);
    println!("{}", report.content);
    Ok(())
}
