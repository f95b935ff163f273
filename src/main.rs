use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use auralink_dashboard::{Dashboard, FileStore, Settings, SystemClock};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "auralink")]
#[command(about = "Headless live telemetry dashboard for an MQTT sensor device")]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Broker URL (mqtt://, mqtts://, ws:// or wss://)
    #[arg(short, long)]
    broker: Option<String>,

    /// Broker username
    #[arg(short, long)]
    username: Option<String>,

    /// Broker password
    #[arg(short, long, requires = "username")]
    password: Option<String>,

    /// Directory holding the session lease shared by all instances
    #[arg(long)]
    session_dir: Option<PathBuf>,

    /// Number of time slots kept for charting
    #[arg(short, long)]
    window: Option<usize>,

    /// Seconds between status log lines
    #[arg(long, default_value = "10")]
    status_interval: u64,

    /// Export the final snapshot to a JSON file on exit
    #[arg(short, long)]
    export: Option<PathBuf>,
}

impl Args {
    /// CLI flags win over file and environment settings.
    fn apply(&self, settings: &mut Settings) {
        if let Some(broker) = &self.broker {
            settings.broker.url = broker.clone();
        }
        if let Some(username) = &self.username {
            settings.broker.username = Some(username.clone());
        }
        if let Some(password) = &self.password {
            settings.broker.password = Some(password.clone());
        }
        if let Some(dir) = &self.session_dir {
            settings.session.dir = dir.clone();
        }
        if let Some(window) = self.window {
            settings.window_size = window;
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let mut settings = Settings::load(args.config.as_deref()).context("Failed to load config")?;
    args.apply(&mut settings);
    settings.validate()?;

    let status_interval = Duration::from_secs(args.status_interval.max(1));
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(settings, status_interval, args.export))
}

async fn run(settings: Settings, status_interval: Duration, export: Option<PathBuf>) -> Result<()> {
    let store = FileStore::open(&settings.session.dir).with_context(|| {
        format!(
            "Failed to open session directory {}",
            settings.session.dir.display()
        )
    })?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut dashboard =
        Dashboard::from_settings(&settings, Arc::new(store), Arc::new(SystemClock), tx);

    info!(broker = %settings.broker.url, "Starting dashboard");

    // Periodic status line in place of a rendered view
    let mut snapshots = dashboard.watch_snapshot();
    let reporter = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(status_interval);
        loop {
            ticker.tick().await;
            let snap = snapshots.borrow_and_update().clone();
            info!(
                status = %snap.status,
                slots = snap.labels.len(),
                subscriptions = snap.active_subscriptions(),
                readings = ?snap.readings,
                "Dashboard status"
            );
        }
    });

    dashboard
        .run(&mut rx, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                // Without a signal handler the process runs until killed
                warn!("Failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;
    reporter.abort();

    if let Some(path) = export {
        dashboard.snapshot().export(&path)?;
        info!("Exported dashboard snapshot to: {}", path.display());
    }

    Ok(())
}
