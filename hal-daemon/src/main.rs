//! hald: hardware discovery daemon
//!
//! - Coldplugs the devices present at startup from sysfs
//! - Accepts live hotplug events as JSON lines on a Unix socket
//! - Drives every event through the hotplug lifecycle controller

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use hal_core::HotplugConfig;
use hal_hotplug::{
    coldplug_events, ControllerConfig, GenericHandler, HotplugController, ProcessProber,
    RuleMerger, ScriptCalloutRunner, SysfsTaxonomy,
};

mod socket;
mod monitor;

#[derive(Parser, Debug)]
#[command(name = "hald")]
#[command(about = "Hardware discovery daemon")]
struct Args {
    /// Sysfs root to coldplug from
    #[arg(long)]
    sysfs_root: Option<PathBuf>,

    /// Directory of TOML merge rules
    #[arg(long)]
    rules_dir: Option<PathBuf>,

    /// Directory searched for callouts and probers (repeatable)
    #[arg(long = "callout-dir")]
    callout_dirs: Vec<PathBuf>,

    /// Unix socket for live hotplug events
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Prober deadline in milliseconds
    #[arg(long)]
    probe_timeout_ms: Option<u64>,

    /// Skip enumerating devices already present
    #[arg(long)]
    no_coldplug: bool,

    /// Coldplug, print the device list as JSON and exit
    #[arg(long)]
    dump: bool,
}

impl Args {
    fn apply(self, mut config: HotplugConfig) -> (HotplugConfig, bool) {
        if let Some(root) = self.sysfs_root {
            config.sysfs_root = root;
        }
        if let Some(dir) = self.rules_dir {
            config.rules_dir = dir;
        }
        if !self.callout_dirs.is_empty() {
            config.callout_dirs = self.callout_dirs;
        }
        if let Some(socket) = self.socket {
            config.event_socket = socket;
        }
        if let Some(ms) = self.probe_timeout_ms {
            config.probe_timeout = Duration::from_millis(ms);
        }
        if self.no_coldplug {
            config.coldplug = false;
        }
        (config, self.dump)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from /etc/hald/environment (if exists)
    hal_core::config::load_environment();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hald=info".parse()?)
                .add_directive("hal_hotplug=info".parse()?)
                .add_directive("hal_core=info".parse()?),
        )
        .init();

    let (config, dump) = Args::parse().apply(HotplugConfig::from_env());
    info!(?config, "Starting hald");

    let controller = build_controller(&config)?;

    if config.coldplug {
        coldplug(&controller, &config).await?;
    }

    if dump {
        println!("{}", controller.store().export_json().await?);
        return Ok(());
    }

    let store_watch = tokio::spawn(monitor::log_store_events(controller.clone()));
    let listener = socket::serve(config.event_socket.clone(), controller.clone());

    tokio::select! {
        res = listener => {
            error!("Event socket exited: {:?}", res);
        }
        res = tokio::signal::ctrl_c() => {
            match res {
                Ok(()) => info!("Received shutdown signal"),
                Err(e) => warn!("Failed to listen for shutdown signal: {}", e),
            }
        }
    }

    store_watch.abort();
    socket::cleanup(&config.event_socket);
    info!(stats = ?controller.stats(), "hald stopped");
    Ok(())
}

fn build_controller(config: &HotplugConfig) -> Result<HotplugController> {
    let registry = GenericHandler::default_registry(&config.udi_prefix);
    info!(kinds = ?registry.kinds(), "Registered device handlers");

    let merger = RuleMerger::load_dir(&config.rules_dir)
        .with_context(|| format!("loading rules from {}", config.rules_dir.display()))?;

    Ok(HotplugController::builder(registry)
        .merge(Arc::new(merger))
        .callouts(Arc::new(ScriptCalloutRunner::new(
            config.callout_dirs.clone(),
            config.callout_timeout,
        )))
        .prober(Arc::new(ProcessProber::new(config.callout_dirs.clone())))
        .config(ControllerConfig::from(config))
        .build())
}

async fn coldplug(controller: &HotplugController, config: &HotplugConfig) -> Result<()> {
    let taxonomy = SysfsTaxonomy::new(config.sysfs_root.clone());
    let snapshot = tokio::task::spawn_blocking(move || taxonomy.scan())
        .await
        .context("sysfs scan task failed")??;

    let queued = controller.enqueue_all(coldplug_events(&snapshot));
    info!("Queued {} coldplug events", queued);
    controller.run_until_idle().await;

    let stats = controller.stats();
    info!(
        devices = controller.store().len().await,
        committed = stats.committed,
        ignored = stats.ignored,
        discarded = stats.discarded,
        "Coldplug complete"
    );
    Ok(())
}
