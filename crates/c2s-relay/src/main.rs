mod config;

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration as StdDuration,
};

use clap::Parser;
use libpronet_reactor::{Reactor, ReactorConfig, TimerWheel};
use libpronet_timing::Duration;
use tracing::{error, info};
use tracing_subscriber::{Layer, filter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::FileConfig;

/// Cascade-to-server relay: a server toward downstream clients and a
/// client toward the upstream message server.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to a TOML config file (see `FileConfig` for fields).
    #[arg(short, long)]
    config: PathBuf,

    /// Number of reactor I/O worker threads.
    #[arg(long, default_value_t = 2)]
    io_threads: usize,

    /// Increase log verbosity (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

static KEEP_RUNNING: AtomicBool = AtomicBool::new(true);

fn main() {
    let args = Args::parse();
    enable_logging(args.verbose);
    set_ctrlc_handler();

    let text = match std::fs::read_to_string(&args.config) {
        Ok(text) => text,
        Err(err) => {
            error!(?err, path = %args.config.display(), "failed to read config file");
            std::process::exit(1);
        }
    };
    let file_config: FileConfig = match toml::from_str(&text) {
        Ok(c) => c,
        Err(err) => {
            error!(?err, "failed to parse config file");
            std::process::exit(1);
        }
    };
    let c2s_config = match file_config.into_c2s_config() {
        Ok(c) => c,
        Err(err) => {
            error!(%err, "invalid config");
            std::process::exit(1);
        }
    };

    let reactor = match Reactor::new(ReactorConfig { io_threads: args.io_threads, ..ReactorConfig::default() }) {
        Ok(r) => Arc::new(r),
        Err(err) => {
            error!(?err, "failed to start reactor");
            std::process::exit(1);
        }
    };
    let timers = Arc::new(TimerWheel::new(Duration::from_secs(30)));

    info!(uplink = %c2s_config.uplink_addr, downstream = %c2s_config.downstream_bind_addr, "starting c2s relay");
    if let Err(err) = libpronet_c2s::C2sNode::start(c2s_config, reactor, timers) {
        error!(?err, "failed to start c2s node");
        std::process::exit(1);
    }

    while KEEP_RUNNING.load(Ordering::Acquire) {
        std::thread::sleep(StdDuration::from_millis(200));
    }
    info!("c2s relay shutting down");
}

fn set_ctrlc_handler() {
    ctrlc::set_handler(|| {
        info!("received Ctrl-C, exiting");
        KEEP_RUNNING.store(false, Ordering::Release);
    })
    .expect("error setting Ctrl-C handler");
}

fn enable_logging(verbose: u8) {
    let verbosity = match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let filters = filter::Targets::new().with_default(verbosity);
    let fmt_layer = tracing_subscriber::fmt::layer().compact().with_filter(filters);
    tracing_subscriber::registry().with(fmt_layer).init();
}
