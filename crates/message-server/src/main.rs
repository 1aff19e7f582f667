mod config;
mod node;
mod session;
#[cfg(unix)]
mod unix_mirror;

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration as StdDuration,
};

use clap::Parser;
use libpronet_fabric::{CredentialRecord, InMemoryCredentialStore};
use libpronet_proto::UserId;
use libpronet_reactor::{Reactor, ReactorConfig, TimerWheel};
use tracing::{error, info};
use tracing_subscriber::{Layer, filter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::FileConfig;

/// Root message server: authenticates direct and C2S-forwarded logins and
/// fans out messages by destination user.
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

    let credentials = match build_credential_store(&file_config) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!(%err, "invalid credential table");
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
    let timers = Arc::new(TimerWheel::new(file_config.heartbeat_interval));

    let hub_addr = file_config.hub_bind_addr;
    info!(addr = %hub_addr, "starting message server");
    if let Err(err) = node::MessageServer::start(file_config, credentials, reactor, timers) {
        error!(?err, "failed to start message server");
        std::process::exit(1);
    }

    while KEEP_RUNNING.load(Ordering::Acquire) {
        std::thread::sleep(StdDuration::from_millis(200));
    }
    info!("message server shutting down");
}

fn build_credential_store(config: &FileConfig) -> Result<InMemoryCredentialStore, String> {
    let store = InMemoryCredentialStore::new();
    for entry in &config.credentials {
        let user: UserId = entry.user.parse().map_err(|err| format!("credentials[{}]: {err}", entry.user))?;
        // CredentialRecord::password_hash stands in for the raw password
        // (see libpronet-fabric::evaluate_login), so the config's
        // plaintext password is carried verbatim, padded/truncated to fit.
        let bytes = entry.password.as_bytes();
        let mut password_hash = [0u8; 32];
        let n = bytes.len().min(32);
        password_hash[..n].copy_from_slice(&bytes[..n]);
        store.insert(
            user,
            CredentialRecord {
                password_hash,
                max_instances: entry.max_instances,
                ip_binding: entry.ip_binding,
                is_c2s_node: entry.is_c2s_node,
            },
        );
    }
    Ok(store)
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
