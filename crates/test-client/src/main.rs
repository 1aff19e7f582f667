mod config;

use std::{
    io::BufRead,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration as StdDuration,
};

use clap::Parser;
use libpronet_client::{Client, ClientConfig, ClientObserver};
use libpronet_proto::UserId;
use libpronet_reactor::{Reactor, ReactorConfig, TimerWheel};
use tracing::{error, info, warn};
use tracing_subscriber::{Layer, filter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{FileConfig, pad_password};

/// Manual/demo client driving a single Session against a message server or
/// C2S relay hub port.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to a TOML config file (see `FileConfig` for fields).
    #[arg(short, long)]
    config: PathBuf,

    /// Destination user(s) for sent messages, as `class-id-inst`. Omit to
    /// address the root identity (an empty destination list on the wire).
    #[arg(long = "dst")]
    dst_users: Vec<String>,

    /// Send this message once on connect, then keep the Session open.
    #[arg(short, long)]
    message: Option<String>,

    /// Read lines from stdin and send each as a message until EOF.
    #[arg(short, long)]
    interactive: bool,

    /// Increase log verbosity (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

static KEEP_RUNNING: AtomicBool = AtomicBool::new(true);

struct PrintObserver;

impl ClientObserver for PrintObserver {
    fn on_ok(&self, my_user: UserId, my_public_ip: std::net::Ipv4Addr) {
        info!(user = %my_user, public_ip = %my_public_ip, "logged in");
    }

    fn on_recv(&self, payload: &[u8], charset: u16, src_user: UserId) {
        info!(src = %src_user, charset, text = %String::from_utf8_lossy(payload), "message received");
    }

    fn on_close(&self, error_code: i32, ssl_code: i32, tcp_connected: bool) {
        warn!(error_code, ssl_code, tcp_connected, "session closed");
        KEEP_RUNNING.store(false, Ordering::Release);
    }

    fn on_heartbeat(&self, peer_alive_tick: u64) {
        info!(peer_alive_tick, "heartbeat");
    }
}

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
    let user: UserId = match file_config.user.parse() {
        Ok(u) => u,
        Err(err) => {
            error!(%err, "invalid user id in config");
            std::process::exit(1);
        }
    };
    let dst_users: Vec<UserId> = match args.dst_users.iter().map(|s| s.parse()).collect() {
        Ok(v) => v,
        Err(err) => {
            error!(%err, "invalid --dst user id");
            std::process::exit(1);
        }
    };

    let reactor = match Reactor::new(ReactorConfig::default()) {
        Ok(r) => Arc::new(r),
        Err(err) => {
            error!(?err, "failed to start reactor");
            std::process::exit(1);
        }
    };
    let timers = Arc::new(TimerWheel::new(file_config.heartbeat_interval));
    let observer: Arc<dyn ClientObserver> = Arc::new(PrintObserver);

    let client_config = ClientConfig {
        user,
        password: pad_password(&file_config.password),
        mm_type: file_config.mm_type,
        session_type: file_config.session_type,
        service_id: 1,
        service_opt: 0,
        recv_buf_bytes: file_config.recv_buf_bytes,
        send_buf_bytes: file_config.send_buf_bytes,
        redline_bytes: file_config.redline_bytes,
    };

    info!(addr = %file_config.server_addr, %user, "connecting");
    let client = match Client::connect(reactor, file_config.server_addr, client_config, observer.clone()) {
        Ok(c) => c,
        Err(err) => {
            error!(?err, "connect failed");
            std::process::exit(1);
        }
    };
    Client::start_heartbeat(&timers, observer);

    if let Some(message) = &args.message {
        client.send_msg(message.as_bytes(), 0, &dst_users);
    }

    if args.interactive {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            if !KEEP_RUNNING.load(Ordering::Acquire) || client.is_closed() {
                break;
            }
            match line {
                Ok(line) => {
                    if !client.send_msg(line.as_bytes(), 0, &dst_users) {
                        warn!("send redline exceeded, message dropped");
                    }
                }
                Err(err) => {
                    warn!(?err, "stdin read error");
                    break;
                }
            }
        }
    }

    while KEEP_RUNNING.load(Ordering::Acquire) && !client.is_closed() {
        std::thread::sleep(StdDuration::from_millis(200));
    }
    client.close();
    info!("test client shutting down");
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
