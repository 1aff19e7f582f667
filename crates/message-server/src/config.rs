use std::net::{Ipv4Addr, SocketAddr};

use libpronet_timing::Duration;
use serde::Deserialize;

fn default_max_instances() -> u32 {
    1
}

/// One row of the credential table. The real credential store (typically
/// SQLite-backed) is an external collaborator; this crate only knows how
/// to build an in-memory one from a config file, for standalone/demo use.
#[derive(Deserialize, Clone)]
pub struct CredentialEntry {
    /// `"class-id-inst"`, e.g. `2-5-1`, or `2-0-0` to only ever appear as
    /// a template is meaningless here — credential rows name a concrete id.
    pub user: String,
    pub password: String,
    #[serde(default = "default_max_instances")]
    pub max_instances: u32,
    #[serde(default)]
    pub ip_binding: Option<Ipv4Addr>,
    #[serde(default)]
    pub is_c2s_node: bool,
}

#[derive(Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub hub_bind_addr: SocketAddr,
    pub heartbeat_interval: Duration,
    pub handshake_timeout: Duration,
    pub max_frame_bytes: u32,
    pub recv_buf_bytes: usize,
    pub send_buf_bytes: usize,
    pub enduser_redline_bytes: usize,
    pub c2s_redline_bytes: usize,
    /// Per-acceptor bound on connections still mid-handshake (spec's
    /// `PRO_ACCEPTOR_LENGTH`); new connections beyond it are closed
    /// immediately, before the nonce is sent.
    pub pending_accept_bound: usize,
    /// Also listen on the POSIX local mirror socket for this hub port.
    pub unix_mirror: bool,
    pub credentials: Vec<CredentialEntry>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            hub_bind_addr: "0.0.0.0:8700".parse().unwrap(),
            heartbeat_interval: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(20),
            max_frame_bytes: 96 * 1024 * 1024,
            recv_buf_bytes: 256 * 1024,
            send_buf_bytes: 256 * 1024,
            enduser_redline_bytes: 1024 * 1024,
            c2s_redline_bytes: 8 * 1024 * 1024,
            pending_accept_bound: 8000,
            unix_mirror: cfg!(unix),
            credentials: Vec::new(),
        }
    }
}
