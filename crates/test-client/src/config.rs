use std::net::SocketAddr;

use libpronet_timing::Duration;
use serde::Deserialize;

fn default_recv_buf() -> usize {
    256 * 1024
}
fn default_send_buf() -> usize {
    256 * 1024
}
fn default_redline() -> usize {
    1024 * 1024
}

#[derive(Deserialize)]
pub struct FileConfig {
    pub server_addr: SocketAddr,
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub mm_type: u8,
    #[serde(default)]
    pub session_type: u8,
    #[serde(default = "default_recv_buf")]
    pub recv_buf_bytes: usize,
    #[serde(default = "default_send_buf")]
    pub send_buf_bytes: usize,
    #[serde(default = "default_redline")]
    pub redline_bytes: usize,
    pub heartbeat_interval: Duration,
}

/// See `libpronet-fabric::evaluate_login` and the matching note in
/// `message-server`/`c2s-relay`'s config: the credential store treats
/// `password_hash` as the raw password zero-padded to 32 bytes, so a
/// client must reproduce that padding for its login hash to match.
pub fn pad_password(password: &str) -> Vec<u8> {
    let bytes = password.as_bytes();
    let mut buf = vec![0u8; 32];
    let n = bytes.len().min(32);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf
}
