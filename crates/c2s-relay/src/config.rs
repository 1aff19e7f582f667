use std::net::SocketAddr;

use libpronet_c2s::C2sConfig;
use libpronet_proto::UserId;
use libpronet_timing::Duration;
use serde::Deserialize;

/// On-disk shape of a c2s-relay config file. Kept distinct from
/// [`C2sConfig`] because the wire-friendly forms (`self_user` as a
/// `"class-id-inst"` string, `password` as text) aren't how the library
/// crate wants to consume them.
#[derive(Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub uplink_addr: SocketAddr,
    pub downstream_bind_addr: SocketAddr,
    pub self_user: String,
    pub password: String,
    pub local_timeout: Duration,
    pub redial_interval: Duration,
    pub recv_buf_bytes: usize,
    pub send_buf_bytes: usize,
    pub downstream_redline_bytes: usize,
    pub uplink_redline_bytes: usize,
}

impl Default for FileConfig {
    fn default() -> Self {
        let defaults = C2sConfig::default();
        Self {
            uplink_addr: defaults.uplink_addr,
            downstream_bind_addr: defaults.downstream_bind_addr,
            self_user: defaults.self_user.to_string(),
            password: String::new(),
            local_timeout: defaults.local_timeout,
            redial_interval: defaults.redial_interval,
            recv_buf_bytes: defaults.recv_buf_bytes,
            send_buf_bytes: defaults.send_buf_bytes,
            downstream_redline_bytes: defaults.downstream_redline_bytes,
            uplink_redline_bytes: defaults.uplink_redline_bytes,
        }
    }
}

/// `CredentialRecord::password_hash` (see `libpronet-fabric::evaluate_login`)
/// stores the raw password zero-padded/truncated to 32 bytes, and the
/// handshake hash is sensitive to exactly which bytes get fed in; a client
/// must reproduce the same padding or its login hash will never match.
fn pad_password(password: &str) -> Vec<u8> {
    let bytes = password.as_bytes();
    let mut buf = vec![0u8; 32];
    let n = bytes.len().min(32);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf
}

impl FileConfig {
    pub fn into_c2s_config(self) -> Result<C2sConfig, String> {
        let self_user: UserId =
            self.self_user.parse().map_err(|err| format!("self_user: {err}"))?;
        Ok(C2sConfig {
            uplink_addr: self.uplink_addr,
            downstream_bind_addr: self.downstream_bind_addr,
            self_user,
            password: pad_password(&self.password),
            local_timeout: self.local_timeout,
            redial_interval: self.redial_interval,
            recv_buf_bytes: self.recv_buf_bytes,
            send_buf_bytes: self.send_buf_bytes,
            downstream_redline_bytes: self.downstream_redline_bytes,
            uplink_redline_bytes: self.uplink_redline_bytes,
        })
    }
}
