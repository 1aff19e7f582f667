use std::net::SocketAddr;

use libpronet_proto::UserId;
use libpronet_timing::Duration;

/// Tuning and identity parameters for one C2S relay node.
#[derive(Clone, Debug)]
pub struct C2sConfig {
    /// Address of the root server this node dials out to.
    pub uplink_addr: SocketAddr,
    /// Address this node listens on for downstream client connections.
    pub downstream_bind_addr: SocketAddr,
    /// This node's own identity on the uplink, drawn from the server class.
    pub self_user: UserId,
    pub password: Vec<u8>,
    /// How long a downstream login may sit pending a server reply before
    /// this node gives up and closes the connection.
    pub local_timeout: Duration,
    /// Delay between uplink redial attempts after a disconnect.
    pub redial_interval: Duration,
    pub recv_buf_bytes: usize,
    pub send_buf_bytes: usize,
    pub downstream_redline_bytes: usize,
    pub uplink_redline_bytes: usize,
}

impl Default for C2sConfig {
    fn default() -> Self {
        Self {
            uplink_addr: "127.0.0.1:8700".parse().unwrap(),
            downstream_bind_addr: "0.0.0.0:8701".parse().unwrap(),
            self_user: UserId::new(libpronet_proto::CLASS_SERVER, 10, 0),
            password: Vec::new(),
            local_timeout: Duration::from_secs(20),
            redial_interval: Duration::from_secs(5),
            recv_buf_bytes: 256 * 1024,
            send_buf_bytes: 256 * 1024,
            downstream_redline_bytes: 1024 * 1024,
            uplink_redline_bytes: 8 * 1024 * 1024,
        }
    }
}
