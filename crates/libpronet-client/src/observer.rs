use std::net::Ipv4Addr;

use libpronet_proto::UserId;

/// Upcalls delivered from the reactor thread the client's Session is bound
/// to. `on_ok` fires exactly once per successful handshake; exactly one
/// `on_close` follows, either after `on_ok` or as a terminal handshake
/// failure, and no further upcall follows it.
pub trait ClientObserver: Send + Sync {
    fn on_ok(&self, my_user: UserId, my_public_ip: Ipv4Addr);
    fn on_recv(&self, payload: &[u8], charset: u16, src_user: UserId);
    fn on_close(&self, error_code: i32, ssl_code: i32, tcp_connected: bool);
    fn on_heartbeat(&self, peer_alive_tick: u64);
}
