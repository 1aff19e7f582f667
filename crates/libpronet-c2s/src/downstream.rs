use std::{
    net::Ipv4Addr,
    sync::{Arc, Mutex, Weak},
};

use libpronet_proto::{
    RTP_MSG_HEADER0_LEN, RTP_SESSION_INFO_LEN, RtpMsgHeader, RtpMsgHeader0, RtpSessionInfo,
    ServerHandshake, ServerHandshakeState, UserId,
};
use libpronet_reactor::{Packet, Transport, TransportObserver};
use mio::net::TcpStream;
use tracing::warn;

use crate::node::NodeInner;

pub(crate) type DownstreamTransport = Transport<TcpStream, DownstreamBridge>;
pub(crate) type DownstreamHandle = Arc<Mutex<Option<DownstreamTransport>>>;

/// Drives the server-side handshake for one downstream client connection,
/// then forwards established traffic to the owning node for uplink relay.
/// Login decisions are not made locally: once the login header arrives this
/// bridge hands off to [`crate::node::forward_login_upstream`] and waits for
/// the uplink server's verdict.
pub(crate) struct DownstreamBridge {
    pub(crate) handshake: Arc<Mutex<ServerHandshake>>,
    pub(crate) self_handle: DownstreamHandle,
    pub(crate) node: Weak<NodeInner>,
    pub(crate) peer_ip: Ipv4Addr,
    /// Set by the node once the uplink server confirms the login; shared so
    /// the node can populate it without reaching back through the Transport.
    pub(crate) established_user: Arc<Mutex<Option<UserId>>>,
}

impl DownstreamBridge {
    pub(crate) fn transport(&self) -> Option<DownstreamTransport> {
        self.self_handle.lock().unwrap().clone()
    }
}

impl TransportObserver for DownstreamBridge {
    fn on_raw_recv(&mut self, buf: &[u8]) -> usize {
        let state = self.handshake.lock().unwrap().state();
        match state {
            ServerHandshakeState::AwaitServiceId => {
                if buf.len() < 4 {
                    return 0;
                }
                let mut reply = [0u8; 4];
                reply.copy_from_slice(&buf[..4]);
                let mut hs = self.handshake.lock().unwrap();
                if hs.on_service_id_reply(&reply).is_err() {
                    drop(hs);
                    if let Some(t) = self.transport() {
                        t.close(-1, 0);
                    }
                    return 4;
                }
                hs.hand_off();
                4
            }
            ServerHandshakeState::AwaitLoginHdr => {
                let needed = RTP_SESSION_INFO_LEN + RTP_MSG_HEADER0_LEN;
                if buf.len() < needed {
                    return 0;
                }
                let info = match RtpSessionInfo::decode(&mut &buf[..RTP_SESSION_INFO_LEN]) {
                    Ok(v) => v,
                    Err(err) => {
                        warn!(?err, "malformed downstream login session info");
                        if let Some(t) = self.transport() {
                            t.close(-1, 0);
                        }
                        return 0;
                    }
                };
                let header0 =
                    match RtpMsgHeader0::decode(&mut &buf[RTP_SESSION_INFO_LEN..needed]) {
                        Ok(v) => v,
                        Err(err) => {
                            warn!(?err, "malformed downstream login header");
                            if let Some(t) = self.transport() {
                                t.close(-1, 0);
                            }
                            return 0;
                        }
                    };
                let req = {
                    let mut hs = self.handshake.lock().unwrap();
                    match hs.on_login_header(&info, &header0) {
                        Ok(req) => req,
                        Err(err) => {
                            warn!(?err, "login header out of order");
                            if let Some(t) = self.transport() {
                                t.close(-1, 0);
                            }
                            return needed;
                        }
                    }
                };
                let (Some(node), Some(transport)) = (self.node.upgrade(), self.transport()) else {
                    return needed;
                };
                transport.suspend_recv();
                crate::node::forward_login_upstream(
                    &node,
                    transport,
                    self.handshake.clone(),
                    self.established_user.clone(),
                    req,
                    self.peer_ip,
                );
                needed
            }
            _ => 0,
        }
    }

    fn on_packet(&mut self, packet: Packet) {
        let Some(node) = self.node.upgrade() else { return };
        let Some(src) = *self.established_user.lock().unwrap() else {
            warn!("downstream data frame before login completed");
            return;
        };
        let mut cursor = &packet.payload[..];
        match RtpMsgHeader::decode(&mut cursor) {
            Ok(header) => crate::node::forward_downstream_packet(&node, src, header, cursor.to_vec()),
            Err(err) => warn!(?err, "malformed downstream frame"),
        }
    }

    fn on_close(&mut self, _error_code: i32, _ssl_code: i32) {
        if let Some(node) = self.node.upgrade() {
            let established = *self.established_user.lock().unwrap();
            crate::node::handle_downstream_close(&node, established);
        }
    }
}
