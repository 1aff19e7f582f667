use std::{
    io::{Read, Write},
    net::Ipv4Addr,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use libpronet_fabric::{C2sControlMessage, LinkContext, LinkSender, evaluate_login, route_inbound};
use libpronet_proto::{
    RTP_MSG_HEADER0_LEN, RTP_SESSION_INFO_LEN, RtpMsgHeader, RtpMsgHeader0, RtpSessionInfo,
    ServerHandshake, ServerHandshakeState, UserId,
};
use libpronet_reactor::{Packet, SocketTuning, Transport, TransportObserver};
use mio::event::Source;
use tracing::{info, warn};

use crate::node::NodeInner;

pub(crate) type ServerTransport<S> = Transport<S, ServerBridge<S>>;
pub(crate) type ServerHandle<S> = Arc<Mutex<Option<ServerTransport<S>>>>;

/// Set once the handshake's login step succeeds; read only from this
/// bridge's own upcalls, which the Transport contract serializes onto a
/// single reactor worker, so no synchronization is needed here.
struct Established {
    user: UserId,
    is_c2s: bool,
}

/// Drives the server-side handshake (§4.3) and, once established, routes
/// or relays traffic for one accepted base connection. Generic over the
/// stream type so the same logic serves both the TCP hub listener and the
/// POSIX local mirror listener.
pub(crate) struct ServerBridge<S>
where
    S: Read + Write + Source + SocketTuning + Send + 'static,
{
    pub(crate) handshake: ServerHandshake,
    pub(crate) self_handle: ServerHandle<S>,
    pub(crate) node: Weak<NodeInner>,
    pub(crate) peer_ip: Ipv4Addr,
    pub(crate) counted_as_pending: bool,
    /// Flipped once, on login success or on close, so a handshake-timeout
    /// timer scheduled by the caller can tell a stalled handshake from one
    /// that already settled.
    pub(crate) resolved: Arc<AtomicBool>,
    established: Option<Established>,
}

impl<S> ServerBridge<S>
where
    S: Read + Write + Source + SocketTuning + Send + 'static,
{
    /// `handshake` is expected to already be past `Accepted` (i.e.
    /// `send_nonce` was called on it) so the caller can send the nonce
    /// bytes on the freshly created Transport right after this bridge is
    /// installed as its observer.
    pub(crate) fn new(
        handshake: ServerHandshake,
        self_handle: ServerHandle<S>,
        node: Weak<NodeInner>,
        peer_ip: Ipv4Addr,
        resolved: Arc<AtomicBool>,
    ) -> Self {
        Self { handshake, self_handle, node, peer_ip, counted_as_pending: true, resolved, established: None }
    }

    fn transport(&self) -> Option<ServerTransport<S>> {
        self.self_handle.lock().unwrap().clone()
    }

    /// Leaves the acceptor's pending-connection bound exactly once, either
    /// when the login resolves or when the socket closes beforehand.
    fn leave_pending(&mut self) {
        if self.counted_as_pending {
            self.counted_as_pending = false;
            self.resolved.store(true, Ordering::Release);
            if let Some(node) = self.node.upgrade() {
                node.pending_count.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }
}

impl<S> TransportObserver for ServerBridge<S>
where
    S: Read + Write + Source + SocketTuning + Send + 'static,
{
    fn on_raw_recv(&mut self, buf: &[u8]) -> usize {
        match self.handshake.state() {
            ServerHandshakeState::AwaitServiceId => {
                if buf.len() < 4 {
                    return 0;
                }
                let mut reply = [0u8; 4];
                reply.copy_from_slice(&buf[..4]);
                if self.handshake.on_service_id_reply(&reply).is_err() {
                    if let Some(t) = self.transport() {
                        t.close(-1, 0);
                    }
                    return 4;
                }
                self.handshake.hand_off();
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
                        warn!(?err, "malformed login session info");
                        if let Some(t) = self.transport() {
                            t.close(-1, 0);
                        }
                        return 0;
                    }
                };
                let header0 = match RtpMsgHeader0::decode(&mut &buf[RTP_SESSION_INFO_LEN..needed]) {
                    Ok(v) => v,
                    Err(err) => {
                        warn!(?err, "malformed login header");
                        if let Some(t) = self.transport() {
                            t.close(-1, 0);
                        }
                        return 0;
                    }
                };
                let req = match self.handshake.on_login_header(&info, &header0) {
                    Ok(req) => req,
                    Err(err) => {
                        warn!(?err, "login header out of order");
                        if let Some(t) = self.transport() {
                            t.close(-1, 0);
                        }
                        return needed;
                    }
                };

                let Some(node) = self.node.upgrade() else { return needed };
                match evaluate_login(&req, self.peer_ip, node.credentials.as_ref(), &node.registry, &node.dynamic_ids)
                {
                    Ok(outcome) => {
                        let is_c2s = node
                            .credentials
                            .lookup(&outcome.assigned_user)
                            .map(|record| record.is_c2s_node)
                            .unwrap_or(false);
                        let ack = self.handshake.accept(outcome.assigned_user, outcome.observed_ip);
                        let mut ack_bytes = Vec::new();
                        if ack.encode(&mut ack_bytes).is_err() {
                            if let Some(t) = self.transport() {
                                t.close(-1, 0);
                            }
                            return needed;
                        }
                        let Some(transport) = self.transport() else { return needed };
                        transport.send_raw(ack_bytes);
                        transport.set_mode(node.frame_mode());

                        let redline =
                            if is_c2s { node.config.c2s_redline_bytes } else { node.config.enduser_redline_bytes };
                        let sender: Arc<dyn LinkSender> = Arc::new(transport.clone());
                        let link = LinkContext::new(outcome.assigned_user, is_c2s, redline, sender);
                        node.registry.register_base(link);

                        self.established = Some(Established { user: outcome.assigned_user, is_c2s });
                        self.leave_pending();
                        info!(user = %outcome.assigned_user, is_c2s, "login accepted");
                    }
                    Err(err) => {
                        warn!(?err, "login rejected");
                        self.handshake.reject();
                        self.leave_pending();
                        if let Some(t) = self.transport() {
                            t.close(-1, 0);
                        }
                    }
                }
                needed
            }
            _ => 0,
        }
    }

    fn on_packet(&mut self, packet: Packet) {
        let Some(node) = self.node.upgrade() else { return };
        let Some(established) = self.established.as_ref() else {
            warn!("data frame before login completed");
            return;
        };
        let src = established.user;
        let is_c2s = established.is_c2s;

        let mut cursor = &packet.payload[..];
        let header = match RtpMsgHeader::decode(&mut cursor) {
            Ok(header) => header,
            Err(err) => {
                warn!(?err, "malformed message envelope");
                return;
            }
        };

        if is_c2s && header.dst_users.iter().any(UserId::is_c2s_signal) {
            match std::str::from_utf8(cursor).ok().and_then(C2sControlMessage::decode) {
                Some(msg) => crate::node::handle_control_from_c2s(&node, src, msg),
                None => warn!("unparseable control message from c2s link"),
            }
            return;
        }

        route_inbound(&node.registry, Some(node.root_sink.as_ref()), src, header, cursor.to_vec());
    }

    fn on_close(&mut self, _error_code: i32, _ssl_code: i32) {
        self.leave_pending();
        if let (Some(node), Some(established)) = (self.node.upgrade(), self.established.take()) {
            crate::node::handle_session_close(&node, established.user);
        }
    }
}
