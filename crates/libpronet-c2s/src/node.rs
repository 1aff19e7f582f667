use std::{
    collections::HashMap,
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex, Weak},
};

use libpronet_fabric::C2sControlMessage;
use libpronet_proto::{ClientHandshake, LoginRequest, RtpMsgHeader, ServerHandshake, UserId};
use libpronet_reactor::{
    FrameMode, Handler, Mask, Reactor, TimerId, TimerWheel, Transport,
};
use mio::{Interest, Registry, Token, event::Source, net::TcpStream};
use tracing::{info, warn};

use crate::{
    config::C2sConfig,
    downstream::{DownstreamBridge, DownstreamTransport},
    uplink::{UplinkBridge, UplinkTransport, control_packet},
};

struct PendingLogin {
    downstream: DownstreamTransport,
    handshake: Arc<Mutex<ServerHandshake>>,
    established_user: Arc<Mutex<Option<UserId>>>,
}

pub(crate) struct NodeInner {
    config: C2sConfig,
    reactor: Arc<Reactor>,
    timers: Arc<TimerWheel>,
    uplink: Mutex<Option<UplinkTransport>>,
    pending: Mutex<HashMap<TimerId, PendingLogin>>,
    downstream_links: Mutex<HashMap<UserId, DownstreamTransport>>,
}

/// A single C2S relay instance: one uplink Session to the root server,
/// fanning out to many downstream client connections whose logins it
/// forwards upstream for a verdict rather than deciding locally (spec §4.4).
pub struct C2sNode {
    inner: Arc<NodeInner>,
}

impl C2sNode {
    pub fn start(config: C2sConfig, reactor: Arc<Reactor>, timers: Arc<TimerWheel>) -> io::Result<Arc<Self>> {
        let inner = Arc::new(NodeInner {
            config,
            reactor,
            timers,
            uplink: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            downstream_links: Mutex::new(HashMap::new()),
        });
        dial_uplink(&inner);
        listen_downstream(&inner)?;
        Ok(Arc::new(Self { inner }))
    }
}

/// Dials the uplink and, on failure, schedules a redial after
/// `config.redial_interval`. Also the redial timer's own callback target, so
/// a lost uplink retries on the same cadence as the initial connect.
fn dial_uplink(inner: &Arc<NodeInner>) {
    match TcpStream::connect(inner.config.uplink_addr) {
        Ok(stream) => {
            let self_handle: crate::uplink::UplinkHandle = Arc::new(Mutex::new(None));
            let bridge = UplinkBridge {
                handshake: ClientHandshake::new(),
                self_handle: self_handle.clone(),
                node: Arc::downgrade(inner),
                user: inner.config.self_user,
                password: inner.config.password.clone(),
            };
            let transport = Transport::init(
                bridge,
                inner.reactor.clone(),
                stream,
                FrameMode::Raw,
                inner.config.recv_buf_bytes,
                inner.config.send_buf_bytes,
                inner.config.uplink_redline_bytes,
            );
            *self_handle.lock().unwrap() = Some(transport.clone());
            *inner.uplink.lock().unwrap() = Some(transport);
        }
        Err(err) => {
            warn!(?err, addr = ?inner.config.uplink_addr, "uplink dial failed, scheduling redial");
            schedule_redial(inner);
        }
    }
}

fn schedule_redial(inner: &Arc<NodeInner>) {
    let weak = Arc::downgrade(inner);
    let interval = inner.config.redial_interval;
    inner.timers.schedule_timer(
        Box::new(move |_id, _user_data| {
            if let Some(inner) = weak.upgrade() {
                dial_uplink(&inner);
            }
        }),
        interval,
        false,
        0,
    );
}

fn listen_downstream(inner: &Arc<NodeInner>) -> io::Result<()> {
    let addr: SocketAddr = inner.config.downstream_bind_addr;
    let listener = mio::net::TcpListener::bind(addr)?;
    let handler = DownstreamAcceptHandler { listener, node: Arc::downgrade(inner) };
    inner.reactor.add_handler(handler, Mask::ACCEPT);
    info!(%addr, "listening for downstream clients");
    Ok(())
}

struct DownstreamAcceptHandler {
    listener: mio::net::TcpListener,
    node: Weak<NodeInner>,
}

impl Handler for DownstreamAcceptHandler {
    fn on_event(&mut self, _token: Token, ready: Mask) {
        if !ready.contains(Mask::ACCEPT) {
            return;
        }
        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    let Some(node) = self.node.upgrade() else { return };
                    spawn_downstream(&node, stream, peer_addr);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!(?err, "downstream accept failed");
                    break;
                }
            }
        }
    }
}

impl Source for DownstreamAcceptHandler {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.listener.register(registry, token, interests)
    }
    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.listener.reregister(registry, token, interests)
    }
    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.listener.deregister(registry)
    }
}

fn spawn_downstream(node: &Arc<NodeInner>, stream: TcpStream, peer_addr: SocketAddr) {
    let peer_ip = match peer_addr.ip() {
        std::net::IpAddr::V4(v4) => v4,
        std::net::IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
    };
    let self_handle: crate::downstream::DownstreamHandle = Arc::new(Mutex::new(None));
    let handshake = Arc::new(Mutex::new(ServerHandshake::new()));
    let established_user = Arc::new(Mutex::new(None));
    let bridge = DownstreamBridge {
        handshake: handshake.clone(),
        self_handle: self_handle.clone(),
        node: Arc::downgrade(node),
        peer_ip,
        established_user,
    };
    let transport = Transport::init(
        bridge,
        node.reactor.clone(),
        stream,
        FrameMode::Raw,
        node.config.recv_buf_bytes,
        node.config.send_buf_bytes,
        node.config.downstream_redline_bytes,
    );
    *self_handle.lock().unwrap() = Some(transport.clone());
    let nonce = handshake.lock().unwrap().send_nonce();
    transport.send_raw(nonce.to_vec());
}

/// Correlates a downstream login with the uplink server's eventual verdict,
/// using the reactor timer id allocated for the local timeout as the
/// `client_index` the control-plane protocol expects back.
pub(crate) fn forward_login_upstream(
    node: &Arc<NodeInner>,
    downstream: DownstreamTransport,
    handshake: Arc<Mutex<ServerHandshake>>,
    established_user: Arc<Mutex<Option<UserId>>>,
    req: LoginRequest,
    peer_ip: Ipv4Addr,
) {
    let weak_node = Arc::downgrade(node);
    let client_index = node.timers.schedule_timer(
        Box::new(move |id, _user_data| {
            if let Some(node) = weak_node.upgrade() {
                reject_pending_on_timeout(&node, id);
            }
        }),
        node.config.local_timeout,
        false,
        0,
    );

    node.pending.lock().unwrap().insert(
        client_index,
        PendingLogin { downstream, handshake, established_user },
    );

    let msg = C2sControlMessage::ClientLogin {
        client_index,
        client_id: req.user,
        client_public_ip: peer_ip,
        client_hash: req.password_hash,
        client_nonce: req.nonce,
    };
    send_control_upstream(node, &msg);
}

fn reject_pending_on_timeout(node: &Arc<NodeInner>, client_index: TimerId) {
    if let Some(pending) = node.pending.lock().unwrap().remove(&client_index) {
        warn!(client_index, "downstream login timed out awaiting uplink verdict");
        pending.handshake.lock().unwrap().reject();
        pending.downstream.close(-1, 0);
    }
}

fn send_control_upstream(node: &Arc<NodeInner>, msg: &C2sControlMessage) {
    let Some(uplink) = node.uplink.lock().unwrap().clone() else {
        warn!("no uplink connection; dropping control message");
        return;
    };
    uplink.send_packet(&control_packet(node.config.self_user, msg));
}

pub(crate) fn handle_uplink_established() {
    info!("uplink session established");
}

pub(crate) fn handle_control_from_upstream(node: &Arc<NodeInner>, msg: C2sControlMessage) {
    match msg {
        C2sControlMessage::ClientLoginOk { client_index, client_id } => {
            node.timers.cancel_timer(client_index);
            let Some(pending) = node.pending.lock().unwrap().remove(&client_index) else {
                warn!(client_index, "login ok for an unknown or expired pending login");
                return;
            };
            let ack = pending.handshake.lock().unwrap().accept(client_id, Ipv4Addr::UNSPECIFIED);
            let mut ack_bytes = Vec::new();
            if ack.encode(&mut ack_bytes).is_err() {
                pending.downstream.close(-1, 0);
                return;
            }
            *pending.established_user.lock().unwrap() = Some(client_id);
            pending.downstream.send_raw(ack_bytes);
            pending.downstream.set_mode(FrameMode::tcp4_default());
            pending.downstream.resume_recv();
            node.downstream_links.lock().unwrap().insert(client_id, pending.downstream);
            info!(%client_id, "downstream login accepted");
        }
        C2sControlMessage::ClientLoginError { client_index } => {
            node.timers.cancel_timer(client_index);
            if let Some(pending) = node.pending.lock().unwrap().remove(&client_index) {
                pending.handshake.lock().unwrap().reject();
                pending.downstream.close(-1, 0);
            }
        }
        C2sControlMessage::ClientKickout { client_id } | C2sControlMessage::ClientLogout { client_id } => {
            if let Some(downstream) = node.downstream_links.lock().unwrap().remove(&client_id) {
                downstream.close(-1, 0);
            }
        }
        C2sControlMessage::ClientLogin { .. } => {
            warn!("uplink server sent a client_login message, which only flows C2S -> server");
        }
    }
}

/// A frame arrived from the uplink addressed to one or more of our
/// sub-users; route it to each matching downstream connection.
pub(crate) fn forward_uplink_packet(node: &Arc<NodeInner>, header: RtpMsgHeader, payload: Vec<u8>) {
    let mut body = Vec::new();
    if header.encode(&mut body).is_err() {
        return;
    }
    body.extend_from_slice(&payload);
    let packet = libpronet_reactor::Packet::new(libpronet_reactor::PacketHeader::default(), body);

    let links = node.downstream_links.lock().unwrap();
    let mut dsts = header.dst_users.clone();
    if dsts.is_empty() {
        dsts.push(libpronet_proto::ROOT);
    }
    for dst in dsts {
        if let Some(downstream) = links.get(&dst) {
            downstream.send_packet(&packet);
        }
    }
}

/// A frame arrived from one of our downstream sub-users; it travels upstream
/// unchanged so the server's routing sees the original `dst_users` list.
pub(crate) fn forward_downstream_packet(
    node: &Arc<NodeInner>,
    src: UserId,
    mut header: RtpMsgHeader,
    payload: Vec<u8>,
) {
    header.src_user = src;
    let mut body = Vec::new();
    if header.encode(&mut body).is_err() {
        return;
    }
    body.extend_from_slice(&payload);
    let packet = libpronet_reactor::Packet::new(libpronet_reactor::PacketHeader::default(), body);

    let Some(uplink) = node.uplink.lock().unwrap().clone() else { return };
    uplink.send_packet(&packet);
}

pub(crate) fn handle_downstream_close(node: &Arc<NodeInner>, established: Option<UserId>) {
    let Some(client_id) = established else { return };
    node.downstream_links.lock().unwrap().remove(&client_id);
    send_control_upstream(node, &C2sControlMessage::ClientLogout { client_id });
}

pub(crate) fn handle_uplink_close(node: &Arc<NodeInner>, error_code: i32, ssl_code: i32) {
    warn!(error_code, ssl_code, "uplink session closed, redialing");
    *node.uplink.lock().unwrap() = None;
    for (_, pending) in node.pending.lock().unwrap().drain() {
        pending.handshake.lock().unwrap().reject();
        pending.downstream.close(-1, 0);
    }
    for (_, downstream) in node.downstream_links.lock().unwrap().drain() {
        downstream.close(-1, 0);
    }
    schedule_redial(node);
}
