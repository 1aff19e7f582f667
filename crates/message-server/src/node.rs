use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use libpronet_fabric::{
    C2sControlMessage, CredentialStore, DynamicIdAllocator, RootSink, UserRegistry, evaluate_login,
};
use libpronet_proto::{C2S_SIGNAL, LoginRequest, ROOT, RtpMsgHeader, UserId};
use libpronet_reactor::{FrameMode, Handler, Mask, Packet, PacketHeader, Reactor, TimerWheel};
use mio::{Interest, Registry, Token, event::Source, net::TcpListener};
use tracing::{info, warn};

use crate::{config::FileConfig, session::ServerBridge};

pub(crate) struct NodeInner {
    pub(crate) config: FileConfig,
    pub(crate) reactor: Arc<Reactor>,
    pub(crate) timers: Arc<TimerWheel>,
    pub(crate) registry: UserRegistry,
    pub(crate) dynamic_ids: DynamicIdAllocator,
    pub(crate) credentials: Arc<dyn CredentialStore>,
    pub(crate) pending_count: AtomicUsize,
    pub(crate) root_sink: Arc<dyn RootSink>,
}

/// Default server-as-endpoint observer (§4.4): traffic addressed to root
/// has no peer to deliver to, so it surfaces here instead. Logs rather
/// than dropping silently; an embedder wanting to act on it can swap this
/// out by constructing `NodeInner` directly.
struct LoggingRootSink;

impl RootSink for LoggingRootSink {
    fn on_recv_msg(&self, src_user: UserId, charset: u16, payload: &[u8]) {
        info!(%src_user, charset, bytes = payload.len(), "message addressed to root");
    }
}

impl NodeInner {
    pub(crate) fn frame_mode(&self) -> FrameMode {
        FrameMode::Tcp4 { max_frame_bytes: self.config.max_frame_bytes }
    }
}

/// The root message server (§4.4): authenticates direct logins, maintains
/// the global `user -> link` map, and arbitrates C2S-forwarded logins.
pub struct MessageServer {
    inner: Arc<NodeInner>,
}

impl MessageServer {
    pub fn start(
        config: FileConfig,
        credentials: Arc<dyn CredentialStore>,
        reactor: Arc<Reactor>,
        timers: Arc<TimerWheel>,
    ) -> io::Result<Arc<Self>> {
        let unix_mirror = config.unix_mirror;
        let hub_addr = config.hub_bind_addr;
        let inner = Arc::new(NodeInner {
            config,
            reactor,
            timers,
            registry: UserRegistry::new(),
            dynamic_ids: DynamicIdAllocator::new(),
            credentials,
            pending_count: AtomicUsize::new(0),
            root_sink: Arc::new(LoggingRootSink),
        });

        let listener = TcpListener::bind(hub_addr)?;
        let handler = TcpAcceptHandler { listener, node: Arc::downgrade(&inner) };
        inner.reactor.add_handler(handler, Mask::ACCEPT);
        info!(addr = %hub_addr, "listening on hub port");

        #[cfg(unix)]
        if unix_mirror {
            crate::unix_mirror::listen(&inner, hub_addr.port())?;
        }
        #[cfg(not(unix))]
        let _ = unix_mirror;

        Ok(Arc::new(Self { inner }))
    }

    /// Administrative kickout (§4.4): closes a base user's link outright,
    /// or, for a sub-user tunneled through a C2S, notifies the owning C2S
    /// link and removes the local entry.
    pub fn kickout_user(&self, user: UserId) {
        kickout_user(&self.inner, user);
    }

    pub fn registered_user_count(&self) -> usize {
        self.inner.registry.entry_count()
    }
}

struct TcpAcceptHandler {
    listener: TcpListener,
    node: Weak<NodeInner>,
}

impl Handler for TcpAcceptHandler {
    fn on_event(&mut self, _token: Token, ready: Mask) {
        if !ready.contains(Mask::ACCEPT) {
            return;
        }
        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    let Some(node) = self.node.upgrade() else { return };
                    let peer_ip = match peer_addr.ip() {
                        std::net::IpAddr::V4(v4) => v4,
                        std::net::IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
                    };
                    spawn_session(&node, stream, peer_ip);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!(?err, "hub accept failed");
                    break;
                }
            }
        }
    }
}

impl Source for TcpAcceptHandler {
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

/// Takes ownership of a freshly accepted stream and drives the handshake
/// on it, refusing outright (closing before the nonce is sent) once the
/// acceptor's pending-connection bound (§4.4 capacity controls) is hit.
pub(crate) fn spawn_session<S>(node: &Arc<NodeInner>, mut stream: S, peer_ip: Ipv4Addr)
where
    S: std::io::Read + std::io::Write + Source + libpronet_reactor::SocketTuning + Send + 'static,
{
    if node.pending_count.fetch_add(1, Ordering::AcqRel) >= node.config.pending_accept_bound {
        node.pending_count.fetch_sub(1, Ordering::AcqRel);
        warn!("pending-connection bound reached, refusing accept");
        let _ = stream.flush();
        drop(stream);
        return;
    }

    let mut handshake = libpronet_proto::ServerHandshake::new();
    let nonce = handshake.send_nonce();

    let self_handle = std::sync::Arc::new(std::sync::Mutex::new(None));
    let resolved = Arc::new(AtomicBool::new(false));
    let bridge = ServerBridge::new(handshake, self_handle.clone(), Arc::downgrade(node), peer_ip, resolved.clone());
    let transport = libpronet_reactor::Transport::init(
        bridge,
        node.reactor.clone(),
        stream,
        FrameMode::Raw,
        node.config.recv_buf_bytes,
        node.config.send_buf_bytes,
        node.config.enduser_redline_bytes,
    );
    *self_handle.lock().unwrap() = Some(transport.clone());
    transport.send_raw(nonce.to_vec());

    let timeout_handle = self_handle.clone();
    node.timers.schedule_timer(
        Box::new(move |_id, _user_data| {
            if resolved.load(Ordering::Acquire) {
                return;
            }
            if let Some(transport) = timeout_handle.lock().unwrap().clone() {
                transport.close(-1, 0);
            }
        }),
        node.config.handshake_timeout,
        false,
        0,
    );
}

/// A login forwarded by a C2S relay (§4.6): arbitrated exactly like a
/// direct login, except the outcome installs a sub-user on the C2S's own
/// link rather than a fresh base link, and the verdict travels back as a
/// control message instead of an ack frame.
pub(crate) fn handle_control_from_c2s(node: &Arc<NodeInner>, c2s_base: UserId, msg: C2sControlMessage) {
    match msg {
        C2sControlMessage::ClientLogin { client_index, client_id, client_public_ip, client_hash, client_nonce } => {
            let req = LoginRequest { user: client_id, password_hash: client_hash, nonce: client_nonce, user_data: [0; 24] };
            let verdict = evaluate_login(&req, client_public_ip, node.credentials.as_ref(), &node.registry, &node.dynamic_ids);
            match verdict {
                Ok(outcome) if node.registry.register_sub_user(outcome.assigned_user, c2s_base) => {
                    info!(user = %outcome.assigned_user, c2s = %c2s_base, "c2s login accepted");
                    send_control_to_c2s(
                        node,
                        c2s_base,
                        &C2sControlMessage::ClientLoginOk { client_index, client_id: outcome.assigned_user },
                    );
                }
                Ok(_) => {
                    warn!(c2s = %c2s_base, "c2s base link vanished before sub-user could be registered");
                    send_control_to_c2s(node, c2s_base, &C2sControlMessage::ClientLoginError { client_index });
                }
                Err(err) => {
                    warn!(?err, c2s = %c2s_base, "c2s-forwarded login rejected");
                    send_control_to_c2s(node, c2s_base, &C2sControlMessage::ClientLoginError { client_index });
                }
            }
        }
        C2sControlMessage::ClientLogout { client_id } => {
            node.registry.remove_sub_user(client_id);
        }
        other => warn!(?other, "control message travels the wrong direction for a c2s link"),
    }
}

fn send_control_to_c2s(node: &Arc<NodeInner>, c2s_base: UserId, msg: &C2sControlMessage) {
    let Some(link) = node.registry.lookup(c2s_base) else {
        warn!(c2s = %c2s_base, "no link for control message destination");
        return;
    };
    let header = RtpMsgHeader { charset: 0, src_user: ROOT, dst_users: vec![C2S_SIGNAL] };
    let mut body = Vec::new();
    if header.encode(&mut body).is_err() {
        return;
    }
    body.extend_from_slice(msg.encode().as_bytes());
    link.send(&Packet::new(PacketHeader::default(), body));
}

pub(crate) fn handle_session_close(node: &Arc<NodeInner>, user: UserId) {
    if node.registry.remove_base(user).is_some() {
        info!(%user, "session closed, link removed");
    }
}

fn kickout_user(node: &Arc<NodeInner>, user: UserId) {
    let Some(link) = node.registry.lookup(user) else { return };
    if link.base_user == user {
        link.close(-1, 0);
        node.registry.remove_base(user);
    } else {
        send_control_to_c2s(node, link.base_user, &C2sControlMessage::ClientKickout { client_id: user });
        node.registry.remove_sub_user(user);
    }
}
