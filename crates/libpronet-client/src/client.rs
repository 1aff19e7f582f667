use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use libpronet_proto::{
    ClientHandshake, ClientHandshakeState, RTP_MSG_HEADER0_LEN, RtpMsgHeader, RtpMsgHeader0, UserId,
};
use libpronet_reactor::{
    FrameMode, Packet, PacketHeader, Reactor, TimerCallback, TimerId, TimerWheel, Transport,
    TransportObserver,
};
use mio::net::TcpStream;
use tracing::warn;

use crate::observer::ClientObserver;

type ClientTransport = Transport<TcpStream, ClientBridge>;
type ClientHandle = Arc<Mutex<Option<ClientTransport>>>;

/// Tuning and identity parameters for a single outbound Session.
pub struct ClientConfig {
    pub user: UserId,
    pub password: Vec<u8>,
    pub mm_type: u8,
    pub session_type: u8,
    /// Echoed verbatim in the service-id handshake reply; the core never
    /// inspects these bytes itself (spec leaves their meaning to the
    /// application).
    pub service_id: u8,
    pub service_opt: u8,
    pub recv_buf_bytes: usize,
    pub send_buf_bytes: usize,
    pub redline_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user: UserId::default(),
            password: Vec::new(),
            mm_type: 0,
            session_type: 0,
            service_id: 1,
            service_opt: 0,
            recv_buf_bytes: 256 * 1024,
            send_buf_bytes: 256 * 1024,
            redline_bytes: 1024 * 1024,
        }
    }
}

struct ClientBridge {
    handshake: ClientHandshake,
    observer: Arc<dyn ClientObserver>,
    user_request: UserId,
    password: Vec<u8>,
    mm_type: u8,
    session_type: u8,
    service_id: u8,
    service_opt: u8,
    self_handle: ClientHandle,
    tcp_connected: bool,
    /// Flipped once the login ack arrives; `Client::send_msg2` refuses to
    /// send before this so a send attempted before `on_ok` fires doesn't
    /// enqueue a Tcp4-framed packet into a still-`Raw` Session.
    established: Arc<AtomicBool>,
}

impl ClientBridge {
    fn transport(&self) -> Option<ClientTransport> {
        self.self_handle.lock().unwrap().clone()
    }
}

impl TransportObserver for ClientBridge {
    fn on_raw_recv(&mut self, buf: &[u8]) -> usize {
        match self.handshake.state() {
            ClientHandshakeState::AwaitNonce => {
                if buf.len() < 8 {
                    return 0;
                }
                let mut nonce = [0u8; 8];
                nonce.copy_from_slice(&buf[..8]);
                let reply = self.handshake.on_nonce(nonce, self.service_id, self.service_opt);
                let Some(transport) = self.transport() else { return 0 };
                transport.send_raw(reply.to_vec());

                match self.handshake.build_login(
                    self.user_request,
                    &self.password,
                    self.mm_type,
                    self.session_type,
                ) {
                    Ok((info, header0)) => {
                        let mut login_bytes = Vec::new();
                        info.encode(&mut login_bytes).expect("encoding to a Vec cannot fail");
                        header0.encode(&mut login_bytes).expect("encoding to a Vec cannot fail");
                        transport.send_raw(login_bytes);
                    }
                    Err(err) => {
                        warn!(?err, "failed to build login frame");
                        transport.close(-1, 0);
                    }
                }
                8
            }
            ClientHandshakeState::ServiceIdSent | ClientHandshakeState::AwaitLoginAck => {
                if buf.len() < RTP_MSG_HEADER0_LEN {
                    return 0;
                }
                let mut cursor = &buf[..RTP_MSG_HEADER0_LEN];
                match RtpMsgHeader0::decode(&mut cursor) {
                    Ok(header0) => {
                        let (user, ip) = self.handshake.on_ack(&header0);
                        if let Some(transport) = self.transport() {
                            transport.set_mode(FrameMode::tcp4_default());
                        }
                        self.established.store(true, Ordering::Release);
                        self.observer.on_ok(user, ip);
                        RTP_MSG_HEADER0_LEN
                    }
                    Err(err) => {
                        warn!(?err, "malformed ack frame");
                        if let Some(transport) = self.transport() {
                            transport.close(-1, 0);
                        }
                        0
                    }
                }
            }
            ClientHandshakeState::Established | ClientHandshakeState::Closed => 0,
        }
    }

    fn on_packet(&mut self, packet: Packet) {
        let mut cursor = &packet.payload[..];
        match RtpMsgHeader::decode(&mut cursor) {
            Ok(header) => self.observer.on_recv(cursor, header.charset, header.src_user),
            Err(err) => warn!(?err, "malformed message envelope from server"),
        }
    }

    fn on_close(&mut self, error_code: i32, ssl_code: i32) {
        self.established.store(false, Ordering::Release);
        self.observer.on_close(error_code, ssl_code, self.tcp_connected);
    }
}

/// A single outbound Session to a server or C2S relay.
pub struct Client {
    transport: ClientTransport,
    established: Arc<AtomicBool>,
}

impl Client {
    /// Connects to `server_addr` and drives the client-side handshake.
    /// `observer.on_ok` fires once the ack frame arrives.
    pub fn connect(
        reactor: Arc<Reactor>,
        server_addr: SocketAddr,
        config: ClientConfig,
        observer: Arc<dyn ClientObserver>,
    ) -> io::Result<Self> {
        let stream = TcpStream::connect(server_addr)?;
        let self_handle: ClientHandle = Arc::new(Mutex::new(None));
        let established = Arc::new(AtomicBool::new(false));
        let bridge = ClientBridge {
            handshake: ClientHandshake::new(),
            observer,
            user_request: config.user,
            password: config.password,
            mm_type: config.mm_type,
            session_type: config.session_type,
            service_id: config.service_id,
            service_opt: config.service_opt,
            self_handle: self_handle.clone(),
            tcp_connected: true,
            established: established.clone(),
        };
        let transport = Transport::init(
            bridge,
            reactor,
            stream,
            FrameMode::Raw,
            config.recv_buf_bytes,
            config.send_buf_bytes,
            config.redline_bytes,
        );
        *self_handle.lock().unwrap() = Some(transport.clone());
        Ok(Self { transport, established })
    }

    /// Sends `payload` addressed to `dst_users`, tagged with `charset`.
    /// Returns false if the Session isn't established yet or the send
    /// redline is exceeded.
    pub fn send_msg(&self, payload: &[u8], charset: u16, dst_users: &[UserId]) -> bool {
        self.send_msg2(&[payload], charset, dst_users)
    }

    /// Like [`Client::send_msg`] but concatenates several buffers into one
    /// payload without an intermediate copy at the call site.
    pub fn send_msg2(&self, parts: &[&[u8]], charset: u16, dst_users: &[UserId]) -> bool {
        if !self.established.load(Ordering::Acquire) {
            return false;
        }
        let header =
            RtpMsgHeader { charset, src_user: UserId::default(), dst_users: dst_users.to_vec() };
        let mut body = Vec::new();
        if header.encode(&mut body).is_err() {
            return false;
        }
        for part in parts {
            body.extend_from_slice(part);
        }
        let packet = Packet::new(PacketHeader::default(), body);
        self.transport.send_packet(&packet)
    }

    pub fn close(&self) {
        self.transport.close(0, 0);
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    /// Schedules a recurring heartbeat on `wheel`, surfacing a tick counter
    /// to `observer.on_heartbeat` once per configured period.
    pub fn start_heartbeat(wheel: &TimerWheel, observer: Arc<dyn ClientObserver>) -> TimerId {
        let tick = AtomicU64::new(0);
        let callback: TimerCallback = Box::new(move |_id, _user_data| {
            let next = tick.fetch_add(1, Ordering::Relaxed) + 1;
            observer.on_heartbeat(next);
        });
        wheel.schedule_heartbeat_timer(callback, 0)
    }
}
