use std::{
    collections::VecDeque,
    io::{self, ErrorKind, Read, Write},
    sync::{Arc, Mutex},
};

#[cfg(unix)]
use std::os::fd::AsRawFd;

use mio::{Interest, Registry, Token, event::Source};
use tracing::{debug, trace, warn};

use crate::{
    Handler, Mask, Reactor,
    packet::{HEADER_LEN, Packet},
};

const DEFAULT_MAX_FRAME_BYTES: u32 = 96 * 1024 * 1024;
const LEN_PREFIX_BYTES: usize = 4;
const READ_CHUNK: usize = 64 * 1024;

/// Framing discipline applied to the byte stream.
#[derive(Clone, Copy, Debug)]
pub enum FrameMode {
    /// Bytes are handed to the observer as-is, used during the nonce /
    /// service-id handshake dance before a packet framing is negotiated.
    Raw,
    /// 4-byte network-order length prefix, [`Packet`] header, and payload.
    Tcp4 { max_frame_bytes: u32 },
}

impl FrameMode {
    pub fn tcp4_default() -> Self {
        FrameMode::Tcp4 { max_frame_bytes: DEFAULT_MAX_FRAME_BYTES }
    }
}

/// Observer upcalls delivered from the reactor thread the Transport is
/// bound to. Exactly one [`TransportObserver::on_close`] follows a
/// successful [`Transport::init`]; no other upcall follows it.
pub trait TransportObserver: Send {
    /// Raw-mode bytes became available. `buf` holds everything received so
    /// far that hasn't been consumed; return the number of bytes consumed.
    fn on_raw_recv(&mut self, buf: &[u8]) -> usize;
    /// A complete TCP4 frame was decoded.
    fn on_packet(&mut self, packet: Packet);
    /// Write interest requested via [`Transport::request_on_send`] is ready.
    fn on_writable(&mut self) {}
    fn on_close(&mut self, error_code: i32, ssl_code: i32);
}

/// Bounded byte ring the observer can peek/flush without tearing down reads.
pub struct RecvPool {
    buf: VecDeque<u8>,
    capacity: usize,
}

impl RecvPool {
    fn new(capacity: usize) -> Self {
        Self { buf: VecDeque::with_capacity(capacity.min(64 * 1024)), capacity }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn peek(&self) -> Vec<u8> {
        self.buf.iter().copied().collect()
    }

    pub fn drain(&mut self, n: usize) {
        self.buf.drain(..n.min(self.buf.len()));
    }

    fn push(&mut self, bytes: &[u8]) -> bool {
        if self.buf.len() + bytes.len() > self.capacity {
            return false;
        }
        self.buf.extend(bytes);
        true
    }
}

/// Socket-level tuning hook invoked from [`Transport::init`]. The generic
/// Transport doesn't know its stream's concrete type, so tuning is a no-op
/// by default and specialized for `mio::net::TcpStream` below.
pub trait SocketTuning {
    fn tune(&mut self, recv_buf_bytes: usize, send_buf_bytes: usize);
}

impl SocketTuning for mio::net::TcpStream {
    fn tune(&mut self, recv_buf_bytes: usize, send_buf_bytes: usize) {
        let _ = self.set_nodelay(true);
        #[cfg(unix)]
        {
            set_buf_size(self.as_raw_fd(), libc::SO_RCVBUF, recv_buf_bytes);
            set_buf_size(self.as_raw_fd(), libc::SO_SNDBUF, send_buf_bytes);
        }
        #[cfg(not(unix))]
        {
            let _ = (recv_buf_bytes, send_buf_bytes);
        }
    }
}

#[cfg(unix)]
impl SocketTuning for mio::net::UnixStream {
    fn tune(&mut self, _recv_buf_bytes: usize, _send_buf_bytes: usize) {}
}

#[cfg(unix)]
fn set_buf_size(fd: std::os::fd::RawFd, optname: i32, bytes: usize) {
    let value = bytes as libc::c_int;
    let ok = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            optname,
            &value as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ok != 0 {
        warn!(optname, bytes, "setsockopt failed");
    }
}

struct TransportState<S, O> {
    stream: S,
    observer: O,
    reactor: Arc<Reactor>,
    token: Token,
    mode: FrameMode,
    recv_pool: RecvPool,
    send_queue: VecDeque<Vec<u8>>,
    send_queue_bytes: usize,
    redline_bytes: usize,
    write_armed: bool,
    recv_suspended: bool,
    closed: bool,
}

impl<S, O> TransportState<S, O>
where
    S: Read + Write,
    O: TransportObserver,
{
    fn on_event(&mut self, mask: Mask) {
        if self.closed {
            return;
        }
        if mask.contains(Mask::EXCEPTION) {
            self.close(-1, 0);
            return;
        }
        if mask.contains(Mask::READ) && !self.recv_suspended {
            self.handle_readable();
        }
        if !self.closed && mask.contains(Mask::WRITE) {
            self.handle_writable();
        }
    }

    fn handle_readable(&mut self) {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.close(0, 0);
                    return;
                }
                Ok(n) => {
                    if !self.recv_pool.push(&chunk[..n]) {
                        warn!(token = ?self.token, "recv pool overrun, closing transport");
                        self.close(-1, 0);
                        return;
                    }
                    self.dispatch_frames();
                    if n < chunk.len() {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!(?err, token = ?self.token, "transport read error");
                    self.close(-1, 0);
                    return;
                }
            }
        }
    }

    fn dispatch_frames(&mut self) {
        match self.mode {
            FrameMode::Raw => {
                let buf = self.recv_pool.peek();
                if buf.is_empty() {
                    return;
                }
                let consumed = self.observer.on_raw_recv(&buf);
                if consumed > 0 {
                    self.recv_pool.drain(consumed);
                }
            }
            FrameMode::Tcp4 { max_frame_bytes } => loop {
                if self.recv_pool.len() < LEN_PREFIX_BYTES {
                    return;
                }
                let peeked = self.recv_pool.peek();
                let body_len =
                    u32::from_be_bytes(peeked[..LEN_PREFIX_BYTES].try_into().unwrap());
                if body_len < HEADER_LEN as u32 || body_len > max_frame_bytes {
                    warn!(body_len, max_frame_bytes, token = ?self.token, "frame exceeds cap");
                    self.close(-1, 0);
                    return;
                }
                let total = LEN_PREFIX_BYTES + body_len as usize;
                if peeked.len() < total {
                    return;
                }
                match Packet::decode_body(&peeked[LEN_PREFIX_BYTES..total]) {
                    Ok(packet) => {
                        self.recv_pool.drain(total);
                        self.observer.on_packet(packet);
                    }
                    Err(err) => {
                        warn!(?err, token = ?self.token, "malformed frame body");
                        self.close(-1, 0);
                        return;
                    }
                }
            },
        }
    }

    fn handle_writable(&mut self) {
        while let Some(front) = self.send_queue.front_mut() {
            match self.stream.write(front) {
                Ok(0) => break,
                Ok(n) => {
                    self.send_queue_bytes -= n;
                    if n == front.len() {
                        self.send_queue.pop_front();
                    } else {
                        front.drain(..n);
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!(?err, token = ?self.token, "transport write error");
                    self.close(-1, 0);
                    return;
                }
            }
        }
        if self.send_queue.is_empty() {
            if self.write_armed {
                self.write_armed = false;
                self.reactor.remove_handler(self.token, Mask::WRITE);
            }
            self.observer.on_writable();
        }
    }

    fn enqueue(&mut self, bytes: Vec<u8>) -> bool {
        if self.closed {
            return false;
        }
        if self.send_queue_bytes + bytes.len() > self.redline_bytes {
            return false;
        }
        self.send_queue_bytes += bytes.len();
        self.send_queue.push_back(bytes);
        self.try_flush_and_arm();
        true
    }

    fn try_flush_and_arm(&mut self) {
        self.handle_writable();
        if !self.send_queue.is_empty() && !self.write_armed {
            self.write_armed = true;
            self.reactor.set_mask(self.token, Mask::READ | Mask::WRITE);
        }
    }

    fn close(&mut self, error_code: i32, ssl_code: i32) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.reactor.remove_handler(self.token, Mask::READ | Mask::WRITE | Mask::EXCEPTION);
        self.observer.on_close(error_code, ssl_code);
    }
}

struct TransportHandler<S, O>(Arc<Mutex<TransportState<S, O>>>);

impl<S, O> Handler for TransportHandler<S, O>
where
    S: Read + Write + Send,
    O: TransportObserver,
{
    fn on_event(&mut self, _token: Token, ready: Mask) {
        self.0.lock().unwrap().on_event(ready);
    }
}

impl<S: Source, O> Source for TransportHandler<S, O> {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.0.lock().unwrap().stream.register(registry, token, interests)
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.0.lock().unwrap().stream.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.0.lock().unwrap().stream.deregister(registry)
    }
}

/// Handle to a framed byte stream bound into a [`Reactor`]. Cloning shares
/// the underlying socket and queues; all clones observe the same state.
pub struct Transport<S, O> {
    inner: Arc<Mutex<TransportState<S, O>>>,
}

impl<S, O> Clone for Transport<S, O> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<S, O> Transport<S, O>
where
    S: Read + Write + Source + SocketTuning + Send + 'static,
    O: TransportObserver + 'static,
{
    /// Takes ownership of `stream`, tunes socket-level buffer sizes and
    /// Nagle, and registers it with `reactor` for READ under a freshly
    /// allocated token.
    pub fn init(
        observer: O,
        reactor: Arc<Reactor>,
        mut stream: S,
        mode: FrameMode,
        recv_buf_bytes: usize,
        send_buf_bytes: usize,
        redline_bytes: usize,
    ) -> Self {
        stream.tune(recv_buf_bytes, send_buf_bytes);
        let token = reactor.alloc_token();
        let state = TransportState {
            stream,
            observer,
            reactor: reactor.clone(),
            token,
            mode,
            recv_pool: RecvPool::new(recv_buf_bytes),
            send_queue: VecDeque::new(),
            send_queue_bytes: 0,
            redline_bytes,
            write_armed: false,
            recv_suspended: false,
            closed: false,
        };
        let inner = Arc::new(Mutex::new(state));
        reactor.add_handler_with_token(token, TransportHandler(inner.clone()), Mask::READ);
        Self { inner }
    }

    pub fn token(&self) -> Token {
        self.inner.lock().unwrap().token
    }

    /// Enqueues a framed packet. Returns false when the send redline is
    /// crossed; send order is FIFO per transport.
    pub fn send_packet(&self, packet: &Packet) -> bool {
        self.inner.lock().unwrap().enqueue(packet.encode())
    }

    /// Enqueues raw bytes, bypassing packet framing. Used for handshake
    /// traffic while the Transport is in [`FrameMode::Raw`].
    pub fn send_raw(&self, bytes: Vec<u8>) -> bool {
        self.inner.lock().unwrap().enqueue(bytes)
    }

    /// Arms a one-shot writable upcall so the observer may feed more
    /// packets once outstanding backpressure drains.
    pub fn request_on_send(&self) {
        let mut state = self.inner.lock().unwrap();
        if !state.write_armed && !state.closed {
            state.write_armed = true;
            state.reactor.set_mask(state.token, Mask::READ | Mask::WRITE);
        }
    }

    /// Toggles READ interest without tearing down the socket.
    pub fn suspend_recv(&self) {
        let mut state = self.inner.lock().unwrap();
        state.recv_suspended = true;
        let mask = if state.write_armed { Mask::WRITE } else { Mask::empty() };
        state.reactor.set_mask(state.token, mask);
    }

    pub fn resume_recv(&self) {
        let mut state = self.inner.lock().unwrap();
        state.recv_suspended = false;
        let mask = if state.write_armed { Mask::READ | Mask::WRITE } else { Mask::READ };
        state.reactor.set_mask(state.token, mask);
        state.dispatch_frames();
    }

    pub fn set_mode(&self, mode: FrameMode) {
        self.inner.lock().unwrap().mode = mode;
    }

    pub fn with_recv_pool<R>(&self, f: impl FnOnce(&mut RecvPool) -> R) -> R {
        f(&mut self.inner.lock().unwrap().recv_pool)
    }

    pub fn close(&self, error_code: i32, ssl_code: i32) {
        self.inner.lock().unwrap().close(error_code, ssl_code);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingObserver {
        packets: Vec<Packet>,
        raw: Vec<u8>,
        closed: Option<(i32, i32)>,
    }

    impl TransportObserver for RecordingObserver {
        fn on_raw_recv(&mut self, buf: &[u8]) -> usize {
            self.raw.extend_from_slice(buf);
            buf.len()
        }
        fn on_packet(&mut self, packet: Packet) {
            self.packets.push(packet);
        }
        fn on_close(&mut self, error_code: i32, ssl_code: i32) {
            self.closed = Some((error_code, ssl_code));
        }
    }

    #[test]
    fn recv_pool_respects_capacity() {
        let mut pool = RecvPool::new(4);
        assert!(pool.push(&[1, 2, 3, 4]));
        assert!(!pool.push(&[5]));
        pool.drain(2);
        assert!(pool.push(&[5, 6]));
        assert_eq!(pool.peek(), vec![3, 4, 5, 6]);
    }
}
