//! TLS as a pluggable byte-stream filter: wraps any `Read + Write + Source`
//! stream in a rustls session so `Transport<S, O>` never has to know
//! whether its bytes are going out in the clear.

use std::{
    io::{self, Read, Write},
    sync::Arc,
};

use libpronet_utils::apply_xor_premask;
use mio::{Interest, Registry, Token, event::Source};
use rustls::{ClientConnection, ServerConnection};

use crate::transport::SocketTuning;

enum Session {
    Server(ServerConnection),
    Client(ClientConnection),
}

impl Session {
    fn wants_read(&self) -> bool {
        match self {
            Session::Server(c) => c.wants_read(),
            Session::Client(c) => c.wants_read(),
        }
    }

    fn wants_write(&self) -> bool {
        match self {
            Session::Server(c) => c.wants_write(),
            Session::Client(c) => c.wants_write(),
        }
    }

    fn read_tls(&mut self, rd: &mut dyn io::Read) -> io::Result<usize> {
        match self {
            Session::Server(c) => c.read_tls(rd),
            Session::Client(c) => c.read_tls(rd),
        }
    }

    fn write_tls(&mut self, wr: &mut dyn io::Write) -> io::Result<usize> {
        match self {
            Session::Server(c) => c.write_tls(wr),
            Session::Client(c) => c.write_tls(wr),
        }
    }

    fn process_new_packets(&mut self) -> Result<(), rustls::Error> {
        match self {
            Session::Server(c) => c.process_new_packets().map(|_| ()),
            Session::Client(c) => c.process_new_packets().map(|_| ()),
        }
    }

    fn reader(&mut self) -> rustls::Reader<'_> {
        match self {
            Session::Server(c) => c.reader(),
            Session::Client(c) => c.reader(),
        }
    }

    fn writer(&mut self) -> rustls::Writer<'_> {
        match self {
            Session::Server(c) => c.writer(),
            Session::Client(c) => c.writer(),
        }
    }
}

/// A `Read + Write + Source` stream with an in-line rustls filter. Plugs
/// directly into `Transport<S, O>` in place of a bare `TcpStream`.
///
/// Also carries the §4.3 post-handshake XOR premask: once the Session
/// handshake running over this stream establishes its nonce,
/// [`TlsStream::begin_premask`] starts masking the next
/// [`libpronet_utils::PREMASK_WINDOW_BYTES`] of plaintext bytes in each
/// direction, independently tracked per direction since reads and writes
/// don't move in lockstep.
pub struct TlsStream<S> {
    inner: S,
    session: Session,
    premask_nonce: Option<u64>,
    read_offset: u64,
    write_offset: u64,
}

impl<S: Read + Write> TlsStream<S> {
    pub fn new_server(inner: S, config: Arc<rustls::ServerConfig>) -> io::Result<Self> {
        let conn = ServerConnection::new(config).map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        Ok(Self { inner, session: Session::Server(conn), premask_nonce: None, read_offset: 0, write_offset: 0 })
    }

    pub fn new_client(
        inner: S,
        config: Arc<rustls::ClientConfig>,
        server_name: rustls::pki_types::ServerName<'static>,
    ) -> io::Result<Self> {
        let conn = ClientConnection::new(config, server_name).map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        Ok(Self { inner, session: Session::Client(conn), premask_nonce: None, read_offset: 0, write_offset: 0 })
    }

    /// Starts the post-handshake premask using the Session's nonce. Call
    /// once, right after the Session handshake that runs over this stream
    /// reaches its established state.
    pub fn begin_premask(&mut self, nonce: u64) {
        self.premask_nonce = Some(nonce);
        self.read_offset = 0;
        self.write_offset = 0;
    }

    /// Flushes any pending ciphertext the session wants to emit (handshake
    /// messages, alerts, or the encrypted form of a prior `write`).
    fn flush_outgoing(&mut self) -> io::Result<()> {
        while self.session.wants_write() {
            self.session.write_tls(&mut self.inner)?;
        }
        Ok(())
    }
}

impl<S: Read + Write> Read for TlsStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.session.reader().read(buf) {
                Ok(0) if self.session.wants_read() => {}
                Ok(n) => {
                    if let Some(nonce) = self.premask_nonce {
                        self.read_offset = apply_xor_premask(&mut buf[..n], nonce, self.read_offset);
                    }
                    return Ok(n);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock && self.session.wants_read() => {}
                Err(err) => return Err(err),
            }

            match self.session.read_tls(&mut self.inner) {
                Ok(0) => return Ok(0),
                Ok(_) => {
                    self.session
                        .process_new_packets()
                        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.flush_outgoing()?;
                    return Err(err);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl<S: Read + Write> Write for TlsStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = match self.premask_nonce {
            Some(nonce) if self.write_offset < libpronet_utils::PREMASK_WINDOW_BYTES => {
                let mut masked = buf.to_vec();
                let new_offset = apply_xor_premask(&mut masked, nonce, self.write_offset);
                let n = self.session.writer().write(&masked)?;
                self.write_offset = new_offset;
                n
            }
            _ => self.session.writer().write(buf)?,
        };
        self.flush_outgoing()?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_outgoing()?;
        self.inner.flush()
    }
}

impl<S: Source> Source for TlsStream<S> {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.inner.register(registry, token, interests)
    }
    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        self.inner.reregister(registry, token, interests)
    }
    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.inner.deregister(registry)
    }
}

impl<S: SocketTuning> SocketTuning for TlsStream<S> {
    fn tune(&mut self, recv_buf_bytes: usize, send_buf_bytes: usize) {
        self.inner.tune(recv_buf_bytes, send_buf_bytes);
    }
}
