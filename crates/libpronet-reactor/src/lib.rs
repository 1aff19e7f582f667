mod handler;
mod mask;
mod packet;
mod reactor;
mod timer;
#[cfg(feature = "tls")]
mod tls;
mod transport;
mod unix;

pub use handler::{Handler, RegisteredHandler};
pub use mask::Mask;
pub use packet::{HEADER_LEN, Packet, PacketHeader};
pub use reactor::{Reactor, ReactorConfig};
pub use timer::{TimerCallback, TimerId, TimerWheel};
#[cfg(feature = "tls")]
pub use tls::TlsStream;
pub use transport::{FrameMode, RecvPool, SocketTuning, Transport, TransportObserver};
pub use unix::mirror_socket_path;

pub use mio::Token;
