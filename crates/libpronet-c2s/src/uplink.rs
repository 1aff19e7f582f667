use std::sync::{Arc, Mutex, Weak};

use libpronet_proto::{
    C2S_SIGNAL, ClientHandshake, ClientHandshakeState, RTP_MSG_HEADER0_LEN, RtpMsgHeader,
    RtpMsgHeader0, UserId,
};
use libpronet_reactor::{FrameMode, Packet, Transport, TransportObserver};
use mio::net::TcpStream;
use tracing::warn;

use crate::node::NodeInner;

pub(crate) type UplinkTransport = Transport<TcpStream, UplinkBridge>;
pub(crate) type UplinkHandle = Arc<Mutex<Option<UplinkTransport>>>;

/// Client-side bridge for the single uplink Session to the root server.
///
/// Unlike `libpronet-client`'s bridge, [`UplinkBridge::on_packet`] keeps the
/// full decoded [`RtpMsgHeader`] (including `dst_users`) instead of handing
/// only the payload to an observer: this node must route an inbound frame
/// to one of its own downstream sub-users by that list, which a generic
/// client observer contract has no reason to expose.
pub(crate) struct UplinkBridge {
    pub(crate) handshake: ClientHandshake,
    pub(crate) self_handle: UplinkHandle,
    pub(crate) node: Weak<NodeInner>,
    pub(crate) user: UserId,
    pub(crate) password: Vec<u8>,
}

impl UplinkBridge {
    fn transport(&self) -> Option<UplinkTransport> {
        self.self_handle.lock().unwrap().clone()
    }
}

impl TransportObserver for UplinkBridge {
    fn on_raw_recv(&mut self, buf: &[u8]) -> usize {
        match self.handshake.state() {
            ClientHandshakeState::AwaitNonce => {
                if buf.len() < 8 {
                    return 0;
                }
                let mut nonce = [0u8; 8];
                nonce.copy_from_slice(&buf[..8]);
                let reply = self.handshake.on_nonce(nonce, 1, 0);
                let Some(transport) = self.transport() else { return 0 };
                transport.send_raw(reply.to_vec());

                match self.handshake.build_login(self.user, &self.password, 0, 0) {
                    Ok((info, header0)) => {
                        let mut login_bytes = Vec::new();
                        info.encode(&mut login_bytes).expect("encoding to a Vec cannot fail");
                        header0.encode(&mut login_bytes).expect("encoding to a Vec cannot fail");
                        transport.send_raw(login_bytes);
                    }
                    Err(err) => {
                        warn!(?err, "failed to build uplink login frame");
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
                        self.handshake.on_ack(&header0);
                        if let Some(transport) = self.transport() {
                            transport.set_mode(FrameMode::tcp4_default());
                        }
                        crate::node::handle_uplink_established();
                        RTP_MSG_HEADER0_LEN
                    }
                    Err(err) => {
                        warn!(?err, "malformed uplink ack frame");
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
        let Some(node) = self.node.upgrade() else { return };
        let mut cursor = &packet.payload[..];
        match RtpMsgHeader::decode(&mut cursor) {
            Ok(header) if header.dst_users.iter().any(UserId::is_c2s_signal) => {
                match std::str::from_utf8(cursor).ok().and_then(libpronet_fabric::C2sControlMessage::decode) {
                    Some(msg) => crate::node::handle_control_from_upstream(&node, msg),
                    None => warn!("unparseable control message from uplink"),
                }
            }
            Ok(header) => crate::node::forward_uplink_packet(&node, header, cursor.to_vec()),
            Err(err) => warn!(?err, "malformed uplink frame"),
        }
    }

    fn on_close(&mut self, error_code: i32, ssl_code: i32) {
        if let Some(node) = self.node.upgrade() {
            crate::node::handle_uplink_close(&node, error_code, ssl_code);
        }
    }
}

/// Addresses the given text-encoded control message to the uplink's
/// signalling identity and sends it as an ordinary data packet.
pub(crate) fn control_packet(self_user: UserId, msg: &libpronet_fabric::C2sControlMessage) -> Packet {
    let header = RtpMsgHeader { charset: 0, src_user: self_user, dst_users: vec![C2S_SIGNAL] };
    let mut body = Vec::new();
    header.encode(&mut body).expect("encoding to a Vec cannot fail");
    body.extend_from_slice(msg.encode().as_bytes());
    Packet::new(libpronet_reactor::PacketHeader::default(), body)
}
