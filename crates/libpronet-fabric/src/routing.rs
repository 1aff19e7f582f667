use libpronet_proto::{ROOT, RtpMsgHeader, UserId};
use libpronet_reactor::Packet;
use tracing::trace;

use crate::registry::UserRegistry;

/// The server's own upcall for traffic addressed to root (`1-1-*`): a
/// client talking to the server itself rather than to a peer. `ROOT` is
/// never registered as a link in the `UserRegistry` (it has no socket of
/// its own), so delivery to it can't go through `registry.lookup` and
/// needs this separate path instead.
pub trait RootSink: Send + Sync {
    fn on_recv_msg(&self, src_user: UserId, charset: u16, payload: &[u8]);
}

/// Re-serializes an inbound application packet with `src_user` pinned to
/// the authenticated link's identity (a client cannot forge its own
/// source), then fans the identical re-encoded bytes out to every
/// resolved destination. A destination equal to `ROOT` is instead handed
/// to `root_sink`, if one is installed; any other unresolved destination
/// is silently dropped, and the sender gets no delivery failure signal
/// for it.
///
/// `dst_user_count == 0` on the wire means "one destination"; since no
/// destination entry is actually present on the wire in that case, the
/// implicit destination is root (`1-1-0`), matching a client that talks to
/// the server itself without naming a peer.
pub fn route_inbound(
    registry: &UserRegistry,
    root_sink: Option<&dyn RootSink>,
    authenticated_user: UserId,
    mut header: RtpMsgHeader,
    payload: Vec<u8>,
) -> usize {
    header.src_user = authenticated_user;
    if header.dst_users.is_empty() {
        header.dst_users.push(ROOT);
    }

    let mut body = Vec::new();
    header.encode(&mut body).expect("encoding to a Vec cannot fail");
    body.extend_from_slice(&payload);
    let packet = Packet::new(libpronet_reactor::PacketHeader::default(), body);

    let mut delivered = 0;
    for dst in &header.dst_users {
        if *dst == ROOT {
            if let Some(sink) = root_sink {
                sink.on_recv_msg(authenticated_user, header.charset, &payload);
                delivered += 1;
            } else {
                trace!("dropping message to root: no root sink installed");
            }
            continue;
        }
        match registry.lookup(*dst) {
            Some(link) if !link.is_closed() => {
                if link.send(&packet) {
                    delivered += 1;
                }
            }
            _ => {
                trace!(?dst, "dropping message to unresolved or closed destination");
            }
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::link::{LinkContext, LinkSender};

    struct CountingSender(Arc<AtomicUsize>);
    impl LinkSender for CountingSender {
        fn send_packet(&self, _packet: &Packet) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }
        fn close(&self, _error_code: i32, _ssl_code: i32) {}
        fn is_closed(&self) -> bool {
            false
        }
    }

    #[test]
    fn fans_out_to_every_resolved_destination_and_pins_src() {
        let registry = UserRegistry::new();
        let sent_a = Arc::new(AtomicUsize::new(0));
        let sent_b = Arc::new(AtomicUsize::new(0));
        let dst_a = UserId::new(2, 10, 1);
        let dst_b = UserId::new(2, 11, 1);
        let unresolved = UserId::new(2, 99, 1);

        registry.register_base(LinkContext::new(dst_a, false, 1024, Arc::new(CountingSender(sent_a.clone()))));
        registry.register_base(LinkContext::new(dst_b, false, 1024, Arc::new(CountingSender(sent_b.clone()))));

        let spoofed_src = UserId::new(9, 9, 9);
        let real_src = UserId::new(2, 1, 1);
        let header = RtpMsgHeader {
            charset: 0,
            src_user: spoofed_src,
            dst_users: vec![dst_a, dst_b, unresolved],
        };

        let delivered = route_inbound(&registry, None, real_src, header, b"hi".to_vec());

        assert_eq!(delivered, 2);
        assert_eq!(sent_a.load(Ordering::SeqCst), 1);
        assert_eq!(sent_b.load(Ordering::SeqCst), 1);
    }

    struct RecordingRootSink(Mutex<Vec<(UserId, Vec<u8>)>>);
    impl RootSink for RecordingRootSink {
        fn on_recv_msg(&self, src_user: UserId, _charset: u16, payload: &[u8]) {
            self.0.lock().unwrap().push((src_user, payload.to_vec()));
        }
    }

    #[test]
    fn root_destined_messages_reach_the_installed_root_sink() {
        let registry = UserRegistry::new();
        let sink = RecordingRootSink(Mutex::new(Vec::new()));
        let real_src = UserId::new(2, 1, 1);
        let header = RtpMsgHeader { charset: 0, src_user: UserId::default(), dst_users: vec![ROOT] };

        let delivered = route_inbound(&registry, Some(&sink), real_src, header, b"hello root".to_vec());

        assert_eq!(delivered, 1);
        let recorded = sink.0.lock().unwrap();
        assert_eq!(recorded.as_slice(), &[(real_src, b"hello root".to_vec())]);
    }

    #[test]
    fn empty_dst_implies_root_and_is_dropped_without_a_sink() {
        let registry = UserRegistry::new();
        let header = RtpMsgHeader { charset: 0, src_user: UserId::default(), dst_users: vec![] };

        let delivered = route_inbound(&registry, None, UserId::new(2, 1, 1), header, b"hi".to_vec());

        assert_eq!(delivered, 0);
    }
}
