use std::{
    collections::HashSet,
    io::{Read, Write},
    sync::{Arc, Mutex},
};

use libpronet_proto::UserId;
use libpronet_reactor::{Packet, SocketTuning, Transport, TransportObserver};
use mio::event::Source;

/// Object-safe sending surface of a link's underlying Transport, so
/// [`LinkContext`] doesn't need to be generic over the socket type.
pub trait LinkSender: Send + Sync {
    fn send_packet(&self, packet: &Packet) -> bool;
    fn close(&self, error_code: i32, ssl_code: i32);
    fn is_closed(&self) -> bool;
}

impl<S, O> LinkSender for Transport<S, O>
where
    S: Read + Write + Source + SocketTuning + Send + 'static,
    O: TransportObserver + 'static,
{
    fn send_packet(&self, packet: &Packet) -> bool {
        Transport::send_packet(self, packet)
    }

    fn close(&self, error_code: i32, ssl_code: i32) {
        Transport::close(self, error_code, ssl_code)
    }

    fn is_closed(&self) -> bool {
        Transport::is_closed(self)
    }
}

/// Each accepted base connection maps to exactly one link context: the
/// authenticated base user, the set of sub-users tunneled through it (only
/// non-empty for a C2S link), and the per-link send redline.
pub struct LinkContext {
    pub base_user: UserId,
    pub is_c2s: bool,
    pub send_redline: usize,
    sub_users: Mutex<HashSet<UserId>>,
    sender: Arc<dyn LinkSender>,
}

impl LinkContext {
    pub fn new(base_user: UserId, is_c2s: bool, send_redline: usize, sender: Arc<dyn LinkSender>) -> Arc<Self> {
        Arc::new(Self { base_user, is_c2s, send_redline, sub_users: Mutex::new(HashSet::new()), sender })
    }

    pub fn add_sub_user(&self, user: UserId) {
        self.sub_users.lock().unwrap().insert(user);
    }

    pub fn remove_sub_user(&self, user: UserId) -> bool {
        self.sub_users.lock().unwrap().remove(&user)
    }

    pub fn sub_users(&self) -> Vec<UserId> {
        self.sub_users.lock().unwrap().iter().copied().collect()
    }

    pub fn sub_user_count(&self) -> usize {
        self.sub_users.lock().unwrap().len()
    }

    /// Sends `packet` on this link's Transport. A link over its send redline
    /// is considered over-subscribed; the caller may drop the packet.
    pub fn send(&self, packet: &Packet) -> bool {
        self.sender.send_packet(packet)
    }

    pub fn close(&self, error_code: i32, ssl_code: i32) {
        self.sender.close(error_code, ssl_code);
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
