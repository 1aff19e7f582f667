//! POSIX-only local mirror of the hub port (§6 "Local IPC"): lets
//! co-located processes reach the same login/routing path over a
//! Unix-domain socket instead of a TCP round-trip.

use std::{
    io,
    net::Ipv4Addr,
    os::unix::fs::PermissionsExt,
    sync::{Arc, Weak},
};

use libpronet_reactor::{Handler, Mask, mirror_socket_path};
use mio::{Interest, Registry, Token, event::Source, net::UnixListener};
use tracing::{info, warn};

use crate::node::{NodeInner, spawn_session};

pub(crate) fn listen(node: &Arc<NodeInner>, port: u16) -> io::Result<()> {
    let path = mirror_socket_path(port);
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o777))?;

    let handler = UnixAcceptHandler { listener, node: Arc::downgrade(node) };
    node.reactor.add_handler(handler, Mask::ACCEPT);
    info!(path = %path.display(), "listening on local mirror socket");
    Ok(())
}

struct UnixAcceptHandler {
    listener: UnixListener,
    node: Weak<NodeInner>,
}

impl Handler for UnixAcceptHandler {
    fn on_event(&mut self, _token: Token, ready: Mask) {
        if !ready.contains(Mask::ACCEPT) {
            return;
        }
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    let Some(node) = self.node.upgrade() else { return };
                    spawn_session(&node, stream, Ipv4Addr::LOCALHOST);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!(?err, "mirror socket accept failed");
                    break;
                }
            }
        }
    }
}

impl Source for UnixAcceptHandler {
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
