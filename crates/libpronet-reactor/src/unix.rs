/// Path of the POSIX-only Unix-domain mirror socket for a hub `port`,
/// letting co-located processes connect without a TCP round-trip.
///
/// Callers are expected to bind the returned path with permissions 0777 and
/// register it with the same acceptor handler used for the TCP listener.
pub fn mirror_socket_path(port: u16) -> std::path::PathBuf {
    std::path::PathBuf::from(format!("/tmp/libpronet_127001_{port}"))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn path_is_stable_per_port() {
        assert_eq!(mirror_socket_path(7800), mirror_socket_path(7800));
        assert_ne!(mirror_socket_path(7800), mirror_socket_path(7801));
    }
}
