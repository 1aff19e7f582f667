use std::{
    io::{Read, Write},
    net::{Ipv4Addr, TcpListener},
    sync::{
        Arc,
        mpsc::{Receiver, Sender, channel},
    },
    time::Duration as StdDuration,
};

use libpronet_client::{Client, ClientConfig, ClientObserver};
use libpronet_proto::{RTP_MSG_HEADER0_LEN, RtpSessionInfo, ServerHandshake, UserId};
use libpronet_reactor::{Reactor, ReactorConfig};

struct RecordingObserver {
    on_ok: Sender<(UserId, Ipv4Addr)>,
}

impl ClientObserver for RecordingObserver {
    fn on_ok(&self, my_user: UserId, my_public_ip: Ipv4Addr) {
        let _ = self.on_ok.send((my_user, my_public_ip));
    }
    fn on_recv(&self, _payload: &[u8], _charset: u16, _src_user: UserId) {}
    fn on_close(&self, _error_code: i32, _ssl_code: i32, _tcp_connected: bool) {}
    fn on_heartbeat(&self, _peer_alive_tick: u64) {}
}

fn recv_within(rx: &Receiver<(UserId, Ipv4Addr)>, timeout: StdDuration) -> (UserId, Ipv4Addr) {
    rx.recv_timeout(timeout).expect("client did not observe on_ok in time")
}

#[test]
fn client_handshake_reaches_on_ok() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let assigned_user = UserId::new(2, 5, 1);
    let observed_ip = Ipv4Addr::new(10, 0, 0, 7);

    let server_thread = std::thread::spawn(move || {
        let (mut sock, _) = listener.accept().unwrap();
        let mut hs = ServerHandshake::new();
        let nonce = hs.send_nonce();
        sock.write_all(&nonce).unwrap();

        let mut service_reply = [0u8; 4];
        sock.read_exact(&mut service_reply).unwrap();
        hs.on_service_id_reply(&service_reply).unwrap();
        hs.hand_off();

        let info = RtpSessionInfo::decode(&mut sock).unwrap();
        let mut header0_buf = [0u8; RTP_MSG_HEADER0_LEN];
        sock.read_exact(&mut header0_buf).unwrap();
        let header0 = libpronet_proto::RtpMsgHeader0::decode(&mut &header0_buf[..]).unwrap();

        let req = hs.on_login_header(&info, &header0).unwrap();
        assert_eq!(req.password_hash, libpronet_proto::login_hash(&req.nonce, b"pw"));

        let ack = hs.accept(assigned_user, observed_ip);
        let mut ack_bytes = Vec::new();
        ack.encode(&mut ack_bytes).unwrap();
        sock.write_all(&ack_bytes).unwrap();

        // Keep the socket alive until the test completes its assertion.
        std::thread::sleep(StdDuration::from_millis(200));
    });

    let reactor = Arc::new(Reactor::new(ReactorConfig::default()).unwrap());
    let (tx, rx) = channel();
    let observer = Arc::new(RecordingObserver { on_ok: tx });
    let config = ClientConfig {
        user: UserId::new(2, 5, 1),
        password: b"pw".to_vec(),
        ..ClientConfig::default()
    };
    let _client = Client::connect(reactor, addr, config, observer).unwrap();

    let (user, ip) = recv_within(&rx, StdDuration::from_secs(2));
    assert_eq!(user, assigned_user);
    assert_eq!(ip, observed_ip);

    server_thread.join().unwrap();
}
