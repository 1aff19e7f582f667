use std::net::Ipv4Addr;

use rand::Rng;

use crate::{
    error::ProNetError,
    handshake::{generate_nonce, login_hash, validate_service_id_reply},
    identity::UserId,
    wire::{AddrField, RtpMsgHeader0, RtpSessionInfo},
};

/// Server-side acceptor view of the handshake state machine (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerHandshakeState {
    Accepted,
    SendNonce,
    AwaitServiceId,
    ServiceIdOk,
    AwaitLoginHdr,
    AuthPending,
    Established,
    Closed,
}

/// What the fabric layer needs from a decoded login header to consult the
/// credential oracle.
#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub user: UserId,
    pub password_hash: [u8; 32],
    pub nonce: [u8; 8],
    pub user_data: [u8; 24],
}

/// Drives the handshake for one accepted connection. Pure state machine: no
/// I/O of its own, callers feed it bytes decoded by the Transport and send
/// whatever byte arrays it returns.
pub struct ServerHandshake {
    state: ServerHandshakeState,
    nonce: [u8; 8],
}

impl Default for ServerHandshake {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerHandshake {
    pub fn new() -> Self {
        Self { state: ServerHandshakeState::Accepted, nonce: generate_nonce() }
    }

    pub fn state(&self) -> ServerHandshakeState {
        self.state
    }

    /// Returns the 8-byte nonce to send and advances to `AwaitServiceId`.
    pub fn send_nonce(&mut self) -> [u8; 8] {
        self.state = ServerHandshakeState::AwaitServiceId;
        self.nonce
    }

    /// Validates the 4-byte service-id reply.
    pub fn on_service_id_reply(&mut self, reply: &[u8; 4]) -> Result<(), ProNetError> {
        if self.state != ServerHandshakeState::AwaitServiceId {
            return Err(ProNetError::ProtocolViolation("service-id reply out of order".into()));
        }
        if !validate_service_id_reply(reply) {
            self.state = ServerHandshakeState::Closed;
            return Err(ProNetError::ProtocolViolation("service-id checksum mismatch".into()));
        }
        self.state = ServerHandshakeState::ServiceIdOk;
        Ok(())
    }

    /// Hands the connection off to the application observer (message
    /// fabric) after the service-id dance completes.
    pub fn hand_off(&mut self) {
        if self.state == ServerHandshakeState::ServiceIdOk {
            self.state = ServerHandshakeState::AwaitLoginHdr;
        }
    }

    /// Decodes the login header and returns what the fabric needs to
    /// consult the credential oracle. Reads are expected to be suspended by
    /// the caller while in `AuthPending`.
    pub fn on_login_header(
        &mut self,
        info: &RtpSessionInfo,
        header0: &RtpMsgHeader0,
    ) -> Result<LoginRequest, ProNetError> {
        if self.state != ServerHandshakeState::AwaitLoginHdr {
            return Err(ProNetError::ProtocolViolation("login header out of order".into()));
        }
        self.state = ServerHandshakeState::AuthPending;
        Ok(LoginRequest {
            user: header0.user,
            password_hash: info.password_hash,
            nonce: self.nonce,
            user_data: info.user_data,
        })
    }

    /// The observer accepted the login: produces the ack frame and
    /// transitions to `Established`.
    pub fn accept(&mut self, assigned_user: UserId, public_ip: Ipv4Addr) -> RtpMsgHeader0 {
        self.state = ServerHandshakeState::Established;
        RtpMsgHeader0::ack(assigned_user, public_ip)
    }

    /// The observer rejected the login: the caller closes the Session with
    /// no ack frame.
    pub fn reject(&mut self) {
        self.state = ServerHandshakeState::Closed;
    }

    /// A handshake timeout fired before reaching `Established`.
    pub fn on_timeout(&mut self) -> bool {
        if self.state != ServerHandshakeState::Established {
            self.state = ServerHandshakeState::Closed;
            true
        } else {
            false
        }
    }

    pub fn reads_suspended(&self) -> bool {
        matches!(self.state, ServerHandshakeState::AwaitLoginHdr | ServerHandshakeState::AuthPending)
    }
}

/// Client-side mirror of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientHandshakeState {
    AwaitNonce,
    ServiceIdSent,
    AwaitLoginAck,
    Established,
    Closed,
}

pub struct ClientHandshake {
    state: ClientHandshakeState,
    nonce: Option<[u8; 8]>,
}

impl Default for ClientHandshake {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientHandshake {
    pub fn new() -> Self {
        Self { state: ClientHandshakeState::AwaitNonce, nonce: None }
    }

    pub fn state(&self) -> ClientHandshakeState {
        self.state
    }

    pub fn nonce(&self) -> Option<[u8; 8]> {
        self.nonce
    }

    /// Feed the server's nonce; returns the 4-byte service-id reply to send.
    pub fn on_nonce(&mut self, nonce: [u8; 8], service_id: u8, service_opt: u8) -> [u8; 4] {
        self.nonce = Some(nonce);
        self.state = ClientHandshakeState::ServiceIdSent;
        let r: u8 = rand::rng().random_range(0..=254);
        [service_id, service_opt, r, r.wrapping_add(1)]
    }

    /// Builds the login header for `user`/`password` using the stored
    /// nonce and advances to `AwaitLoginAck`.
    pub fn build_login(
        &mut self,
        user: UserId,
        password: &[u8],
        mm_type: u8,
        session_type: u8,
    ) -> Result<(RtpSessionInfo, RtpMsgHeader0), ProNetError> {
        let nonce = self
            .nonce
            .ok_or_else(|| ProNetError::ProtocolViolation("login attempted before nonce".into()))?;
        self.state = ClientHandshakeState::AwaitLoginAck;
        let info = RtpSessionInfo {
            local_version: crate::wire::PROTOCOL_VERSION,
            session_type,
            mm_type,
            pack_mode: 0,
            password_hash: login_hash(&nonce, password),
            user_data: [0u8; 24],
        };
        Ok((info, RtpMsgHeader0::login(user)))
    }

    /// Consumes the ack frame, returning the assigned identity and observed
    /// public IP.
    pub fn on_ack(&mut self, header0: &RtpMsgHeader0) -> (UserId, Ipv4Addr) {
        self.state = ClientHandshakeState::Established;
        let ip = match header0.addr {
            AddrField::PublicIp(ip) => ip,
            AddrField::Reserved => Ipv4Addr::UNSPECIFIED,
        };
        (header0.user, ip)
    }

    pub fn on_timeout(&mut self) -> bool {
        if self.state != ClientHandshakeState::Established {
            self.state = ClientHandshakeState::Closed;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_handshake_happy_path() {
        let mut hs = ServerHandshake::new();
        let nonce = hs.send_nonce();
        assert_eq!(hs.state(), ServerHandshakeState::AwaitServiceId);

        hs.on_service_id_reply(&[1, 0, 5, 6]).unwrap();
        assert_eq!(hs.state(), ServerHandshakeState::ServiceIdOk);

        hs.hand_off();
        assert_eq!(hs.state(), ServerHandshakeState::AwaitLoginHdr);
        assert!(hs.reads_suspended());

        let info = RtpSessionInfo {
            local_version: 2,
            session_type: 0,
            mm_type: 0,
            pack_mode: 0,
            password_hash: login_hash(&nonce, b"pw"),
            user_data: [0; 24],
        };
        let header0 = RtpMsgHeader0::login(UserId::new(2, 5, 1));
        let req = hs.on_login_header(&info, &header0).unwrap();
        assert_eq!(hs.state(), ServerHandshakeState::AuthPending);
        assert_eq!(req.password_hash, login_hash(&nonce, b"pw"));

        let ack = hs.accept(UserId::new(2, 5, 1), Ipv4Addr::new(10, 0, 0, 7));
        assert_eq!(hs.state(), ServerHandshakeState::Established);
        assert_eq!(ack.user, UserId::new(2, 5, 1));
    }

    #[test]
    fn bad_service_id_reply_closes_the_handshake() {
        let mut hs = ServerHandshake::new();
        hs.send_nonce();
        assert!(hs.on_service_id_reply(&[1, 0, 5, 7]).is_err());
        assert_eq!(hs.state(), ServerHandshakeState::Closed);
    }

    #[test]
    fn client_and_server_agree_on_the_login_hash() {
        let mut server = ServerHandshake::new();
        let nonce = server.send_nonce();

        let mut client = ClientHandshake::new();
        let reply = client.on_nonce(nonce, 1, 0);
        server.on_service_id_reply(&reply).unwrap();
        server.hand_off();

        let (info, header0) = client.build_login(UserId::new(2, 5, 1), b"pw", 0, 0).unwrap();
        let req = server.on_login_header(&info, &header0).unwrap();
        assert_eq!(login_hash(&req.nonce, b"pw"), req.password_hash);
    }

    #[test]
    fn handshake_timeout_before_established_closes() {
        let mut hs = ServerHandshake::new();
        hs.send_nonce();
        assert!(hs.on_timeout());
        assert_eq!(hs.state(), ServerHandshakeState::Closed);

        let mut hs2 = ServerHandshake::new();
        hs2.send_nonce();
        hs2.on_service_id_reply(&[1, 0, 5, 6]).unwrap();
        hs2.hand_off();
        let info = RtpSessionInfo {
            local_version: 2,
            session_type: 0,
            mm_type: 0,
            pack_mode: 0,
            password_hash: [0; 32],
            user_data: [0; 24],
        };
        let header0 = RtpMsgHeader0::login(UserId::new(2, 5, 1));
        hs2.on_login_header(&info, &header0).unwrap();
        hs2.accept(UserId::new(2, 5, 1), Ipv4Addr::new(10, 0, 0, 7));
        assert!(!hs2.on_timeout(), "an established session must not be closed by a late timeout");
    }
}
