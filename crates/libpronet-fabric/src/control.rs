use libpronet_proto::UserId;

/// C2S control-plane messages, carried as key/value text over the ordinary
/// message channel addressed to the C2S signalling user (`1-1-65535`)
/// rather than as a distinct binary frame type. `client_index` is a
/// reactor-allocated one-shot timer id used to correlate a pending
/// downstream login with the server's eventual reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum C2sControlMessage {
    ClientLogin {
        client_index: u32,
        client_id: UserId,
        client_public_ip: std::net::Ipv4Addr,
        client_hash: [u8; 32],
        client_nonce: [u8; 8],
    },
    ClientLoginOk {
        client_index: u32,
        client_id: UserId,
    },
    ClientLoginError {
        client_index: u32,
    },
    ClientLogout {
        client_id: UserId,
    },
    ClientKickout {
        client_id: UserId,
    },
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn from_hex<const N: usize>(s: &str) -> Option<[u8; N]> {
    if s.len() != N * 2 {
        return None;
    }
    let mut out = [0u8; N];
    for i in 0..N {
        out[i] = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(out)
}

impl C2sControlMessage {
    fn kind(&self) -> &'static str {
        match self {
            C2sControlMessage::ClientLogin { .. } => "***client_login",
            C2sControlMessage::ClientLoginOk { .. } => "***client_login_ok",
            C2sControlMessage::ClientLoginError { .. } => "***client_login_error",
            C2sControlMessage::ClientLogout { .. } => "***client_logout",
            C2sControlMessage::ClientKickout { .. } => "***client_kickout",
        }
    }

    /// Encodes as `key=value` lines, one message per call.
    pub fn encode(&self) -> String {
        let mut out = format!("cmd={}\n", self.kind());
        match self {
            C2sControlMessage::ClientLogin {
                client_index,
                client_id,
                client_public_ip,
                client_hash,
                client_nonce,
            } => {
                out.push_str(&format!("client_index={client_index}\n"));
                out.push_str(&format!("client_id={client_id}\n"));
                out.push_str(&format!("client_public_ip={client_public_ip}\n"));
                out.push_str(&format!("client_hash_string={}\n", to_hex(client_hash)));
                out.push_str(&format!("client_nonce={}\n", to_hex(client_nonce)));
            }
            C2sControlMessage::ClientLoginOk { client_index, client_id } => {
                out.push_str(&format!("client_index={client_index}\nclient_id={client_id}\n"));
            }
            C2sControlMessage::ClientLoginError { client_index } => {
                out.push_str(&format!("client_index={client_index}\n"));
            }
            C2sControlMessage::ClientLogout { client_id } | C2sControlMessage::ClientKickout { client_id } => {
                out.push_str(&format!("client_id={client_id}\n"));
            }
        }
        out
    }

    pub fn decode(text: &str) -> Option<Self> {
        let mut cmd = None;
        let mut client_index = None;
        let mut client_id = None;
        let mut client_public_ip = None;
        let mut client_hash = None;
        let mut client_nonce = None;
        for line in text.lines() {
            let (key, value) = line.split_once('=')?;
            match key {
                "cmd" => cmd = Some(value),
                "client_index" => client_index = value.parse::<u32>().ok(),
                "client_id" => client_id = value.parse::<UserId>().ok(),
                "client_public_ip" => client_public_ip = value.parse().ok(),
                "client_hash_string" => client_hash = from_hex::<32>(value),
                "client_nonce" => client_nonce = from_hex::<8>(value),
                _ => {}
            }
        }
        match cmd? {
            "***client_login" => Some(C2sControlMessage::ClientLogin {
                client_index: client_index?,
                client_id: client_id?,
                client_public_ip: client_public_ip?,
                client_hash: client_hash?,
                client_nonce: client_nonce?,
            }),
            "***client_login_ok" => {
                Some(C2sControlMessage::ClientLoginOk { client_index: client_index?, client_id: client_id? })
            }
            "***client_login_error" => {
                Some(C2sControlMessage::ClientLoginError { client_index: client_index? })
            }
            "***client_logout" => Some(C2sControlMessage::ClientLogout { client_id: client_id? }),
            "***client_kickout" => Some(C2sControlMessage::ClientKickout { client_id: client_id? }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_round_trips() {
        let msg = C2sControlMessage::ClientLogin {
            client_index: 42,
            client_id: UserId::new(2, 5, 1),
            client_public_ip: "10.0.0.7".parse().unwrap(),
            client_hash: [7u8; 32],
            client_nonce: [1, 2, 3, 4, 5, 6, 7, 8],
        };
        let decoded = C2sControlMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn login_ok_and_error_round_trip() {
        let ok = C2sControlMessage::ClientLoginOk { client_index: 7, client_id: UserId::new(2, 5, 1) };
        assert_eq!(C2sControlMessage::decode(&ok.encode()).unwrap(), ok);

        let err = C2sControlMessage::ClientLoginError { client_index: 7 };
        assert_eq!(C2sControlMessage::decode(&err.encode()).unwrap(), err);
    }

    #[test]
    fn logout_and_kickout_round_trip() {
        let user = UserId::new(2, 5, 1);
        for msg in
            [C2sControlMessage::ClientLogout { client_id: user }, C2sControlMessage::ClientKickout { client_id: user }]
        {
            let decoded = C2sControlMessage::decode(&msg.encode()).unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn garbage_text_does_not_decode() {
        assert!(C2sControlMessage::decode("not a control message").is_none());
    }
}
