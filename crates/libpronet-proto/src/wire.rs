use std::io::{self, Read, Write};

use crate::identity::UserId;

/// Current wire protocol version.
pub const PROTOCOL_VERSION: u16 = 2;

/// Sent by the client as part of the login header, carrying the password
/// hash and a small fixed application payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RtpSessionInfo {
    pub local_version: u16,
    pub session_type: u8,
    pub mm_type: u8,
    pub pack_mode: u8,
    pub password_hash: [u8; 32],
    pub user_data: [u8; 24],
}

pub const RTP_SESSION_INFO_LEN: usize = 2 + 1 + 1 + 1 + 32 + 24;

impl RtpSessionInfo {
    pub fn encode(&self, out: &mut impl Write) -> io::Result<()> {
        out.write_all(&self.local_version.to_be_bytes())?;
        out.write_all(&[self.session_type, self.mm_type, self.pack_mode])?;
        out.write_all(&self.password_hash)?;
        out.write_all(&self.user_data)?;
        Ok(())
    }

    pub fn decode(input: &mut impl Read) -> io::Result<Self> {
        let mut buf = [0u8; RTP_SESSION_INFO_LEN];
        input.read_exact(&mut buf)?;
        let mut password_hash = [0u8; 32];
        password_hash.copy_from_slice(&buf[5..37]);
        let mut user_data = [0u8; 24];
        user_data.copy_from_slice(&buf[37..61]);
        Ok(Self {
            local_version: u16::from_be_bytes([buf[0], buf[1]]),
            session_type: buf[2],
            mm_type: buf[3],
            pack_mode: buf[4],
            password_hash,
            user_data,
        })
    }
}

/// Tail field of [`RtpMsgHeader0`]: either 24 reserved bytes, or the
/// observed public IP packed into the first 4 bytes (used on the ack
/// frame server -> client).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddrField {
    Reserved,
    PublicIp(std::net::Ipv4Addr),
}

impl AddrField {
    fn encode(self) -> [u8; 24] {
        let mut out = [0u8; 24];
        if let AddrField::PublicIp(ip) = self {
            out[..4].copy_from_slice(&ip.octets());
        }
        out
    }

    fn decode(bytes: [u8; 24], has_ip: bool) -> Self {
        if has_ip {
            AddrField::PublicIp(std::net::Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]))
        } else {
            AddrField::Reserved
        }
    }
}

/// Login header (client -> server) and ack frame (server -> client). Both
/// directions use the same shape; `addr` is `Reserved` on login and
/// `PublicIp` on the ack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RtpMsgHeader0 {
    pub version: u16,
    pub user: UserId,
    pub addr: AddrField,
}

const USER_ID_BYTES: usize = 5;
pub const RTP_MSG_HEADER0_LEN: usize = 2 + 1 + USER_ID_BYTES + 2 + 2 + 24;

impl RtpMsgHeader0 {
    pub fn login(user: UserId) -> Self {
        Self { version: PROTOCOL_VERSION, user, addr: AddrField::Reserved }
    }

    pub fn ack(user: UserId, public_ip: std::net::Ipv4Addr) -> Self {
        Self { version: PROTOCOL_VERSION, user, addr: AddrField::PublicIp(public_ip) }
    }

    pub fn encode(&self, out: &mut impl Write) -> io::Result<()> {
        out.write_all(&self.version.to_be_bytes())?;
        out.write_all(&[self.user.class_id])?;
        let mut user_id_be = [0u8; USER_ID_BYTES];
        user_id_be.copy_from_slice(&self.user.user_id.to_be_bytes()[3..]);
        out.write_all(&user_id_be)?;
        out.write_all(&self.user.inst_id.to_be_bytes())?;
        let has_ip = matches!(self.addr, AddrField::PublicIp(_));
        out.write_all(&[has_ip as u8, 0])?;
        out.write_all(&self.addr.encode())?;
        Ok(())
    }

    pub fn decode(input: &mut impl Read) -> io::Result<Self> {
        let mut buf = [0u8; RTP_MSG_HEADER0_LEN];
        input.read_exact(&mut buf)?;
        let version = u16::from_be_bytes([buf[0], buf[1]]);
        let class_id = buf[2];
        let mut user_id_be = [0u8; 8];
        user_id_be[3..].copy_from_slice(&buf[3..8]);
        let user_id = u64::from_be_bytes(user_id_be);
        let inst_id = u16::from_be_bytes([buf[8], buf[9]]);
        let has_ip = buf[10] != 0;
        let mut addr_bytes = [0u8; 24];
        addr_bytes.copy_from_slice(&buf[12..36]);
        Ok(Self {
            version,
            user: UserId::new(class_id, user_id, inst_id),
            addr: AddrField::decode(addr_bytes, has_ip),
        })
    }
}

/// Variable-size header prepended to every application payload:
/// `charset | src_user | reserved | dst_user_count | dst_users[...]`.
/// `dst_user_count == 0` is interpreted by the fabric as one destination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RtpMsgHeader {
    pub charset: u16,
    pub src_user: UserId,
    pub dst_users: Vec<UserId>,
}

impl RtpMsgHeader {
    pub fn effective_dst_count(&self) -> usize {
        self.dst_users.len().max(1)
    }

    pub fn encode(&self, out: &mut impl Write) -> io::Result<()> {
        out.write_all(&self.charset.to_be_bytes())?;
        out.write_all(&[self.src_user.class_id])?;
        let mut user_id_be = [0u8; USER_ID_BYTES];
        user_id_be.copy_from_slice(&self.src_user.user_id.to_be_bytes()[3..]);
        out.write_all(&user_id_be)?;
        out.write_all(&self.src_user.inst_id.to_be_bytes())?;
        out.write_all(&[0, 0])?; // reserved
        out.write_all(&[self.dst_users.len() as u8])?;
        for dst in &self.dst_users {
            out.write_all(&[dst.class_id])?;
            let mut dst_id_be = [0u8; USER_ID_BYTES];
            dst_id_be.copy_from_slice(&dst.user_id.to_be_bytes()[3..]);
            out.write_all(&dst_id_be)?;
            out.write_all(&dst.inst_id.to_be_bytes())?;
        }
        Ok(())
    }

    pub fn decode(input: &mut impl Read) -> io::Result<Self> {
        let mut head = [0u8; 2 + 1 + USER_ID_BYTES + 2 + 2 + 1];
        input.read_exact(&mut head)?;
        let charset = u16::from_be_bytes([head[0], head[1]]);
        let class_id = head[2];
        let mut user_id_be = [0u8; 8];
        user_id_be[3..].copy_from_slice(&head[3..8]);
        let user_id = u64::from_be_bytes(user_id_be);
        let inst_id = u16::from_be_bytes([head[8], head[9]]);
        let dst_count = head[12];

        let entry_len = 1 + USER_ID_BYTES + 2;
        let mut dst_users = Vec::with_capacity(dst_count as usize);
        let mut entry = vec![0u8; entry_len];
        for _ in 0..dst_count {
            input.read_exact(&mut entry)?;
            let dst_class = entry[0];
            let mut dst_id_be = [0u8; 8];
            dst_id_be[3..].copy_from_slice(&entry[1..6]);
            let dst_user_id = u64::from_be_bytes(dst_id_be);
            let dst_inst = u16::from_be_bytes([entry[6], entry[7]]);
            dst_users.push(UserId::new(dst_class, dst_user_id, dst_inst));
        }

        Ok(Self { charset, src_user: UserId::new(class_id, user_id, inst_id), dst_users })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header0_round_trips_with_public_ip() {
        let header = RtpMsgHeader0::ack(UserId::new(2, 5, 1), std::net::Ipv4Addr::new(10, 0, 0, 7));
        let mut buf = Vec::new();
        header.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), RTP_MSG_HEADER0_LEN);
        let decoded = RtpMsgHeader0::decode(&mut &buf[..]).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn msg_header_round_trips_with_multiple_destinations() {
        let header = RtpMsgHeader {
            charset: 0,
            src_user: UserId::new(2, 5, 1),
            dst_users: vec![UserId::new(2, 5, 2), UserId::new(2, 5, 3), UserId::new(2, 5, 4)],
        };
        let mut buf = Vec::new();
        header.encode(&mut buf).unwrap();
        let decoded = RtpMsgHeader::decode(&mut &buf[..]).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.effective_dst_count(), 3);
    }

    #[test]
    fn zero_destinations_means_one() {
        let header = RtpMsgHeader { charset: 0, src_user: UserId::new(2, 5, 1), dst_users: vec![] };
        assert_eq!(header.effective_dst_count(), 1);
    }
}
