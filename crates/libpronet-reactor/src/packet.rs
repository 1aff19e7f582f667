use std::io::{self, Read, Write};

/// Fixed header carried in front of every packet payload. Field order and
/// widths match the RTP-derived packet header on the wire: network
/// byte order throughout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketHeader {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u32,
    pub timestamp: u32,
    pub ssrc: u32,
    pub mm_type: u8,
    pub key_frame: bool,
}

/// `payload_size` (u32) + 1 flags byte + `payload_type` + sequence + timestamp
/// + ssrc + `mm_type` = 4 + 1 + 1 + 4 + 4 + 4 + 1 bytes.
pub const HEADER_LEN: usize = 19;

const MARKER_BIT: u8 = 0b0000_0001;
const KEY_FRAME_BIT: u8 = 0b0000_0010;

impl PacketHeader {
    fn write_to(self, payload_len: u32, out: &mut impl Write) -> io::Result<()> {
        let mut flags = 0u8;
        if self.marker {
            flags |= MARKER_BIT;
        }
        if self.key_frame {
            flags |= KEY_FRAME_BIT;
        }
        out.write_all(&payload_len.to_be_bytes())?;
        out.write_all(&[flags, self.payload_type])?;
        out.write_all(&self.sequence.to_be_bytes())?;
        out.write_all(&self.timestamp.to_be_bytes())?;
        out.write_all(&self.ssrc.to_be_bytes())?;
        out.write_all(&[self.mm_type])?;
        Ok(())
    }

    fn read_from(input: &mut impl Read) -> io::Result<(Self, u32)> {
        let mut buf = [0u8; HEADER_LEN];
        input.read_exact(&mut buf)?;
        let payload_len = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        let flags = buf[4];
        let header = Self {
            marker: flags & MARKER_BIT != 0,
            payload_type: buf[5],
            sequence: u32::from_be_bytes(buf[6..10].try_into().unwrap()),
            timestamp: u32::from_be_bytes(buf[10..14].try_into().unwrap()),
            ssrc: u32::from_be_bytes(buf[14..18].try_into().unwrap()),
            mm_type: buf[18],
            key_frame: flags & KEY_FRAME_BIT != 0,
        };
        Ok((header, payload_len))
    }
}

/// A framed unit: fixed header plus an opaque payload. Encoded on the wire
/// in pack-mode TCP4 as a 4-byte network-order length prefix (covering
/// header + payload) followed by the header and payload bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(header: PacketHeader, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    /// Encodes `length_prefix(header.len + payload.len) | header | payload`.
    pub fn encode(&self) -> Vec<u8> {
        let body_len = HEADER_LEN + self.payload.len();
        let mut out = Vec::with_capacity(4 + body_len);
        out.extend_from_slice(&(body_len as u32).to_be_bytes());
        self.header.write_to(self.payload.len() as u32, &mut out).expect("writing to a Vec cannot fail");
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decodes a packet from a buffer holding exactly `length_prefix | header
    /// | payload` (the length prefix itself has already been consumed by the
    /// caller's framing loop and is not re-read here).
    pub fn decode_body(body: &[u8]) -> io::Result<Self> {
        let mut cursor = body;
        let (header, payload_len) = PacketHeader::read_from(&mut cursor)?;
        if cursor.len() != payload_len as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "packet payload length does not match frame body",
            ));
        }
        Ok(Self { header, payload: cursor.to_vec() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let packet = Packet::new(
            PacketHeader {
                marker: true,
                payload_type: 96,
                sequence: 42,
                timestamp: 90_000,
                ssrc: 0xdead_beef,
                mm_type: 1,
                key_frame: true,
            },
            b"hello reactor".to_vec(),
        );
        let encoded = packet.encode();
        let body = &encoded[4..];
        let decoded = Packet::decode_body(body).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn rejects_truncated_body() {
        let packet = Packet::new(PacketHeader::default(), vec![1, 2, 3]);
        let encoded = packet.encode();
        let truncated = &encoded[4..encoded.len() - 1];
        assert!(Packet::decode_body(truncated).is_err());
    }
}
