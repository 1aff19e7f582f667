/// First 16 KiB of post-handshake traffic in each direction of a Session are
/// XOR-masked with the session nonce as an 8-byte keystream, cycled. A
/// lightweight traffic-analysis obfuscator distinct from TLS itself; masking
/// stops after this many bytes on a given direction of a session.
pub const PREMASK_WINDOW_BYTES: u64 = 16 * 1024;

/// XORs `buf` in place against `nonce` treated as an 8-byte keystream
/// cycled from `stream_offset`. Only the portion of `buf` that falls
/// within [`PREMASK_WINDOW_BYTES`] of the stream start is masked; bytes
/// beyond the window are left untouched. Returns the new stream offset.
pub fn apply_xor_premask(buf: &mut [u8], nonce: u64, stream_offset: u64) -> u64 {
    let nonce_bytes = nonce.to_be_bytes();
    let masked_len = buf.len().min(PREMASK_WINDOW_BYTES.saturating_sub(stream_offset) as usize);
    for (i, byte) in buf.iter_mut().take(masked_len).enumerate() {
        let key_idx = ((stream_offset + i as u64) % 8) as usize;
        *byte ^= nonce_bytes[key_idx];
    }
    stream_offset + buf.len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masking_twice_is_identity() {
        let nonce = 0x0102_0304_0506_0708;
        let original: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();

        let mut masked = original.clone();
        apply_xor_premask(&mut masked, nonce, 0);
        assert_ne!(masked, original);

        let mut unmasked = masked.clone();
        apply_xor_premask(&mut unmasked, nonce, 0);
        assert_eq!(unmasked, original);
    }

    #[test]
    fn masking_stops_after_the_window() {
        let nonce = 0xAABB_CCDD_EEFF_0011;
        let tail_start = PREMASK_WINDOW_BYTES;
        let mut buf = vec![0x42u8; 100];
        apply_xor_premask(&mut buf, nonce, tail_start);
        assert!(buf.iter().all(|&b| b == 0x42));
    }

    #[test]
    fn masking_straddling_the_window_boundary_only_covers_the_prefix() {
        let nonce = 0x1111_2222_3333_4444;
        let mut buf = vec![0xFFu8; 200];
        let offset = PREMASK_WINDOW_BYTES - 50;
        apply_xor_premask(&mut buf, nonce, offset);
        assert_ne!(buf[0], 0xFF);
        assert_eq!(buf[150], 0xFF);
    }

    #[test]
    fn masking_resumes_correctly_across_split_reads() {
        let nonce = 0x7766_5544_3322_1100;
        let original: Vec<u8> = (0..500u32).map(|i| (i % 256) as u8).collect();

        let mut whole = original.clone();
        apply_xor_premask(&mut whole, nonce, 0);

        let mut split = original.clone();
        let offset = apply_xor_premask(&mut split[..200], nonce, 0);
        apply_xor_premask(&mut split[200..], nonce, offset);

        assert_eq!(whole, split);
    }
}
