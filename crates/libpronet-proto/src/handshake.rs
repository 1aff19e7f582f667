use rand::Rng;
use sha2::{Digest, Sha256};

/// Generates the 8-byte session nonce: each byte drawn from `[1,255]` then
/// shuffled, per the service-id handshake.
pub fn generate_nonce() -> [u8; 8] {
    let mut rng = rand::rng();
    let mut bytes: [u8; 8] = std::array::from_fn(|_| rng.random_range(1..=255u8));
    // Fisher-Yates shuffle using the same rng.
    for i in (1..bytes.len()).rev() {
        let j = rng.random_range(0..=i);
        bytes.swap(i, j);
    }
    bytes
}

/// `SHA256(nonce || password)`, computed identically by client and server
/// to authenticate the login header.
pub fn login_hash(nonce: &[u8; 8], password: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(nonce);
    hasher.update(password);
    hasher.finalize().into()
}

/// Validates the 4-byte service-id reply `[service_id, service_opt, r, r+1]`:
/// the third and fourth bytes must satisfy `bytes[3] == bytes[2] + 1 (mod 256)`.
pub fn validate_service_id_reply(reply: &[u8; 4]) -> bool {
    reply[3] == reply[2].wrapping_add(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_bytes_are_all_in_range() {
        let nonce = generate_nonce();
        assert!(nonce.iter().all(|&b| (1..=255).contains(&b)));
    }

    #[test]
    fn login_hash_is_deterministic_given_same_inputs() {
        let nonce = [1, 2, 3, 4, 5, 6, 7, 8];
        let a = login_hash(&nonce, b"pw");
        let b = login_hash(&nonce, b"pw");
        assert_eq!(a, b);
        let c = login_hash(&nonce, b"different");
        assert_ne!(a, c);
    }

    #[test]
    fn service_id_reply_validation() {
        assert!(validate_service_id_reply(&[1, 0, 5, 6]));
        assert!(validate_service_id_reply(&[1, 0, 255, 0]));
        assert!(!validate_service_id_reply(&[1, 0, 5, 7]));
    }
}
