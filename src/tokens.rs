//! Token and identity helpers

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Random bytes behind every token
pub const TOKEN_BYTES: usize = 32;

/// Fresh hex-encoded random token
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// A new token guaranteed to differ from `previous`
pub fn rotate_token(previous: &str) -> String {
    loop {
        let token = generate_token();
        if token != previous {
            return token;
        }
    }
}

/// Lowercase hex SHA-256 of a daemon's public key
pub fn identity_of(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_shape() {
        let token = generate_token();
        assert_eq!(token.len(), TOKEN_BYTES * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(generate_token(), token);
    }

    #[test]
    fn test_rotation_differs() {
        let old = generate_token();
        assert_ne!(rotate_token(&old), old);
    }

    #[test]
    fn test_identity_is_sha256_hex() {
        assert_eq!(
            identity_of("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
