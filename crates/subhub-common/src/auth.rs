//! HMAC-SHA256 signing helpers shared by WebSocket channel auth (private
//! and presence channel subscribes) and the REST admin API's
//! `auth_signature` query parameter.
//!
//! Both surfaces sign a newline- or colon-joined string with a per-app
//! secret and compare the resulting hex digest using constant-time
//! equality — never a plain `==` on the decoded signature.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Sign `message` with `secret`, returning a lowercase hex digest.
pub fn sign(secret: &str, message: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verify that `signature` (hex-encoded) is the HMAC-SHA256 of `message`
/// under `secret`, in constant time.
pub fn verify(secret: &str, message: &str, signature: &str) -> bool {
    let Ok(given) = hex::decode(signature) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(message.as_bytes());
    let expected = mac.finalize().into_bytes();
    expected.ct_eq(&given).into()
}

/// MD5 hex digest of a request body, used as the REST API's `body_md5`
/// signature input. MD5 here is a checksum, not a security boundary —
/// the signature itself is HMAC-SHA256; this matches the Pusher REST
/// contract's existing choice of digest for the body hash.
pub fn body_md5(body: &[u8]) -> String {
    hex::encode(md5::Md5::digest(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let sig = sign("shh", "hello world");
        assert!(verify("shh", "hello world", &sig));
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let sig = sign("shh", "hello world");
        assert!(!verify("different", "hello world", &sig));
    }

    #[test]
    fn verify_rejects_malformed_hex() {
        assert!(!verify("shh", "hello world", "not-hex"));
    }

    #[test]
    fn body_md5_matches_known_digest() {
        assert_eq!(body_md5(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
