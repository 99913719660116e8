//! Delivery token signing and verification.
//!
//! A token is the HMAC-SHA256 of the canonical message `path + "\n" + expiry`
//! under the configured secret, hex-encoded. Tokens are deterministic for
//! identical inputs; verification recomputes and compares in constant time.
//! The signer itself is window-agnostic: callers choose the expiry per asset
//! class, and the edge verifier enforces `now > expiry` rejection.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies delivery tokens with a shared secret.
pub struct TokenSigner {
    secret: Vec<u8>,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl TokenSigner {
    /// Create a signer from secret bytes.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn mac(&self, path: &str, expires_at_unix: i64) -> HmacSha256 {
        // HMAC accepts keys of any length.
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC key length is unrestricted");
        mac.update(path.as_bytes());
        mac.update(b"\n");
        mac.update(expires_at_unix.to_string().as_bytes());
        mac
    }

    /// Sign a (path, expiry) pair, returning the hex-encoded token.
    pub fn sign(&self, path: &str, expires_at_unix: i64) -> String {
        let mac = self.mac(path, expires_at_unix);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Verify a token against a (path, expiry) pair.
    ///
    /// Constant-time comparison; returns false for tokens that are not valid
    /// hex as well as for signature mismatches. Expiry freshness is checked
    /// by the edge verifier, not here.
    pub fn verify(&self, path: &str, expires_at_unix: i64, token: &str) -> bool {
        let Ok(token_bytes) = hex::decode(token) else {
            return false;
        };
        self.mac(path, expires_at_unix)
            .verify_slice(&token_bytes)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let signer = TokenSigner::new(b"secret".to_vec());
        let token = signer.sign("courses/c1/video.mp4", 1_900_000_000);
        assert!(signer.verify("courses/c1/video.mp4", 1_900_000_000, &token));
    }

    #[test]
    fn test_sign_is_deterministic() {
        let signer = TokenSigner::new(b"secret".to_vec());
        let a = signer.sign("p", 100);
        let b = signer.sign("p", 100);
        assert_eq!(a, b);
    }

    #[test]
    fn test_tampered_path_fails() {
        let signer = TokenSigner::new(b"secret".to_vec());
        let token = signer.sign("a/b.mp4", 100);
        assert!(!signer.verify("a/c.mp4", 100, &token));
    }

    #[test]
    fn test_tampered_expiry_fails() {
        let signer = TokenSigner::new(b"secret".to_vec());
        let token = signer.sign("a/b.mp4", 100);
        assert!(!signer.verify("a/b.mp4", 101, &token));
    }

    #[test]
    fn test_wrong_secret_fails() {
        let signer = TokenSigner::new(b"secret".to_vec());
        let other = TokenSigner::new(b"other-secret".to_vec());
        let token = signer.sign("a/b.mp4", 100);
        assert!(!other.verify("a/b.mp4", 100, &token));
    }

    #[test]
    fn test_non_hex_token_rejected() {
        let signer = TokenSigner::new(b"secret".to_vec());
        assert!(!signer.verify("a/b.mp4", 100, "not hex at all"));
        assert!(!signer.verify("a/b.mp4", 100, ""));
    }

    #[test]
    fn test_message_boundary_is_unambiguous() {
        // "a\n1" + expiry 0 must not collide with "a" + expiry 10 framing.
        let signer = TokenSigner::new(b"secret".to_vec());
        let token = signer.sign("a", 10);
        assert!(!signer.verify("a\n1", 0, &token));
    }
}
