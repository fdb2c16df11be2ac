//! Webhook signature verification
//!
//! GitHub signs every delivery with HMAC-SHA256 over the raw body and sends
//! the result as `x-hub-signature-256: sha256=<hex>`. The body must not be
//! parsed before this check passes.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Verify a webhook body against the shared secret.
///
/// Returns `false` for a missing or malformed header instead of erroring.
/// An empty secret never verifies anything.
pub fn verify(raw_body: &[u8], signature_header: Option<&str>, secret: &str) -> bool {
    if secret.is_empty() {
        return false;
    }

    let Some(header) = signature_header else {
        return false;
    };

    let Some(hex_digest) = header.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };

    let Ok(provided) = hex::decode(hex_digest) else {
        return false;
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(raw_body);

    // verify_slice is constant-time over the digest bytes
    mac.verify_slice(&provided).is_ok()
}

/// Compute the `sha256=<hex>` header value for a body and secret.
pub fn expected_header(raw_body: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(raw_body);
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-webhook-secret";

    #[test]
    fn test_round_trip() {
        let body = br#"{"action":"closed"}"#;
        let header = expected_header(body, SECRET);
        assert!(verify(body, Some(&header), SECRET));
    }

    #[test]
    fn test_mutated_body_fails() {
        let body = b"payload bytes";
        let header = expected_header(body, SECRET);

        let mut flipped = body.to_vec();
        flipped[0] ^= 0x01;
        assert!(!verify(&flipped, Some(&header), SECRET));
    }

    #[test]
    fn test_mutated_signature_fails() {
        let body = b"payload bytes";
        let header = expected_header(body, SECRET);

        let mut bytes = header.into_bytes();
        let last = bytes.last_mut().unwrap();
        *last = if *last == b'0' { b'1' } else { b'0' };
        let mutated = String::from_utf8(bytes).unwrap();
        assert!(!verify(body, Some(&mutated), SECRET));
    }

    #[test]
    fn test_wrong_secret_fails() {
        let body = b"payload bytes";
        let header = expected_header(body, SECRET);
        assert!(!verify(body, Some(&header), "other-secret"));
    }

    #[test]
    fn test_missing_header_fails() {
        assert!(!verify(b"payload", None, SECRET));
    }

    #[test]
    fn test_malformed_header_fails() {
        assert!(!verify(b"payload", Some("sha256=not-hex"), SECRET));
        assert!(!verify(b"payload", Some("sha1=abcdef"), SECRET));
        assert!(!verify(b"payload", Some("sha256=abcd"), SECRET));
        assert!(!verify(b"payload", Some(""), SECRET));
    }

    #[test]
    fn test_empty_secret_fails_closed() {
        let body = b"payload bytes";
        let header = expected_header(body, "");
        assert!(!verify(body, Some(&header), ""));
    }
}
