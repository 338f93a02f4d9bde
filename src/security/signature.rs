use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Verifies the `X-Hub-Signature-256` header against the exact received body
/// bytes. The comparison is constant-time; a missing header, wrong prefix, or
/// malformed hex digest all verify as false. Callers must not parse the
/// payload before this returns true.
pub fn verify_signature(payload: &[u8], signature: &str, secret: &str) -> bool {
    let Some(received_hex) = signature.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };

    let Ok(received_mac) = hex::decode(received_hex) else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);

    mac.verify_slice(&received_mac).is_ok()
}

/// Computes the `sha256=<hex>` signature value for a payload. Used by tests
/// and by operators generating sample requests.
pub fn sign_payload(payload: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(payload);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-webhook-secret";

    #[test]
    fn accepts_valid_signature() {
        let body = br#"{"ref":"refs/heads/main"}"#;
        let signature = sign_payload(body, SECRET);
        assert!(verify_signature(body, &signature, SECRET));
    }

    #[test]
    fn rejects_wrong_secret() {
        let body = br#"{"ref":"refs/heads/main"}"#;
        let signature = sign_payload(body, "a-different-secret");
        assert!(!verify_signature(body, &signature, SECRET));
    }

    #[test]
    fn rejects_tampered_body() {
        let body = br#"{"ref":"refs/heads/main"}"#;
        let signature = sign_payload(body, SECRET);
        assert!(!verify_signature(br#"{"ref":"refs/heads/evil"}"#, &signature, SECRET));
    }

    #[test]
    fn rejects_missing_or_malformed_header() {
        let body = b"payload";
        assert!(!verify_signature(body, "", SECRET));
        assert!(!verify_signature(body, "sha1=abcdef", SECRET));
        assert!(!verify_signature(body, "deadbeef", SECRET));
        assert!(!verify_signature(body, "sha256=not-hex!", SECRET));
        assert!(!verify_signature(body, "sha256=", SECRET));
    }

    #[test]
    fn rejects_truncated_digest() {
        let body = b"payload";
        let signature = sign_payload(body, SECRET);
        assert!(!verify_signature(body, &signature[..signature.len() - 2], SECRET));
    }
}
