use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `message` under `secret`.
pub fn hmac_sha256_hex(secret: &[u8], message: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex signature. Malformed hex is simply a mismatch.
pub fn verify_hmac_sha256_hex(secret: &[u8], message: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_then_verify() {
        let sig = hmac_sha256_hex(b"whsec_test", b"payload");
        assert_eq!(sig.len(), 64);
        assert!(verify_hmac_sha256_hex(b"whsec_test", b"payload", &sig));
    }

    #[test]
    fn test_rejects_wrong_secret_body_or_garbage() {
        let sig = hmac_sha256_hex(b"whsec_test", b"payload");
        assert!(!verify_hmac_sha256_hex(b"other", b"payload", &sig));
        assert!(!verify_hmac_sha256_hex(b"whsec_test", b"payload2", &sig));
        assert!(!verify_hmac_sha256_hex(b"whsec_test", b"payload", "zz-not-hex"));
        assert!(!verify_hmac_sha256_hex(b"whsec_test", b"payload", ""));
    }
}
