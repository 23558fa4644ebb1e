use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Canonical hash of a JSON payload. serde_json's default `Map` keeps keys
/// in sorted order, so `to_string` yields a canonical form.
pub fn payload_hash(value: &Value) -> String {
    sha256_hex(value.to_string().as_bytes())
}

/// Sentinel hash used in identity derivation when a payload side is absent
/// (CREATE has no `from`, DELETE has no `to`).
pub fn absent_payload_hash() -> String {
    sha256_hex(b"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_change_hash() {
        let a: Value =
            serde_json::from_str(r#"{"b": 2, "a": 1}"#).expect("valid json");
        let b: Value =
            serde_json::from_str(r#"{"a": 1, "b": 2}"#).expect("valid json");
        assert_eq!(payload_hash(&a), payload_hash(&b));
    }

    #[test]
    fn distinct_values_hash_differently() {
        assert_ne!(
            payload_hash(&json!({"a": 1})),
            payload_hash(&json!({"a": 2}))
        );
    }
}
