//! HMAC-SHA256 signatures for outbound transactions and inbound callbacks.
//!
//! Callbacks are verified against the raw body bytes when the
//! `X-Callback-Signature` header is present. Without the header, a
//! `signature` field inside the body is accepted; the signed message is
//! then the body re-serialized with sorted keys and that field removed.

use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;

use crate::payments::CallbackEnvelope;

type HmacSha256 = Hmac<Sha256>;

/// Signature for `transaction/create`: HMAC over `merchant_code ‖ merchant_ref ‖ amount`.
pub fn sign_transaction(
    private_key: &str,
    merchant_code: &str,
    merchant_ref: &str,
    amount: i64,
) -> String {
    let message = format!("{merchant_code}{merchant_ref}{amount}");
    hex::encode(mac_bytes(private_key, message.as_bytes()))
}

/// Signature a gateway would put in `X-Callback-Signature`.
pub fn sign_callback_body(private_key: &str, body: &[u8]) -> String {
    hex::encode(mac_bytes(private_key, body))
}

/// Body with an embedded `signature` field, as sent without the header.
pub fn embed_callback_signature(private_key: &str, mut body: Value) -> Value {
    if let Value::Object(map) = &mut body {
        map.remove("signature");
    }
    let message = canonical_json(&body);
    let signature = hex::encode(mac_bytes(private_key, message.as_bytes()));
    if let Value::Object(map) = &mut body {
        map.insert("signature".to_string(), Value::String(signature));
    }
    body
}

/// Constant-time verification of a callback envelope.
pub fn verify_callback(private_key: &str, envelope: &CallbackEnvelope) -> bool {
    if let Some(header) = envelope.header_signature.as_deref() {
        return verify_hex(private_key, &envelope.body, header);
    }

    let Ok(Value::Object(mut map)) = serde_json::from_slice::<Value>(&envelope.body) else {
        return false;
    };
    let Some(Value::String(provided)) = map.remove("signature") else {
        return false;
    };
    let message = canonical_json(&Value::Object(map));
    verify_hex(private_key, message.as_bytes(), &provided)
}

fn verify_hex(private_key: &str, message: &[u8], provided_hex: &str) -> bool {
    let Ok(provided) = hex::decode(provided_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(private_key.as_bytes()) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(&provided).is_ok()
}

fn mac_bytes(private_key: &str, message: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(private_key.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

/// Compact JSON with object keys sorted at every level.
fn canonical_json(value: &Value) -> String {
    sort_keys(value).to_string()
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), sort_keys(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const KEY: &str = "merchant-private-key";

    #[test]
    fn transaction_signature_is_stable_hex() {
        let a = sign_transaction(KEY, "T0001", "INV-1", 10_000);
        let b = sign_transaction(KEY, "T0001", "INV-1", 10_000);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, sign_transaction(KEY, "T0001", "INV-1", 10_001));
    }

    #[test]
    fn header_signature_covers_raw_body() {
        let body = br#"{"reference":"R1","status":"PAID"}"#;
        let envelope = CallbackEnvelope::new(
            body.to_vec(),
            Some(sign_callback_body(KEY, body)),
        );
        assert!(verify_callback(KEY, &envelope));

        let tampered = CallbackEnvelope::new(
            br#"{"reference":"R2","status":"PAID"}"#.to_vec(),
            envelope.header_signature.clone(),
        );
        assert!(!verify_callback(KEY, &tampered));
        assert!(!verify_callback("other-key", &envelope));
    }

    #[test]
    fn embedded_signature_ignores_key_order() {
        let signed = embed_callback_signature(KEY, json!({"status": "PAID", "reference": "R1"}));
        let signature = signed["signature"].as_str().unwrap().to_string();

        let reordered = format!(
            r#"{{"signature":"{signature}","reference":"R1","status":"PAID"}}"#
        );
        assert!(verify_callback(
            KEY,
            &CallbackEnvelope::new(reordered.into_bytes(), None)
        ));
    }

    #[test]
    fn embedded_signature_rejects_tampering_and_absence() {
        let mut signed = embed_callback_signature(KEY, json!({"reference": "R1", "status": "FAILED"}));
        signed["status"] = json!("PAID");
        assert!(!verify_callback(
            KEY,
            &CallbackEnvelope::new(signed.to_string().into_bytes(), None)
        ));

        let unsigned = json!({"reference": "R1", "status": "PAID"});
        assert!(!verify_callback(
            KEY,
            &CallbackEnvelope::new(unsigned.to_string().into_bytes(), None)
        ));
    }

    #[test]
    fn non_hex_signature_is_rejected() {
        let envelope = CallbackEnvelope::new(b"{}".to_vec(), Some("zz-not-hex".to_string()));
        assert!(!verify_callback(KEY, &envelope));
    }
}
