//! Request fingerprints.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// SHA-256 of the command name and the canonical JSON of its parameters.
///
/// Object keys are sorted recursively so that `{"a":1,"b":2}` and
/// `{"b":2,"a":1}` fingerprint identically.
#[must_use]
pub fn fingerprint(command: &str, params: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(params, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(command.as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical.as_bytes());
    hex(&hasher.finalize())
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(inner) = map.get(key) {
                    write_canonical(inner, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_does_not_matter() {
        let a = json!({"amount": "60.00", "nested": {"x": 1, "y": [1, 2]}});
        let b = json!({"nested": {"y": [1, 2], "x": 1}, "amount": "60.00"});
        assert_eq!(fingerprint("payment.create", &a), fingerprint("payment.create", &b));
    }

    #[test]
    fn test_values_and_command_matter() {
        let a = json!({"amount": "60.00"});
        let b = json!({"amount": "60.01"});
        assert_ne!(fingerprint("payment.create", &a), fingerprint("payment.create", &b));
        assert_ne!(fingerprint("payment.create", &a), fingerprint("invoice.create", &a));
    }

    #[test]
    fn test_array_order_matters() {
        let a = json!({"lines": [1, 2]});
        let b = json!({"lines": [2, 1]});
        assert_ne!(fingerprint("journal.post", &a), fingerprint("journal.post", &b));
    }

    #[test]
    fn test_hex_digest_shape() {
        let digest = fingerprint("x", &json!(null));
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
