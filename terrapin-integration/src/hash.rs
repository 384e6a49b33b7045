use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Canonical serialization failed, so no stable fingerprint exists.
#[derive(Debug, Error)]
#[error("canonical serialization error: {0}")]
pub struct CanonicalError(#[from] serde_json::Error);

/// Serialize `value` to canonical JSON: object keys sorted recursively,
/// compact separators, no float formatting surprises beyond serde_json's.
///
/// Two semantically equal values always produce byte-identical output, which
/// makes the result safe to hash for idempotency fingerprints and cache keys.
pub fn canonical_json<T>(value: &T) -> Result<String, CanonicalError>
where
    T: Serialize + ?Sized,
{
    let value = serde_json::to_value(value)?;
    let mut output = String::with_capacity(128);
    write_canonical(&value, &mut output);
    Ok(output)
}

/// Canonical JSON of `value`, SHA-256, lowercase hex.
pub fn canonical_hash<T>(value: &T) -> Result<String, CanonicalError>
where
    T: Serialize + ?Sized,
{
    let canonical = canonical_json(value)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// SHA-256 of raw bytes as lowercase hex. Used to derive webhook dedup ids
/// from raw bodies when the broker supplies no id of its own.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn write_canonical(value: &serde_json::Value, output: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            output.push('{');
            let mut keys = map.keys().collect::<Vec<_>>();
            keys.sort_unstable();
            for (index, key) in keys.iter().enumerate() {
                if index > 0 {
                    output.push(',');
                }
                output.push_str(&serde_json::Value::String((*key).clone()).to_string());
                output.push(':');
                write_canonical(&map[*key], output);
            }
            output.push('}');
        }
        serde_json::Value::Array(items) => {
            output.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    output.push(',');
                }
                write_canonical(item, output);
            }
            output.push(']');
        }
        other => output.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Outer {
        zebra: u32,
        alpha: Inner,
    }

    #[derive(Serialize)]
    struct Inner {
        second: &'static str,
        first: bool,
    }

    #[test]
    fn test_canonical_json_sorts_keys_recursively() {
        let value = Outer {
            zebra: 1,
            alpha: Inner {
                second: "b",
                first: true,
            },
        };

        assert_eq!(
            canonical_json(&value).unwrap(),
            r#"{"alpha":{"first":true,"second":"b"},"zebra":1}"#
        );
    }

    #[test]
    fn test_canonical_hash_stable_across_key_order() {
        let a: serde_json::Value = serde_json::from_str(r#"{"x":1,"y":[{"b":2,"a":1}]}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"y":[{"a":1,"b":2}],"x":1}"#).unwrap();

        assert_eq!(canonical_hash(&a).unwrap(), canonical_hash(&b).unwrap());
    }

    #[test]
    fn test_canonical_hash_differs_for_different_values() {
        let a: serde_json::Value = serde_json::from_str(r#"{"qty":"10"}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"qty":"11"}"#).unwrap();

        assert_ne!(canonical_hash(&a).unwrap(), canonical_hash(&b).unwrap());
    }
}
