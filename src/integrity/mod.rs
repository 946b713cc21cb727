//! Integrity layer
//!
//! A payload's checksum is CRC32 (IEEE) over its canonical serialization,
//! rendered as 8 lowercase hex digits. Canonical serialization is compact
//! JSON with object keys sorted at every depth, so two equal payloads always
//! produce the same bytes and the same checksum regardless of how their
//! objects were built.
//!
//! The checksum detects accidental corruption only. It is not keyed and
//! offers no protection against deliberate tampering.

use crc32fast::Hasher;
use serde_json::Value;

/// Serializes `payload` to canonical JSON bytes.
pub fn canonical_bytes(payload: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    write_canonical(payload, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push(b'{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_scalar(&Value::String(key.clone()), out);
                out.push(b':');
                write_canonical(val, out);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        scalar => write_scalar(scalar, out),
    }
}

fn write_scalar(value: &Value, out: &mut Vec<u8>) {
    // Serializing a scalar into a Vec cannot fail
    if serde_json::to_writer(&mut *out, value).is_err() {
        out.extend_from_slice(b"null");
    }
}

/// CRC32 over raw bytes, as lowercase hex.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(data);
    format!("{:08x}", hasher.finalize())
}

/// Checksum of a payload (over its canonical serialization).
pub fn hash(payload: &Value) -> String {
    checksum_bytes(&canonical_bytes(payload))
}

/// Verifies raw canonical bytes against a stored checksum.
pub fn verify_bytes(data: &[u8], expected: &str) -> bool {
    checksum_bytes(data) == expected
}

/// Verifies a payload against a stored checksum.
pub fn verify(payload: &Value, expected: &str) -> bool {
    hash(payload) == expected
}
