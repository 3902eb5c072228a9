//! Base64/JSON helpers for the mocknet ABI boundary (spec.md §4.4 "Base64
//! & JSON"): `Binary`-typed fields are base64-encoded UTF-8 JSON.

use crate::error::AnyResult;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;

/// Encodes `value` as JSON, then base64 — the same transform
/// `to_binary` performs contract-side (spec.md §4.4).
pub fn b64_json<T: Serialize>(value: &T) -> AnyResult<String> {
    let json = serde_json::to_vec(value)?;
    Ok(STANDARD.encode(json))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_string_matches_known_vector() {
        // b64("\"Echo\"") = "IkVjaG8i" (spec.md §4.4 test vector).
        assert_eq!(b64_json(&"Echo").unwrap(), "IkVjaG8i");
    }

    #[test]
    fn encodes_a_json_object() {
        let value = serde_json::json!({"balance": 42, "denom": "ucosm"});
        let encoded = b64_json(&value).unwrap();
        let decoded: serde_json::Value = serde_json::from_slice(&STANDARD.decode(&encoded).unwrap()).unwrap();
        assert_eq!(decoded, value);
    }
}
