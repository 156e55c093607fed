//! Envelope codec.
//!
//! Envelopes travel as compact JSON objects. Decoding is strict about the
//! two correlation fields (`method`, `tid`) and lenient about everything
//! else: `data` defaults to `null` and unknown fields are preserved.

use bytes::Bytes;

use crate::{Envelope, Result, RpcError};

/// Serialize an envelope to its wire representation.
///
/// # Errors
///
/// Returns [`RpcError::Serialization`] if JSON encoding fails.
pub fn encode(envelope: &Envelope) -> Result<Bytes> {
    // ---
    let bytes = serde_json::to_vec(envelope)?;
    Ok(Bytes::from(bytes))
}

/// Deserialize an envelope from its wire representation.
///
/// # Errors
///
/// Returns [`RpcError::Decode`] if the bytes are not a JSON object, if
/// `method` or `tid` is missing or mistyped, or if `method` is empty.
pub fn decode(bytes: &[u8]) -> Result<Envelope> {
    // ---
    let envelope: Envelope =
        serde_json::from_slice(bytes).map_err(|err| RpcError::Decode(err.to_string()))?;

    if envelope.method.is_empty() {
        return Err(RpcError::Decode("empty method".into()));
    }

    Ok(envelope)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::TransactionId;
    use serde_json::json;

    #[test]
    fn test_round_trip_preserves_fields() {
        // ---
        let env = Envelope::new("echo", 1, json!({"msg": "hi", "nested": [1, 2, {"x": null}]}))
            .with_timestamp(1_700_000_000_123u64)
            .with_field("bid", json!("0c9a"))
            .with_field("gateway", json!("dock-7"));

        let decoded = decode(&encode(&env).unwrap()).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn test_round_trip_string_tid_without_timestamp() {
        // ---
        let env = Envelope::new("ping", TransactionId::generate(), json!(null));
        let bytes = encode(&env).unwrap();

        let raw: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(raw.get("timestamp").is_none());

        assert_eq!(decode(&bytes).unwrap(), env);
    }

    #[test]
    fn test_wire_field_names() {
        // ---
        let env = Envelope::new("echo", 3, json!({"msg": "hi"})).with_timestamp(10u64);
        let raw: serde_json::Value = serde_json::from_slice(&encode(&env).unwrap()).unwrap();

        assert_eq!(
            raw,
            json!({"method": "echo", "tid": 3, "timestamp": 10, "data": {"msg": "hi"}})
        );
    }

    #[test]
    fn test_decode_float_timestamp_and_missing_data() {
        // ---
        let env = decode(br#"{"method":"echo","tid":"t-1","timestamp":1717.25}"#).unwrap();
        assert_eq!(env.tid, TransactionId::from("t-1"));
        assert_eq!(env.data, serde_json::Value::Null);
        assert_eq!(env.timestamp.unwrap().as_f64(), Some(1717.25));
    }

    #[test]
    fn test_round_trip_numeric_tids_outside_i64() {
        // ---
        for raw in [
            br#"{"method":"echo","tid":18446744073709551615,"data":{}}"#.as_slice(),
            br#"{"method":"echo","tid":1.5,"data":{}}"#.as_slice(),
        ] {
            let env = decode(raw).unwrap();
            let wire: serde_json::Value = serde_json::from_slice(&encode(&env).unwrap()).unwrap();
            let original: serde_json::Value = serde_json::from_slice(raw).unwrap();

            assert_eq!(wire["tid"], original["tid"]);
            assert_eq!(decode(&encode(&env).unwrap()).unwrap(), env);
        }

        let env = decode(br#"{"method":"echo","tid":18446744073709551615}"#).unwrap();
        assert_eq!(env.tid, TransactionId::from(u64::MAX));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        // ---
        let cases: [&[u8]; 6] = [
            b"not json",
            b"[1,2,3]",
            br#"{"tid":1,"data":{}}"#,
            br#"{"method":"echo","data":{}}"#,
            br#"{"method":"","tid":1}"#,
            br#"{"method":"echo","tid":{"nested":true}}"#,
        ];

        for bytes in cases {
            assert!(
                matches!(decode(bytes), Err(RpcError::Decode(_))),
                "expected decode error for {:?}",
                String::from_utf8_lossy(bytes)
            );
        }
    }
}
