//! Value serializers for memoized results.

use genetwork_core::CodecError;
use serde::{de::DeserializeOwned, Serialize};

/// Converts a memoized result to the string stored in a backend and back.
pub trait ValueCodec<V>: Send + Sync {
    fn encode(&self, value: &V) -> Result<String, CodecError>;
    fn decode(&self, raw: &str) -> Result<V, CodecError>;
}

/// Stores `String` results as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainText;

impl ValueCodec<String> for PlainText {
    fn encode(&self, value: &String) -> Result<String, CodecError> {
        Ok(value.clone())
    }

    fn decode(&self, raw: &str) -> Result<String, CodecError> {
        Ok(raw.to_string())
    }
}

/// Stores results as compact JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<V: Serialize + DeserializeOwned> ValueCodec<V> for JsonCodec {
    fn encode(&self, value: &V) -> Result<String, CodecError> {
        serde_json::to_string(value).map_err(|e| CodecError::Serialization {
            reason: e.to_string(),
        })
    }

    fn decode(&self, raw: &str) -> Result<V, CodecError> {
        serde_json::from_str(raw).map_err(|e| CodecError::Serialization {
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct AvatarMeta {
        seed: u64,
        layers: Vec<String>,
    }

    #[test]
    fn test_plain_text_is_identity() {
        let raw = PlainText.encode(&"<svg/>".to_string()).unwrap();
        assert_eq!(raw, "<svg/>");
        assert_eq!(PlainText.decode(&raw).unwrap(), "<svg/>");
    }

    #[test]
    fn test_json_roundtrip() {
        let meta = AvatarMeta {
            seed: 42,
            layers: vec!["base".into(), "eyes".into()],
        };
        let raw = JsonCodec.encode(&meta).unwrap();
        assert_eq!(raw, r#"{"seed":42,"layers":["base","eyes"]}"#);
        let back: AvatarMeta = JsonCodec.decode(&raw).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn test_json_decode_failure() {
        let err = ValueCodec::<AvatarMeta>::decode(&JsonCodec, "not json").unwrap_err();
        assert!(matches!(err, CodecError::Serialization { .. }));
    }
}
