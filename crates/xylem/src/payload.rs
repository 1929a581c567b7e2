//! Read payloads: the kind-specific descriptor carried by a read transform.

use crate::pipeline::{FunctionSpec, IsBounded};
use serde::{Deserialize, Serialize};

/// Schema version written by `ReadPayload::encode`.
pub const READ_PAYLOAD_VERSION: u32 = 1;

/// Descriptor of the producer behind a read transform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadPayload {
    pub version: u32,
    /// The producer: a source URN plus its encoded description.
    pub source: FunctionSpec,
    #[serde(default)]
    pub is_bounded: IsBounded,
}

impl ReadPayload {
    pub fn bounded(source: FunctionSpec) -> Self {
        Self {
            version: READ_PAYLOAD_VERSION,
            source,
            is_bounded: IsBounded::Bounded,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        serde_json::to_vec(self).map_err(|e| PayloadError::Malformed(e.to_string()))
    }

    pub fn decode(data: &[u8]) -> Result<Self, PayloadError> {
        let payload: ReadPayload =
            serde_json::from_slice(data).map_err(|e| PayloadError::Malformed(e.to_string()))?;
        if payload.version != READ_PAYLOAD_VERSION {
            return Err(PayloadError::UnsupportedVersion(payload.version));
        }
        Ok(payload)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("malformed read payload: {0}")]
    Malformed(String),

    #[error("unsupported read payload version {0}")]
    UnsupportedVersion(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let payload = ReadPayload::bounded(FunctionSpec::new("xylem:source:range:v1", b"{}".to_vec()));
        let bytes = payload.encode().unwrap();
        assert_eq!(ReadPayload::decode(&bytes).unwrap(), payload);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            ReadPayload::decode(b"\x00\x01garbage"),
            Err(PayloadError::Malformed(_))
        ));
    }

    #[test]
    fn test_rejects_future_version() {
        let bytes = br#"{"version":2,"source":{"urn":"x","payload":""}}"#;
        assert!(matches!(
            ReadPayload::decode(bytes),
            Err(PayloadError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn test_boundedness_defaults_to_bounded() {
        let bytes = br#"{"version":1,"source":{"urn":"x","payload":""}}"#;
        assert_eq!(
            ReadPayload::decode(bytes).unwrap().is_bounded,
            IsBounded::Bounded
        );
    }
}
