//! Payload encoding: JSON, optionally zstd-compressed

use super::diff::StatePayload;
use crate::errors::CheckpointError;

/// Bytes ready to hand to the store
#[derive(Debug, Clone)]
pub struct EncodedPayload {
    pub bytes: Vec<u8>,
    pub compressed: bool,
    /// Serialized size before compression
    pub raw_size: usize,
}

/// Serialize a payload, compressing it when it exceeds `threshold` bytes.
pub fn encode(
    payload: &StatePayload,
    threshold: usize,
    level: i32,
) -> Result<EncodedPayload, CheckpointError> {
    let json = serde_json::to_vec(payload).map_err(|e| CheckpointError::Encode(e.to_string()))?;
    let raw_size = json.len();

    if raw_size > threshold {
        let compressed = zstd::encode_all(json.as_slice(), level)
            .map_err(|e| CheckpointError::Encode(format!("zstd: {}", e)))?;
        return Ok(EncodedPayload {
            bytes: compressed,
            compressed: true,
            raw_size,
        });
    }

    Ok(EncodedPayload {
        bytes: json,
        compressed: false,
        raw_size,
    })
}

/// Decode stored bytes back into a payload.
pub fn decode(
    checkpoint_id: &str,
    bytes: &[u8],
    compressed: bool,
) -> Result<StatePayload, CheckpointError> {
    let decode_err = |message: String| CheckpointError::Decode {
        checkpoint_id: checkpoint_id.to_string(),
        message,
    };

    if compressed {
        let json = zstd::decode_all(bytes).map_err(|e| decode_err(format!("zstd: {}", e)))?;
        serde_json::from_slice(&json).map_err(|e| decode_err(e.to_string()))
    } else {
        serde_json::from_slice(bytes).map_err(|e| decode_err(e.to_string()))
    }
}
