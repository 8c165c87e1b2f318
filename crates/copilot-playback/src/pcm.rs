//! PCM16 input accepted by the engine.

use crate::error::{EngineError, EngineResult};
use base64::Engine as _;
use std::sync::Arc;

/// Track id used when the producer does not tag its audio.
pub const DEFAULT_TRACK_ID: &str = "default";

/// One chunk of assistant speech as handed to [`crate::StreamingPlaybackEngine::add_16bit_pcm`].
#[derive(Debug, Clone, PartialEq)]
pub enum PcmBuffer {
    /// Raw little-endian PCM16 bytes.
    Bytes(Vec<u8>),
    /// Already-decoded samples.
    Samples(Vec<i16>),
    /// Base64 PCM16, as carried by realtime `response.audio.delta` events.
    Base64(String),
}

impl PcmBuffer {
    /// Decode into an immutable sample buffer shared with the render thread.
    pub fn into_samples(self) -> EngineResult<Arc<[i16]>> {
        match self {
            PcmBuffer::Samples(samples) => Ok(samples.into()),
            PcmBuffer::Bytes(bytes) => bytes_to_samples(&bytes),
            PcmBuffer::Base64(encoded) => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| EngineError::InvalidBufferType(format!("bad base64: {e}")))?;
                bytes_to_samples(&bytes)
            }
        }
    }
}

fn bytes_to_samples(bytes: &[u8]) -> EngineResult<Arc<[i16]>> {
    if bytes.len() % 2 != 0 {
        return Err(EngineError::InvalidBufferType(format!(
            "odd byte length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

impl From<Vec<i16>> for PcmBuffer {
    fn from(samples: Vec<i16>) -> Self {
        PcmBuffer::Samples(samples)
    }
}

impl From<&[i16]> for PcmBuffer {
    fn from(samples: &[i16]) -> Self {
        PcmBuffer::Samples(samples.to_vec())
    }
}

impl From<Vec<u8>> for PcmBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        PcmBuffer::Bytes(bytes)
    }
}

impl From<&[u8]> for PcmBuffer {
    fn from(bytes: &[u8]) -> Self {
        PcmBuffer::Bytes(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn little_endian_bytes_decode() {
        let samples = PcmBuffer::Bytes(vec![0x01, 0x00, 0xff, 0x7f, 0x00, 0x80])
            .into_samples()
            .unwrap();
        assert_eq!(&samples[..], &[1, i16::MAX, i16::MIN]);
    }

    #[test]
    fn odd_length_is_not_pcm16() {
        let err = PcmBuffer::Bytes(vec![1, 2, 3]).into_samples().unwrap_err();
        assert!(matches!(err, EngineError::InvalidBufferType(_)));
    }

    #[test]
    fn base64_payload_decodes() {
        // [1000, -1000] little-endian
        let samples = PcmBuffer::Base64("6AMY/A==".to_string()).into_samples().unwrap();
        assert_eq!(&samples[..], &[1000, -1000]);
    }

    #[test]
    fn garbage_base64_is_rejected() {
        let err = PcmBuffer::Base64("not base64!".to_string())
            .into_samples()
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidBufferType(_)));
    }
}
