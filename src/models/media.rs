use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Narrated audio, still base64-encoded as delivered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpeechClip {
    pub mime_type: String,
    pub data_base64: String,
}

impl SpeechClip {
    /// Raw audio bytes.
    pub fn decode(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(self.data_base64.trim())
            .map_err(|e| Error::upstream(format!("Speech audio is not valid base64: {}", e)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoAsset {
    pub uri: String,
    pub mime_type: Option<String>,
}

/// State of a long-running generation job as reported by one poll.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Pending,
    Succeeded(VideoAsset),
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speech_clip_decodes_audio() {
        let clip = SpeechClip {
            mime_type: "audio/L16".to_string(),
            data_base64: "AAAA".to_string(),
        };
        assert_eq!(clip.decode().unwrap(), vec![0u8, 0, 0]);

        let broken = SpeechClip {
            mime_type: "audio/L16".to_string(),
            data_base64: "not base64!".to_string(),
        };
        assert!(broken.decode().is_err());
    }
}
