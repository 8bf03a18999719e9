use serde::Deserialize;
use std::path::Path;

use super::ConfigError;
use crate::core::realtime::{FirstSpeaker, InputAudioTranscription, TurnDetection};

/// Complete YAML configuration structure
///
/// Every field is optional; values present here override the environment.
///
/// # Example YAML structure
/// ```yaml
/// api_key: "sk-..."
/// url: "wss://api.openai.com/v1/realtime"
/// model: "gpt-4o-realtime-preview-2024-12-17"
///
/// session:
///   instructions: "You are a patient math tutor."
///   voice: "sage"
///   modalities: ["text", "audio"]
///   first_speaker: "agent"
///   temperature: 0.8
///   turn_detection:
///     type: "server_vad"
///     silence_duration_ms: 500
///   input_audio_transcription:
///     model: "whisper-1"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub api_key: Option<String>,
    pub url: Option<String>,
    pub model: Option<String>,
    pub session: Option<SessionYaml>,
}

/// `session:` section
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub instructions: Option<String>,
    pub voice: Option<String>,
    pub modalities: Option<Vec<String>>,
    pub first_speaker: Option<FirstSpeaker>,
    pub temperature: Option<f32>,
    pub turn_detection: Option<TurnDetection>,
    pub input_audio_transcription: Option<InputAudioTranscription>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let config: YamlConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}
