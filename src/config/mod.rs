//! Client configuration
//!
//! Configuration comes from environment variables (with `.env` loaded by the
//! binary at startup) and an optional YAML file. Priority: YAML > ENV vars >
//! .env values > defaults.
//!
//! # Environment variables
//! - `OPENAI_API_KEY` (required)
//! - `REALTIME_URL` (default `wss://api.openai.com/v1/realtime`)
//! - `REALTIME_MODEL`
//! - `REALTIME_VOICE`
//! - `REALTIME_INSTRUCTIONS`
//! - `REALTIME_FIRST_SPEAKER` (`agent` or `user`)
//!
//! # Example
//! ```rust,no_run
//! use waav_realtime_client::config::ClientConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ClientConfig::from_env()?;
//!
//! // Load from YAML file with environment variables as the base
//! let config = ClientConfig::from_file(&PathBuf::from("realtime.yaml"))?;
//! println!("Connecting to {}", config.url);
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use thiserror::Error;

mod env;
mod yaml;

pub use yaml::{SessionYaml, YamlConfig};

use crate::core::realtime::{
    FirstSpeaker, InputAudioTranscription, Modality, OPENAI_REALTIME_URL,
    OpenAIRealtimeAudioFormat, OpenAIRealtimeModel, OpenAIRealtimeVoice, SessionConfig,
    TurnDetection,
};

/// Sampling temperature range accepted by the realtime API.
const TEMPERATURE_RANGE: std::ops::RangeInclusive<f32> = 0.6..=1.2;

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("API key is required (set OPENAI_API_KEY or api_key in the config file)")]
    MissingApiKey,

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Per-session settings applied at handshake time
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// System instructions for the agent
    pub instructions: Option<String>,
    pub voice: OpenAIRealtimeVoice,
    /// Response modalities, `["text", "audio"]` by default
    pub modalities: Vec<String>,
    pub first_speaker: FirstSpeaker,
    pub temperature: Option<f32>,
    /// Server default when unset
    pub turn_detection: Option<TurnDetection>,
    pub input_audio_transcription: Option<InputAudioTranscription>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            instructions: None,
            voice: OpenAIRealtimeVoice::default(),
            modalities: Modality::voice(),
            first_speaker: FirstSpeaker::default(),
            temperature: None,
            turn_detection: None,
            input_audio_transcription: None,
        }
    }
}

/// Client configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Bearer token for the realtime endpoint
    pub api_key: String,
    /// Endpoint URL without the `model` query parameter
    pub url: String,
    pub model: OpenAIRealtimeModel,
    pub session: SessionSettings,
}

impl ClientConfig {
    /// Configuration with defaults and the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            url: OPENAI_REALTIME_URL.to_string(),
            model: OpenAIRealtimeModel::default(),
            session: SessionSettings::default(),
        }
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error when the API key is missing or a value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_sources(env::EnvConfig::load(), None)
    }

    /// Load configuration from a YAML file, with environment variables as the base
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - No API key is configured anywhere
    /// - A configured value is invalid
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml_config = YamlConfig::from_file(path)?;
        Self::from_sources(env::EnvConfig::load(), Some(yaml_config))
    }

    fn from_sources(env: env::EnvConfig, yaml: Option<YamlConfig>) -> Result<Self, ConfigError> {
        let mut config = Self::new(String::new());

        // Environment first
        if let Some(api_key) = env.api_key {
            config.api_key = api_key;
        }
        if let Some(url) = env.url {
            config.url = url;
        }
        if let Some(model) = env.model {
            config.model = OpenAIRealtimeModel::from_str_or_default(&model);
        }
        if let Some(voice) = env.voice {
            config.session.voice = OpenAIRealtimeVoice::from_str_or_default(&voice);
        }
        if env.instructions.is_some() {
            config.session.instructions = env.instructions;
        }
        if let Some(first_speaker) = env.first_speaker {
            config.session.first_speaker = FirstSpeaker::from_str_or_default(&first_speaker);
        }

        // YAML overrides
        if let Some(yaml) = yaml {
            if let Some(api_key) = yaml.api_key {
                config.api_key = api_key;
            }
            if let Some(url) = yaml.url {
                config.url = url;
            }
            if let Some(model) = yaml.model {
                config.model = OpenAIRealtimeModel::from_str_or_default(&model);
            }
            if let Some(session) = yaml.session {
                config.session.apply(session);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the server would reject
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }

        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(ConfigError::Invalid {
                field: "url",
                reason: format!("'{}' is not a ws:// or wss:// URL", self.url),
            });
        }

        if self.session.modalities.is_empty() {
            return Err(ConfigError::Invalid {
                field: "modalities",
                reason: "at least one modality is required".to_string(),
            });
        }
        if let Some(unknown) = self
            .session
            .modalities
            .iter()
            .find(|m| *m != Modality::Text.as_str() && *m != Modality::Audio.as_str())
        {
            return Err(ConfigError::Invalid {
                field: "modalities",
                reason: format!("unknown modality '{}'", unknown),
            });
        }

        if let Some(temperature) = self.session.temperature {
            if !TEMPERATURE_RANGE.contains(&temperature) {
                return Err(ConfigError::Invalid {
                    field: "temperature",
                    reason: format!(
                        "{} is outside {}..={}",
                        temperature,
                        TEMPERATURE_RANGE.start(),
                        TEMPERATURE_RANGE.end()
                    ),
                });
            }
        }

        Ok(())
    }

    /// Build the `session.update` payload from the session settings
    pub fn session_config(&self) -> SessionConfig {
        let settings = &self.session;
        SessionConfig {
            modalities: Some(settings.modalities.clone()),
            instructions: settings.instructions.clone(),
            voice: Some(settings.voice.as_str().to_string()),
            input_audio_format: Some(OpenAIRealtimeAudioFormat::Pcm16),
            output_audio_format: Some(OpenAIRealtimeAudioFormat::Pcm16),
            input_audio_transcription: settings.input_audio_transcription.clone(),
            turn_detection: settings.turn_detection.clone(),
            temperature: settings.temperature,
            ..Default::default()
        }
    }
}

impl SessionSettings {
    fn apply(&mut self, yaml: SessionYaml) {
        if yaml.instructions.is_some() {
            self.instructions = yaml.instructions;
        }
        if let Some(voice) = yaml.voice {
            self.voice = OpenAIRealtimeVoice::from_str_or_default(&voice);
        }
        if let Some(modalities) = yaml.modalities {
            self.modalities = modalities;
        }
        if let Some(first_speaker) = yaml.first_speaker {
            self.first_speaker = first_speaker;
        }
        if yaml.temperature.is_some() {
            self.temperature = yaml.temperature;
        }
        if yaml.turn_detection.is_some() {
            self.turn_detection = yaml.turn_detection;
        }
        if yaml.input_audio_transcription.is_some() {
            self.input_audio_transcription = yaml.input_audio_transcription;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::env::{
        API_KEY_VAR, FIRST_SPEAKER_VAR, INSTRUCTIONS_VAR, MODEL_VAR, URL_VAR, VOICE_VAR,
    };
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn cleanup_env_vars() {
        // SAFETY: tests touching the environment are serialized
        unsafe {
            for name in [
                API_KEY_VAR,
                URL_VAR,
                MODEL_VAR,
                VOICE_VAR,
                INSTRUCTIONS_VAR,
                FIRST_SPEAKER_VAR,
            ] {
                std::env::remove_var(name);
            }
        }
    }

    fn set_env(name: &str, value: &str) {
        // SAFETY: tests touching the environment are serialized
        unsafe {
            std::env::set_var(name, value);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();
        set_env(API_KEY_VAR, "sk-env");

        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.api_key, "sk-env");
        assert_eq!(config.url, OPENAI_REALTIME_URL);
        assert_eq!(config.model, OpenAIRealtimeModel::default());
        assert_eq!(config.session, SessionSettings::default());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        cleanup_env_vars();
        set_env(API_KEY_VAR, "sk-env");
        set_env(URL_VAR, "ws://localhost:9000/v1/realtime");
        set_env(MODEL_VAR, "gpt-4o-mini-realtime-preview");
        set_env(VOICE_VAR, "verse");
        set_env(INSTRUCTIONS_VAR, "Be concise.");
        set_env(FIRST_SPEAKER_VAR, "user");

        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.url, "ws://localhost:9000/v1/realtime");
        assert_eq!(config.model, OpenAIRealtimeModel::Gpt4oMiniRealtimePreview);
        assert_eq!(config.session.voice, OpenAIRealtimeVoice::Verse);
        assert_eq!(config.session.instructions.as_deref(), Some("Be concise."));
        assert_eq!(config.session.first_speaker, FirstSpeaker::User);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_missing_api_key() {
        cleanup_env_vars();
        set_env(API_KEY_VAR, "   ");

        let result = ClientConfig::from_env();
        assert!(matches!(result, Err(ConfigError::MissingApiKey)));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_overrides_env() {
        cleanup_env_vars();
        set_env(API_KEY_VAR, "sk-env");
        set_env(VOICE_VAR, "echo");
        set_env(INSTRUCTIONS_VAR, "from env");

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(
            &config_path,
            r#"
session:
  instructions: "from yaml"
  temperature: 0.8
  first_speaker: "user"
"#,
        )
        .unwrap();

        let config = ClientConfig::from_file(&config_path).unwrap();
        assert_eq!(config.api_key, "sk-env");
        assert_eq!(config.session.voice, OpenAIRealtimeVoice::Echo);
        assert_eq!(config.session.instructions.as_deref(), Some("from yaml"));
        assert_eq!(config.session.temperature, Some(0.8));
        assert_eq!(config.session.first_speaker, FirstSpeaker::User);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_only() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(
            &config_path,
            "api_key: \"sk-yaml\"\nurl: \"wss://realtime.example.com/v1\"\n",
        )
        .unwrap();

        let config = ClientConfig::from_file(&config_path).unwrap();
        assert_eq!(config.api_key, "sk-yaml");
        assert_eq!(config.url, "wss://realtime.example.com/v1");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ClientConfig::new("sk-test");
        assert!(config.validate().is_ok());

        config.url = "https://api.openai.com/v1/realtime".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "url", .. })
        ));

        let mut config = ClientConfig::new("sk-test");
        config.session.modalities = vec!["video".to_string()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "modalities",
                ..
            })
        ));

        let mut config = ClientConfig::new("sk-test");
        config.session.temperature = Some(2.0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn test_session_config() {
        let mut config = ClientConfig::new("sk-test");
        config.session.instructions = Some("You are a tutor.".to_string());
        config.session.voice = OpenAIRealtimeVoice::Sage;

        let session = config.session_config();
        assert_eq!(session.instructions.as_deref(), Some("You are a tutor."));
        assert_eq!(session.voice.as_deref(), Some("sage"));
        assert_eq!(session.modalities, Some(vec!["text".to_string(), "audio".to_string()]));
        assert_eq!(session.input_audio_format, Some(OpenAIRealtimeAudioFormat::Pcm16));
        assert!(session.tools.is_none());
    }
}
