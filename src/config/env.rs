use std::env;

/// Configuration values read from environment variables.
///
/// Unset and blank variables are both treated as absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct EnvConfig {
    pub api_key: Option<String>,
    pub url: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub instructions: Option<String>,
    pub first_speaker: Option<String>,
}

pub(crate) const API_KEY_VAR: &str = "OPENAI_API_KEY";
pub(crate) const URL_VAR: &str = "REALTIME_URL";
pub(crate) const MODEL_VAR: &str = "REALTIME_MODEL";
pub(crate) const VOICE_VAR: &str = "REALTIME_VOICE";
pub(crate) const INSTRUCTIONS_VAR: &str = "REALTIME_INSTRUCTIONS";
pub(crate) const FIRST_SPEAKER_VAR: &str = "REALTIME_FIRST_SPEAKER";

fn var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl EnvConfig {
    pub(crate) fn load() -> Self {
        Self {
            api_key: var(API_KEY_VAR),
            url: var(URL_VAR),
            model: var(MODEL_VAR),
            voice: var(VOICE_VAR),
            instructions: var(INSTRUCTIONS_VAR),
            first_speaker: var(FIRST_SPEAKER_VAR),
        }
    }
}
