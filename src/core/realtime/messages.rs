//! Realtime protocol events.
//!
//! All events are JSON objects discriminated by their `type` field.
//!
//! # Protocol Overview
//!
//! Client events (sent to server):
//! - session.update - Configure the session (the handshake)
//! - response.create - Ask the agent to respond now
//! - conversation.item.create - Add a user text turn
//! - input_audio_buffer.append - Stream microphone audio
//!
//! Server events acted on by the session:
//! - session.updated - Handshake acknowledged
//! - response.audio.delta - Assistant audio fragment
//! - input_audio_buffer.speech_started - User barge-in
//! - error - Server-reported failure
//!
//! `session.created`, `input_audio_buffer.speech_stopped` and `response.done`
//! are decoded for bookkeeping; every other event type decodes to
//! [`ServerEvent::Unknown`].

use serde::{Deserialize, Serialize};

use super::base::{RealtimeError, RealtimeResult};
use super::config::OpenAIRealtimeAudioFormat;

// =============================================================================
// Session Configuration
// =============================================================================

/// Session configuration sent once in `session.update`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Response modalities (text, audio)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    /// System instructions for the agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Voice for audio output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<OpenAIRealtimeAudioFormat>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<OpenAIRealtimeAudioFormat>,

    /// Transcription of user audio
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,

    /// Turn detection strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,

    /// Function tools the agent may call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,

    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum output tokens per response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_response_output_tokens: Option<MaxTokens>,
}

impl SessionConfig {
    /// A voice conversation: text plus audio, PCM16 in both directions.
    pub fn voice_conversation(instructions: impl Into<String>) -> Self {
        Self {
            modalities: Some(super::config::Modality::voice()),
            instructions: Some(instructions.into()),
            input_audio_format: Some(OpenAIRealtimeAudioFormat::Pcm16),
            output_audio_format: Some(OpenAIRealtimeAudioFormat::Pcm16),
            ..Default::default()
        }
    }
}

/// Maximum tokens configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaxTokens {
    /// Specific number of tokens
    Number(i32),
    /// No limit, serialized as `"inf"`
    Infinite(String),
}

/// Input audio transcription configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    /// Transcription model (e.g., "whisper-1")
    pub model: String,
}

/// Turn detection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Server-side voice activity detection
    #[serde(rename = "server_vad")]
    ServerVad {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
    },
    /// Semantic turn detection
    #[serde(rename = "semantic_vad")]
    SemanticVad {
        /// low, medium, high or auto
        #[serde(default, skip_serializing_if = "Option::is_none")]
        eagerness: Option<String>,
    },
}

/// Function tool definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    /// Always "function"
    #[serde(rename = "type")]
    pub tool_type: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema of the arguments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item carried by `conversation.item.create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item type, "message" for text turns
    #[serde(rename = "type")]
    pub item_type: String,
    /// user, assistant or system
    pub role: String,
    pub content: Vec<ContentPart>,
}

impl ConversationItem {
    /// A user message with a single text part.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            item_type: "message".to_string(),
            role: "user".to_string(),
            content: vec![ContentPart {
                content_type: "input_text".to_string(),
                text: text.into(),
            }],
        }
    }
}

/// Content part within a conversation item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

// =============================================================================
// Response Configuration
// =============================================================================

/// Per-response overrides for `response.create`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// Instructions for this response only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Modalities for this response only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Events sent to the realtime server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Configure the session
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    /// Ask the agent to respond
    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseConfig>,
    },

    /// Add an item to the conversation
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    /// Append microphone audio to the input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded PCM16
        audio: String,
    },
}

impl ClientEvent {
    /// Wire name of the event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SessionUpdate { .. } => "session.update",
            Self::ResponseCreate { .. } => "response.create",
            Self::ConversationItemCreate { .. } => "conversation.item.create",
            Self::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
        }
    }

    /// Serialize to the JSON text sent on the wire.
    pub fn to_json(&self) -> RealtimeResult<String> {
        serde_json::to_string(self).map_err(|e| {
            RealtimeError::SerializationError(format!("{}: {}", self.event_type(), e))
        })
    }
}

// =============================================================================
// Server Events (received from server)
// =============================================================================

/// Events received from the realtime server.
///
/// Fields the session does not act on are optional so that minor shape
/// differences between server versions do not turn into protocol errors.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: Option<ApiError>,
    },

    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: Option<SessionInfo>,
    },

    /// Handshake acknowledgment
    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        session: Option<SessionInfo>,
    },

    /// The user started talking
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: Option<u64>,
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        #[serde(default)]
        audio_end_ms: Option<u64>,
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Assistant audio fragment
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        /// Base64-encoded PCM16
        delta: String,
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: Option<serde_json::Value>,
    },

    /// Any event type the session does not handle
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Decode one inbound text message.
    ///
    /// Anything that is not a JSON object with a string `type` field, or a
    /// known event with the wrong shape, is a [`RealtimeError::Protocol`].
    pub fn parse(text: &str) -> RealtimeResult<Self> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| RealtimeError::Protocol(format!("message is not JSON: {}", e)))?;

        let event_type = match value.as_object() {
            Some(object) => match object.get("type").and_then(|t| t.as_str()) {
                Some(event_type) => event_type.to_string(),
                None => {
                    return Err(RealtimeError::Protocol(
                        "message has no string type field".to_string(),
                    ));
                }
            },
            None => {
                return Err(RealtimeError::Protocol(
                    "message is not a JSON object".to_string(),
                ));
            }
        };

        match Self::deserialize(&value) {
            Ok(event) => Ok(event),
            Err(e) => Self::from_loose(&event_type, &value).ok_or_else(|| {
                RealtimeError::Protocol(format!("malformed {} event: {}", event_type, e))
            }),
        }
    }

    /// Recover the events the session must act on from an off-shape payload.
    ///
    /// Only the tag matters for `error`, `session.updated` and `speech_started`;
    /// their records are read field by field and anything unreadable is dropped.
    fn from_loose(event_type: &str, value: &serde_json::Value) -> Option<Self> {
        let event = match event_type {
            "error" => Self::Error {
                error: value.get("error").and_then(ApiError::from_loose),
            },
            "session.created" => Self::SessionCreated {
                session: value.get("session").map(SessionInfo::from_loose),
            },
            "session.updated" => Self::SessionUpdated {
                session: value.get("session").map(SessionInfo::from_loose),
            },
            "input_audio_buffer.speech_started" => Self::SpeechStarted {
                audio_start_ms: value.get("audio_start_ms").and_then(|v| v.as_u64()),
                item_id: loose_string(value.get("item_id")),
            },
            "input_audio_buffer.speech_stopped" => Self::SpeechStopped {
                audio_end_ms: value.get("audio_end_ms").and_then(|v| v.as_u64()),
                item_id: loose_string(value.get("item_id")),
            },
            _ => return None,
        };
        tracing::debug!("Decoded off-shape {} event loosely: {}", event_type, value);
        Some(event)
    }

    /// Wire name of the event, `"unknown"` for unhandled types.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Error { .. } => "error",
            Self::SessionCreated { .. } => "session.created",
            Self::SessionUpdated { .. } => "session.updated",
            Self::SpeechStarted { .. } => "input_audio_buffer.speech_started",
            Self::SpeechStopped { .. } => "input_audio_buffer.speech_stopped",
            Self::AudioDelta { .. } => "response.audio.delta",
            Self::ResponseDone { .. } => "response.done",
            Self::Unknown => "unknown",
        }
    }
}

// =============================================================================
// Supporting Types
// =============================================================================

/// Error record of an `error` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Parameter that caused the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    /// Client event that caused the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message.as_deref().unwrap_or("unspecified error"))?;
        if let Some(error_type) = &self.error_type {
            write!(f, " (type: {}", error_type)?;
            if let Some(code) = &self.code {
                write!(f, ", code: {}", code)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl ApiError {
    /// Read an error record whose fields may not all be strings.
    ///
    /// A bare string is taken as the message.
    fn from_loose(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::String(message) => Some(Self {
                message: Some(message.clone()),
                ..Default::default()
            }),
            serde_json::Value::Object(_) => Some(Self {
                error_type: loose_string(value.get("type")),
                code: loose_string(value.get("code")),
                message: loose_string(value.get("message")),
                param: loose_string(value.get("param")),
                event_id: loose_string(value.get("event_id")),
            }),
            other => Some(Self {
                message: Some(other.to_string()),
                ..Default::default()
            }),
        }
    }
}

/// Session record of `session.created` / `session.updated`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SessionInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
}

impl SessionInfo {
    fn from_loose(value: &serde_json::Value) -> Self {
        Self {
            id: loose_string(value.get("id")),
            model: loose_string(value.get("model")),
            voice: loose_string(value.get("voice")),
        }
    }
}

/// Strings as-is, scalars rendered, null and containers dropped.
fn loose_string(value: Option<&serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================
