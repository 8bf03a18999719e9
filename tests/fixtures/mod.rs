//! Test Fixtures Module
//!
//! Fixtures shared by the integration tests:
//! - Audio fixtures (programmatically generated, 24kHz)
//! - Session configuration fixtures

// Allow dead code in test fixtures - not every test binary uses every helper
#![allow(dead_code)]

pub mod audio_fixtures;

pub use audio_fixtures::*;

use waav_realtime_client::core::realtime::SessionConfig;

/// Instructions used by the tutoring scenario
pub const TUTOR_INSTRUCTIONS: &str =
    "You are a patient math tutor. Ask one question at a time and wait for the answer.";

/// Voice conversation configured as a math tutor
pub fn tutor_session() -> SessionConfig {
    SessionConfig::voice_conversation(TUTOR_INSTRUCTIONS)
}
