pub mod audio;
pub mod realtime;

pub use audio::{AudioError, AudioIo};
pub use realtime::{RealtimeClient, RealtimeError, RealtimeResult, RealtimeSession};
