use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use clap::Parser;
use tracing::info;

use waav_realtime_client::ClientConfig;
use waav_realtime_client::core::audio::{
    AudioIo, CaptureManager, CpalCaptureBackend, CpalPlayback, PcmPlaybackQueue,
};
use waav_realtime_client::core::realtime::{FirstSpeaker, RealtimeClient};

/// WaaV Realtime - talk to an OpenAI Realtime agent from the terminal
#[derive(Parser, Debug)]
#[command(name = "waav-realtime")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// System instructions for the agent (overrides the configuration)
    #[arg(long = "instructions", value_name = "TEXT")]
    instructions: Option<String>,

    /// Wait for the user to speak first instead of letting the agent greet
    #[arg(long = "user-first")]
    user_first: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            ClientConfig::from_file(path)?
        }
        None => ClientConfig::from_env()?,
    };
    if cli.instructions.is_some() {
        config.session.instructions = cli.instructions;
    }
    if cli.user_first {
        config.session.first_speaker = FirstSpeaker::User;
    }

    let queue = Arc::new(PcmPlaybackQueue::new());
    let mut speaker = CpalPlayback::start(queue.clone())?;
    let capture = Arc::new(CaptureManager::new(Arc::new(CpalCaptureBackend::new())));
    let audio = AudioIo::new(capture, queue);

    info!("Connecting to {} (model: {})", config.url, config.model);
    let client = RealtimeClient::websocket(config);
    let session = client.start_default_session(audio).await?;

    info!("Session running, press Ctrl+C to hang up");
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.map_err(|e| anyhow!("Failed to listen for Ctrl+C: {}", e))?;
            info!("Hanging up");
        }
        _ = session.closed() => {
            info!("Session closed by the server");
        }
    }

    session.disconnect();
    speaker.stop();

    let stats = session.stats();
    info!(
        "Sent {} audio frames, received {} audio deltas, {} interruptions",
        stats.audio_frames_sent, stats.audio_deltas_received, stats.interruptions
    );

    Ok(())
}
