use anyhow::Result;
use clap::Parser;
use tracing::info;

use voicebridge_core::{server, ServerConfig, SfuController};

#[derive(Parser, Debug)]
#[command(name = "voicebridge")]
#[command(about = "Audio conferencing SFU bridge", long_about = None)]
struct Args {
    /// Address to bind the HTTP/WebSocket listener to
    #[arg(long, env = "VOICEBRIDGE_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Listener port
    #[arg(long, env = "VOICEBRIDGE_PORT", default_value = "8080")]
    port: u16,

    /// STUN server handed to every media session
    #[arg(
        long,
        env = "VOICEBRIDGE_STUN",
        default_value = "stun:stun.l.google.com:19302"
    )]
    stun_server: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .compact()
        .init();

    let args = Args::parse();
    let config = ServerConfig {
        host: args.host,
        port: args.port,
        stun_server: args.stun_server,
    };

    info!("VoiceBridge SFU server starting...");
    info!("WebSocket endpoint: ws://{}/ws", config.listen_address());

    let controller = SfuController::new(config.clone());

    tokio::select! {
        result = server::serve(&config, controller) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("VoiceBridge SFU server shutting down");
    Ok(())
}
