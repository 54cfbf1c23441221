use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use tracing::{info, warn};

use voicebridge_agent::persona::default_config_path;
use voicebridge_agent::{Agent, AgentConfig, PersonaConfig};
use voicebridge_client::TestAudioGenerator;

#[derive(Parser, Debug)]
#[command(name = "voicebridge-agent")]
#[command(about = "Voice AI agent for VoiceBridge rooms", long_about = None)]
struct Args {
    /// Agent ID (required)
    #[arg(long)]
    id: String,

    /// Room to join
    #[arg(long, default_value = "ai-room")]
    room: String,

    /// Bridge server URL
    #[arg(long, default_value = "ws://localhost:8080/ws")]
    server: String,

    /// Persona to use (see --list-personas)
    #[arg(long)]
    persona: Option<String>,

    /// Custom system prompt (overrides the persona's)
    #[arg(long)]
    prompt: Option<String>,

    /// Path to the persona config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// List available personas and exit
    #[arg(long)]
    list_personas: bool,

    /// Deepgram API key for speech-to-text
    #[arg(long, env = "DEEPGRAM_API_KEY", default_value = "", hide_env_values = true)]
    deepgram_key: String,

    /// AssemblyAI API key for speech-to-text (preferred when set)
    #[arg(long, env = "ASSEMBLYAI_API_KEY", default_value = "", hide_env_values = true)]
    assemblyai_key: String,

    /// OpenAI API key for responses
    #[arg(long, env = "OPENAI_API_KEY", default_value = "", hide_env_values = true)]
    openai_key: String,

    /// ElevenLabs API key for text-to-speech
    #[arg(long, env = "ELEVENLABS_API_KEY", default_value = "", hide_env_values = true)]
    elevenlabs_key: String,

    /// Send synthetic test audio
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    test_audio: bool,
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

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // Misuse exits 1 rather than clap's default.
            let _ = err.print();
            std::process::exit(1);
        }
    };

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let personas = match PersonaConfig::load(&config_path) {
        Ok(config) => config,
        Err(err) => {
            warn!(path = %config_path.display(), error = %err, "could not load persona config, using built-in");
            PersonaConfig::builtin()
        }
    };

    if args.list_personas {
        println!("\nAvailable personas:");
        println!("===================");
        for (key, persona) in &personas.personas {
            let marker = if *key == personas.default {
                " (default)"
            } else {
                ""
            };
            println!("\n  {key}{marker}");
            println!("    Name:  {}", persona.name);
            println!("    Voice: {}", persona.voice_name);
            println!("    {}", persona.description);
        }
        println!("\nUsage: voicebridge-agent --id <agent-id> --persona <persona-key>");
        return Ok(());
    }

    let persona_key = args
        .persona
        .clone()
        .unwrap_or_else(|| personas.default.clone());
    let Some(mut persona) = personas.get(&persona_key).cloned() else {
        bail!("unknown persona: {persona_key} (use --list-personas to see the options)");
    };
    if let Some(prompt) = &args.prompt {
        info!(persona = persona_key, "using custom prompt override");
        persona.prompt = prompt.clone();
    }
    info!(
        persona = persona_key,
        name = %persona.name,
        voice = %persona.voice_name,
        "persona selected"
    );

    if !args.assemblyai_key.is_empty() {
        info!("using AssemblyAI for speech-to-text");
    } else if !args.deepgram_key.is_empty() {
        info!("using Deepgram for speech-to-text");
    } else {
        warn!("no STT API key provided, speech-to-text disabled");
    }
    if args.openai_key.is_empty() {
        warn!("no OpenAI API key, LLM responses disabled");
    }
    if args.elevenlabs_key.is_empty() {
        warn!("no ElevenLabs API key, text-to-speech disabled");
    }

    let agent = Agent::new(AgentConfig {
        id: args.id.clone(),
        server_url: args.server,
        deepgram_api_key: args.deepgram_key,
        assemblyai_api_key: args.assemblyai_key,
        openai_api_key: args.openai_key,
        elevenlabs_api_key: args.elevenlabs_key,
        persona,
    })?;

    agent.start(&args.room).await?;

    let cancel = tokio_util::sync::CancellationToken::new();
    if args.test_audio {
        info!(agent = %args.id, "sending test audio (disable with --test-audio false)");
        TestAudioGenerator::new().spawn(Arc::clone(agent.client()), cancel.clone());
    }

    let stats_agent = Arc::clone(&agent);
    let stats_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(10));
        loop {
            tokio::select! {
                _ = stats_cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let (received, sent, peers) = stats_agent.stats();
                    info!(
                        peers,
                        received_kb = received as f64 / 1024.0,
                        sent_kb = sent as f64 / 1024.0,
                        "agent stats"
                    );
                }
            }
        }
    });

    info!(agent = %args.id, "agent running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    cancel.cancel();
    agent.stop().await;
    Ok(())
}
