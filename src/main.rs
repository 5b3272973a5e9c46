//! Entry point for the Jarvis chat assistant.
//!
//! Each utterance, typed or spoken, is handled in turn:
//!
//!  * farewells end the session;
//!  * greetings, time questions, weather questions and thanks are answered
//!    by fixed rules (weather via the OpenWeatherMap API);
//!  * anything else is answered by a local language model served by Ollama.
//!
//! Failures of the speech recogniser, the weather API or the model are
//! written to an error log and answered with an apology; the loop carries
//! on with the next utterance. Missing or invalid configuration stops the
//! program before the loop starts.
//!
//! Configuration comes from the environment (and an optional `.env` file)
//! plus a `secrets.toml` holding the weather API key; see `config.rs`.

use std::time::Duration;

use anyhow::{Context, Result};

mod agent;
mod city;
mod config;
mod console;
mod context;
mod dispatcher;
mod error;
mod error_log;
mod intent;
mod session;
mod speech;
mod text;
mod tts_engine;
mod weather;

use config::{Config, InputMode};
use console::{InputSource, Output, TextInput, VoiceInput};
use context::AssistantContext;
use dispatcher::Dispatcher;
use speech::SpeechRecognizer;
use tokio::signal;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load environment variables from `.env` if present.
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = Config::from_env().context("failed to load configuration")?;
    let name = config.assistant.name.clone();
    println!("<<<< Starting up {} >>>>", name);

    let mut input: Box<dyn InputSource> = match config.io.input {
        InputMode::Text => Box::new(TextInput::stdin()),
        InputMode::Voice => {
            let model_path = config
                .io
                .vosk_model_path
                .as_deref()
                .context("VOSK_MODEL_PATH is required for voice input")?;
            let recognizer = SpeechRecognizer::new(model_path, &config.io.mic)?;
            Box::new(VoiceInput::new(
                recognizer,
                Duration::from_secs(config.io.listen_secs),
            ))
        }
    };

    let mut output = if config.io.speak_replies {
        Output::spoken(&name, config.io.voice_name.as_deref())
    } else {
        Output::print_only(&name)
    };

    let ctx = AssistantContext::init(&config);
    let error_log = ctx.error_log.clone();
    let mut dispatcher = Dispatcher::new(&config.assistant, ctx);

    log::info!(
        "{} initialised. Errors are logged to {}.",
        name,
        error_log.path().display()
    );

    // Handle Ctrl-C (SIGINT) to allow graceful shutdown
    let shutdown_name = name.clone();
    let _shutdown = tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {e}");
            return;
        }
        log::info!("Received Ctrl-C, shutting down");
        println!("\n<<<< Closing down {} >>>>", shutdown_name);
        std::process::exit(0);
    });

    let end = session::converse(input.as_mut(), &mut dispatcher, &mut output, &error_log).await;
    log::info!("Session ended: {:?}", end);

    println!("<<<< Closing down {} >>>>", name);
    Ok(())
}
