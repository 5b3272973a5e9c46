//! One-time initialisation of the assistant's external collaborators.
//!
//! Models and clients are created here, once, and handed to the components
//! that need them. Tests build an [`AssistantContext`] directly from stub
//! implementations instead.

use std::sync::Arc;

use ollama_rs::Ollama;

use crate::agent::{DialogueModel, OllamaModel};
use crate::city::{EntityRecognizer, OllamaEntityRecognizer};
use crate::config::Config;
use crate::error_log::ErrorLog;
use crate::weather::{OpenWeatherClient, WeatherService};

#[derive(Clone)]
pub struct AssistantContext {
    pub dialogue: Arc<dyn DialogueModel>,
    pub entities: Arc<dyn EntityRecognizer>,
    pub weather: Arc<dyn WeatherService>,
    pub error_log: ErrorLog,
}

impl AssistantContext {
    pub fn init(config: &Config) -> Self {
        let ollama = Ollama::new(config.model.host.clone(), config.model.port);
        log::info!(
            "Using Ollama at {}:{} (dialogue model '{}', location model '{}')",
            config.model.host,
            config.model.port,
            config.model.dialogue_model,
            config.model.entity_model
        );
        let weather = OpenWeatherClient::new(
            config.weather.api_url.clone(),
            config.weather.api_key.clone(),
            config.weather.units,
        );
        Self {
            dialogue: Arc::new(OllamaModel::new(ollama.clone(), &config.model.dialogue_model)),
            entities: Arc::new(OllamaEntityRecognizer::new(ollama, &config.model.entity_model)),
            weather: Arc::new(weather),
            error_log: ErrorLog::new(config.error_log_path.clone()),
        }
    }
}
