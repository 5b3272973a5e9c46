//! Error taxonomy for the assistant.
//!
//! Configuration problems are fatal and surface from `main` before the
//! conversation loop starts. Every other kind is caught inside the turn that
//! produced it, written to the error log and replaced with an apology.

use thiserror::Error;

/// Reasons a weather lookup did not produce a report. These are returned as
/// values; the weather client never panics or retries.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WeatherFailure {
    #[error("city not recognised by the weather provider: {0}")]
    UnknownCity(String),
    #[error("weather request failed: {0}")]
    Network(String),
    #[error("weather provider returned HTTP {status}: {message}")]
    Provider { status: u16, message: String },
    #[error("could not parse weather response: {0}")]
    Parse(String),
}

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("speech recognition failed: {0}")]
    SpeechRecognition(String),
    #[error(transparent)]
    ApiRequest(#[from] WeatherFailure),
    #[error("dialogue model failed: {0}")]
    ModelInference(String),
    #[error("location recogniser failed: {0}")]
    EntityRecognition(String),
    #[error("missing configuration: {0}")]
    ConfigurationMissing(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl AssistantError {
    /// Short name of the component the failure originated in. Used as the
    /// tag on error log lines.
    pub fn component(&self) -> &'static str {
        match self {
            AssistantError::SpeechRecognition(_) => "speech",
            AssistantError::ApiRequest(_) => "weather",
            AssistantError::ModelInference(_) => "dialogue",
            AssistantError::EntityRecognition(_) => "entities",
            AssistantError::ConfigurationMissing(_) | AssistantError::InvalidConfiguration(_) => {
                "config"
            }
        }
    }

    pub fn speech(err: impl std::fmt::Display) -> Self {
        Self::SpeechRecognition(err.to_string())
    }

    /// Wrap a collaborator error from the dialogue model. The alternate
    /// format keeps the anyhow context chain on one line.
    pub fn model(err: &anyhow::Error) -> Self {
        Self::ModelInference(format!("{err:#}"))
    }

    pub fn entities(err: &anyhow::Error) -> Self {
        Self::EntityRecognition(format!("{err:#}"))
    }
}
