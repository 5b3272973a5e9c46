//! Startup configuration.
//!
//! Settings come from environment variables (optionally seeded from a
//! `.env` file by `main`) plus a TOML secrets file holding the weather API
//! key:
//!
//! ```toml
//! [openweather]
//! api_key = "<YOUR-OPENWEATHER-API-KEY>"
//! ```
//!
//! A missing secrets file or key, or a value that cannot be parsed, is a
//! fatal error; the conversation loop never starts with a half-valid
//! configuration.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::error::AssistantError;
use crate::speech::MicSelection;
use crate::weather::{Units, DEFAULT_WEATHER_API_URL};

#[derive(Debug, Clone, PartialEq)]
pub struct AssistantSettings {
    pub name: String,
    pub default_city: String,
    /// Prior turns included in the dialogue prompt.
    pub history_window: usize,
    pub max_reply_chars: usize,
    /// Extra `alias -> city` pairs for the city extractor.
    pub city_aliases: Vec<(String, String)>,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            name: "Jarvis".to_string(),
            default_city: "London".to_string(),
            history_window: 3,
            max_reply_chars: 300,
            city_aliases: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub host: String,
    pub port: u16,
    pub dialogue_model: String,
    pub entity_model: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeatherSettings {
    pub api_url: String,
    pub api_key: String,
    pub units: Units,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Text,
    Voice,
}

impl FromStr for InputMode {
    type Err = AssistantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(InputMode::Text),
            "voice" | "speech" => Ok(InputMode::Voice),
            other => Err(AssistantError::InvalidConfiguration(format!(
                "INPUT_MODE must be 'text' or 'voice', got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IoSettings {
    pub input: InputMode,
    /// Required when `input` is [`InputMode::Voice`].
    pub vosk_model_path: Option<String>,
    pub listen_secs: u64,
    pub speak_replies: bool,
    pub voice_name: Option<String>,
    pub mic: MicSelection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub assistant: AssistantSettings,
    pub model: ModelSettings,
    pub weather: WeatherSettings,
    pub io: IoSettings,
    pub error_log_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct Secrets {
    openweather: Option<OpenWeatherSecrets>,
}

#[derive(Debug, Deserialize)]
struct OpenWeatherSecrets {
    api_key: Option<String>,
}

impl Config {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, AssistantError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup. Blank
    /// values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AssistantError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = AssistantSettings::default();

        let assistant = AssistantSettings {
            name: var("ASSISTANT_NAME").unwrap_or(defaults.name),
            default_city: var("DEFAULT_CITY").unwrap_or(defaults.default_city),
            history_window: parse_var(&var, "HISTORY_WINDOW", defaults.history_window)?,
            max_reply_chars: parse_var(&var, "MAX_REPLY_CHARS", defaults.max_reply_chars)?,
            city_aliases: match var("CITY_ALIASES") {
                Some(raw) => parse_aliases(&raw)?,
                None => Vec::new(),
            },
        };
        if assistant.max_reply_chars == 0 {
            return Err(AssistantError::InvalidConfiguration(
                "MAX_REPLY_CHARS must be greater than zero".into(),
            ));
        }

        let dialogue_model = var("MODEL_NAME").unwrap_or_else(|| "qwen3:1.7b".to_string());
        let model = ModelSettings {
            host: parse_url(
                "OLLAMA_HOST",
                var("OLLAMA_HOST").unwrap_or_else(|| "http://localhost".to_string()),
            )?,
            port: parse_var(&var, "OLLAMA_PORT", 11434)?,
            entity_model: var("NER_MODEL_NAME").unwrap_or_else(|| dialogue_model.clone()),
            dialogue_model,
        };

        let secrets_path =
            PathBuf::from(var("SECRETS_PATH").unwrap_or_else(|| "secrets.toml".to_string()));
        let weather = WeatherSettings {
            api_url: parse_url(
                "WEATHER_API_URL",
                var("WEATHER_API_URL").unwrap_or_else(|| DEFAULT_WEATHER_API_URL.to_string()),
            )?,
            api_key: load_api_key(&secrets_path)?,
            units: match var("WEATHER_UNITS") {
                Some(units) => units.parse()?,
                None => Units::default(),
            },
        };

        let input = match var("INPUT_MODE") {
            Some(mode) => mode.parse()?,
            None => InputMode::Text,
        };
        let vosk_model_path = var("VOSK_MODEL_PATH");
        if input == InputMode::Voice && vosk_model_path.is_none() {
            return Err(AssistantError::ConfigurationMissing(
                "VOSK_MODEL_PATH must point to a Vosk model directory when INPUT_MODE=voice".into(),
            ));
        }
        let io = IoSettings {
            input,
            vosk_model_path,
            listen_secs: parse_var(&var, "LISTEN_SECS", 10)?,
            speak_replies: parse_bool(&var, "SPEAK_REPLIES", true)?,
            voice_name: var("VOICE_NAME"),
            mic: MicSelection {
                index: match var("MIC_INDEX") {
                    Some(_) => Some(parse_var(&var, "MIC_INDEX", 0)?),
                    None => None,
                },
                name_keyword: var("MIC_NAME_KEYWORD"),
            },
        };

        Ok(Self {
            assistant,
            model,
            weather,
            io,
            error_log_path: PathBuf::from(
                var("ERROR_LOG_PATH").unwrap_or_else(|| "assistant_errors.log".to_string()),
            ),
        })
    }
}

fn parse_var<T, F>(var: &F, key: &str, default: T) -> Result<T, AssistantError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            AssistantError::InvalidConfiguration(format!("{key} has an invalid value '{raw}'"))
        }),
        None => Ok(default),
    }
}

fn parse_bool<F>(var: &F, key: &str, default: bool) -> Result<bool, AssistantError>
where
    F: Fn(&str) -> Option<String>,
{
    match var(key).map(|v| v.trim().to_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(AssistantError::InvalidConfiguration(format!(
            "{key} must be true or false, got '{v}'"
        ))),
    }
}

/// The Ollama client panics on an unparsable host, so URLs are checked here.
fn parse_url(key: &str, raw: String) -> Result<String, AssistantError> {
    match reqwest::Url::parse(raw.trim()) {
        Ok(_) => Ok(raw.trim().to_string()),
        Err(e) => Err(AssistantError::InvalidConfiguration(format!(
            "{key} is not a valid URL '{raw}': {e}"
        ))),
    }
}

/// Parse `alias=City` pairs separated by `;`.
fn parse_aliases(raw: &str) -> Result<Vec<(String, String)>, AssistantError> {
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((alias, city)) if !alias.trim().is_empty() && !city.trim().is_empty() => {
                Ok((alias.trim().to_string(), city.trim().to_string()))
            }
            _ => Err(AssistantError::InvalidConfiguration(format!(
                "CITY_ALIASES entry '{entry}' is not of the form alias=City"
            ))),
        })
        .collect()
}

/// Read the weather API key from the `[openweather]` section of the
/// secrets file.
pub fn load_api_key(path: &Path) -> Result<String, AssistantError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        AssistantError::ConfigurationMissing(format!(
            "cannot read secrets file {}: {e}",
            path.display()
        ))
    })?;
    let secrets: Secrets = toml::from_str(&raw).map_err(|e| {
        AssistantError::InvalidConfiguration(format!(
            "secrets file {} is not valid TOML: {e}",
            path.display()
        ))
    })?;
    secrets
        .openweather
        .and_then(|section| section.api_key)
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .ok_or_else(|| {
            AssistantError::ConfigurationMissing(format!(
                "[openweather] api_key is not set in {}",
                path.display()
            ))
        })
}
