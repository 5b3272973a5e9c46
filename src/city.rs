//! City extraction for weather queries.
//!
//! Strategies are tried in order and the first answer wins:
//!
//!  1. an exact phrase match against a table of city aliases ("nyc",
//!     "the big smoke"), mapped to the canonical city name;
//!  2. a location-entity pass over the utterance by an [`EntityRecognizer`];
//!  3. the configured default city.
//!
//! Extraction therefore always yields a city. Recogniser failures are
//! written to the error log and extraction moves on to the default.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use ollama_rs::{generation::completion::request::GenerationRequest, Ollama};
use serde_json::Value;

use crate::error::AssistantError;
use crate::error_log::ErrorLog;
use crate::text;

/// Colloquial or short city names and the name the weather provider knows
/// them by.
pub const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("nyc", "New York"),
    ("new york city", "New York"),
    ("big apple", "New York"),
    ("sf", "San Francisco"),
    ("san fran", "San Francisco"),
    ("frisco", "San Francisco"),
    ("philly", "Philadelphia"),
    ("vegas", "Las Vegas"),
    ("chi town", "Chicago"),
    ("chitown", "Chicago"),
    ("windy city", "Chicago"),
    ("big easy", "New Orleans"),
    ("nola", "New Orleans"),
    ("big smoke", "London"),
    ("brum", "Birmingham"),
    ("auld reekie", "Edinburgh"),
    ("cdmx", "Mexico City"),
    ("saigon", "Ho Chi Minh City"),
    ("bombay", "Mumbai"),
    ("peking", "Beijing"),
];

/// Finds location entities in free text.
#[async_trait]
pub trait EntityRecognizer: Send + Sync {
    /// Location names mentioned in `text`, most relevant first.
    async fn locations(&self, text: &str) -> Result<Vec<String>>;
}

/// [`EntityRecognizer`] that asks a local model served by Ollama to name
/// the city in the utterance and answer in JSON.
pub struct OllamaEntityRecognizer {
    client: Ollama,
    model: String,
}

impl OllamaEntityRecognizer {
    pub fn new(client: Ollama, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl EntityRecognizer for OllamaEntityRecognizer {
    async fn locations(&self, text: &str) -> Result<Vec<String>> {
        const INSTRUCTIONS: &str = "Find the city or town named in the user's sentence.\n\
Respond with **only** a JSON object of the form {\"city\": \"<name as written>\"}.\n\
If no place is named respond with {\"city\": null}. Do not guess and do not add any other text.";
        let prompt = format!("{INSTRUCTIONS}\n\nSentence: {text}\nJSON:");
        let request = GenerationRequest::new(self.model.clone(), prompt);
        let response = self
            .client
            .generate(request)
            .await
            .with_context(|| format!("failed to query location model '{}'", self.model))?;
        log::debug!("Raw location response: {}", response.response);
        parse_locations(&response.response)
    }
}

/// Pull the `city` (or `cities`) field out of the first JSON object in the
/// model output. Reasoning text around the object is ignored.
fn parse_locations(raw: &str) -> Result<Vec<String>> {
    let value = first_json_object(raw).context("location model did not return a JSON object")??;
    let mut found = Vec::new();
    match value.get("city") {
        Some(Value::String(city)) => found.push(city.clone()),
        Some(Value::Array(items)) => found.extend(
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string)),
        ),
        _ => {}
    }
    if let Some(Value::Array(items)) = value.get("cities") {
        found.extend(items.iter().filter_map(|v| v.as_str().map(str::to_string)));
    }
    Ok(found)
}

/// The first complete JSON object after any `<think>` block. Braces inside
/// string literals are handled by the JSON reader, which stops at the end
/// of the first value and ignores whatever trails it. `None` means no
/// object starts anywhere in the text; `Some(Err(..))` means one starts but
/// is malformed.
fn first_json_object(text: &str) -> Option<Result<Value>> {
    // `<think>` blocks may themselves contain braces; skip past them.
    let body = match text.find("</think>") {
        Some(end) => &text[end + "</think>".len()..],
        None => text,
    };
    let start = body.find('{')?;
    let mut values = serde_json::Deserializer::from_str(&body[start..]).into_iter::<Value>();
    let value = values
        .next()?
        .context("location model returned malformed JSON");
    Some(value.and_then(|v| match v {
        Value::Object(_) => Ok(v),
        _ => Err(anyhow::anyhow!("location model answer is not a JSON object")),
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CitySource {
    Alias,
    Recognizer,
    Default,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CityMatch {
    pub city: String,
    pub source: CitySource,
}

pub struct CityExtractor {
    /// (alias words, canonical name), longest alias first.
    aliases: Vec<(String, String)>,
    recognizer: Arc<dyn EntityRecognizer>,
    error_log: ErrorLog,
}

impl CityExtractor {
    pub fn new(recognizer: Arc<dyn EntityRecognizer>, error_log: ErrorLog) -> Self {
        let aliases = DEFAULT_ALIASES
            .iter()
            .map(|(alias, city)| (alias.to_string(), city.to_string()))
            .collect();
        Self::with_aliases(aliases, recognizer, error_log)
    }

    pub fn with_aliases(
        aliases: Vec<(String, String)>,
        recognizer: Arc<dyn EntityRecognizer>,
        error_log: ErrorLog,
    ) -> Self {
        let mut aliases: Vec<(String, String)> = aliases
            .into_iter()
            .map(|(alias, city)| (text::words(&alias).join(" "), city.trim().to_string()))
            .filter(|(alias, city)| !alias.is_empty() && !city.is_empty())
            .collect();
        // Stable sort keeps table order among aliases of equal length.
        aliases.sort_by_key(|(alias, _)| std::cmp::Reverse(alias.split(' ').count()));
        Self {
            aliases,
            recognizer,
            error_log,
        }
    }

    /// Add or override aliases, e.g. from configuration.
    pub fn extend_aliases(self, extra: Vec<(String, String)>) -> Self {
        let mut all = extra;
        all.extend(self.aliases);
        Self::with_aliases(all, self.recognizer, self.error_log)
    }

    /// The city to report weather for. Never fails.
    pub async fn extract(&self, utterance: &str, default: &str) -> String {
        let found = self.locate(utterance, default).await;
        log::info!("Weather city: {} ({:?})", found.city, found.source);
        found.city
    }

    pub async fn locate(&self, utterance: &str, default: &str) -> CityMatch {
        let words = text::words(utterance);
        if let Some(city) = self.alias_in(&words) {
            log::debug!("City alias matched: {}", city);
            return CityMatch {
                city: city.to_string(),
                source: CitySource::Alias,
            };
        }

        match self.recognizer.locations(utterance).await {
            Ok(candidates) => {
                // Only accept spans that actually occur in the utterance.
                let found = candidates
                    .iter()
                    .map(|c| c.trim())
                    .find(|c| !c.is_empty() && text::contains_phrase(&words, c));
                if let Some(city) = found {
                    let city = city.to_string();
                    log::debug!("City recognised: {}", city);
                    return CityMatch {
                        city,
                        source: CitySource::Recognizer,
                    };
                }
                if !candidates.is_empty() {
                    log::debug!("Ignoring locations not present in utterance: {:?}", candidates);
                }
            }
            Err(e) => self.error_log.record(utterance, &AssistantError::entities(&e)),
        }

        log::debug!("No city found, using default '{}'", default);
        CityMatch {
            city: default.to_string(),
            source: CitySource::Default,
        }
    }

    fn alias_in(&self, words: &[String]) -> Option<&str> {
        self.aliases
            .iter()
            .find(|(alias, _)| text::contains_phrase(words, alias))
            .map(|(_, city)| city.as_str())
    }
}
