//! The intent dispatcher: one utterance in, exactly one reply out.
//!
//! The utterance is classified with the ordered rule chain in
//! [`crate::intent`], then answered by the matching handler. Weather and
//! fallback replies depend on external services; any failure there is
//! written to the error log and turned into a fixed apology so
//! [`Dispatcher::dispatch`] itself never fails.

use std::sync::Arc;

use chrono::{DateTime, Local};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{RngCore, SeedableRng};

use crate::agent::{ConversationContext, ResponseGenerator};
use crate::city::CityExtractor;
use crate::config::AssistantSettings;
use crate::context::AssistantContext;
use crate::error_log::ErrorLog;
use crate::intent::{self, Intent};
use crate::weather::WeatherService;

pub const FAREWELL_REPLY: &str = "Until next time. Take care.";
pub const WEATHER_APOLOGY: &str =
    "My apologies, but I was unable to get the weather for your request.";
pub const MODEL_APOLOGY: &str = "Sorry, I'm having trouble coming up with a reply right now.";
/// Rendered by the conversation loop when the input source fails.
pub const SPEECH_APOLOGY: &str = "Sorry, come again?";

pub const TIME_FORMAT: &str = "%H:%M";

/// `{name}` is replaced with the assistant's name.
pub const GREETING_TEMPLATES: &[&str] = &[
    "Hello I am {name} your AI assistant. Please ask for one thing at a time, I'm not all that smart. What can I do for you?",
    "Hello! How can I help?",
    "Hi there, what can I do for you?",
    "Hey! Good to hear from you.",
    "Greetings. {name} at your service.",
];

pub const THANKS_REPLIES: &[&str] = &[
    "You're welcome!",
    "Anytime!",
    "No problem!",
    "Cheers!",
    "All good!",
    "No worries!",
    "Don't mention it!",
    "It's nothing!",
    "My pleasure!",
    "Happy to help!",
];

/// Every greeting the assistant called `name` can produce.
pub fn greetings(name: &str) -> Vec<String> {
    GREETING_TEMPLATES
        .iter()
        .map(|t| t.replace("{name}", name))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    /// Set by the farewell intent; the caller should stop reading input.
    pub end_session: bool,
}

impl Reply {
    fn say(text: String) -> Self {
        Self {
            text,
            end_session: false,
        }
    }

    fn closing(text: &str) -> Self {
        Self {
            text: text.to_string(),
            end_session: true,
        }
    }
}

type Clock = Box<dyn Fn() -> DateTime<Local> + Send>;

pub struct Dispatcher {
    name: String,
    default_city: String,
    extractor: CityExtractor,
    weather: Arc<dyn WeatherService>,
    generator: ResponseGenerator,
    history: ConversationContext,
    error_log: ErrorLog,
    rng: Box<dyn RngCore + Send>,
    clock: Clock,
}

impl Dispatcher {
    pub fn new(settings: &AssistantSettings, ctx: AssistantContext) -> Self {
        let extractor = CityExtractor::new(ctx.entities, ctx.error_log.clone())
            .extend_aliases(settings.city_aliases.clone());
        Self {
            name: settings.name.clone(),
            default_city: settings.default_city.clone(),
            extractor,
            weather: ctx.weather,
            generator: ResponseGenerator::new(
                ctx.dialogue,
                &settings.name,
                settings.max_reply_chars,
            ),
            history: ConversationContext::new(settings.history_window),
            error_log: ctx.error_log,
            rng: Box::new(StdRng::from_os_rng()),
            clock: Box::new(Local::now),
        }
    }

    /// Replace the randomness source used to pick greetings and thanks.
    pub fn with_rng(mut self, rng: impl RngCore + Send + 'static) -> Self {
        self.rng = Box::new(rng);
        self
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Local> + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub async fn dispatch(&mut self, utterance: &str) -> Reply {
        let intent = intent::classify(utterance);
        log::info!("Intent {:?} for: {}", intent, utterance);

        let text = match intent {
            Intent::Farewell => return Reply::closing(FAREWELL_REPLY),
            Intent::Greeting => self.greeting(),
            Intent::TimeQuery => self.current_time(),
            Intent::WeatherQuery => self.weather_report(utterance).await,
            Intent::Thanks => self.pick(THANKS_REPLIES).to_string(),
            Intent::Fallback => self.generated(utterance).await,
        };
        log::info!("Assistant response: {}", text);
        self.history.push(utterance, &text);
        Reply::say(text)
    }

    fn pick(&mut self, choices: &[&'static str]) -> &'static str {
        choices.choose(&mut *self.rng).copied().unwrap_or("Hello!")
    }

    fn greeting(&mut self) -> String {
        greetings(&self.name)
            .choose(&mut *self.rng)
            .cloned()
            .unwrap_or_else(|| "Hello!".to_string())
    }

    fn current_time(&self) -> String {
        format!("It is {}.", (self.clock)().format(TIME_FORMAT))
    }

    async fn weather_report(&self, utterance: &str) -> String {
        let city = self.extractor.extract(utterance, &self.default_city).await;
        match self.weather.fetch(&city).await {
            Ok(report) => report.sentence(),
            Err(failure) => {
                self.error_log.record(utterance, &failure.into());
                WEATHER_APOLOGY.to_string()
            }
        }
    }

    async fn generated(&self, utterance: &str) -> String {
        match self.generator.generate(utterance, &self.history).await {
            Ok(text) => text,
            Err(e) => {
                self.error_log.record(utterance, &e);
                MODEL_APOLOGY.to_string()
            }
        }
    }
}
