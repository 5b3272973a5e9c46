//! Where utterances come from and where replies go.
//!
//! Input is either typed lines on stdin ([`TextInput`]) or microphone
//! speech ([`VoiceInput`]). Replies are always printed and, when a speech
//! backend is available, spoken as well ([`Output`]).

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};

use crate::error::AssistantError;
use crate::speech::SpeechRecognizer;
use crate::tts_engine::TtsEngine;

/// Transcripts consisting solely of these tokens at either end are usually
/// the recogniser hearing background noise.
const NOISE_WORDS: &[&str] = &["the", "uh", "um", "a"];

/// Trim leading/trailing single-token noise words (e.g. "the", "uh").
pub fn strip_noise_words(text: &str) -> String {
    let is_noise = |t: &&str| NOISE_WORDS.contains(&t.to_lowercase().as_str());
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let start = tokens.iter().position(|t| !is_noise(t)).unwrap_or(tokens.len());
    let end = tokens
        .iter()
        .rposition(|t| !is_noise(t))
        .map_or(start, |i| i + 1);
    tokens[start..end].join(" ")
}

/// A source of user utterances. `Ok(None)` means the input is exhausted and
/// the session should end.
#[async_trait(?Send)]
pub trait InputSource {
    async fn next_utterance(&mut self) -> Result<Option<String>, AssistantError>;
}

pub struct TextInput<R> {
    lines: Lines<R>,
}

impl TextInput<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin> TextInput<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

#[async_trait(?Send)]
impl<R: AsyncBufRead + Unpin> InputSource for TextInput<R> {
    async fn next_utterance(&mut self) -> Result<Option<String>, AssistantError> {
        loop {
            print!("Me  >>> ");
            let _ = std::io::stdout().flush();
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| AssistantError::speech(format!("failed to read input: {e}")))?;
            match line {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => return Ok(Some(line.trim().to_string())),
            }
        }
    }
}

pub struct VoiceInput {
    recognizer: SpeechRecognizer,
    window: Duration,
}

impl VoiceInput {
    pub fn new(recognizer: SpeechRecognizer, window: Duration) -> Self {
        Self { recognizer, window }
    }
}

#[async_trait(?Send)]
impl InputSource for VoiceInput {
    /// Listen until something other than noise is heard.
    async fn next_utterance(&mut self) -> Result<Option<String>, AssistantError> {
        loop {
            // Capture blocks the thread; give the Ctrl-C task a chance to run
            // between attempts.
            tokio::task::yield_now().await;
            println!("Listening...");
            let transcript = self
                .recognizer
                .listen_for_phrase(self.window)
                .map_err(|e| AssistantError::speech(format!("{e:#}")))?;
            log::debug!("Raw recognised transcript: {}", transcript);
            let cleaned = strip_noise_words(transcript.trim());
            if cleaned.is_empty() {
                continue;
            }
            println!("Me  >>> {}", cleaned);
            return Ok(Some(cleaned));
        }
    }
}

/// Renders replies to a writer (stdout outside tests) and, optionally, the
/// speech backend.
pub struct Output {
    name: String,
    out: Box<dyn Write>,
    tts: Option<TtsEngine>,
}

impl Output {
    /// Print-only output.
    pub fn print_only(name: &str) -> Self {
        Self::to_writer(name, std::io::stdout())
    }

    /// Print-only output to `out`.
    pub fn to_writer(name: &str, out: impl Write + 'static) -> Self {
        Self {
            name: name.to_string(),
            out: Box::new(out),
            tts: None,
        }
    }

    /// Printed and spoken output. Falls back to print-only if the speech
    /// backend cannot be initialised.
    pub fn spoken(name: &str, voice_name: Option<&str>) -> Self {
        let tts = match TtsEngine::new() {
            Ok(mut tts) => {
                if let Some(voice) = voice_name {
                    match tts.set_voice_by_name(voice) {
                        Ok(_) => log::info!("Using voice: {}", voice),
                        Err(e) => log::warn!(
                            "Failed to set voice '{}': {e}. Falling back to default.",
                            voice
                        ),
                    }
                }
                Some(tts)
            }
            Err(e) => {
                log::warn!("Text-to-speech unavailable, printing replies only: {e:#}");
                None
            }
        };
        Self {
            name: name.to_string(),
            out: Box::new(std::io::stdout()),
            tts,
        }
    }

    pub async fn render(&mut self, reply: &str) {
        let printed = writeln!(self.out, "{} --> {}", self.name, reply);
        if let Err(e) = printed.and_then(|_| self.out.flush()) {
            log::warn!("Failed to print reply: {e}");
        }
        if let Some(tts) = self.tts.as_mut() {
            if let Err(e) = tts.speak(reply).await {
                log::warn!("Failed to speak reply: {e:#}");
            }
        }
    }
}
