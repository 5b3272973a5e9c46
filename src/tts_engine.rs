//! Text‑to‑speech on top of the [`tts`] crate.
//!
//! The [`tts`] crate delegates synthesis to the operating system (Speech
//! Dispatcher on Linux, SAPI on Windows, AVFoundation on macOS).
//! [`TtsEngine::speak`] waits for the utterance to finish where the backend
//! can report it, so the conversation loop does not listen while talking.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tts::Tts;

pub struct TtsEngine {
    tts: Tts,
}

impl TtsEngine {
    /// Initialise the platform speech backend. Fails if the host has none.
    pub fn new() -> Result<Self> {
        let tts = Tts::default().context("failed to initialise text‑to‑speech engine")?;
        Ok(Self { tts })
    }

    /// Select the first voice whose name contains `name`, ignoring case. The
    /// current voice is kept if nothing matches.
    pub fn set_voice_by_name(&mut self, name: &str) -> Result<()> {
        let available = self.tts.voices().context("failed to enumerate voices")?;
        let target = name.to_lowercase();
        let voice = available
            .into_iter()
            .find(|v| v.name().to_lowercase().contains(&target))
            .ok_or_else(|| anyhow!("no voice matching '{name}' found"))?;
        self.tts
            .set_voice(&voice)
            .context("failed to set TTS voice")?;
        Ok(())
    }

    /// Speak `text`, interrupting anything still playing. Synthesis is
    /// queued on a blocking thread so the runtime is not stalled.
    pub async fn speak(&mut self, text: &str) -> Result<()> {
        let text_owned = text.to_owned();
        let mut tts = self.tts.clone();
        tokio::task::spawn_blocking(move || {
            tts.speak(&text_owned, true)
                .map(|_| ())
                .map_err(|e| anyhow!("TTS speak failed: {e:?}"))
        })
        .await
        .context("failed to join blocking TTS task")??;

        if self.tts.supported_features().is_speaking {
            while self.tts.is_speaking().unwrap_or(false) {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
        Ok(())
    }
}
