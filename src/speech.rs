//! Speech-to-text using the [`vosk`] crate with [`cpal`] for microphone input.
//!
//! [`SpeechRecognizer`] holds a loaded Vosk model and the chosen input
//! device. [`SpeechRecognizer::listen_for_phrase`] records up to a fixed
//! window, stopping early once speech has been followed by silence, then
//! returns the final transcript. Multichannel input is reduced to the first
//! channel and converted to the `i16` samples Vosk expects.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SizedSample};
use vosk::{Model, Recognizer};

/// Amplitude above which a chunk counts as speech.
const SILENCE_THRESHOLD: u16 = 500;
/// Trailing silence that ends a capture once speech has started.
const SILENCE_TIMEOUT: Duration = Duration::from_millis(800);
/// Never stop before this much audio has been captured.
const MIN_CAPTURE: Duration = Duration::from_millis(1000);

/// Which microphone to use. An index wins over a name keyword; with
/// neither (or no match) the host's default input device is used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MicSelection {
    pub index: Option<usize>,
    pub name_keyword: Option<String>,
}

pub struct SpeechRecognizer {
    model: Model,
    device: cpal::Device,
}

impl SpeechRecognizer {
    pub fn new(model_path: &str, mic: &MicSelection) -> Result<Self> {
        let model = Model::new(model_path)
            .with_context(|| format!("Failed to load Vosk model from '{}'.", model_path))?;

        let host = cpal::default_host();
        let devices: Vec<cpal::Device> = host
            .input_devices()
            .context("Failed to enumerate input audio devices")?
            .collect();
        let names: Vec<String> = devices
            .iter()
            .map(|d| d.name().unwrap_or_default())
            .collect();

        let device = match pick_device(&names, mic) {
            Some(idx) => devices.into_iter().nth(idx),
            None => host.default_input_device(),
        }
        .ok_or_else(|| anyhow!("No input audio device found"))?;

        if let Ok(name) = device.name() {
            log::info!("Using microphone: {}", name);
        }
        Ok(Self { model, device })
    }

    /// Record for at most `window` and return the recognised text, or an
    /// empty string if nothing was said.
    pub fn listen_for_phrase(&self, window: Duration) -> Result<String> {
        let supported = self
            .device
            .default_input_config()
            .context("Failed to get default input configuration")?;
        let channels = supported.channels() as usize;
        let mut recogniser = Recognizer::new(&self.model, supported.sample_rate().0 as f32)
            .context("Failed to create Vosk recogniser")?;
        recogniser.set_words(false);
        recogniser.set_max_alternatives(0);

        let (tx, rx) = mpsc::channel::<Vec<i16>>();
        let config: cpal::StreamConfig = supported.config();
        let stream = match supported.sample_format() {
            SampleFormat::I16 => self.build_stream(&config, channels, tx, |s: i16| s)?,
            SampleFormat::U16 => self.build_stream(&config, channels, tx, u16_to_i16)?,
            SampleFormat::F32 => self.build_stream(&config, channels, tx, f32_to_i16)?,
            other => return Err(anyhow!("Unsupported sample format: {:?}", other)),
        };
        stream.play().context("Failed to start audio input stream")?;

        let samples = capture(&rx, window);
        // Dropping the stream closes the input device.
        drop(stream);

        if samples.is_empty() {
            return Ok(String::new());
        }
        recogniser
            .accept_waveform(&samples)
            .context("Vosk rejected the captured audio")?;
        Ok(recogniser
            .final_result()
            .single()
            .map(|r| r.text.to_string())
            .unwrap_or_default())
    }

    fn build_stream<T, F>(
        &self,
        config: &cpal::StreamConfig,
        channels: usize,
        tx: mpsc::Sender<Vec<i16>>,
        convert: F,
    ) -> Result<cpal::Stream>
    where
        T: SizedSample,
        F: Fn(T) -> i16 + Send + 'static,
    {
        let stream = self.device.build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // A closed receiver just means capture has finished.
                let _ = tx.send(first_channel(data, channels, &convert));
            },
            |err| log::error!("An error occurred on the input audio stream: {}", err),
            None,
        )?;
        Ok(stream)
    }
}

/// Drain audio chunks until `window` elapses or speech is followed by
/// [`SILENCE_TIMEOUT`] of quiet.
///
/// The audio callback runs on cpal's own thread and pushes each buffer
/// through the channel; this loop is the only consumer. Leading silence
/// never ends a capture, otherwise a user who takes a moment to start
/// talking would be cut off before saying anything. Once speech has been
/// heard, a short pause ends the phrase so the reply is not held up for
/// the whole window. Everything captured, quiet parts included, is handed
/// to Vosk, which copes with padding far better than with clipped words.
fn capture(rx: &mpsc::Receiver<Vec<i16>>, window: Duration) -> Vec<i16> {
    let start = Instant::now();
    let mut samples = Vec::new();
    let mut last_speech = Instant::now();
    let mut speech_started = false;
    // `checked_sub` turns an expired window into `None`, and the remaining
    // time bounds each wait so a stalled device cannot block past it.
    while let Some(remaining) = window.checked_sub(start.elapsed()) {
        match rx.recv_timeout(remaining) {
            Ok(chunk) => {
                // A single loud sample is enough; averaging would let soft
                // speech at the end of a phrase count as silence.
                if is_speech(&chunk) {
                    speech_started = true;
                    last_speech = Instant::now();
                }
                samples.extend_from_slice(&chunk);
                if speech_started
                    && start.elapsed() > MIN_CAPTURE
                    && last_speech.elapsed() > SILENCE_TIMEOUT
                {
                    break;
                }
            }
            // Timed out or the stream was dropped: either way we are done.
            Err(_) => break,
        }
    }
    samples
}

/// Index into `names` of the requested microphone. Device names vary
/// between hosts and reboots, so the keyword is a case-insensitive
/// substring; an index that no longer exists falls through to it.
fn pick_device(names: &[String], mic: &MicSelection) -> Option<usize> {
    if let Some(idx) = mic.index.filter(|&i| i < names.len()) {
        return Some(idx);
    }
    let keyword = mic.name_keyword.as_ref()?.to_lowercase();
    names
        .iter()
        .position(|name| name.to_lowercase().contains(&keyword))
}

/// Vosk wants mono audio. Keeping the first channel is cheaper than mixing
/// and loses nothing on the typical mono microphone exposed as stereo.
fn first_channel<T: Copy>(data: &[T], channels: usize, convert: impl Fn(T) -> i16) -> Vec<i16> {
    data.chunks(channels.max(1))
        .map(|frame| convert(frame[0]))
        .collect()
}

fn is_speech(chunk: &[i16]) -> bool {
    chunk.iter().any(|s| s.unsigned_abs() > SILENCE_THRESHOLD)
}

fn u16_to_i16(sample: u16) -> i16 {
    (sample as i32 - 32768) as i16
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32768.0).clamp(-32768.0, 32767.0) as i16
}
