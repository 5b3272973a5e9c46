//! The conversation loop: read an utterance, dispatch it, render the reply.
//!
//! The loop ends when the input source is exhausted or a reply asks for
//! the session to close. A failing input source is not fatal; the failure
//! is logged, the user is asked to repeat themselves and the loop reads
//! again without dispatching anything.

use crate::console::{InputSource, Output};
use crate::dispatcher::{Dispatcher, SPEECH_APOLOGY};
use crate::error_log::ErrorLog;

/// Why [`converse`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Farewell,
    EndOfInput,
}

pub async fn converse(
    input: &mut dyn InputSource,
    dispatcher: &mut Dispatcher,
    output: &mut Output,
    error_log: &ErrorLog,
) -> SessionEnd {
    loop {
        let utterance = match input.next_utterance().await {
            Ok(Some(utterance)) => utterance,
            Ok(None) => {
                log::info!("Input exhausted, ending session");
                return SessionEnd::EndOfInput;
            }
            Err(e) => {
                error_log.record("", &e);
                output.render(SPEECH_APOLOGY).await;
                continue;
            }
        };

        let reply = dispatcher.dispatch(&utterance).await;
        output.render(&reply.text).await;
        if reply.end_session {
            return SessionEnd::Farewell;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::DialogueModel;
    use crate::city::EntityRecognizer;
    use crate::config::AssistantSettings;
    use crate::context::AssistantContext;
    use crate::dispatcher::{greetings, FAREWELL_REPLY};
    use crate::error::{AssistantError, WeatherFailure};
    use crate::weather::{WeatherReport, WeatherService};
    use anyhow::Result;
    use async_trait::async_trait;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::VecDeque;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Replays a fixed sequence of input results, then reports end of input.
    struct ScriptedInput {
        script: VecDeque<Result<Option<String>, AssistantError>>,
    }

    impl ScriptedInput {
        fn new(script: Vec<Result<Option<String>, AssistantError>>) -> Self {
            Self {
                script: script.into(),
            }
        }
    }

    #[async_trait(?Send)]
    impl InputSource for ScriptedInput {
        async fn next_utterance(&mut self) -> Result<Option<String>, AssistantError> {
            self.script.pop_front().unwrap_or(Ok(None))
        }
    }

    /// Writer whose contents the test can read back.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn lines(&self) -> Vec<String> {
            String::from_utf8(self.0.lock().unwrap().clone())
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    #[derive(Default)]
    struct CountingModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DialogueModel for CountingModel {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("Sure.".into())
        }
    }

    struct NoEntities;

    #[async_trait]
    impl EntityRecognizer for NoEntities {
        async fn locations(&self, _text: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    struct NoWeather;

    #[async_trait]
    impl WeatherService for NoWeather {
        async fn fetch(&self, city: &str) -> Result<WeatherReport, WeatherFailure> {
            Err(WeatherFailure::UnknownCity(city.to_string()))
        }
    }

    struct Session {
        dir: TempDir,
        model: Arc<CountingModel>,
        dispatcher: Dispatcher,
        error_log: ErrorLog,
        screen: SharedBuf,
        output: Output,
    }

    impl Session {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let model = Arc::new(CountingModel::default());
            let error_log = ErrorLog::new(dir.path().join("errors.log"));
            let ctx = AssistantContext {
                dialogue: model.clone(),
                entities: Arc::new(NoEntities),
                weather: Arc::new(NoWeather),
                error_log: error_log.clone(),
            };
            let dispatcher = Dispatcher::new(&AssistantSettings::default(), ctx)
                .with_rng(StdRng::seed_from_u64(3));
            let screen = SharedBuf::default();
            let output = Output::to_writer("Jarvis", screen.clone());
            Self {
                dir,
                model,
                dispatcher,
                error_log,
                screen,
                output,
            }
        }

        async fn run(&mut self, input: &mut ScriptedInput) -> SessionEnd {
            converse(input, &mut self.dispatcher, &mut self.output, &self.error_log).await
        }

        fn log_lines(&self) -> Vec<String> {
            std::fs::read_to_string(self.dir.path().join("errors.log"))
                .map(|s| s.lines().map(str::to_string).collect())
                .unwrap_or_default()
        }
    }

    #[tokio::test]
    async fn input_failure_is_logged_and_the_loop_carries_on_until_farewell() {
        let mut session = Session::new();
        let mut input = ScriptedInput::new(vec![
            Err(AssistantError::speech("could not understand audio")),
            Ok(Some("hello".into())),
            Ok(Some("bye".into())),
            Ok(Some("tell me a joke".into())),
        ]);

        let end = session.run(&mut input).await;

        assert_eq!(end, SessionEnd::Farewell);
        let log = session.log_lines();
        assert_eq!(log.len(), 1);
        assert!(log[0].contains("[speech]"), "{}", log[0]);

        let screen = session.screen.lines();
        assert_eq!(screen.len(), 3, "{screen:?}");
        assert_eq!(screen[0], format!("Jarvis --> {SPEECH_APOLOGY}"));
        let greeting = screen[1].strip_prefix("Jarvis --> ").unwrap();
        assert!(greetings("Jarvis").iter().any(|g| g == greeting), "{greeting}");
        assert_eq!(screen[2], format!("Jarvis --> {FAREWELL_REPLY}"));

        // Nothing after the farewell is read, and the failed input never
        // reached the dialogue model.
        assert_eq!(input.script.len(), 1);
        assert_eq!(session.model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn end_of_input_ends_the_session() {
        let mut session = Session::new();
        let mut input = ScriptedInput::new(vec![Ok(Some("tell me a joke".into()))]);

        let end = session.run(&mut input).await;

        assert_eq!(end, SessionEnd::EndOfInput);
        assert_eq!(session.screen.lines(), vec!["Jarvis --> Sure.".to_string()]);
        assert_eq!(session.model.calls.load(Ordering::SeqCst), 1);
        assert!(session.log_lines().is_empty());
    }
}
