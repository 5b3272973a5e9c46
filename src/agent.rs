//! Generated replies for utterances no rule handles.
//!
//! [`ResponseGenerator`] frames the utterance (plus a short window of
//! earlier turns) as a prompt, asks a [`DialogueModel`] for a continuation
//! and cleans the raw text into something that can be printed and spoken:
//! reasoning blocks, special tokens, Markdown and echoed prompt text are
//! removed and the length is capped. The production model is a local LLM
//! served by Ollama; tests substitute their own [`DialogueModel`].

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use ollama_rs::{generation::completion::request::GenerationRequest, Ollama};

use crate::error::AssistantError;

/// Text-in/text-out access to a generative model. Outputs are sampled, so
/// the same prompt may produce different text on each call.
#[async_trait]
pub trait DialogueModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// [`DialogueModel`] backed by a model served from a local Ollama instance.
pub struct OllamaModel {
    client: Ollama,
    model: String,
}

impl OllamaModel {
    pub fn new(client: Ollama, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl DialogueModel for OllamaModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = GenerationRequest::new(self.model.clone(), prompt.to_string());
        let response = self
            .client
            .generate(request)
            .await
            .with_context(|| format!("failed to query local language model '{}'", self.model))?;
        Ok(response.response)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub user: String,
    pub assistant: String,
}

/// The most recent turns of the session, oldest first. Only `window`
/// turns are kept; nothing is persisted between runs.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    turns: VecDeque<Turn>,
    window: usize,
}

impl ConversationContext {
    pub fn new(window: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(window),
            window,
        }
    }

    pub fn push(&mut self, user: &str, assistant: &str) {
        if self.window == 0 {
            return;
        }
        if self.turns.len() == self.window {
            self.turns.pop_front();
        }
        self.turns.push_back(Turn {
            user: user.to_string(),
            assistant: assistant.to_string(),
        });
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }
}

/// Reply used when cleanup leaves nothing worth saying. An empty string can
/// hang some TTS backends.
pub const EMPTY_REPLY: &str = "I didn't catch that. Could you repeat that?";

/// Control and end-of-sequence markers various model families leak into
/// their output.
const SPECIAL_TOKENS: &[&str] = &[
    "<|endoftext|>",
    "<|im_start|>",
    "<|im_end|>",
    "<|eot_id|>",
    "<|start_header_id|>",
    "<|end_header_id|>",
    "<s>",
    "</s>",
    "<pad>",
    "<unk>",
];

pub struct ResponseGenerator {
    model: Arc<dyn DialogueModel>,
    name: String,
    max_chars: usize,
}

impl ResponseGenerator {
    pub fn new(model: Arc<dyn DialogueModel>, name: &str, max_chars: usize) -> Self {
        Self {
            model,
            name: name.to_string(),
            max_chars,
        }
    }

    /// Produce a reply to `utterance`. Model errors are returned as
    /// [`AssistantError::ModelInference`]; an empty or unusable completion
    /// becomes [`EMPTY_REPLY`].
    pub async fn generate(
        &self,
        utterance: &str,
        history: &ConversationContext,
    ) -> Result<String, AssistantError> {
        let prompt = self.prompt(utterance, history);
        log::debug!("LLM prompt: {}", prompt);

        let raw = self
            .model
            .complete(&prompt)
            .await
            .map_err(|e| AssistantError::model(&e))?;
        log::debug!("Raw LLM response: {}", raw);

        let answer = self.clean(&raw, &prompt, utterance);
        if answer.is_empty() {
            return Ok(EMPTY_REPLY.to_string());
        }
        Ok(answer)
    }

    fn prompt(&self, utterance: &str, history: &ConversationContext) -> String {
        let mut prompt = format!(
            "You are {name}, a friendly conversational assistant.\n\
Answer briefly in one or two plain sentences.\n\
Do not use Markdown formatting, code blocks, backticks or other special markup.\n\n",
            name = self.name
        );
        for turn in history.turns() {
            prompt.push_str(&format!("User: {}\n{}: {}\n", turn.user, self.name, turn.assistant));
        }
        prompt.push_str(&format!("User: {}\n{}:", utterance.trim(), self.name));
        prompt
    }

    /// Turn a raw completion into a reply fit for the console and TTS.
    ///
    /// Small local models rarely stop where we would like. Reasoning models
    /// wrap their thoughts in `<think>` tags, some leak end-of-sequence
    /// markers, and many fall into Markdown despite the prompt. Others
    /// replay the prompt or keep writing the conversation, inventing the
    /// user's next line. Each step below removes one of those habits, in an
    /// order where earlier steps do not hide text from later ones: the
    /// think block goes first because it may itself contain fences or
    /// labels, and the length cap comes last so it measures only what will
    /// actually be said.
    fn clean(&self, raw: &str, prompt: &str, utterance: &str) -> String {
        let mut answer = strip_think_blocks(raw.trim());
        for token in SPECIAL_TOKENS {
            if answer.contains(token) {
                answer = answer.replace(token, "");
            }
        }
        // Code blocks read terribly aloud, so they are dropped rather than
        // unwrapped.
        answer = strip_code_fences(&answer);
        answer = strip_echo(&answer, prompt, utterance, &self.name);
        answer = cut_at_next_turn(&answer, &self.name);
        truncate(answer.trim(), self.max_chars)
    }
}

/// Remove `<think>...</think>` reasoning blocks. An opening tag without a
/// closing one is left alone.
fn strip_think_blocks(text: &str) -> String {
    let mut answer = text.to_string();
    while let (Some(start), Some(end)) = (answer.find("<think>"), answer.find("</think>")) {
        if end < start {
            break;
        }
        log::debug!(
            "Captured think block: {}",
            answer[start + "<think>".len()..end].trim()
        );
        answer.replace_range(start..end + "</think>".len(), "");
    }
    answer.trim().to_string()
}

/// Drop fenced code blocks entirely and remove inline backticks.
fn strip_code_fences(text: &str) -> String {
    let mut answer = text.to_string();
    if answer.contains("```") {
        let mut cleaned = String::new();
        let mut in_code = false;
        for line in answer.lines() {
            if line.trim_start().starts_with("```") {
                in_code = !in_code;
                continue;
            }
            if !in_code {
                cleaned.push_str(line);
                cleaned.push('\n');
            }
        }
        answer = cleaned.trim().to_string();
    }
    if answer.contains('`') {
        answer = answer.replace('`', "");
    }
    answer
}

/// Some models repeat the prompt, the user's line or a speaker label before
/// the actual reply.
fn strip_echo(text: &str, prompt: &str, utterance: &str, name: &str) -> String {
    let mut rest = text.trim_start();
    if let Some(r) = rest.strip_prefix(prompt.trim()) {
        rest = r.trim_start();
    }
    if let Some(r) = strip_prefix_ignore_case(rest, "User:") {
        rest = r.trim_start();
    }
    let utterance = utterance.trim();
    if let Some(r) = strip_prefix_ignore_case(rest, utterance) {
        if r.chars().next().map_or(true, |c| !c.is_alphanumeric()) {
            rest = r.trim_start_matches(|c: char| c.is_whitespace() || c == '?' || c == '.');
        }
    }
    let labels = [format!("{name}:"), "Assistant:".to_string(), "Bot:".to_string()];
    for label in &labels {
        if let Some(r) = strip_prefix_ignore_case(rest, label) {
            rest = r.trim_start();
        }
    }
    rest.to_string()
}

/// A model that keeps going writes the user's next line itself; keep only
/// its own turn.
fn cut_at_next_turn(text: &str, name: &str) -> String {
    let markers = ["User:".to_string(), format!("\n{name}:")];
    let cut = markers.iter().filter_map(|m| text.find(m.as_str())).min();
    match cut {
        Some(idx) => text[..idx].trim_end().to_string(),
        None => text.to_string(),
    }
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return None;
    }
    let head = text.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&text[prefix.len()..])
    } else {
        None
    }
}

/// Cap `text` at `max_chars` characters, preferring to end on a sentence
/// boundary and otherwise on a word boundary.
///
/// The cap is in characters rather than bytes so accented or non-Latin
/// replies are not cut shorter than English ones, and so slicing never
/// lands inside a multi-byte character. A reply that ends on a full stop
/// sounds finished when spoken; the trailing "..." marks the cases where
/// it does not.
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    // Byte offset of the first character past the cap.
    let byte_limit = text
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let head = &text[..byte_limit];
    if let Some(end) = head.rfind(['.', '!', '?']) {
        if end > 0 {
            return head[..=end].to_string();
        }
    }
    match head.rfind(char::is_whitespace) {
        Some(space) if space > 0 => format!("{}...", head[..space].trim_end()),
        _ => format!("{head}..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Returns a fixed completion and remembers every prompt it saw.
    struct ScriptedModel {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn last_prompt(&self) -> String {
            self.prompts.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl DialogueModel for ScriptedModel {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    struct BrokenModel;

    #[async_trait]
    impl DialogueModel for BrokenModel {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Err(anyhow::anyhow!("connection refused"))
        }
    }

    fn generator(model: Arc<dyn DialogueModel>) -> ResponseGenerator {
        ResponseGenerator::new(model, "Jarvis", 300)
    }

    #[tokio::test]
    async fn prompt_includes_history_window_and_utterance() {
        let model = ScriptedModel::new("Sure.");
        let mut history = ConversationContext::new(2);
        history.push("hello", "Hi there!");
        history.push("what time is it", "It is 10:15.");
        history.push("tell me a joke", "Why did the chicken cross the road?");

        let reply = generator(model.clone())
            .generate("why?", &history)
            .await
            .unwrap();
        assert_eq!(reply, "Sure.");

        let prompt = model.last_prompt();
        assert!(prompt.starts_with("You are Jarvis"));
        assert!(!prompt.contains("User: hello\n"));
        assert!(prompt.contains("User: what time is it\nJarvis: It is 10:15.\n"));
        assert!(prompt.contains("User: tell me a joke\nJarvis: Why did the chicken cross the road?\n"));
        assert!(prompt.ends_with("User: why?\nJarvis:"));
    }

    #[tokio::test]
    async fn echoed_prompt_and_labels_are_removed() {
        let history = ConversationContext::new(0);
        let gen = generator(ScriptedModel::new("placeholder"));
        let prompt = gen.prompt("tell me a joke", &history);

        let raw = format!("{prompt} Why don't skeletons fight? They lack the guts.");
        assert_eq!(
            gen.clean(&raw, &prompt, "tell me a joke"),
            "Why don't skeletons fight? They lack the guts."
        );
        assert_eq!(
            gen.clean("tell me a joke? Jarvis: Knock knock.", &prompt, "tell me a joke"),
            "Knock knock."
        );
        assert_eq!(
            gen.clean("Assistant: Fine, thanks.", &prompt, "how are you"),
            "Fine, thanks."
        );
    }

    #[test]
    fn utterance_prefix_must_end_on_a_word_boundary() {
        assert_eq!(strip_echo("okay then", "", "ok", "Jarvis"), "okay then");
        assert_eq!(strip_echo("ok. Fine.", "", "ok", "Jarvis"), "Fine.");
    }

    #[test]
    fn think_blocks_special_tokens_and_markdown_are_stripped() {
        let gen = generator(ScriptedModel::new(""));
        let raw = "<think>The user wants a fact.</think>\nThe `moon` is about 384,000 km away.<|endoftext|>";
        assert_eq!(
            gen.clean(raw, "", "how far is the moon"),
            "The moon is about 384,000 km away."
        );

        let fenced = "Here you go.\n```\nprint('hi')\n```\nThat prints hi.";
        assert_eq!(strip_code_fences(fenced), "Here you go.\nThat prints hi.");
    }

    #[test]
    fn unterminated_think_block_is_kept() {
        assert_eq!(strip_think_blocks("<think> still going"), "<think> still going");
    }

    #[test]
    fn continuation_into_next_user_turn_is_cut() {
        assert_eq!(
            cut_at_next_turn("I am well. User: great\nJarvis: glad", "Jarvis"),
            "I am well."
        );
        assert_eq!(
            cut_at_next_turn("Line one.\nJarvis: line two", "Jarvis"),
            "Line one."
        );
    }

    #[test]
    fn long_replies_are_truncated_on_sentence_boundaries() {
        let text = "First sentence here. Second sentence is rather long and goes on.";
        assert_eq!(truncate(text, 30), "First sentence here.");
        assert_eq!(truncate("no punctuation at all in this text", 20), "no punctuation at...");
        assert_eq!(truncate("short", 300), "short");
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let text = "ééééé ééééé";
        assert_eq!(truncate(text, 8), "ééééé...");
    }

    #[tokio::test]
    async fn empty_completion_becomes_clarification() {
        let reply = generator(ScriptedModel::new("<think>hmm</think>  <|endoftext|>"))
            .generate("asdf", &ConversationContext::new(3))
            .await
            .unwrap();
        assert_eq!(reply, EMPTY_REPLY);
    }

    #[tokio::test]
    async fn model_errors_become_inference_failures() {
        let err = generator(Arc::new(BrokenModel))
            .generate("tell me a story", &ConversationContext::new(3))
            .await
            .unwrap_err();
        assert!(matches!(err, AssistantError::ModelInference(_)));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn context_keeps_only_the_window() {
        let mut ctx = ConversationContext::new(2);
        ctx.push("a", "1");
        ctx.push("b", "2");
        ctx.push("c", "3");
        let users: Vec<&str> = ctx.turns().map(|t| t.user.as_str()).collect();
        assert_eq!(users, vec!["b", "c"]);

        let mut none = ConversationContext::new(0);
        none.push("a", "1");
        assert_eq!(none.turns().count(), 0);
    }
}
