//! Provider contracts consumed by the pipeline stages.
//!
//! Each capability has multiple provider implementations selected at
//! configuration time; stages only ever see the trait objects.

pub mod composite;
pub mod edge_tts;
pub mod openai;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One transcribed speech segment, millisecond precision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

/// Chat message for the multi-turn completion variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Speech-to-text capability.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_file: &Path, language: &str) -> anyhow::Result<Vec<Segment>>;
}

/// LLM chat-completion capability.
#[async_trait]
pub trait ChatCompleter: Send + Sync {
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> anyhow::Result<String>;

    async fn chat_with_history(&self, messages: &[ChatMessage]) -> anyhow::Result<String>;
}

/// Text-to-speech capability: synthesise `text` with `voice` into the
/// audio file at `output`.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn speak(&self, text: &str, voice: &str, output: &Path) -> anyhow::Result<()>;
}

/// Optional capability: train a cloned speaker from a reference
/// recording before synthesis may use it.
#[async_trait]
pub trait VoiceCloneTrainer: Send + Sync {
    async fn train(&self, reference_audio: &Path, speaker_id: &str) -> anyhow::Result<()>;
}

#[async_trait]
impl VoiceCloneTrainer for openai::OpenAiClient {
    async fn train(&self, reference_audio: &Path, speaker_id: &str) -> anyhow::Result<()> {
        self.train_voice_clone(reference_audio, speaker_id).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording test doubles shared by the stage tests.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Transcriber spy: counts invocations, returns canned segments.
    pub struct SpyTranscriber {
        pub segments: Vec<Segment>,
        pub calls: AtomicUsize,
    }

    impl SpyTranscriber {
        pub fn new(segments: Vec<Segment>) -> Self {
            Self {
                segments,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transcriber for SpyTranscriber {
        async fn transcribe(
            &self,
            _audio_file: &Path,
            _language: &str,
        ) -> anyhow::Result<Vec<Segment>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.segments.clone())
        }
    }

    /// Chat double that echoes the user prompt through a fixed function.
    pub struct CannedChat {
        pub reply: Box<dyn Fn(&str) -> String + Send + Sync>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl CannedChat {
        pub fn with(reply: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
            Self {
                reply: Box::new(reply),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatCompleter for CannedChat {
        async fn chat(&self, _system_prompt: &str, user_prompt: &str) -> anyhow::Result<String> {
            self.prompts.lock().unwrap().push(user_prompt.to_owned());
            Ok((self.reply)(user_prompt))
        }

        async fn chat_with_history(&self, messages: &[ChatMessage]) -> anyhow::Result<String> {
            let last = messages.last().map(|m| m.content.as_str()).unwrap_or("");
            self.chat("", last).await
        }
    }
}
