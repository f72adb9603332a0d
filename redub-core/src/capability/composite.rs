//! Voice-id based routing across speech-synthesis providers.
//!
//! The router keeps a list of `(predicate, provider)` strategies plus
//! an explicit default; the first matching predicate wins. Routing by
//! voice-id shape lets one task mix provider-specific voices without
//! reconfiguration.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::SpeechSynthesizer;

type VoicePredicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

pub struct CompositeSynthesizer {
    strategies: Vec<(String, VoicePredicate, Arc<dyn SpeechSynthesizer>)>,
    default: Arc<dyn SpeechSynthesizer>,
}

impl CompositeSynthesizer {
    pub fn new(default: Arc<dyn SpeechSynthesizer>) -> Self {
        Self {
            strategies: Vec::new(),
            default,
        }
    }

    pub fn route(
        mut self,
        name: &str,
        predicate: impl Fn(&str) -> bool + Send + Sync + 'static,
        provider: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        self.strategies
            .push((name.to_owned(), Box::new(predicate), provider));
        self
    }

    /// Voices like `zh-CN-XiaoxiaoNeural` belong to the local edge-tts
    /// binary.
    pub fn is_edge_voice(voice: &str) -> bool {
        let mut parts = voice.splitn(3, '-');
        let lang = parts.next().unwrap_or("");
        let region = parts.next().unwrap_or("");
        voice.contains("Neural")
            && lang.len() == 2
            && lang.chars().all(|c| c.is_ascii_lowercase())
            && region.len() == 2
            && region.chars().all(|c| c.is_ascii_uppercase())
    }

    fn pick(&self, voice: &str) -> (&str, &Arc<dyn SpeechSynthesizer>) {
        for (name, predicate, provider) in &self.strategies {
            if predicate(voice) {
                return (name, provider);
            }
        }
        ("default", &self.default)
    }
}

#[async_trait]
impl SpeechSynthesizer for CompositeSynthesizer {
    async fn speak(&self, text: &str, voice: &str, output: &Path) -> anyhow::Result<()> {
        let (name, provider) = self.pick(voice);
        debug!(voice, provider = name, "routing synthesis request");
        provider.speak(text, voice, output).await
    }
}
