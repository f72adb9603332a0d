//! OpenAI-compatible HTTP providers for all three capabilities.
//!
//! One [`OpenAiClient`] can serve chat completion, transcription and
//! speech synthesis against any endpoint that speaks the OpenAI wire
//! shape; the base URL and model are configured per capability.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{ChatCompleter, ChatMessage, Segment, SpeechSynthesizer, Transcriber};

/// TTS synthesis calls are bounded; chat/transcription rely on the
/// provider-side limits.
const TTS_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: &str, model: &str, proxy: Option<&str>) -> Self {
        let mut builder =
            reqwest::Client::builder().user_agent(concat!("redub/", env!("CARGO_PKG_VERSION")));
        if let Some(proxy_url) = proxy.filter(|p| !p.trim().is_empty()) {
            match reqwest::Proxy::all(proxy_url) {
                Ok(p) => builder = builder.proxy(p),
                Err(e) => {
                    tracing::warn!(proxy = %proxy_url, error = %e, "ignoring invalid proxy URL")
                }
            }
        }
        Self {
            http: builder.build().unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: api_key.to_owned(),
            model: model.to_owned(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[async_trait]
impl ChatCompleter for OpenAiClient {
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> anyhow::Result<String> {
        let mut messages = Vec::with_capacity(2);
        if !system_prompt.is_empty() {
            messages.push(ChatMessage {
                role: "system".into(),
                content: system_prompt.to_owned(),
            });
        }
        messages.push(ChatMessage {
            role: "user".into(),
            content: user_prompt.to_owned(),
        });
        self.chat_with_history(&messages).await
    }

    async fn chat_with_history(&self, messages: &[ChatMessage]) -> anyhow::Result<String> {
        let body = json!({
            "model": self.model,
            "messages": messages,
        });
        let resp = self
            .http
            .post(self.endpoint("/chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("chat completion request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("chat completion returned {status}: {text}");
        }

        let parsed: ChatResponse = resp.json().await.context("decode chat completion")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .context("chat completion returned no choices")?;
        debug!(chars = content.len(), "chat completion received");
        Ok(content)
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    segments: Vec<TranscriptionSegment>,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptionSegment {
    start: f64,
    end: f64,
    text: String,
}

#[async_trait]
impl Transcriber for OpenAiClient {
    async fn transcribe(&self, audio_file: &Path, language: &str) -> anyhow::Result<Vec<Segment>> {
        let bytes = tokio::fs::read(audio_file)
            .await
            .with_context(|| format!("read audio file {}", audio_file.display()))?;
        let file_name = audio_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.mp3".to_owned());

        let mut form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "segment")
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            );
        if language != "auto" && !language.is_empty() {
            form = form.text("language", language.to_owned());
        }

        let resp = self
            .http
            .post(self.endpoint("/audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .context("transcription request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("transcription returned {status}: {text}");
        }

        let parsed: TranscriptionResponse = resp.json().await.context("decode transcription")?;
        if parsed.segments.is_empty() && !parsed.text.is_empty() {
            bail!("transcription provider returned no segment timestamps");
        }

        Ok(parsed
            .segments
            .into_iter()
            .map(|s| Segment {
                start_ms: (s.start * 1000.0).round() as u64,
                end_ms: (s.end * 1000.0).round() as u64,
                text: s.text.trim().to_owned(),
            })
            .collect())
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiClient {
    async fn speak(&self, text: &str, voice: &str, output: &Path) -> anyhow::Result<()> {
        let body = json!({
            "model": self.model,
            "voice": voice,
            "input": text,
            "response_format": "wav",
        });
        let resp = self
            .http
            .post(self.endpoint("/audio/speech"))
            .bearer_auth(&self.api_key)
            .timeout(TTS_TIMEOUT)
            .json(&body)
            .send()
            .await
            .context("speech synthesis request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("speech synthesis returned {status}: {text}");
        }

        let bytes = resp.bytes().await.context("read synthesis payload")?;
        tokio::fs::write(output, &bytes)
            .await
            .with_context(|| format!("write synthesis output {}", output.display()))?;
        Ok(())
    }
}

// ── Voice cloning ─────────────────────────────────────────────────────────────

/// Poll cadence and overall deadline for voice-clone training.
const CLONE_POLL_INTERVAL: Duration = Duration::from_secs(2);
const CLONE_DEADLINE: Duration = Duration::from_secs(180);

#[derive(Debug, Deserialize)]
struct CloneStatusResponse {
    status: String,
}

impl OpenAiClient {
    /// Upload a reference recording and wait for speaker training to
    /// finish. Returns once the provider reports the speaker as ready.
    pub async fn train_voice_clone(
        &self,
        reference_audio: &Path,
        speaker_id: &str,
    ) -> anyhow::Result<()> {
        let bytes = tokio::fs::read(reference_audio)
            .await
            .with_context(|| format!("read reference audio {}", reference_audio.display()))?;
        let form = reqwest::multipart::Form::new()
            .text("speaker_id", speaker_id.to_owned())
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name("reference.wav"),
            );

        let resp = self
            .http
            .post(self.endpoint("/voice_clone/train"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .context("voice clone upload failed")?;
        if !resp.status().is_success() {
            bail!("voice clone upload returned {}", resp.status());
        }

        let deadline = tokio::time::Instant::now() + CLONE_DEADLINE;
        loop {
            if tokio::time::Instant::now() >= deadline {
                bail!("voice clone training timed out for speaker {speaker_id}");
            }
            tokio::time::sleep(CLONE_POLL_INTERVAL).await;

            let resp = self
                .http
                .get(self.endpoint("/voice_clone/status"))
                .query(&[("speaker_id", speaker_id)])
                .bearer_auth(&self.api_key)
                .send()
                .await
                .context("voice clone status poll failed")?;
            if !resp.status().is_success() {
                bail!("voice clone status returned {}", resp.status());
            }
            let parsed: CloneStatusResponse = resp.json().await?;
            match parsed.status.as_str() {
                "ready" | "success" | "active" => return Ok(()),
                "failed" => bail!("voice clone training failed for speaker {speaker_id}"),
                other => debug!(speaker_id, status = other, "voice clone still training"),
            }
        }
    }
}
