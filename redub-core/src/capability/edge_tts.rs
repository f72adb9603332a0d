//! Local speech synthesis through the `edge-tts` command-line binary.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::SpeechSynthesizer;
use crate::tools::{ToolRegistry, TOOL_EDGE_TTS};

pub struct EdgeTtsClient {
    tools: Arc<ToolRegistry>,
}

impl EdgeTtsClient {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl SpeechSynthesizer for EdgeTtsClient {
    async fn speak(&self, text: &str, voice: &str, output: &Path) -> anyhow::Result<()> {
        let binary = self.tools.path_of(TOOL_EDGE_TTS);
        let result = Command::new(&binary)
            .arg("--text")
            .arg(text)
            .arg("--voice")
            .arg(voice)
            .arg("--write-media")
            .arg(output)
            .output()
            .await
            .with_context(|| format!("spawn {}", binary.display()))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            bail!("edge-tts exited with {}: {}", result.status, stderr.trim());
        }
        if !output.exists() {
            bail!("edge-tts reported success but produced no file");
        }
        debug!(voice, output = %output.display(), "edge-tts synthesis done");
        Ok(())
    }
}
