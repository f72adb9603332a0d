//! Source separation of the original audio into vocals and
//! instrumental via the external `audio-separator` tool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::process::Command;
use tracing::{info, warn};

use super::{command_failed, MediaError};
use crate::tools::{ToolRegistry, TOOL_AUDIO_SEPARATOR};

const SEPARATION_MODEL: &str = "UVR-MDX-NET-Inst_HQ_3.onnx";

#[derive(Debug, Clone)]
pub struct SeparationResult {
    /// Extracted speech; optional because some models only produce the
    /// instrumental stem.
    pub vocals: Option<PathBuf>,
    pub instrumental: PathBuf,
}

/// Run separation on `audio`, writing stems into `output_dir`.
pub async fn separate_audio(
    tools: &Arc<ToolRegistry>,
    audio: &Path,
    output_dir: &Path,
) -> Result<SeparationResult, MediaError> {
    if !audio.exists() {
        return Err(MediaError::MissingOutput(audio.to_owned()));
    }

    let separator = tools.path_of(TOOL_AUDIO_SEPARATOR);
    info!(audio = %audio.display(), "starting audio separation");
    let output = Command::new(&separator)
        .args(["--model_filename", SEPARATION_MODEL])
        .arg("--output_dir")
        .arg(output_dir)
        .args(["--output_format", "wav"])
        .arg(audio)
        .output()
        .await
        .map_err(|source| MediaError::Spawn {
            tool: separator.display().to_string(),
            source,
        })?;
    if !output.status.success() {
        return Err(command_failed("audio-separator", &output));
    }

    let stem = audio
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let instrumental = find_stem_output(output_dir, &stem, "Instrumental")
        .ok_or_else(|| MediaError::MissingOutput(output_dir.join("*Instrumental*.wav")))?;
    let vocals = find_stem_output(output_dir, &stem, "Vocals");
    if vocals.is_none() {
        warn!("vocals stem not produced by separation model");
    }

    Ok(SeparationResult {
        vocals,
        instrumental,
    })
}

/// Exact-model naming first, then any file mentioning the stem kind.
fn find_stem_output(dir: &Path, base: &str, kind: &str) -> Option<PathBuf> {
    let model = SEPARATION_MODEL.trim_end_matches(".onnx");
    let exact = dir.join(format!("{base}_({kind})_{model}.wav"));
    if exact.exists() {
        return Some(exact);
    }
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| {
            p.extension().map(|e| e == "wav").unwrap_or(false)
                && p.file_name()
                    .map(|n| n.to_string_lossy().contains(kind))
                    .unwrap_or(false)
        })
}
