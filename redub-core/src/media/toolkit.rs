//! Audio primitives used by the dubbing engine.
//!
//! The engine's timing logic is pure arithmetic over clip durations, so
//! it talks to this trait rather than to ffmpeg directly; the tests
//! drive it with [`testing::SimulatedAudio`] and never spawn a process.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use super::{command_failed, MediaError};
use crate::tools::{ToolRegistry, TOOL_FFMPEG, TOOL_FFPROBE};

#[async_trait]
pub trait AudioToolkit: Send + Sync {
    /// Write `duration_secs` of silence as PCM s16le, mono, 44.1 kHz.
    async fn generate_silence(&self, output: &Path, duration_secs: f64) -> Result<(), MediaError>;

    /// Resample any input to mono 44.1 kHz WAV.
    async fn resample_mono_44k(&self, input: &Path, output: &Path) -> Result<(), MediaError>;

    /// Measured duration of an audio file in seconds.
    async fn duration_secs(&self, path: &Path) -> Result<f64, MediaError>;

    /// Concatenate same-format clips with stream copy.
    async fn concat_stream_copy(
        &self,
        inputs: &[PathBuf],
        output: &Path,
    ) -> Result<(), MediaError>;

    /// Retime a clip with the atempo filter at the given speed factor.
    async fn retime(&self, input: &Path, output: &Path, speed: f64) -> Result<(), MediaError>;

    /// Plain file copy (pass-through fit).
    async fn copy(&self, input: &Path, output: &Path) -> Result<(), MediaError>;
}

/// Production implementation shelling out to ffmpeg / ffprobe.
pub struct FfmpegToolkit {
    tools: Arc<ToolRegistry>,
}

impl FfmpegToolkit {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }

    async fn run_ffmpeg(&self, args: &[&std::ffi::OsStr]) -> Result<(), MediaError> {
        let ffmpeg = self.tools.path_of(TOOL_FFMPEG);
        let output = Command::new(&ffmpeg)
            .arg("-y")
            .args(args)
            .output()
            .await
            .map_err(|source| MediaError::Spawn {
                tool: ffmpeg.display().to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(command_failed("ffmpeg", &output));
        }
        Ok(())
    }
}

macro_rules! os_args {
    ($($arg:expr),* $(,)?) => {
        &[$(std::ffi::OsStr::new($arg)),*]
    };
}

#[async_trait]
impl AudioToolkit for FfmpegToolkit {
    async fn generate_silence(&self, output: &Path, duration_secs: f64) -> Result<(), MediaError> {
        let duration = format!("{duration_secs:.3}");
        self.run_ffmpeg(os_args![
            "-f",
            "lavfi",
            "-i",
            "anullsrc=channel_layout=mono:sample_rate=44100",
            "-t",
            &duration,
            "-ar",
            "44100",
            "-ac",
            "1",
            "-c:a",
            "pcm_s16le",
            output.as_os_str(),
        ])
        .await
    }

    async fn resample_mono_44k(&self, input: &Path, output: &Path) -> Result<(), MediaError> {
        self.run_ffmpeg(os_args![
            "-i",
            input.as_os_str(),
            "-ar",
            "44100",
            "-ac",
            "1",
            output.as_os_str(),
        ])
        .await
    }

    async fn duration_secs(&self, path: &Path) -> Result<f64, MediaError> {
        let ffprobe = self.tools.path_of(TOOL_FFPROBE);
        let output = Command::new(&ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|source| MediaError::Spawn {
                tool: ffprobe.display().to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(command_failed("ffprobe", &output));
        }
        let raw = String::from_utf8_lossy(&output.stdout);
        raw.trim().parse::<f64>().map_err(|_| MediaError::Parse {
            tool: "ffprobe".to_owned(),
            message: format!("not a duration: {raw:?}"),
        })
    }

    async fn concat_stream_copy(
        &self,
        inputs: &[PathBuf],
        output: &Path,
    ) -> Result<(), MediaError> {
        let list_path = output.with_extension("concat.txt");
        let mut list = String::new();
        for input in inputs {
            // Single quotes inside paths terminate the concat entry.
            let escaped = input.display().to_string().replace('\'', "'\\''");
            list.push_str(&format!("file '{escaped}'\n"));
        }
        tokio::fs::write(&list_path, list).await?;

        let result = self
            .run_ffmpeg(os_args![
                "-f",
                "concat",
                "-safe",
                "0",
                "-i",
                list_path.as_os_str(),
                "-c",
                "copy",
                output.as_os_str(),
            ])
            .await;
        let _ = tokio::fs::remove_file(&list_path).await;
        result
    }

    async fn retime(&self, input: &Path, output: &Path, speed: f64) -> Result<(), MediaError> {
        let filter = format!("atempo={speed:.2}");
        self.run_ffmpeg(os_args![
            "-i",
            input.as_os_str(),
            "-filter:a",
            &filter,
            "-ar",
            "44100",
            output.as_os_str(),
        ])
        .await
    }

    async fn copy(&self, input: &Path, output: &Path) -> Result<(), MediaError> {
        tokio::fs::copy(input, output).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory audio world: every "file" is just a recorded duration.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct SimulatedAudio {
        durations: Mutex<HashMap<PathBuf, f64>>,
        pub concat_calls: Mutex<Vec<Vec<PathBuf>>>,
    }

    impl SimulatedAudio {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn set_duration(&self, path: &Path, secs: f64) {
            self.durations.lock().unwrap().insert(path.to_owned(), secs);
        }

        pub fn duration_of(&self, path: &Path) -> Option<f64> {
            self.durations.lock().unwrap().get(path).copied()
        }
    }

    #[async_trait]
    impl AudioToolkit for SimulatedAudio {
        async fn generate_silence(
            &self,
            output: &Path,
            duration_secs: f64,
        ) -> Result<(), MediaError> {
            self.set_duration(output, duration_secs);
            Ok(())
        }

        async fn resample_mono_44k(&self, input: &Path, output: &Path) -> Result<(), MediaError> {
            let d = self
                .duration_of(input)
                .ok_or_else(|| MediaError::MissingOutput(input.to_owned()))?;
            self.set_duration(output, d);
            Ok(())
        }

        async fn duration_secs(&self, path: &Path) -> Result<f64, MediaError> {
            self.duration_of(path)
                .ok_or_else(|| MediaError::MissingOutput(path.to_owned()))
        }

        async fn concat_stream_copy(
            &self,
            inputs: &[PathBuf],
            output: &Path,
        ) -> Result<(), MediaError> {
            let mut total = 0.0;
            for input in inputs {
                total += self
                    .duration_of(input)
                    .ok_or_else(|| MediaError::MissingOutput(input.to_owned()))?;
            }
            self.set_duration(output, total);
            self.concat_calls.lock().unwrap().push(inputs.to_vec());
            Ok(())
        }

        async fn retime(&self, input: &Path, output: &Path, speed: f64) -> Result<(), MediaError> {
            let d = self
                .duration_of(input)
                .ok_or_else(|| MediaError::MissingOutput(input.to_owned()))?;
            self.set_duration(output, d / speed);
            Ok(())
        }

        async fn copy(&self, input: &Path, output: &Path) -> Result<(), MediaError> {
            let d = self
                .duration_of(input)
                .ok_or_else(|| MediaError::MissingOutput(input.to_owned()))?;
            self.set_duration(output, d);
            Ok(())
        }
    }
}
