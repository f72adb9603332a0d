//! Video-side ffmpeg/ffprobe operations: probing, audio extraction and
//! replacement, ducked mixing, clip cutting, vertical re-framing and
//! subtitle burning.

use std::path::Path;
use std::sync::Arc;

use tokio::process::Command;
use tracing::{info, warn};

use super::{command_failed, MediaError};
use crate::tools::{ToolRegistry, TOOL_FFMPEG, TOOL_FFPROBE};

/// Default mix levels for dubbed audio against the instrumental track.
pub const DEFAULT_TTS_VOLUME: f64 = 1.0;
pub const DEFAULT_BGM_VOLUME: f64 = 0.35;

pub struct VideoTools {
    tools: Arc<ToolRegistry>,
}

impl VideoTools {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }

    async fn run_ffmpeg<I, S>(&self, args: I) -> Result<(), MediaError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
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

    /// Width and height of the first video stream.
    pub async fn resolution(&self, input: &Path) -> Result<(u32, u32), MediaError> {
        let ffprobe = self.tools.path_of(TOOL_FFPROBE);
        let output = Command::new(&ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height",
                "-of",
                "csv=s=x:p=0",
            ])
            .arg(input)
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
        parse_resolution(&raw).ok_or_else(|| MediaError::Parse {
            tool: "ffprobe".to_owned(),
            message: format!("invalid resolution output: {raw:?}"),
        })
    }

    /// Container duration in seconds.
    pub async fn duration_secs(&self, input: &Path) -> Result<f64, MediaError> {
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
            .arg(input)
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

    /// Extract the audio track normalised for transcription: mono,
    /// 16 kHz, mp3.
    pub async fn extract_audio_mono16k(
        &self,
        input: &Path,
        output: &Path,
    ) -> Result<(), MediaError> {
        self.run_ffmpeg([
            std::ffi::OsString::from("-i"),
            input.as_os_str().to_owned(),
            "-vn".into(),
            "-ac".into(),
            "1".into(),
            "-ar".into(),
            "16000".into(),
            "-b:a".into(),
            "192k".into(),
            output.as_os_str().to_owned(),
        ])
        .await
    }

    /// Swap the audio track of a video for another, stream-copying the
    /// video.
    pub async fn replace_audio(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
    ) -> Result<(), MediaError> {
        self.run_ffmpeg([
            std::ffi::OsString::from("-i"),
            video.as_os_str().to_owned(),
            "-i".into(),
            audio.as_os_str().to_owned(),
            "-map".into(),
            "0:v".into(),
            "-map".into(),
            "1:a".into(),
            "-c:v".into(),
            "copy".into(),
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            "192k".into(),
            "-shortest".into(),
            output.as_os_str().to_owned(),
        ])
        .await
    }

    /// Mix the dubbed track against the instrumental with sidechain
    /// ducking and loudness normalisation, encoding AAC stereo 44.1 kHz.
    pub async fn mix_with_ducking(
        &self,
        tts_audio: &Path,
        instrumental: &Path,
        output: &Path,
        tts_volume: f64,
        bgm_volume: f64,
    ) -> Result<(), MediaError> {
        // The base boost keeps the BGM audible in speech gaps since the
        // compressor will pull it down whenever the dub is active.
        let filter = format!(
            "[0:a]volume={:.2}[tts];\
             [1:a]volume={:.2}[bgm];\
             [bgm][tts]sidechaincompress=threshold=0.08:ratio=6:attack=100:release=800:link=average[ducked_bgm][control_tts];\
             [ducked_bgm][control_tts]amix=inputs=2:duration=first[mixed];\
             [mixed]loudnorm=I=-14:TP=-1.5:LRA=11[out]",
            tts_volume,
            bgm_volume * 1.5,
        );
        let result = self
            .run_ffmpeg([
                std::ffi::OsString::from("-i"),
                tts_audio.as_os_str().to_owned(),
                "-i".into(),
                instrumental.as_os_str().to_owned(),
                "-filter_complex".into(),
                filter.into(),
                "-map".into(),
                "[out]".into(),
                "-ac".into(),
                "2".into(),
                "-ar".into(),
                "44100".into(),
                "-c:a".into(),
                "aac".into(),
                "-b:a".into(),
                "192k".into(),
                output.as_os_str().to_owned(),
            ])
            .await;
        match &result {
            Ok(()) => info!(output = %output.display(), "ducked mix rendered"),
            Err(e) => warn!(error = %e, "ducked mix failed"),
        }
        result
    }

    /// Cut `[start, end]` out of a master file with stream copy.
    pub async fn cut_stream_copy(
        &self,
        master: &Path,
        start: &str,
        end: &str,
        output: &Path,
    ) -> Result<(), MediaError> {
        self.run_ffmpeg([
            std::ffi::OsString::from("-ss"),
            start.into(),
            "-to".into(),
            end.into(),
            "-i".into(),
            master.as_os_str().to_owned(),
            "-c".into(),
            "copy".into(),
            "-avoid_negative_ts".into(),
            "1".into(),
            output.as_os_str().to_owned(),
        ])
        .await
    }

    /// Pad a landscape video to 720×1280 with the two title bands used
    /// by the vertical rendering.
    pub async fn convert_to_vertical(
        &self,
        input: &Path,
        output: &Path,
        major_title: &str,
        minor_title: &str,
    ) -> Result<(), MediaError> {
        if output.exists() {
            info!(output = %output.display(), "vertical intermediate already exists");
            return Ok(());
        }
        let (font_bold, font_regular) = platform_font_paths()?;
        let filter = format!(
            "scale=720:1280:force_original_aspect_ratio=decrease,\
             pad=720:1280:(ow-iw)/2:(oh-ih)*2/5,\
             drawbox=y=0:h=100:c=black@1:t=fill,\
             drawtext=text='{major}':x=(w-text_w)/2:y=210:fontsize=55:fontcolor=yellow:box=1:boxcolor=black@0.5:fontfile='{bold}',\
             drawtext=text='{minor}':x=(w-text_w)/2:y=280:fontsize=40:fontcolor=yellow:box=1:boxcolor=black@0.5:fontfile='{regular}'",
            major = escape_drawtext(major_title),
            minor = escape_drawtext(minor_title),
            bold = font_bold,
            regular = font_regular,
        );
        self.run_ffmpeg([
            std::ffi::OsString::from("-i"),
            input.as_os_str().to_owned(),
            "-vf".into(),
            filter.into(),
            "-r".into(),
            "30".into(),
            "-b:v".into(),
            "7587k".into(),
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            "192k".into(),
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            "fast".into(),
            output.as_os_str().to_owned(),
        ])
        .await
    }

    /// Burn an ASS subtitle file into the video.
    pub async fn burn_ass(
        &self,
        input: &Path,
        ass_path: &Path,
        output: &Path,
    ) -> Result<(), MediaError> {
        let escaped = crate::subtitle::ass::escape_filter_path(&ass_path.display().to_string());
        let filter = format!("ass='{escaped}'");
        self.run_ffmpeg([
            std::ffi::OsString::from("-i"),
            input.as_os_str().to_owned(),
            "-vf".into(),
            filter.into(),
            "-c:a".into(),
            "aac".into(),
            "-b:a".into(),
            "192k".into(),
            output.as_os_str().to_owned(),
        ])
        .await
    }
}

fn parse_resolution(raw: &str) -> Option<(u32, u32)> {
    let cleaned = raw.trim().trim_end_matches('x');
    let (w, h) = cleaned.split_once('x')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

fn escape_drawtext(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

fn platform_font_paths() -> Result<(&'static str, &'static str), MediaError> {
    match std::env::consts::OS {
        "windows" => Ok(("C\\:/Windows/Fonts/msyhbd.ttc", "C\\:/Windows/Fonts/msyh.ttc")),
        "macos" => Ok((
            "/System/Library/Fonts/Supplemental/Arial Bold.ttf",
            "/System/Library/Fonts/Supplemental/Arial.ttf",
        )),
        "linux" => Ok((
            "/usr/share/fonts/opentype/noto/NotoSansCJK-Bold.ttc",
            "/usr/share/fonts/opentype/noto/NotoSansCJK-Regular.ttc",
        )),
        other => Err(MediaError::Parse {
            tool: "fonts".to_owned(),
            message: format!("unsupported OS: {other}"),
        }),
    }
}

/// Landscape/portrait helper used by the burn stage.
pub fn is_landscape(width: u32, height: u32) -> bool {
    width >= height
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_parsing_tolerates_trailing_x() {
        assert_eq!(parse_resolution("1920x1080\n"), Some((1920, 1080)));
        assert_eq!(parse_resolution("1920x1080x"), Some((1920, 1080)));
        assert_eq!(parse_resolution("garbage"), None);
    }

    #[test]
    fn drawtext_escaping() {
        assert_eq!(escape_drawtext("it's 1:1"), "it\\'s 1\\:1");
    }

    #[test]
    fn orientation_helper() {
        assert!(is_landscape(1920, 1080));
        assert!(!is_landscape(720, 1280));
    }
}
