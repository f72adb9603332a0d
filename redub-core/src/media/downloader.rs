//! yt-dlp wrapper: source media download, metadata, thumbnails and
//! subtitle-only fetches, plus canonical video-id extraction for the
//! supported platforms.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{info, warn};

use super::{command_failed, MediaError};
use crate::tools::{ToolRegistry, TOOL_YTDLP};

/// Canonical 11-character YouTube video id, or `None` for malformed
/// YouTube URLs.
pub fn youtube_video_id(url: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?:v=|/shorts/|/embed/|youtu\.be/|/live/)([A-Za-z0-9_-]{11})(?:[?&#/]|$)")
            .unwrap()
    });
    re.captures(url).map(|c| c[1].to_owned())
}

/// Bilibili BV id (`BV` + 10 alphanumerics), or `None`.
pub fn bilibili_video_id(url: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(BV[0-9A-Za-z]{10})").unwrap());
    re.captures(url).map(|c| c[1].to_owned())
}

/// Basic metadata parsed from `yt-dlp --dump-json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceMetadata {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub duration: f64,
}

pub struct Downloader {
    tools: Arc<ToolRegistry>,
    proxy: Option<String>,
    cookies_file: Option<PathBuf>,
}

impl Downloader {
    pub fn new(
        tools: Arc<ToolRegistry>,
        proxy: Option<String>,
        cookies_file: Option<PathBuf>,
    ) -> Self {
        Self {
            tools,
            proxy,
            cookies_file,
        }
    }

    fn common_args(&self) -> Vec<std::ffi::OsString> {
        let mut args = Vec::new();
        if let Some(proxy) = self.proxy.as_deref().filter(|p| !p.trim().is_empty()) {
            args.push("--proxy".into());
            args.push(proxy.into());
        }
        if let Some(cookies) = &self.cookies_file {
            if cookies.exists() {
                args.push("--cookies".into());
                args.push(cookies.as_os_str().to_owned());
            }
        }
        if self.tools.has_custom_ffmpeg() {
            args.push("--ffmpeg-location".into());
            args.push(self.tools.path_of(crate::tools::TOOL_FFMPEG).into_os_string());
        }
        args
    }

    async fn run(&self, args: Vec<std::ffi::OsString>) -> Result<std::process::Output, MediaError> {
        let ytdlp = self.tools.path_of(TOOL_YTDLP);
        let output = Command::new(&ytdlp)
            .args(args)
            .args(self.common_args())
            .output()
            .await
            .map_err(|source| MediaError::Spawn {
                tool: ytdlp.display().to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(command_failed("yt-dlp", &output));
        }
        Ok(output)
    }

    /// Download the best mp4 rendition of `url` to `output`.
    pub async fn download_video(&self, url: &str, output: &Path) -> Result<(), MediaError> {
        info!(url, output = %output.display(), "downloading source video");
        self.run(vec![
            "-f".into(),
            "bestvideo[height<=1080][ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best".into(),
            "-o".into(),
            output.as_os_str().to_owned(),
            url.into(),
        ])
        .await?;
        if !output.exists() {
            return Err(MediaError::MissingOutput(output.to_owned()));
        }
        Ok(())
    }

    /// Title and description in one pass each; failures are soft.
    pub async fn fetch_title_and_description(&self, url: &str) -> (String, String) {
        let title = self
            .run(vec![
                "--skip-download".into(),
                "--encoding".into(),
                "utf-8".into(),
                "--get-title".into(),
                url.into(),
            ])
            .await
            .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_owned())
            .unwrap_or_else(|e| {
                warn!(url, error = %e, "fetching title failed");
                String::new()
            });
        let description = self
            .run(vec![
                "--skip-download".into(),
                "--encoding".into(),
                "utf-8".into(),
                "--get-description".into(),
                url.into(),
            ])
            .await
            .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_owned())
            .unwrap_or_else(|e| {
                warn!(url, error = %e, "fetching description failed");
                String::new()
            });
        (title, description)
    }

    /// Best-effort cover download; returns the written file when one
    /// appears next to `target_without_ext`.
    pub async fn download_thumbnail(
        &self,
        url: &str,
        target_without_ext: &Path,
    ) -> Option<PathBuf> {
        let result = self
            .run(vec![
                "--skip-download".into(),
                "--write-thumbnail".into(),
                "--convert-thumbnails".into(),
                "jpg".into(),
                "-o".into(),
                target_without_ext.as_os_str().to_owned(),
                url.into(),
            ])
            .await;
        if let Err(e) = result {
            warn!(url, error = %e, "thumbnail download failed");
            return None;
        }
        find_with_stem(target_without_ext)
    }

    /// Download only subtitles (manual or auto) plus `--dump-json`
    /// metadata; returns metadata and the first `.vtt` found.
    pub async fn download_subtitles_only(
        &self,
        url: &str,
        temp_dir: &Path,
    ) -> Result<(SourceMetadata, PathBuf), MediaError> {
        let template = temp_dir.join("%(title)s.%(ext)s");
        let output = self
            .run(vec![
                "--skip-download".into(),
                "--write-sub".into(),
                "--write-auto-sub".into(),
                "--sub-lang".into(),
                "en,zh-Hans,zh-Hant,ja".into(),
                "--output".into(),
                template.as_os_str().to_owned(),
                "--dump-json".into(),
                "--ignore-no-formats-error".into(),
                url.into(),
            ])
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let metadata = stdout
            .lines()
            .filter(|l| l.len() > 10)
            .find_map(|l| serde_json::from_str::<SourceMetadata>(l).ok())
            .unwrap_or_default();

        let subtitle = std::fs::read_dir(temp_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .find(|p| p.extension().map(|e| e == "vtt").unwrap_or(false))
            .ok_or_else(|| MediaError::MissingOutput(temp_dir.join("*.vtt")))?;

        Ok((metadata, subtitle))
    }
}

/// First file whose stem matches `target` (yt-dlp appends an extension
/// of its own choosing).
fn find_with_stem(target: &Path) -> Option<PathBuf> {
    let dir = target.parent()?;
    let stem = target.file_name()?.to_string_lossy().into_owned();
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| {
            p.file_stem()
                .map(|s| s.to_string_lossy() == stem)
                .unwrap_or(false)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn youtube_ids() {
        assert_eq!(
            youtube_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(
            youtube_video_id("https://youtu.be/dQw4w9WgXcQ?t=10").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(
            youtube_video_id("https://www.youtube.com/shorts/abcDEF12345").as_deref(),
            Some("abcDEF12345")
        );
        assert_eq!(youtube_video_id("https://youtube.com/watch"), None);
        assert_eq!(youtube_video_id("https://youtube.com/watch?v=short"), None);
    }

    #[test]
    fn bilibili_ids() {
        assert_eq!(
            bilibili_video_id("https://www.bilibili.com/video/BV1GJ411x7h7").as_deref(),
            Some("BV1GJ411x7h7")
        );
        assert_eq!(bilibili_video_id("https://www.bilibili.com/video/"), None);
    }
}
