//! Process-wide registry of resolved external tool paths.
//!
//! Writes happen at startup (dependency resolution) and, rarely, when
//! the auto-installer registers a freshly installed binary. Stages only
//! read. A `std::sync::RwLock` keeps the re-configuration path safe
//! without making readers async.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

pub const TOOL_FFMPEG: &str = "ffmpeg";
pub const TOOL_FFPROBE: &str = "ffprobe";
pub const TOOL_YTDLP: &str = "yt-dlp";
pub const TOOL_EDGE_TTS: &str = "edge-tts";
pub const TOOL_AUDIO_SEPARATOR: &str = "audio-separator";

#[derive(Debug, Default)]
pub struct ToolRegistry {
    paths: RwLock<HashMap<String, PathBuf>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool_id: &str, path: impl Into<PathBuf>) {
        self.paths
            .write()
            .expect("tool registry lock poisoned")
            .insert(tool_id.to_owned(), path.into());
    }

    /// Resolved path for `tool_id`; falls back to the bare command name
    /// so PATH lookup still applies when nothing was registered.
    pub fn path_of(&self, tool_id: &str) -> PathBuf {
        self.paths
            .read()
            .expect("tool registry lock poisoned")
            .get(tool_id)
            .cloned()
            .unwrap_or_else(|| PathBuf::from(tool_id))
    }

    pub fn get(&self, tool_id: &str) -> Option<PathBuf> {
        self.paths
            .read()
            .expect("tool registry lock poisoned")
            .get(tool_id)
            .cloned()
    }

    pub fn is_registered(&self, tool_id: &str) -> bool {
        self.get(tool_id).is_some()
    }

    /// True when the registered ffmpeg is not just the bare command
    /// (used to pass `--ffmpeg-location` to the downloader).
    pub fn has_custom_ffmpeg(&self) -> bool {
        self.get(TOOL_FFMPEG)
            .map(|p| p != Path::new(TOOL_FFMPEG))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_tool_falls_back_to_command_name() {
        let registry = ToolRegistry::new();
        assert_eq!(registry.path_of(TOOL_FFMPEG), PathBuf::from("ffmpeg"));
        assert!(!registry.has_custom_ffmpeg());
    }

    #[test]
    fn register_overrides_lookup() {
        let registry = ToolRegistry::new();
        registry.register(TOOL_FFMPEG, "/opt/bin/ffmpeg");
        assert_eq!(registry.path_of(TOOL_FFMPEG), PathBuf::from("/opt/bin/ffmpeg"));
        assert!(registry.has_custom_ffmpeg());
    }
}
