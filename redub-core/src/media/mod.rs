//! Wrappers around the external media tools (ffmpeg, ffprobe, yt-dlp,
//! audio-separator). Every invocation goes through the resolved path in
//! the [`crate::tools::ToolRegistry`].

pub mod downloader;
pub mod separation;
pub mod toolkit;
pub mod video;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    CommandFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("failed to parse {tool} output: {message}")]
    Parse { tool: String, message: String },

    #[error("expected output file missing: {0}")]
    MissingOutput(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub(crate) fn command_failed(tool: &str, output: &std::process::Output) -> MediaError {
    MediaError::CommandFailed {
        tool: tool.to_owned(),
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr)
            .trim()
            .chars()
            .take(2048)
            .collect(),
    }
}
