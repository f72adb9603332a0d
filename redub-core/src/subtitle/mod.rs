//! SRT parsing and serialisation.
//!
//! Two views of a subtitle file exist side by side:
//!
//! - [`SrtBlock`] preserves the full structure (index, times, every
//!   text line) and round-trips losslessly through [`parse`] /
//!   [`format`].
//! - [`DubEntry`] is the flattened per-entry view the dubbing engine
//!   consumes: start/end in seconds plus a single collapsed text line.

pub mod ass;

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubtitleError {
    #[error("invalid subtitle index line: {0:?}")]
    InvalidIndex(String),
    #[error("missing timestamp line after index {0}")]
    MissingTimestamps(u32),
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
    #[error("failed to read subtitle file {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One SRT block: index, time range and the raw text lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrtBlock {
    pub index: u32,
    pub start_ms: u64,
    pub end_ms: u64,
    pub lines: Vec<String>,
}

/// Parse SRT text into blocks, preserving order and line structure.
pub fn parse(input: &str) -> Result<Vec<SrtBlock>, SubtitleError> {
    let mut blocks = Vec::new();
    let mut lines = input.lines();
    loop {
        let index_line = loop {
            match lines.next() {
                Some(l) if l.trim().is_empty() => continue,
                Some(l) => break l.trim().trim_start_matches('\u{feff}'),
                None => return Ok(blocks),
            }
        };
        let index: u32 = index_line
            .parse()
            .map_err(|_| SubtitleError::InvalidIndex(index_line.to_owned()))?;
        let time_line = lines
            .next()
            .ok_or(SubtitleError::MissingTimestamps(index))?;
        let (start_ms, end_ms) = parse_time_range(time_line)?;
        let mut text = Vec::new();
        for line in lines.by_ref() {
            if line.trim().is_empty() {
                break;
            }
            text.push(line.to_owned());
        }
        blocks.push(SrtBlock {
            index,
            start_ms,
            end_ms,
            lines: text,
        });
    }
}

/// Serialise blocks back to SRT: 1-based numbering is taken from the
/// block itself, UTF-8, no BOM, blank-line separated.
pub fn format(blocks: &[SrtBlock]) -> String {
    let mut out = String::new();
    for block in blocks {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            block.index,
            format_time(block.start_ms),
            format_time(block.end_ms),
            block.lines.join("\n"),
        ));
    }
    out
}

fn parse_time_range(line: &str) -> Result<(u64, u64), SubtitleError> {
    let mut parts = line.split(" --> ");
    let start = parts
        .next()
        .ok_or_else(|| SubtitleError::InvalidTimestamp(line.to_owned()))?;
    let end = parts
        .next()
        .ok_or_else(|| SubtitleError::InvalidTimestamp(line.to_owned()))?;
    Ok((parse_time(start.trim())?, parse_time(end.trim())?))
}

/// Parse `HH:MM:SS,mmm` into milliseconds.
pub fn parse_time(t: &str) -> Result<u64, SubtitleError> {
    let parts: Vec<&str> = t.split([':', ',']).collect();
    if parts.len() != 4 {
        return Err(SubtitleError::InvalidTimestamp(t.to_owned()));
    }
    let field = |s: &str| {
        s.parse::<u64>()
            .map_err(|_| SubtitleError::InvalidTimestamp(t.to_owned()))
    };
    let (h, m, s, ms) = (
        field(parts[0])?,
        field(parts[1])?,
        field(parts[2])?,
        field(parts[3])?,
    );
    Ok(((h * 60 + m) * 60 + s) * 1000 + ms)
}

/// Format milliseconds as `HH:MM:SS,mmm`.
pub fn format_time(ms: u64) -> String {
    let h = ms / 3_600_000;
    let m = (ms % 3_600_000) / 60_000;
    let s = (ms % 60_000) / 1000;
    let ms = ms % 1000;
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}

/// Flattened entry consumed by the dubbing engine.
#[derive(Debug, Clone, PartialEq)]
pub struct DubEntry {
    pub start_secs: f64,
    pub end_secs: f64,
    pub text: String,
}

fn dub_entry_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{2}:\d{2}:\d{2},\d{3}) --> (\d{2}:\d{2}:\d{2},\d{3})\s+(.+?)\n").unwrap()
    })
}

/// Extract dubbing entries from SRT text. Text is collapsed to one line.
pub fn parse_dub_entries(input: &str) -> Result<Vec<DubEntry>, SubtitleError> {
    let mut entries = Vec::new();
    for caps in dub_entry_regex().captures_iter(input) {
        let start_ms = parse_time(&caps[1])?;
        let end_ms = parse_time(&caps[2])?;
        entries.push(DubEntry {
            start_secs: start_ms as f64 / 1000.0,
            end_secs: end_ms as f64 / 1000.0,
            text: caps[3].replace('\n', " ").trim().to_owned(),
        });
    }
    Ok(entries)
}

/// Read and flatten an SRT file from disk for dubbing.
pub fn load_dub_entries(path: &Path) -> Result<Vec<DubEntry>, SubtitleError> {
    let data = std::fs::read_to_string(path).map_err(|source| SubtitleError::Io {
        path: path.to_owned(),
        source,
    })?;
    parse_dub_entries(&data)
}
