//! Stage parameter types: the transient state that travels with one
//! pipeline execution. It borrows the task record for the run and is
//! dropped when the run ends.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::task::Task;

/// Where the translated line sits in bilingual output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BilingualPosition {
    Top,
    Bottom,
}

/// Which subtitle files the transcribe stage must produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleResultType {
    OriginOnly,
    TargetOnly,
    Bilingual(BilingualPosition),
}

impl SubtitleResultType {
    /// Derive the result type from the submission options.
    pub fn from_request(
        origin_language: &str,
        target_language: &str,
        bilingual: bool,
        position: BilingualPosition,
    ) -> Self {
        if target_language == "none" || target_language == origin_language {
            SubtitleResultType::OriginOnly
        } else if bilingual {
            SubtitleResultType::Bilingual(position)
        } else {
            SubtitleResultType::TargetOnly
        }
    }

    pub fn is_translated(&self) -> bool {
        !matches!(self, SubtitleResultType::OriginOnly)
    }
}

/// Requested subtitle-burned renderings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbedType {
    Horizontal,
    Vertical,
    All,
    #[default]
    None,
}

impl EmbedType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "horizontal" => EmbedType::Horizontal,
            "vertical" => EmbedType::Vertical,
            "all" => EmbedType::All,
            _ => EmbedType::None,
        }
    }

    pub fn wants_horizontal(&self) -> bool {
        matches!(self, EmbedType::Horizontal | EmbedType::All)
    }

    pub fn wants_vertical(&self) -> bool {
        matches!(self, EmbedType::Vertical | EmbedType::All)
    }
}

/// TTS scheduling inside the dubbing engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DubMode {
    #[default]
    Sequential,
    Concurrent,
}

/// A pipeline submission as accepted from the HTTP layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub url: String,
    #[serde(default)]
    pub audio_url: String,
    pub origin_language: String,
    #[serde(default)]
    pub target_language: String,
    #[serde(default)]
    pub bilingual: bool,
    #[serde(default)]
    pub translation_on_top: bool,
    #[serde(default)]
    pub enable_tts: bool,
    #[serde(default)]
    pub tts_voice_code: String,
    #[serde(default)]
    pub voice_clone_reference: String,
    #[serde(default)]
    pub embed_type: String,
    #[serde(default)]
    pub vertical_major_title: String,
    #[serde(default)]
    pub vertical_minor_title: String,
    #[serde(default)]
    pub max_word_one_line: usize,
    #[serde(default)]
    pub replace: Vec<String>,
    #[serde(default)]
    pub reuse_task_id: String,
}

/// Everything one pipeline run needs, including the owned task record
/// snapshot. The owning worker is the sole writer of the record, so the
/// snapshot is persisted wholesale at every transition.
#[derive(Debug)]
pub struct StageParam {
    pub task: Task,
    pub task_dir: PathBuf,
    pub output_dir: PathBuf,

    pub link: String,
    pub audio_url: Option<String>,
    pub origin_language: String,
    pub target_language: String,
    pub result_type: SubtitleResultType,
    pub enable_tts: bool,
    pub tts_voice_code: String,
    pub replace_words: HashMap<String, String>,
    pub embed_type: EmbedType,
    pub vertical_major_title: String,
    pub vertical_minor_title: String,
    pub max_word_one_line: usize,
    pub dub_mode: DubMode,

    // Filled in by the stages as the run advances.
    pub input_video: Option<PathBuf>,
    pub video_width: u32,
    pub video_height: u32,
    pub video_duration_secs: f64,
    pub normalized_audio: Option<PathBuf>,
    pub origin_srt: Option<PathBuf>,
    pub target_srt: Option<PathBuf>,
    pub bilingual_srt: Option<PathBuf>,
    pub tts_result: Option<PathBuf>,
    pub video_with_tts: Option<PathBuf>,
}

impl StageParam {
    /// The SRT the dubbing engine reads: translated when available,
    /// origin otherwise.
    pub fn tts_source_srt(&self) -> Option<&PathBuf> {
        self.target_srt.as_ref().or(self.origin_srt.as_ref())
    }

    /// The SRT burned into the video: bilingual > target > origin.
    pub fn burn_source_srt(&self) -> Option<&PathBuf> {
        self.bilingual_srt
            .as_ref()
            .or(self.target_srt.as_ref())
            .or(self.origin_srt.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_type_derivation() {
        assert_eq!(
            SubtitleResultType::from_request("en", "none", true, BilingualPosition::Top),
            SubtitleResultType::OriginOnly
        );
        assert_eq!(
            SubtitleResultType::from_request("en", "en", false, BilingualPosition::Top),
            SubtitleResultType::OriginOnly
        );
        assert_eq!(
            SubtitleResultType::from_request("en", "zh-CN", false, BilingualPosition::Top),
            SubtitleResultType::TargetOnly
        );
        assert_eq!(
            SubtitleResultType::from_request("en", "zh-CN", true, BilingualPosition::Bottom),
            SubtitleResultType::Bilingual(BilingualPosition::Bottom)
        );
    }

    #[test]
    fn embed_type_parsing() {
        assert_eq!(EmbedType::parse("horizontal"), EmbedType::Horizontal);
        assert_eq!(EmbedType::parse("vertical"), EmbedType::Vertical);
        assert_eq!(EmbedType::parse("all"), EmbedType::All);
        assert_eq!(EmbedType::parse("none"), EmbedType::None);
        assert_eq!(EmbedType::parse(""), EmbedType::None);
        assert!(EmbedType::All.wants_horizontal() && EmbedType::All.wants_vertical());
    }
}
