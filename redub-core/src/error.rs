//! Application error type with stable numeric codes.
//!
//! Clients dispatch on the numeric `code` carried in the response
//! envelope, so the ranges here are part of the public API and must not
//! be renumbered.

use std::fmt;

/// Stable error code ranges, grouped by domain.
pub mod code {
    pub const SUCCESS: i32 = 0;

    // General (1000–1099)
    pub const UNKNOWN: i32 = 1000;
    pub const INVALID_PARAMS: i32 = 1001;
    pub const NOT_FOUND: i32 = 1002;
    pub const UNAUTHORIZED: i32 = 1003;

    // Video / audio acquisition (1100–1199)
    pub const VIDEO_DOWNLOAD: i32 = 1100;
    pub const AUDIO_EXTRACT: i32 = 1101;
    pub const VIDEO_NOT_FOUND: i32 = 1102;
    pub const UNSUPPORTED_URL: i32 = 1103;
    pub const COOKIES_EXPIRED: i32 = 1104;
    pub const RATE_LIMITED: i32 = 1105;

    // Transcription (1200–1299)
    pub const TRANSCRIBE_FAILED: i32 = 1200;
    pub const TRANSCRIBE_TIMEOUT: i32 = 1201;
    pub const MODEL_NOT_FOUND: i32 = 1202;

    // Translation (1300–1399)
    pub const TRANSLATE_FAILED: i32 = 1300;
    pub const TRANSLATE_TIMEOUT: i32 = 1301;
    pub const LLM_QUOTA_EXCEEDED: i32 = 1302;

    // Speech synthesis (1400–1499)
    pub const TTS_FAILED: i32 = 1400;
    pub const TTS_QUOTA_EXCEEDED: i32 = 1401;
    pub const VOICE_NOT_FOUND: i32 = 1402;
    pub const AUDIO_MIX_FAILED: i32 = 1403;

    // Storage (1500–1599)
    pub const DB_ERROR: i32 = 1500;
    pub const FILE_NOT_FOUND: i32 = 1501;
    pub const FILE_WRITE: i32 = 1502;

    // Smart clipper (1600–1699)
    pub const CLIP_ANALYSIS_FAILED: i32 = 1600;
    pub const CLIP_SPLIT_FAILED: i32 = 1601;
    pub const SUBTITLE_NOT_FOUND: i32 = 1602;
}

/// A structured application error carrying a stable numeric code, a
/// client-facing message and optional diagnostic detail.
#[derive(Debug)]
pub struct AppError {
    code: i32,
    message: String,
    detail: Option<String>,
    source: Option<anyhow::Error>,
}

impl AppError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
            source: None,
        }
    }

    /// Wrap an underlying error, keeping it available via
    /// [`std::error::Error::source`].
    pub fn wrap(code: i32, message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
            source: Some(source.into()),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "[{}] {}: {}", self.code, self.message, source),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.source {
            Some(source) => Some(source.as_ref()),
            None => None,
        }
    }
}

/// Extract the numeric code from any error, falling back to
/// [`code::UNKNOWN`] for foreign error types.
pub fn code_of(err: &(dyn std::error::Error + 'static)) -> i32 {
    if let Some(app) = err.downcast_ref::<AppError>() {
        return app.code();
    }
    code::UNKNOWN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_and_source() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let err = AppError::wrap(code::FILE_WRITE, "写入失败 Write failed", inner);
        let text = err.to_string();
        assert!(text.starts_with("[1502]"));
        assert!(text.contains("disk on fire"));
    }

    #[test]
    fn code_of_falls_back_to_unknown() {
        let plain = std::io::Error::new(std::io::ErrorKind::Other, "nope");
        assert_eq!(code_of(&plain), code::UNKNOWN);

        let app = AppError::new(code::UNSUPPORTED_URL, "bad link");
        assert_eq!(code_of(&app), code::UNSUPPORTED_URL);
    }
}
