//! Server configuration, loaded from environment variables at startup.
//!
//! Every field has a default so the server starts with no environment
//! at all; provider credentials are the only thing it cannot invent.

use redub_core::pipeline::DubMode;

#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default `"0.0.0.0:8888"`).
    pub bind_address: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,sqlx=warn"`.
    pub log_level: String,

    /// Emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Optional comma-separated CORS origin allowlist; unset means `*`.
    pub cors_allowed_origins: Option<String>,

    /// Task queue capacity and worker count.
    pub queue_capacity: usize,
    pub workers: usize,

    /// Proxy for yt-dlp and provider HTTP calls.
    pub proxy: Option<String>,

    /// Optional cookies file handed to yt-dlp.
    pub cookies_file: Option<String>,

    /// TTS scheduling inside the dubbing engine.
    pub dub_mode: DubMode,

    /// Smart clipper length preferences, in seconds.
    pub clip_min_secs: u32,
    pub clip_max_secs: u32,

    // Provider endpoints. All speak the OpenAI wire shape.
    pub stt_base_url: String,
    pub stt_api_key: String,
    pub stt_model: String,

    pub llm_base_url: String,
    pub llm_api_key: String,
    pub llm_model: String,

    /// `"openai"` or `"edge-tts"`.
    pub tts_provider: String,
    pub tts_base_url: String,
    pub tts_api_key: String,
    pub tts_model: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("REDUB_BIND", "0.0.0.0:8888"),
            log_level: env_or("REDUB_LOG", "info"),
            log_json: env_truthy("REDUB_LOG_JSON"),
            cors_allowed_origins: std::env::var("REDUB_CORS_ORIGINS").ok(),
            queue_capacity: parse_env("REDUB_QUEUE_CAPACITY", 128),
            workers: parse_env("REDUB_WORKERS", 2),
            proxy: std::env::var("REDUB_PROXY").ok().filter(|p| !p.is_empty()),
            cookies_file: std::env::var("REDUB_COOKIES_FILE")
                .ok()
                .filter(|p| !p.is_empty()),
            dub_mode: if parse_env("REDUB_DUB_CONCURRENCY", 1usize) > 1 {
                DubMode::Concurrent
            } else {
                DubMode::Sequential
            },
            clip_min_secs: parse_env("REDUB_CLIP_MIN_SECS", 30),
            clip_max_secs: parse_env("REDUB_CLIP_MAX_SECS", 180),
            stt_base_url: env_or("REDUB_STT_BASE_URL", "https://api.openai.com/v1"),
            stt_api_key: env_or("REDUB_STT_API_KEY", ""),
            stt_model: env_or("REDUB_STT_MODEL", "whisper-1"),
            llm_base_url: env_or("REDUB_LLM_BASE_URL", "https://api.openai.com/v1"),
            llm_api_key: env_or("REDUB_LLM_API_KEY", ""),
            llm_model: env_or("REDUB_LLM_MODEL", "gpt-4o-mini"),
            tts_provider: env_or("REDUB_TTS_PROVIDER", "edge-tts"),
            tts_base_url: env_or("REDUB_TTS_BASE_URL", "https://api.openai.com/v1"),
            tts_api_key: env_or("REDUB_TTS_API_KEY", ""),
            tts_model: env_or("REDUB_TTS_MODEL", "tts-1"),
        }
    }

    /// Explicitly configured path for an external tool, from
    /// `REDUB_TOOL_<ID>` (dashes become underscores).
    pub fn configured_tool_path(tool_id: &str) -> String {
        let key = format!(
            "REDUB_TOOL_{}",
            tool_id.to_uppercase().replace('-', "_")
        );
        std::env::var(key).unwrap_or_default()
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_truthy(key: &str) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
