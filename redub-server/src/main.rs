//! redub-server – entry point.
//!
//! Startup order:
//! 1. Parse CLI flags (`--version` / `--diagnose` exit early).
//! 2. Resolve application directories and create them.
//! 3. Initialise structured tracing.
//! 4. Open the SQLite task store and run pending migrations.
//! 5. Reap zombie tasks left `running` by a previous incarnation.
//! 6. Resolve the external tool inventory into the tool registry.
//! 7. Build the capability providers from configuration.
//! 8. Start the bounded task runner.
//! 9. Serve the Axum router; close the runner on shutdown.

mod config;
mod files;
mod response;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use redub_core::capability::composite::CompositeSynthesizer;
use redub_core::capability::edge_tts::EdgeTtsClient;
use redub_core::capability::openai::OpenAiClient;
use redub_core::capability::{SpeechSynthesizer, VoiceCloneTrainer};
use redub_core::clipper::{ClipperConfig, SmartClipper};
use redub_core::media::downloader::Downloader;
use redub_core::media::toolkit::FfmpegToolkit;
use redub_core::pipeline::PipelineContext;
use redub_core::runner::{Runner, RunnerConfig};
use redub_core::task::store::TaskStore;
use redub_core::appdirs;
use redub_core::tools::ToolRegistry;
use redub_deps::resolver::{self, DependencyStatus};

use crate::config::Config;
use crate::files::DownloadRoots;
use crate::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "redub", version, about = "Media transcription, translation and dubbing server")]
struct Cli {
    /// Print resolved paths, directory writability and tool status,
    /// then exit.
    #[arg(long)]
    diagnose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = Config::from_env();

    // ── Paths ────────────────────────────────────────────────────────────────
    let paths = appdirs::resolve()?;

    if cli.diagnose {
        print_diagnosis(&cfg, &paths);
        return Ok(());
    }

    paths.ensure_created()?;

    // ── Tracing ──────────────────────────────────────────────────────────────
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cfg.log_level.parse().unwrap_or_default()),
        )
        .with_target(true);
    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
    info!(version = env!("CARGO_PKG_VERSION"), portable = paths.portable, "redub starting");

    // ── Task store ───────────────────────────────────────────────────────────
    let db_url = format!("sqlite://{}?mode=rwc", paths.db_path().display());
    let store = TaskStore::connect(&db_url).await?;
    info!(db = %paths.db_path().display(), "task store ready");

    let reaped = store.reap_stale().await?;
    if reaped > 0 {
        warn!(count = reaped, "reaped zombie tasks from previous run");
    }

    // ── Tool registry ────────────────────────────────────────────────────────
    let tools = Arc::new(ToolRegistry::new());
    let states = resolver::resolve_all(
        &resolver::build_inventory(
            "openai",
            &cfg.tts_provider,
            Config::configured_tool_path,
        ),
        &resolver::ResolverHooks::default(),
    );
    for state in &states {
        match state.status {
            DependencyStatus::Ok => {
                tools.register(&state.spec.id, state.resolved_path.clone());
                info!(tool = %state.spec.id, path = %state.resolved_path, "tool resolved");
            }
            _ => warn!(
                tool = %state.spec.id,
                tier = state.spec.tier.as_str(),
                status = state.status.as_str(),
                "tool unavailable"
            ),
        }
    }
    // Managed installs win over PATH lookups when present.
    for (tool_id, executable) in [
        ("ffmpeg", "ffmpeg.exe"),
        ("ffprobe", "ffprobe.exe"),
        ("yt-dlp", "yt-dlp.exe"),
    ] {
        let managed = paths.cache_dir.join("bin").join(tool_id).join(executable);
        if managed.exists() {
            tools.register(tool_id, managed);
        }
    }

    // ── Capability providers ─────────────────────────────────────────────────
    let transcriber = Arc::new(OpenAiClient::new(
        &cfg.stt_base_url,
        &cfg.stt_api_key,
        &cfg.stt_model,
        cfg.proxy.as_deref(),
    ));
    let chat = Arc::new(OpenAiClient::new(
        &cfg.llm_base_url,
        &cfg.llm_api_key,
        &cfg.llm_model,
        cfg.proxy.as_deref(),
    ));

    let edge_tts: Arc<dyn SpeechSynthesizer> = Arc::new(EdgeTtsClient::new(Arc::clone(&tools)));
    let openai_tts = Arc::new(OpenAiClient::new(
        &cfg.tts_base_url,
        &cfg.tts_api_key,
        &cfg.tts_model,
        cfg.proxy.as_deref(),
    ));
    let default_tts: Arc<dyn SpeechSynthesizer> = match cfg.tts_provider.as_str() {
        "openai" => openai_tts.clone(),
        _ => Arc::clone(&edge_tts),
    };
    let tts = Arc::new(
        CompositeSynthesizer::new(default_tts).route(
            "edge-tts",
            CompositeSynthesizer::is_edge_voice,
            edge_tts,
        ),
    );
    let voice_cloner: Option<Arc<dyn VoiceCloneTrainer>> = match cfg.tts_provider.as_str() {
        "openai" => Some(openai_tts),
        _ => None,
    };

    // ── Pipeline context & runner ────────────────────────────────────────────
    let downloader = Downloader::new(
        Arc::clone(&tools),
        cfg.proxy.clone(),
        cfg.cookies_file.as_ref().map(Into::into),
    );
    let ctx = Arc::new(PipelineContext {
        paths: paths.clone(),
        store,
        tools: Arc::clone(&tools),
        audio: Arc::new(FfmpegToolkit::new(Arc::clone(&tools))),
        transcriber,
        chat,
        tts,
        voice_cloner,
        downloader,
        dub_mode: cfg.dub_mode,
    });

    let runner = Runner::start(
        Arc::clone(&ctx),
        RunnerConfig {
            queue_size: cfg.queue_capacity,
            workers: cfg.workers,
        },
    );
    info!(
        queue = cfg.queue_capacity,
        workers = cfg.workers,
        "task runner started"
    );

    let clipper = Arc::new(SmartClipper::new(ClipperConfig {
        min_clip_secs: cfg.clip_min_secs,
        max_clip_secs: cfg.clip_max_secs,
    }));

    // ── HTTP server ──────────────────────────────────────────────────────────
    let download_roots = DownloadRoots::from_paths(&paths);
    let state = Arc::new(AppState {
        config: cfg.clone(),
        ctx,
        runner: Arc::clone(&runner),
        clipper,
        download_roots,
    });

    let app = routes::build(Arc::clone(&state));
    let addr: SocketAddr = cfg.bind_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down, draining task runner");
    runner.close().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn print_diagnosis(cfg: &Config, paths: &appdirs::AppPaths) {
    println!("redub {}", env!("CARGO_PKG_VERSION"));
    println!("portable: {}", paths.portable);
    println!();
    println!("Paths");
    for (name, path) in [
        ("config_dir", &paths.config_dir),
        ("config_file", &paths.config_file),
        ("log_dir", &paths.log_dir),
        ("output_dir", &paths.output_dir),
        ("cache_dir", &paths.cache_dir),
    ] {
        println!("- {name}: {} | writable={}", path.display(), is_writable(path));
    }
    println!();

    let states = resolver::resolve_all(
        &resolver::build_inventory("openai", &cfg.tts_provider, Config::configured_tool_path),
        &resolver::ResolverHooks::default(),
    );
    println!("{}", resolver::format_report(&states));
}

/// A directory is writable when a probe file can be created inside it.
fn is_writable(path: &std::path::Path) -> bool {
    let dir = if path.extension().is_some() {
        path.parent().map(|p| p.to_owned()).unwrap_or_default()
    } else {
        path.to_owned()
    };
    if std::fs::create_dir_all(&dir).is_err() {
        return false;
    }
    let probe = dir.join(".redub_write_probe");
    match std::fs::write(&probe, b"probe") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}
