//! Shared application state injected into every handler.

use std::sync::Arc;

use redub_core::clipper::SmartClipper;
use redub_core::pipeline::PipelineContext;
use redub_core::runner::Runner;

use crate::config::Config;
use crate::files::DownloadRoots;

pub struct AppState {
    pub config: Config,
    pub ctx: Arc<PipelineContext>,
    pub runner: Arc<Runner>,
    pub clipper: Arc<SmartClipper>,
    pub download_roots: DownloadRoots,
}
