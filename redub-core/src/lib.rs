//! redub-core – the pipeline engine behind the redub server.
//!
//! The crate is organised around a handful of seams:
//!
//! - [`appdirs`] resolves the on-disk layout (config / logs / output /
//!   cache) including portable mode.
//! - [`task`] holds the durable task model and its SQLite store.
//! - [`runner`] is the bounded in-process scheduler that owns task
//!   execution.
//! - [`pipeline`] sequences the stages of one task: acquire →
//!   transcribe → dub → burn → publish.
//! - [`capability`] defines the provider contracts (speech-to-text,
//!   chat completion, speech synthesis) consumed by the stages.
//! - [`media`] wraps the external tools (ffmpeg, ffprobe, yt-dlp) that
//!   do the heavy lifting.
//! - [`clipper`] implements the smart-clipper analyze/submit flow.

pub mod appdirs;
pub mod capability;
pub mod clipper;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod runner;
pub mod subtitle;
pub mod task;
pub mod tools;
pub mod util;

pub use error::AppError;
pub use pipeline::{PipelineContext, StageParam, SubmitRequest};
pub use runner::{Runner, RunnerConfig, RunnerError};
pub use task::{Artifact, Task, TaskStatus};
