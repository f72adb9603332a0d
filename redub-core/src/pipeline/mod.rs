//! Pipeline controller: stage sequencing, progress updates, status
//! persistence and resumability.
//!
//! ```text
//! queued → running(acquire) → running(transcribe) → running(dub)
//!        → running(burn) → running(publish) → succeeded
//!                                           ↘ failed
//! ```
//!
//! Every transition persists the task so a polling client always sees
//! the latest status message, and a process crash leaves a record the
//! startup reaper can classify.

pub mod acquire;
pub mod burn;
pub mod dub;
pub mod param;
pub mod publish;
pub mod transcribe;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

pub use param::{
    BilingualPosition, DubMode, EmbedType, StageParam, SubmitRequest, SubtitleResultType,
};

use crate::appdirs::AppPaths;
use crate::capability::{ChatCompleter, SpeechSynthesizer, Transcriber, VoiceCloneTrainer};
use crate::error::{code, AppError};
use crate::media::downloader::{bilibili_video_id, youtube_video_id, Downloader};
use crate::media::toolkit::AudioToolkit;
use crate::media::video::VideoTools;
use crate::task::store::TaskStore;
use crate::task::{Task, TaskStatus};
use crate::tools::ToolRegistry;
use crate::util;

/// Shared collaborators for every pipeline run. Stages never reach for
/// globals; everything arrives through this context.
pub struct PipelineContext {
    pub paths: AppPaths,
    pub store: TaskStore,
    pub tools: Arc<ToolRegistry>,
    pub audio: Arc<dyn AudioToolkit>,
    pub transcriber: Arc<dyn Transcriber>,
    pub chat: Arc<dyn ChatCompleter>,
    pub tts: Arc<dyn SpeechSynthesizer>,
    pub voice_cloner: Option<Arc<dyn VoiceCloneTrainer>>,
    pub downloader: Downloader,
    pub dub_mode: DubMode,
}

impl PipelineContext {
    pub fn video_tools(&self) -> VideoTools {
        VideoTools::new(Arc::clone(&self.tools))
    }
}

/// Outcome of a validated submission: the persisted task id plus the
/// stage parameter the runner will execute.
#[derive(Debug)]
pub struct SubmittedTask {
    pub task_id: String,
    pub param: StageParam,
}

/// Validate a submission, create or rejoin the task record, and build
/// the stage parameter. The caller hands the result to the runner.
pub async fn submit(ctx: &PipelineContext, req: SubmitRequest) -> Result<SubmittedTask, AppError> {
    if req.url.trim().is_empty() {
        return Err(AppError::new(
            code::INVALID_PARAMS,
            "缺少视频链接 Missing video URL",
        ));
    }
    if req.url.contains("youtube.com") && youtube_video_id(&req.url).is_none() {
        return Err(AppError::new(
            code::UNSUPPORTED_URL,
            "YouTube链接不合法 Invalid YouTube URL",
        ));
    }
    if req.url.contains("bilibili.com") && bilibili_video_id(&req.url).is_none() {
        return Err(AppError::new(
            code::UNSUPPORTED_URL,
            "Bilibili链接不合法 Invalid Bilibili URL",
        ));
    }

    let task_id = if req.reuse_task_id.is_empty() {
        util::task_id_from_url(&req.url)
    } else {
        req.reuse_task_id.clone()
    };

    let task_dir = ctx.paths.task_dir(&task_id);
    let output_dir = task_dir.join("output");
    std::fs::create_dir_all(&output_dir).map_err(|e| {
        AppError::wrap(code::FILE_WRITE, "创建任务目录失败 Failed to create task dir", e)
    })?;

    // Rejoin the existing record on retry so the working directory and
    // persisted metadata survive.
    let mut task = match ctx.store.get(&task_id).await {
        Ok(Some(existing)) if !req.reuse_task_id.is_empty() => existing,
        Ok(_) => Task::new(&task_id, &req.url),
        Err(e) => {
            return Err(AppError::wrap(code::DB_ERROR, "查询任务失败 Failed to load task", e))
        }
    };

    task.status = TaskStatus::Queued;
    task.status_message = "排队中 Queued".into();
    task.fail_reason.clear();
    task.process_pct = 0;
    task.source_url = req.url.clone();
    task.origin_language = req.origin_language.clone();
    task.target_language = req.target_language.clone();
    if !req.tts_voice_code.is_empty() {
        task.tts_voice_code = req.tts_voice_code.clone();
    }

    // Voice cloning trains synchronously: a submission with a broken
    // reference recording is rejected before it ever queues.
    if !req.voice_clone_reference.is_empty() {
        let reference = req
            .voice_clone_reference
            .strip_prefix("local:")
            .unwrap_or(&req.voice_clone_reference);
        if task.tts_voice_code.is_empty() {
            return Err(AppError::new(
                code::VOICE_NOT_FOUND,
                "语音克隆需要 voice_code Voice cloning requires a speaker id",
            ));
        }
        let trainer = ctx.voice_cloner.as_ref().ok_or_else(|| {
            AppError::new(
                code::TTS_FAILED,
                "当前TTS提供方不支持语音克隆 Voice cloning not supported by provider",
            )
        })?;
        trainer
            .train(std::path::Path::new(reference), &task.tts_voice_code)
            .await
            .map_err(|e| {
                AppError::wrap(code::TTS_FAILED, "语音克隆训练失败 Voice clone training failed", e)
            })?;
    }

    ctx.store
        .save(&task)
        .await
        .map_err(|e| AppError::wrap(code::DB_ERROR, "保存任务失败 Failed to save task", e))?;

    let result_type = SubtitleResultType::from_request(
        &req.origin_language,
        &req.target_language,
        req.bilingual,
        if req.translation_on_top {
            BilingualPosition::Top
        } else {
            BilingualPosition::Bottom
        },
    );

    let param = StageParam {
        task,
        task_dir,
        output_dir,
        link: req.url,
        audio_url: (!req.audio_url.is_empty()).then_some(req.audio_url),
        origin_language: req.origin_language,
        target_language: req.target_language,
        result_type,
        enable_tts: req.enable_tts,
        tts_voice_code: req.tts_voice_code,
        replace_words: util::parse_replace_pairs(&req.replace),
        embed_type: EmbedType::parse(&req.embed_type),
        vertical_major_title: req.vertical_major_title,
        vertical_minor_title: req.vertical_minor_title,
        max_word_one_line: if req.max_word_one_line == 0 {
            12
        } else {
            req.max_word_one_line
        },
        dub_mode: ctx.dub_mode,
        input_video: None,
        video_width: 0,
        video_height: 0,
        video_duration_secs: 0.0,
        normalized_audio: None,
        origin_srt: None,
        target_srt: None,
        bilingual_srt: None,
        tts_result: None,
        video_with_tts: None,
    };

    Ok(SubmittedTask { task_id, param })
}

/// Persist the task record; store errors abort nothing mid-run, they
/// are logged and the run continues with its in-memory state.
async fn persist(ctx: &PipelineContext, task: &Task) {
    if let Err(e) = ctx.store.save(task).await {
        error!(task_id = %task.task_id, error = %e, "persisting task state failed");
    }
}

async fn fail_task(ctx: &PipelineContext, task: &mut Task, err: &AppError, stage_message: &str) {
    task.status = TaskStatus::Failed;
    task.fail_reason = err.to_string();
    task.status_message = stage_message.to_owned();
    persist(ctx, task).await;
}

fn cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

async fn stop_cancelled(ctx: &PipelineContext, param: &mut StageParam) {
    param.task.status = TaskStatus::Failed;
    param.task.fail_reason = "cancelled".into();
    param.task.status_message = "已取消 Cancelled".into();
    persist(ctx, &param.task).await;
    info!(task_id = %param.task.task_id, "pipeline cancelled at stage boundary");
}

/// Execute the ordered stages for one task. All failure handling is
/// internal: the record always ends `succeeded` or `failed`.
pub async fn run(ctx: &PipelineContext, mut param: StageParam, cancel: watch::Receiver<bool>) {
    let task_id = param.task.task_id.clone();
    info!(task_id, "pipeline start");

    param.task.status = TaskStatus::Running;
    param.task.status_message = "正在下载资源 Downloading Resources...".into();
    persist(ctx, &param.task).await;

    if let Err(e) = acquire::run(ctx, &mut param).await {
        error!(task_id, error = %e, "acquire stage failed");
        fail_task(ctx, &mut param.task, &e, "下载失败 Download Failed").await;
        return;
    }

    if cancelled(&cancel) {
        return stop_cancelled(ctx, &mut param).await;
    }

    param.task.status_message = "正在转录与翻译 Transcribing & Translating...".into();
    persist(ctx, &param.task).await;

    if let Err(e) = transcribe::run(ctx, &mut param).await {
        error!(task_id, error = %e, "transcribe stage failed");
        fail_task(
            ctx,
            &mut param.task,
            &e,
            "转录翻译失败 Transcription/Translation Failed",
        )
        .await;
        return;
    }

    transcribe::generate_summary_if_missing(ctx, &mut param).await;

    if cancelled(&cancel) {
        return stop_cancelled(ctx, &mut param).await;
    }

    if param.enable_tts {
        param.task.status_message = "正在生成配音 Generating Dubbing...".into();
        persist(ctx, &param.task).await;

        if let Err(e) = dub::run(ctx, &mut param).await {
            error!(task_id, error = %e, "dub stage failed");
            fail_task(ctx, &mut param.task, &e, "配音生成失败 Dubbing Failed").await;
            return;
        }
        persist(ctx, &param.task).await;
    }

    if cancelled(&cancel) {
        return stop_cancelled(ctx, &mut param).await;
    }

    if param.embed_type != EmbedType::None {
        param.task.status_message = "正在合成视频 Compositing Video...".into();
        persist(ctx, &param.task).await;

        if let Err(e) = burn::run(ctx, &mut param).await {
            error!(task_id, error = %e, "burn stage failed");
            fail_task(ctx, &mut param.task, &e, "视频合成失败 Video Composition Failed").await;
            return;
        }
        persist(ctx, &param.task).await;
    }

    if cancelled(&cancel) {
        return stop_cancelled(ctx, &mut param).await;
    }

    param.task.status_message = "正在完成 Finalizing...".into();
    persist(ctx, &param.task).await;

    if let Err(e) = publish::run(ctx, &mut param).await {
        error!(task_id, error = %e, "publish stage failed");
        fail_task(ctx, &mut param.task, &e, "结果处理失败 Final Processing Failed").await;
        return;
    }

    param.task.status = TaskStatus::Succeeded;
    param.task.status_message = "任务完成 Completed".into();
    param.task.advance_pct(100);
    persist(ctx, &param.task).await;
    info!(task_id, "pipeline end");
}

#[cfg(test)]
pub(crate) mod testing {
    //! Context factory for stage tests: simulated audio, spy
    //! capabilities, in-memory store, temp directories.

    use super::*;
    use crate::capability::testing::{CannedChat, SpyTranscriber};
    use crate::capability::Segment;
    use crate::media::toolkit::testing::SimulatedAudio;

    pub struct TestWorld {
        pub ctx: PipelineContext,
        pub sim: Arc<SimulatedAudio>,
        pub transcriber: Arc<SpyTranscriber>,
        pub chat: Arc<CannedChat>,
        pub tts: Arc<crate::pipeline::dub::testing::ScriptedTts>,
        pub _tempdir: tempfile::TempDir,
    }

    pub async fn world_with(
        segments: Vec<Segment>,
        tts_durations: Vec<Result<f64, ()>>,
    ) -> TestWorld {
        let tempdir = tempfile::tempdir().unwrap();
        let sim = SimulatedAudio::new();
        let transcriber = Arc::new(SpyTranscriber::new(segments));
        let chat = Arc::new(CannedChat::with(|prompt| format!("译{prompt}")));
        let tts = Arc::new(crate::pipeline::dub::testing::ScriptedTts::new(
            Arc::clone(&sim),
            tts_durations,
        ));
        let tools = Arc::new(ToolRegistry::new());
        let paths = AppPaths {
            portable: false,
            config_dir: tempdir.path().join("config"),
            config_file: tempdir.path().join("config/config.toml"),
            log_dir: tempdir.path().join("logs"),
            output_dir: tempdir.path().join("output"),
            cache_dir: tempdir.path().join("cache"),
        };
        let ctx = PipelineContext {
            paths,
            store: TaskStore::connect("sqlite::memory:").await.unwrap(),
            tools: Arc::clone(&tools),
            audio: sim.clone(),
            transcriber: transcriber.clone(),
            chat: chat.clone(),
            tts: tts.clone(),
            voice_cloner: None,
            downloader: Downloader::new(tools, None, None),
            dub_mode: DubMode::Sequential,
        };
        TestWorld {
            ctx,
            sim,
            transcriber,
            chat,
            tts,
            _tempdir: tempdir,
        }
    }

    pub fn param_for(world: &TestWorld, task_id: &str) -> StageParam {
        let task_dir = world.ctx.paths.task_dir(task_id);
        let output_dir = task_dir.join("output");
        std::fs::create_dir_all(&output_dir).unwrap();
        StageParam {
            task: Task::new(task_id, "local:/tmp/in.mp4"),
            task_dir,
            output_dir,
            link: "local:/tmp/in.mp4".into(),
            audio_url: None,
            origin_language: "en".into(),
            target_language: "zh-CN".into(),
            result_type: SubtitleResultType::Bilingual(BilingualPosition::Top),
            enable_tts: true,
            tts_voice_code: "zh-CN-XiaoxiaoNeural".into(),
            replace_words: Default::default(),
            embed_type: EmbedType::None,
            vertical_major_title: String::new(),
            vertical_minor_title: String::new(),
            max_word_one_line: 12,
            dub_mode: DubMode::Sequential,
            input_video: None,
            video_width: 0,
            video_height: 0,
            video_duration_secs: 0.0,
            normalized_audio: None,
            origin_srt: None,
            target_srt: None,
            bilingual_srt: None,
            tts_result: None,
            video_with_tts: None,
        }
    }
}
