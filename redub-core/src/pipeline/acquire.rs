//! Acquire stage: bring the source media into the task directory,
//! enrich metadata, probe the stream and normalise the audio track for
//! transcription.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::{persist, PipelineContext, StageParam};
use crate::error::{code, AppError};
use crate::task::Artifact;

const SOURCE_STEM: &str = "source";
const NORMALIZED_AUDIO_NAME: &str = "audio_mono_16k.mp3";

pub async fn run(ctx: &PipelineContext, param: &mut StageParam) -> Result<(), AppError> {
    let source = obtain_source(ctx, param).await?;
    param.input_video = Some(source.clone());

    enrich_metadata(ctx, param).await;

    let video = ctx.video_tools();
    match video.resolution(&source).await {
        Ok((width, height)) => {
            param.video_width = width;
            param.video_height = height;
        }
        Err(e) => warn!(task_id = %param.task.task_id, error = %e, "resolution probe failed"),
    }
    match video.duration_secs(&source).await {
        Ok(duration) => param.video_duration_secs = duration,
        Err(e) => warn!(task_id = %param.task.task_id, error = %e, "duration probe failed"),
    }

    let normalized = param.task_dir.join(NORMALIZED_AUDIO_NAME);
    if !normalized.exists() {
        let audio_input = match &param.audio_url {
            Some(audio_url) => PathBuf::from(audio_url.strip_prefix("local:").unwrap_or(audio_url)),
            None => source.clone(),
        };
        video
            .extract_audio_mono16k(&audio_input, &normalized)
            .await
            .map_err(|e| {
                AppError::wrap(code::AUDIO_EXTRACT, "音频提取失败 Audio extraction failed", e)
            })?;
    }
    param.normalized_audio = Some(normalized);

    param.task.advance_pct(10);
    persist(ctx, &param.task).await;
    Ok(())
}

/// Copy a `local:` file or download the URL into the task directory as
/// `source.<ext>`. An existing source file short-circuits both paths so
/// retries never re-download.
async fn obtain_source(ctx: &PipelineContext, param: &mut StageParam) -> Result<PathBuf, AppError> {
    if let Some(existing) = find_existing_source(&param.task_dir) {
        info!(task_id = %param.task.task_id, source = %existing.display(), "source already present");
        return Ok(existing);
    }

    if let Some(local) = param.link.strip_prefix("local:") {
        let local = Path::new(local);
        if !local.exists() {
            return Err(AppError::new(
                code::VIDEO_NOT_FOUND,
                format!("本地文件不存在 Local file not found: {}", local.display()),
            ));
        }
        let ext = local
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mp4".to_owned());
        let target = param.task_dir.join(format!("{SOURCE_STEM}.{ext}"));
        tokio::fs::copy(local, &target).await.map_err(|e| {
            AppError::wrap(code::FILE_WRITE, "复制本地文件失败 Failed to copy local file", e)
        })?;
        return Ok(target);
    }

    let target = param.task_dir.join(format!("{SOURCE_STEM}.mp4"));
    ctx.downloader
        .download_video(&param.link, &target)
        .await
        .map_err(|e| AppError::wrap(code::VIDEO_DOWNLOAD, "视频下载失败 Video download failed", e))?;
    Ok(target)
}

fn find_existing_source(task_dir: &Path) -> Option<PathBuf> {
    std::fs::read_dir(task_dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| {
            p.is_file()
                && p.file_stem()
                    .map(|s| s.to_string_lossy() == SOURCE_STEM)
                    .unwrap_or(false)
        })
}

/// Best-effort metadata enrichment for platform URLs: title,
/// description, cover image and an LLM-translated summary. Nothing here
/// fails the stage.
async fn enrich_metadata(ctx: &PipelineContext, param: &mut StageParam) {
    if !param.link.contains("youtube.com") && !param.link.contains("bilibili.com") {
        return;
    }

    param.task.status_message = "正在分析视频信息 Analyzing Video Info...".into();
    persist(ctx, &param.task).await;

    let (title, description) = ctx.downloader.fetch_title_and_description(&param.link).await;

    let cover_target = param.output_dir.join("cover");
    if let Some(cover) = ctx.downloader.download_thumbnail(&param.link, &cover_target).await {
        let name = format!(
            "cover{}",
            cover
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default()
        );
        param.task.cover_path = cover.display().to_string();
        param
            .task
            .push_artifact(Artifact::new(name, cover.display().to_string()));
    }

    param.task.title = title.clone();
    param.task.description = description.clone();
    param.task.origin_language = param.origin_language.clone();
    param.task.target_language = param.target_language.clone();

    match ctx
        .chat
        .chat(
            super::transcribe::SUMMARY_SYSTEM_PROMPT,
            &format!("{title}####{description}"),
        )
        .await
    {
        Ok(result) => {
            let summary = super::transcribe::apply_summary_result(&mut param.task, &result);
            let summary_file = param.output_dir.join("summary.txt");
            if let Err(e) = tokio::fs::write(&summary_file, summary).await {
                warn!(error = %e, "writing summary.txt failed");
            } else {
                param.task.push_artifact(Artifact::new(
                    "summary.txt",
                    summary_file.display().to_string(),
                ));
            }
        }
        Err(e) => warn!(task_id = %param.task.task_id, error = %e, "metadata summary failed"),
    }
}
