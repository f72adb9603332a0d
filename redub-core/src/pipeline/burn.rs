//! Burn stage: render the subtitles into one or two video files.
//!
//! Horizontal output keeps the source framing; vertical output first
//! pads landscape sources to 720×1280 with the two title bands, then
//! burns. A portrait source with a horizontal-only request is skipped
//! rather than failed.

use std::path::Path;

use tracing::{info, warn};

use super::{persist, PipelineContext, StageParam};
use crate::error::{code, AppError};
use crate::media::video::is_landscape;
use crate::subtitle;
use crate::subtitle::ass::{self, Orientation};
use crate::task::Artifact;

pub const HORIZONTAL_EMBED_NAME: &str = "horizontal_embed.mp4";
pub const VERTICAL_EMBED_NAME: &str = "vertical_embed.mp4";
const VERTICAL_INTERMEDIATE_NAME: &str = "vertical_transferred.mp4";

pub async fn run(ctx: &PipelineContext, param: &mut StageParam) -> Result<(), AppError> {
    if !param.embed_type.wants_horizontal() && !param.embed_type.wants_vertical() {
        return Ok(());
    }

    let srt_path = param.burn_source_srt().cloned().ok_or_else(|| {
        AppError::new(code::SUBTITLE_NOT_FOUND, "缺少烧录字幕 No SRT to burn")
    })?;
    let blocks = {
        let raw = std::fs::read_to_string(&srt_path).map_err(|e| {
            AppError::wrap(code::FILE_NOT_FOUND, "读取字幕失败 Failed to read SRT", e)
        })?;
        subtitle::parse(&raw).map_err(|e| {
            AppError::wrap(code::SUBTITLE_NOT_FOUND, "字幕解析失败 SRT malformed", e)
        })?
    };

    // Dubbed rendition wins as burn input when present.
    let input = param
        .video_with_tts
        .clone()
        .filter(|p| param.enable_tts && p.exists())
        .or_else(|| param.input_video.clone())
        .ok_or_else(|| AppError::new(code::VIDEO_NOT_FOUND, "缺少输入视频 No input video"))?;

    let (width, height) = probe_or_cached(ctx, param, &input).await?;

    if param.embed_type.wants_horizontal() {
        if !is_landscape(width, height) {
            info!(task_id = %param.task.task_id, "portrait input, skipping horizontal rendering");
        } else {
            let output = param.output_dir.join(HORIZONTAL_EMBED_NAME);
            if !output.exists() {
                let ass_path = param.task_dir.join("formatted_subtitles.ass");
                let document = ass::srt_to_ass(
                    &blocks,
                    Orientation::Horizontal,
                    param.result_type,
                    &param.origin_language,
                    param.max_word_one_line,
                );
                std::fs::write(&ass_path, document).map_err(|e| {
                    AppError::wrap(code::FILE_WRITE, "写入ASS失败 Failed to write ASS", e)
                })?;
                ctx.video_tools()
                    .burn_ass(&input, &ass_path, &output)
                    .await
                    .map_err(|e| {
                        AppError::wrap(code::VIDEO_DOWNLOAD, "字幕烧录失败 Subtitle burn failed", e)
                    })?;
            }
            param.task.push_artifact(Artifact::new(
                HORIZONTAL_EMBED_NAME,
                output.display().to_string(),
            ));
        }
    }

    if param.embed_type.wants_vertical() {
        let output = param.output_dir.join(VERTICAL_EMBED_NAME);
        if !output.exists() {
            let vertical_input = if is_landscape(width, height) {
                let intermediate = param.task_dir.join(VERTICAL_INTERMEDIATE_NAME);
                ctx.video_tools()
                    .convert_to_vertical(
                        &input,
                        &intermediate,
                        &param.vertical_major_title,
                        &param.vertical_minor_title,
                    )
                    .await
                    .map_err(|e| {
                        AppError::wrap(code::VIDEO_DOWNLOAD, "竖屏转换失败 Vertical conversion failed", e)
                    })?;
                intermediate
            } else {
                input.clone()
            };

            let ass_path = param.task_dir.join("formatted_subtitles_vertical.ass");
            let document = ass::srt_to_ass(
                &blocks,
                Orientation::Vertical,
                param.result_type,
                &param.origin_language,
                param.max_word_one_line,
            );
            std::fs::write(&ass_path, document).map_err(|e| {
                AppError::wrap(code::FILE_WRITE, "写入ASS失败 Failed to write ASS", e)
            })?;
            ctx.video_tools()
                .burn_ass(&vertical_input, &ass_path, &output)
                .await
                .map_err(|e| {
                    AppError::wrap(code::VIDEO_DOWNLOAD, "字幕烧录失败 Subtitle burn failed", e)
                })?;
        }
        param.task.push_artifact(Artifact::new(
            VERTICAL_EMBED_NAME,
            output.display().to_string(),
        ));
    }

    param.task.advance_pct(99);
    persist(ctx, &param.task).await;
    Ok(())
}

/// Use the resolution probed during acquire when available; re-probe
/// only when this run resumed past that stage.
async fn probe_or_cached(
    ctx: &PipelineContext,
    param: &StageParam,
    input: &Path,
) -> Result<(u32, u32), AppError> {
    if param.video_width > 0 && param.video_height > 0 {
        return Ok((param.video_width, param.video_height));
    }
    ctx.video_tools().resolution(input).await.map_err(|e| {
        warn!(error = %e, "resolution probe failed in burn stage");
        AppError::wrap(code::VIDEO_NOT_FOUND, "获取分辨率失败 Resolution probe failed", e)
    })
}
