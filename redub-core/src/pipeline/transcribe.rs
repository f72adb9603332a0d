//! Transcribe + translate stage: speech-to-text on the normalised
//! audio, optional per-segment LLM translation, and SRT generation for
//! every requested result shape.
//!
//! The stage is resumable: when the expected subtitle artifacts already
//! exist in `output/` the STT capability is never invoked again, and
//! missing side files are reconstructed from the bilingual SRT.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::{persist, BilingualPosition, PipelineContext, StageParam, SubtitleResultType};
use crate::capability::Segment;
use crate::error::{code, AppError};
use crate::subtitle::{self, SrtBlock};
use crate::task::{Artifact, Task};
use crate::util;

pub const ORIGIN_SRT_NAME: &str = "origin.srt";
pub const TARGET_SRT_NAME: &str = "target.srt";
pub const BILINGUAL_SRT_NAME: &str = "bilingual.srt";
const TRANSCRIPT_TEXT_NAME: &str = "transcript.txt";
const SUMMARY_FILE_NAME: &str = "summary.txt";

pub const SUMMARY_SYSTEM_PROMPT: &str = "你是一个视频内容编辑。给定以####分隔的视频标题和简介，\
请输出翻译后的标题和一段简短的中文简介，两者之间用####分隔。Translate the title and write a short \
summary, separated by ####.";

const SUMMARY_TRANSCRIPT_PROMPT: &str = "请根据以下视频转录内容，生成一个标题和一段简短摘要，\
两者之间用####分隔。Generate a title and a short summary separated by ####.\n\n";

const TRANSLATE_SYSTEM_PROMPT: &str = "You are a professional subtitle translator. Translate the \
user's line into the target language, keeping it concise enough to read as a subtitle. Reply with \
the translated line only.";

pub async fn run(ctx: &PipelineContext, param: &mut StageParam) -> Result<(), AppError> {
    let origin_path = param.output_dir.join(ORIGIN_SRT_NAME);
    let target_path = param.output_dir.join(TARGET_SRT_NAME);
    let bilingual_path = param.output_dir.join(BILINGUAL_SRT_NAME);

    if try_resume(param, &origin_path, &target_path, &bilingual_path)? {
        info!(task_id = %param.task.task_id, "subtitles already present, skipping transcription");
        register_subtitle_artifacts(param);
        return Ok(());
    }

    let audio = param.normalized_audio.clone().ok_or_else(|| {
        AppError::new(code::AUDIO_EXTRACT, "缺少规范化音频 Normalized audio missing")
    })?;

    let mut segments = ctx
        .transcriber
        .transcribe(&audio, &param.origin_language)
        .await
        .map_err(|e| AppError::wrap(code::TRANSCRIBE_FAILED, "语音识别失败 Transcription failed", e))?;
    if segments.is_empty() {
        return Err(AppError::new(
            code::TRANSCRIBE_FAILED,
            "语音识别结果为空 Transcription produced no segments",
        ));
    }

    for segment in &mut segments {
        segment.text = util::apply_replacements(&segment.text, &param.replace_words);
    }

    let origin_blocks = segments_to_blocks(&segments, |_, s| vec![s.text.clone()]);
    write_srt(&origin_path, &origin_blocks)?;
    param.origin_srt = Some(origin_path);

    let transcript: String = segments
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    if let Err(e) = std::fs::write(param.output_dir.join(TRANSCRIPT_TEXT_NAME), transcript) {
        warn!(error = %e, "writing transcript text failed");
    }

    if param.result_type.is_translated() {
        let translations = translate_segments(ctx, &segments, &param.target_language).await?;

        let target_blocks =
            segments_to_blocks(&segments, |i, _| vec![translations[i].clone()]);
        write_srt(&target_path, &target_blocks)?;
        param.target_srt = Some(target_path);

        if let SubtitleResultType::Bilingual(position) = param.result_type {
            let bilingual_blocks = segments_to_blocks(&segments, |i, s| {
                let translated = translations[i].clone();
                match position {
                    BilingualPosition::Top => vec![translated, s.text.clone()],
                    BilingualPosition::Bottom => vec![s.text.clone(), translated],
                }
            });
            write_srt(&bilingual_path, &bilingual_blocks)?;
            param.bilingual_srt = Some(bilingual_path);
        }
    }

    register_subtitle_artifacts(param);
    param.task.advance_pct(40);
    persist(ctx, &param.task).await;
    Ok(())
}

/// Check for existing outputs; reconstruct origin/target SRTs from the
/// bilingual file when only that one survived.
fn try_resume(
    param: &mut StageParam,
    origin_path: &Path,
    target_path: &Path,
    bilingual_path: &Path,
) -> Result<bool, AppError> {
    let complete = match param.result_type {
        SubtitleResultType::OriginOnly => origin_path.exists(),
        SubtitleResultType::TargetOnly => target_path.exists(),
        SubtitleResultType::Bilingual(_) => bilingual_path.exists(),
    };
    if !complete {
        return Ok(false);
    }

    if origin_path.exists() {
        param.origin_srt = Some(origin_path.to_owned());
    }
    if target_path.exists() {
        param.target_srt = Some(target_path.to_owned());
    }
    if bilingual_path.exists() {
        param.bilingual_srt = Some(bilingual_path.to_owned());
    }

    if let SubtitleResultType::Bilingual(position) = param.result_type {
        if param.origin_srt.is_none() || param.target_srt.is_none() {
            let raw = std::fs::read_to_string(bilingual_path).map_err(|e| {
                AppError::wrap(code::FILE_NOT_FOUND, "读取双语字幕失败 Failed to read bilingual SRT", e)
            })?;
            let blocks = subtitle::parse(&raw).map_err(|e| {
                AppError::wrap(code::SUBTITLE_NOT_FOUND, "双语字幕损坏 Bilingual SRT malformed", e)
            })?;

            let pick = |block: &SrtBlock, want_target: bool| -> Vec<String> {
                if block.lines.len() < 2 {
                    return block.lines.clone();
                }
                let target_first = position == BilingualPosition::Top;
                let line = if want_target == target_first {
                    &block.lines[0]
                } else {
                    &block.lines[1]
                };
                vec![line.clone()]
            };

            if param.origin_srt.is_none() {
                let origin_blocks: Vec<SrtBlock> = blocks
                    .iter()
                    .map(|b| SrtBlock {
                        lines: pick(b, false),
                        ..b.clone()
                    })
                    .collect();
                write_srt(origin_path, &origin_blocks)?;
                param.origin_srt = Some(origin_path.to_owned());
            }
            if param.target_srt.is_none() {
                let target_blocks: Vec<SrtBlock> = blocks
                    .iter()
                    .map(|b| SrtBlock {
                        lines: pick(b, true),
                        ..b.clone()
                    })
                    .collect();
                write_srt(target_path, &target_blocks)?;
                param.target_srt = Some(target_path.to_owned());
            }
        }
    }

    Ok(true)
}

async fn translate_segments(
    ctx: &PipelineContext,
    segments: &[Segment],
    target_language: &str,
) -> Result<Vec<String>, AppError> {
    let mut translations = Vec::with_capacity(segments.len());
    for segment in segments {
        let prompt = format!("[{target_language}] {}", segment.text);
        let translated = ctx
            .chat
            .chat(TRANSLATE_SYSTEM_PROMPT, &prompt)
            .await
            .map_err(|e| AppError::wrap(code::TRANSLATE_FAILED, "翻译失败 Translation failed", e))?;
        translations.push(translated.trim().to_owned());
    }
    Ok(translations)
}

fn segments_to_blocks(
    segments: &[Segment],
    lines_for: impl Fn(usize, &Segment) -> Vec<String>,
) -> Vec<SrtBlock> {
    segments
        .iter()
        .enumerate()
        .map(|(i, s)| SrtBlock {
            index: i as u32 + 1,
            start_ms: s.start_ms,
            end_ms: s.end_ms,
            lines: lines_for(i, s),
        })
        .collect()
}

fn write_srt(path: &Path, blocks: &[SrtBlock]) -> Result<(), AppError> {
    std::fs::write(path, subtitle::format(blocks))
        .map_err(|e| AppError::wrap(code::FILE_WRITE, "写入字幕失败 Failed to write SRT", e))
}

fn register_subtitle_artifacts(param: &mut StageParam) {
    let files: [(&str, &Option<PathBuf>); 3] = [
        (ORIGIN_SRT_NAME, &param.origin_srt),
        (TARGET_SRT_NAME, &param.target_srt),
        (BILINGUAL_SRT_NAME, &param.bilingual_srt),
    ];
    let artifacts: Vec<Artifact> = files
        .iter()
        .filter_map(|(name, path)| {
            path.as_ref()
                .map(|p| Artifact::new(*name, p.display().to_string()))
        })
        .collect();
    for artifact in artifacts {
        param.task.push_artifact(artifact);
    }
}

/// Fold an LLM `title####summary` reply into the task record; returns
/// the text persisted to `summary.txt`.
pub fn apply_summary_result(task: &mut Task, result: &str) -> String {
    match result.split_once("####") {
        Some((title, summary)) => {
            let title = title.trim();
            let summary = summary.trim();
            if task.translated_title.is_empty() {
                task.translated_title = title.to_owned();
            }
            if task.translated_description.is_empty() {
                task.translated_description = summary.to_owned();
            }
            format!("标题：{title}\n\n简介：\n{summary}")
        }
        None => {
            if task.translated_title.is_empty() {
                task.translated_title = result.trim().to_owned();
            }
            result.trim().to_owned()
        }
    }
}

/// Local-file sources never went through metadata enrichment; derive a
/// summary from the transcript so every task ends with one.
pub async fn generate_summary_if_missing(ctx: &PipelineContext, param: &mut StageParam) {
    let summary_file = param.output_dir.join(SUMMARY_FILE_NAME);
    let already = param
        .task
        .artifacts
        .iter()
        .any(|a| a.name.contains("summary"))
        || summary_file.exists();
    if already {
        return;
    }

    let transcript_path = param.output_dir.join(TRANSCRIPT_TEXT_NAME);
    let Ok(mut text) = std::fs::read_to_string(&transcript_path) else {
        warn!(task_id = %param.task.task_id, "no transcript available for summary");
        return;
    };
    if text.is_empty() {
        return;
    }
    if text.chars().count() > 8000 {
        text = text.chars().take(8000).collect::<String>() + "...";
    }

    info!(task_id = %param.task.task_id, "generating summary from transcript");
    let prompt = format!("{SUMMARY_TRANSCRIPT_PROMPT}{text}");
    match ctx.chat.chat("", &prompt).await {
        Ok(result) => {
            let summary = apply_summary_result(&mut param.task, &result);
            if let Err(e) = std::fs::write(&summary_file, summary) {
                warn!(error = %e, "writing summary.txt failed");
                return;
            }
            param.task.push_artifact(Artifact::new(
                SUMMARY_FILE_NAME,
                summary_file.display().to_string(),
            ));
        }
        Err(e) => warn!(task_id = %param.task.task_id, error = %e, "summary generation failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing;

    fn sample_segments() -> Vec<Segment> {
        vec![
            Segment {
                start_ms: 0,
                end_ms: 1500,
                text: "Hello world".into(),
            },
            Segment {
                start_ms: 2000,
                end_ms: 3500,
                text: "GPT is watching".into(),
            },
        ]
    }

    #[tokio::test]
    async fn fresh_run_writes_all_subtitle_shapes() {
        let world = testing::world_with(sample_segments(), Vec::new()).await;
        let mut param = testing::param_for(&world, "tr_fresh");
        param.normalized_audio = Some(param.task_dir.join("audio_mono_16k.mp3"));

        run(&world.ctx, &mut param).await.unwrap();

        assert_eq!(world.transcriber.call_count(), 1);
        let bilingual =
            std::fs::read_to_string(param.bilingual_srt.as_ref().unwrap()).unwrap();
        let blocks = subtitle::parse(&bilingual).unwrap();
        assert_eq!(blocks.len(), 2);
        // Translation on top: translated line first, origin second.
        assert_eq!(blocks[0].lines[0], "译[zh-CN] Hello world");
        assert_eq!(blocks[0].lines[1], "Hello world");
        assert!(param.origin_srt.as_ref().unwrap().exists());
        assert!(param.target_srt.as_ref().unwrap().exists());
        assert_eq!(param.task.process_pct, 40);
        assert!(param
            .task
            .artifacts
            .iter()
            .any(|a| a.name == BILINGUAL_SRT_NAME));
    }

    #[tokio::test]
    async fn word_replacements_apply_before_translation() {
        let world = testing::world_with(sample_segments(), Vec::new()).await;
        let mut param = testing::param_for(&world, "tr_replace");
        param.normalized_audio = Some(param.task_dir.join("audio_mono_16k.mp3"));
        param.replace_words = util::parse_replace_pairs(&["GPT|G-P-T".to_owned()]);

        run(&world.ctx, &mut param).await.unwrap();

        let origin = std::fs::read_to_string(param.origin_srt.as_ref().unwrap()).unwrap();
        assert!(origin.contains("G-P-T is watching"));
        assert!(!origin.contains("GPT is watching"));
    }

    #[tokio::test]
    async fn existing_bilingual_srt_skips_transcriber() {
        let world = testing::world_with(sample_segments(), Vec::new()).await;
        let mut param = testing::param_for(&world, "tr_resume");

        let bilingual = param.output_dir.join(BILINGUAL_SRT_NAME);
        std::fs::write(
            &bilingual,
            "1\n00:00:00,000 --> 00:00:01,500\n你好世界\nHello world\n\n",
        )
        .unwrap();

        run(&world.ctx, &mut param).await.unwrap();

        assert_eq!(world.transcriber.call_count(), 0, "STT must not re-run");
        assert_eq!(param.bilingual_srt.as_deref(), Some(bilingual.as_path()));

        // Origin and target reconstructed from the bilingual lines.
        let origin = std::fs::read_to_string(param.origin_srt.as_ref().unwrap()).unwrap();
        assert!(origin.contains("Hello world"));
        assert!(!origin.contains("你好世界"));
        let target = std::fs::read_to_string(param.target_srt.as_ref().unwrap()).unwrap();
        assert!(target.contains("你好世界"));
    }

    #[tokio::test]
    async fn summary_generated_from_transcript_when_missing() {
        let world = testing::world_with(sample_segments(), Vec::new()).await;
        let mut param = testing::param_for(&world, "tr_summary");
        std::fs::write(
            param.output_dir.join(TRANSCRIPT_TEXT_NAME),
            "a transcript about birds",
        )
        .unwrap();

        generate_summary_if_missing(&world.ctx, &mut param).await;

        let summary = std::fs::read_to_string(param.output_dir.join(SUMMARY_FILE_NAME)).unwrap();
        assert!(summary.contains("译"));
        assert!(param.task.artifacts.iter().any(|a| a.name == SUMMARY_FILE_NAME));

        // Second call is a no-op (summary exists).
        let artifact_count = param.task.artifacts.len();
        generate_summary_if_missing(&world.ctx, &mut param).await;
        assert_eq!(param.task.artifacts.len(), artifact_count);
    }

    #[test]
    fn summary_result_parsing() {
        let mut task = Task::new("t", "u");
        let content = apply_summary_result(&mut task, "标题X####这是简介");
        assert_eq!(task.translated_title, "标题X");
        assert_eq!(task.translated_description, "这是简介");
        assert!(content.contains("标题：标题X"));

        let mut plain = Task::new("t2", "u");
        let content = apply_summary_result(&mut plain, "no separator here");
        assert_eq!(plain.translated_title, "no separator here");
        assert_eq!(content, "no separator here");
    }
}
