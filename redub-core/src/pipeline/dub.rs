//! Dubbing engine: SRT → one continuous dubbed track, time-aligned to
//! the subtitle windows, mixed against the separated instrumental and
//! muxed back into the source video.
//!
//! Timeline assembly keeps a monotonic audio cursor. Every appended
//! clip advances the cursor by its *measured* duration, never the
//! requested one, so rounding drift from the audio tools is absorbed by
//! the next gap computation instead of accumulating.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{info, warn};

use super::{persist, DubMode, PipelineContext, StageParam};
use crate::error::{code, AppError};
use crate::media::separation;
use crate::media::toolkit::AudioToolkit;
use crate::media::MediaError;
use crate::subtitle::{self, DubEntry};

pub const TTS_RESULT_NAME: &str = "tts_result.wav";
pub const DURATION_DETAILS_NAME: &str = "duration_details.txt";

/// Gaps shorter than this are absorbed rather than bridged by silence.
const MIN_GAP_SECS: f64 = 0.01;
/// Subtitle windows are clamped to at least this long.
const MIN_WINDOW_SECS: f64 = 0.5;
/// Pass-through band: clips this close to the window are used as-is.
const FIT_TOLERANCE_SECS: f64 = 0.001;
/// atempo bounds; clamped retiming may overrun the window, which the
/// next iteration's gap logic absorbs.
const MIN_SPEED: f64 = 0.5;
const MAX_SPEED: f64 = 2.0;
/// Concurrent mode synthesises at most this many clips at once.
const MAX_CONCURRENT_TTS: usize = 3;

pub async fn run(ctx: &PipelineContext, param: &mut StageParam) -> Result<(), AppError> {
    if !param.enable_tts {
        return Ok(());
    }

    let srt = param
        .tts_source_srt()
        .cloned()
        .ok_or_else(|| AppError::new(code::SUBTITLE_NOT_FOUND, "缺少配音字幕 No SRT to dub"))?;
    let input_video = param
        .input_video
        .clone()
        .ok_or_else(|| AppError::new(code::VIDEO_NOT_FOUND, "缺少输入视频 No input video"))?;

    let ext = input_video
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mp4".to_owned());
    let tts_result = param.task_dir.join(TTS_RESULT_NAME);
    let video_with_tts = param.task_dir.join(format!("video_with_tts.{ext}"));

    if tts_result.exists() && video_with_tts.exists() {
        info!(task_id = %param.task.task_id, "dubbed track already present, skipping");
        param.tts_result = Some(tts_result);
        param.video_with_tts = Some(video_with_tts);
        param.task.advance_pct(98);
        return Ok(());
    }

    let entries = subtitle::load_dub_entries(&srt)
        .map_err(|e| AppError::wrap(code::SUBTITLE_NOT_FOUND, "解析字幕失败 Failed to parse SRT", e))?;
    if entries.is_empty() {
        return Err(AppError::new(
            code::SUBTITLE_NOT_FOUND,
            "字幕为空 SRT contains no entries",
        ));
    }

    let clips = match param.dub_mode {
        DubMode::Sequential => synthesize_sequential(ctx, param, &entries).await?,
        DubMode::Concurrent => synthesize_concurrent(ctx, param, &entries).await?,
    };

    let report = assemble_timeline(
        ctx.audio.as_ref(),
        &param.task_dir,
        &entries,
        &clips,
        &tts_result,
    )
    .await
    .map_err(|e| AppError::wrap(code::TTS_FAILED, "拼接配音失败 Timeline assembly failed", e))?;

    if let Err(e) = std::fs::write(
        param.task_dir.join(DURATION_DETAILS_NAME),
        report.join("\n") + "\n",
    ) {
        warn!(error = %e, "writing duration details failed");
    }

    mux_output(ctx, param, &tts_result, &input_video, &video_with_tts).await?;

    param.tts_result = Some(tts_result);
    param.video_with_tts = Some(video_with_tts);
    param.task.advance_pct(98);
    persist(ctx, &param.task).await;
    info!(task_id = %param.task.task_id, "dubbing complete");
    Ok(())
}

fn clip_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("subtitle_{}.wav", index + 1))
}

/// Sequential synthesis: the first TTS failure is fatal.
async fn synthesize_sequential(
    ctx: &PipelineContext,
    param: &StageParam,
    entries: &[DubEntry],
) -> Result<Vec<PathBuf>, AppError> {
    let mut clips = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let output = clip_path(&param.task_dir, i);
        ctx.tts
            .speak(&entry.text, &param.tts_voice_code, &output)
            .await
            .map_err(|e| {
                AppError::wrap(
                    code::TTS_FAILED,
                    format!("TTS generation failed for subtitle {}", i + 1),
                    e,
                )
            })?;
        clips.push(output);
    }
    Ok(clips)
}

/// Concurrent synthesis behind a counting semaphore. Failures up to
/// ⌊N/2⌋ are tolerated and replaced 1-for-1 with 0.5 s of silence.
async fn synthesize_concurrent(
    ctx: &PipelineContext,
    param: &StageParam,
    entries: &[DubEntry],
) -> Result<Vec<PathBuf>, AppError> {
    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_TTS));
    let mut joins = Vec::with_capacity(entries.len());

    for (i, entry) in entries.iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let tts = Arc::clone(&ctx.tts);
        let text = entry.text.clone();
        let voice = param.tts_voice_code.clone();
        let output = clip_path(&param.task_dir, i);
        joins.push(tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => return Err((i, anyhow::Error::new(e))),
            };
            tts.speak(&text, &voice, &output).await.map_err(|e| (i, e))
        }));
    }

    let mut failed = Vec::new();
    for join in joins {
        match join.await {
            Ok(Ok(())) => {}
            Ok(Err((i, e))) => {
                warn!(index = i + 1, error = %e, "concurrent TTS entry failed");
                failed.push(i);
            }
            Err(e) => {
                return Err(AppError::wrap(
                    code::TTS_FAILED,
                    "TTS worker panicked",
                    e,
                ))
            }
        }
    }

    let threshold = entries.len() / 2;
    if failed.len() > threshold {
        return Err(AppError::new(
            code::TTS_FAILED,
            format!(
                "too many TTS failures: {}/{} failed (threshold {})",
                failed.len(),
                entries.len(),
                threshold
            ),
        ));
    }

    for i in &failed {
        let output = clip_path(&param.task_dir, *i);
        ctx.audio
            .generate_silence(&output, MIN_WINDOW_SECS)
            .await
            .map_err(|e| {
                AppError::wrap(
                    code::TTS_FAILED,
                    format!("failed to substitute silence for subtitle {}", i + 1),
                    e,
                )
            })?;
    }
    if !failed.is_empty() {
        warn!(
            failed = failed.len(),
            total = entries.len(),
            "concurrent TTS finished with silence substitutions"
        );
    }

    Ok((0..entries.len())
        .map(|i| clip_path(&param.task_dir, i))
        .collect())
}

/// Lay the synthesised clips onto a silence-bridged timeline and
/// concatenate. Returns the per-entry duration log lines.
pub async fn assemble_timeline(
    audio: &dyn AudioToolkit,
    dir: &Path,
    entries: &[DubEntry],
    clips: &[PathBuf],
    output: &Path,
) -> Result<Vec<String>, MediaError> {
    let mut cursor = 0.0_f64;
    let mut files: Vec<PathBuf> = Vec::new();
    let mut report = Vec::new();

    for (i, entry) in entries.iter().enumerate() {
        let gap = entry.start_secs - cursor;
        if gap > MIN_GAP_SECS {
            let silence = dir.join(format!("gap_silence_{i}.wav"));
            audio.generate_silence(&silence, gap).await?;
            let actual = audio.duration_secs(&silence).await?;
            cursor += actual;
            files.push(silence);
            report.push(format!(
                "Silence Gap {i}: duration={actual:.3}, new_cursor={cursor:.3}"
            ));
        }

        let window = (entry.end_secs - entry.start_secs).max(MIN_WINDOW_SECS);
        let adjusted = dir.join(format!("adjusted_{}.wav", i + 1));
        let actual = fit_clip(audio, dir, &clips[i], &adjusted, window).await?;
        cursor += actual;
        files.push(adjusted);
        report.push(format!(
            "Audio {}: target={window:.3}, actual={actual:.3}, new_cursor={cursor:.3}",
            i + 1
        ));
    }

    audio.concat_stream_copy(&files, output).await?;
    Ok(report)
}

/// Fit one clip to its subtitle window: pad short clips with trailing
/// silence, retime long ones with atempo (clamped), pass through inside
/// the tolerance band. Returns the measured output duration.
async fn fit_clip(
    audio: &dyn AudioToolkit,
    dir: &Path,
    input: &Path,
    output: &Path,
    window: f64,
) -> Result<f64, MediaError> {
    let resampled = dir.join(format!(
        "resampled_{}",
        input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "clip.wav".to_owned())
    ));
    audio.resample_mono_44k(input, &resampled).await?;
    let duration = audio.duration_secs(&resampled).await?;

    if duration + FIT_TOLERANCE_SECS < window {
        let pad = dir.join(format!(
            "pad_{}",
            output
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "pad.wav".to_owned())
        ));
        audio.generate_silence(&pad, window - duration).await?;
        audio
            .concat_stream_copy(&[resampled.clone(), pad], output)
            .await?;
    } else if duration > window + FIT_TOLERANCE_SECS {
        let speed = (duration / window).clamp(MIN_SPEED, MAX_SPEED);
        if (duration / window) > MAX_SPEED {
            warn!(speed = duration / window, "retime speed clamped to 2.0");
        }
        audio.retime(&resampled, output, speed).await?;
    } else {
        audio.copy(&resampled, output).await?;
    }

    audio.duration_secs(output).await
}

/// Mix against the separated instrumental when possible, fall back to
/// direct replacement, then mux the chosen audio into the video.
async fn mux_output(
    ctx: &PipelineContext,
    param: &StageParam,
    tts_result: &Path,
    input_video: &Path,
    video_with_tts: &Path,
) -> Result<(), AppError> {
    let video = ctx.video_tools();
    let source_audio = param
        .normalized_audio
        .clone()
        .unwrap_or_else(|| input_video.to_owned());

    let mixed = match separation::separate_audio(&ctx.tools, &source_audio, &param.task_dir).await {
        Ok(result) => {
            info!(
                task_id = %param.task.task_id,
                instrumental = %result.instrumental.display(),
                "audio separation successful, mixing with instrumental"
            );
            let mixed_path = param.task_dir.join("mixed_audio.aac");
            match video
                .mix_with_ducking(
                    tts_result,
                    &result.instrumental,
                    &mixed_path,
                    crate::media::video::DEFAULT_TTS_VOLUME,
                    crate::media::video::DEFAULT_BGM_VOLUME,
                )
                .await
            {
                Ok(()) => Some(mixed_path),
                Err(e) => {
                    warn!(task_id = %param.task.task_id, error = %e, "mixing failed, falling back to direct replacement");
                    None
                }
            }
        }
        Err(e) => {
            warn!(task_id = %param.task.task_id, error = %e, "audio separation failed, falling back to direct replacement");
            None
        }
    };

    let final_audio = mixed.as_deref().unwrap_or(tts_result);
    video
        .replace_audio(input_video, final_audio, video_with_tts)
        .await
        .map_err(|e| AppError::wrap(code::AUDIO_MIX_FAILED, "音频合成失败 Audio mux failed", e))
}

#[cfg(test)]
pub(crate) mod testing {
    //! TTS double scripted per subtitle index: the output filename
    //! (`subtitle_<n>.wav`) selects the scripted duration or failure.

    use super::*;
    use crate::capability::SpeechSynthesizer;
    use crate::media::toolkit::testing::SimulatedAudio;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub struct ScriptedTts {
        sim: Arc<SimulatedAudio>,
        script: Vec<Result<f64, ()>>,
        pub calls: AtomicUsize,
    }

    impl ScriptedTts {
        pub fn new(sim: Arc<SimulatedAudio>, script: Vec<Result<f64, ()>>) -> Self {
            Self {
                sim,
                script,
                calls: AtomicUsize::new(0),
            }
        }

        fn index_from_path(output: &Path) -> Option<usize> {
            let stem = output.file_stem()?.to_string_lossy().into_owned();
            stem.strip_prefix("subtitle_")?.parse::<usize>().ok()
        }
    }

    #[async_trait]
    impl SpeechSynthesizer for ScriptedTts {
        async fn speak(&self, _text: &str, _voice: &str, output: &Path) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let index = Self::index_from_path(output)
                .ok_or_else(|| anyhow::anyhow!("unexpected output path {}", output.display()))?;
            match self.script.get(index - 1) {
                Some(Ok(duration)) => {
                    self.sim.set_duration(output, *duration);
                    Ok(())
                }
                Some(Err(())) => anyhow::bail!("scripted TTS failure for subtitle {index}"),
                None => anyhow::bail!("no script for subtitle {index}"),
            }
        }
    }
}
