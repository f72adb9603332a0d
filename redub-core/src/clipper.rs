//! Smart clipper: analyse a long video's subtitles with the LLM,
//! propose topical clips, and fan selected clips out into child
//! pipeline tasks.
//!
//! Sessions live in process memory keyed by an opaque token; a
//! submission consumes nothing but may be repeated while the process
//! lives.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{code, AppError};
use crate::pipeline::{self, PipelineContext, SubmitRequest};
use crate::runner::Runner;
use crate::util;

const DEFAULT_MIN_CLIP_SECS: u32 = 30;
const DEFAULT_MAX_CLIP_SECS: u32 = 180;

const CLIPPER_PROMPT: &str = "你是一个专业的视频剪辑师和内容分析专家。\
我将提供一份长视频的字幕文本。请根据内容的语义和话题转换点，将其拆分为多个独立主题的精彩片段。\n\
要求：\n\
1. 完整性：片段必须包含完整的话题论述，不要在句子中间截断。\n\
2. 独立性：每个片段应能独立成片。\n\
3. 时长控制：每个片段建议在 {min} 到 {max} 秒之间。\n\
4. 输出严格的 JSON 数组，结构如下：\n\
[{\"id\": 1, \"start\": \"HH:MM:SS\", \"end\": \"HH:MM:SS\", \"title\": \"片段标题\", \"summary\": \"片段摘要\", \"reason\": \"切分理由\"}]\n\n\
以下是字幕内容：\n{text}";

/// One proposed clip, as returned by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipProposal {
    pub id: i32,
    pub start: String,
    pub end: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub duration: i64,
}

#[derive(Debug, Clone)]
pub struct ClipperSession {
    pub video_id: String,
    pub video_title: String,
    pub master_video_path: Option<PathBuf>,
    pub subtitle_path: PathBuf,
    pub clips: Vec<ClipProposal>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeResult {
    pub video_title: String,
    pub duration: String,
    pub clips: Vec<ClipProposal>,
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct ClipperConfig {
    pub min_clip_secs: u32,
    pub max_clip_secs: u32,
}

impl Default for ClipperConfig {
    fn default() -> Self {
        Self {
            min_clip_secs: DEFAULT_MIN_CLIP_SECS,
            max_clip_secs: DEFAULT_MAX_CLIP_SECS,
        }
    }
}

pub struct SmartClipper {
    config: ClipperConfig,
    sessions: Mutex<HashMap<String, ClipperSession>>,
}

impl SmartClipper {
    pub fn new(config: ClipperConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Download subtitles only, ask the LLM for topical clips and cache
    /// the proposal under a fresh token.
    pub async fn analyze(
        &self,
        ctx: &PipelineContext,
        url: &str,
    ) -> Result<AnalyzeResult, AppError> {
        info!(url, "smart clipper analysis started");

        let temp_dir = ctx
            .paths
            .cache_dir
            .join("temp_analysis")
            .join(util::rand_suffix(8));
        std::fs::create_dir_all(&temp_dir).map_err(|e| {
            AppError::wrap(code::FILE_WRITE, "创建临时目录失败 Failed to create temp dir", e)
        })?;

        let (metadata, subtitle_path) = ctx
            .downloader
            .download_subtitles_only(url, &temp_dir)
            .await
            .map_err(|e| {
                AppError::wrap(code::SUBTITLE_NOT_FOUND, "未找到字幕 No subtitles found", e)
            })?;

        let raw = std::fs::read_to_string(&subtitle_path).map_err(|e| {
            AppError::wrap(code::SUBTITLE_NOT_FOUND, "读取字幕失败 Failed to read subtitles", e)
        })?;
        let text = clean_vtt(&raw);

        let prompt = CLIPPER_PROMPT
            .replace("{min}", &self.config.min_clip_secs.to_string())
            .replace("{max}", &self.config.max_clip_secs.to_string())
            .replace("{text}", &text);

        let reply = ctx.chat.chat("", &prompt).await.map_err(|e| {
            AppError::wrap(code::CLIP_ANALYSIS_FAILED, "智能切片分析失败 Clip analysis failed", e)
        })?;
        let clips: Vec<ClipProposal> =
            serde_json::from_str(util::extract_json(&reply)).map_err(|e| {
                AppError::wrap(
                    code::CLIP_ANALYSIS_FAILED,
                    "解析AI响应失败 Failed to parse AI response",
                    e,
                )
                .with_detail(reply.chars().take(512).collect::<String>())
            })?;

        let token = Uuid::new_v4().to_string();
        let session = ClipperSession {
            video_id: metadata.id.clone(),
            video_title: metadata.title.clone(),
            master_video_path: None,
            subtitle_path,
            clips: clips.clone(),
            created_at: Utc::now(),
        };
        self.sessions
            .lock()
            .expect("clipper session lock poisoned")
            .insert(token.clone(), session);

        Ok(AnalyzeResult {
            video_title: metadata.title,
            duration: format!("{:.0}", metadata.duration),
            clips,
            token,
        })
    }

    /// Cut the selected clips out of the (lazily downloaded) master
    /// video and start one child pipeline task per clip.
    pub async fn submit(
        &self,
        ctx: &PipelineContext,
        runner: &Runner,
        token: &str,
        selected_clip_ids: &[i32],
        template: SubmitRequest,
    ) -> Result<Vec<String>, AppError> {
        let session = self
            .sessions
            .lock()
            .expect("clipper session lock poisoned")
            .get(token)
            .cloned()
            .ok_or_else(|| {
                AppError::new(code::NOT_FOUND, "会话已过期 Session expired or invalid token")
            })?;

        let master_task_id = format!("master_{}", session.video_id);
        let master_dir = ctx.paths.task_dir(&master_task_id);
        std::fs::create_dir_all(&master_dir).map_err(|e| {
            AppError::wrap(code::FILE_WRITE, "创建任务目录失败 Failed to create master dir", e)
        })?;

        let master_video = master_dir.join("master.mp4");
        if !master_video.exists() {
            let watch_url = format!("https://www.youtube.com/watch?v={}", session.video_id);
            ctx.downloader
                .download_video(&watch_url, &master_video)
                .await
                .map_err(|e| {
                    AppError::wrap(code::VIDEO_DOWNLOAD, "主视频下载失败 Master download failed", e)
                })?;
        }
        self.sessions
            .lock()
            .expect("clipper session lock poisoned")
            .entry(token.to_owned())
            .and_modify(|s| s.master_video_path = Some(master_video.clone()));

        let video = ctx.video_tools();
        let mut child_task_ids = Vec::new();
        for clip_id in selected_clip_ids {
            let Some(clip) = session.clips.iter().find(|c| c.id == *clip_id) else {
                warn!(clip_id, "selected clip not in session, skipping");
                continue;
            };

            let child_task_id = format!("clip_{}_{}", session.video_id, clip_id);
            let child_dir = ctx.paths.task_dir(&child_task_id);
            if let Err(e) = std::fs::create_dir_all(&child_dir) {
                error!(child_task_id, error = %e, "creating clip task dir failed");
                continue;
            }

            // The cut lives inside the child task directory, so
            // deleting the child task removes it.
            let cut_path = child_dir.join("origin_video.mp4");
            if let Err(e) = video
                .cut_stream_copy(&master_video, &clip.start, &clip.end, &cut_path)
                .await
            {
                error!(child_task_id, error = %e, "clip cut failed");
                continue;
            }

            let mut request = template.clone();
            request.url = format!("local:{}", cut_path.display());
            request.reuse_task_id = child_task_id.clone();

            match pipeline::submit(ctx, request).await {
                Ok(submitted) => match runner.submit(submitted.param) {
                    Ok(()) => child_task_ids.push(child_task_id),
                    Err(e) => error!(child_task_id, error = %e, "enqueueing clip task failed"),
                },
                Err(e) => error!(child_task_id, error = %e, "starting clip task failed"),
            }
        }

        Ok(child_task_ids)
    }

    #[cfg(test)]
    fn insert_session(&self, token: &str, session: ClipperSession) {
        self.sessions
            .lock()
            .unwrap()
            .insert(token.to_owned(), session);
    }
}

/// Strip VTT framing down to the spoken text: the `WEBVTT` header, cue
/// timing lines and blank lines are dropped.
pub fn clean_vtt(content: &str) -> String {
    let mut out = String::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line == "WEBVTT" || line.contains("-->") {
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing;

    #[test]
    fn vtt_cleanup_drops_framing() {
        let vtt = "WEBVTT\n\n00:00:01.000 --> 00:00:03.000\nfirst line\n\n00:00:03.000 --> 00:00:05.000\nsecond line\n";
        assert_eq!(clean_vtt(vtt), "first line\nsecond line\n");
    }

    #[test]
    fn clip_proposals_parse_from_fenced_reply() {
        let reply = "Here you go:\n```json\n[{\"id\":1,\"start\":\"00:00:10\",\"end\":\"00:01:40\",\"title\":\"开场\",\"summary\":\"简介\",\"reason\":\"话题切换\"}]\n```";
        let clips: Vec<ClipProposal> =
            serde_json::from_str(util::extract_json(reply)).unwrap();
        assert_eq!(clips.len(), 1);
        assert_eq!(clips[0].id, 1);
        assert_eq!(clips[0].start, "00:00:10");
    }

    #[tokio::test]
    async fn submit_with_unknown_token_is_not_found() {
        let world = testing::world_with(Vec::new(), Vec::new()).await;
        let clipper = SmartClipper::new(ClipperConfig::default());
        let runner = crate::runner::Runner::start_with_executor(
            crate::runner::RunnerConfig::default(),
            None,
            |_, _| Box::pin(async {}),
        );

        let err = clipper
            .submit(&world.ctx, &runner, "no-such-token", &[1], SubmitRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), code::NOT_FOUND);
        runner.close().await;
    }

    #[tokio::test]
    async fn unknown_clip_ids_are_skipped() {
        let world = testing::world_with(Vec::new(), Vec::new()).await;
        let clipper = SmartClipper::new(ClipperConfig::default());
        let runner = crate::runner::Runner::start_with_executor(
            crate::runner::RunnerConfig::default(),
            None,
            |_, _| Box::pin(async {}),
        );

        // A session whose master video already "exists" avoids the
        // downloader; an empty clip list means every id misses.
        let master_dir = world.ctx.paths.task_dir("master_vid123");
        std::fs::create_dir_all(&master_dir).unwrap();
        std::fs::write(master_dir.join("master.mp4"), b"video").unwrap();
        clipper.insert_session(
            "tok",
            ClipperSession {
                video_id: "vid123".into(),
                video_title: "title".into(),
                master_video_path: None,
                subtitle_path: PathBuf::from("/tmp/subs.vtt"),
                clips: Vec::new(),
                created_at: Utc::now(),
            },
        );

        let children = clipper
            .submit(&world.ctx, &runner, "tok", &[7, 8], SubmitRequest::default())
            .await
            .unwrap();
        assert!(children.is_empty());
        runner.close().await;
    }
}
