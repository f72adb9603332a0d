//! Subtitle-task endpoints: submit, poll, history, delete and retry.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use redub_core::error::{code, AppError};
use redub_core::pipeline::{self, SubmitRequest};
use redub_core::runner::RunnerError;
use redub_core::task::{Task, TaskStatus};

use crate::response::{self, Envelope};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/subtitleTask", post(start_task).get(get_task))
        .route("/history", get(history))
        .route("/task/{taskId}", delete(delete_task))
        .route("/task/{taskId}/retry", post(retry_task))
}

// ── DTOs ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StartTaskRequest {
    pub url: String,
    #[serde(default)]
    pub audio_url: String,
    pub origin_language: String,
    #[serde(default)]
    pub target_lang: String,
    #[serde(default)]
    pub bilingual: u8,
    #[serde(default)]
    pub translation_subtitle_pos: u8,
    #[serde(default)]
    pub tts: u8,
    #[serde(default)]
    pub tts_voice_code: String,
    #[serde(default)]
    pub tts_voice_clone_src_file_url: String,
    #[serde(default)]
    pub embed_subtitle_video_type: String,
    #[serde(default)]
    pub vertical_major_title: String,
    #[serde(default)]
    pub vertical_minor_title: String,
    #[serde(default)]
    pub origin_language_word_one_line: usize,
    #[serde(default)]
    pub replace: Vec<String>,
    #[serde(default)]
    pub reuse_task_id: String,
}

impl StartTaskRequest {
    pub fn into_submit_request(self) -> SubmitRequest {
        SubmitRequest {
            url: self.url,
            audio_url: self.audio_url,
            origin_language: self.origin_language,
            target_language: if self.target_lang.is_empty() {
                "none".to_owned()
            } else {
                self.target_lang
            },
            bilingual: self.bilingual == 1,
            translation_on_top: self.translation_subtitle_pos == 0,
            enable_tts: self.tts == 1,
            tts_voice_code: self.tts_voice_code,
            voice_clone_reference: self.tts_voice_clone_src_file_url,
            embed_type: self.embed_subtitle_video_type,
            vertical_major_title: self.vertical_major_title,
            vertical_minor_title: self.vertical_minor_title,
            max_word_one_line: self.origin_language_word_one_line,
            replace: self.replace,
            reuse_task_id: self.reuse_task_id,
        }
    }
}

#[derive(Debug, Serialize)]
struct StartTaskData {
    task_id: String,
}

#[derive(Debug, Deserialize)]
pub struct TaskQuery {
    #[serde(rename = "taskId")]
    task_id: String,
}

#[derive(Debug, Serialize)]
struct VideoInfo {
    title: String,
    description: String,
    translated_title: String,
    translated_description: String,
}

#[derive(Debug, Serialize)]
struct SubtitleInfo {
    name: String,
    download_url: String,
}

#[derive(Debug, Serialize)]
struct TaskStatusData {
    task_id: String,
    process_percent: u8,
    video_info: VideoInfo,
    subtitle_info: Vec<SubtitleInfo>,
    target_language: String,
    speech_download_url: String,
}

fn status_data(task: Task) -> TaskStatusData {
    TaskStatusData {
        task_id: task.task_id,
        process_percent: task.process_pct,
        video_info: VideoInfo {
            title: task.title,
            description: task.description,
            translated_title: task.translated_title,
            translated_description: task.translated_description,
        },
        subtitle_info: task
            .artifacts
            .into_iter()
            .map(|a| SubtitleInfo {
                name: a.name,
                download_url: a.download_url,
            })
            .collect(),
        target_language: task.target_language,
        speech_download_url: task.speech_download_url,
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn start_task(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartTaskRequest>,
) -> Json<Envelope> {
    info!(url = %request.url, reuse = %request.reuse_task_id, "subtitle task submission");
    submit_to_runner(&state, request.into_submit_request()).await
}

/// Shared submit + enqueue path used by both submission and retry.
pub(crate) async fn submit_to_runner(state: &Arc<AppState>, request: SubmitRequest) -> Json<Envelope> {
    let submitted = match pipeline::submit(&state.ctx, request).await {
        Ok(submitted) => submitted,
        Err(e) => {
            error!(error = %e, "submission rejected");
            return response::failure(&e);
        }
    };

    let task_id = submitted.task_id.clone();
    match state.runner.submit(submitted.param) {
        Ok(()) => response::success(StartTaskData { task_id }),
        Err(RunnerError::QueueFull) => {
            let err = AppError::new(code::RATE_LIMITED, "任务队列已满 Task queue is full");
            mark_submit_failed(state, &task_id, &err).await;
            response::failure(&err)
        }
        Err(RunnerError::Stopped) => {
            let err = AppError::new(code::UNKNOWN, "服务正在关闭 Server is shutting down");
            mark_submit_failed(state, &task_id, &err).await;
            response::failure(&err)
        }
    }
}

/// A task that never reached a worker still gets a terminal record.
async fn mark_submit_failed(state: &Arc<AppState>, task_id: &str, err: &AppError) {
    if let Ok(Some(mut task)) = state.ctx.store.get(task_id).await {
        task.status = TaskStatus::Failed;
        task.fail_reason = err.message().to_owned();
        task.status_message = "任务失败 Failed".into();
        if let Err(e) = state.ctx.store.save(&task).await {
            error!(task_id, error = %e, "failed to persist rejected task");
        }
    }
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TaskQuery>,
) -> Json<Envelope> {
    match state.ctx.store.get(&query.task_id).await {
        Ok(Some(task)) if task.status == TaskStatus::Failed => response::failure_msg(
            code::UNKNOWN,
            format!("任务失败，原因：{}", task.fail_reason),
        ),
        Ok(Some(task)) => response::success(status_data(task)),
        Ok(None) => response::failure_msg(code::NOT_FOUND, "任务不存在 Task not found"),
        Err(e) => {
            error!(task_id = %query.task_id, error = %e, "task lookup failed");
            response::failure_msg(code::DB_ERROR, "数据库错误 Database error")
        }
    }
}

async fn history(State(state): State<Arc<AppState>>) -> Json<Envelope> {
    match state.ctx.store.list(200).await {
        Ok(tasks) => response::success(tasks),
        Err(e) => {
            error!(error = %e, "history lookup failed");
            response::failure_msg(code::DB_ERROR, "获取历史记录失败 Failed to load history")
        }
    }
}

async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Json<Envelope> {
    let task = match state.ctx.store.get(&task_id).await {
        Ok(Some(task)) => task,
        Ok(None) => return response::failure_msg(code::NOT_FOUND, "任务不存在 Task not found"),
        Err(e) => {
            error!(task_id, error = %e, "task lookup failed");
            return response::failure_msg(code::DB_ERROR, "数据库错误 Database error");
        }
    };

    // A running task owns its working directory; refuse to pull it out
    // from under the worker.
    if task.status == TaskStatus::Running {
        return response::failure_msg(
            code::INVALID_PARAMS,
            "任务正在运行，无法删除 Cannot delete a running task",
        );
    }

    let task_dir = state.ctx.paths.task_dir(&task_id);
    if let Err(e) = tokio::fs::remove_dir_all(&task_dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            error!(task_id, error = %e, "removing task dir failed");
        }
    }

    match state.ctx.store.delete(&task_id).await {
        Ok(()) => response::success(serde_json::json!({})),
        Err(e) => {
            error!(task_id, error = %e, "task delete failed");
            response::failure_msg(code::DB_ERROR, "删除记录失败 Failed to delete task")
        }
    }
}

async fn retry_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Json<Envelope> {
    let task = match state.ctx.store.get(&task_id).await {
        Ok(Some(task)) => task,
        Ok(None) => return response::failure_msg(code::NOT_FOUND, "任务不存在 Task not found"),
        Err(e) => {
            error!(task_id, error = %e, "task lookup failed");
            return response::failure_msg(code::DB_ERROR, "数据库错误 Database error");
        }
    };

    if !task.status.is_terminal() {
        return response::failure_msg(
            code::INVALID_PARAMS,
            "只能重试失败或已完成的任务 Only failed or succeeded tasks can be retried",
        );
    }

    // Preserve the working directory; stages skip over artifacts that
    // already exist. Voice code falls back to a safe default for
    // records predating persistence.
    let voice_code = if task.tts_voice_code.is_empty() {
        "zh-CN-XiaoxiaoNeural".to_owned()
    } else {
        task.tts_voice_code.clone()
    };

    let request = SubmitRequest {
        url: task.source_url.clone(),
        origin_language: task.origin_language.clone(),
        target_language: if task.target_language.is_empty() {
            "none".to_owned()
        } else {
            task.target_language.clone()
        },
        bilingual: true,
        translation_on_top: true,
        enable_tts: true,
        tts_voice_code: voice_code,
        embed_type: "all".to_owned(),
        reuse_task_id: task.task_id.clone(),
        ..Default::default()
    };

    info!(task_id, "retrying task");
    submit_to_runner(&state, request).await
}
