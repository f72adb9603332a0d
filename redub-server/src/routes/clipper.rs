//! Smart-clipper endpoints: analyze a long video's transcript into
//! proposed clips, then fan selected clips out as child tasks.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{error, info};

use crate::response::{self, Envelope};
use crate::routes::capability::StartTaskRequest;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/analyze", post(analyze))
        .route("/submit", post(submit))
}

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    url: String,
}

#[derive(Debug, Deserialize)]
struct SubmitClipsRequest {
    token: String,
    selected_clip_ids: Vec<i32>,
    task_params: StartTaskRequest,
}

async fn analyze(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AnalyzeRequest>,
) -> Json<Envelope> {
    info!(url = %request.url, "smart clipper analyze");
    match state.clipper.analyze(&state.ctx, &request.url).await {
        Ok(result) => response::success(result),
        Err(e) => {
            error!(error = %e, "clip analysis failed");
            response::failure(&e)
        }
    }
}

async fn submit(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmitClipsRequest>,
) -> Json<Envelope> {
    info!(
        token = %request.token,
        clips = request.selected_clip_ids.len(),
        "smart clipper submit"
    );
    let template = request.task_params.into_submit_request();
    match state
        .clipper
        .submit(
            &state.ctx,
            &state.runner,
            &request.token,
            &request.selected_clip_ids,
            template,
        )
        .await
    {
        Ok(task_ids) => response::success(serde_json::json!({ "task_ids": task_ids })),
        Err(e) => {
            error!(error = %e, "clip submit failed");
            response::failure(&e)
        }
    }
}
