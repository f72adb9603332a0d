//! File endpoints: multipart upload into `uploads/` and confined
//! downloads resolved per the whitelist in [`crate::files`].

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{error, info};

use redub_core::error::code;

use crate::files::resolve_download_path;
use crate::response::{self, Envelope};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/file", post(upload))
        .route("/api/file/{*filepath}", get(download))
}

async fn upload(State(state): State<Arc<AppState>>, mut multipart: Multipart) -> Json<Envelope> {
    let upload_root = state.ctx.paths.upload_root();
    if let Err(e) = tokio::fs::create_dir_all(&upload_root).await {
        error!(error = %e, "creating upload dir failed");
        return response::failure_msg(code::FILE_WRITE, "创建上传目录失败 Failed to create upload dir");
    }

    let mut saved = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "multipart read failed");
                return response::failure_msg(code::INVALID_PARAMS, "未能获取文件 Failed to read upload");
            }
        };
        let Some(file_name) = field.file_name().map(ToOwned::to_owned) else {
            continue;
        };
        // Strip any client-provided directory part.
        let base_name = std::path::Path::new(&file_name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_owned());

        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "reading upload body failed");
                return response::failure_msg(code::FILE_WRITE, format!("文件保存失败 Failed to save {base_name}"));
            }
        };
        let target = upload_root.join(&base_name);
        if let Err(e) = tokio::fs::write(&target, &bytes).await {
            error!(error = %e, "writing upload failed");
            return response::failure_msg(code::FILE_WRITE, format!("文件保存失败 Failed to save {base_name}"));
        }
        info!(file = %target.display(), size = bytes.len(), "upload stored");
        saved.push(format!("local:{}", target.display()));
    }

    if saved.is_empty() {
        return response::failure_msg(code::INVALID_PARAMS, "未上传任何文件 No files uploaded");
    }
    response::success(serde_json::json!({ "file_path": saved }))
}

async fn download(State(state): State<Arc<AppState>>, Path(filepath): Path<String>) -> Response {
    let Some(resolved) = resolve_download_path(&state.download_roots, &filepath) else {
        return (
            StatusCode::FORBIDDEN,
            response::failure_msg(code::UNAUTHORIZED, "非法路径 Illegal path"),
        )
            .into_response();
    };
    if !resolved.found {
        return (
            StatusCode::NOT_FOUND,
            response::failure_msg(code::FILE_NOT_FOUND, "文件不存在 File not found"),
        )
            .into_response();
    }

    let file = match tokio::fs::File::open(&resolved.path).await {
        Ok(file) => file,
        Err(e) => {
            error!(path = %resolved.path.display(), error = %e, "opening download failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                response::failure_msg(code::FILE_NOT_FOUND, "文件读取失败 Failed to read file"),
            )
                .into_response();
        }
    };

    let file_name = resolved
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_owned());
    let stream = tokio_util::io::ReaderStream::new(file);
    let body = Body::from_stream(stream);

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{file_name}\""),
        )
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
