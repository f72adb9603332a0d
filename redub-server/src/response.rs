//! The response envelope every API endpoint speaks.
//!
//! `{error, msg, detail?, data}` with `error = 0` for success. The
//! transport status stays 200 for business errors; clients dispatch on
//! the numeric code. Only the raw file endpoint uses real HTTP status
//! codes.

use axum::Json;
use serde::Serialize;
use serde_json::Value;

use redub_core::error::{code, AppError};

#[derive(Debug, Serialize)]
pub struct Envelope {
    pub error: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub data: Value,
}

pub fn success<T: Serialize>(data: T) -> Json<Envelope> {
    Json(Envelope {
        error: code::SUCCESS,
        msg: "成功 OK".to_owned(),
        detail: None,
        data: serde_json::to_value(data).unwrap_or(Value::Null),
    })
}

pub fn failure(err: &AppError) -> Json<Envelope> {
    Json(Envelope {
        error: err.code(),
        msg: err.message().to_owned(),
        detail: err.detail().map(str::to_owned),
        data: Value::Null,
    })
}

pub fn failure_msg(error_code: i32, msg: impl Into<String>) -> Json<Envelope> {
    Json(Envelope {
        error: error_code,
        msg: msg.into(),
        detail: None,
        data: Value::Null,
    })
}
