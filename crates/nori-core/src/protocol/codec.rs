//! envelope <-> Request / Response の変換
//!
//! 受け付ける content type は `application/json` だけ。

use thiserror::Error;

use super::celery::{CeleryResult, CeleryTask};
use crate::domain::{Request, Response};

pub const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("delivery has no content type")]
    MissingContentType,

    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// delivery の body を Request にする。
///
/// 返された Request はまだ delivery handle を持たない。Transport が結びつける。
pub fn decode(
    body: &[u8],
    content_type: Option<&str>,
    reply_to: Option<&str>,
) -> Result<Request, CodecError> {
    match content_type {
        None | Some("") => return Err(CodecError::MissingContentType),
        Some(JSON_CONTENT_TYPE) => {}
        Some(other) => return Err(CodecError::UnsupportedContentType(other.to_string())),
    }

    let task: CeleryTask = serde_json::from_slice(body)?;
    Ok(task.into_request(reply_to))
}

pub fn encode(response: &Response) -> Result<CeleryResult, CodecError> {
    if response.id().is_empty() {
        return Err(CodecError::InvalidResponse("response has no task id".to_string()));
    }

    Ok(CeleryResult {
        status: response.status().as_str().to_uppercase(),
        traceback: None,
        result: response.body().clone(),
        task_id: response.id().to_string(),
        children: Vec::new(),
    })
}

/// reply の body（JSON バイト列）
pub fn encode_to_vec(response: &Response) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(&encode(response)?)?)
}
