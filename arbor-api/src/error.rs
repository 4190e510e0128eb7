use anyhow::{anyhow, Context};
use serde_json::json;

use crate::CommentId;

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Comment not found {0:?}")]
    NotFound(CommentId),

    #[error("Sibling index {0} does not fit in a path segment")]
    Overflow(u64),

    #[error("Malformed path segment {0:?}")]
    MalformedSegment(String),

    #[error("Comment tree was modified concurrently")]
    ConcurrentModification,

    #[error("Inconsistent comment tree: {0}")]
    InconsistentState(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Error {
        Error::Validation(msg.into())
    }

    /// Whether the comment tree service may retry the whole operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ConcurrentModification)
    }

    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Overflow(_) => StatusCode::CONFLICT,
            Error::MalformedSegment(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::ConcurrentModification => StatusCode::CONFLICT,
            Error::InconsistentState(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        serde_json::to_vec(&match self {
            Error::Unknown(msg) => json!({
                "message": msg,
                "type": "unknown",
            }),
            Error::Validation(msg) => json!({
                "message": msg,
                "type": "validation",
            }),
            Error::NotFound(id) => json!({
                "message": "comment not found",
                "type": "not-found",
                "id": id,
            }),
            Error::Overflow(idx) => json!({
                "message": "no more room for siblings at this level",
                "type": "overflow",
                "index": idx,
            }),
            Error::MalformedSegment(seg) => json!({
                "message": "stored path is malformed",
                "type": "malformed-segment",
                "segment": seg,
            }),
            Error::ConcurrentModification => json!({
                "message": "comment tree was modified concurrently, try again",
                "type": "concurrent-modification",
            }),
            Error::InconsistentState(msg) => json!({
                "message": msg,
                "type": "inconsistent-state",
            }),
        })
        .expect("serializing error")
    }

    pub fn parse(body: &[u8]) -> anyhow::Result<Error> {
        let data: serde_json::Value =
            serde_json::from_slice(body).context("parsing error contents")?;
        let message = || {
            String::from(
                data.get("message")
                    .and_then(|msg| msg.as_str())
                    .unwrap_or(""),
            )
        };
        Ok(
            match data
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow!("error type is not a string"))?
            {
                "unknown" => Error::Unknown(message()),
                "validation" => Error::Validation(message()),
                "not-found" => Error::NotFound(CommentId(
                    data.get("id")
                        .and_then(|id| id.as_i64())
                        .ok_or_else(|| anyhow!("error is a not-found without an id"))?,
                )),
                "overflow" => Error::Overflow(
                    data.get("index")
                        .and_then(|idx| idx.as_u64())
                        .ok_or_else(|| anyhow!("error is an overflow without an index"))?,
                ),
                "malformed-segment" => Error::MalformedSegment(String::from(
                    data.get("segment")
                        .and_then(|s| s.as_str())
                        .ok_or_else(|| anyhow!("error is a malformed segment without a segment"))?,
                )),
                "concurrent-modification" => Error::ConcurrentModification,
                "inconsistent-state" => Error::InconsistentState(message()),
                _ => return Err(anyhow!("error contents has unknown type")),
            },
        )
    }
}

/// Failure of a comment tree operation: either a well-known error that can be
/// returned to the client, or an opaque failure of the backing store
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error(transparent)]
    Api(#[from] Error),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl TreeError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TreeError::Api(e) => e.is_retryable(),
            TreeError::Store(_) => false,
        }
    }
}
