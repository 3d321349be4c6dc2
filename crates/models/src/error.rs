use thiserror::Error;

use crate::comment::MAX_COMMENT_LEN;

/// Validation failures raised before any state is touched. Messages carry the
/// `validation` marker so they short-circuit the retry classifier if a caller
/// ever routes one through the queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("validation failed: comment content exceeds {MAX_COMMENT_LEN} characters")]
    ContentTooLong,
    #[error("validation failed: comment content is empty")]
    ContentEmpty,
    #[error("validation failed: text range {start}..{end} is not a valid span")]
    InvalidTextRange { start: i64, end: i64 },
    #[error("validation failed: text range is missing one endpoint")]
    HalfOpenTextRange,
}
