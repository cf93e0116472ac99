//! Reply classification
//!
//! | Query  | Status                 | Verdict          |
//! |--------|------------------------|------------------|
//! | bulk   | 2xx                    | Success          |
//! | bulk   | 400, 403, 413, 414     | ShapeRejected    |
//! | single | 2xx                    | Success          |
//! | single | 404                    | NotFound         |
//! | single | 403, 451               | Blocked          |
//! | any    | anything else          | Unexpected       |
//!
//! 429 never reaches classification: the gate absorbs it.

use reqwest::StatusCode;

/// How a worker should treat a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Parse the body and record counts
    Success,

    /// The batch was refused because of its size or shape: split or demote
    ShapeRejected,

    /// The package does not exist (e.g. unpublished): drop it
    NotFound,

    /// The package is permanently refused: record it as blocked
    Blocked,

    /// Anything else: requeue and count an unexpected error
    Unexpected,
}

/// Classifies the reply to a bulk query
pub fn classify_bulk(status: StatusCode) -> Verdict {
    if status.is_success() {
        return Verdict::Success;
    }
    match status {
        StatusCode::BAD_REQUEST
        | StatusCode::FORBIDDEN
        | StatusCode::PAYLOAD_TOO_LARGE
        | StatusCode::URI_TOO_LONG => Verdict::ShapeRejected,
        _ => Verdict::Unexpected,
    }
}

/// Classifies the reply to a single-name query
pub fn classify_single(status: StatusCode) -> Verdict {
    if status.is_success() {
        return Verdict::Success;
    }
    match status {
        StatusCode::NOT_FOUND => Verdict::NotFound,
        StatusCode::FORBIDDEN | StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS => Verdict::Blocked,
        _ => Verdict::Unexpected,
    }
}
