//! Response status classification.

use crate::constants::STATUS_RESUME_INCOMPLETE;

/// How the client should treat a chunk response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// The chunk was stored (200, 201, 204, 206).
    Accepted,
    /// The server kept a prefix; compare its `Range` header to the chunk (308).
    ResumeIncomplete,
    /// Throttling or overload (408, 429, 501, 502, 503): back off and retry.
    Busy,
    /// Anything else: a failed attempt.
    Rejected,
}

/// Classifies an HTTP status code.
pub fn classify_status(status: u16) -> ResponseClass {
    match status {
        200 | 201 | 204 | 206 => ResponseClass::Accepted,
        STATUS_RESUME_INCOMPLETE => ResponseClass::ResumeIncomplete,
        408 | 429 | 501 | 502 | 503 => ResponseClass::Busy,
        _ => ResponseClass::Rejected,
    }
}
