//! Wire rules for resumable chunked uploads.
//!
//! Everything a client needs to speak the byte-range acknowledgement
//! protocol: request header rendering, `Range` acknowledgement parsing,
//! response status classification and chunk-size bounds.

pub mod constants;
pub mod content_type;
pub mod range;
pub mod status;

// Re-export primary types for convenience.
pub use content_type::detect_content_type;
pub use range::{ByteRange, ProtocolError, parse_acknowledged_end};
pub use status::{ResponseClass, classify_status};
