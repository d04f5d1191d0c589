//! Protocol constants shared by the client engine and its front ends.

/// HTTP method used for every chunk request.
pub const CHUNK_METHOD: &str = "PUT";

/// Header carrying the byte range of the chunk being sent.
pub const CONTENT_RANGE_HEADER: &str = "Content-Range";

/// Header carrying the media type of the uploaded file.
pub const CONTENT_TYPE_HEADER: &str = "Content-Type";

/// Header the server uses to acknowledge partial receipt (lowercase, as
/// transports normalize response header names).
pub const RANGE_HEADER: &str = "range";

/// Resumable-continue status: the server kept a prefix of the upload.
pub const STATUS_RESUME_INCOMPLETE: u16 = 308;

/// Smallest chunk size accepted, in KiB (5 MiB).
pub const MIN_CHUNK_SIZE_KB: u64 = 5 * 1024;

/// Largest chunk size accepted, in KiB (500 MiB).
pub const MAX_CHUNK_SIZE_KB: u64 = 512_000;

/// Chunk size used when the caller does not pick one, in KiB (16 MiB).
pub const DEFAULT_CHUNK_SIZE_KB: u64 = 16 * 1024;

/// Default number of retries for a single chunk before the upload fails.
pub const DEFAULT_MAX_CHUNK_RETRIES: u32 = 5;

/// Default ceiling on consecutive server-busy responses.
pub const DEFAULT_MAX_SERVER_BACKOFFS: u32 = 5;
