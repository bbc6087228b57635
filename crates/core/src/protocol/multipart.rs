//! `multipart/x-mixed-replace` framing for MJPEG over HTTP.
//!
//! Browsers render each part in place of the previous one, so an `<img>`
//! pointed at the stream shows live video with no script. Each chunk is:
//!
//! ```text
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: 5120\r\n
//! \r\n
//! <5120 bytes of JPEG>\r\n
//! ```

use axum::http::{HeaderMap, HeaderValue, header};
use bytes::{BufMut, Bytes, BytesMut};

/// Boundary token separating parts.
pub const BOUNDARY: &str = "frame";

/// `Content-Type` of the response that carries the parts.
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// `Content-Type` of every part.
pub const PART_CONTENT_TYPE: &str = "image/jpeg";

/// Encode one frame payload as a complete multipart chunk.
pub fn encode_chunk(payload: &[u8]) -> Bytes {
    let head = format!(
        "--{BOUNDARY}\r\nContent-Type: {PART_CONTENT_TYPE}\r\nContent-Length: {}\r\n\r\n",
        payload.len()
    );

    let mut chunk = BytesMut::with_capacity(head.len() + payload.len() + 2);
    chunk.put_slice(head.as_bytes());
    chunk.put_slice(payload);
    chunk.put_slice(b"\r\n");
    chunk.freeze()
}

/// Response headers for a live stream: multipart type and no caching.
///
/// Transfer framing (chunked for HTTP/1.1) is chosen by the HTTP layer
/// because the body length is unknown.
pub fn stream_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    headers.insert(
        header::HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    headers
}
