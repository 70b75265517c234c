//! Tagged echo responses.

use bytes::{BufMut, BytesMut};

/// Text between the strategy tag and the echoed payload.
pub const RECEIVED_MARKER: &str = "服务器已收到: ";

/// Write `[<tag>] 服务器已收到: <payload>` into `output`.
///
/// The payload is decoded as UTF-8; invalid sequences become U+FFFD so the
/// response is always valid text.
pub fn format_response(tag: &str, payload: &[u8], output: &mut BytesMut) {
    let text = String::from_utf8_lossy(payload);
    output.reserve(tag.len() + RECEIVED_MARKER.len() + text.len() + 3);
    output.put_u8(b'[');
    output.put_slice(tag.as_bytes());
    output.put_slice(b"] ");
    output.put_slice(RECEIVED_MARKER.as_bytes());
    output.put_slice(text.as_bytes());
}
