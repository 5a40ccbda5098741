//! Opaque cursor pagination for `*/list` operations.
//!
//! Cursors are server-generated base64url strings wrapping an offset into
//! the insertion-ordered listing snapshot. Items registered between pages
//! may be seen again, but never skipped (at-least-once across pages).

use crate::error::ProtocolError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Default page size when a listing is split across pages.
pub const DEFAULT_PAGE_SIZE: usize = 50;

const CURSOR_PREFIX: &str = "o:";

/// Encode an offset as an opaque cursor.
pub fn encode_cursor(offset: usize) -> String {
    URL_SAFE_NO_PAD.encode(format!("{CURSOR_PREFIX}{offset}"))
}

/// Decode an opaque cursor back to an offset.
pub fn decode_cursor(cursor: &str) -> Result<usize, ProtocolError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| ProtocolError::InvalidParams(format!("malformed cursor: {cursor}")))?;
    let text = String::from_utf8(bytes)
        .map_err(|_| ProtocolError::InvalidParams(format!("malformed cursor: {cursor}")))?;
    text.strip_prefix(CURSOR_PREFIX)
        .and_then(|offset| offset.parse().ok())
        .ok_or_else(|| ProtocolError::InvalidParams(format!("malformed cursor: {cursor}")))
}

/// Slice one page out of a listing snapshot.
///
/// Returns the page plus the cursor for the next page, if any items remain.
pub fn paginate<T: Clone>(
    items: &[T],
    cursor: Option<&str>,
    page_size: usize,
) -> Result<(Vec<T>, Option<String>), ProtocolError> {
    let offset = match cursor {
        Some(cursor) => decode_cursor(cursor)?,
        None => 0,
    };
    if offset >= items.len() {
        return Ok((Vec::new(), None));
    }
    let end = (offset + page_size).min(items.len());
    let page = items[offset..end].to_vec();
    let next = (end < items.len()).then(|| encode_cursor(end));
    Ok((page, next))
}
