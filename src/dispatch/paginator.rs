//! Cursor pagination for list-style methods.
//!
//! A cursor is the base64 encoding of `offset=<n>`. Clients treat it as
//! opaque.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::warn;

/// One page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

pub fn encode_cursor(offset: usize) -> String {
    STANDARD.encode(format!("offset={offset}"))
}

/// Decode a cursor back into an offset. `None` for anything malformed.
pub fn decode_cursor(cursor: &str) -> Option<usize> {
    let bytes = STANDARD.decode(cursor).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    text.strip_prefix("offset=")?.parse().ok()
}

/// Slice `items` starting at the cursor's offset.
///
/// Bad cursors fall back to offset 0. `next_cursor` is set only when this
/// page returned something and more items remain.
pub fn paginate<T: Clone>(items: &[T], cursor: Option<&str>, limit: usize) -> Page<T> {
    let offset = match cursor {
        None => 0,
        Some(cursor) => decode_cursor(cursor).unwrap_or_else(|| {
            warn!(cursor, "malformed pagination cursor, starting from the beginning");
            0
        }),
    };

    let start = offset.min(items.len());
    let end = start.saturating_add(limit).min(items.len());
    let page = items[start..end].to_vec();

    let next_cursor = (!page.is_empty() && end < items.len()).then(|| encode_cursor(end));
    Page {
        items: page,
        next_cursor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbers(n: usize) -> Vec<usize> {
        (0..n).collect()
    }

    #[test]
    fn test_cursor_encoding() {
        assert_eq!(encode_cursor(20), "b2Zmc2V0PTIw");
        assert_eq!(decode_cursor("b2Zmc2V0PTIw"), Some(20));
    }

    #[test]
    fn test_first_page_has_next_cursor() {
        let page = paginate(&numbers(5), None, 2);
        assert_eq!(page.items, vec![0, 1]);
        assert_eq!(page.next_cursor.as_deref().and_then(decode_cursor), Some(2));
    }

    #[test]
    fn test_walks_all_pages() {
        let items = numbers(5);
        let mut cursor = None;
        let mut seen = Vec::new();
        loop {
            let page = paginate(&items, cursor.as_deref(), 2);
            seen.extend(page.items);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, items);
    }

    #[test]
    fn test_last_page_has_no_cursor() {
        let page = paginate(&numbers(4), Some(encode_cursor(2).as_str()), 2);
        assert_eq!(page.items, vec![2, 3]);
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn test_malformed_cursors_fail_open() {
        let items = numbers(3);
        let not_a_number = STANDARD.encode("offset=abc");
        for bad in ["!!!", "", "bm9wZQ==", not_a_number.as_str()] {
            let page = paginate(&items, Some(bad), 2);
            assert_eq!(page.items, vec![0, 1], "cursor {bad:?}");
        }
    }

    #[test]
    fn test_offset_past_end() {
        let page = paginate(&numbers(3), Some(encode_cursor(10).as_str()), 2);
        assert!(page.items.is_empty());
        assert!(page.next_cursor.is_none());
    }
}
