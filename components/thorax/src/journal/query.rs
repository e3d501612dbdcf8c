//! Search query construction for the journal's query language.

// Local crates
use crate::journal::models::{Order, SearchRequest};

/// Excludes cursor checkpoint entries from every entry fetch.
pub const EXCLUDE_CURSORS_FILTER: &str = "not tag:type:cursor";

/// Normalize a stored/display timestamp into the journal query grammar.
///
/// `2023-01-02 00:00:00` becomes `2023-01-02T00:00:00`.
pub fn clean_timestamp(raw_timestamp: &str) -> String {
    raw_timestamp.replace(' ', "T")
}

/// Build the entry query: cursor exclusion ANDed with an optional strict
/// lower bound on creation time.
pub fn entries_query(cursor: Option<&str>) -> String {
    match cursor.map(str::trim).filter(|c| !c.is_empty()) {
        Some(cursor) => format!(
            "{EXCLUDE_CURSORS_FILTER} created_at:>{}",
            clean_timestamp(cursor)
        ),
        None => EXCLUDE_CURSORS_FILTER.to_string(),
    }
}

/// Page request for the sync loop. Always ascending so the last entry of
/// the last page is the newest one forwarded.
pub fn entries_request(cursor: Option<&str>, limit: u64, offset: u64) -> SearchRequest {
    SearchRequest {
        query: entries_query(cursor),
        limit,
        offset,
        order: Order::Asc,
        include_content: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_without_cursor_only_excludes_checkpoints() {
        assert_eq!(entries_query(None), "not tag:type:cursor");
        assert_eq!(entries_query(Some("")), "not tag:type:cursor");
        assert_eq!(entries_query(Some("   ")), "not tag:type:cursor");
    }

    #[test]
    fn query_with_cursor_adds_cleaned_lower_bound() {
        assert_eq!(
            entries_query(Some("2023-01-02 00:00:00")),
            "not tag:type:cursor created_at:>2023-01-02T00:00:00"
        );
        assert_eq!(
            entries_query(Some("2023-01-02T00:00:00.5+00:00")),
            "not tag:type:cursor created_at:>2023-01-02T00:00:00.5+00:00"
        );
    }

    #[test]
    fn entries_request_is_ascending_without_content() {
        let request = entries_request(Some("2023-01-01 00:00:00"), 50, 100);
        assert_eq!(request.order, Order::Asc);
        assert!(!request.include_content);
        assert_eq!(request.limit, 50);
        assert_eq!(request.offset, 100);
        assert!(request.query.starts_with(EXCLUDE_CURSORS_FILTER));
    }
}
