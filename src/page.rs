// Pagination parameters for the list and search operations

use crate::models::Task;
use thiserror::Error;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
    #[error("invalid lastId '{0}'")]
    InvalidCursor(String),
    #[error("invalid limit '{0}' (must be 1-100)")]
    InvalidLimit(String),
}

/// Keyset page request: rows after `after` (a `sequential_id`), at most `limit` of them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub after: i64,
    pub limit: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            after: 0,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    pub fn new(after: i64, limit: u32) -> Result<Self, PageError> {
        if after < 0 {
            return Err(PageError::InvalidCursor(after.to_string()));
        }
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(PageError::InvalidLimit(limit.to_string()));
        }
        Ok(Self { after, limit })
    }

    /// Parse raw query-string values; missing or empty values take the defaults
    pub fn parse(last_id: Option<&str>, limit: Option<&str>) -> Result<Self, PageError> {
        let after = match last_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|v| *v >= 0)
                .ok_or_else(|| PageError::InvalidCursor(raw.to_string()))?,
            None => 0,
        };

        let limit = match limit.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|v| (1..=MAX_PAGE_SIZE).contains(v))
                .ok_or_else(|| PageError::InvalidLimit(raw.to_string()))?,
            None => DEFAULT_PAGE_SIZE,
        };

        Ok(Self { after, limit })
    }

    /// Cursor for the page after `page`, or `None` if `page` was empty
    pub fn next_after(page: &[Task]) -> Option<i64> {
        page.last().map(|task| task.sequential_id)
    }
}

/// Search request; a blank query falls back to plain listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub page: PageRequest,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, page: PageRequest) -> Self {
        Self {
            query: query.into(),
            page,
        }
    }

    /// The trimmed query, or `None` when there is nothing to search for
    pub fn query(&self) -> Option<&str> {
        let query = self.query.trim();
        if query.is_empty() { None } else { Some(query) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let page = PageRequest::parse(None, None).unwrap();
        assert_eq!(page, PageRequest::default());
        assert_eq!(page.after, 0);
        assert_eq!(page.limit, 10);

        let page = PageRequest::parse(Some(""), Some("  ")).unwrap();
        assert_eq!(page, PageRequest::default());
    }

    #[test]
    fn test_parse_values() {
        let page = PageRequest::parse(Some("42"), Some("100")).unwrap();
        assert_eq!(page.after, 42);
        assert_eq!(page.limit, 100);
    }

    #[test]
    fn test_parse_rejects_bad_cursor() {
        assert_eq!(
            PageRequest::parse(Some("-1"), None),
            Err(PageError::InvalidCursor("-1".to_string()))
        );
        assert!(matches!(
            PageRequest::parse(Some("abc"), None),
            Err(PageError::InvalidCursor(_))
        ));
    }

    #[test]
    fn test_parse_rejects_bad_limit() {
        for raw in ["0", "101", "-5", "ten"] {
            assert!(
                matches!(PageRequest::parse(None, Some(raw)), Err(PageError::InvalidLimit(_))),
                "limit {} should be rejected",
                raw
            );
        }
        assert_eq!(
            PageError::InvalidLimit("0".to_string()).to_string(),
            "invalid limit '0' (must be 1-100)"
        );
    }

    #[test]
    fn test_new_validates() {
        assert!(PageRequest::new(0, 1).is_ok());
        assert!(PageRequest::new(-1, 10).is_err());
        assert!(PageRequest::new(0, 0).is_err());
        assert!(PageRequest::new(0, MAX_PAGE_SIZE + 1).is_err());
    }

    #[test]
    fn test_search_query_blank() {
        let req = SearchRequest::new("   ", PageRequest::default());
        assert_eq!(req.query(), None);

        let req = SearchRequest::new(" mail ", PageRequest::default());
        assert_eq!(req.query(), Some("mail"));
    }
}
