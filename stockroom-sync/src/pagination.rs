//! Cursor pagination over remote listings.

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor for the next page; `None` on the last page.
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
        }
    }
}

/// Upper bound on pages fetched by [`collect_pages`], guarding against a
/// remote that keeps returning the same cursor.
pub const MAX_PAGES: usize = 10_000;

/// Drain every page from `fetch`, starting with no cursor.
///
/// Stops on the first error, on a missing cursor, or when a cursor repeats.
pub fn collect_pages<T, E, F>(mut fetch: F) -> Result<Vec<T>, E>
where
    F: FnMut(Option<&str>) -> Result<Page<T>, E>,
{
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;
    for _ in 0..MAX_PAGES {
        let page = fetch(cursor.as_deref())?;
        items.extend(page.items);
        match page.next_cursor {
            Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
            _ => break,
        }
    }
    Ok(items)
}
