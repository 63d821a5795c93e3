//! Pagination views.
//!
//! A [`PaginationView`] is derived from cache contents (or an authoritative
//! backend page) and never mutated in place. A [`ViewRequest`] is the
//! clamped page/size/query triple that produced it.

use serde::Serialize;

use crate::cache::block::page_offset;
use crate::query::QueryContext;

/// The page, page size and query a caller asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewRequest {
    pub page: usize,
    pub page_size: usize,
    pub query: QueryContext,
}

impl ViewRequest {
    /// Page and page size below 1 clamp to 1; the query is normalized.
    pub fn new(page: usize, page_size: usize, query: QueryContext) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.max(1),
            query: query.normalized(),
        }
    }

    /// Offset of the first item on the page.
    pub fn offset(&self) -> u64 {
        page_offset(self.page, self.page_size)
    }

    /// One past the offset of the last item on the page. Saturates.
    pub fn end(&self) -> u64 {
        self.offset().saturating_add(self.page_size as u64)
    }
}

impl Default for ViewRequest {
    fn default() -> Self {
        Self::new(1, 20, QueryContext::default())
    }
}

/// The page to render.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationView<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub has_next: bool,
    pub has_prev: bool,
}

/// `max(1, ceil(total / page_size))`.
pub fn total_pages(total: u64, page_size: usize) -> usize {
    (total.div_ceil(page_size.max(1) as u64) as usize).max(1)
}

impl<T: Clone> PaginationView<T> {
    /// Build a view whose items were already cut to the page.
    pub fn from_window(items: Vec<T>, total: u64, page: usize, page_size: usize) -> Self {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let total_pages = total_pages(total, page_size);
        let mut items = items;
        items.truncate(page_size);
        if page > total_pages {
            items.clear();
        }
        Self {
            items,
            total,
            page,
            page_size,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }

    /// Slice one page out of a complete, already filtered and sorted list.
    pub fn from_items(all: &[T], page: usize, page_size: usize) -> Self {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let start = usize::try_from(page_offset(page, page_size)).unwrap_or(usize::MAX);
        let window = if start < all.len() {
            let end = start.saturating_add(page_size).min(all.len());
            all[start..end].to_vec()
        } else {
            Vec::new()
        };
        Self::from_window(window, all.len() as u64, page, page_size)
    }

    /// A view with no items, used before the first load.
    pub fn empty(page: usize, page_size: usize) -> Self {
        Self::from_window(Vec::new(), 0, page, page_size)
    }
}
