//! Lazy walker over page-numbered OpenFEC list endpoints.
//!
//! The walk ends when the page index reaches `pagination.pages` or when a page
//! comes back empty. Page size is never used to guess the end: a full last
//! page would otherwise trigger an extra fetch, and a server that never sends
//! a short page would never terminate.

use std::future::Future;
use std::marker::PhantomData;

use crate::openfec::types::Page;
use crate::openfec::OpenFecError;

/// Restartable page walker driven by a page-fetch closure (pages are 1-indexed).
pub struct Paginator<T, F> {
    fetch: F,
    next_page: u32,
    total_pages: Option<u32>,
    finished: bool,
    fetches: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T, F, Fut> Paginator<T, F>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Page<T>, OpenFecError>>,
{
    pub fn new(fetch: F) -> Self {
        Self {
            fetch,
            next_page: 1,
            total_pages: None,
            finished: false,
            fetches: 0,
            _marker: PhantomData,
        }
    }

    /// Fetch the next page of results.
    ///
    /// Returns `None` once the walk is over. A fetch error is yielded once and
    /// ends the walk.
    pub async fn next_page(&mut self) -> Option<Result<Vec<T>, OpenFecError>> {
        if self.finished {
            return None;
        }

        let page_number = self.next_page;
        let page = match (self.fetch)(page_number).await {
            Ok(page) => page,
            Err(e) => {
                self.finished = true;
                return Some(Err(e));
            }
        };
        self.fetches += 1;
        self.total_pages = page.pagination.pages;

        if page.results.is_empty() {
            tracing::debug!(page = page_number, "empty page, ending walk");
            self.finished = true;
            return None;
        }

        // A missing page count means the endpoint is not paged.
        self.finished = match self.total_pages {
            Some(total) => page_number >= total,
            None => true,
        };
        self.next_page += 1;

        tracing::debug!(
            page = page_number,
            total = ?self.total_pages,
            results = page.results.len(),
            "fetched page"
        );
        Some(Ok(page.results))
    }

    /// Restart the walk from page 1.
    pub fn reset(&mut self) {
        self.next_page = 1;
        self.total_pages = None;
        self.finished = false;
    }

    /// Number of successful fetches since construction.
    pub fn fetches(&self) -> u32 {
        self.fetches
    }

    /// Page count reported by the most recent page, if any.
    pub fn total_pages(&self) -> Option<u32> {
        self.total_pages
    }

    /// Drain every remaining page into one vector.
    pub async fn collect_all(mut self) -> Result<Vec<T>, OpenFecError> {
        let mut all = Vec::new();
        while let Some(page) = self.next_page().await {
            all.extend(page?);
        }
        Ok(all)
    }
}
