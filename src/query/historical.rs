//! Historical query over the document store.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::query::{QueryConfig, QueryError};
use crate::storage::{
    DurableStore, FindWindow, ReportFilter, StorageError, StoredReport, with_deadline,
};

/// Raw historical query parameters, as received from a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HistoricalQuery {
    /// Restrict to one batch. Empty means no restriction.
    #[serde(default)]
    pub batch_id: Option<String>,
    /// 1-based page number (default: 1).
    #[serde(default)]
    pub page: Option<u64>,
    /// Results per page (default and maximum come from [`QueryConfig`]).
    #[serde(default)]
    pub page_size: Option<u64>,
}

impl HistoricalQuery {
    pub fn batch(batch_id: impl Into<String>) -> Self {
        Self {
            batch_id: Some(batch_id.into()),
            ..Default::default()
        }
    }

    pub fn with_page(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = Some(page_size);
        self
    }

    fn filter(&self) -> ReportFilter {
        ReportFilter {
            batch_id: self
                .batch_id
                .as_deref()
                .map(str::trim)
                .filter(|batch| !batch.is_empty())
                .map(str::to_string),
        }
    }
}

/// Page number and size after defaults and clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub page_size: u64,
}

impl PageRequest {
    /// Apply defaults and limits.
    ///
    /// A missing or zero page becomes 1; a missing or zero page size becomes
    /// `default_page_size`; anything above `max_page_size` is clamped to it.
    pub fn resolve(query: &HistoricalQuery, config: &QueryConfig) -> Self {
        let page = query.page.filter(|&p| p > 0).unwrap_or(1);
        let max = config.max_page_size.max(1);
        let page_size = query
            .page_size
            .filter(|&size| size > 0)
            .unwrap_or(config.default_page_size)
            .clamp(1, max);
        Self { page, page_size }
    }

    fn offset(&self) -> u64 {
        (self.page - 1).saturating_mul(self.page_size)
    }

    fn last_page(&self, count: u64) -> u64 {
        count.div_ceil(self.page_size).max(1)
    }
}

/// One page of results plus navigation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    /// Total matches across all pages.
    pub count: u64,
    /// Next page number, if there are more results.
    pub next: Option<u64>,
    /// Previous page number, if this is not the first page.
    pub previous: Option<u64>,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    fn new(request: PageRequest, count: u64, results: Vec<T>) -> Self {
        let last = request.last_page(count);
        let next = (request.page < last).then(|| request.page + 1);
        let previous = (request.page > 1).then(|| (request.page - 1).min(last));
        Self {
            count,
            next,
            previous,
            results,
        }
    }
}

/// Serves paginated, optionally batch-filtered report history, newest first.
#[derive(Clone)]
pub struct HistoricalQueryService {
    reports: Arc<dyn DurableStore>,
    config: QueryConfig,
}

impl std::fmt::Debug for HistoricalQueryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoricalQueryService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HistoricalQueryService {
    pub fn new(reports: Arc<dyn DurableStore>, config: &QueryConfig) -> Self {
        Self {
            reports,
            config: config.clone(),
        }
    }

    pub fn store_timeout(&self) -> Duration {
        self.config.store_timeout
    }

    /// Run a historical query.
    ///
    /// A page past the end yields empty `results` with the full `count`.
    pub async fn query(&self, query: &HistoricalQuery) -> Result<Page<StoredReport>, QueryError> {
        let request = PageRequest::resolve(query, &self.config);
        let filter = query.filter();

        let (count, results) =
            with_deadline(self.config.store_timeout, self.fetch(&filter, request)).await?;

        tracing::debug!(
            batch_id = ?filter.batch_id,
            page = request.page,
            page_size = request.page_size,
            count,
            returned = results.len(),
            "Historical query"
        );
        Ok(Page::new(request, count, results))
    }

    async fn fetch(
        &self,
        filter: &ReportFilter,
        request: PageRequest,
    ) -> Result<(u64, Vec<StoredReport>), StorageError> {
        let count = self.reports.count(filter).await?;
        let offset = request.offset();
        if offset >= count {
            return Ok((count, Vec::new()));
        }
        let results = self
            .reports
            .find(filter, FindWindow::slice(offset, request.page_size))
            .await?;
        Ok((count, results))
    }
}
