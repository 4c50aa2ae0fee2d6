//! One site's listing connector: request builder, response parser, executor
//! and (optionally) filter discovery wired together.

use crate::discovery::FilterDiscovery;
use crate::error::Result;
use crate::filters::FilterSpec;
use crate::http_client::{CallContext, HttpExecutor, HttpRequest, HttpResponse};
use crate::listing::{ListingMode, ListingRequestBuilder, SearchTarget};
use crate::listing_parser::ListingParser;
use crate::models::{ListingPage, canonical_url};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Parses a filter page into the site's filter groups.
pub type FilterPageParser = Arc<dyn Fn(&HttpResponse) -> Result<Vec<FilterSpec>> + Send + Sync>;

struct DiscoverySource {
    discovery: Arc<FilterDiscovery>,
    request: HttpRequest,
    parse: FilterPageParser,
}

pub struct ListingAdapter {
    builder: ListingRequestBuilder,
    parser: Arc<dyn ListingParser>,
    client: Arc<dyn HttpExecutor>,
    static_filters: Vec<FilterSpec>,
    discovery: Option<DiscoverySource>,
    page_delay: Duration,
}

impl ListingAdapter {
    pub fn new(
        builder: ListingRequestBuilder,
        parser: Arc<dyn ListingParser>,
        client: Arc<dyn HttpExecutor>,
    ) -> Self {
        Self {
            builder,
            parser,
            client,
            static_filters: Vec::new(),
            discovery: None,
            page_delay: Duration::from_millis(150),
        }
    }

    /// Filters that are always offered, ahead of any discovered ones.
    pub fn with_static_filters(mut self, filters: Vec<FilterSpec>) -> Self {
        self.static_filters = filters;
        self
    }

    /// Discovers extra filters from `request` the first time they are asked for.
    pub fn with_discovery(mut self, discovery: Arc<FilterDiscovery>, request: HttpRequest, parse: FilterPageParser) -> Self {
        self.discovery = Some(DiscoverySource {
            discovery,
            request,
            parse,
        });
        self
    }

    /// Pause between pages in `fetch_all`.
    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    pub fn builder(&self) -> &ListingRequestBuilder {
        &self.builder
    }

    pub async fn fetch(
        &self,
        mode: ListingMode,
        page: u32,
        query: &str,
        filters: &[FilterSpec],
        ctx: &CallContext,
    ) -> Result<ListingPage> {
        let request = self.builder.build(mode, page, query, filters)?;
        self.fetch_request(request, ctx).await
    }

    pub async fn popular(&self, page: u32, ctx: &CallContext) -> Result<ListingPage> {
        self.fetch(ListingMode::Popular, page, "", &[], ctx).await
    }

    pub async fn latest(&self, page: u32, ctx: &CallContext) -> Result<ListingPage> {
        self.fetch(ListingMode::Latest, page, "", &[], ctx).await
    }

    /// Runs a search box submission. `id:` queries resolve to the details
    /// page, returned as the raw response.
    pub async fn search(
        &self,
        page: u32,
        query: &str,
        filters: &[FilterSpec],
        ctx: &CallContext,
    ) -> Result<SearchResult> {
        match self.builder.resolve_search(page, query, filters)? {
            SearchTarget::Listing(request) => Ok(SearchResult::Listing(self.fetch_request(request, ctx).await?)),
            SearchTarget::Details(request) => {
                let response = self.client.execute(request, ctx).await?.error_for_status()?;
                Ok(SearchResult::Details(response))
            }
        }
    }

    async fn fetch_request(&self, request: HttpRequest, ctx: &CallContext) -> Result<ListingPage> {
        log::debug!("Fetching listing {}", request.url);
        let response = self.client.execute(request, ctx).await?.error_for_status()?;
        self.parser.parse(&response)
    }

    /// Walks pages from 1 while the site reports a next page, up to
    /// `max_pages`. Entries already seen on earlier pages are dropped.
    pub async fn fetch_all(
        &self,
        mode: ListingMode,
        query: &str,
        filters: &[FilterSpec],
        max_pages: u32,
        ctx: &CallContext,
    ) -> Result<ListingPage> {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        let mut has_next_page = false;

        for page in 1..=max_pages {
            let listing = self.fetch(mode, page, query, filters, ctx).await?;
            let before = entries.len();
            has_next_page = listing.has_next_page();
            for entry in listing.into_entries() {
                if seen.insert(canonical_url(&entry.url)) {
                    entries.push(entry);
                }
            }
            log::info!("Page {}: {} new entries", page, entries.len() - before);

            if !has_next_page {
                break;
            }
            if page < max_pages && !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }
        }

        Ok(ListingPage::new(entries, has_next_page))
    }

    /// Filters to show the user: static ones plus discovered ones, or the
    /// discovery placeholder while those are not available.
    pub async fn filters(&self, ctx: &CallContext) -> Vec<FilterSpec> {
        let mut filters = self.static_filters.clone();
        if let Some(source) = &self.discovery {
            source
                .discovery
                .load_from(self.client.as_ref(), source.request.clone(), ctx, |response| (source.parse)(response))
                .await;
            filters.extend(source.discovery.filters_or_placeholder());
        }
        filters
    }
}

#[derive(Debug, Clone)]
pub enum SearchResult {
    Listing(ListingPage),
    Details(HttpResponse),
}
