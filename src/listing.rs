//! Building popular/latest/search listing requests.
//!
//! Popular and latest are search with a preset sort filter, never separate
//! code paths. A non-empty text query takes precedence over filters.

use crate::error::{Result, SourceError};
use crate::filters::{FilterSpec, Placement};
use crate::http_client::{HttpRequest, Method};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingMode {
    Popular,
    Latest,
    Search,
}

/// Where the page number goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagePlacement {
    /// `?{key}={page}`
    Query(String),
    /// `/{prefix}/{page}` after every other path segment (`/{page}` without prefix).
    Path(Option<String>),
}

/// A search box input, after recognising the direct-lookup prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    Text(String),
    /// `id:solo-leveling` style queries naming one entry directly.
    Slug(String),
}

pub const SLUG_PREFIXES: &[&str] = &["id:", "slug:"];

impl SearchQuery {
    pub fn parse(query: &str) -> Self {
        let trimmed = query.trim();
        for prefix in SLUG_PREFIXES {
            if let Some(slug) = trimmed.strip_prefix(prefix) {
                let slug = slug.trim().trim_matches('/');
                if !slug.is_empty() {
                    return Self::Slug(slug.to_string());
                }
            }
        }
        Self::Text(trimmed.to_string())
    }
}

/// What a search box submission resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchTarget {
    Listing(HttpRequest),
    Details(HttpRequest),
}

#[derive(Debug, Clone)]
pub struct ListingRequestBuilder {
    base_url: Url,
    search_path: String,
    query_key: String,
    page: PagePlacement,
    method: Method,
    popular_preset: Vec<FilterSpec>,
    latest_preset: Vec<FilterSpec>,
    details_directory: String,
    headers: Vec<(String, String)>,
}

impl ListingRequestBuilder {
    /// Defaults: `GET {base}/search?page=N&query=...`, popular sorts by
    /// `sort_by=views`, latest by `sort_by=recent`, details under `/comics`.
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SourceError::InvalidArgument(format!("base url {}: {}", base_url, e)))?;
        Ok(Self {
            base_url,
            search_path: "/search".to_string(),
            query_key: "query".to_string(),
            page: PagePlacement::Query("page".to_string()),
            method: Method::Get,
            popular_preset: vec![FilterSpec::sort_preset("sort_by", "views")],
            latest_preset: vec![FilterSpec::sort_preset("sort_by", "recent")],
            details_directory: "/comics".to_string(),
            headers: Vec::new(),
        })
    }

    pub fn search_path(mut self, path: &str) -> Self {
        self.search_path = path.to_string();
        self
    }

    pub fn query_key(mut self, key: &str) -> Self {
        self.query_key = key.to_string();
        self
    }

    pub fn page_placement(mut self, placement: PagePlacement) -> Self {
        self.page = placement;
        self
    }

    /// Sends parameters as a form body instead of the query string.
    pub fn post_form(mut self) -> Self {
        self.method = Method::Post;
        self
    }

    pub fn popular_preset(mut self, filters: Vec<FilterSpec>) -> Self {
        self.popular_preset = filters;
        self
    }

    pub fn latest_preset(mut self, filters: Vec<FilterSpec>) -> Self {
        self.latest_preset = filters;
        self
    }

    pub fn details_directory(mut self, directory: &str) -> Self {
        self.details_directory = directory.to_string();
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Builds the request for one listing page. Pure: no I/O.
    pub fn build(
        &self,
        mode: ListingMode,
        page: u32,
        query: &str,
        filters: &[FilterSpec],
    ) -> Result<HttpRequest> {
        match mode {
            ListingMode::Popular => self.build_search(page, "", &self.popular_preset),
            ListingMode::Latest => self.build_search(page, "", &self.latest_preset),
            ListingMode::Search => self.build_search(page, query, filters),
        }
    }

    /// Resolves a search box submission: slug queries become a details request.
    pub fn resolve_search(&self, page: u32, query: &str, filters: &[FilterSpec]) -> Result<SearchTarget> {
        match SearchQuery::parse(query) {
            SearchQuery::Slug(slug) => self.build_details(&slug).map(SearchTarget::Details),
            SearchQuery::Text(text) => self
                .build(ListingMode::Search, page, &text, filters)
                .map(SearchTarget::Listing),
        }
    }

    pub fn build_details(&self, slug: &str) -> Result<HttpRequest> {
        let slug = slug.trim().trim_matches('/');
        if slug.is_empty() {
            return Err(SourceError::InvalidArgument("empty slug".to_string()));
        }
        let mut url = self.base_url.clone();
        push_segments(&mut url, &self.details_directory)?;
        push_segments(&mut url, slug)?;
        Ok(self.finish(HttpRequest::get(url)))
    }

    fn build_search(&self, page: u32, query: &str, filters: &[FilterSpec]) -> Result<HttpRequest> {
        if page < 1 {
            return Err(SourceError::InvalidArgument(format!("page must be >= 1, got {}", page)));
        }

        let mut url = self.base_url.clone();
        push_segments(&mut url, &self.search_path)?;

        let mut params: Vec<(String, String)> = Vec::new();
        let query = query.trim();
        if !query.is_empty() {
            params.push((self.query_key.clone(), query.to_string()));
        } else {
            for param in filters.iter().flat_map(FilterSpec::params) {
                match param.placement {
                    Placement::Query => params.push((param.key, param.value)),
                    Placement::Path => {
                        push_segments(&mut url, &param.key)?;
                        push_segments(&mut url, &param.value)?;
                    }
                }
            }
        }

        match &self.page {
            PagePlacement::Query(key) => params.push((key.clone(), page.to_string())),
            PagePlacement::Path(prefix) => {
                if let Some(prefix) = prefix {
                    push_segments(&mut url, prefix)?;
                }
                push_segments(&mut url, &page.to_string())?;
            }
        }

        let request = match self.method {
            Method::Get => {
                if !params.is_empty() {
                    url.query_pairs_mut().extend_pairs(&params);
                }
                HttpRequest::get(url)
            }
            Method::Post => HttpRequest::post_form(url, &params),
        };
        Ok(self.finish(request))
    }

    fn finish(&self, mut request: HttpRequest) -> HttpRequest {
        request.headers.extend(self.headers.iter().cloned());
        request
    }
}

/// Appends the non-empty `/`-separated parts of `path` as URL segments.
fn push_segments(url: &mut Url, path: &str) -> Result<()> {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        return Ok(());
    }
    let mut segments = url
        .path_segments_mut()
        .map_err(|_| SourceError::InvalidArgument(format!("cannot append path to {}", path)))?;
    segments.pop_if_empty().extend(parts);
    Ok(())
}
