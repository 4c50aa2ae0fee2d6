use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use url::Url;

/// One listed entry: a manga as shown on a popular/latest/search page.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct EntrySummary {
    pub title: String,
    /// Path (plus query) relative to the source's base URL.
    pub url: String,
    pub thumbnail_url: Option<String>,
}

impl EntrySummary {
    /// Builds an entry, stripping the domain from `url`.
    pub fn new(title: impl Into<String>, url: &str, thumbnail_url: Option<String>) -> Self {
        Self {
            title: title.into(),
            url: canonical_url(url),
            thumbnail_url,
        }
    }
}

/// One page of entries plus the pagination flag. Entries are unique by
/// canonical URL however the page was built, deserialization included.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(from = "RawListingPage")]
pub struct ListingPage {
    entries: Vec<EntrySummary>,
    has_next_page: bool,
}

#[derive(Deserialize)]
struct RawListingPage {
    entries: Vec<EntrySummary>,
    has_next_page: bool,
}

impl From<RawListingPage> for ListingPage {
    fn from(raw: RawListingPage) -> Self {
        ListingPage::new(raw.entries, raw.has_next_page)
    }
}

impl ListingPage {
    /// Keeps the first occurrence of every canonical URL, preserving order.
    pub fn new(entries: Vec<EntrySummary>, has_next_page: bool) -> Self {
        let mut seen = HashSet::new();
        let entries = entries
            .into_iter()
            .filter(|entry| seen.insert(canonical_url(&entry.url)))
            .collect();
        Self {
            entries,
            has_next_page,
        }
    }

    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            has_next_page: false,
        }
    }

    pub fn entries(&self) -> &[EntrySummary] {
        &self.entries
    }

    pub fn has_next_page(&self) -> bool {
        self.has_next_page
    }

    pub fn into_entries(self) -> Vec<EntrySummary> {
        self.entries
    }
}

/// A chapter page image, possibly carrying an overlay payload in its fragment.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub index: usize,
    pub image_url: String,
}

/// Domain-stripped form of a URL used for identity: path and query only,
/// without a trailing slash (the root stays `/`).
pub fn canonical_url(url: &str) -> String {
    let trimmed = url.trim();
    let (path, query) = match Url::parse(trimmed) {
        Ok(parsed) if parsed.has_host() => (parsed.path().to_string(), parsed.query().map(str::to_string)),
        _ => {
            let without_fragment = trimmed.split('#').next().unwrap_or_default();
            // Protocol-relative links still carry a host.
            let without_host = match without_fragment.strip_prefix("//") {
                Some(rest) => rest.find('/').map(|i| &rest[i..]).unwrap_or("/"),
                None => without_fragment,
            };
            match without_host.split_once('?') {
                Some((p, q)) => (p.to_string(), Some(q.to_string())),
                None => (without_host.to_string(), None),
            }
        }
    };

    let mut path = if path.starts_with('/') { path } else { format!("/{}", path) };
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    match query {
        Some(q) if !q.is_empty() => format!("{}?{}", path, q),
        _ => path,
    }
}
