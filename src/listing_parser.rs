use crate::error::{Result, SourceError};
use crate::http_client::HttpResponse;
use crate::models::{EntrySummary, ListingPage};
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use url::Url;

/// Lazy-load attributes tried before `srcset` and plain `src`.
const LAZY_IMAGE_ATTRS: &[&str] = &["data-src", "data-lazy-src", "data-cfsrc"];

/// Turns a listing response into one page of entries.
pub trait ListingParser: Send + Sync {
    fn parse(&self, response: &HttpResponse) -> Result<ListingPage>;
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| SourceError::InvalidArgument(format!("selector {:?}: {}", css, e)))
}

/// Card-based HTML listing parser. Selectors are per-site configuration.
#[derive(Debug, Clone)]
pub struct HtmlListingParser {
    container: Option<Selector>,
    card: Selector,
    link: Option<Selector>,
    title: Option<Selector>,
    thumbnail: Selector,
    next_page: Option<Selector>,
}

impl HtmlListingParser {
    pub fn new(card: &str) -> Result<Self> {
        Ok(Self {
            container: None,
            card: selector(card)?,
            link: None,
            title: None,
            thumbnail: selector("img")?,
            next_page: None,
        })
    }

    /// Node that must exist for the page to count as a listing at all.
    pub fn container(mut self, css: &str) -> Result<Self> {
        self.container = Some(selector(css)?);
        Ok(self)
    }

    /// Link inside the card; without it the card itself must carry `href`.
    pub fn link(mut self, css: &str) -> Result<Self> {
        self.link = Some(selector(css)?);
        Ok(self)
    }

    pub fn title(mut self, css: &str) -> Result<Self> {
        self.title = Some(selector(css)?);
        Ok(self)
    }

    pub fn thumbnail(mut self, css: &str) -> Result<Self> {
        self.thumbnail = selector(css)?;
        Ok(self)
    }

    pub fn next_page(mut self, css: &str) -> Result<Self> {
        self.next_page = Some(selector(css)?);
        Ok(self)
    }

    pub fn parse_html(&self, html: &str, base: &Url) -> Result<ListingPage> {
        let document = Html::parse_document(html);

        if let Some(container) = &self.container {
            if document.select(container).next().is_none() {
                return Err(SourceError::parse("listing container not found"));
            }
        }

        let entries = document
            .select(&self.card)
            .filter_map(|card| self.entry_from_card(card, base))
            .collect();

        let has_next_page = self
            .next_page
            .as_ref()
            .is_some_and(|next| document.select(next).next().is_some());

        Ok(ListingPage::new(entries, has_next_page))
    }

    fn entry_from_card(&self, card: ElementRef<'_>, base: &Url) -> Option<EntrySummary> {
        let link = match &self.link {
            Some(link) => card.select(link).next(),
            None => Some(card),
        };
        let Some(href) = link.and_then(|l| l.value().attr("href")).filter(|h| !h.trim().is_empty()) else {
            log::debug!("Skipping card without link");
            return None;
        };
        let url = base.join(href.trim()).ok()?;

        let title = self
            .title
            .as_ref()
            .and_then(|t| card.select(t).next())
            .map(element_text)
            .filter(|t| !t.is_empty())
            .or_else(|| link.and_then(|l| l.value().attr("title")).map(|t| t.trim().to_string()))
            .or_else(|| link.map(element_text))
            .filter(|t| !t.is_empty())?;

        let thumbnail_url = card
            .select(&self.thumbnail)
            .next()
            .and_then(|img| image_url(img, base));

        Some(EntrySummary::new(title, url.as_str(), thumbnail_url))
    }
}

impl ListingParser for HtmlListingParser {
    fn parse(&self, response: &HttpResponse) -> Result<ListingPage> {
        self.parse_html(&response.text(), &response.url)
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn usable(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && !value.starts_with("data:")
}

/// Resolves an image element's real URL: lazy-load attributes first, then the
/// best `srcset` candidate, then `src`. Placeholders (`data:` URIs) are skipped.
pub fn image_url(element: ElementRef<'_>, base: &Url) -> Option<String> {
    let attrs = element.value();
    LAZY_IMAGE_ATTRS
        .iter()
        .filter_map(|name| attrs.attr(name))
        .find(|v| usable(v))
        .map(str::to_string)
        .or_else(|| attrs.attr("srcset").and_then(best_srcset_candidate))
        .or_else(|| attrs.attr("src").filter(|v| usable(v)).map(str::to_string))
        .and_then(|raw| base.join(raw.trim()).ok())
        .map(|u| u.to_string())
}

/// Picks the widest (or highest density) URL-looking candidate of a `srcset`.
pub fn best_srcset_candidate(srcset: &str) -> Option<String> {
    srcset
        .split(',')
        .filter_map(|candidate| {
            let mut parts = candidate.split_whitespace();
            let url = parts.next()?;
            if !looks_like_url(url) {
                return None;
            }
            let weight = parts
                .next()
                .and_then(|d| d.trim_end_matches(['w', 'x']).parse::<f64>().ok())
                .unwrap_or(0.0);
            Some((weight, url))
        })
        .fold(None, |best: Option<(f64, &str)>, (weight, url)| match best {
            Some((w, _)) if w > weight => best,
            _ => Some((weight, url)),
        })
        .map(|(_, url)| url.to_string())
}

fn looks_like_url(token: &str) -> bool {
    usable(token)
        && (token.starts_with("http://")
            || token.starts_with("https://")
            || token.starts_with("//")
            || token.starts_with('/')
            || token.contains('.'))
}

/// Pagination information carried by a JSON listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageInfo {
    HasNext(bool),
    Counted { current: u32, total: u32 },
}

impl PageInfo {
    pub fn has_next_page(self) -> bool {
        match self {
            Self::HasNext(has_next) => has_next,
            Self::Counted { current, total } => current < total,
        }
    }
}

/// A decoded JSON listing envelope.
pub trait ListingEnvelope: DeserializeOwned {
    type Item: IntoEntry;

    fn into_parts(self) -> Result<(Vec<Self::Item>, PageInfo)>;
}

/// A JSON record that maps onto an entry (or is skipped).
pub trait IntoEntry {
    fn into_entry(self, base: &Url) -> Option<EntrySummary>;
}

/// JSON listing parser for envelope type `E`.
pub struct JsonListingParser<E> {
    _envelope: PhantomData<fn() -> E>,
}

impl<E> JsonListingParser<E> {
    pub fn new() -> Self {
        Self {
            _envelope: PhantomData,
        }
    }
}

impl<E> Default for JsonListingParser<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: ListingEnvelope> JsonListingParser<E> {
    pub fn parse_json(&self, body: &[u8], base: &Url) -> Result<ListingPage> {
        let envelope: E = serde_json::from_slice(body)
            .map_err(|e| SourceError::parse(format!("listing json: {}", e)))?;
        let (items, info) = envelope.into_parts()?;
        let entries = items.into_iter().filter_map(|item| item.into_entry(base)).collect();
        Ok(ListingPage::new(entries, info.has_next_page()))
    }
}

impl<E: ListingEnvelope> ListingParser for JsonListingParser<E> {
    fn parse(&self, response: &HttpResponse) -> Result<ListingPage> {
        self.parse_json(&response.body, &response.url)
    }
}

/// Common envelope shape: an entry array plus either an explicit flag or
/// current/total page counters.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonListing<T> {
    #[serde(alias = "data", alias = "results", alias = "items", alias = "series")]
    pub entries: Vec<T>,
    #[serde(default, alias = "has_next_page", alias = "hasMore", alias = "has_more")]
    pub has_next_page: Option<bool>,
    #[serde(default, alias = "current_page", alias = "page")]
    pub current_page: Option<u32>,
    #[serde(default, alias = "total_pages", alias = "lastPage", alias = "last_page")]
    pub total_pages: Option<u32>,
}

impl<T: IntoEntry + DeserializeOwned> ListingEnvelope for JsonListing<T> {
    type Item = T;

    fn into_parts(self) -> Result<(Vec<T>, PageInfo)> {
        let info = match (self.has_next_page, self.current_page, self.total_pages) {
            (Some(flag), _, _) => PageInfo::HasNext(flag),
            (None, Some(current), Some(total)) => PageInfo::Counted { current, total },
            _ => return Err(SourceError::parse("listing json has no pagination fields")),
        };
        Ok((self.entries, info))
    }
}

/// Common entry shape: title, a URL or slug, and an optional cover.
#[derive(Debug, Deserialize)]
pub struct JsonEntry {
    #[serde(alias = "name")]
    pub title: String,
    #[serde(default, alias = "link", alias = "href")]
    pub url: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default, alias = "cover", alias = "thumbnail", alias = "coverUrl", alias = "cover_url")]
    pub thumbnail_url: Option<String>,
}

impl IntoEntry for JsonEntry {
    fn into_entry(self, base: &Url) -> Option<EntrySummary> {
        let url = self
            .url
            .filter(|u| !u.trim().is_empty())
            .or_else(|| self.slug.map(|s| format!("/{}", s.trim_matches('/'))))?;
        let url = base.join(&url).ok()?;
        let thumbnail = self
            .thumbnail_url
            .filter(|t| usable(t))
            .and_then(|t| base.join(&t).ok())
            .map(|u| u.to_string());
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return None;
        }
        Some(EntrySummary::new(title, url.as_str(), thumbnail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://site.test/search?page=1").unwrap()
    }

    fn first_img(html: &str) -> Option<String> {
        let doc = Html::parse_fragment(html);
        let img = doc.select(&Selector::parse("img").unwrap()).next().unwrap();
        image_url(img, &base())
    }

    #[test]
    fn test_lazy_attributes_win_over_src() {
        assert_eq!(
            first_img(r#"<img src="/placeholder.gif" data-lazy-src="/real.webp">"#).as_deref(),
            Some("https://site.test/real.webp")
        );
        assert_eq!(
            first_img(r#"<img src="/p.gif" data-src="/a.jpg" data-lazy-src="/b.jpg">"#).as_deref(),
            Some("https://site.test/a.jpg")
        );
        assert_eq!(
            first_img(r#"<img src="data:image/gif;base64,R0lGOD" data-cfsrc="//cdn.site.test/c.png">"#).as_deref(),
            Some("https://cdn.site.test/c.png")
        );
    }

    #[test]
    fn test_srcset_picks_largest_candidate() {
        assert_eq!(
            best_srcset_candidate("/s.jpg 320w, /m.jpg 640w, /l.jpg 1280w").as_deref(),
            Some("/l.jpg")
        );
        assert_eq!(best_srcset_candidate("/a.jpg 1x, /b.jpg 2x").as_deref(), Some("/b.jpg"));
        assert_eq!(best_srcset_candidate("   "), None);
        assert_eq!(
            first_img(r#"<img src="/small.jpg" srcset="/x1.jpg 1x, /x2.jpg 2x">"#).as_deref(),
            Some("https://site.test/x2.jpg")
        );
    }

    #[test]
    fn test_plain_src_is_last_resort() {
        assert_eq!(first_img(r#"<img src="cover.png">"#).as_deref(), Some("https://site.test/cover.png"));
        assert_eq!(first_img(r#"<img alt="x">"#), None);
    }

    #[test]
    fn test_html_cards_titles_and_next_page() {
        let parser = HtmlListingParser::new("div.card")
            .unwrap()
            .link("a")
            .unwrap()
            .title("h3")
            .unwrap()
            .next_page("a.next")
            .unwrap();
        let html = r#"
            <div class="card"><a href="/comics/a"><img data-src="/a.jpg"></a><h3> Alpha  One </h3></div>
            <div class="card"><a href="https://site.test/comics/b/" title="Beta"></a></div>
            <div class="card"><span>no link</span></div>
        "#;
        let page = parser.parse_html(html, &base()).unwrap();
        assert_eq!(page.entries().len(), 2);
        assert_eq!(page.entries()[0].title, "Alpha One");
        assert_eq!(page.entries()[0].url, "/comics/a");
        assert_eq!(page.entries()[0].thumbnail_url.as_deref(), Some("https://site.test/a.jpg"));
        assert_eq!(page.entries()[1].title, "Beta");
        assert_eq!(page.entries()[1].url, "/comics/b");
        assert!(!page.has_next_page());
    }

    #[test]
    fn test_missing_container_is_parse_error() {
        let parser = HtmlListingParser::new("div.card").unwrap().container("section.results").unwrap();
        let err = parser.parse_html("<html><body><p>maintenance</p></body></html>", &base()).unwrap_err();
        assert!(matches!(err, SourceError::Parse(_)));
    }

    #[test]
    fn test_json_counted_pagination() {
        let body = br#"{"data":[{"title":"A","slug":"a","cover":"/a.png"},{"title":"B","url":"/comics/b"}],
                        "currentPage":2,"totalPages":3}"#;
        let page = JsonListingParser::<JsonListing<JsonEntry>>::new()
            .parse_json(body, &base())
            .unwrap();
        assert_eq!(page.entries().len(), 2);
        assert_eq!(page.entries()[0].url, "/a");
        assert_eq!(page.entries()[0].thumbnail_url.as_deref(), Some("https://site.test/a.png"));
        assert!(page.has_next_page());
    }

    #[test]
    fn test_json_last_page_and_explicit_flag() {
        let parser = JsonListingParser::<JsonListing<JsonEntry>>::new();
        let last = parser
            .parse_json(br#"{"results":[],"current_page":3,"total_pages":3}"#, &base())
            .unwrap();
        assert!(!last.has_next_page());

        let flagged = parser
            .parse_json(br#"{"items":[{"name":"X","link":"/x"}],"hasNextPage":true}"#, &base())
            .unwrap();
        assert!(flagged.has_next_page());
        assert_eq!(flagged.entries()[0].title, "X");
    }

    #[test]
    fn test_json_missing_entries_is_parse_error() {
        let parser = JsonListingParser::<JsonListing<JsonEntry>>::new();
        let err = parser.parse_json(br#"{"hasNextPage":true}"#, &base()).unwrap_err();
        assert!(matches!(err, SourceError::Parse(_)));
        let err = parser.parse_json(br#"{"data":[]}"#, &base()).unwrap_err();
        assert!(matches!(err, SourceError::Parse(_)));
    }
}
