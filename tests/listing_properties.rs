use bytes::Bytes;
use rust_manga_multisrc::filters::{Exclusion, FilterGroup, FilterSpec, SortDirection, TriState};
use rust_manga_multisrc::http_client::HttpResponse;
use rust_manga_multisrc::listing::{ListingMode, ListingRequestBuilder, PagePlacement};
use rust_manga_multisrc::listing_parser::{HtmlListingParser, JsonEntry, JsonListing, JsonListingParser, ListingParser};
use rust_manga_multisrc::models::canonical_url;
use std::collections::HashSet;
use url::Url;

fn builder() -> ListingRequestBuilder {
    ListingRequestBuilder::new("https://mtl.example").expect("valid base url")
}

/// Every kind of filter, each with something selected.
fn busy_filters() -> Vec<FilterSpec> {
    let mut genres = FilterGroup::from_pairs("Genres", "genres[]", &[("Action", "action"), ("Romance", "romance")]);
    genres.set_state("action", TriState::Include);
    genres.set_state("romance", TriState::Exclude);

    let mut status = FilterSpec::select("Status", "status", &[("All", ""), ("Ongoing", "ongoing")], 0);
    status.set_selected(1);

    let mut types = FilterGroup::from_pairs("Type", "type", &[("Manhwa", "manhwa")]);
    types.set_state("manhwa", TriState::Include);

    vec![
        FilterSpec::Header("Filters are ignored when searching by text".into()),
        FilterSpec::text("Author", "author", "someone"),
        status,
        FilterSpec::Sort {
            group: FilterGroup::from_pairs("Sort", "order", &[("Views", "views"), ("Title", "title")]),
            selected: 0,
            direction: Some(("dir".into(), SortDirection::Descending)),
        },
        FilterSpec::CheckGroup(types),
        FilterSpec::TriStateGroup {
            group: genres,
            exclusion: Exclusion::default(),
        },
    ]
}

fn html_response(body: &str) -> HttpResponse {
    HttpResponse {
        status: 200,
        url: Url::parse("https://mtl.example/search?page=1").unwrap(),
        headers: vec![("Content-Type".into(), "text/html".into())],
        body: Bytes::from(body.to_string()),
    }
}

#[test]
fn test_listing_page_never_holds_duplicate_canonical_urls() {
    let html = r#"
        <div class="grid">
          <div class="card"><a href="https://mtl.example/comics/one">One</a></div>
          <div class="card"><a href="/comics/one/">One (mirror)</a></div>
          <div class="card"><a href="//mtl.example/comics/one#chapters">One again</a></div>
          <div class="card"><a href="/comics/two">Two</a></div>
          <div class="card"><a href="/comics/two?lang=en">Two EN</a></div>
        </div>"#;
    let parser = HtmlListingParser::new("div.card").and_then(|p| p.link("a")).unwrap();
    let page = parser.parse(&html_response(html)).unwrap();

    let mut seen = HashSet::new();
    for entry in page.entries() {
        assert!(seen.insert(canonical_url(&entry.url)), "duplicate {}", entry.url);
    }
    assert_eq!(page.entries().len(), 3);
    assert_eq!(page.entries()[0].title, "One");
}

#[test]
fn test_json_listing_is_deduplicated_too() {
    let body = r#"{"data":[
        {"title":"A","slug":"series/a"},
        {"name":"A copy","url":"https://mtl.example/series/a/"},
        {"title":"B","url":"/series/b","cover":"/covers/b.webp"}
    ],"currentPage":2,"totalPages":2}"#;
    let parser: JsonListingParser<JsonListing<JsonEntry>> = JsonListingParser::new();
    let page = parser.parse_json(body.as_bytes(), &Url::parse("https://mtl.example/api").unwrap()).unwrap();
    assert_eq!(page.entries().len(), 2);
    assert!(!page.has_next_page());
    assert_eq!(page.entries()[1].thumbnail_url.as_deref(), Some("https://mtl.example/covers/b.webp"));
}

#[test]
fn test_text_query_carries_no_filter_parameters() {
    let filters = busy_filters();
    let filter_keys: HashSet<&str> = filters.iter().filter_map(FilterSpec::key).collect();

    for query in ["solo", "  leveling  ", "id-less text"] {
        let request = builder().build(ListingMode::Search, 1, query, &filters).unwrap();
        let keys: Vec<String> = request.query_pairs().into_iter().map(|(k, _)| k).collect();
        assert!(
            keys.iter().all(|k| !filter_keys.contains(k.as_str()) && k != "dir"),
            "filter parameter leaked into {:?}",
            keys
        );
        assert!(keys.contains(&"query".to_string()));
    }

    let posted = builder().post_form().build(ListingMode::Search, 1, "solo", &filters).unwrap();
    assert!(posted.form_fields().iter().all(|(k, _)| !filter_keys.contains(k.as_str())));
}

#[test]
fn test_consecutive_pages_differ_only_in_page() {
    let filters = busy_filters();
    let without_page = |pairs: Vec<(String, String)>| -> Vec<(String, String)> {
        pairs.into_iter().filter(|(k, _)| k != "page").collect()
    };

    let first = builder().build(ListingMode::Search, 1, "", &filters).unwrap();
    let second = builder().build(ListingMode::Search, 2, "", &filters).unwrap();
    assert_eq!(first.url.path(), second.url.path());
    assert_eq!(without_page(first.query_pairs()), without_page(second.query_pairs()));
    assert!(first.query_pairs().contains(&("page".into(), "1".into())));
    assert!(second.query_pairs().contains(&("page".into(), "2".into())));

    let path_builder = builder().search_path("/manga").page_placement(PagePlacement::Path(Some("page".into())));
    let first = path_builder.build(ListingMode::Search, 1, "", &filters).unwrap();
    let second = path_builder.build(ListingMode::Search, 2, "", &filters).unwrap();
    assert_eq!(first.query_pairs(), second.query_pairs());
    assert_eq!(first.url.path(), "/manga/page/1");
    assert_eq!(second.url.path(), "/manga/page/2");
}

#[test]
fn test_filter_serialization_rules() {
    let request = builder().build(ListingMode::Search, 1, "", &busy_filters()).unwrap();
    let pairs = request.query_pairs();
    let expected = [
        ("author", "someone"),
        ("status", "ongoing"),
        ("order", "views"),
        ("dir", "desc"),
        ("type", "manhwa"),
        ("genres[]", "action"),
        ("genres[]", "-romance"),
        ("page", "1"),
    ];
    for (key, value) in expected {
        assert!(pairs.contains(&(key.to_string(), value.to_string())), "missing {}={}", key, value);
    }
}

#[test]
fn test_three_identical_cards_with_next_link() {
    let html = r#"
        <div class="listupd">
          <div class="bs"><a href="/series/hero" title="Hero"><img data-src="/c/hero.webp" src="data:image/gif;base64,R0lG"></a></div>
          <div class="bs"><a href="/series/hero" title="Hero"><img src="/c/hero.webp"></a></div>
          <div class="bs"><a href="https://mtl.example/series/hero" title="Hero"></a></div>
        </div>
        <div class="hpage"><a class="r" href="?page=2">Next</a></div>"#;
    let parser = HtmlListingParser::new("div.bs")
        .and_then(|p| p.container("div.listupd"))
        .and_then(|p| p.link("a"))
        .and_then(|p| p.next_page("div.hpage a.r"))
        .unwrap();
    let page = parser.parse(&html_response(html)).unwrap();

    assert_eq!(page.entries().len(), 1);
    assert!(page.has_next_page());
    assert_eq!(page.entries()[0].title, "Hero");
    assert_eq!(page.entries()[0].url, "/series/hero");
    assert_eq!(page.entries()[0].thumbnail_url.as_deref(), Some("https://mtl.example/c/hero.webp"));
}

#[test]
fn test_missing_container_is_parse_error() {
    let parser = HtmlListingParser::new("div.bs").and_then(|p| p.container("div.listupd")).unwrap();
    let err = parser.parse(&html_response("<html><body>maintenance</body></html>")).unwrap_err();
    assert!(matches!(err, rust_manga_multisrc::SourceError::Parse(_)));
}

#[test]
fn test_page_two_with_views_sort() {
    let sort = FilterSpec::Sort {
        group: FilterGroup::from_pairs("Sort by", "sort_by", &[("Views", "views"), ("Recent", "recent")]),
        selected: 0,
        direction: None,
    };
    let request = builder().build(ListingMode::Search, 2, "", &[sort]).unwrap();
    let pairs = request.query_pairs();
    assert!(pairs.contains(&("page".into(), "2".into())));
    assert!(pairs.contains(&("sort_by".into(), "views".into())));
}
