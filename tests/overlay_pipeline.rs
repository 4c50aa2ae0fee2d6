use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use rust_manga_multisrc::config::OverlaySettings;
use rust_manga_multisrc::error::Result;
use rust_manga_multisrc::http_client::{CallContext, HttpExecutor, HttpRequest, HttpResponse, InterceptedClient};
use rust_manga_multisrc::overlay::layout::{PT_PER_PX, TextBoxLayoutEngine, TextMeasure, UniformMeasure};
use rust_manga_multisrc::overlay::payload::{DialogueBox, DialogueText, page_image_url};
use rust_manga_multisrc::overlay::{ComposedImageInterceptor, FontAsset, FontCache, FontRole};
use std::io::Cursor;
use rust_manga_multisrc::SourceError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

const FONT: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");

/// Serves one page image; fonts are either the bundled font or a 404.
struct Cdn {
    image: Vec<u8>,
    image_type: &'static str,
    serve_fonts: bool,
    font_delay: Duration,
    log: Mutex<Vec<String>>,
    font_hits: AtomicUsize,
    /// The next font request cancels its caller, like a page request abandoned mid-download.
    cancel_next_font: AtomicBool,
}

impl Cdn {
    fn new(image: Vec<u8>, image_type: &'static str) -> Self {
        Self {
            image,
            image_type,
            serve_fonts: false,
            font_delay: Duration::ZERO,
            log: Mutex::new(Vec::new()),
            font_hits: AtomicUsize::new(0),
            cancel_next_font: AtomicBool::new(false),
        }
    }

    fn requests(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpExecutor for Cdn {
    async fn execute(&self, request: HttpRequest, ctx: &CallContext) -> Result<HttpResponse> {
        self.log.lock().unwrap().push(request.url.path().to_string());
        let (status, content_type, body) = if request.url.path().ends_with(".ttf") {
            self.font_hits.fetch_add(1, Ordering::SeqCst);
            if self.cancel_next_font.swap(false, Ordering::SeqCst) {
                ctx.cancel();
                return Err(SourceError::Cancelled);
            }
            if !self.font_delay.is_zero() {
                tokio::time::sleep(self.font_delay).await;
            }
            if self.serve_fonts {
                (200, "font/ttf", Bytes::from_static(FONT))
            } else {
                (404, "text/html", Bytes::from_static(b"not found"))
            }
        } else {
            (200, self.image_type, Bytes::from(self.image.clone()))
        };
        Ok(HttpResponse {
            status,
            url: request.url,
            headers: vec![("Content-Type".into(), content_type.into())],
            body,
        })
    }
}

fn blank_page(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    let mut out = Cursor::new(Vec::new());
    let image = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(image).to_rgb8()),
        _ => DynamicImage::ImageRgba8(image),
    };
    image.write_to(&mut out, format).unwrap();
    out.into_inner()
}

fn dialogue(x1: f32, y1: f32, width: f32, height: f32, text: &str) -> DialogueBox {
    DialogueBox {
        x1,
        y1,
        width,
        height,
        angle: 0.0,
        kind: "normal".into(),
        text: DialogueText::Plain(text.into()),
        fg_color: None,
        bg_color: None,
    }
}

fn settings_with_fonts() -> OverlaySettings {
    OverlaySettings {
        font_base_url: Some("https://mtl.example".into()),
        ..OverlaySettings::default()
    }
}

#[test]
fn test_fitted_height_never_exceeds_box() {
    let engine = TextBoxLayoutEngine::new(4.0 / PT_PER_PX, 0.5 / PT_PER_PX);
    let font = FontAsset::from_bytes("fallback", FONT).unwrap();
    let uniform = UniformMeasure::default();
    let measures: [&dyn TextMeasure; 2] = [&font, &uniform];
    let texts = [
        "Hi",
        "WHAT ARE YOU DOING HERE?!",
        "I told you already, the gate opens only at midnight and nobody goes in alone.",
        "Boom",
        "a\nb\nc",
    ];

    for measure in measures {
        let single_line = measure.line_height(engine.min_size());
        for text in texts {
            for width in [40.0, 90.0, 160.0, 300.0] {
                for height in [single_line, 30.0, 55.0, 120.0, 400.0] {
                    if height < single_line {
                        continue;
                    }
                    let at_floor = engine.wrap(measure, text, width, engine.min_size());
                    if at_floor.len() as f32 * single_line > height {
                        // cannot fit even at the floor; best effort is flagged
                        let layout = engine.fit(measure, text, width, height, 32.0);
                        assert!(layout.overflow);
                        continue;
                    }
                    let layout = engine.fit(measure, text, width, height, 32.0);
                    assert!(
                        layout.height() <= height,
                        "{:?} in {}x{} rendered {} tall",
                        text,
                        width,
                        height,
                        layout.height()
                    );
                    assert!(!layout.overflow);
                }
            }
        }
    }
}

#[test]
fn test_box_too_short_for_default_size_shrinks_text() {
    // 18pt start; two 30px lines (60px) at that size
    let start = 18.0 / PT_PER_PX;
    let measure = UniformMeasure {
        advance_ratio: 0.5,
        line_ratio: 1.25,
    };
    let engine = TextBoxLayoutEngine::new(4.0 / PT_PER_PX, 0.5 / PT_PER_PX);
    let initial = engine.wrap(&measure, "aaaa bbbb", 60.0, start);
    assert_eq!(initial.len() as f32 * measure.line_height(start), 60.0);

    let layout = engine.fit(&measure, "aaaa bbbb", 60.0, 40.0, start);
    assert!(layout.font_size < start);
    assert!(layout.height() <= 40.0);
}

#[tokio::test]
async fn test_failed_font_fetch_resolves_to_shared_fallback() {
    let cdn = Cdn::new(Vec::new(), "image/png");
    let base = Url::parse("https://mtl.example").unwrap();
    let cache = FontCache::new(Some(&base), Some(FONT), false);
    let fallback = cache.fallback().unwrap();

    cache.load_all(&cdn, &[], &CallContext::new()).await;
    cache.load_all(&cdn, &[], &CallContext::new()).await;

    for role in FontRole::ALL {
        for _ in 0..3 {
            let handle = cache.resolve(role).unwrap();
            assert!(Arc::ptr_eq(&handle, &fallback));
        }
    }
    assert_eq!(cache.remote_fetches(), 3);
    assert_eq!(cdn.font_hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_concurrent_font_loads_fetch_each_role_once() {
    let mut cdn = Cdn::new(Vec::new(), "image/png");
    cdn.serve_fonts = true;
    cdn.font_delay = Duration::from_millis(20);
    let base = Url::parse("https://mtl.example").unwrap();
    let cache = FontCache::new(Some(&base), Some(FONT), false);
    let ctx = CallContext::new();

    tokio::join!(
        cache.load_all(&cdn, &[], &ctx),
        cache.load_all(&cdn, &[], &ctx),
        cache.load_all(&cdn, &[], &ctx),
    );

    assert_eq!(cdn.font_hits.load(Ordering::SeqCst), 3);
    let sfx = cache.resolve(FontRole::Sfx).unwrap();
    assert_eq!(sfx.name, "sfx");
    assert!(!Arc::ptr_eq(&sfx, &cache.fallback().unwrap()));
}

#[tokio::test]
async fn test_cancelled_font_load_is_retried_later() {
    let mut cdn = Cdn::new(Vec::new(), "image/png");
    cdn.serve_fonts = true;
    let base = Url::parse("https://mtl.example/api").unwrap();
    let cache = FontCache::new(Some(&base), Some(FONT), false);
    let fallback = cache.fallback().unwrap();

    // caller gave up before anything was fetched
    let gone = CallContext::new();
    gone.cancel();
    cache.load_all(&cdn, &[], &gone).await;
    assert_eq!(cdn.font_hits.load(Ordering::SeqCst), 0);

    // caller gave up while the first font was downloading
    cdn.cancel_next_font.store(true, Ordering::SeqCst);
    cache.load_all(&cdn, &[], &CallContext::new()).await;
    assert_eq!(cdn.font_hits.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&cache.resolve(FontRole::Sub).unwrap(), &fallback));

    cache.load_all(&cdn, &[], &CallContext::new()).await;
    assert_eq!(cdn.font_hits.load(Ordering::SeqCst), 4);
    for role in FontRole::ALL {
        let handle = cache.resolve(role).unwrap();
        assert!(!Arc::ptr_eq(&handle, &fallback), "{} stuck on fallback", role.as_str());
    }
    assert!(cdn.requests().iter().all(|p| p.starts_with("/api/images/")));
}

#[tokio::test]
async fn test_disabled_fonts_never_touch_network() {
    let cdn = Arc::new(Cdn::new(blank_page(200, 120, ImageFormat::Png), "image/png"));
    let settings = OverlaySettings {
        disable_custom_fonts: true,
        ..settings_with_fonts()
    };
    let overlay = ComposedImageInterceptor::from_settings(&settings, Some(FONT));
    assert!(overlay.fonts().resolve(FontRole::Normal).is_none());
    let client = InterceptedClient::new(cdn.clone()).with_interceptor(Arc::new(overlay));

    let url = page_image_url("https://cdn.example/p/1.png", &[dialogue(10.0, 10.0, 180.0, 100.0, "Hello")], "en").unwrap();
    let response = client
        .execute(HttpRequest::get(Url::parse(&url).unwrap()), &CallContext::new())
        .await
        .unwrap();

    assert_eq!(response.header("content-type"), Some("image/png"));
    assert_eq!(cdn.requests(), vec!["/p/1.png".to_string()]);
}

#[tokio::test]
async fn test_plain_image_passes_through_byte_for_byte() {
    let original = blank_page(64, 64, ImageFormat::Png);
    let cdn = Arc::new(Cdn::new(original.clone(), "image/png"));
    let overlay = ComposedImageInterceptor::from_settings(&settings_with_fonts(), Some(FONT));
    let client = InterceptedClient::new(cdn.clone()).with_interceptor(Arc::new(overlay));

    for url in ["https://cdn.example/p/1.png", "https://cdn.example/p/1.png#page=3"] {
        let response = client
            .execute(HttpRequest::get(Url::parse(url).unwrap()), &CallContext::new())
            .await
            .unwrap();
        assert_eq!(&response.body[..], &original[..]);
    }
    // no font downloads for pages without a payload
    assert_eq!(cdn.font_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_overlay_draws_text_and_keeps_format() {
    let cdn = Arc::new(Cdn::new(blank_page(320, 200, ImageFormat::Jpeg), "image/jpeg"));
    let overlay = ComposedImageInterceptor::from_settings(&settings_with_fonts(), Some(FONT));
    let client = InterceptedClient::new(cdn.clone()).with_interceptor(Arc::new(overlay));

    let mut tilted = dialogue(20.0, 110.0, 140.0, 60.0, "KRAK");
    tilted.kind = "inside".into();
    tilted.angle = -15.0;
    let dialogues = [dialogue(20.0, 20.0, 280.0, 80.0, "Where did everyone go?"), tilted];
    let url = page_image_url("cdn.example/p/7.jpg", &dialogues, "en").unwrap();

    let response = client
        .execute(HttpRequest::get(Url::parse(&url).unwrap()), &CallContext::new())
        .await
        .unwrap();

    assert_eq!(response.header("content-type"), Some("image/jpeg"));
    assert_eq!(image::guess_format(&response.body).unwrap(), ImageFormat::Jpeg);

    let composed = image::load_from_memory(&response.body).unwrap().to_rgb8();
    assert_eq!(composed.dimensions(), (320, 200));
    let dark_pixels = composed.pixels().filter(|p| p.0.iter().all(|c| *c < 100)).count();
    assert!(dark_pixels > 50, "expected drawn text, found {} dark pixels", dark_pixels);

    // fonts were all requested before the page image
    let requests = cdn.requests();
    assert_eq!(requests.len(), 4);
    assert!(requests[..3].iter().all(|p| p.ends_with(".ttf")));
    assert_eq!(requests[3], "/p/7.jpg");
}

#[tokio::test]
async fn test_upstream_error_is_returned_without_compositing() {
    struct Gone;

    #[async_trait]
    impl HttpExecutor for Gone {
        async fn execute(&self, request: HttpRequest, _ctx: &CallContext) -> Result<HttpResponse> {
            Ok(HttpResponse {
                status: 410,
                url: request.url,
                headers: Vec::new(),
                body: Bytes::from_static(b"gone"),
            })
        }
    }

    let overlay = ComposedImageInterceptor::from_settings(&OverlaySettings::default(), Some(FONT));
    let client = InterceptedClient::new(Arc::new(Gone)).with_interceptor(Arc::new(overlay));
    let url = page_image_url("https://cdn.example/p/2.webp", &[dialogue(1.0, 1.0, 50.0, 20.0, "x")], "en").unwrap();
    let response = client
        .execute(HttpRequest::get(Url::parse(&url).unwrap()), &CallContext::new())
        .await
        .unwrap();
    assert_eq!(response.status, 410);
    assert_eq!(&response.body[..], b"gone");
}
