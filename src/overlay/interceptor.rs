use crate::config::OverlaySettings;
use crate::error::Result;
use crate::http_client::{CallContext, HttpExecutor, HttpRequest, HttpResponse, Interceptor};
use crate::overlay::compositor::{CompositorSettings, ImageCompositor, OutputFormat};
use crate::overlay::fonts::FontCache;
use crate::overlay::payload::{decode_fragment, has_overlay_payload};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use url::Url;

/// Renders the dialogue payload of `...png#[...]` image requests onto the
/// fetched image. Every other request goes through untouched.
pub struct ComposedImageInterceptor {
    fonts: Arc<FontCache>,
    compositor: Arc<ImageCompositor>,
}

impl ComposedImageInterceptor {
    pub fn new(fonts: Arc<FontCache>, compositor: ImageCompositor) -> Self {
        Self {
            fonts,
            compositor: Arc::new(compositor),
        }
    }

    /// Builds the font cache and compositor from `[overlay]` settings.
    /// `fallback_font` is the bundled font used when a role font is missing.
    pub fn from_settings(settings: &OverlaySettings, fallback_font: Option<&[u8]>) -> Self {
        let base = settings
            .font_base_url
            .as_deref()
            .and_then(|raw| match Url::parse(raw) {
                Ok(url) => Some(url),
                Err(e) => {
                    log::warn!("Ignoring font_base_url {:?}: {}", raw, e);
                    None
                }
            });
        let fonts = FontCache::new(base.as_ref(), fallback_font, settings.disable_custom_fonts);
        Self::new(Arc::new(fonts), ImageCompositor::new(CompositorSettings::from(settings)))
    }

    pub fn fonts(&self) -> &Arc<FontCache> {
        &self.fonts
    }
}

#[async_trait]
impl Interceptor for ComposedImageInterceptor {
    async fn intercept(
        &self,
        request: HttpRequest,
        ctx: &CallContext,
        next: &dyn HttpExecutor,
    ) -> Result<HttpResponse> {
        if !has_overlay_payload(request.url.as_str()) {
            return next.execute(request, ctx).await;
        }

        let format = OutputFormat::from_url(request.url.as_str());
        let dialogues = match decode_fragment(request.url.fragment().unwrap_or_default()) {
            Ok(dialogues) => dialogues,
            Err(e) => {
                log::warn!("Unreadable overlay payload on {}: {}", request.url, e);
                Vec::new()
            }
        };

        let mut image_request = request;
        image_request.url.set_fragment(None);

        // Fonts first so the image download never overlaps the font downloads.
        self.fonts.load_all(next, &image_request.headers, ctx).await;

        let response = next.execute(image_request, ctx).await?;
        if !response.is_success() {
            return Ok(response);
        }
        if dialogues.is_empty() {
            return Ok(response);
        }

        log::debug!("Composing {} dialogues onto {}", dialogues.len(), response.url);
        let compositor = Arc::clone(&self.compositor);
        let fonts = Arc::clone(&self.fonts);
        let image = response.body.clone();
        let composed = tokio::task::spawn_blocking(move || compositor.compose(&image, format, &dialogues, &fonts)).await??;

        let mut headers: Vec<(String, String)> = response
            .headers
            .into_iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case("content-type") && !name.eq_ignore_ascii_case("content-length"))
            .collect();
        headers.push(("Content-Type".to_string(), format.content_type().to_string()));

        Ok(HttpResponse {
            status: response.status,
            url: response.url,
            headers,
            body: Bytes::from(composed),
        })
    }
}
