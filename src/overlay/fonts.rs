//! Per-role font cache.
//!
//! Each role (`normal`, `sub`, `sfx`) is fetched at most once from
//! `{base}/images/{role}.ttf`. A failed fetch or an unparsable font falls
//! back to the bundled default, and that outcome is kept for the life of
//! the cache. A load abandoned by its caller (cancelled or past its
//! deadline) stores nothing, so a later load fetches again.

use crate::error::{Result, SourceError};
use crate::http_client::{CallContext, HttpExecutor, HttpRequest};
use fontdue::{Font, FontSettings};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::OnceCell;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FontRole {
    Normal,
    Sub,
    Sfx,
}

impl FontRole {
    pub const ALL: [FontRole; 3] = [FontRole::Sub, FontRole::Sfx, FontRole::Normal];

    /// Maps a dialogue `type` onto the font used to draw it.
    pub fn from_kind(kind: &str) -> Self {
        match kind.trim().to_ascii_lowercase().as_str() {
            "sub" | "narration" => FontRole::Sub,
            "sfx" | "inside" | "outside" => FontRole::Sfx,
            _ => FontRole::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FontRole::Normal => "normal",
            FontRole::Sub => "sub",
            FontRole::Sfx => "sfx",
        }
    }
}

/// A parsed font plus where it came from.
pub struct FontAsset {
    pub name: String,
    pub font: Font,
}

impl fmt::Debug for FontAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FontAsset").field("name", &self.name).finish()
    }
}

impl FontAsset {
    pub fn from_bytes(name: &str, bytes: &[u8]) -> Result<Self> {
        let font = Font::from_bytes(bytes, FontSettings::default())
            .map_err(|e| SourceError::Font(format!("{}: {}", name, e)))?;
        Ok(Self {
            name: name.to_string(),
            font,
        })
    }
}

pub type FontHandle = Arc<FontAsset>;

#[derive(Debug)]
pub struct FontCache {
    remote: HashMap<FontRole, Url>,
    slots: HashMap<FontRole, OnceCell<Option<FontHandle>>>,
    fallback: Option<FontHandle>,
    disabled: bool,
    remote_fetches: AtomicUsize,
}

impl FontCache {
    /// `base_url` serves the role fonts; `None` means fallback only.
    /// `fallback` is the bundled font bytes, parsed once here.
    pub fn new(base_url: Option<&Url>, fallback: Option<&[u8]>, disabled: bool) -> Self {
        let remote = match base_url {
            Some(base) if !disabled => FontRole::ALL
                .iter()
                .filter_map(|role| role_url(base, *role).map(|url| (*role, url)))
                .collect(),
            _ => HashMap::new(),
        };
        let fallback = fallback.and_then(|bytes| match FontAsset::from_bytes("fallback", bytes) {
            Ok(asset) => Some(Arc::new(asset)),
            Err(e) => {
                log::warn!("Bundled fallback font unusable: {}", e);
                None
            }
        });

        Self {
            remote,
            slots: FontRole::ALL.iter().map(|role| (*role, OnceCell::new())).collect(),
            fallback,
            disabled,
            remote_fetches: AtomicUsize::new(0),
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn fallback(&self) -> Option<FontHandle> {
        self.fallback.clone()
    }

    /// How many remote font downloads have been started.
    pub fn remote_fetches(&self) -> usize {
        self.remote_fetches.load(Ordering::SeqCst)
    }

    /// Loads every role, one at a time. Concurrent callers share a single
    /// fetch per role. No-op when custom fonts are disabled.
    pub async fn load_all(&self, client: &dyn HttpExecutor, headers: &[(String, String)], ctx: &CallContext) {
        if self.disabled {
            return;
        }
        for role in FontRole::ALL {
            if ctx.is_cancelled() || ctx.is_expired() {
                return;
            }
            self.load(role, client, headers, ctx).await;
        }
    }

    async fn load(
        &self,
        role: FontRole,
        client: &dyn HttpExecutor,
        headers: &[(String, String)],
        ctx: &CallContext,
    ) -> Option<FontHandle> {
        let slot = self.slots.get(&role)?;
        let loaded: Result<&Option<FontHandle>> = slot
            .get_or_try_init(|| async move {
                let Some(url) = self.remote.get(&role) else {
                    return Ok(self.fallback.clone());
                };
                ctx.check(url)?;
                self.remote_fetches.fetch_add(1, Ordering::SeqCst);
                match self.fetch(role, url, client, headers, ctx).await {
                    Ok(asset) => {
                        log::info!("Loaded {} font from {}", role.as_str(), url);
                        Ok(Some(Arc::new(asset)))
                    }
                    Err(e) if ctx.is_cancelled() || ctx.is_expired() => Err(e),
                    Err(e) => {
                        log::warn!("Font {} unavailable ({}), using fallback", role.as_str(), e);
                        Ok(self.fallback.clone())
                    }
                }
            })
            .await;
        match loaded {
            Ok(handle) => handle.clone(),
            Err(e) => {
                log::debug!("Font {} load abandoned: {}", role.as_str(), e);
                self.fallback.clone()
            }
        }
    }

    async fn fetch(
        &self,
        role: FontRole,
        url: &Url,
        client: &dyn HttpExecutor,
        headers: &[(String, String)],
        ctx: &CallContext,
    ) -> Result<FontAsset> {
        let mut request = HttpRequest::get(url.clone());
        request.headers.extend(headers.iter().cloned());
        let response = client.execute(request, ctx).await?.error_for_status()?;
        FontAsset::from_bytes(role.as_str(), &response.body)
    }

    /// The font for `role`: `None` when custom fonts are disabled, the
    /// loaded font after `load_all`, otherwise the fallback.
    pub fn resolve(&self, role: FontRole) -> Option<FontHandle> {
        if self.disabled {
            return None;
        }
        match self.slots.get(&role).and_then(OnceCell::get) {
            Some(loaded) => loaded.clone(),
            None => self.fallback.clone(),
        }
    }
}

/// `{base}/images/{role}.ttf`, keeping any path already on `base`.
fn role_url(base: &Url, role: FontRole) -> Option<Url> {
    let file = format!("{}.ttf", role.as_str());
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .ok()?
        .pop_if_empty()
        .extend(["images", file.as_str()]);
    Some(url)
}
