//! The dialogue payload carried in an image URL's fragment:
//! `https://cdn/page.webp#[{"x1":..,"y1":..,"width":..,"height":..,"angle":..,"type":..,"text":..}]`

use crate::error::{Result, SourceError};
use crate::models::PageImage;
use crate::overlay::fonts::FontRole;
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Image URL followed by a fragment that opens a JSON array (raw or percent-encoded).
static PAGE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[^#]*?\.(webp|png|jpe?g)#(\[|%5B)").expect("static regex")
});

/// Characters escaped when a payload is written into a URL fragment.
const FRAGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'#')
    .add(b'%')
    .add(b'{')
    .add(b'}')
    .add(b'|')
    .add(b'\\')
    .add(b'^');

/// Upper bound on dialogues accepted from one payload.
pub const MAX_DIALOGUES: usize = 512;

pub const DEFAULT_LANGUAGE: &str = "en";

/// Dialogue text: one string, or one string per language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DialogueText {
    Plain(String),
    ByLanguage(BTreeMap<String, String>),
}

/// A positioned, rotated text region to draw over a page image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueBox {
    pub x1: f32,
    pub y1: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub angle: f32,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub text: DialogueText,
    #[serde(default, alias = "fgColor", skip_serializing_if = "Option::is_none")]
    pub fg_color: Option<String>,
    #[serde(default, alias = "bgColor", skip_serializing_if = "Option::is_none")]
    pub bg_color: Option<String>,
}

impl DialogueBox {
    pub fn center_x(&self) -> f32 {
        self.x1 + self.width / 2.0
    }

    pub fn center_y(&self) -> f32 {
        self.y1 + self.height / 2.0
    }

    pub fn role(&self) -> FontRole {
        FontRole::from_kind(&self.kind)
    }

    /// Text in `lang`, falling back to English, then to any language present.
    pub fn text_for(&self, lang: &str) -> &str {
        match &self.text {
            DialogueText::Plain(text) => text,
            DialogueText::ByLanguage(map) => map
                .get(lang)
                .or_else(|| map.get(DEFAULT_LANGUAGE))
                .or_else(|| map.values().next())
                .map(String::as_str)
                .unwrap_or_default(),
        }
    }

    /// Checks the box against the image it will be drawn on.
    pub fn validate(&self, image_width: u32, image_height: u32) -> Result<()> {
        let numbers = [self.x1, self.y1, self.width, self.height, self.angle];
        if numbers.iter().any(|n| !n.is_finite()) {
            return Err(SourceError::InvalidArgument("dialogue has non-finite geometry".into()));
        }
        if self.width < 1.0 || self.height < 1.0 {
            return Err(SourceError::InvalidArgument(format!(
                "dialogue box {}x{} is empty",
                self.width, self.height
            )));
        }
        let (w, h) = (image_width as f32, image_height as f32);
        if self.x1 < 0.0 || self.y1 < 0.0 || self.x1 >= w || self.y1 >= h {
            return Err(SourceError::InvalidArgument(format!(
                "dialogue origin ({}, {}) outside {}x{} image",
                self.x1, self.y1, image_width, image_height
            )));
        }
        if self.width > w * 2.0 || self.height > h * 2.0 {
            return Err(SourceError::InvalidArgument(format!(
                "dialogue box {}x{} oversized for {}x{} image",
                self.width, self.height, image_width, image_height
            )));
        }
        Ok(())
    }

    /// `#RRGGBB` foreground override, if present and well-formed.
    pub fn foreground(&self) -> Option<[u8; 3]> {
        self.fg_color.as_deref().and_then(parse_hex_color)
    }

    pub fn background(&self) -> Option<[u8; 3]> {
        self.bg_color.as_deref().and_then(parse_hex_color)
    }
}

pub fn parse_hex_color(value: &str) -> Option<[u8; 3]> {
    let hex = value.trim().strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}

/// Whether this image URL carries an overlay payload.
pub fn has_overlay_payload(url: &str) -> bool {
    PAGE_REGEX.is_match(url)
}

/// Decodes the dialogues from a URL fragment (without the leading `#`).
pub fn decode_fragment(fragment: &str) -> Result<Vec<DialogueBox>> {
    let decoded = percent_decode_str(fragment)
        .decode_utf8()
        .map_err(|e| SourceError::parse(format!("overlay fragment is not utf-8: {}", e)))?;
    let dialogues: Vec<DialogueBox> = serde_json::from_str(&decoded)
        .map_err(|e| SourceError::parse(format!("overlay payload: {}", e)))?;
    if dialogues.len() > MAX_DIALOGUES {
        return Err(SourceError::parse(format!(
            "overlay payload has {} dialogues, limit is {}",
            dialogues.len(),
            MAX_DIALOGUES
        )));
    }
    Ok(dialogues)
}

/// Encodes dialogues into a fragment-safe string.
pub fn encode_fragment(dialogues: &[DialogueBox]) -> Result<String> {
    let json = serde_json::to_string(dialogues)?;
    Ok(utf8_percent_encode(&json, FRAGMENT).to_string())
}

/// Builds a page image URL carrying `dialogues` that have text in `lang`.
/// Scheme-less image URLs are assumed to be https.
pub fn page_image_url(image_url: &str, dialogues: &[DialogueBox], lang: &str) -> Result<String> {
    let image_url = image_url.trim();
    let image_url = if image_url.starts_with("http") {
        image_url.to_string()
    } else {
        format!("https://{}", image_url.trim_start_matches('/'))
    };
    let kept: Vec<DialogueBox> = dialogues
        .iter()
        .filter(|d| !d.text_for(lang).trim().is_empty())
        .cloned()
        .collect();
    Ok(format!("{}#{}", image_url, encode_fragment(&kept)?))
}

/// Page list for a chapter: one image per entry, in order, each carrying
/// its own dialogues.
pub fn page_images(pages: &[(String, Vec<DialogueBox>)], lang: &str) -> Result<Vec<PageImage>> {
    pages
        .iter()
        .enumerate()
        .map(|(index, (image_url, dialogues))| {
            Ok(PageImage {
                index,
                image_url: page_image_url(image_url, dialogues, lang)?,
            })
        })
        .collect()
}
