//! Draws dialogue text onto a page image and re-encodes it.
//!
//! Each dialogue is laid out in a local frame with its origin at the box's
//! left edge and the text block top, rotated by `angle` degrees about that
//! origin. An outline pass in the background color goes first, then the
//! fill pass in the foreground color.

use crate::config::OverlaySettings;
use crate::error::{Result, SourceError};
use crate::overlay::fonts::{FontAsset, FontCache};
use crate::overlay::layout::{FittedLayout, TextBoxLayoutEngine};
use crate::overlay::payload::DialogueBox;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, Rgba, RgbaImage};

const BLACK: [u8; 3] = [0, 0, 0];
const WHITE: [u8; 3] = [255, 255, 255];

/// Foreground colors closer than this to the box background get inverted.
const MIN_COLOR_DISTANCE: f32 = 80.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Png,
    Jpeg,
    Webp,
}

impl OutputFormat {
    /// Picks the format from the extension before the fragment. Unknown
    /// extensions get PNG.
    pub fn from_url(url: &str) -> Self {
        let path = url.split('#').next().unwrap_or_default();
        let path = path.split('?').next().unwrap_or_default();
        let ext = path.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => OutputFormat::Jpeg,
            "webp" => OutputFormat::Webp,
            _ => OutputFormat::Png,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Webp => "image/webp",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompositorSettings {
    pub start_size: f32,
    pub min_size: f32,
    pub step: f32,
    pub stroke_width: f32,
    pub language: String,
}

impl Default for CompositorSettings {
    fn default() -> Self {
        Self::from(&OverlaySettings::default())
    }
}

impl From<&OverlaySettings> for CompositorSettings {
    fn from(settings: &OverlaySettings) -> Self {
        Self {
            start_size: settings.font_size_px(),
            min_size: settings.min_font_size_px(),
            step: settings.shrink_step_px(),
            stroke_width: settings.stroke_width_px,
            language: settings.language.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageCompositor {
    settings: CompositorSettings,
    engine: TextBoxLayoutEngine,
}

impl ImageCompositor {
    pub fn new(settings: CompositorSettings) -> Self {
        let engine = TextBoxLayoutEngine::new(settings.min_size, settings.step);
        Self { settings, engine }
    }

    pub fn settings(&self) -> &CompositorSettings {
        &self.settings
    }

    /// Decodes `image`, draws every usable dialogue and encodes as `format`.
    /// Dialogues with bad geometry, no text or no font are skipped.
    pub fn compose(
        &self,
        image: &[u8],
        format: OutputFormat,
        dialogues: &[DialogueBox],
        fonts: &FontCache,
    ) -> Result<Vec<u8>> {
        let mut canvas = image::load_from_memory(image)?.to_rgba8();
        let (width, height) = canvas.dimensions();

        // Colors are sampled before anything is drawn.
        let colors: Vec<([u8; 3], [u8; 3])> = dialogues.iter().map(|d| text_colors(&canvas, d)).collect();

        let mut drawn = 0;
        for (dialogue, (fg, bg)) in dialogues.iter().zip(colors) {
            if let Err(e) = dialogue.validate(width, height) {
                log::warn!("Skipping dialogue: {}", e);
                continue;
            }
            let text = dialogue.text_for(&self.settings.language).trim();
            if text.is_empty() {
                continue;
            }
            let Some(font) = fonts.resolve(dialogue.role()).or_else(|| fonts.fallback()) else {
                log::warn!("No font available for {:?} dialogue", dialogue.role());
                continue;
            };
            self.draw_dialogue(&mut canvas, dialogue, text, &font, fg, bg);
            drawn += 1;
        }
        log::debug!("Drew {}/{} dialogues on {}x{} image", drawn, dialogues.len(), width, height);

        encode(canvas, format)
    }

    /// Lays out `text` for `dialogue` with `font`, without drawing.
    pub fn layout(&self, dialogue: &DialogueBox, text: &str, font: &FontAsset) -> FittedLayout {
        let layout = self
            .engine
            .fit(font, text, dialogue.width, dialogue.height, self.settings.start_size);
        if layout.overflow {
            log::warn!(
                "{} in {}x{} box",
                SourceError::LayoutOverflow {
                    font_size: layout.font_size
                },
                dialogue.width,
                dialogue.height
            );
        }
        layout
    }

    fn draw_dialogue(
        &self,
        canvas: &mut RgbaImage,
        dialogue: &DialogueBox,
        text: &str,
        font: &FontAsset,
        fg: [u8; 3],
        bg: [u8; 3],
    ) {
        let layout = self.layout(dialogue, text, font);
        let top = layout.top_y(dialogue.y1, dialogue.height);
        let radius = (self.settings.stroke_width / 2.0).max(0.0);
        let pad = radius.ceil() as usize + 2;

        let fill = rasterize(font, &layout, dialogue.width, pad);
        let outline = fill.dilate(radius);

        let placement = Placement {
            origin: (dialogue.x1, top),
            angle: dialogue.angle.to_radians(),
            pad: pad as f32,
        };
        if radius > 0.0 {
            placement.blend(canvas, &outline, bg);
        }
        placement.blend(canvas, &fill, fg);
    }
}

/// Foreground and background for a dialogue. A foreground too close to the
/// pixel under the box center is replaced by that pixel's inverse.
fn text_colors(canvas: &RgbaImage, dialogue: &DialogueBox) -> ([u8; 3], [u8; 3]) {
    let fg = dialogue.foreground().unwrap_or(BLACK);
    let bg = dialogue.background().unwrap_or(WHITE);

    let (w, h) = canvas.dimensions();
    let cx = dialogue.center_x();
    let cy = dialogue.center_y();
    if w == 0 || h == 0 || !cx.is_finite() || !cy.is_finite() {
        return (fg, bg);
    }
    let x = (cx.max(0.0) as u32).min(w - 1);
    let y = (cy.max(0.0) as u32).min(h - 1);
    let Rgba([r, g, b, _]) = *canvas.get_pixel(x, y);
    let under = [r, g, b];

    if color_distance(under, fg) <= MIN_COLOR_DISTANCE {
        (invert(under), bg)
    } else {
        (fg, bg)
    }
}

pub fn color_distance(a: [u8; 3], b: [u8; 3]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = *x as f32 - *y as f32;
            d * d
        })
        .sum::<f32>()
        .sqrt()
}

fn invert(c: [u8; 3]) -> [u8; 3] {
    [255 - c[0], 255 - c[1], 255 - c[2]]
}

/// Glyph coverage in [0, 1].
#[derive(Debug, Clone)]
struct Mask {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Mask {
    fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    fn get(&self, x: isize, y: isize) -> f32 {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return 0.0;
        }
        self.data[y as usize * self.width + x as usize]
    }

    fn put_max(&mut self, x: isize, y: isize, value: f32) {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return;
        }
        let cell = &mut self.data[y as usize * self.width + x as usize];
        if value > *cell {
            *cell = value;
        }
    }

    fn sample(&self, x: f32, y: f32) -> f32 {
        let x0 = x.floor();
        let y0 = y.floor();
        let tx = x - x0;
        let ty = y - y0;
        let (x0, y0) = (x0 as isize, y0 as isize);
        let top = self.get(x0, y0) * (1.0 - tx) + self.get(x0 + 1, y0) * tx;
        let bottom = self.get(x0, y0 + 1) * (1.0 - tx) + self.get(x0 + 1, y0 + 1) * tx;
        top * (1.0 - ty) + bottom * ty
    }

    /// Grows coverage outward by `radius` pixels.
    fn dilate(&self, radius: f32) -> Mask {
        if radius <= 0.0 {
            return self.clone();
        }
        let reach = radius.ceil() as isize;
        let offsets: Vec<(isize, isize, f32)> = (-reach..=reach)
            .flat_map(|dy| (-reach..=reach).map(move |dx| (dx, dy)))
            .filter_map(|(dx, dy)| {
                let dist = ((dx * dx + dy * dy) as f32).sqrt();
                // soft edge over the last pixel
                let weight = (radius + 0.5 - dist).clamp(0.0, 1.0);
                (weight > 0.0).then_some((dx, dy, weight))
            })
            .collect();

        let mut out = Mask::new(self.width, self.height);
        for y in 0..self.height as isize {
            for x in 0..self.width as isize {
                let value = self.get(x, y);
                if value <= 0.0 {
                    continue;
                }
                for (dx, dy, weight) in &offsets {
                    out.put_max(x + dx, y + dy, value * weight);
                }
            }
        }
        out
    }
}

/// Renders the laid-out lines into a mask `pad` pixels larger than the box
/// on every side.
fn rasterize(font: &FontAsset, layout: &FittedLayout, box_width: f32, pad: usize) -> Mask {
    let width = box_width.ceil().max(1.0) as usize + pad * 2;
    let height = layout.height().ceil().max(1.0) as usize + pad * 2;
    let mut mask = Mask::new(width, height);

    for (index, line) in layout.lines.iter().enumerate() {
        let baseline = pad as f32 + index as f32 * layout.line_height + layout.ascent;
        let mut pen_x = pad as f32 + layout.line_x(index, box_width);

        for ch in line.text.chars() {
            let (metrics, bitmap) = font.font.rasterize(ch, layout.font_size);
            let left = (pen_x + metrics.xmin as f32).round() as isize;
            let top = (baseline - metrics.height as f32 - metrics.ymin as f32).round() as isize;
            for gy in 0..metrics.height {
                for gx in 0..metrics.width {
                    let coverage = bitmap[gy * metrics.width + gx] as f32 / 255.0;
                    if coverage > 0.0 {
                        mask.put_max(left + gx as isize, top + gy as isize, coverage);
                    }
                }
            }
            pen_x += metrics.advance_width;
        }
    }
    mask
}

/// Maps a local mask onto the canvas: translate to `origin`, rotate by `angle`.
struct Placement {
    origin: (f32, f32),
    angle: f32,
    pad: f32,
}

impl Placement {
    fn to_canvas(&self, lx: f32, ly: f32) -> (f32, f32) {
        let (sin, cos) = self.angle.sin_cos();
        (
            self.origin.0 + lx * cos - ly * sin,
            self.origin.1 + lx * sin + ly * cos,
        )
    }

    fn to_local(&self, x: f32, y: f32) -> (f32, f32) {
        let (sin, cos) = self.angle.sin_cos();
        let dx = x - self.origin.0;
        let dy = y - self.origin.1;
        (dx * cos + dy * sin, -dx * sin + dy * cos)
    }

    fn blend(&self, canvas: &mut RgbaImage, mask: &Mask, color: [u8; 3]) {
        let (cw, ch) = canvas.dimensions();
        let left = -self.pad;
        let top = -self.pad;
        let right = mask.width as f32 - self.pad;
        let bottom = mask.height as f32 - self.pad;

        let corners = [
            self.to_canvas(left, top),
            self.to_canvas(right, top),
            self.to_canvas(left, bottom),
            self.to_canvas(right, bottom),
        ];
        let min_x = corners.iter().map(|c| c.0).fold(f32::INFINITY, f32::min).floor().max(0.0);
        let min_y = corners.iter().map(|c| c.1).fold(f32::INFINITY, f32::min).floor().max(0.0);
        let max_x = corners.iter().map(|c| c.0).fold(f32::NEG_INFINITY, f32::max).ceil().min(cw as f32);
        let max_y = corners.iter().map(|c| c.1).fold(f32::NEG_INFINITY, f32::max).ceil().min(ch as f32);
        if min_x >= max_x || min_y >= max_y {
            return;
        }

        for py in min_y as u32..max_y as u32 {
            for px in min_x as u32..max_x as u32 {
                let (lx, ly) = self.to_local(px as f32 + 0.5, py as f32 + 0.5);
                let alpha = mask.sample(lx + self.pad - 0.5, ly + self.pad - 0.5);
                if alpha <= 0.0 {
                    continue;
                }
                let Rgba(channels) = canvas.get_pixel_mut(px, py);
                for (channel, target) in channels.iter_mut().zip(color) {
                    let blended = *channel as f32 * (1.0 - alpha) + target as f32 * alpha;
                    *channel = blended.round().clamp(0.0, 255.0) as u8;
                }
                let a = channels[3] as f32 / 255.0;
                channels[3] = ((alpha + a * (1.0 - alpha)) * 255.0).round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

fn encode(canvas: RgbaImage, format: OutputFormat) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let image = DynamicImage::ImageRgba8(canvas);
    match format {
        OutputFormat::Png => image.write_with_encoder(PngEncoder::new(&mut out))?,
        OutputFormat::Jpeg => {
            DynamicImage::ImageRgb8(image.to_rgb8()).write_with_encoder(JpegEncoder::new_with_quality(&mut out, 100))?
        }
        OutputFormat::Webp => image.write_with_encoder(WebPEncoder::new_lossless(&mut out))?,
    }
    Ok(out)
}
