//! Word-wrapped, centered text layout that shrinks until it fits its box.
//!
//! Sizes are in pixels. Points convert with `PT_PER_PX`.

use crate::overlay::fonts::FontAsset;

/// 1px = 0.75pt
pub const PT_PER_PX: f32 = 0.75;

const MIN_STEP: f32 = 0.1;

/// Glyph metrics the layout needs.
pub trait TextMeasure {
    fn advance(&self, ch: char, size: f32) -> f32;

    /// Baseline-to-baseline distance.
    fn line_height(&self, size: f32) -> f32;

    /// Distance from the top of a line to its baseline.
    fn ascent(&self, size: f32) -> f32 {
        self.line_height(size) * 0.8
    }

    fn text_width(&self, text: &str, size: f32) -> f32 {
        text.chars().map(|ch| self.advance(ch, size)).sum()
    }
}

impl TextMeasure for FontAsset {
    fn advance(&self, ch: char, size: f32) -> f32 {
        self.font.metrics(ch, size).advance_width
    }

    fn line_height(&self, size: f32) -> f32 {
        self.font
            .horizontal_line_metrics(size)
            .map(|m| m.new_line_size)
            .unwrap_or(size * 1.2)
    }

    fn ascent(&self, size: f32) -> f32 {
        self.font
            .horizontal_line_metrics(size)
            .map(|m| m.ascent)
            .unwrap_or(size)
    }
}

/// Every glyph is `advance_ratio * size` wide; lines are `line_ratio * size` tall.
#[derive(Debug, Clone, Copy)]
pub struct UniformMeasure {
    pub advance_ratio: f32,
    pub line_ratio: f32,
}

impl Default for UniformMeasure {
    fn default() -> Self {
        Self {
            advance_ratio: 0.5,
            line_ratio: 1.2,
        }
    }
}

impl TextMeasure for UniformMeasure {
    fn advance(&self, _ch: char, size: f32) -> f32 {
        size * self.advance_ratio
    }

    fn line_height(&self, size: f32) -> f32 {
        size * self.line_ratio
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutLine {
    pub text: String,
    pub width: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FittedLayout {
    pub lines: Vec<LayoutLine>,
    pub font_size: f32,
    pub line_height: f32,
    pub ascent: f32,
    /// Still taller than the box at the minimum size.
    pub overflow: bool,
}

impl FittedLayout {
    pub fn height(&self) -> f32 {
        self.lines.len() as f32 * self.line_height
    }

    /// Horizontal offset of line `index` inside a box `box_width` wide.
    pub fn line_x(&self, index: usize, box_width: f32) -> f32 {
        self.lines
            .get(index)
            .map(|line| (box_width - line.width) / 2.0)
            .unwrap_or(0.0)
    }

    /// Top of the text block. Centered on the box when the box has room
    /// for more lines than the text uses, otherwise pinned to the box top.
    pub fn top_y(&self, y1: f32, box_height: f32) -> f32 {
        let line_count = self.lines.len() as f32;
        if self.line_height <= 0.0 {
            return y1;
        }
        let capacity = box_height / self.line_height;
        if line_count < capacity {
            y1 + box_height / 2.0 - line_count / 2.0 * self.line_height
        } else {
            y1
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TextBoxLayoutEngine {
    min_size: f32,
    step: f32,
}

impl TextBoxLayoutEngine {
    pub fn new(min_size: f32, step: f32) -> Self {
        Self {
            min_size: min_size.max(1.0),
            step: step.max(MIN_STEP),
        }
    }

    pub fn min_size(&self) -> f32 {
        self.min_size
    }

    /// Greedy word wrap. Explicit newlines always break; words wider than
    /// the box break between characters.
    pub fn wrap(&self, measure: &dyn TextMeasure, text: &str, width: f32, size: f32) -> Vec<LayoutLine> {
        let space = measure.advance(' ', size);
        let mut lines = Vec::new();

        for paragraph in text.split('\n') {
            let mut current = String::new();
            let mut current_width = 0.0;

            for word in paragraph.split_whitespace() {
                let word_width = measure.text_width(word, size);

                if !current.is_empty() && current_width + space + word_width <= width {
                    current.push(' ');
                    current.push_str(word);
                    current_width += space + word_width;
                    continue;
                }
                if !current.is_empty() {
                    lines.push(LayoutLine {
                        text: std::mem::take(&mut current),
                        width: current_width,
                    });
                    current_width = 0.0;
                }
                if word_width <= width {
                    current.push_str(word);
                    current_width = word_width;
                    continue;
                }

                for ch in word.chars() {
                    let ch_width = measure.advance(ch, size);
                    if !current.is_empty() && current_width + ch_width > width {
                        lines.push(LayoutLine {
                            text: std::mem::take(&mut current),
                            width: current_width,
                        });
                        current_width = 0.0;
                    }
                    current.push(ch);
                    current_width += ch_width;
                }
            }

            lines.push(LayoutLine {
                text: current,
                width: current_width,
            });
        }

        lines
    }

    /// Lays out `text` at `start_size`, shrinking by the step until the
    /// block fits `height`. Stops at the minimum size with `overflow` set
    /// and returns that best-effort layout.
    pub fn fit(
        &self,
        measure: &dyn TextMeasure,
        text: &str,
        width: f32,
        height: f32,
        start_size: f32,
    ) -> FittedLayout {
        let floor = self.min_size.min(start_size);
        let mut size = start_size;

        loop {
            let layout = FittedLayout {
                lines: self.wrap(measure, text, width, size),
                font_size: size,
                line_height: measure.line_height(size),
                ascent: measure.ascent(size),
                overflow: false,
            };
            if layout.height() <= height {
                return layout;
            }
            if size <= floor {
                return FittedLayout {
                    overflow: true,
                    ..layout
                };
            }
            // the floor itself is always tried
            size = (size - self.step).max(floor);
        }
    }
}
