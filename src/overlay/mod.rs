//! Machine-translation text overlay for page images.

pub mod compositor;
pub mod fonts;
pub mod interceptor;
pub mod layout;
pub mod payload;

pub use compositor::{CompositorSettings, ImageCompositor, OutputFormat};
pub use fonts::{FontAsset, FontCache, FontHandle, FontRole};
pub use interceptor::ComposedImageInterceptor;
pub use layout::{FittedLayout, TextBoxLayoutEngine, TextMeasure};
pub use payload::{DialogueBox, DialogueText};
