//! The PDF page collaborator boundary.
//!
//! The core never parses PDF binaries. A [`PageSource`] hands it decoded
//! text runs plus the page viewport, one 1-based page at a time. Optimizers
//! await the source between iterations, so implementations are free to
//! decode lazily.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One atomic text run as reported by the PDF decoder.
///
/// `transform` is the run's affine matrix `[a, b, c, d, e, f]`; `width` and
/// `height` are the glyph-run extents in unscaled page units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRun {
    pub text: String,
    pub transform: [f64; 6],
    pub width: f64,
    pub height: f64,
}

/// Page viewport at scale 1.0.
///
/// `width`/`height` are the displayed (already rotated) dimensions;
/// `view_box` is `[x0, y0, x1, y1]` in unrotated PDF space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    pub view_box: [f64; 4],
    #[serde(default)]
    pub rotation: i32,
}

impl Viewport {
    /// Unrotated viewport covering `[0, 0, width, height]`.
    pub fn unrotated(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            view_box: [0.0, 0.0, width, height],
            rotation: 0,
        }
    }

    pub fn view_box_width(&self) -> f64 {
        self.view_box[2] - self.view_box[0]
    }

    pub fn view_box_height(&self) -> f64 {
        self.view_box[3] - self.view_box[1]
    }
}

/// Everything the core needs from one decoded page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageContent {
    pub page_number: u32,
    pub text_runs: Vec<TextRun>,
    #[serde(default)]
    pub viewport: Option<Viewport>,
}

/// Source of decoded pages.
///
/// Implementations must be `Send + Sync` so optimizer searches can run on a
/// worker task away from any interactive thread.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Number of pages in the document.
    fn page_count(&self) -> u32;

    /// Decode the given 1-based page.
    async fn page(&self, page_number: u32) -> Result<PageContent>;
}

/// A [`PageSource`] over pages already held in memory.
pub struct InMemoryPages {
    pages: Vec<PageContent>,
}

impl InMemoryPages {
    pub fn new(pages: Vec<PageContent>) -> Self {
        Self { pages }
    }

    pub fn pages(&self) -> &[PageContent] {
        &self.pages
    }
}

#[async_trait]
impl PageSource for InMemoryPages {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    async fn page(&self, page_number: u32) -> Result<PageContent> {
        self.pages
            .iter()
            .find(|p| p.page_number == page_number)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("page {} not found", page_number))
    }
}
