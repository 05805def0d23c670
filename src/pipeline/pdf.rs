//! PDF access: text layer, positioned characters and page rasterisation.
//!
//! [`PdfEngine`] is the seam the cascade talks to; [`PdfiumEngine`] is the
//! production implementation. All methods are blocking and are called from
//! `spawn_blocking` because pdfium keeps thread-local state and must not run
//! on a Tokio worker.
//!
//! A fresh `Pdfium` binding is created per call. The OS caches the `dlopen`,
//! so repeat binds are cheap, and no library handle outlives a request.

use crate::error::{NutritionError, StageError};
use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::{debug, warn};

/// Longest edge of a rendered page, in pixels.
const MAX_DIMENSION_PX: i32 = 4096;

/// PDF user-space units per inch.
const POINTS_PER_INCH: f32 = 72.0;

/// Vertical distance (in points) within which characters share a line.
pub const LINE_TOLERANCE_PT: f32 = 5.0;

/// Horizontal gap, as a fraction of the previous glyph width, that implies a space.
const WORD_GAP_FACTOR: f32 = 0.3;

/// Blocking access to a PDF document's content.
pub trait PdfEngine: Send + Sync {
    /// Number of pages. Fails when the document cannot be opened.
    fn page_count(&self, pdf: &[u8]) -> Result<usize, StageError>;

    /// Plain text layer of every page, pages separated by a blank line.
    fn extract_text(&self, pdf: &[u8]) -> Result<String, StageError>;

    /// Text rebuilt from character positions, one output line per visual line.
    fn extract_layout_text(&self, pdf: &[u8]) -> Result<String, StageError>;

    /// Rasterise every page at `dpi`.
    fn render_pages(&self, pdf: &[u8], dpi: u32) -> Result<Vec<DynamicImage>, StageError>;
}

/// A character with its lower-left corner in PDF user space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionedChar {
    pub ch: char,
    pub x: f32,
    pub y: f32,
    pub width: f32,
}

/// Group positioned characters into visual lines.
///
/// Characters whose baselines are within [`LINE_TOLERANCE_PT`] of a line's
/// first character join that line. Lines are emitted top to bottom (PDF y
/// grows upward), characters left to right, and a space is inserted where
/// the horizontal gap suggests a word break that the text layer omitted.
pub fn group_into_lines(chars: &[PositionedChar]) -> Vec<String> {
    let mut lines: Vec<(f32, Vec<PositionedChar>)> = Vec::new();

    for c in chars.iter().filter(|c| !c.ch.is_control()) {
        match lines
            .iter_mut()
            .find(|(y, _)| (y - c.y).abs() <= LINE_TOLERANCE_PT)
        {
            Some((_, members)) => members.push(*c),
            None => lines.push((c.y, vec![*c])),
        }
    }

    lines.sort_by(|a, b| b.0.total_cmp(&a.0));

    lines
        .into_iter()
        .filter_map(|(_, mut members)| {
            members.sort_by(|a, b| a.x.total_cmp(&b.x));
            let line = join_line(&members);
            let trimmed = line.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .collect()
}

fn join_line(members: &[PositionedChar]) -> String {
    let mut out = String::with_capacity(members.len());
    let mut prev: Option<&PositionedChar> = None;
    for c in members {
        if let Some(p) = prev {
            let gap = c.x - (p.x + p.width);
            let needs_space = gap > p.width.max(1.0) * WORD_GAP_FACTOR
                && !p.ch.is_whitespace()
                && !c.ch.is_whitespace();
            if needs_space {
                out.push(' ');
            }
        }
        out.push(c.ch);
        prev = Some(c);
    }
    out
}

// ── pdfium implementation ────────────────────────────────────────────────

/// [`PdfEngine`] backed by Google's pdfium.
#[derive(Debug, Clone, Default)]
pub struct PdfiumEngine {
    password: Option<String>,
}

impl PdfiumEngine {
    /// Verify that pdfium can be bound, so a missing library fails the
    /// request up front instead of surfacing as an empty cascade.
    pub fn new(password: Option<String>) -> Result<Self, NutritionError> {
        bind_pdfium().map_err(|e| NutritionError::PdfiumBindingFailed(e.to_string()))?;
        Ok(Self { password })
    }

    fn with_document<T>(
        &self,
        pdf: &[u8],
        f: impl FnOnce(&PdfDocument<'_>) -> Result<T, StageError>,
    ) -> Result<T, StageError> {
        let pdfium = bind_pdfium().map_err(|e| StageError::EngineUnavailable {
            engine: "pdfium".to_string(),
            detail: e.to_string(),
        })?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf, self.password.as_deref())
            .map_err(map_load_error)?;
        f(&document)
    }
}

/// Bind to pdfium: `PDFIUM_LIB_PATH` first, then the system library.
pub fn bind_pdfium() -> Result<Pdfium, PdfiumError> {
    if let Ok(path) = std::env::var("PDFIUM_LIB_PATH") {
        debug!(path = %path, "Binding pdfium from PDFIUM_LIB_PATH");
        let lib = Pdfium::pdfium_platform_library_name_at_path(&path);
        let bindings = Pdfium::bind_to_library(&lib).or_else(|_| Pdfium::bind_to_library(&path))?;
        return Ok(Pdfium::new(bindings));
    }
    Ok(Pdfium::new(Pdfium::bind_to_system_library()?))
}

fn map_load_error(e: PdfiumError) -> StageError {
    let msg = format!("{e:?}");
    let lower = msg.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        StageError::Pdf {
            detail: "document is encrypted".to_string(),
        }
    } else {
        StageError::Pdf { detail: msg }
    }
}

impl PdfEngine for PdfiumEngine {
    fn page_count(&self, pdf: &[u8]) -> Result<usize, StageError> {
        self.with_document(pdf, |doc| Ok(doc.pages().len() as usize))
    }

    fn extract_text(&self, pdf: &[u8]) -> Result<String, StageError> {
        self.with_document(pdf, |doc| {
            let mut pages_text = Vec::new();
            for (idx, page) in doc.pages().iter().enumerate() {
                match page.text() {
                    Ok(text) => pages_text.push(text.all()),
                    Err(e) => warn!(page = idx + 1, "No text layer: {:?}", e),
                }
            }
            Ok(pages_text.join("\n\n"))
        })
    }

    fn extract_layout_text(&self, pdf: &[u8]) -> Result<String, StageError> {
        self.with_document(pdf, |doc| {
            let mut pages_text = Vec::new();
            for (idx, page) in doc.pages().iter().enumerate() {
                let text = match page.text() {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(page = idx + 1, "No text layer: {:?}", e);
                        continue;
                    }
                };
                let mut chars = Vec::new();
                for pdf_char in text.chars().iter() {
                    let Some(ch) = pdf_char.unicode_char() else {
                        continue;
                    };
                    let Ok(bounds) = pdf_char.loose_bounds() else {
                        continue;
                    };
                    chars.push(PositionedChar {
                        ch,
                        x: bounds.left().value,
                        y: bounds.bottom().value,
                        width: bounds.width().value,
                    });
                }
                pages_text.push(group_into_lines(&chars).join("\n"));
            }
            Ok(pages_text.join("\n\n"))
        })
    }

    fn render_pages(&self, pdf: &[u8], dpi: u32) -> Result<Vec<DynamicImage>, StageError> {
        self.with_document(pdf, |doc| {
            let render_config = PdfRenderConfig::new()
                .scale_page_by_factor(dpi as f32 / POINTS_PER_INCH)
                .set_maximum_width(MAX_DIMENSION_PX)
                .set_maximum_height(MAX_DIMENSION_PX);

            let mut images = Vec::new();
            for (idx, page) in doc.pages().iter().enumerate() {
                let bitmap =
                    page.render_with_config(&render_config)
                        .map_err(|e| StageError::Render {
                            page: idx + 1,
                            detail: format!("{e:?}"),
                        })?;
                let image = bitmap.as_image();
                debug!(
                    "Rendered page {} → {}x{} px",
                    idx + 1,
                    image.width(),
                    image.height()
                );
                images.push(image);
            }
            Ok(images)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pc(ch: char, x: f32, y: f32) -> PositionedChar {
        PositionedChar { ch, x, y, width: 5.0 }
    }

    #[test]
    fn groups_by_baseline_within_tolerance() {
        let chars = [
            pc('b', 10.0, 100.0),
            pc('a', 5.0, 102.0),
            pc('x', 5.0, 80.0),
        ];
        assert_eq!(group_into_lines(&chars), vec!["ab", "x"]);
    }

    #[test]
    fn top_line_first() {
        let chars = [pc('2', 0.0, 10.0), pc('1', 0.0, 700.0)];
        assert_eq!(group_into_lines(&chars), vec!["1", "2"]);
    }

    #[test]
    fn inserts_space_at_gaps() {
        let chars = [
            pc('F', 0.0, 50.0),
            pc('a', 5.0, 50.0),
            pc('t', 10.0, 50.0),
            pc('3', 60.0, 50.0),
        ];
        assert_eq!(group_into_lines(&chars), vec!["Fat 3"]);
    }

    #[test]
    fn existing_spaces_not_doubled() {
        let chars = [pc('a', 0.0, 50.0), pc(' ', 5.0, 50.0), pc('b', 20.0, 50.0)];
        assert_eq!(group_into_lines(&chars), vec!["a b"]);
    }

    #[test]
    fn whitespace_only_lines_dropped() {
        let chars = [pc(' ', 0.0, 50.0), pc('\n', 0.0, 50.0), pc('z', 0.0, 20.0)];
        assert_eq!(group_into_lines(&chars), vec!["z"]);
    }
}
