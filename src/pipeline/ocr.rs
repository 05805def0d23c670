//! Optical character recognition seam.
//!
//! The cascade only needs "image in, text out". [`TesseractEngine`] provides
//! that when the crate is built with the `tesseract` feature; otherwise
//! [`UnavailableOcrEngine`] reports the engine as missing and the cascade
//! records a zero-length OCR attempt.

use crate::error::StageError;
use image::DynamicImage;
#[cfg(feature = "tesseract")]
use std::io::Cursor;
#[cfg(feature = "tesseract")]
use std::path::PathBuf;

/// Recognise text on one rendered page. Blocking.
///
/// The cascade hands engines pages already passed through [`preprocess`].
pub trait OcrEngine: Send + Sync {
    /// `languages` is a Tesseract-style list such as `hun+eng+deu+fra`.
    fn recognize(&self, page: &DynamicImage, languages: &str) -> Result<String, StageError>;
}

/// Grayscale copy of a page. Colour adds nothing for print recognition.
pub fn preprocess(page: &DynamicImage) -> DynamicImage {
    DynamicImage::ImageLuma8(page.to_luma8())
}

/// Tesseract via `libtesseract`.
#[cfg(feature = "tesseract")]
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    tessdata_dir: Option<PathBuf>,
    dpi: u32,
}

#[cfg(feature = "tesseract")]
impl TesseractEngine {
    pub fn new(tessdata_dir: Option<PathBuf>, dpi: u32) -> Self {
        Self { tessdata_dir, dpi }
    }
}

#[cfg(feature = "tesseract")]
impl OcrEngine for TesseractEngine {
    fn recognize(&self, page: &DynamicImage, languages: &str) -> Result<String, StageError> {
        let ocr_err = |detail: String| StageError::Ocr { page: 0, detail };

        let mut png = Vec::new();
        page.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(|e| ocr_err(e.to_string()))?;

        let datadir = match &self.tessdata_dir {
            Some(dir) => Some(dir.to_str().ok_or_else(|| StageError::EngineUnavailable {
                engine: "tesseract".to_string(),
                detail: "tessdata path is not valid UTF-8".to_string(),
            })?),
            None => None,
        };

        let tess = tesseract::Tesseract::new(datadir, Some(languages)).map_err(|e| {
            StageError::EngineUnavailable {
                engine: "tesseract".to_string(),
                detail: format!("{e:?}"),
            }
        })?;

        let mut tess = tess
            .set_image_from_mem(&png)
            .map_err(|e| ocr_err(format!("{e:?}")))?
            .set_source_resolution(self.dpi as i32);

        tess.get_text().map_err(|e| ocr_err(format!("{e:?}")))
    }
}

/// Stand-in used when no OCR engine is compiled in.
#[derive(Debug, Clone, Default)]
pub struct UnavailableOcrEngine;

impl OcrEngine for UnavailableOcrEngine {
    fn recognize(&self, _page: &DynamicImage, _languages: &str) -> Result<String, StageError> {
        Err(StageError::EngineUnavailable {
            engine: "tesseract".to_string(),
            detail: "built without the `tesseract` feature".to_string(),
        })
    }
}
