//! Optical character recognition engine.
//!
//! `OcrEngine` is the seam the coordinator works against; the
//! production implementation drives Tesseract through leptess.

use std::io::Cursor;
use std::sync::Arc;

use crate::error::ExtractError;

/// Recognized text plus the engine's mean per-token confidence, when
/// the engine reports one.
#[derive(Debug, Clone)]
pub struct OcrOutcome {
    pub text: String,
    /// Mean recognition confidence in [0, 1]. `None` when the engine
    /// reports nothing usable.
    pub confidence: Option<f64>,
}

pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image_bytes: &[u8]) -> Result<OcrOutcome, ExtractError>;
}

/// Tesseract-backed OCR via leptess.
#[derive(Clone)]
pub struct TesseractOcr {
    inner: Arc<TesseractOcrInner>,
}

struct TesseractOcrInner {
    languages: String,
    dpi: u32,
}

impl TesseractOcr {
    pub fn new(languages: &[String], dpi: u32) -> Self {
        let lang_str = if languages.is_empty() {
            "eng".to_string()
        } else {
            languages.join("+")
        };

        Self {
            inner: Arc::new(TesseractOcrInner {
                languages: lang_str,
                dpi,
            }),
        }
    }

    pub fn dpi(&self) -> u32 {
        self.inner.dpi
    }
}

impl OcrEngine for TesseractOcr {
    fn recognize(&self, image_bytes: &[u8]) -> Result<OcrOutcome, ExtractError> {
        let _span = tracing::info_span!("extractor.ocr").entered();

        // Load image
        let img = image::load_from_memory(image_bytes)
            .map_err(|e| ExtractError::OcrFailed(format!("Failed to load image: {}", e)))?;

        // Convert to PNG in memory for leptess
        let mut png_data = Vec::new();
        let mut cursor = Cursor::new(&mut png_data);
        img.write_to(&mut cursor, image::ImageFormat::Png)
            .map_err(|e| ExtractError::OcrFailed(format!("Failed to convert image: {}", e)))?;

        // Create Tesseract instance
        let mut lt = leptess::LepTess::new(None, &self.inner.languages).map_err(|e| {
            ExtractError::OcrFailed(format!("Failed to initialize Tesseract: {}", e))
        })?;

        lt.set_image_from_mem(&png_data)
            .map_err(|e| ExtractError::OcrFailed(format!("Failed to set image for OCR: {}", e)))?;

        let text = lt
            .get_utf8_text()
            .map_err(|e| ExtractError::OcrFailed(format!("OCR failed: {}", e)))?;

        // Tesseract reports mean word confidence 0..100; non-positive
        // means no tokens were recognized.
        let mean_conf = lt.mean_text_conf();
        let confidence = if mean_conf > 0 {
            Some(f64::from(mean_conf) / 100.0)
        } else {
            None
        };

        Ok(OcrOutcome { text, confidence })
    }
}

/// Stand-in engine when OCR is switched off in configuration. Jobs
/// that need OCR fail instead of silently returning nothing.
pub struct DisabledOcr;

impl OcrEngine for DisabledOcr {
    fn recognize(&self, _image_bytes: &[u8]) -> Result<OcrOutcome, ExtractError> {
        Err(ExtractError::OcrFailed(
            "OCR is disabled in configuration".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ocr_engine_creation() {
        let engine = TesseractOcr::new(&["eng".to_string(), "deu".to_string()], 300);
        assert_eq!(engine.inner.languages, "eng+deu");
        assert_eq!(engine.dpi(), 300);
    }

    #[test]
    fn test_ocr_engine_default_language() {
        let engine = TesseractOcr::new(&[], 300);
        assert_eq!(engine.inner.languages, "eng");
    }

    #[test]
    fn test_invalid_image_data_error() {
        let engine = TesseractOcr::new(&["eng".to_string()], 300);
        let result = engine.recognize(b"not valid image data");

        assert!(result.is_err());
        match result {
            Err(ExtractError::OcrFailed(msg)) => {
                assert!(msg.contains("Failed to load image"));
            }
            _ => panic!("Expected OcrFailed error for invalid image data"),
        }
    }

    #[test]
    fn test_empty_image_data_error() {
        let engine = TesseractOcr::new(&["eng".to_string()], 300);
        assert!(engine.recognize(&[]).is_err());
    }

    #[test]
    fn test_ocr_engine_clone_shares_settings() {
        let engine = TesseractOcr::new(&["fra".to_string()], 150);
        let cloned = engine.clone();
        assert_eq!(engine.dpi(), cloned.dpi());
        assert_eq!(engine.inner.languages, cloned.inner.languages);
    }
}
