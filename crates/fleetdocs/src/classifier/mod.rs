//! File classification by content inspection.
//!
//! The upload layer's declared content type is advisory only; strategy
//! selection trusts magic bytes. PDFs get a lightweight second pass
//! measuring extractable text density to separate born-digital files
//! from scans.

use crate::error::ClassifyError;

/// Minimum total extracted characters before a PDF counts as having a
/// usable text layer.
pub const MIN_TEXT_LAYER_CHARS: usize = 50;

/// Minimum characters per page for the text layer to be considered
/// usable rather than incidental (tuned empirically).
pub const MIN_CHARS_PER_PAGE: usize = 100;

/// Result of probing a PDF's embedded text.
#[derive(Debug, Clone)]
pub struct PdfProbe {
    /// Text extracted from the embedded text layer (may be empty).
    pub text: String,
    pub page_count: usize,
    /// Whether the text layer looks usable for direct extraction.
    pub has_text_layer: bool,
}

/// What kind of file the bytes actually are.
#[derive(Debug, Clone)]
pub enum Classification {
    /// A raster image; OCR is the only strategy.
    Image,
    /// A PDF, with its text-layer probe attached.
    Pdf(PdfProbe),
}

impl Classification {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Pdf(p) if p.has_text_layer => "pdf_text_layer",
            Self::Pdf(_) => "pdf_scanned",
        }
    }
}

/// Classifies file content. The claimed MIME type is logged for
/// diagnostics but plays no part in the decision.
pub fn classify(
    bytes: &[u8],
    mime_claimed: Option<&str>,
) -> Result<Classification, ClassifyError> {
    if bytes.is_empty() {
        return Err(ClassifyError::EmptyFile);
    }

    if is_pdf(bytes) {
        let probe = probe_pdf(bytes);
        tracing::debug!(
            kind = "pdf",
            pages = probe.page_count,
            text_chars = probe.text.chars().count(),
            has_text_layer = probe.has_text_layer,
            "classified file"
        );
        return Ok(Classification::Pdf(probe));
    }

    if is_image(bytes) {
        tracing::debug!(kind = "image", "classified file");
        return Ok(Classification::Image);
    }

    let detail = match mime_claimed {
        Some(mime) => format!("unrecognized content (claimed '{}')", mime),
        None => "unrecognized content".to_string(),
    };
    Err(ClassifyError::UnsupportedFormat(detail))
}

fn is_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF-")
}

fn is_image(bytes: &[u8]) -> bool {
    bytes.starts_with(b"\x89PNG\r\n\x1a\n")
        || bytes.starts_with(&[0xFF, 0xD8, 0xFF])
        || bytes.starts_with(b"GIF87a")
        || bytes.starts_with(b"GIF89a")
        || bytes.starts_with(b"BM")
        || bytes.starts_with(b"II*\0")
        || bytes.starts_with(b"MM\0*")
        || (bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP")
}

/// Probes a PDF for a usable text layer. Parse failure is treated as
/// "likely scanned" so a malformed file never blocks the pipeline.
pub fn probe_pdf(bytes: &[u8]) -> PdfProbe {
    let doc = match lopdf::Document::load_mem(bytes) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::warn!("PDF parse failed during classification: {}. Treating as scanned.", e);
            return PdfProbe {
                text: String::new(),
                page_count: 0,
                has_text_layer: false,
            };
        }
    };

    let pages = doc.get_pages();
    let page_count = pages.len();

    let mut text = String::new();
    for (page_num, _) in &pages {
        if let Ok(page_text) = doc.extract_text(&[*page_num]) {
            text.push_str(&page_text);
            text.push('\n');
        }
    }

    let total_chars = text.trim().chars().count();
    let chars_per_page = if page_count > 0 {
        total_chars / page_count
    } else {
        0
    };
    let has_text_layer =
        total_chars >= MIN_TEXT_LAYER_CHARS && chars_per_page >= MIN_CHARS_PER_PAGE;

    PdfProbe {
        text,
        page_count,
        has_text_layer,
    }
}
