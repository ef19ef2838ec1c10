//! PDF page rasterization for the OCR path.
//!
//! Scanned PDFs are rendered page by page to PNG images which are then
//! fed to the OCR engine. Rendering shells out to poppler-utils
//! (`pdftoppm`/`pdfinfo`), writing the PDF to a temp file first.

use std::process::Command;

use crate::error::ExtractError;

/// Renders PDF pages to images. Behind a trait so tests can run the
/// OCR path without poppler installed.
pub trait PageRasterizer: Send + Sync {
    /// Number of pages in the document. Used when the PDF could not be
    /// parsed for a structural page count.
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, ExtractError>;

    /// Renders one page (1-based) to an encoded image.
    fn rasterize_page(&self, pdf_bytes: &[u8], page_num: u32) -> Result<Vec<u8>, ExtractError>;
}

/// poppler-utils backed rasterizer.
pub struct PopplerRasterizer {
    dpi: u32,
}

impl PopplerRasterizer {
    pub fn new(dpi: u32) -> Self {
        Self { dpi }
    }
}

impl PageRasterizer for PopplerRasterizer {
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, ExtractError> {
        count_pdf_pages(pdf_bytes)
    }

    fn rasterize_page(&self, pdf_bytes: &[u8], page_num: u32) -> Result<Vec<u8>, ExtractError> {
        render_pdf_page_to_image(pdf_bytes, page_num, self.dpi)
    }
}

/// Get the page count of a PDF using pdfinfo (poppler-utils).
/// Used as fallback when lopdf can't parse the PDF structure.
fn count_pdf_pages(pdf_bytes: &[u8]) -> Result<usize, ExtractError> {
    let temp_dir = std::env::temp_dir();
    let pdf_path = temp_dir.join(format!("fleetdocs_pagecount_{}.pdf", uuid::Uuid::new_v4()));

    std::fs::write(&pdf_path, pdf_bytes)
        .map_err(|e| ExtractError::PdfProcessing(format!("Failed to write temp PDF: {}", e)))?;

    let output = Command::new("pdfinfo")
        .arg(&pdf_path)
        .output()
        .map_err(|e| {
            let _ = std::fs::remove_file(&pdf_path);
            ExtractError::PdfProcessing(format!(
                "Failed to run pdfinfo: {}. Make sure poppler-utils is installed.",
                e
            ))
        })?;

    let _ = std::fs::remove_file(&pdf_path);

    if !output.status.success() {
        return Err(ExtractError::PdfProcessing(format!(
            "pdfinfo failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        if let Some(count_str) = line.strip_prefix("Pages:") {
            if let Ok(count) = count_str.trim().parse::<usize>() {
                return Ok(count);
            }
        }
    }

    // Default to 1 page if we can't determine the count
    Ok(1)
}

fn render_pdf_page_to_image(
    pdf_bytes: &[u8],
    page_num: u32,
    dpi: u32,
) -> Result<Vec<u8>, ExtractError> {
    // Write PDF to temp file
    let temp_dir = std::env::temp_dir();
    let pdf_path = temp_dir.join(format!("fleetdocs_temp_{}.pdf", uuid::Uuid::new_v4()));
    let output_prefix = temp_dir.join(format!("fleetdocs_page_{}", uuid::Uuid::new_v4()));

    std::fs::write(&pdf_path, pdf_bytes)
        .map_err(|e| ExtractError::PdfProcessing(format!("Failed to write temp PDF: {}", e)))?;

    // Use pdftoppm to render page
    let output = Command::new("pdftoppm")
        .args([
            "-png",
            "-r",
            &dpi.to_string(),
            "-f",
            &page_num.to_string(),
            "-l",
            &page_num.to_string(),
            pdf_path.to_str().unwrap_or_default(),
            output_prefix.to_str().unwrap_or_default(),
        ])
        .output()
        .map_err(|e| {
            ExtractError::PdfProcessing(format!(
                "Failed to run pdftoppm: {}. Make sure poppler-utils is installed.",
                e
            ))
        })?;

    // Clean up temp PDF
    let _ = std::fs::remove_file(&pdf_path);

    if !output.status.success() {
        return Err(ExtractError::PdfProcessing(format!(
            "pdftoppm failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    // Find the output file (pdftoppm adds page number suffix)
    let output_path = format!("{}-{}.png", output_prefix.display(), page_num);
    let output_path_alt = format!("{}-{:02}.png", output_prefix.display(), page_num);
    let output_path_alt2 = format!("{}-{:03}.png", output_prefix.display(), page_num);

    let paths = [output_path, output_path_alt, output_path_alt2];
    let image_path = paths
        .iter()
        .find(|p| std::path::Path::new(p).exists())
        .ok_or_else(|| {
            ExtractError::PdfProcessing("Failed to find rendered page image".to_string())
        })?;

    let image_data = std::fs::read(image_path).map_err(|e| {
        ExtractError::PdfProcessing(format!("Failed to read rendered image: {}", e))
    })?;

    // Clean up temp image
    let _ = std::fs::remove_file(image_path);

    Ok(image_data)
}
