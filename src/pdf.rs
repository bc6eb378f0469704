use std::path::Path;

use anyhow::{Context, Result};
use lopdf::Document;

/// Extracted text of one PDF document.
///
/// `text` is the flat stream the parsers scan; `pages` carries per-page
/// slices for diagnostics. No structure beyond page boundaries and linear
/// reading order is guaranteed.
pub struct PdfText {
    pub text: String,
    pub pages: Vec<String>,
    pub page_count: usize,
}

pub fn extract_file(path: &Path) -> Result<PdfText> {
    let bytes =
        std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    extract_bytes(&bytes).with_context(|| format!("extracting text from {}", path.display()))
}

pub fn extract_bytes(bytes: &[u8]) -> Result<PdfText> {
    let doc = Document::load_mem(bytes).context("loading PDF")?;

    // Per-page extraction may fail on individual pages (fonts, encodings);
    // a degraded page becomes empty text, the flat stream below still parses.
    let mut pages = Vec::new();
    for (page_num, _page_id) in doc.get_pages() {
        pages.push(doc.extract_text(&[page_num]).unwrap_or_default());
    }
    let page_count = pages.len();

    let text = pdf_extract::extract_text_from_mem(bytes).context("decoding text stream")?;

    Ok(PdfText {
        text,
        pages,
        page_count,
    })
}
