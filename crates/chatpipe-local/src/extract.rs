//! Flatten fetched documents (HTML, PDF) into plain text.

use chatpipe_core::{Error, Result};

/// Visible text of an HTML document as one line.
///
/// Every text node that is not inside `<script>`/`<style>` and is not whitespace-only is
/// trimmed and the survivors are joined with single spaces, in document order.
pub fn html_visible_text(html: &str) -> String {
    let doc = html_scraper::Html::parse_document(html);
    let mut parts: Vec<&str> = Vec::new();
    for node in doc.tree.root().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let t = text.trim();
        if t.is_empty() {
            continue;
        }
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .map(|e| matches!(e.name(), "script" | "style"))
                .unwrap_or(false)
        });
        if !hidden {
            parts.push(t);
        }
    }
    parts.join(" ")
}

/// Best-effort sniff for PDF bytes (magic header).
pub fn bytes_look_like_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF-")
}

/// Per-page text of an in-memory PDF. No OCR: image-only pages come back empty.
pub fn pdf_pages_text(bytes: &[u8]) -> Result<Vec<String>> {
    pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| Error::Extract(e.to_string()))
}

/// PDF text with every page trimmed and joined by single spaces. Blank pages are kept,
/// so they show up as an extra space.
pub fn pdf_to_text(bytes: &[u8]) -> Result<String> {
    let pages = pdf_pages_text(bytes)?;
    Ok(pages
        .iter()
        .map(|p| p.trim())
        .collect::<Vec<_>>()
        .join(" "))
}

/// Assemble a tiny uncompressed PDF with one Helvetica text line per page.
#[cfg(test)]
pub(crate) fn tiny_pdf(pages: &[&str]) -> Vec<u8> {
    let n = pages.len();
    // Object layout: 1 catalog, 2 pages, 3 font, then (page, content) pairs.
    let mut objects: Vec<String> = Vec::new();
    objects.push("<< /Type /Catalog /Pages 2 0 R >>".to_string());
    let kids = (0..n)
        .map(|i| format!("{} 0 R", 4 + 2 * i))
        .collect::<Vec<_>>()
        .join(" ");
    objects.push(format!("<< /Type /Pages /Kids [{kids}] /Count {n} >>"));
    objects.push(
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
            .to_string(),
    );
    for (i, text) in pages.iter().enumerate() {
        let content_id = 5 + 2 * i;
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Resources << /Font << /F1 3 0 R >> >> /Contents {content_id} 0 R >>"
        ));
        let stream = format!("BT /F1 24 Tf 72 700 Td ({text}) Tj ET");
        objects.push(format!(
            "<< /Length {} >>\nstream\n{stream}\nendstream",
            stream.len()
        ));
    }

    let mut out = String::from("%PDF-1.4\n");
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.push_str(&format!("{} 0 obj\n{body}\nendobj\n", i + 1));
    }
    let xref_at = out.len();
    out.push_str(&format!("xref\n0 {}\n", objects.len() + 1));
    out.push_str("0000000000 65535 f \n");
    for off in offsets {
        out.push_str(&format!("{off:010} 00000 n \n"));
    }
    out.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF\n",
        objects.len() + 1
    ));
    out.into_bytes()
}
