use printpdf::{BuiltinFont, Mm, PdfDocument};
use tracing::debug;

use codescope_core::error::{CodeScopeError, Result};
use codescope_core::types::Conversation;

use super::layout::{layout_with, PageGeometry};

/// Render a conversation to PDF bytes.
pub fn to_pdf(conversation: &Conversation) -> Result<Vec<u8>> {
    let geometry = PageGeometry::A4;
    let pages = layout_with(conversation, geometry);
    let width = Mm(geometry.width_mm);
    let height = Mm(geometry.height_mm);

    let (doc, first_page, first_layer) =
        PdfDocument::new(conversation.title.as_str(), width, height, "Layer 1");
    let regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| CodeScopeError::Export(format!("PDF font: {}", e)))?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| CodeScopeError::Export(format!("PDF font: {}", e)))?;

    for (index, page) in pages.iter().enumerate() {
        let (page_index, layer_index) = if index == 0 {
            (first_page, first_layer)
        } else {
            doc.add_page(width, height, format!("Layer {}", index + 1))
        };
        let layer = doc.get_page(page_index).get_layer(layer_index);

        for line in page.lines.iter().filter(|l| !l.text.is_empty()) {
            let font = if line.style.bold() { &bold } else { &regular };
            layer.use_text(
                line.text.as_str(),
                line.style.size_pt(),
                Mm(line.x_mm),
                Mm(geometry.height_mm - line.baseline_mm),
                font,
            );
        }
    }

    let bytes = doc
        .save_to_bytes()
        .map_err(|e| CodeScopeError::Export(format!("PDF encoding failed: {}", e)))?;
    debug!(pages = pages.len(), bytes = bytes.len(), "PDF rendered");
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use codescope_core::types::Message;

    #[test]
    fn test_pdf_bytes_have_header() {
        let conversation = Conversation::new(
            "c1",
            vec![Message::user("Hi"), Message::assistant("Hello ✓ world")],
            Utc::now(),
        );
        let bytes = to_pdf(&conversation).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn test_multi_page_pdf_renders() {
        let conversation = Conversation::new(
            "c1",
            vec![
                Message::user("Dump"),
                Message::assistant("line\n".repeat(300)),
            ],
            Utc::now(),
        );
        let single = to_pdf(&Conversation::new("c2", vec![], Utc::now())).unwrap();
        let multi = to_pdf(&conversation).unwrap();
        assert!(multi.len() > single.len());
    }
}
