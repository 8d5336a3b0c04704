//! Paginated A4 export.
//!
//! [`layout_pdf`] decides where every line goes; the renderer only draws the
//! result with the built-in Helvetica faces.

mod layout;
mod render;

pub use layout::{layout_pdf, wrap_text, PageGeometry, PdfLine, PdfPage, TextStyle};
pub use render::to_pdf;
