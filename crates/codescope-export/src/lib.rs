//! Conversation export.
//!
//! Three stateless renderers over a conversation snapshot (Markdown, JSON
//! and A4 PDF) plus a [`Downloader`] that writes the result somewhere.
//! Nothing here mutates the conversation.

pub mod download;
pub mod json;
pub mod markdown;
pub mod pdf;

use std::fmt;
use std::str::FromStr;

use codescope_core::error::{CodeScopeError, Result};
use codescope_core::types::Conversation;

pub use download::{DirectoryDownloader, Downloader};
pub use json::{parse_json, to_json};
pub use markdown::to_markdown;
pub use pdf::{layout_pdf, to_pdf};

/// Longest filename stem produced from a title.
pub const FILENAME_MAX_CHARS: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    Markdown,
    Json,
    Pdf,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Markdown => "md",
            ExportFormat::Json => "json",
            ExportFormat::Pdf => "pdf",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Markdown => "text/markdown",
            ExportFormat::Json => "application/json",
            ExportFormat::Pdf => "application/pdf",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = CodeScopeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md" | "markdown" => Ok(ExportFormat::Markdown),
            "json" => Ok(ExportFormat::Json),
            "pdf" => Ok(ExportFormat::Pdf),
            other => Err(CodeScopeError::Export(format!(
                "unknown export format: {}",
                other
            ))),
        }
    }
}

/// A rendered export, ready to be saved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportedFile {
    pub filename: String,
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Render `conversation` in `format`.
pub fn export(conversation: &Conversation, format: ExportFormat) -> Result<ExportedFile> {
    let bytes = match format {
        ExportFormat::Markdown => to_markdown(conversation).into_bytes(),
        ExportFormat::Json => to_json(conversation)?.into_bytes(),
        ExportFormat::Pdf => to_pdf(conversation)?,
    };

    tracing::debug!(
        conversation_id = %conversation.id,
        format = %format,
        bytes = bytes.len(),
        "Conversation exported"
    );

    Ok(ExportedFile {
        filename: export_filename(&conversation.title, format),
        mime_type: format.mime_type(),
        bytes,
    })
}

/// Filename for an export of a conversation titled `title`.
///
/// Every character other than ASCII letters, digits, `_` and `-` becomes
/// `_`; the stem is cut to [`FILENAME_MAX_CHARS`] characters.
pub fn export_filename(title: &str, format: ExportFormat) -> String {
    let stem: String = title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(FILENAME_MAX_CHARS)
        .collect();
    let stem = if stem.is_empty() {
        "conversation".to_string()
    } else {
        stem
    };
    format!("{}.{}", stem, format.extension())
}
