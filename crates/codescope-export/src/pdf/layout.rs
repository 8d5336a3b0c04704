use chrono::{DateTime, Local, Utc};

use codescope_core::types::Conversation;

/// Points to millimetres.
const PT_TO_MM: f32 = 0.3528;

/// Average Helvetica glyph width as a fraction of the font size.
const AVG_GLYPH_WIDTH: f32 = 0.5;

/// Line height as a multiple of the font size.
const LINE_SPACING: f32 = 1.4;

/// Page size and margins, in millimetres.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageGeometry {
    pub width_mm: f32,
    pub height_mm: f32,
    pub margin_mm: f32,
}

impl PageGeometry {
    pub const A4: PageGeometry = PageGeometry {
        width_mm: 210.0,
        height_mm: 297.0,
        margin_mm: 20.0,
    };

    pub fn usable_width_mm(&self) -> f32 {
        self.width_mm - 2.0 * self.margin_mm
    }

    /// Lowest y (from the top) a line may reach.
    pub fn bottom_mm(&self) -> f32 {
        self.height_mm - self.margin_mm
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextStyle {
    Title,
    Meta,
    RoleHeader,
    Body,
}

impl TextStyle {
    pub fn size_pt(&self) -> f32 {
        match self {
            TextStyle::Title => 16.0,
            TextStyle::Meta => 10.0,
            TextStyle::RoleHeader => 12.0,
            TextStyle::Body => 10.0,
        }
    }

    pub fn bold(&self) -> bool {
        matches!(self, TextStyle::Title | TextStyle::RoleHeader)
    }

    pub fn line_height_mm(&self) -> f32 {
        self.size_pt() * PT_TO_MM * LINE_SPACING
    }

    /// Characters that fit on one line of `geometry`.
    pub fn chars_per_line(&self, geometry: &PageGeometry) -> usize {
        let glyph_mm = self.size_pt() * PT_TO_MM * AVG_GLYPH_WIDTH;
        ((geometry.usable_width_mm() / glyph_mm).floor() as usize).max(1)
    }
}

/// One line of text placed on a page. `baseline_mm` is measured from the
/// top edge.
#[derive(Clone, Debug, PartialEq)]
pub struct PdfLine {
    pub text: String,
    pub style: TextStyle,
    pub x_mm: f32,
    pub baseline_mm: f32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PdfPage {
    pub lines: Vec<PdfLine>,
}

struct Cursor {
    geometry: PageGeometry,
    pages: Vec<PdfPage>,
    y_mm: f32,
}

impl Cursor {
    fn new(geometry: PageGeometry) -> Self {
        Self {
            geometry,
            pages: vec![PdfPage::default()],
            y_mm: geometry.margin_mm,
        }
    }

    fn line(&mut self, text: String, style: TextStyle) {
        let height = style.line_height_mm();
        if self.y_mm + height > self.geometry.bottom_mm() {
            self.pages.push(PdfPage::default());
            self.y_mm = self.geometry.margin_mm;
        }
        let baseline_mm = self.y_mm + style.size_pt() * PT_TO_MM;
        if let Some(page) = self.pages.last_mut() {
            page.lines.push(PdfLine {
                text,
                style,
                x_mm: self.geometry.margin_mm,
                baseline_mm,
            });
        }
        self.y_mm += height;
    }

    fn paragraph(&mut self, text: &str, style: TextStyle) {
        let width = style.chars_per_line(&self.geometry);
        for line in wrap_text(&latin1(text), width) {
            self.line(line, style);
        }
    }

    fn gap(&mut self, mm: f32) {
        self.y_mm += mm;
    }
}

/// Lay a conversation out on A4 pages.
pub fn layout_pdf(conversation: &Conversation) -> Vec<PdfPage> {
    layout_with(conversation, PageGeometry::A4)
}

pub(crate) fn layout_with(conversation: &Conversation, geometry: PageGeometry) -> Vec<PdfPage> {
    let mut cursor = Cursor::new(geometry);

    cursor.paragraph(&conversation.title, TextStyle::Title);
    cursor.gap(2.0);
    cursor.paragraph(
        &format!("Created: {}", local_time(&conversation.created_at)),
        TextStyle::Meta,
    );
    cursor.paragraph(
        &format!("Updated: {}", local_time(&conversation.updated_at)),
        TextStyle::Meta,
    );
    if let Some(repo) = &conversation.repo_path {
        cursor.paragraph(&format!("Repository: {}", repo), TextStyle::Meta);
    }

    for message in &conversation.messages {
        cursor.gap(6.0);
        cursor.line(message.role.label().to_string(), TextStyle::RoleHeader);
        cursor.gap(1.0);
        for paragraph in message.content.split('\n') {
            if paragraph.trim().is_empty() {
                cursor.line(String::new(), TextStyle::Body);
            } else {
                cursor.paragraph(paragraph, TextStyle::Body);
            }
        }
    }

    cursor.pages
}

/// Greedy word wrap to at most `width` characters per line. Words longer
/// than a line are split. Leading spaces are kept as an indent on every
/// wrapped line, so indented code stays indented.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let indent = text
        .chars()
        .take_while(|c| *c == ' ')
        .count()
        .min(width - 1);
    if indent == 0 {
        return wrap_words(text, width);
    }

    let prefix = " ".repeat(indent);
    wrap_words(text, width - indent)
        .into_iter()
        .map(|line| {
            if line.is_empty() {
                line
            } else {
                format!("{}{}", prefix, line)
            }
        })
        .collect()
}

fn wrap_words(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();

        while word.len() > width {
            if current_len > 0 {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let rest = word.split_off(width);
            lines.push(word.into_iter().collect());
            word = rest;
        }
        if word.is_empty() {
            continue;
        }

        let needed = if current_len == 0 {
            word.len()
        } else {
            current_len + 1 + word.len()
        };
        if needed > width {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.extend(word.iter());
        current_len += word.len();
    }

    if current_len > 0 || lines.is_empty() {
        lines.push(current);
    }
    lines
}

/// Replace characters the built-in fonts cannot draw.
fn latin1(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\t' => ' ',
            c if (c as u32) < 0x20 || (0x7F..0xA0).contains(&(c as u32)) => '?',
            c if (c as u32) <= 0xFF => c,
            _ => '?',
        })
        .collect()
}

fn local_time(at: &DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use codescope_core::types::Message;

    fn conversation(messages: Vec<Message>) -> Conversation {
        Conversation::new("c1", messages, Utc::now())
    }

    #[test]
    fn test_wrap_respects_width() {
        let text = "the quick brown fox jumps over the lazy dog";
        let lines = wrap_text(text, 10);
        assert!(lines.iter().all(|l| l.chars().count() <= 10));
        assert_eq!(lines.join(" "), text);
    }

    #[test]
    fn test_wrap_splits_long_words() {
        let lines = wrap_text("abcdefghijklmnop xy", 5);
        assert_eq!(lines, vec!["abcde", "fghij", "klmno", "p xy"]);
    }

    #[test]
    fn test_wrap_keeps_leading_indentation() {
        assert_eq!(wrap_text("    let x = 1;", 40), vec!["    let x = 1;"]);
        assert_eq!(
            wrap_text("  alpha beta gamma", 12),
            vec!["  alpha beta", "  gamma"]
        );
        assert!(wrap_text("        deeply nested call(arg)", 16)
            .iter()
            .all(|l| l.starts_with("        ") && l.chars().count() <= 16));
    }

    #[test]
    fn test_code_block_indentation_survives_layout() {
        let pages = layout_pdf(&conversation(vec![Message::assistant(
            "fn main() {\n    println!(\"hi\");\n}",
        )]));
        let body: Vec<&str> = pages[0]
            .lines
            .iter()
            .filter(|l| l.style == TextStyle::Body)
            .map(|l| l.text.as_str())
            .collect();
        assert_eq!(body, vec!["fn main() {", "    println!(\"hi\");", "}"]);
    }

    #[test]
    fn test_wrap_empty_text_is_one_blank_line() {
        assert_eq!(wrap_text("", 20), vec![String::new()]);
    }

    #[test]
    fn test_latin1_replacement() {
        assert_eq!(latin1("café ✓ 日本"), "café ? ??");
        assert_eq!(latin1("a\tb"), "a b");
    }

    #[test]
    fn test_role_headers_are_bold() {
        let pages = layout_pdf(&conversation(vec![
            Message::user("question"),
            Message::assistant("answer"),
        ]));
        let headers: Vec<&PdfLine> = pages[0]
            .lines
            .iter()
            .filter(|l| l.style == TextStyle::RoleHeader)
            .collect();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].text, "User");
        assert_eq!(headers[1].text, "Assistant");
        assert!(TextStyle::RoleHeader.bold());
        assert!(!TextStyle::Body.bold());
    }

    #[test]
    fn test_long_conversation_paginates_within_margins() {
        let long = "lorem ipsum dolor sit amet ".repeat(400);
        let pages = layout_pdf(&conversation(vec![
            Message::user("Summarize"),
            Message::assistant(long),
        ]));
        assert!(pages.len() > 1);

        let geometry = PageGeometry::A4;
        let width = TextStyle::Body.chars_per_line(&geometry);
        for page in &pages {
            assert!(!page.lines.is_empty());
            for line in &page.lines {
                assert!(line.baseline_mm >= geometry.margin_mm);
                assert!(line.baseline_mm <= geometry.bottom_mm());
                if line.style == TextStyle::Body {
                    assert!(line.text.chars().count() <= width);
                }
            }
        }
    }

    #[test]
    fn test_lines_on_a_page_move_down() {
        let pages = layout_pdf(&conversation(vec![Message::user("a\nb\n\nc")]));
        let ys: Vec<f32> = pages[0].lines.iter().map(|l| l.baseline_mm).collect();
        assert!(ys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_small_page_breaks_before_header() {
        let geometry = PageGeometry {
            width_mm: 100.0,
            height_mm: 60.0,
            margin_mm: 10.0,
        };
        let pages = layout_with(
            &conversation(vec![
                Message::user("one"),
                Message::assistant("two"),
                Message::user("three"),
            ]),
            geometry,
        );
        assert!(pages.len() >= 2);
        for page in &pages {
            for line in &page.lines {
                assert!(line.baseline_mm <= geometry.bottom_mm());
            }
        }
    }
}
