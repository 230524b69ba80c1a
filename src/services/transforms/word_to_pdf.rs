//! Word (.docx) to PDF. Paragraphs and tables are read in document order,
//! classified by a [`StyleInference`], and laid out on A4 pages with the
//! standard Helvetica fonts.

use docx_rs::{
    Bold, DocumentChild, Paragraph, ParagraphChild, Run, RunChild, Table, TableCellContent, TableChild,
    TableRowChild,
};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Object, StringFormat};
use tracing::{debug, info, instrument};

use super::{output_name, write_artifact, Transform, TransformInput, TransformOutput, PDF_MIME};
use crate::error::{AppError, AppResult};
use crate::models::{Tool, ToolOptions, TransformStats};
use crate::services::pdf::{self, DocumentBuilder, A4_HEIGHT, A4_WIDTH};
use crate::services::registry::ResultArtifact;
use crate::services::stager::{UploadPolicy, WORD_EXTENSIONS};

const MARGIN: f32 = 72.0;
const BODY_SIZE: f32 = 12.0;
const TABLE_SIZE: f32 = 10.0;
const LINE_HEIGHT: f32 = 1.2;
const PARAGRAPH_GAP: f32 = 6.0;
const CELL_PADDING: f32 = 4.0;
/// Average Helvetica glyph width as a fraction of the font size.
const AVERAGE_GLYPH_WIDTH: f32 = 0.5;

const EMPTY_DOCUMENT_NOTICE: &str =
    "This document appears to be empty or contains only images/tables.";

/// A paragraph as read from the document, before styling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParagraphInfo {
    pub text: String,
    /// Paragraph style id, e.g. `Heading1`.
    pub style_id: Option<String>,
    /// Whether the first run with visible text is bold.
    pub leading_bold: bool,
    pub all_bold: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStyle {
    Heading { level: u8 },
    Body { bold: bool },
}

impl BlockStyle {
    pub fn font_size(&self) -> f32 {
        match self {
            BlockStyle::Heading { level: 1 } => 18.0,
            BlockStyle::Heading { level: 2 } => 16.0,
            BlockStyle::Heading { .. } => 14.0,
            BlockStyle::Body { .. } => BODY_SIZE,
        }
    }

    pub fn is_bold(&self) -> bool {
        match self {
            BlockStyle::Heading { .. } => true,
            BlockStyle::Body { bold } => *bold,
        }
    }
}

/// Decides how a paragraph is rendered.
pub trait StyleInference: Send + Sync {
    fn classify(&self, paragraph: &ParagraphInfo) -> BlockStyle;
}

/// Uses the paragraph's heading style when present; otherwise a short,
/// bold-led line without a closing period is taken for a heading.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicStyle;

impl StyleInference for HeuristicStyle {
    fn classify(&self, paragraph: &ParagraphInfo) -> BlockStyle {
        if let Some(style) = &paragraph.style_id {
            let style: String = style
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_lowercase();
            match style.as_str() {
                "title" | "heading1" => return BlockStyle::Heading { level: 1 },
                "subtitle" | "heading2" => return BlockStyle::Heading { level: 2 },
                s if s.starts_with("heading") => return BlockStyle::Heading { level: 3 },
                _ => {}
            }
        }

        let text = paragraph.text.trim();
        if paragraph.leading_bold && text.chars().count() < 100 && !text.ends_with('.') {
            return BlockStyle::Heading { level: 3 };
        }
        BlockStyle::Body {
            bold: paragraph.all_bold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WordBlock {
    Paragraph(ParagraphInfo),
    Table(Vec<Vec<String>>),
}

pub struct WordToPdfTransform<S = HeuristicStyle> {
    style: S,
}

impl<S: StyleInference> WordToPdfTransform<S> {
    pub fn new(style: S) -> Self {
        Self { style }
    }

    /// Lay `blocks` out into a finished document; returns it with its page count.
    pub fn render(&self, blocks: &[WordBlock]) -> AppResult<(lopdf::Document, usize)> {
        let mut layout = Layout::new();
        let mut rendered = 0;

        for block in blocks {
            match block {
                WordBlock::Paragraph(info) if info.text.trim().is_empty() => {}
                WordBlock::Paragraph(info) => {
                    layout.paragraph(&info.text, self.style.classify(info))?;
                    rendered += 1;
                }
                WordBlock::Table(rows) if rows.iter().all(|r| r.is_empty()) => {}
                WordBlock::Table(rows) => {
                    layout.table(rows)?;
                    rendered += 1;
                }
            }
        }

        if rendered == 0 {
            layout.paragraph(EMPTY_DOCUMENT_NOTICE, BlockStyle::Body { bold: false })?;
        }
        layout.finish()
    }
}

impl<S: StyleInference> Transform for WordToPdfTransform<S> {
    fn tool(&self) -> Tool {
        Tool::WordToPdf
    }

    fn policy(&self) -> UploadPolicy {
        UploadPolicy::single(WORD_EXTENSIONS, "Word")
    }

    #[instrument(skip_all, fields(job_id = %input.job_id))]
    fn run(&self, input: &TransformInput<'_>) -> AppResult<TransformOutput> {
        if !matches!(input.options, ToolOptions::WordToPdf) {
            return Err(input.options_mismatch(self.tool()));
        }
        let file = input.single()?;
        if file.extension == "doc" {
            return Err(AppError::unsupported(
                "Legacy .doc files cannot be converted; save the document as .docx",
            ));
        }

        let bytes = std::fs::read(&file.path)?;
        let blocks = read_blocks(&bytes).map_err(|e| {
            AppError::processing(format!(
                "Error processing Word document {}: {}",
                file.original_name, e
            ))
        })?;
        debug!(blocks = blocks.len(), "Word document read");

        let (mut document, pages) = self.render(&blocks)?;
        let bytes = pdf::to_bytes(&mut document)?;

        let filename = output_name(input.output_filename, file.stem(), "pdf");
        let path = input.workspace.join(&filename);
        let size = write_artifact(&path, &bytes)?;

        info!(pages, bytes = size, filename = %filename, "Word document converted to PDF");

        Ok(TransformOutput {
            artifact: ResultArtifact {
                filename,
                path,
                mime_type: PDF_MIME,
            },
            message: "Word document converted to PDF successfully!".to_string(),
            stats: TransformStats::pages(pages),
            intermediates: Vec::new(),
        })
    }
}

/// Paragraphs and tables of a .docx body, in document order.
pub fn read_blocks(bytes: &[u8]) -> Result<Vec<WordBlock>, docx_rs::ReaderError> {
    let docx = docx_rs::read_docx(bytes)?;
    let mut blocks = Vec::new();
    for child in &docx.document.children {
        match child {
            DocumentChild::Paragraph(paragraph) => {
                blocks.push(WordBlock::Paragraph(paragraph_info(paragraph)))
            }
            DocumentChild::Table(table) => blocks.push(WordBlock::Table(table_rows(table))),
            _ => {}
        }
    }
    Ok(blocks)
}

fn paragraph_info(paragraph: &Paragraph) -> ParagraphInfo {
    let mut info = ParagraphInfo {
        style_id: paragraph.property.style.as_ref().map(|s| s.val.clone()),
        all_bold: true,
        ..ParagraphInfo::default()
    };
    let mut seen_text = false;

    let mut visit = |run: &Run, info: &mut ParagraphInfo| {
        let before = info.text.len();
        for child in &run.children {
            match child {
                RunChild::Text(t) => info.text.push_str(&t.text),
                RunChild::Tab(_) => info.text.push_str("    "),
                RunChild::Break(_) => info.text.push('\n'),
                _ => {}
            }
        }
        if info.text[before..].trim().is_empty() {
            return;
        }
        // `<w:b w:val="0"/>` is read as a present but disabled property.
        let bold = run.run_property.bold.as_ref() == Some(&Bold::new());
        if !seen_text {
            info.leading_bold = bold;
            seen_text = true;
        }
        info.all_bold &= bold;
    };

    for child in &paragraph.children {
        match child {
            ParagraphChild::Run(run) => visit(run, &mut info),
            ParagraphChild::Hyperlink(link) => {
                for inner in &link.children {
                    if let ParagraphChild::Run(run) = inner {
                        visit(run, &mut info);
                    }
                }
            }
            _ => {}
        }
    }

    if !seen_text {
        info.all_bold = false;
    }
    info
}

fn table_rows(table: &Table) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    for child in &table.rows {
        let TableChild::TableRow(row) = child else {
            continue;
        };
        let mut cells = Vec::new();
        for cell in &row.cells {
            let TableRowChild::TableCell(cell) = cell else {
                continue;
            };
            let text: Vec<String> = cell
                .children
                .iter()
                .filter_map(|content| match content {
                    TableCellContent::Paragraph(p) => Some(paragraph_info(p).text),
                    _ => None,
                })
                .filter(|t| !t.trim().is_empty())
                .collect();
            cells.push(text.join(" "));
        }
        rows.push(cells);
    }
    rows
}

/// Top-down text layout over A4 pages.
struct Layout {
    builder: DocumentBuilder,
    resources: Dictionary,
    operations: Vec<Operation>,
    cursor: f32,
    pages: usize,
}

impl Layout {
    fn new() -> Self {
        let mut builder = DocumentBuilder::new();
        let regular = builder.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let bold = builder.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica-Bold",
            "Encoding" => "WinAnsiEncoding",
        });
        Self {
            builder,
            resources: dictionary! {
                "Font" => dictionary! { "F1" => regular, "F2" => bold },
            },
            operations: Vec::new(),
            cursor: A4_HEIGHT - MARGIN,
            pages: 0,
        }
    }

    fn content_width() -> f32 {
        A4_WIDTH - 2.0 * MARGIN
    }

    fn ensure_space(&mut self, height: f32) -> AppResult<()> {
        let at_top = self.cursor >= A4_HEIGHT - MARGIN;
        if self.cursor - height < MARGIN && !at_top {
            self.break_page()?;
        }
        Ok(())
    }

    fn break_page(&mut self) -> AppResult<()> {
        let content = Content {
            operations: std::mem::take(&mut self.operations),
        };
        self.builder
            .add_page(A4_WIDTH, A4_HEIGHT, content, self.resources.clone())?;
        self.pages += 1;
        self.cursor = A4_HEIGHT - MARGIN;
        Ok(())
    }

    fn text(&mut self, x: f32, y: f32, text: &str, bold: bool, size: f32) {
        let font = if bold { "F2" } else { "F1" };
        self.operations.extend([
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![font.into(), size.into()]),
            Operation::new("Td", vec![x.into(), y.into()]),
            Operation::new(
                "Tj",
                vec![Object::String(encode_win_ansi(text), StringFormat::Literal)],
            ),
            Operation::new("ET", vec![]),
        ]);
    }

    fn paragraph(&mut self, text: &str, style: BlockStyle) -> AppResult<()> {
        let size = style.font_size();
        let line_height = size * LINE_HEIGHT;
        let lines = wrap_text(text, chars_per_line(Self::content_width(), size));

        if matches!(style, BlockStyle::Heading { .. }) {
            // Keep a heading together with the first line that follows it.
            self.ensure_space(line_height * 2.0 + PARAGRAPH_GAP)?;
        }
        for line in lines {
            self.ensure_space(line_height)?;
            self.cursor -= line_height;
            self.text(MARGIN, self.cursor + (line_height - size), &line, style.is_bold(), size);
        }
        self.cursor -= PARAGRAPH_GAP;
        Ok(())
    }

    fn table(&mut self, rows: &[Vec<String>]) -> AppResult<()> {
        let columns = rows.iter().map(Vec::len).max().unwrap_or(0).max(1);
        let column_width = Self::content_width() / columns as f32;
        let line_height = TABLE_SIZE * LINE_HEIGHT;
        let max_chars = chars_per_line(column_width - 2.0 * CELL_PADDING, TABLE_SIZE);

        for (index, row) in rows.iter().enumerate() {
            let wrapped: Vec<Vec<String>> = (0..columns)
                .map(|c| wrap_text(row.get(c).map(String::as_str).unwrap_or(""), max_chars))
                .collect();
            let line_count = wrapped.iter().map(Vec::len).max().unwrap_or(1).max(1);
            let row_height = line_count as f32 * line_height + 2.0 * CELL_PADDING;

            self.ensure_space(row_height)?;
            let top = self.cursor;
            let bottom = top - row_height;

            self.operations.extend([
                Operation::new("w", vec![0.5_f32.into()]),
                Operation::new(
                    "re",
                    vec![
                        MARGIN.into(),
                        bottom.into(),
                        Self::content_width().into(),
                        row_height.into(),
                    ],
                ),
                Operation::new("S", vec![]),
            ]);
            for c in 1..columns {
                let x = MARGIN + c as f32 * column_width;
                self.operations.extend([
                    Operation::new("m", vec![x.into(), bottom.into()]),
                    Operation::new("l", vec![x.into(), top.into()]),
                    Operation::new("S", vec![]),
                ]);
            }

            // Header row in bold.
            let bold = index == 0;
            for (c, lines) in wrapped.iter().enumerate() {
                let x = MARGIN + c as f32 * column_width + CELL_PADDING;
                for (n, line) in lines.iter().enumerate() {
                    let y = top - CELL_PADDING - (n as f32 + 1.0) * line_height
                        + (line_height - TABLE_SIZE);
                    self.text(x, y, line, bold, TABLE_SIZE);
                }
            }
            self.cursor = bottom;
        }
        self.cursor -= PARAGRAPH_GAP * 2.0;
        Ok(())
    }

    fn finish(mut self) -> AppResult<(lopdf::Document, usize)> {
        if !self.operations.is_empty() || self.pages == 0 {
            self.break_page()?;
        }
        let pages = self.pages;
        Ok((self.builder.finish(), pages))
    }
}

fn chars_per_line(width: f32, size: f32) -> usize {
    ((width / (size * AVERAGE_GLYPH_WIDTH)).floor() as usize).max(1)
}

/// Greedy word wrap by character count; words longer than a line are split.
fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();

    for paragraph in text.split('\n') {
        let mut current = String::new();
        let mut current_len = 0;

        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > max_chars {
                if current_len > 0 {
                    lines.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                lines.push(word.drain(..max_chars).collect());
            }
            if word.is_empty() {
                continue;
            }

            if current_len > 0 && current_len + 1 + word.len() > max_chars {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if current_len > 0 {
                current.push(' ');
                current_len += 1;
            }
            current_len += word.len();
            current.extend(word);
        }

        if current_len > 0 {
            lines.push(current);
        }
    }

    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

/// Encode for the standard fonts' WinAnsi encoding. Common typographic
/// characters are mapped; anything else outside Latin-1 becomes `?`.
fn encode_win_ansi(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\u{2018}' | '\u{2019}' => out.push(b'\''),
            '\u{201C}' | '\u{201D}' => out.push(b'"'),
            '\u{2013}' => out.push(0x96),
            '\u{2014}' => out.push(0x97),
            '\u{2022}' => out.push(0x95),
            '\u{2026}' => out.extend_from_slice(b"..."),
            '\u{20AC}' => out.push(0x80),
            '\t' => out.push(b' '),
            c if (c as u32) < 0x80 || (0xA0..=0xFF).contains(&(c as u32)) => out.push(c as u8),
            _ => out.push(b'?'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use docx_rs::{Docx, TableCell, TableRow};
    use lopdf::Document;

    fn docx_bytes(docx: Docx) -> Vec<u8> {
        let mut buffer = std::io::Cursor::new(Vec::new());
        docx.build().pack(&mut buffer).unwrap();
        buffer.into_inner()
    }

    fn info(text: &str, style: Option<&str>, leading_bold: bool) -> ParagraphInfo {
        ParagraphInfo {
            text: text.to_string(),
            style_id: style.map(str::to_string),
            leading_bold,
            all_bold: leading_bold,
        }
    }

    #[test]
    fn heuristic_prefers_declared_styles() {
        let style = HeuristicStyle;
        assert_eq!(
            style.classify(&info("Intro", Some("Heading1"), false)),
            BlockStyle::Heading { level: 1 }
        );
        assert_eq!(
            style.classify(&info("Intro", Some("Heading 2"), false)),
            BlockStyle::Heading { level: 2 }
        );
        assert_eq!(
            style.classify(&info("Intro", Some("heading4"), false)),
            BlockStyle::Heading { level: 3 }
        );
    }

    #[test]
    fn heuristic_treats_short_bold_lines_as_headings() {
        let style = HeuristicStyle;
        assert_eq!(
            style.classify(&info("Results", None, true)),
            BlockStyle::Heading { level: 3 }
        );
        assert_eq!(
            style.classify(&info("A bold sentence.", None, true)),
            BlockStyle::Body { bold: true }
        );
        assert_eq!(
            style.classify(&info(&"long ".repeat(30), None, true)),
            BlockStyle::Body { bold: true }
        );
        assert_eq!(
            style.classify(&info("plain", None, false)),
            BlockStyle::Body { bold: false }
        );
    }

    #[test]
    fn blocks_are_read_in_document_order() {
        let bytes = docx_bytes(
            Docx::new()
                .add_paragraph(
                    Paragraph::new()
                        .add_run(Run::new().add_text("Title"))
                        .style("Heading1"),
                )
                .add_paragraph(
                    Paragraph::new()
                        .add_run(Run::new().add_text("Bold ").bold())
                        .add_run(Run::new().add_text("then plain.")),
                )
                .add_table(Table::new(vec![TableRow::new(vec![
                    TableCell::new().add_paragraph(Paragraph::new().add_run(Run::new().add_text("a"))),
                    TableCell::new().add_paragraph(Paragraph::new().add_run(Run::new().add_text("b"))),
                ])])),
        );

        let blocks = read_blocks(&bytes).unwrap();
        assert_eq!(blocks.len(), 3);
        match &blocks[0] {
            WordBlock::Paragraph(p) => {
                assert_eq!(p.text, "Title");
                assert_eq!(p.style_id.as_deref(), Some("Heading1"));
            }
            other => panic!("unexpected block {other:?}"),
        }
        match &blocks[1] {
            WordBlock::Paragraph(p) => {
                assert!(p.text.starts_with("Bold"));
                assert!(p.text.ends_with("then plain."));
                assert!(p.leading_bold);
                assert!(!p.all_bold);
            }
            other => panic!("unexpected block {other:?}"),
        }
        assert_eq!(
            blocks[2],
            WordBlock::Table(vec![vec!["a".to_string(), "b".to_string()]])
        );
    }

    #[test]
    fn disabled_bold_is_not_bold() {
        let bytes = docx_bytes(
            Docx::new()
                .add_paragraph(Paragraph::new().add_run(Run::new().add_text("Summary").disable_bold()))
                .add_paragraph(Paragraph::new().add_run(Run::new().add_text("Findings").bold())),
        );

        let blocks = read_blocks(&bytes).unwrap();
        let flags: Vec<(bool, bool)> = blocks
            .iter()
            .map(|block| match block {
                WordBlock::Paragraph(p) => (p.leading_bold, p.all_bold),
                other => panic!("unexpected block {other:?}"),
            })
            .collect();
        assert_eq!(flags, vec![(false, false), (true, true)]);
        let WordBlock::Paragraph(first) = &blocks[0] else {
            panic!("expected a paragraph");
        };
        assert_eq!(HeuristicStyle.classify(first), BlockStyle::Body { bold: false });
    }

    #[test]
    fn long_documents_flow_onto_more_pages() {
        let blocks: Vec<WordBlock> = (0..200)
            .map(|n| {
                let text = format!("Paragraph number {} of the body text.", n);
                WordBlock::Paragraph(info(&text, None, false))
            })
            .collect();
        let (document, pages) = WordToPdfTransform::new(HeuristicStyle).render(&blocks).unwrap();
        assert!(pages > 1);
        assert_eq!(pdf::page_count(&document), pages);
    }

    #[test]
    fn empty_documents_get_a_notice_page() {
        let (mut document, pages) = WordToPdfTransform::new(HeuristicStyle).render(&[]).unwrap();
        assert_eq!(pages, 1);
        let reloaded = Document::load_mem(&pdf::to_bytes(&mut document).unwrap()).unwrap();
        let page_id = reloaded.get_pages()[&1];
        let content = reloaded.get_page_content(page_id).unwrap();
        assert!(String::from_utf8_lossy(&content).contains("appears to be empty"));
    }

    #[test]
    fn wrap_breaks_on_words_and_splits_long_ones() {
        assert_eq!(wrap_text("aa bb cc", 5), vec!["aa bb", "cc"]);
        assert_eq!(wrap_text("abcdefgh", 3), vec!["abc", "def", "gh"]);
        assert_eq!(wrap_text("one\ntwo", 20), vec!["one", "two"]);
        assert_eq!(wrap_text("", 10), vec![""]);
    }

    #[test]
    fn win_ansi_maps_typography_and_replaces_the_rest() {
        assert_eq!(encode_win_ansi("café"), b"caf\xe9".to_vec());
        assert_eq!(encode_win_ansi("\u{201C}hi\u{201D}"), b"\"hi\"".to_vec());
        assert_eq!(encode_win_ansi("日"), b"?".to_vec());
    }
}
