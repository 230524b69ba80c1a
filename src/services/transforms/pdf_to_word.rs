use docx_rs::{Docx, Paragraph, Run, Table, TableCell, TableRow};
use tracing::{debug, info, instrument};

use super::{
    output_name, write_artifact_with, Transform, TransformInput, TransformOutput, DOCX_MIME,
};
use crate::error::{AppError, AppResult};
use crate::models::{Tool, ToolOptions, TransformStats};
use crate::services::pdf;
use crate::services::registry::ResultArtifact;
use crate::services::stager::{UploadPolicy, PDF_EXTENSIONS};

/// Rebuilds the text of a PDF as a Word document. Lines whose cells line up
/// on runs of two or more spaces for several consecutive lines become tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfToWordTransform;

/// A piece of reconstructed content, in reading order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Paragraph(String),
    Table(Vec<Vec<String>>),
}

impl Transform for PdfToWordTransform {
    fn tool(&self) -> Tool {
        Tool::PdfToWord
    }

    fn policy(&self) -> UploadPolicy {
        UploadPolicy::single(PDF_EXTENSIONS, "PDF")
    }

    #[instrument(skip_all, fields(job_id = %input.job_id))]
    fn run(&self, input: &TransformInput<'_>) -> AppResult<TransformOutput> {
        if !matches!(input.options, ToolOptions::PdfToWord) {
            return Err(input.options_mismatch(self.tool()));
        }
        let file = input.single()?;
        let document = pdf::load(&file.path, &file.original_name)?;
        let page_count = pdf::page_count(&document);

        let bytes = std::fs::read(&file.path)?;
        let text = pdf_extract::extract_text_from_mem(&bytes).map_err(|e| {
            AppError::processing(format!(
                "Error processing PDF file {}: text extraction failed ({})",
                file.original_name, e
            ))
        })?;
        if text.trim().is_empty() {
            return Err(AppError::unsupported(
                "Converting PDFs without a text layer (scanned documents) requires OCR",
            ));
        }

        let blocks = reconstruct(&text);
        let tables = blocks.iter().filter(|b| matches!(b, Block::Table(_))).count();
        debug!(blocks = blocks.len(), tables, "Text reconstructed");

        let filename = output_name(input.output_filename, file.stem(), "docx");
        let path = input.workspace.join(&filename);
        let size = write_artifact_with(&path, |out| {
            build_docx(&blocks)
                .build()
                .pack(out)
                .map_err(|e| AppError::processing(format!("Failed to write Word document: {}", e)))
        })?;

        info!(pages = page_count, bytes = size, filename = %filename, "PDF converted to Word");

        Ok(TransformOutput {
            artifact: ResultArtifact {
                filename,
                path,
                mime_type: DOCX_MIME,
            },
            message: "PDF converted to Word successfully!".to_string(),
            stats: TransformStats::pages(page_count),
            intermediates: Vec::new(),
        })
    }
}

/// Group extracted text into paragraphs and tables. Blank lines and form
/// feeds separate paragraphs; consecutive lines in the same paragraph are
/// joined with a space.
pub fn reconstruct(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut rows: Vec<Vec<String>> = Vec::new();

    for line in text.split(|c: char| c == '\n' || c == '\u{c}') {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            flush_rows(&mut rows, &mut blocks);
            flush_paragraph(&mut paragraph, &mut blocks);
            continue;
        }

        let cells = columns(trimmed);
        let continues_table = rows.first().map_or(cells.len() >= 2, |first| first.len() == cells.len());
        if cells.len() >= 2 && continues_table {
            flush_paragraph(&mut paragraph, &mut blocks);
            rows.push(cells);
        } else {
            flush_rows(&mut rows, &mut blocks);
            if cells.len() >= 2 {
                flush_paragraph(&mut paragraph, &mut blocks);
                rows.push(cells);
            } else {
                paragraph.push(trimmed);
            }
        }
    }
    flush_rows(&mut rows, &mut blocks);
    flush_paragraph(&mut paragraph, &mut blocks);
    blocks
}

fn flush_paragraph(paragraph: &mut Vec<&str>, blocks: &mut Vec<Block>) {
    if !paragraph.is_empty() {
        blocks.push(Block::Paragraph(paragraph.join(" ")));
        paragraph.clear();
    }
}

fn flush_rows(rows: &mut Vec<Vec<String>>, blocks: &mut Vec<Block>) {
    match rows.len() {
        0 => {}
        // A single aligned line is not a table.
        1 => blocks.push(Block::Paragraph(rows[0].join(" "))),
        _ => blocks.push(Block::Table(std::mem::take(rows))),
    }
    rows.clear();
}

/// Cells of a line separated by two or more whitespace characters.
fn columns(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut gap = 0;
    for c in line.chars() {
        if c.is_whitespace() {
            gap += if c == '\t' { 2 } else { 1 };
            continue;
        }
        if gap >= 2 && !current.is_empty() {
            cells.push(std::mem::take(&mut current));
        } else if gap == 1 && !current.is_empty() {
            current.push(' ');
        }
        gap = 0;
        current.push(c);
    }
    if !current.is_empty() {
        cells.push(current);
    }
    cells
}

fn build_docx(blocks: &[Block]) -> Docx {
    blocks.iter().fold(Docx::new(), |docx, block| match block {
        Block::Paragraph(text) => {
            docx.add_paragraph(Paragraph::new().add_run(Run::new().add_text(text.as_str())))
        }
        Block::Table(rows) => {
            let rows = rows
                .iter()
                .map(|row| {
                    TableRow::new(
                        row.iter()
                            .map(|cell| {
                                TableCell::new().add_paragraph(
                                    Paragraph::new().add_run(Run::new().add_text(cell.as_str())),
                                )
                            })
                            .collect(),
                    )
                })
                .collect();
            docx.add_table(Table::new(rows))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_split_on_wide_gaps_only() {
        assert_eq!(columns("Name    Qty   Price"), vec!["Name", "Qty", "Price"]);
        assert_eq!(columns("just a sentence"), vec!["just a sentence"]);
        assert_eq!(columns("Total\t42"), vec!["Total", "42"]);
    }

    #[test]
    fn aligned_lines_become_a_table() {
        let text = "Quarterly report\nRevenue grew\n\nItem   Qty   Price\nApple   3   1.20\nPear   5   0.80\n\nThanks.";
        let blocks = reconstruct(text);

        assert_eq!(
            blocks,
            vec![
                Block::Paragraph("Quarterly report Revenue grew".to_string()),
                Block::Table(vec![
                    vec!["Item".to_string(), "Qty".to_string(), "Price".to_string()],
                    vec!["Apple".to_string(), "3".to_string(), "1.20".to_string()],
                    vec!["Pear".to_string(), "5".to_string(), "0.80".to_string()],
                ]),
                Block::Paragraph("Thanks.".to_string()),
            ]
        );
    }

    #[test]
    fn lone_aligned_line_stays_a_paragraph() {
        let blocks = reconstruct("Author   Date\nBody text");
        assert_eq!(
            blocks,
            vec![
                Block::Paragraph("Author Date".to_string()),
                Block::Paragraph("Body text".to_string()),
            ]
        );
    }

    #[test]
    fn docx_is_a_zip_package() {
        let blocks = reconstruct("Hello\n\nA   B\nC   D");
        let mut buffer = std::io::Cursor::new(Vec::new());
        build_docx(&blocks).build().pack(&mut buffer).unwrap();
        assert!(buffer.into_inner().starts_with(b"PK"));
    }
}
