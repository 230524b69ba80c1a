//! Fixture documents and helpers shared by the integration tests.
#![allow(dead_code)]

use std::io::{Cursor, Read};
use std::path::Path;

use docforge::services::pdf::{self, DocumentBuilder, Placement, A4_HEIGHT, A4_WIDTH};
use docforge::services::{DownloadTicket, JobResult};
use docforge::{CleanupScheduler, Config, JobService};
use docx_rs::{Docx, Paragraph, Run, Table, TableCell, TableRow};
use image::{DynamicImage, ImageOutputFormat, RgbImage};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object};

pub const BOUNDARY: &str = "docforge-test-boundary";

/// A PDF whose page `n` reads `"<label> page <n>"`.
pub fn labelled_pdf(label: &str, pages: u32) -> Vec<u8> {
    let mut builder = DocumentBuilder::new();
    let font = builder.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    for n in 1..=pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 14.into()]),
                Operation::new("Td", vec![72.into(), 700.into()]),
                Operation::new(
                    "Tj",
                    vec![Object::string_literal(format!("{} page {}", label, n))],
                ),
                Operation::new("ET", vec![]),
            ],
        };
        builder
            .add_page(
                A4_WIDTH,
                A4_HEIGHT,
                content,
                dictionary! { "Font" => dictionary! { "F1" => font } },
            )
            .unwrap();
    }
    pdf::to_bytes(&mut builder.finish()).unwrap()
}

/// A PDF with one full-page picture and no text layer.
pub fn scanned_pdf() -> Vec<u8> {
    let mut builder = DocumentBuilder::new();
    let picture = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 60, image::Rgb([200, 200, 200])));
    let jpeg = pdf::encode_jpeg(&picture, 80).unwrap();
    let image_id = builder.add_jpeg(jpeg, 40, 60);
    builder
        .add_image_page(
            image_id,
            A4_WIDTH,
            A4_HEIGHT,
            Placement {
                x: 0.0,
                y: 0.0,
                width: A4_WIDTH,
                height: A4_HEIGHT,
            },
        )
        .unwrap();
    pdf::to_bytes(&mut builder.finish()).unwrap()
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let picture = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(picture)
        .write_to(&mut buffer, ImageOutputFormat::Png)
        .unwrap();
    buffer.into_inner()
}

/// A .docx with a heading, body paragraphs and a small table.
pub fn report_docx(body: &[&str]) -> Vec<u8> {
    let mut docx = Docx::new().add_paragraph(
        Paragraph::new()
            .add_run(Run::new().add_text("Quarterly Report"))
            .style("Heading1"),
    );
    for text in body {
        docx = docx.add_paragraph(Paragraph::new().add_run(Run::new().add_text(*text)));
    }
    docx = docx.add_table(Table::new(vec![
        TableRow::new(vec![cell("Item"), cell("Qty")]),
        TableRow::new(vec![cell("Apples"), cell("3")]),
    ]));

    let mut buffer = Cursor::new(Vec::new());
    docx.build().pack(&mut buffer).unwrap();
    buffer.into_inner()
}

fn cell(text: &str) -> TableCell {
    TableCell::new().add_paragraph(Paragraph::new().add_run(Run::new().add_text(text)))
}

pub fn load(bytes: &[u8]) -> Document {
    Document::load_mem(bytes).unwrap()
}

/// Decoded content stream of every page, in order.
pub fn page_texts(bytes: &[u8]) -> Vec<String> {
    let document = load(bytes);
    document
        .get_pages()
        .values()
        .map(|id| String::from_utf8_lossy(&document.get_page_content(*id).unwrap()).into_owned())
        .collect()
}

/// Entries of a zip archive as (name, bytes), in archive order.
pub fn unzip(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut entry = archive.by_index(i).unwrap();
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            (entry.name().to_string(), content)
        })
        .collect()
}

/// A service rooted at `root` with its own cleanup task. Must be called
/// inside a tokio runtime.
pub fn service(root: &Path, cleanup_delay_seconds: u64) -> JobService {
    let mut config = Config::for_root(root);
    config.cleanup_delay_seconds = cleanup_delay_seconds;
    JobService::new(config, CleanupScheduler::start())
}

/// Download `result` and read the whole file.
pub fn fetch(service: &JobService, result: &JobResult) -> (DownloadTicket, Vec<u8>) {
    let mut ticket = service
        .download(&result.job_id.to_string(), &result.filename)
        .unwrap();
    let mut content = Vec::new();
    ticket.file.read_to_end(&mut content).unwrap();
    assert_eq!(content.len() as u64, ticket.size);
    (ticket, content)
}

pub fn workspace_count(root: &Path) -> usize {
    std::fs::read_dir(root).map(|d| d.count()).unwrap_or(0)
}

pub enum Part<'a> {
    File {
        field: &'a str,
        filename: &'a str,
        content_type: &'a str,
        bytes: Vec<u8>,
    },
    Text {
        field: &'a str,
        value: &'a str,
    },
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::File {
                field,
                filename,
                content_type,
                bytes,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                        field, filename, content_type
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
            Part::Text { field, value } => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}", field, value)
                        .as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={}", BOUNDARY)
}
