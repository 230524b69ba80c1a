//! lopdf helpers shared by the PDF transforms: loading, page selection
//! across documents, and building new documents page by page.

use std::collections::BTreeMap;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use tracing::{debug, instrument};

use crate::error::{AppError, AppResult};

/// A4 in PDF points.
pub const A4_WIDTH: f32 = 595.2756;
pub const A4_HEIGHT: f32 = 841.8898;

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: &[&[u8]] = &[b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Load a PDF from disk, refusing encrypted documents. `name` is the
/// client's filename, used in the error message.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load(path: &Path, name: &str) -> AppResult<Document> {
    let failed = |reason: String| {
        AppError::processing(format!("Error processing PDF file {}: {}", name, reason))
    };
    let document = Document::load(path)
        .map_err(|e| failed(format!("invalid or corrupted PDF ({})", e)))?;
    if document.is_encrypted() {
        return Err(failed("the document is password-protected".to_string()));
    }
    debug!(pages = document.get_pages().len(), "PDF loaded");
    Ok(document)
}

pub fn page_count(document: &Document) -> usize {
    document.get_pages().len()
}

/// Build one document from the given pages (1-based) of each source, in the
/// order given. Sources are consumed; page dictionaries keep inherited
/// attributes so they render the same under the new page tree.
pub fn assemble(sources: Vec<(Document, Vec<u32>)>) -> AppResult<Document> {
    let mut max_id = 1;
    let mut selected_pages: Vec<(ObjectId, Dictionary)> = Vec::new();
    let mut objects: BTreeMap<ObjectId, Object> = BTreeMap::new();

    for (index, (mut source, page_numbers)) in sources.into_iter().enumerate() {
        source.renumber_objects_with(max_id);
        max_id = source.max_id + 1;

        let pages = source.get_pages();
        for number in page_numbers {
            let page_id = *pages.get(&number).ok_or_else(|| {
                AppError::processing(format!(
                    "Page {} not found in document #{}",
                    number,
                    index + 1
                ))
            })?;
            selected_pages.push((page_id, flattened_page(&source, page_id)?));
        }

        for (id, object) in source.objects {
            if !is_structural(&object) {
                objects.insert(id, object);
            }
        }
    }

    let mut output = Document::with_version("1.5");
    output.objects = objects;
    output.max_id = max_id;

    let pages_id = output.new_object_id();
    let mut kids = Vec::with_capacity(selected_pages.len());
    for (page_id, mut page) in selected_pages {
        page.set("Parent", pages_id);
        // A page selected twice would otherwise share one object id.
        let id = if output.objects.contains_key(&page_id) {
            output.add_object(page)
        } else {
            output.objects.insert(page_id, Object::Dictionary(page));
            page_id
        };
        kids.push(Object::Reference(id));
    }

    let count = kids.len() as i64;
    output.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = output.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    output.trailer.set("Root", catalog_id);

    output.prune_objects();
    output.renumber_objects();
    output.compress();
    Ok(output)
}

/// Page dictionary with inherited attributes copied in and the old parent
/// link dropped.
fn flattened_page(document: &Document, page_id: ObjectId) -> AppResult<Dictionary> {
    let mut page = document
        .get_object(page_id)
        .and_then(Object::as_dict)
        .map_err(|e| AppError::processing(format!("Cannot read page object {:?}: {}", page_id, e)))?
        .clone();

    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    let mut depth = 0;
    while let Some(parent_id) = parent {
        // Guards against cyclic page trees in damaged files.
        depth += 1;
        if depth > 64 {
            break;
        }
        let Ok(node) = document.get_object(parent_id).and_then(Object::as_dict) else {
            break;
        };
        for key in INHERITABLE {
            if !page.has(key) {
                if let Ok(value) = node.get(key) {
                    page.set(key.to_vec(), value.clone());
                }
            }
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }

    page.remove(b"Parent");
    Ok(page)
}

fn is_structural(object: &Object) -> bool {
    let Ok(dict) = object.as_dict() else {
        return false;
    };
    matches!(
        dict.get(b"Type").and_then(Object::as_name),
        Ok(b"Catalog") | Ok(b"Pages") | Ok(b"Page") | Ok(b"Outlines") | Ok(b"Outline")
    )
}

/// Serialize a document into memory.
pub fn to_bytes(document: &mut Document) -> AppResult<Vec<u8>> {
    let mut buffer = Vec::new();
    document
        .save_to(&mut buffer)
        .map_err(|e| AppError::processing(format!("Failed to serialise PDF: {}", e)))?;
    Ok(buffer)
}

/// JPEG-encode an image as RGB at the given quality.
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> AppResult<Vec<u8>> {
    let rgb = image.to_rgb8();
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality)
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)
        .map_err(|e| AppError::processing(format!("Failed to encode image: {}", e)))?;
    Ok(buffer)
}

/// Where an image lands on its page, in points from the bottom-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Builds a fresh document one page at a time.
pub struct DocumentBuilder {
    document: Document,
    pages_id: ObjectId,
    kids: Vec<Object>,
}

impl Default for DocumentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentBuilder {
    pub fn new() -> Self {
        let mut document = Document::with_version("1.5");
        let pages_id = document.new_object_id();
        Self {
            document,
            pages_id,
            kids: Vec::new(),
        }
    }

    pub fn add_object<T: Into<Object>>(&mut self, object: T) -> ObjectId {
        self.document.add_object(object)
    }

    /// Embed already-encoded JPEG data as an image XObject.
    pub fn add_jpeg(&mut self, jpeg: Vec<u8>, pixel_width: u32, pixel_height: u32) -> ObjectId {
        let stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => pixel_width as i64,
                "Height" => pixel_height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            jpeg,
        )
        .with_compression(false);
        self.document.add_object(stream)
    }

    pub fn add_page(
        &mut self,
        width: f32,
        height: f32,
        content: Content,
        resources: Dictionary,
    ) -> AppResult<ObjectId> {
        let encoded = content
            .encode()
            .map_err(|e| AppError::processing(format!("Failed to encode page content: {}", e)))?;
        let content_id = self.document.add_object(Stream::new(dictionary! {}, encoded));
        let page_id = self.document.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
            "Contents" => content_id,
            "Resources" => resources,
        });
        self.kids.push(Object::Reference(page_id));
        Ok(page_id)
    }

    /// A page showing a single image at `placement`.
    pub fn add_image_page(
        &mut self,
        image_id: ObjectId,
        width: f32,
        height: f32,
        placement: Placement,
    ) -> AppResult<ObjectId> {
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        placement.width.into(),
                        0.into(),
                        0.into(),
                        placement.height.into(),
                        placement.x.into(),
                        placement.y.into(),
                    ],
                ),
                Operation::new("Do", vec!["Im0".into()]),
                Operation::new("Q", vec![]),
            ],
        };
        let resources = dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        };
        self.add_page(width, height, content, resources)
    }

    pub fn page_count(&self) -> usize {
        self.kids.len()
    }

    pub fn finish(mut self) -> Document {
        let count = self.kids.len() as i64;
        self.document.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => self.kids,
                "Count" => count,
            }),
        );
        let catalog_id = self.document.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.document.trailer.set("Root", catalog_id);
        self.document.compress();
        self.document
    }
}
