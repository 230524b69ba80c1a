use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AppError, AppResult};

/// An uploaded file as received from the HTTP layer.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub size: usize,
    pub content: Bytes,
    pub mime_type: Option<String>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        let content = content.into();
        Self {
            name: name.into(),
            size: content.len(),
            content,
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: String) -> Self {
        self.mime_type = Some(mime_type);
        self
    }

    /// Lowercased final dot-segment of the filename, if any.
    pub fn extension(&self) -> Option<String> {
        let (_, ext) = self.name.rsplit_once('.')?;
        if ext.is_empty() {
            return None;
        }
        Some(ext.to_lowercase())
    }

    /// Filename without its final extension.
    pub fn stem(&self) -> &str {
        match self.name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tool {
    Merge,
    Split,
    Compress,
    ImageToPdf,
    PdfToWord,
    WordToPdf,
}

impl Tool {
    pub fn slug(&self) -> &'static str {
        match self {
            Tool::Merge => "merge-pdf",
            Tool::Split => "split-pdf",
            Tool::Compress => "compress-pdf",
            Tool::ImageToPdf => "image-to-pdf",
            Tool::PdfToWord => "pdf-to-word",
            Tool::WordToPdf => "word-to-pdf",
        }
    }

    /// Page a client is sent back to when one of this tool's results expires.
    pub fn page(&self) -> String {
        format!("/{}", self.slug())
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Compression presets: (JPEG quality, rasterization DPI).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl CompressionLevel {
    pub fn quality(&self) -> u8 {
        match self {
            CompressionLevel::Low => 90,
            CompressionLevel::Medium => 75,
            CompressionLevel::High => 60,
        }
    }

    pub fn dpi(&self) -> f32 {
        match self {
            CompressionLevel::Low => 150.0,
            CompressionLevel::Medium => 120.0,
            CompressionLevel::High => 100.0,
        }
    }

    /// Missing or blank values fall back to the default; unknown ones are rejected.
    pub fn parse_option(value: Option<&str>) -> AppResult<Self> {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            None => Ok(Self::default()),
            Some(v) => match v.to_lowercase().as_str() {
                "low" => Ok(CompressionLevel::Low),
                "medium" => Ok(CompressionLevel::Medium),
                "high" => Ok(CompressionLevel::High),
                other => Err(AppError::validation(format!(
                    "Invalid compression level: {} (expected low, medium or high)",
                    other
                ))),
            },
        }
    }
}

/// Page margin around each image, in PDF points (72 per inch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginSize {
    None,
    Small,
    #[default]
    Medium,
    Large,
}

impl MarginSize {
    pub fn points(&self) -> f32 {
        match self {
            MarginSize::None => 0.0,
            MarginSize::Small => 36.0,
            MarginSize::Medium => 72.0,
            MarginSize::Large => 144.0,
        }
    }

    pub fn parse_option(value: Option<&str>) -> AppResult<Self> {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            None => Ok(Self::default()),
            Some(v) => match v.to_lowercase().as_str() {
                "none" => Ok(MarginSize::None),
                "small" => Ok(MarginSize::Small),
                "medium" => Ok(MarginSize::Medium),
                "large" => Ok(MarginSize::Large),
                other => Err(AppError::validation(format!(
                    "Invalid margin size: {} (expected none, small, medium or large)",
                    other
                ))),
            },
        }
    }
}

/// A page range token as typed by the user, syntax-checked but not yet
/// bounded by a page count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRange {
    Span { raw: String, start: i64, end: i64 },
    Single { raw: String, page: i64 },
}

/// A range resolved against a concrete document, 1-based and inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    pub start: u32,
    pub end: u32,
    pub single: bool,
}

impl ResolvedRange {
    pub fn len(&self) -> u32 {
        self.end - self.start + 1
    }

    /// Used in output filenames, e.g. `pages-1-to-3` or `page-5`.
    pub fn describe(&self) -> String {
        if self.single {
            format!("page-{}", self.start)
        } else {
            format!("pages-{}-to-{}", self.start, self.end)
        }
    }
}

impl PageRange {
    pub fn parse(token: &str) -> AppResult<Self> {
        let raw = token.trim().to_string();
        let invalid = || AppError::validation(format!("Invalid page range format: {}", token));

        if raw.contains('-') {
            let mut parts = raw.split('-');
            let (Some(a), Some(b), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err(invalid());
            };
            let start = a.trim().parse::<i64>().map_err(|_| invalid())?;
            let end = b.trim().parse::<i64>().map_err(|_| invalid())?;
            Ok(PageRange::Span { raw, start, end })
        } else {
            let page = raw.parse::<i64>().map_err(|_| invalid())?;
            Ok(PageRange::Single { raw, page })
        }
    }

    /// Clamp spans into `[1, page_count]`; reject inverted spans and
    /// out-of-bounds single pages instead of fixing them.
    pub fn resolve(&self, page_count: u32) -> AppResult<ResolvedRange> {
        let total = i64::from(page_count);
        match self {
            PageRange::Span { raw, start, end } => {
                let start = (*start).max(1);
                let end = (*end).min(total);
                if start > end {
                    return Err(AppError::validation(format!(
                        "Invalid range: {} (start > end)",
                        raw
                    )));
                }
                Ok(ResolvedRange {
                    start: start as u32,
                    end: end as u32,
                    single: false,
                })
            }
            PageRange::Single { page, .. } => {
                if *page < 1 || *page > total {
                    return Err(AppError::validation(format!(
                        "Invalid page number: {} (valid range: 1-{})",
                        page, total
                    )));
                }
                Ok(ResolvedRange {
                    start: *page as u32,
                    end: *page as u32,
                    single: true,
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitMode {
    Pages,
    Ranges(Vec<PageRange>),
}

impl SplitMode {
    pub fn parse(split_type: Option<&str>, ranges: &[String]) -> AppResult<Self> {
        match split_type.map(str::trim).filter(|v| !v.is_empty()).unwrap_or("pages") {
            "pages" => Ok(SplitMode::Pages),
            "ranges" => {
                let tokens: Vec<&String> = ranges.iter().filter(|r| !r.trim().is_empty()).collect();
                if tokens.is_empty() {
                    return Err(AppError::validation("No page ranges specified"));
                }
                let parsed = tokens
                    .into_iter()
                    .map(|t| PageRange::parse(t))
                    .collect::<AppResult<Vec<_>>>()?;
                Ok(SplitMode::Ranges(parsed))
            }
            _ => Err(AppError::validation("Invalid split type specified")),
        }
    }
}

/// Tool selection plus its tool-specific options.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOptions {
    Merge,
    Split(SplitMode),
    Compress(CompressionLevel),
    ImageToPdf(MarginSize),
    PdfToWord,
    WordToPdf,
}

impl ToolOptions {
    pub fn tool(&self) -> Tool {
        match self {
            ToolOptions::Merge => Tool::Merge,
            ToolOptions::Split(_) => Tool::Split,
            ToolOptions::Compress(_) => Tool::Compress,
            ToolOptions::ImageToPdf(_) => Tool::ImageToPdf,
            ToolOptions::PdfToWord => Tool::PdfToWord,
            ToolOptions::WordToPdf => Tool::WordToPdf,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolRequest {
    pub options: ToolOptions,
    pub output_filename: Option<String>,
}

impl ToolRequest {
    pub fn new(options: ToolOptions) -> Self {
        Self {
            options,
            output_filename: None,
        }
    }

    pub fn with_output_filename(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.output_filename = if name.trim().is_empty() { None } else { Some(name) };
        self
    }

    pub fn tool(&self) -> Tool {
        self.options.tool()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_uses_final_segment() {
        assert_eq!(UploadedFile::new("a.tar.PDF", vec![1]).extension().as_deref(), Some("pdf"));
        assert_eq!(UploadedFile::new("noext", vec![1]).extension(), None);
        assert_eq!(UploadedFile::new("trailing.", vec![1]).extension(), None);
        assert_eq!(UploadedFile::new("report.final.docx", vec![1]).stem(), "report.final");
    }

    #[test]
    fn span_is_clamped_to_page_count() {
        let range = PageRange::parse("1-10").unwrap().resolve(6).unwrap();
        assert_eq!((range.start, range.end), (1, 6));
        assert_eq!(range.describe(), "pages-1-to-6");

        let range = PageRange::parse(" 0 - 2 ").unwrap().resolve(6).unwrap();
        assert_eq!((range.start, range.end), (1, 2));
    }

    #[test]
    fn inverted_span_is_rejected() {
        let err = PageRange::parse("4-2").unwrap().resolve(6).unwrap_err();
        assert!(matches!(err, AppError::ValidationError { .. }));
        assert!(err.to_string().contains("start > end"));

        assert!(PageRange::parse("8-10").unwrap().resolve(6).is_err());
    }

    #[test]
    fn single_page_out_of_bounds_is_rejected() {
        assert!(PageRange::parse("0").unwrap().resolve(6).is_err());
        assert!(PageRange::parse("7").unwrap().resolve(6).is_err());
        let range = PageRange::parse("6").unwrap().resolve(6).unwrap();
        assert_eq!(range.describe(), "page-6");
        assert_eq!(range.len(), 1);
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        for token in ["", "a-b", "1-2-3", "-3", "3-", "x"] {
            assert!(PageRange::parse(token).is_err(), "{token:?} should not parse");
        }
    }

    #[test]
    fn split_mode_requires_ranges() {
        assert_eq!(SplitMode::parse(None, &[]).unwrap(), SplitMode::Pages);
        assert!(SplitMode::parse(Some("ranges"), &["  ".to_string()]).is_err());
        assert!(SplitMode::parse(Some("halves"), &[]).is_err());
    }

    #[test]
    fn unknown_option_values_are_rejected() {
        assert_eq!(CompressionLevel::parse_option(None).unwrap(), CompressionLevel::Medium);
        assert_eq!(CompressionLevel::parse_option(Some("HIGH")).unwrap(), CompressionLevel::High);
        assert!(CompressionLevel::parse_option(Some("extreme")).is_err());

        assert_eq!(MarginSize::parse_option(Some("")).unwrap(), MarginSize::Medium);
        assert_eq!(MarginSize::parse_option(Some("none")).unwrap().points(), 0.0);
        assert!(MarginSize::parse_option(Some("huge")).is_err());
    }
}
