//! Document extraction
//!
//! Turns an uploaded binary into `{text, tables, pictures}`. PDF and Office
//! files go through the external parser subprocess; TXT/MD and HWPX are
//! handled locally. The core never inspects parser internals, it only
//! normalizes the returned table shapes.

pub mod bridge;
mod hwpx;
mod table;
mod text;

pub use bridge::ParserBridge;
pub use hwpx::extract_hwpx;
pub use table::{normalize_table, NormalizedTable};
pub use text::decode_text;

use crate::error::{Error, Result};
use crate::store::FragmentKind;
use serde::{Deserialize, Serialize};

/// A table as reported by an extractor, every field optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTable {
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub header: Option<Vec<String>>,
    #[serde(default)]
    pub rows: Option<Vec<Vec<String>>>,
    #[serde(default)]
    pub preview_rows: Option<Vec<Vec<String>>>,
    #[serde(default)]
    pub n_rows: Option<i64>,
    #[serde(default)]
    pub n_cols: Option<i64>,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub metadata: Option<RawTableMeta>,
}

/// Extractor-specific table metadata the core understands
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTableMeta {
    #[serde(default)]
    pub text_as_html: Option<String>,
}

/// A picture as reported by an extractor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPicture {
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

/// Structured extraction result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedSource {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub tables: Vec<RawTable>,
    #[serde(default)]
    pub pictures: Vec<RawPicture>,
    #[serde(default)]
    pub engine: String,
}

/// Source document category, dispatching the extractor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Pdf,
    Office,
    Text,
    Hwp,
    Hwpx,
}

impl SourceKind {
    /// Fragment type for prose chunks of this source
    pub fn fragment_kind(&self) -> FragmentKind {
        match self {
            SourceKind::Pdf => FragmentKind::Pdf,
            SourceKind::Office => FragmentKind::Office,
            SourceKind::Text => FragmentKind::Text,
            SourceKind::Hwp => FragmentKind::Hwp,
            SourceKind::Hwpx => FragmentKind::Hwpx,
        }
    }

    /// Whether extraction goes through the parser subprocess
    pub fn uses_bridge(&self) -> bool {
        matches!(self, SourceKind::Pdf | SourceKind::Office)
    }
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp", "tif", "tiff"];

/// Classify an upload by extension and MIME type.
pub fn source_kind_for(original_name: &str, mime: &str) -> Result<SourceKind> {
    let ext = original_name
        .rsplit('.')
        .next()
        .unwrap_or("")
        .to_lowercase();

    if IMAGE_EXTENSIONS.contains(&ext.as_str()) || mime.starts_with("image/") {
        return Err(Error::Input(
            "image-only uploads are not supported".to_string(),
        ));
    }

    match ext.as_str() {
        "pdf" => Ok(SourceKind::Pdf),
        "doc" | "docx" | "ppt" | "pptx" | "xls" | "xlsx" => Ok(SourceKind::Office),
        "txt" | "md" | "markdown" => Ok(SourceKind::Text),
        "hwp" => Ok(SourceKind::Hwp),
        "hwpx" => Ok(SourceKind::Hwpx),
        _ => match mime {
            "application/pdf" => Ok(SourceKind::Pdf),
            "text/plain" | "text/markdown" => Ok(SourceKind::Text),
            other => Err(Error::UnsupportedType(format!(
                "extension '.{}' (mime {})",
                ext, other
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_by_extension() {
        assert_eq!(source_kind_for("a.pdf", "").unwrap(), SourceKind::Pdf);
        assert_eq!(source_kind_for("a.DOCX", "").unwrap(), SourceKind::Office);
        assert_eq!(source_kind_for("보고서.hwpx", "").unwrap(), SourceKind::Hwpx);
        assert_eq!(source_kind_for("a.md", "").unwrap(), SourceKind::Text);
    }

    #[test]
    fn test_source_kind_by_mime_fallback() {
        assert_eq!(
            source_kind_for("noext", "application/pdf").unwrap(),
            SourceKind::Pdf
        );
        assert_eq!(
            source_kind_for("noext", "text/plain").unwrap(),
            SourceKind::Text
        );
    }

    #[test]
    fn test_images_rejected() {
        assert!(matches!(
            source_kind_for("scan.png", ""),
            Err(Error::Input(_))
        ));
        assert!(matches!(
            source_kind_for("blob", "image/jpeg"),
            Err(Error::Input(_))
        ));
    }

    #[test]
    fn test_unknown_rejected() {
        assert!(matches!(
            source_kind_for("a.zip", "application/zip"),
            Err(Error::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_parsed_source_deserializes_sparse_json() {
        let parsed: ParsedSource =
            serde_json::from_str(r#"{"text":"hello","tables":[{"page":2}]}"#).unwrap();
        assert_eq!(parsed.text, "hello");
        assert_eq!(parsed.tables.len(), 1);
        assert_eq!(parsed.tables[0].page, Some(2));
        assert!(parsed.pictures.is_empty());
    }
}
