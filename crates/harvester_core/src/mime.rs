use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse document classification used for storage layout and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MimeKind {
    Html,
    Pdf,
    Docx,
    Doc,
    Other,
}

const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

impl MimeKind {
    /// Magic bytes first, then the content-type header, then a markup sniff.
    pub fn sniff(bytes: &[u8], content_type: Option<&str>) -> Self {
        if bytes.starts_with(b"%PDF-") {
            return MimeKind::Pdf;
        }
        if bytes.starts_with(ZIP_MAGIC) && contains(bytes, b"word/") {
            return MimeKind::Docx;
        }
        if bytes.starts_with(OLE_MAGIC) {
            return MimeKind::Doc;
        }

        if let Some(kind) = content_type.and_then(Self::from_content_type) {
            return kind;
        }

        let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]).to_ascii_lowercase();
        let head = head.trim_start_matches('\u{feff}').trim_start();
        if head.starts_with("<!doctype html") || head.starts_with("<html") {
            return MimeKind::Html;
        }
        MimeKind::Other
    }

    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let ct = content_type.to_ascii_lowercase();
        if ct.contains("html") || ct.contains("javascript") {
            Some(MimeKind::Html)
        } else if ct.contains("pdf") {
            Some(MimeKind::Pdf)
        } else if ct.contains("vnd.openxmlformats-officedocument.wordprocessingml.document") {
            Some(MimeKind::Docx)
        } else if ct.contains("msword") {
            Some(MimeKind::Doc)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MimeKind::Html => "html",
            MimeKind::Pdf => "pdf",
            MimeKind::Docx => "docx",
            MimeKind::Doc => "doc",
            MimeKind::Other => "other",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            MimeKind::Html => ".html",
            MimeKind::Pdf => ".pdf",
            MimeKind::Docx => ".docx",
            MimeKind::Doc => ".doc",
            MimeKind::Other => "",
        }
    }
}

impl fmt::Display for MimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}
