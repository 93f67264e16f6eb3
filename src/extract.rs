//! Extension-based text extraction for uploaded documents.
//!
//! Text files are decoded as UTF-8. PDFs and media files are not parsed:
//! they yield a placeholder line (`[IMAGE FILE] foo.png`) so the analysis
//! pipeline can recognise and skip them. Unknown extensions are an error.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "csv", "tsv", "json", "xml", "html", "htm", "yaml", "yml", "log",
    "rst", "ini", "toml",
];
const PDF_EXTENSIONS: &[&str] = &["pdf"];
const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "webp", "svg", "tif", "tiff",
];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm", "wmv", "m4v"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "m4a", "flac", "aac", "wma"];

/// Placeholder prefixes for files whose content is never sent to a model.
pub const MEDIA_MARKERS: [&str; 3] = ["[IMAGE FILE]", "[VIDEO FILE]", "[AUDIO FILE]"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("unsupported file format: .{extension}")]
    UnsupportedFormat { extension: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Text,
    Pdf,
    Image,
    Video,
    Audio,
}

impl FileKind {
    /// Upper-cased tag used in placeholder text.
    pub fn tag(&self) -> &'static str {
        match self {
            FileKind::Text => "TEXT",
            FileKind::Pdf => "PDF",
            FileKind::Image => "IMAGE",
            FileKind::Video => "VIDEO",
            FileKind::Audio => "AUDIO",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Text => "text",
            FileKind::Pdf => "pdf",
            FileKind::Image => "image",
            FileKind::Video => "video",
            FileKind::Audio => "audio",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionMetadata {
    pub file_name: String,
    pub kind: FileKind,
    pub extracted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Extraction {
    pub text: String,
    pub metadata: ExtractionMetadata,
}

/// Lower-cased text after the last `.`; empty when the name has none.
pub fn extension_of(file_name: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => String::new(),
    }
}

/// Classifies a file name by extension. `None` means unknown.
pub fn classify(file_name: &str) -> Option<FileKind> {
    let ext = extension_of(file_name);
    let ext = ext.as_str();
    if TEXT_EXTENSIONS.contains(&ext) {
        Some(FileKind::Text)
    } else if PDF_EXTENSIONS.contains(&ext) {
        Some(FileKind::Pdf)
    } else if IMAGE_EXTENSIONS.contains(&ext) {
        Some(FileKind::Image)
    } else if VIDEO_EXTENSIONS.contains(&ext) {
        Some(FileKind::Video)
    } else if AUDIO_EXTENSIONS.contains(&ext) {
        Some(FileKind::Audio)
    } else {
        None
    }
}

/// Extracts text from raw file bytes. Pure apart from the timestamp in the metadata.
pub fn extract(bytes: &[u8], file_name: &str) -> Result<Extraction, ExtractError> {
    let kind = classify(file_name).ok_or_else(|| ExtractError::UnsupportedFormat {
        extension: extension_of(file_name),
    })?;

    let text = match kind {
        FileKind::Text => String::from_utf8_lossy(bytes).into_owned(),
        other => placeholder(other, file_name),
    };

    Ok(Extraction {
        text,
        metadata: ExtractionMetadata {
            file_name: file_name.to_string(),
            kind,
            extracted_at: Utc::now(),
        },
    })
}

fn placeholder(kind: FileKind, file_name: &str) -> String {
    format!("[{} FILE] {}", kind.tag(), file_name)
}

/// True if `text` is a placeholder produced for an image, video, or audio file.
pub fn is_media_placeholder(text: &str) -> bool {
    MEDIA_MARKERS.iter().any(|m| text.starts_with(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_is_returned_verbatim() {
        let out = extract("Need login and payment".as_bytes(), "notes.txt").unwrap();
        assert_eq!(out.text, "Need login and payment");
        assert_eq!(out.metadata.kind, FileKind::Text);
        assert_eq!(out.metadata.file_name, "notes.txt");
    }

    #[test]
    fn invalid_utf8_is_replaced_not_rejected() {
        let out = extract(&[b'o', b'k', 0xff], "raw.log").unwrap();
        assert!(out.text.starts_with("ok"));
        assert!(out.text.contains('\u{fffd}'));
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        assert_eq!(classify("README.MD"), Some(FileKind::Text));
        assert_eq!(classify("Photo.JPEG"), Some(FileKind::Image));
    }

    #[test]
    fn binary_kinds_yield_placeholders() {
        let cases = [
            ("spec.pdf", "[PDF FILE] spec.pdf"),
            ("foo.png", "[IMAGE FILE] foo.png"),
            ("bar.mp4", "[VIDEO FILE] bar.mp4"),
            ("baz.mp3", "[AUDIO FILE] baz.mp3"),
        ];
        for (name, expected) in cases {
            let out = extract(b"\x00\x01binary", name).unwrap();
            assert_eq!(out.text, expected);
        }
    }

    #[test]
    fn unknown_extension_names_the_extension() {
        let err = extract(b"data", "archive.xyz").unwrap_err();
        assert_eq!(
            err,
            ExtractError::UnsupportedFormat {
                extension: "xyz".to_string()
            }
        );
        assert!(err.to_string().contains("xyz"));
    }

    #[test]
    fn missing_extension_is_unsupported() {
        assert!(matches!(
            extract(b"data", "Makefile"),
            Err(ExtractError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn media_markers_exclude_pdf() {
        assert!(is_media_placeholder("[IMAGE FILE] foo.png"));
        assert!(is_media_placeholder("[AUDIO FILE] baz.mp3"));
        assert!(!is_media_placeholder("[PDF FILE] spec.pdf"));
        assert!(!is_media_placeholder("plain text"));
    }
}
