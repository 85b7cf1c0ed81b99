//! Content-type detection from file extensions.

use std::path::Path;

/// Fallback for extensions we do not recognise.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Returns the MIME type for a path based on its extension.
pub fn detect_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("tif" | "tiff") => "image/tiff",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("jp2") => "image/jp2",
        Some("txt") => "text/plain",
        Some("md") => "text/markdown",
        Some("csv") => "text/csv",
        Some("html" | "htm") => "text/html",
        Some("xml") => "application/xml",
        Some("json") => "application/json",
        Some("doc") => "application/msword",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("mp4") => "video/mp4",
        Some("zip") => "application/zip",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extensions() {
        assert_eq!(detect_content_type(Path::new("a.pdf")), "application/pdf");
        assert_eq!(detect_content_type(Path::new("scan.tif")), "image/tiff");
        assert_eq!(detect_content_type(Path::new("scan.tiff")), "image/tiff");
        assert_eq!(detect_content_type(Path::new("p.jpeg")), "image/jpeg");
    }

    #[test]
    fn case_insensitive() {
        assert_eq!(detect_content_type(Path::new("SCAN.TIF")), "image/tiff");
        assert_eq!(detect_content_type(Path::new("Letter.PDF")), "application/pdf");
    }

    #[test]
    fn unknown_falls_back() {
        assert_eq!(detect_content_type(Path::new("noext")), DEFAULT_CONTENT_TYPE);
        assert_eq!(detect_content_type(Path::new("x.weird")), DEFAULT_CONTENT_TYPE);
    }
}
