//! File classification helpers: MIME inference, upstream category/class
//! mapping and remote-file probing.

use std::path::Path;
use std::time::Duration;

use tracing::debug;
use uuid::Uuid;

use chatpool_protocol::completions::{FileObject, FileRecord, FileRecordMeta};

/// Upstream's coarse attachment category, sent as `filetype`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    Image,
    Video,
    Audio,
    File,
}

impl FileCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            FileCategory::Image => "image",
            FileCategory::Video => "video",
            FileCategory::Audio => "audio",
            FileCategory::File => "file",
        }
    }
}

/// Upstream's processing class, controlling which pipeline handles the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileClass {
    Vision,
    Audio,
    Document,
}

impl FileClass {
    pub fn as_str(self) -> &'static str {
        match self {
            FileClass::Vision => "vision",
            FileClass::Audio => "audio",
            FileClass::Document => "document",
        }
    }
}

/// Everything the completion payload needs to know about one attachment.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    pub file_id: String,
    pub file_url: String,
    pub filename: String,
    pub size: u64,
    pub content_type: String,
    pub user_id: String,
    pub category: FileCategory,
    pub class: FileClass,
}

/// Extension-first MIME inference. The explicit table mirrors what the
/// upstream web UI recognizes; `mime_guess` covers the long tail.
pub fn mime_type_for(filename: &str) -> String {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let known = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "tiff" | "tif" => "image/tiff",
        "ico" => "image/ico",
        "mp4" => "video/mp4",
        "avi" => "video/avi",
        "mov" => "video/quicktime",
        "wmv" => "video/wmv",
        "flv" => "video/flv",
        "webm" => "video/webm",
        "mkv" => "video/mkv",
        "3gp" => "video/3gp",
        "m4v" => "video/m4v",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        "ogg" => "audio/ogg",
        "wma" => "audio/wma",
        "m4a" => "audio/m4a",
        "opus" => "audio/opus",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "rtf" => "application/rtf",
        "zip" => "application/zip",
        "rar" => "application/x-rar-compressed",
        "7z" => "application/x-7z-compressed",
        "json" => "application/json",
        "xml" => "application/xml",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "py" => "text/x-python",
        "java" => "text/x-java",
        "c" => "text/x-c",
        "cpp" | "cxx" | "cc" => "text/x-c++",
        "cs" => "text/x-csharp",
        "php" => "text/x-php",
        "rb" => "text/x-ruby",
        "go" => "text/x-go",
        "rs" => "text/x-rust",
        "swift" => "text/x-swift",
        "kt" => "text/x-kotlin",
        "scala" => "text/x-scala",
        "sql" => "text/x-sql",
        "sh" | "bash" | "zsh" => "text/x-shell",
        _ => "",
    };
    if !known.is_empty() {
        return known.to_string();
    }

    mime_guess::from_path(filename)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

/// Maps a MIME type to the upstream category and processing class.
pub fn categorize(content_type: &str) -> (FileCategory, FileClass) {
    let category = if content_type.starts_with("image/") {
        FileCategory::Image
    } else if content_type.starts_with("video/") {
        FileCategory::Video
    } else if content_type.starts_with("audio/") {
        FileCategory::Audio
    } else {
        FileCategory::File
    };
    let class = match category {
        FileCategory::Image | FileCategory::Video => FileClass::Vision,
        FileCategory::Audio => FileClass::Audio,
        FileCategory::File => FileClass::Document,
    };
    (category, class)
}

pub fn is_url(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

/// Last path segment of a URL if it looks like a filename, otherwise a
/// generated `.jpg` placeholder (remote files default to images upstream).
pub fn filename_from_url(url: &str) -> String {
    let without_scheme = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    let path = without_scheme
        .split_once('/')
        .map(|(_, rest)| rest)
        .unwrap_or("");
    let path = path.split(['?', '#']).next().unwrap_or("");
    let segment = path.rsplit('/').next().unwrap_or("");
    if !segment.is_empty() && segment.contains('.') {
        return segment.to_string();
    }
    format!("url_file_{}.jpg", crate::unix_millis())
}

/// HEAD-probes a remote attachment for its type and size. Probe failures
/// degrade to an image guess rather than failing the request; remote files
/// are attached by reference only.
pub async fn probe_remote_file(
    http: &wreq::Client,
    url: &str,
    user_id: &str,
    timeout: Duration,
) -> FileDescriptor {
    let filename = filename_from_url(url);

    match http.head(url).timeout(timeout).send().await {
        Ok(response) => {
            let header_type = response
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
                .unwrap_or_else(|| "image/jpeg".to_string());
            let size = response
                .headers()
                .get("content-length")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0);

            // Prefer the extension when it is more specific than the header.
            let mut content_type = header_type;
            if filename.contains('.') && !filename.starts_with("url_file_") {
                let inferred = mime_type_for(&filename);
                if inferred != "application/octet-stream" {
                    content_type = inferred;
                }
            }

            let (category, class) = categorize(&content_type);
            FileDescriptor {
                file_id: Uuid::new_v4().to_string(),
                file_url: url.to_string(),
                filename,
                size,
                content_type,
                user_id: user_id.to_string(),
                category,
                class,
            }
        }
        Err(err) => {
            debug!(url, error = %err, "remote file probe failed, assuming image");
            FileDescriptor {
                file_id: Uuid::new_v4().to_string(),
                file_url: url.to_string(),
                filename,
                size: 0,
                content_type: "image/jpeg".to_string(),
                user_id: user_id.to_string(),
                category: FileCategory::Image,
                class: FileClass::Vision,
            }
        }
    }
}

impl FileDescriptor {
    /// Expands into the verbose attachment object the completion payload
    /// embeds.
    pub fn into_file_object(self) -> FileObject {
        let now_ms = crate::unix_millis();
        let show_type = match (self.class, self.category) {
            (FileClass::Vision, FileCategory::Image) => "image",
            (FileClass::Vision, _) => "video",
            (FileClass::Audio, _) => "audio",
            _ => "file",
        };
        FileObject {
            kind: self.category.as_str().to_string(),
            file: FileRecord {
                created_at: now_ms,
                data: serde_json::Value::Object(serde_json::Map::new()),
                filename: self.filename.clone(),
                hash: None,
                id: self.file_id.clone(),
                user_id: self.user_id,
                meta: FileRecordMeta {
                    name: self.filename.clone(),
                    size: self.size,
                    content_type: self.content_type.clone(),
                },
                update_at: now_ms,
            },
            id: self.file_id,
            url: self.file_url,
            name: self.filename,
            collection_name: String::new(),
            progress: 0,
            status: "uploaded".to_string(),
            green_net: "success".to_string(),
            size: self.size,
            error: String::new(),
            item_id: Uuid::new_v4().to_string(),
            file_type: self.content_type,
            show_type: show_type.to_string(),
            file_class: self.class.as_str().to_string(),
            upload_task_id: Uuid::new_v4().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_table_beats_guessing() {
        assert_eq!(mime_type_for("a.rs"), "text/x-rust");
        assert_eq!(mime_type_for("a.MOV"), "video/quicktime");
        assert_eq!(mime_type_for("photo.jpeg"), "image/jpeg");
        assert_eq!(mime_type_for("unknown.zzz"), "application/octet-stream");
    }

    #[test]
    fn categories_follow_mime_prefix() {
        assert_eq!(
            categorize("image/png"),
            (FileCategory::Image, FileClass::Vision)
        );
        assert_eq!(
            categorize("video/mp4"),
            (FileCategory::Video, FileClass::Vision)
        );
        assert_eq!(
            categorize("audio/wav"),
            (FileCategory::Audio, FileClass::Audio)
        );
        assert_eq!(
            categorize("application/pdf"),
            (FileCategory::File, FileClass::Document)
        );
    }

    #[test]
    fn url_filenames_need_an_extension() {
        assert_eq!(
            filename_from_url("https://host/a/b/photo.png?x=1"),
            "photo.png"
        );
        assert!(filename_from_url("https://host/a/b/").starts_with("url_file_"));
        assert!(filename_from_url("https://host").starts_with("url_file_"));
    }

    #[test]
    fn url_detection_is_scheme_based() {
        assert!(is_url("https://x/y.png"));
        assert!(is_url("http://x/y.png"));
        assert!(!is_url("/tmp/y.png"));
        assert!(!is_url("ftp://x/y.png"));
    }

    #[test]
    fn file_object_show_type_matches_class() {
        let descriptor = FileDescriptor {
            file_id: "f".to_string(),
            file_url: "https://x/a.png".to_string(),
            filename: "a.png".to_string(),
            size: 10,
            content_type: "image/png".to_string(),
            user_id: "u".to_string(),
            category: FileCategory::Image,
            class: FileClass::Vision,
        };
        let object = descriptor.into_file_object();
        assert_eq!(object.show_type, "image");
        assert_eq!(object.kind, "image");
        assert_eq!(object.file_type, "image/png");
        assert_eq!(object.status, "uploaded");
    }
}
