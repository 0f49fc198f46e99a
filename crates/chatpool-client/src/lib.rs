mod auth;
mod client;
pub mod files;
mod uploader;

pub use auth::HttpAuthenticator;
pub use client::{ChatRequest, ChatStream, Client};
pub use files::{FileCategory, FileClass, FileDescriptor};
pub use uploader::SignedUploader;

pub(crate) fn unix_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

