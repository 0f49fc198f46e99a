//! Signed object-storage uploads. The storage backend authenticates PUTs
//! with an HMAC-SHA1 signature over a canonical request string, carried in
//! the `Authorization` header next to the short-lived security token.

use std::path::Path;
use std::time::{Duration, SystemTime};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use tracing::{debug, warn};

use chatpool_common::{ClientError, ClientResult};
use chatpool_protocol::sts::UploadCredential;

use crate::files::mime_type_for;

const BACKOFF_BASE_MS: u64 = 1000;
const BACKOFF_CAP_MS: u64 = 3000;

/// Best-effort uploader: retries with capped backoff, and when every
/// attempt fails it still hands back the pre-issued public URL so the
/// caller's metadata stays usable.
pub struct SignedUploader {
    http: wreq::Client,
    retries: usize,
    timeout: Duration,
}

impl SignedUploader {
    pub fn new(http: wreq::Client, retries: usize, timeout: Duration) -> Self {
        Self {
            http,
            retries,
            timeout,
        }
    }

    /// Uploads a local file under the given single-use credential and
    /// returns the public URL of the object.
    pub async fn upload(&self, path: &Path, credential: &UploadCredential) -> String {
        for attempt in 0..=self.retries {
            if attempt > 0 {
                let backoff = (BACKOFF_BASE_MS << (attempt - 1)).min(BACKOFF_CAP_MS);
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
            match self.put_object(path, credential).await {
                Ok(()) => return credential.file_url.clone(),
                Err(err) => {
                    warn!(attempt, path = %path.display(), error = %err, "upload attempt failed");
                }
            }
        }
        debug!(path = %path.display(), "upload retries exhausted, using pre-issued url");
        credential.file_url.clone()
    }

    async fn put_object(&self, path: &Path, credential: &UploadCredential) -> ClientResult<()> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ClientError::Upload(format!("bad file name: {}", path.display())))?;
        let body = tokio::fs::read(path)
            .await
            .map_err(|err| ClientError::Upload(format!("read {filename}: {err}")))?;

        let content_type = mime_type_for(filename);
        let host = bucket_host(&credential.file_url)
            .ok_or_else(|| ClientError::Upload(format!("bad file_url: {}", credential.file_url)))?;
        let bucket = host.split('.').next().unwrap_or(&host).to_string();
        let resource = format!("/{bucket}/{}", credential.file_path);
        let date = httpdate::fmt_http_date(SystemTime::now());

        let token_header = ("x-oss-security-token".to_string(), credential.security_token.clone());
        let authorization = authorization_header(
            "PUT",
            &content_type,
            &date,
            std::slice::from_ref(&token_header),
            &resource,
            &credential.access_key_id,
            &credential.access_key_secret,
        );

        let url = format!("https://{host}/{}", credential.file_path);
        let content_length = body.len();
        let response = self
            .http
            .put(&url)
            .header("Host", &host)
            .header("Date", &date)
            .header("Content-Type", &content_type)
            .header("Content-Length", content_length.to_string())
            .header("Authorization", &authorization)
            .header("x-oss-security-token", &credential.security_token)
            .body(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| ClientError::Upload(err.to_string()))?;

        let status = response.status().as_u16();
        if status == 200 || status == 201 {
            Ok(())
        } else {
            Err(ClientError::Upload(format!("put returned status {status}")))
        }
    }
}

/// `METHOD\n\nContentType\nDate\n{sorted lowercased header:value\n}resource`.
fn canonical_string(
    method: &str,
    content_type: &str,
    date: &str,
    extra_headers: &[(String, String)],
    resource: &str,
) -> String {
    let mut headers: Vec<(String, String)> = extra_headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.clone()))
        .collect();
    headers.sort();
    let mut canonical = format!("{method}\n\n{content_type}\n{date}\n");
    for (name, value) in headers {
        canonical.push_str(&name);
        canonical.push(':');
        canonical.push_str(&value);
        canonical.push('\n');
    }
    canonical.push_str(resource);
    canonical
}

fn authorization_header(
    method: &str,
    content_type: &str,
    date: &str,
    extra_headers: &[(String, String)],
    resource: &str,
    access_key_id: &str,
    access_key_secret: &str,
) -> String {
    let to_sign = canonical_string(method, content_type, date, extra_headers, resource);
    // HMAC accepts keys of any length.
    let mut mac = Hmac::<Sha1>::new_from_slice(access_key_secret.as_bytes())
        .expect("hmac key of any length");
    mac.update(to_sign.as_bytes());
    let signature = BASE64.encode(mac.finalize().into_bytes());
    format!("OSS {access_key_id}:{signature}")
}

fn bucket_host(file_url: &str) -> Option<String> {
    let without_scheme = file_url
        .strip_prefix("https://")
        .or_else(|| file_url.strip_prefix("http://"))?;
    let host = without_scheme.split('/').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_string_layout_is_exact() {
        let headers = vec![
            ("X-Oss-Security-Token".to_string(), "tok".to_string()),
            ("x-oss-meta-a".to_string(), "1".to_string()),
        ];
        let canonical = canonical_string(
            "PUT",
            "image/png",
            "Tue, 27 Aug 2024 00:00:00 GMT",
            &headers,
            "/bucket/key.png",
        );
        assert_eq!(
            canonical,
            "PUT\n\nimage/png\nTue, 27 Aug 2024 00:00:00 GMT\nx-oss-meta-a:1\nx-oss-security-token:tok\n/bucket/key.png"
        );
    }

    #[test]
    fn authorization_is_deterministic_and_prefixed() {
        let headers = vec![("x-oss-security-token".to_string(), "tok".to_string())];
        let first = authorization_header("PUT", "a/b", "date", &headers, "/b/k", "AKID", "secret");
        let second = authorization_header("PUT", "a/b", "date", &headers, "/b/k", "AKID", "secret");
        assert_eq!(first, second);
        assert!(first.starts_with("OSS AKID:"));
        // base64(hmac-sha1) is 28 chars.
        assert_eq!(first.len(), "OSS AKID:".len() + 28);

        let other = authorization_header("PUT", "a/b", "date", &headers, "/b/k", "AKID", "other");
        assert_ne!(first, other);
    }

    #[test]
    fn bucket_host_comes_from_the_file_url() {
        assert_eq!(
            bucket_host("https://bucket.oss-cn.example.com/key").as_deref(),
            Some("bucket.oss-cn.example.com")
        );
        assert_eq!(bucket_host("not a url"), None);
    }
}
