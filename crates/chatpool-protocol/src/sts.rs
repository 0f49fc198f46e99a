use serde::{Deserialize, Serialize};

/// `POST /api/v2/files/getstsToken` (with a `/api/v1` fallback).
#[derive(Debug, Clone, Serialize)]
pub struct StsTokenRequest {
    pub filename: String,
    pub filesize: u64,
    /// Coarse category ("image", "video", "audio", "file"), not a MIME type.
    pub filetype: String,
}

/// Short-lived, single-use upload credential. Never cached across files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadCredential {
    pub access_key_id: String,
    pub access_key_secret: String,
    pub security_token: String,
    /// Public URL the object will be reachable at.
    pub file_url: String,
    /// Object key inside the bucket.
    pub file_path: String,
    #[serde(default)]
    pub file_id: Option<String>,
}

impl UploadCredential {
    pub fn is_complete(&self) -> bool {
        !self.access_key_id.is_empty()
            && !self.access_key_secret.is_empty()
            && !self.security_token.is_empty()
            && !self.file_url.is_empty()
            && !self.file_path.is_empty()
    }
}

/// The two API versions wrap the credential differently: v2 nests it under
/// `data`, v1 returns it flat.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StsTokenResponse {
    Wrapped { data: UploadCredential },
    Flat(UploadCredential),
}

impl StsTokenResponse {
    pub fn into_credential(self) -> UploadCredential {
        match self {
            StsTokenResponse::Wrapped { data } => data,
            StsTokenResponse::Flat(credential) => credential,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_and_flat_responses_both_decode() {
        let body = r#"{"access_key_id":"ak","access_key_secret":"sk","security_token":"st","file_url":"https://b.example/o.png","file_path":"o.png"}"#;
        let flat: StsTokenResponse = serde_json::from_str(body).unwrap();
        let wrapped: StsTokenResponse =
            serde_json::from_str(&format!(r#"{{"data":{body}}}"#)).unwrap();

        let flat = flat.into_credential();
        let wrapped = wrapped.into_credential();
        assert!(flat.is_complete());
        assert_eq!(flat.access_key_id, wrapped.access_key_id);
        assert_eq!(flat.file_path, wrapped.file_path);
    }
}
