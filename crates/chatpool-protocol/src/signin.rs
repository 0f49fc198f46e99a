use serde::{Deserialize, Serialize};

/// `POST /api/v1/auths/signin`. The `password` field carries the sha256
/// hex digest of the real password, never the plaintext.
#[derive(Debug, Clone, Serialize)]
pub struct SigninRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SigninResponse {
    #[serde(default)]
    pub token: String,
    /// Unix seconds after which the token is invalid.
    #[serde(default)]
    pub expires_at: f64,
    /// Remote user id bound to the credential.
    #[serde(default)]
    pub id: String,
}
