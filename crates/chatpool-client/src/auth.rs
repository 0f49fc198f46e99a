use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use chatpool_accounts::{Authenticator, LoginOutcome};
use chatpool_common::{ClientError, ClientResult};
use chatpool_protocol::signin::{SigninRequest, SigninResponse};

/// Signin transport for the account pool. One instance serves every
/// account; the per-call timeout is enforced by the pool.
pub struct HttpAuthenticator {
    http: wreq::Client,
    base_url: String,
}

impl HttpAuthenticator {
    pub fn new(http: wreq::Client, base_url: String) -> Self {
        Self { http, base_url }
    }
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    async fn login(&self, email: &str, password_hash: &str) -> ClientResult<LoginOutcome> {
        let url = format!("{}/api/v1/auths/signin", self.base_url);
        let body = SigninRequest {
            email: email.to_string(),
            password: password_hash.to_string(),
        };

        let auth_err = |detail: String| ClientError::Authentication {
            email: email.to_string(),
            detail,
        };

        let response = self
            .http
            .post(&url)
            .header("content-type", "application/json; charset=UTF-8")
            .header("accept", "*/*")
            .header("x-request-id", Uuid::new_v4().to_string())
            .json(&body)
            .send()
            .await
            .map_err(|err| auth_err(err.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(auth_err(format!("signin returned status {status}")));
        }

        let parsed: SigninResponse = response
            .json()
            .await
            .map_err(|err| auth_err(format!("signin body undecodable: {err}")))?;
        if parsed.token.is_empty() {
            return Err(auth_err("signin response missing token".to_string()));
        }

        debug!(email, "signin ok");
        Ok(LoginOutcome {
            token: parsed.token,
            expires_at: parsed.expires_at,
            user_id: parsed.id,
        })
    }
}
