use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use chatpool_accounts::{Authenticator, LoginOutcome};
use chatpool_client::{ChatRequest, Client, SignedUploader};
use chatpool_common::{AccountCredentials, ClientConfig, ClientError, ClientResult};
use chatpool_protocol::sts::UploadCredential;

struct AlwaysOkAuth;

#[async_trait]
impl Authenticator for AlwaysOkAuth {
    async fn login(&self, email: &str, _password_hash: &str) -> ClientResult<LoginOutcome> {
        Ok(LoginOutcome {
            token: format!("token-{email}"),
            expires_at: 4_000_000_000.0,
            user_id: "user-1".to_string(),
        })
    }
}

/// Nothing listens on this port; every upstream call fails fast with a
/// connection error.
const DEAD_UPSTREAM: &str = "http://127.0.0.1:9";

fn dead_upstream_config(accounts: usize) -> ClientConfig {
    let mut config = ClientConfig::with_accounts(
        (0..accounts)
            .map(|i| AccountCredentials {
                email: format!("acct{i}@x"),
                password: "pw".to_string(),
            })
            .collect(),
    );
    config.base_url = DEAD_UPSTREAM.to_string();
    config.acquire_timeout = Duration::from_secs(2);
    config.max_retries = 2;
    config
}

async fn connected_client(accounts: usize) -> Client {
    let http = wreq::Client::builder().build().unwrap();
    let client = Client::with_authenticator(
        dead_upstream_config(accounts),
        http,
        Arc::new(AlwaysOkAuth),
    )
    .await
    .unwrap();
    for _ in 0..100 {
        if client.status().await.logged_in == accounts {
            return client;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("accounts never logged in");
}

#[tokio::test]
async fn empty_pool_fails_fast_without_retries() {
    let http = wreq::Client::builder().build().unwrap();
    let client = Client::with_authenticator(dead_upstream_config(0), http, Arc::new(AlwaysOkAuth))
        .await
        .unwrap();

    let mut stream = client.chat_stream(ChatRequest::new("hi"));
    let first = stream.next_chunk().await.expect("one item");
    assert!(matches!(first, Err(ClientError::PoolEmpty)));
    assert!(stream.next_chunk().await.is_none());
    client.shutdown().await;
}

#[tokio::test]
async fn transport_failures_surface_after_releasing_every_attempt() {
    let client = connected_client(1).await;

    let mut stream = client.chat_stream(ChatRequest::new("hello"));
    let mut final_error = None;
    while let Some(item) = stream.next_chunk().await {
        match item {
            Ok(chunk) => panic!("unexpected content: {chunk}"),
            Err(err) => final_error = Some(err),
        }
    }

    match final_error.expect("a final error") {
        ClientError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, ClientError::SessionCreate(_)));
        }
        other => panic!("unexpected error: {other}"),
    }

    // One failure release per attempt, none missing.
    let report = client.performance_report().await;
    assert_eq!(report.accounts.len(), 1);
    assert_eq!(report.accounts[0].total_attempts, 3);
    assert_eq!(report.accounts[0].success_count, 0);
    assert_eq!(client.status().await.busy, 0);
    client.shutdown().await;
}

#[tokio::test]
async fn missing_attachment_aborts_without_retrying() {
    let client = connected_client(1).await;

    let request = ChatRequest::new("describe this")
        .with_attachments(vec!["/nonexistent/chatpool/pic.png".to_string()]);
    let mut stream = client.chat_stream(request);
    let first = stream.next_chunk().await.expect("one item");
    assert!(matches!(first, Err(ClientError::Attachment(_))));
    assert!(stream.next_chunk().await.is_none());

    // Attachment failures are not retried, so exactly one attempt recorded.
    let report = client.performance_report().await;
    assert_eq!(report.accounts[0].total_attempts, 1);
    assert_eq!(report.accounts[0].success_count, 0);
    client.shutdown().await;
}

#[tokio::test]
async fn upload_falls_back_to_preissued_url() {
    let path = std::env::temp_dir().join(format!("chatpool-upload-{}.png", std::process::id()));
    std::fs::write(&path, b"not really a png").unwrap();

    let credential = UploadCredential {
        access_key_id: "ak".to_string(),
        access_key_secret: "sk".to_string(),
        security_token: "st".to_string(),
        file_url: "http://127.0.0.1:9/bucket/key.png".to_string(),
        file_path: "key.png".to_string(),
        file_id: None,
    };

    let http = wreq::Client::builder().build().unwrap();
    let uploader = SignedUploader::new(http, 1, Duration::from_secs(2));
    let url = uploader.upload(&path, &credential).await;
    std::fs::remove_file(&path).ok();

    assert_eq!(url, credential.file_url);
}
