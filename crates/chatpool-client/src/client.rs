//! Top-level orchestration: account acquisition, attachment resolution,
//! session creation, the streaming state machine and the retry loop.

use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{Semaphore, mpsc};
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};
use uuid::Uuid;

use chatpool_accounts::{AccountLease, AccountPool, Authenticator, PerformanceReport, PoolStatus};
use chatpool_common::{ClientConfig, ClientError, ClientResult};
use chatpool_protocol::chats::{NewChatRequest, NewChatResponse};
use chatpool_protocol::completions::{CompletionRequest, FileObject, StreamChunk};
use chatpool_protocol::sse::{SseParser, SsePayload};
use chatpool_protocol::sts::{StsTokenRequest, StsTokenResponse, UploadCredential};
use chatpool_protocol::tokens::estimate_tokens;

use crate::auth::HttpAuthenticator;
use crate::files::{self, FileDescriptor};
use crate::uploader::SignedUploader;

const RETRY_PAUSE: Duration = Duration::from_secs(1);
const STS_FETCH_TRIES: usize = 3;
const STS_RETRY_DELAY: Duration = Duration::from_secs(1);
const REMOTE_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;
const CHANNEL_DEPTH: usize = 32;

/// One chat call. Attachments are local paths or http(s) URLs.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub message: String,
    pub attachments: Vec<String>,
    /// Overrides the configured default model.
    pub model: Option<String>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            attachments: Vec::new(),
            model: None,
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<String>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Incremental answer text. Also implements [`futures_util::Stream`].
pub struct ChatStream {
    rx: mpsc::Receiver<ClientResult<String>>,
}

impl ChatStream {
    pub async fn next_chunk(&mut self) -> Option<ClientResult<String>> {
        self.rx.recv().await
    }
}

impl futures_util::Stream for ChatStream {
    type Item = ClientResult<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Pooled streaming chat client. All shared resources (HTTP connection
/// pool, account pool, request semaphore) are built eagerly at
/// construction; a process typically keeps one instance, but nothing here
/// is global.
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    http: wreq::Client,
    pool: AccountPool,
    uploader: SignedUploader,
    semaphore: Arc<Semaphore>,
}

impl Client {
    /// Builds the client and starts the pool's background warm-up and
    /// refresh tasks. Accounts come online gradually; callers may start
    /// streaming immediately and will wait on `acquire` as needed.
    pub async fn connect(config: ClientConfig) -> ClientResult<Self> {
        let http = wreq::Client::builder()
            .build()
            .map_err(ClientError::transport)?;
        let auth = Arc::new(HttpAuthenticator::new(http.clone(), config.base_url.clone()));
        Self::with_authenticator(config, http, auth).await
    }

    /// Same as [`Client::connect`] but with a caller-supplied signin
    /// transport. This is the seam tests use to run the full request path
    /// against scripted logins.
    pub async fn with_authenticator(
        config: ClientConfig,
        http: wreq::Client,
        auth: Arc<dyn Authenticator>,
    ) -> ClientResult<Self> {
        let pool = AccountPool::new(config.clone(), auth);
        pool.initialize().await;
        let uploader = SignedUploader::new(
            http.clone(),
            config.upload_retries,
            config.upload_timeout,
        );
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_requests.max(1)));
        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                http,
                pool,
                uploader,
                semaphore,
            }),
        })
    }

    /// Streams one chat completion. Every account-selection, upload and
    /// transport failure is handled by the retry loop; the stream ends
    /// with a single `Err` only once retries are exhausted (or the failure
    /// is unretryable).
    pub fn chat_stream(&self, request: ChatRequest) -> ChatStream {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let inner = self.inner.clone();
        tokio::spawn(run_chat(inner, request, tx));
        ChatStream { rx }
    }

    /// Non-streaming convenience: collects the whole answer.
    pub async fn chat_completion(&self, request: ChatRequest) -> ClientResult<String> {
        let mut stream = self.chat_stream(request);
        let mut answer = String::new();
        while let Some(chunk) = stream.next_chunk().await {
            answer.push_str(&chunk?);
        }
        Ok(answer)
    }

    pub async fn status(&self) -> PoolStatus {
        self.inner.pool.status().await
    }

    pub async fn performance_report(&self) -> PerformanceReport {
        self.inner.pool.performance_report().await
    }

    /// Stops background tasks and flushes the stats snapshot. In-flight
    /// streams finish on their own.
    pub async fn shutdown(&self) {
        self.inner.pool.shutdown().await;
    }
}

enum AttemptError {
    /// Retrying cannot help (empty pool, rejected attachment).
    Fatal(ClientError),
    Retryable(ClientError),
}

async fn run_chat(
    inner: Arc<ClientInner>,
    request: ChatRequest,
    tx: mpsc::Sender<ClientResult<String>>,
) {
    let Ok(_permit) = inner.semaphore.clone().acquire_owned().await else {
        return;
    };

    let max_retries = inner.config.max_retries;
    let mut last_error: Option<ClientError> = None;
    for attempt in 0..=max_retries {
        if attempt > 0 {
            sleep(RETRY_PAUSE).await;
        }
        match run_attempt(&inner, &request, attempt > 0, &tx).await {
            Ok(()) => return,
            Err(AttemptError::Fatal(err)) => {
                let _ = tx.send(Err(err)).await;
                return;
            }
            Err(AttemptError::Retryable(err)) => {
                warn!(attempt, error = %err, "chat attempt failed");
                last_error = Some(err);
            }
        }
    }

    if let Some(last) = last_error {
        let _ = tx
            .send(Err(ClientError::RetriesExhausted {
                attempts: max_retries + 1,
                last: Box::new(last),
            }))
            .await;
    }
}

async fn run_attempt(
    inner: &Arc<ClientInner>,
    request: &ChatRequest,
    is_retry: bool,
    tx: &mpsc::Sender<ClientResult<String>>,
) -> Result<(), AttemptError> {
    let started = Instant::now();
    let message_length = request.message.len() as u64;
    let model = request
        .model
        .clone()
        .unwrap_or_else(|| inner.config.default_model.clone());

    let lease = match inner
        .pool
        .acquire(message_length, is_retry, inner.config.acquire_timeout)
        .await
    {
        Ok(lease) => lease,
        Err(err @ ClientError::PoolEmpty) => return Err(AttemptError::Fatal(err)),
        Err(err) => return Err(AttemptError::Retryable(err)),
    };

    // Attachments are all-or-nothing: a rejected local file aborts the
    // whole request instead of sending a partial message.
    let mut file_objects: Vec<FileObject> = Vec::new();
    for attachment in &request.attachments {
        let attachment = attachment.trim();
        if attachment.is_empty() {
            continue;
        }
        if files::is_url(attachment) {
            let descriptor = files::probe_remote_file(
                &inner.http,
                attachment,
                lease.user_id(),
                REMOTE_PROBE_TIMEOUT,
            )
            .await;
            file_objects.push(descriptor.into_file_object());
        } else {
            match upload_local_file(inner, Path::new(attachment), &lease).await {
                Ok(descriptor) => file_objects.push(descriptor.into_file_object()),
                Err(err) => {
                    lease.release(false, 0, 0.0, 0, 0.0).await;
                    return Err(AttemptError::Fatal(ClientError::Attachment(format!(
                        "{attachment}: {err}"
                    ))));
                }
            }
        }
    }

    let chat_id = match create_chat(inner, lease.token(), &model).await {
        Ok(chat_id) => chat_id,
        Err(err) => {
            lease.release(false, 0, 0.0, 0, 0.0).await;
            return Err(AttemptError::Retryable(err));
        }
    };
    debug!(account = %lease.id(), chat_id, "session created");

    match stream_completion(inner, &lease, &chat_id, &model, request, file_objects, tx, started)
        .await
    {
        Ok(metrics) => {
            lease
                .release(
                    true,
                    message_length,
                    metrics.first_packet_delay,
                    metrics.tokens,
                    metrics.generation_time,
                )
                .await;
            Ok(())
        }
        Err(err) => {
            lease.release(false, 0, 0.0, 0, 0.0).await;
            Err(AttemptError::Retryable(err))
        }
    }
}

async fn create_chat(
    inner: &Arc<ClientInner>,
    token: &str,
    model: &str,
) -> ClientResult<String> {
    let url = format!("{}/api/v2/chats/new", inner.config.base_url);
    let body = NewChatRequest::for_model(model, crate::unix_millis());

    let response = inner
        .http
        .post(&url)
        .header("authorization", format!("Bearer {token}"))
        .header("source", "web")
        .header("accept", "application/json")
        .header("x-request-id", Uuid::new_v4().to_string())
        .json(&body)
        .timeout(inner.config.session_timeout)
        .send()
        .await
        .map_err(|err| ClientError::SessionCreate(err.to_string()))?;

    let status = response.status().as_u16();
    if status != 200 {
        return Err(ClientError::SessionCreate(format!(
            "chat create returned status {status}"
        )));
    }
    let parsed: NewChatResponse = response
        .json()
        .await
        .map_err(|err| ClientError::SessionCreate(err.to_string()))?;
    parsed
        .chat_id()
        .map(str::to_string)
        .ok_or_else(|| ClientError::SessionCreate("response missing chat id".to_string()))
}

async fn upload_local_file(
    inner: &Arc<ClientInner>,
    path: &Path,
    lease: &AccountLease,
) -> ClientResult<FileDescriptor> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|err| ClientError::Upload(format!("{}: {err}", path.display())))?;
    let size = metadata.len();
    if size == 0 {
        return Err(ClientError::Upload(format!("empty file: {}", path.display())));
    }
    if size > MAX_UPLOAD_BYTES {
        return Err(ClientError::Upload(format!(
            "file too large ({size} bytes): {}",
            path.display()
        )));
    }
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ClientError::Upload(format!("bad file name: {}", path.display())))?
        .to_string();
    let content_type = files::mime_type_for(&filename);
    let (category, class) = files::categorize(&content_type);

    let credential =
        fetch_upload_credential(inner, &filename, size, category.as_str(), lease.token()).await?;
    if !credential.is_complete() {
        return Err(ClientError::Upload(
            "upload credential missing required fields".to_string(),
        ));
    }

    let file_url = inner.uploader.upload(path, &credential).await;
    Ok(FileDescriptor {
        file_id: credential
            .file_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        file_url,
        filename,
        size,
        content_type,
        user_id: lease.user_id().to_string(),
        category,
        class,
    })
}

/// The credential endpoint exists under two API versions; each fetch round
/// tries both before backing off.
async fn fetch_upload_credential(
    inner: &Arc<ClientInner>,
    filename: &str,
    filesize: u64,
    filetype: &str,
    token: &str,
) -> ClientResult<UploadCredential> {
    let body = StsTokenRequest {
        filename: filename.to_string(),
        filesize,
        filetype: filetype.to_string(),
    };
    let paths = ["/api/v2/files/getstsToken", "/api/v1/files/getstsToken"];

    let mut last_error: Option<ClientError> = None;
    for attempt in 0..STS_FETCH_TRIES {
        if attempt > 0 {
            sleep(STS_RETRY_DELAY).await;
        }
        for path in paths {
            let url = format!("{}{path}", inner.config.base_url);
            match fetch_credential_once(inner, &url, &body, token).await {
                Ok(credential) => return Ok(credential),
                Err(err) => last_error = Some(err),
            }
        }
    }
    Err(last_error
        .unwrap_or_else(|| ClientError::Upload("upload credential unavailable".to_string())))
}

async fn fetch_credential_once(
    inner: &Arc<ClientInner>,
    url: &str,
    body: &StsTokenRequest,
    token: &str,
) -> ClientResult<UploadCredential> {
    let response = inner
        .http
        .post(url)
        .header("authorization", format!("Bearer {token}"))
        .header("source", "web")
        .header("x-request-id", Uuid::new_v4().to_string())
        .json(body)
        .timeout(inner.config.sts_timeout)
        .send()
        .await
        .map_err(|err| ClientError::Upload(err.to_string()))?;

    let status = response.status().as_u16();
    if status != 200 {
        return Err(ClientError::Upload(format!(
            "credential fetch returned status {status}"
        )));
    }
    let parsed: StsTokenResponse = response
        .json()
        .await
        .map_err(|err| ClientError::Upload(err.to_string()))?;
    Ok(parsed.into_credential())
}

struct StreamMetrics {
    first_packet_delay: f64,
    tokens: u64,
    generation_time: f64,
}

/// Drives the SSE response: connecting → first byte → deltas → done.
/// Undecodable lines are skipped; an in-band error or non-200 status
/// aborts the attempt.
#[allow(clippy::too_many_arguments)]
async fn stream_completion(
    inner: &Arc<ClientInner>,
    lease: &AccountLease,
    chat_id: &str,
    model: &str,
    request: &ChatRequest,
    files: Vec<FileObject>,
    tx: &mpsc::Sender<ClientResult<String>>,
    started: Instant,
) -> ClientResult<StreamMetrics> {
    let url = format!(
        "{}/api/v2/chat/completions?chat_id={chat_id}",
        inner.config.base_url
    );
    let payload =
        CompletionRequest::for_message(chat_id, model, &request.message, files, crate::unix_millis());

    let response = inner
        .http
        .post(&url)
        .header("authorization", format!("Bearer {}", lease.token()))
        .header("accept", "text/event-stream")
        .header("source", "web")
        .header("x-accel-buffering", "no")
        .json(&payload)
        .timeout(inner.config.stream_timeout)
        .send()
        .await
        .map_err(ClientError::transport)?;

    let status = response.status().as_u16();
    if status != 200 {
        let detail = response.text().await.unwrap_or_default();
        return Err(ClientError::RemoteApi { status, detail });
    }

    let mut parser = SseParser::new();
    let mut first_packet: Option<Instant> = None;
    let mut tokens = 0u64;
    let mut got_content = false;

    let mut body = response.bytes_stream();
    'stream: while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(ClientError::transport)?;
        for payload in parser.push_bytes(&chunk) {
            match payload {
                SsePayload::Done => break 'stream,
                SsePayload::Data(data) => {
                    let Ok(event) = serde_json::from_str::<StreamChunk>(&data) else {
                        continue;
                    };
                    if let Some(error) = event.error {
                        return Err(ClientError::RemoteApi {
                            status,
                            detail: error.to_string(),
                        });
                    }
                    let Some(content) = event.answer_content() else {
                        continue;
                    };
                    if first_packet.is_none() {
                        first_packet = Some(Instant::now());
                    }
                    got_content = true;
                    tokens += estimate_tokens(content);
                    if tx.send(Ok(content.to_string())).await.is_err() {
                        // Caller dropped the stream; stop reading and let
                        // the release path record what we have.
                        break 'stream;
                    }
                }
            }
        }
    }

    // A stream that closes without [DONE] may leave one unterminated line.
    if let Some(SsePayload::Data(data)) = parser.finish()
        && let Ok(event) = serde_json::from_str::<StreamChunk>(&data)
        && event.error.is_none()
        && let Some(content) = event.answer_content()
    {
        if first_packet.is_none() {
            first_packet = Some(Instant::now());
        }
        got_content = true;
        tokens += estimate_tokens(content);
        let _ = tx.send(Ok(content.to_string())).await;
    }

    if !got_content {
        let _ = tx
            .send(Ok("[warning] the model returned no content\n".to_string()))
            .await;
    }

    Ok(StreamMetrics {
        first_packet_delay: first_packet
            .map(|at| (at - started).as_secs_f64())
            .unwrap_or(0.0),
        tokens,
        generation_time: first_packet
            .map(|at| at.elapsed().as_secs_f64())
            .unwrap_or(0.0),
    })
}
