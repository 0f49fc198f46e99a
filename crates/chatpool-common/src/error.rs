/// Failure taxonomy for the pooled client.
///
/// `Upload` is non-fatal at the call site that produces it (uploads fall
/// back to the pre-issued URL); everything else either aborts the current
/// attempt or the whole request.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("authentication failed for {email}: {detail}")]
    Authentication { email: String, detail: String },

    /// The pool has accounts but none became idle within the wait timeout.
    #[error("no account available within {waited_secs}s")]
    NoAccountAvailable { waited_secs: u64 },

    /// Zero accounts configured; failing fast beats waiting out the timeout.
    #[error("account pool is empty")]
    PoolEmpty,

    #[error("session create failed: {0}")]
    SessionCreate(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("attachment rejected: {0}")]
    Attachment(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote api error (status {status}): {detail}")]
    RemoteApi { status: u16, detail: String },

    #[error("all {attempts} attempts failed, last error: {last}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        last: Box<ClientError>,
    },
}

impl ClientError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        ClientError::Transport(err.to_string())
    }
}
