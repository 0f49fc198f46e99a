use serde::{Deserialize, Serialize};

/// `POST /api/v2/chats/new` — one remote chat session per request attempt.
#[derive(Debug, Clone, Serialize)]
pub struct NewChatRequest {
    pub title: String,
    pub models: Vec<String>,
    pub chat_mode: String,
    pub chat_type: String,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
}

impl NewChatRequest {
    pub fn for_model(model: &str, timestamp_ms: i64) -> Self {
        Self {
            title: "New chat".to_string(),
            models: vec![model.to_string()],
            chat_mode: "normal".to_string(),
            chat_type: "t2t".to_string(),
            timestamp: timestamp_ms,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewChatResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<NewChatData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewChatData {
    #[serde(default)]
    pub id: Option<String>,
}

impl NewChatResponse {
    /// The session id, if the remote reported success and included one.
    pub fn chat_id(&self) -> Option<&str> {
        if !self.success {
            return None;
        }
        self.data.as_ref()?.id.as_deref()
    }
}
