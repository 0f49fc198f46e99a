use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// `POST /api/v2/chat/completions?chat_id=...` request body. Field names
/// and constants mirror the upstream web client; the mix of snake_case and
/// camelCase is theirs, not ours.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub stream: bool,
    pub incremental_output: bool,
    pub chat_id: String,
    pub chat_mode: String,
    pub model: String,
    pub parent_id: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub fid: String,
    #[serde(rename = "parentId")]
    pub parent_id_camel: Option<String>,
    #[serde(rename = "childrenIds")]
    pub children_ids: Vec<String>,
    pub role: String,
    pub content: String,
    pub user_action: String,
    pub files: Vec<FileObject>,
    pub timestamp: i64,
    pub models: Vec<String>,
    pub chat_type: String,
    pub feature_config: FeatureConfig,
    pub generate_cfg: GenerateCfg,
    pub extra: MessageExtra,
    pub sub_chat_type: String,
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureConfig {
    pub thinking_enabled: bool,
    pub output_schema: String,
    pub thinking_budget: u32,
    pub mcp: JsonValue,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            thinking_enabled: false,
            output_schema: "phase".to_string(),
            thinking_budget: 1024,
            mcp: JsonValue::Object(serde_json::Map::new()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateCfg {
    pub max_input_tokens: u64,
    pub max_tokens: u64,
    pub max_new_tokens: u64,
    pub seed: i64,
    pub function_choice: String,
    pub system_message: String,
    pub fncall_prompt_type: String,
    pub incremental_output: bool,
    pub skip_stopword_postproc: bool,
    pub max_retries: u32,
    pub cache_dir: String,
}

const MAX_CONTEXT_TOKENS: u64 = 1_048_576;

impl GenerateCfg {
    fn for_message(message_len: usize) -> Self {
        Self {
            max_input_tokens: MAX_CONTEXT_TOKENS,
            max_tokens: MAX_CONTEXT_TOKENS,
            max_new_tokens: MAX_CONTEXT_TOKENS.saturating_sub(message_len as u64),
            seed: -1,
            function_choice: "none".to_string(),
            system_message: " ".to_string(),
            fncall_prompt_type: "qwen".to_string(),
            incremental_output: true,
            skip_stopword_postproc: false,
            max_retries: 3,
            cache_dir: "./cache".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageExtra {
    pub meta: MessageMeta,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageMeta {
    #[serde(rename = "subChatType")]
    pub sub_chat_type: String,
}

/// Attachment descriptor embedded in the message `files` array. Shape is
/// dictated by the upstream web UI, including the redundant nested `file`
/// record and the `greenNet`/`itemId` vestiges.
#[derive(Debug, Clone, Serialize)]
pub struct FileObject {
    #[serde(rename = "type")]
    pub kind: String,
    pub file: FileRecord,
    pub id: String,
    pub url: String,
    pub name: String,
    pub collection_name: String,
    pub progress: u32,
    pub status: String,
    #[serde(rename = "greenNet")]
    pub green_net: String,
    pub size: u64,
    pub error: String,
    #[serde(rename = "itemId")]
    pub item_id: String,
    /// The full MIME type (the top-level `type` is the coarse category).
    pub file_type: String,
    #[serde(rename = "showType")]
    pub show_type: String,
    pub file_class: String,
    #[serde(rename = "uploadTaskId")]
    pub upload_task_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub created_at: i64,
    pub data: JsonValue,
    pub filename: String,
    pub hash: Option<String>,
    pub id: String,
    pub user_id: String,
    pub meta: FileRecordMeta,
    pub update_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileRecordMeta {
    pub name: String,
    pub size: u64,
    pub content_type: String,
}

impl CompletionRequest {
    pub fn for_message(
        chat_id: &str,
        model: &str,
        message: &str,
        files: Vec<FileObject>,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            stream: true,
            incremental_output: true,
            chat_id: chat_id.to_string(),
            chat_mode: "normal".to_string(),
            model: model.to_string(),
            parent_id: None,
            messages: vec![ChatMessage {
                fid: Uuid::new_v4().to_string(),
                parent_id_camel: None,
                children_ids: vec![Uuid::new_v4().to_string()],
                role: "user".to_string(),
                content: message.to_string(),
                user_action: "chat".to_string(),
                files,
                timestamp: timestamp_ms,
                models: vec![model.to_string()],
                chat_type: "t2t".to_string(),
                feature_config: FeatureConfig::default(),
                generate_cfg: GenerateCfg::for_message(message.len()),
                extra: MessageExtra {
                    meta: MessageMeta {
                        sub_chat_type: "t2t".to_string(),
                    },
                },
                sub_chat_type: "t2t".to_string(),
                parent_id: None,
            }],
            timestamp: timestamp_ms,
        }
    }
}

/// One decoded `data:` event from the completion stream.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
    /// In-band error payload; presence aborts the attempt.
    #[serde(default)]
    pub error: Option<JsonValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: StreamDelta,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamDelta {
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

impl StreamChunk {
    /// Answer-phase text, if this chunk carries any.
    pub fn answer_content(&self) -> Option<&str> {
        let delta = &self.choices.first()?.delta;
        if delta.phase.as_deref() != Some("answer") {
            return None;
        }
        delta.content.as_deref().filter(|text| !text.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_upstream_field_names() {
        let request = CompletionRequest::for_message("c1", "m", "hi", Vec::new(), 1);
        let value = serde_json::to_value(&request).unwrap();
        let message = &value["messages"][0];
        assert_eq!(message["parentId"], JsonValue::Null);
        assert!(message["childrenIds"].is_array());
        assert_eq!(message["extra"]["meta"]["subChatType"], "t2t");
        assert_eq!(message["generate_cfg"]["seed"], -1);
        assert_eq!(message["feature_config"]["output_schema"], "phase");
    }

    #[test]
    fn answer_content_requires_answer_phase() {
        let chunk: StreamChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{"phase":"think","content":"x"}}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.answer_content(), None);

        let chunk: StreamChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{"phase":"answer","content":"Hi"}}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.answer_content(), Some("Hi"));
    }
}
