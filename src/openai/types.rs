use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Tool {
    #[serde(rename = "type")]
    pub kind: String,
}

impl Tool {
    pub fn file_search() -> Self {
        Self {
            kind: "file_search".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ToolResources {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_search: Option<FileSearchResources>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FileSearchResources {
    pub vector_store_ids: Vec<String>,
}

impl ToolResources {
    pub fn file_search(store_id: &str) -> Self {
        Self {
            file_search: Some(FileSearchResources {
                vector_store_ids: vec![store_id.to_string()],
            }),
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct CreateAssistantRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_resources: Option<ToolResources>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Assistant {
    pub id: String,
    pub model: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Thread {
    pub id: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct CreateMessageRequest {
    pub role: String,
    pub content: String,
}

impl CreateMessageRequest {
    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Clone, Default)]
pub struct CreateRunRequest {
    pub assistant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_resources: Option<ToolResources>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

impl CreateRunRequest {
    /// Run against the assistant's own configuration, optionally searching a
    /// different vector store for this run only.
    pub fn new(assistant_id: &str, store_override: Option<&str>) -> Self {
        let mut req = Self {
            assistant_id: assistant_id.to_string(),
            ..Self::default()
        };
        if let Some(store_id) = store_override {
            req.tools = Some(vec![Tool::file_search()]);
            req.tool_resources = Some(ToolResources::file_search(store_id));
        }
        req
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub required_action: Option<RequiredAction>,
    #[serde(default)]
    pub last_error: Option<LastError>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RequiredAction {
    pub submit_tool_outputs: SubmitToolOutputs,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SubmitToolOutputs {
    pub tool_calls: Vec<PendingToolCall>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PendingToolCall {
    pub id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LastError {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct SubmitToolOutputsRequest {
    pub tool_outputs: Vec<ToolOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

#[derive(Debug, Serialize, Clone)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

impl ToolOutput {
    /// Trivial success acknowledgment that unblocks runs stalled on a tool
    /// call without executing any tool logic.
    pub fn acknowledge(tool_call_id: &str) -> Self {
        Self {
            tool_call_id: tool_call_id.to_string(),
            output: "{\"ok\":true}".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ThreadMessage {
    pub role: String,
    #[serde(default)]
    pub content: Vec<MessageContent>,
}

impl ThreadMessage {
    fn text_parts(&self) -> impl Iterator<Item = &TextContent> {
        self.content
            .iter()
            .filter(|part| part.kind == "text")
            .filter_map(|part| part.text.as_ref())
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.text_parts()
            .map(|t| t.value.as_str())
            .collect::<Vec<_>>()
            .join("")
    }

    /// All annotations across all text parts, in part order.
    pub fn annotations(&self) -> Vec<Annotation> {
        self.text_parts()
            .flat_map(|t| t.annotations.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MessageContent {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<TextContent>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TextContent {
    pub value: String,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

/// A span of generated text referencing a source document. The `text` field
/// is the literal marker substring as it appears in the message value.
#[derive(Debug, Deserialize, Clone)]
pub struct Annotation {
    pub text: String,
    #[serde(default)]
    pub start_index: Option<u32>,
    #[serde(default)]
    pub file_citation: Option<FileCitation>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FileCitation {
    pub file_id: String,
    #[serde(default)]
    pub quote: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FileMetadata {
    pub filename: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStore {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub file_counts: Option<FileCounts>,
}

impl VectorStore {
    pub fn file_count(&self) -> u32 {
        self.file_counts.as_ref().map(|c| c.total).unwrap_or(0)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FileCounts {
    #[serde(default)]
    pub total: u32,
}

/// One page of a cursor-paginated listing.
#[derive(Debug, Deserialize, Clone)]
pub struct Page<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub last_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorDetail {
    #[serde(default)]
    pub message: Option<String>,
}
