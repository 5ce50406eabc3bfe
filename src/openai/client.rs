use std::env;
use std::fmt;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::stream::{self, RunEvent};
use super::types::{
    ApiErrorBody, Assistant, CreateAssistantRequest, CreateMessageRequest, CreateRunRequest,
    FileMetadata, Page, Run, SubmitToolOutputsRequest, Thread, ThreadMessage, ToolOutput,
    VectorStore,
};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("OPENAI_API_KEY environment variable is not set")]
    ApiKeyNotSet,

    #[error("rate limited by the API after {MAX_ATTEMPTS} attempts")]
    RateLimited,

    #[error("authentication failed (status {0}): check OPENAI_API_KEY")]
    Auth(u16),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("event stream interrupted: {0}")]
    Stream(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }
}

fn is_retriable(err: &ApiError) -> bool {
    match err {
        ApiError::Api { status, .. } => *status == 429 || *status >= 500,
        ApiError::Network(e) => e.is_timeout() || e.is_connect(),
        _ => false,
    }
}

/// Equal-jitter backoff: half the exponential base plus a random half.
fn jittered_backoff(attempt: u32) -> Duration {
    let base = INITIAL_BACKOFF_MS * 2u64.pow(attempt);
    Duration::from_millis(base / 2 + fastrand::u64(0..=base / 2))
}

/// API key wrapper that keeps the secret out of Debug output.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn from_env() -> Result<Self, ApiError> {
        match env::var("OPENAI_API_KEY") {
            Ok(key) if !key.trim().is_empty() => Ok(Self::new(key.trim())),
            _ => Err(ApiError::ApiKeyNotSet),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

/// Upstream operations the engine depends on. Implemented by [`OpenAiClient`]
/// for the real service and by a scripted mock in tests.
pub trait AssistantsApi: Send + Sync {
    async fn create_assistant(&self, req: &CreateAssistantRequest) -> Result<Assistant, ApiError>;
    async fn retrieve_assistant(&self, assistant_id: &str) -> Result<Assistant, ApiError>;
    async fn create_thread(&self) -> Result<Thread, ApiError>;
    async fn create_message(&self, thread_id: &str, text: &str) -> Result<(), ApiError>;
    async fn create_run(&self, thread_id: &str, req: &CreateRunRequest) -> Result<Run, ApiError>;
    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run, ApiError>;
    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<Run, ApiError>;
    /// Messages in the thread, newest first.
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, ApiError>;
    async fn retrieve_file(&self, file_id: &str) -> Result<FileMetadata, ApiError>;
    async fn list_vector_stores(&self, after: Option<&str>)
    -> Result<Page<VectorStore>, ApiError>;
    /// Creates a run with streaming enabled and returns a channel of its
    /// events. Stalls on tool calls are acknowledged transparently; the
    /// channel closes after a terminal event or on transport failure.
    async fn run_stream(
        &self,
        thread_id: &str,
        req: &CreateRunRequest,
    ) -> Result<mpsc::Receiver<Result<RunEvent, ApiError>>, ApiError>;
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: Client,
    key: ApiKey,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(http: Client, key: ApiKey) -> Self {
        Self {
            http,
            key,
            base_url: OPENAI_BASE_URL.to_string(),
        }
    }

    pub fn from_env(http: Client) -> Result<Self, ApiError> {
        Ok(Self::new(http, ApiKey::from_env()?))
    }

    #[cfg(test)]
    pub fn with_base_url(http: Client, key: ApiKey, base_url: &str) -> Self {
        Self {
            http,
            key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    pub(crate) fn key(&self) -> &ApiKey {
        &self.key
    }

    pub(crate) fn url(&self, path: &str) -> String {
        let url = format!("{}{}", self.base_url, path);
        debug_assert!(
            url.starts_with("https://") || cfg!(test),
            "API key must only be sent over HTTPS"
        );
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = async {
                let response = self
                    .http
                    .get(self.url(path))
                    .bearer_auth(self.key.as_str())
                    .header("OpenAI-Beta", "assistants=v2")
                    .header("User-Agent", crate::USER_AGENT)
                    .timeout(REQUEST_TIMEOUT)
                    .send()
                    .await?;
                read_json(response).await
            }
            .await;

            match result {
                Ok(value) => return Ok(value),
                Err(err) if is_retriable(&err) && attempt < MAX_ATTEMPTS => {
                    let delay = jittered_backoff(attempt - 1);
                    warn!(path, attempt, error = %err, delay_ms = delay.as_millis() as u64, "retrying request");
                    tokio::time::sleep(delay).await;
                }
                Err(ApiError::Api { status: 429, .. }) => return Err(ApiError::RateLimited),
                Err(err) => return Err(err),
            }
        }
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = async {
                let response = self
                    .http
                    .post(self.url(path))
                    .bearer_auth(self.key.as_str())
                    .header("OpenAI-Beta", "assistants=v2")
                    .header("User-Agent", crate::USER_AGENT)
                    .timeout(REQUEST_TIMEOUT)
                    .json(body)
                    .send()
                    .await?;
                read_json(response).await
            }
            .await;

            match result {
                Ok(value) => return Ok(value),
                Err(err) if is_retriable(&err) && attempt < MAX_ATTEMPTS => {
                    let delay = jittered_backoff(attempt - 1);
                    warn!(path, attempt, error = %err, delay_ms = delay.as_millis() as u64, "retrying request");
                    tokio::time::sleep(delay).await;
                }
                Err(ApiError::Api { status: 429, .. }) => return Err(ApiError::RateLimited),
                Err(err) => return Err(err),
            }
        }
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_error(status, &body))
}

pub(crate) fn classify_error(status: StatusCode, body: &str) -> ApiError {
    let code = status.as_u16();
    if code == 401 || code == 403 {
        return ApiError::Auth(code);
    }
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .and_then(|e| e.message)
        .unwrap_or_else(|| {
            let snippet: String = body.chars().take(200).collect();
            if snippet.is_empty() {
                status.to_string()
            } else {
                snippet
            }
        });
    ApiError::Api {
        status: code,
        message,
    }
}

impl AssistantsApi for OpenAiClient {
    async fn create_assistant(&self, req: &CreateAssistantRequest) -> Result<Assistant, ApiError> {
        debug!(model = %req.model, "creating assistant");
        self.post_json("/assistants", req).await
    }

    async fn retrieve_assistant(&self, assistant_id: &str) -> Result<Assistant, ApiError> {
        self.get_json(&format!("/assistants/{assistant_id}")).await
    }

    async fn create_thread(&self) -> Result<Thread, ApiError> {
        self.post_json("/threads", &serde_json::json!({})).await
    }

    async fn create_message(&self, thread_id: &str, text: &str) -> Result<(), ApiError> {
        let req = CreateMessageRequest::user(text);
        self.post_json::<_, serde_json::Value>(&format!("/threads/{thread_id}/messages"), &req)
            .await
            .map(|_| ())
    }

    async fn create_run(&self, thread_id: &str, req: &CreateRunRequest) -> Result<Run, ApiError> {
        self.post_json(&format!("/threads/{thread_id}/runs"), req)
            .await
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run, ApiError> {
        self.get_json(&format!("/threads/{thread_id}/runs/{run_id}"))
            .await
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<Run, ApiError> {
        let req = SubmitToolOutputsRequest {
            tool_outputs: outputs,
            stream: None,
        };
        self.post_json(
            &format!("/threads/{thread_id}/runs/{run_id}/submit_tool_outputs"),
            &req,
        )
        .await
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, ApiError> {
        let page: Page<ThreadMessage> = self
            .get_json(&format!("/threads/{thread_id}/messages"))
            .await?;
        Ok(page.data)
    }

    async fn retrieve_file(&self, file_id: &str) -> Result<FileMetadata, ApiError> {
        self.get_json(&format!("/files/{file_id}")).await
    }

    async fn list_vector_stores(
        &self,
        after: Option<&str>,
    ) -> Result<Page<VectorStore>, ApiError> {
        let path = match after {
            Some(cursor) => format!("/vector_stores?limit=100&after={cursor}"),
            None => "/vector_stores?limit=100".to_string(),
        };
        self.get_json(&path).await
    }

    async fn run_stream(
        &self,
        thread_id: &str,
        req: &CreateRunRequest,
    ) -> Result<mpsc::Receiver<Result<RunEvent, ApiError>>, ApiError> {
        stream::open_run_stream(self, thread_id, req).await
    }
}
