//! Scripted in-memory stand-in for the assistants service, used by engine
//! tests. Responses are queued ahead of time; call logs and counters let
//! tests assert how often the upstream was actually hit.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;

use super::client::{ApiError, AssistantsApi};
use super::stream::RunEvent;
use super::types::{
    Annotation, Assistant, CreateAssistantRequest, CreateRunRequest, FileCitation, FileCounts,
    FileMetadata, MessageContent, Page, Run, RunStatus, TextContent, Thread, ThreadMessage,
    ToolOutput, VectorStore,
};

#[derive(Default)]
pub(crate) struct MockApi {
    /// Failures to serve before assistant creation starts succeeding.
    pub create_assistant_failures: Mutex<VecDeque<ApiError>>,
    /// Assistant ids that `retrieve_assistant` will confirm. Created
    /// assistants are added automatically; remove one to simulate staleness.
    pub valid_assistants: Mutex<HashSet<String>>,
    /// Scripted outcomes for `retrieve_run`, oldest first. When exhausted,
    /// polls report a completed run.
    pub poll_script: Mutex<VecDeque<Result<Run, ApiError>>>,
    /// Scripted event sequences for `run_stream`, one per streamed run.
    pub stream_scripts: Mutex<VecDeque<Vec<Result<RunEvent, ApiError>>>>,
    /// Thread messages returned by `list_messages`, newest first.
    pub messages: Mutex<Vec<ThreadMessage>>,
    /// Known files for `retrieve_file` (id -> filename).
    pub files: Mutex<HashMap<String, String>>,
    /// Pages served by `list_vector_stores`, in listing order.
    pub store_pages: Mutex<VecDeque<Page<VectorStore>>>,

    pub assistants_created: AtomicUsize,
    pub threads_created: AtomicUsize,
    pub runs_created: AtomicUsize,
    pub streams_opened: AtomicUsize,
    pub store_list_calls: AtomicUsize,
    pub created_requests: Mutex<Vec<CreateAssistantRequest>>,
    pub run_requests: Mutex<Vec<CreateRunRequest>>,
    pub sent_messages: Mutex<Vec<String>>,
    pub submitted_outputs: Mutex<Vec<ToolOutput>>,
    pub file_lookups: Mutex<Vec<String>>,
    pub store_cursors: Mutex<Vec<Option<String>>>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_polls(&self, statuses: &[RunStatus]) {
        let mut script = self.poll_script.lock().unwrap();
        for status in statuses {
            script.push_back(Ok(run_with_status(*status)));
        }
    }

    pub fn script_stream(&self, events: Vec<Result<RunEvent, ApiError>>) {
        self.stream_scripts.lock().unwrap().push_back(events);
    }

    pub fn add_file(&self, id: &str, filename: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(id.to_string(), filename.to_string());
    }

    pub fn set_reply(&self, text: &str, annotations: Vec<Annotation>) {
        *self.messages.lock().unwrap() = vec![assistant_message(text, annotations)];
    }

    pub fn add_store_page(&self, stores: Vec<VectorStore>, has_more: bool) {
        let last_id = stores.last().map(|s| s.id.clone());
        self.store_pages.lock().unwrap().push_back(Page {
            data: stores,
            has_more,
            last_id,
        });
    }
}

impl AssistantsApi for MockApi {
    async fn create_assistant(&self, req: &CreateAssistantRequest) -> Result<Assistant, ApiError> {
        self.created_requests.lock().unwrap().push(req.clone());
        if let Some(err) = self.create_assistant_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let n = self.assistants_created.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("asst_mock_{n}");
        self.valid_assistants.lock().unwrap().insert(id.clone());
        Ok(Assistant {
            id,
            model: req.model.clone(),
        })
    }

    async fn retrieve_assistant(&self, assistant_id: &str) -> Result<Assistant, ApiError> {
        if self.valid_assistants.lock().unwrap().contains(assistant_id) {
            Ok(Assistant {
                id: assistant_id.to_string(),
                model: "gpt-4o".to_string(),
            })
        } else {
            Err(ApiError::Api {
                status: 404,
                message: format!("No assistant found with id '{assistant_id}'"),
            })
        }
    }

    async fn create_thread(&self) -> Result<Thread, ApiError> {
        let n = self.threads_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Thread {
            id: format!("thread_mock_{n}"),
        })
    }

    async fn create_message(&self, _thread_id: &str, text: &str) -> Result<(), ApiError> {
        self.sent_messages.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn create_run(&self, _thread_id: &str, req: &CreateRunRequest) -> Result<Run, ApiError> {
        self.run_requests.lock().unwrap().push(req.clone());
        let n = self.runs_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Run {
            id: format!("run_mock_{n}"),
            status: RunStatus::Queued,
            required_action: None,
            last_error: None,
        })
    }

    async fn retrieve_run(&self, _thread_id: &str, _run_id: &str) -> Result<Run, ApiError> {
        self.poll_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(run_with_status(RunStatus::Completed)))
    }

    async fn submit_tool_outputs(
        &self,
        _thread_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<Run, ApiError> {
        self.submitted_outputs.lock().unwrap().extend(outputs);
        Ok(Run {
            id: run_id.to_string(),
            status: RunStatus::InProgress,
            required_action: None,
            last_error: None,
        })
    }

    async fn list_messages(&self, _thread_id: &str) -> Result<Vec<ThreadMessage>, ApiError> {
        Ok(self.messages.lock().unwrap().clone())
    }

    async fn retrieve_file(&self, file_id: &str) -> Result<FileMetadata, ApiError> {
        self.file_lookups.lock().unwrap().push(file_id.to_string());
        match self.files.lock().unwrap().get(file_id) {
            Some(filename) => Ok(FileMetadata {
                filename: filename.clone(),
            }),
            None => Err(ApiError::Api {
                status: 404,
                message: format!("No file found with id '{file_id}'"),
            }),
        }
    }

    async fn list_vector_stores(
        &self,
        after: Option<&str>,
    ) -> Result<Page<VectorStore>, ApiError> {
        self.store_list_calls.fetch_add(1, Ordering::SeqCst);
        self.store_cursors
            .lock()
            .unwrap()
            .push(after.map(str::to_string));
        Ok(self
            .store_pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Page {
                data: Vec::new(),
                has_more: false,
                last_id: None,
            }))
    }

    async fn run_stream(
        &self,
        _thread_id: &str,
        req: &CreateRunRequest,
    ) -> Result<mpsc::Receiver<Result<RunEvent, ApiError>>, ApiError> {
        self.run_requests.lock().unwrap().push(req.clone());
        self.streams_opened.fetch_add(1, Ordering::SeqCst);
        let script = self
            .stream_scripts
            .lock()
            .unwrap()
            .pop_front()
            .expect("no scripted stream for run_stream call");
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for event in script {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

pub(crate) fn run_with_status(status: RunStatus) -> Run {
    Run {
        id: "run_mock_1".to_string(),
        status,
        required_action: None,
        last_error: None,
    }
}

pub(crate) fn run_requiring_action(call_ids: &[&str]) -> Run {
    let mut run = run_with_status(RunStatus::RequiresAction);
    run.required_action = Some(super::types::RequiredAction {
        submit_tool_outputs: super::types::SubmitToolOutputs {
            tool_calls: call_ids
                .iter()
                .map(|id| super::types::PendingToolCall { id: id.to_string() })
                .collect(),
        },
    });
    run
}

pub(crate) fn failed_run(message: &str) -> Run {
    let mut run = run_with_status(RunStatus::Failed);
    run.last_error = Some(super::types::LastError {
        message: Some(message.to_string()),
    });
    run
}

pub(crate) fn assistant_message(text: &str, annotations: Vec<Annotation>) -> ThreadMessage {
    ThreadMessage {
        role: "assistant".to_string(),
        content: vec![MessageContent {
            kind: "text".to_string(),
            text: Some(TextContent {
                value: text.to_string(),
                annotations,
            }),
        }],
    }
}

pub(crate) fn citation(marker: &str, file_id: &str, quote: Option<&str>) -> Annotation {
    Annotation {
        text: marker.to_string(),
        start_index: None,
        file_citation: Some(FileCitation {
            file_id: file_id.to_string(),
            quote: quote.map(str::to_string),
        }),
    }
}

pub(crate) fn store(id: &str, name: &str, files: u32) -> VectorStore {
    VectorStore {
        id: id.to_string(),
        name: Some(name.to_string()),
        file_counts: Some(FileCounts { total: files }),
    }
}
