//! Server-sent event handling for streamed runs.
//!
//! The reader task forwards text deltas as they arrive and closes the channel
//! after the terminal `[DONE]` marker. Runs that stall on a tool call are
//! acknowledged and resumed here so callers see one uninterrupted stream.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use super::client::{ApiError, OpenAiClient, classify_error};
use super::types::{
    Annotation, CreateRunRequest, Run, SubmitToolOutputsRequest, ThreadMessage, ToolOutput,
};

const CHANNEL_CAPACITY: usize = 64;
const MAX_TOOL_ROUNDS: u32 = 8;

/// One event on a streamed run, in upstream order.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A fragment of answer text.
    Delta(String),
    /// The assistant message finished; carries its citation annotations.
    MessageDone(Vec<Annotation>),
    /// The run reached `completed`.
    Completed,
    /// The run ended without completing.
    Failed(String),
    /// End of stream.
    Done,
}

pub(crate) async fn open_run_stream(
    client: &OpenAiClient,
    thread_id: &str,
    req: &CreateRunRequest,
) -> Result<mpsc::Receiver<Result<RunEvent, ApiError>>, ApiError> {
    let mut body = req.clone();
    body.stream = Some(true);
    let first = send_stream_request(client, &format!("/threads/{thread_id}/runs"), &body).await?;

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let client = client.clone();
    let thread_id = thread_id.to_string();
    tokio::spawn(async move {
        let mut response = first;
        let mut rounds = 0u32;
        loop {
            match pump(response, &tx).await {
                PumpEnd::Finished | PumpEnd::Lost => break,
                PumpEnd::RequiresAction(run) => {
                    rounds += 1;
                    if rounds > MAX_TOOL_ROUNDS {
                        let _ = tx
                            .send(Err(ApiError::Stream(
                                "run kept requesting tool calls".to_string(),
                            )))
                            .await;
                        break;
                    }
                    debug!(run_id = %run.id, round = rounds, "acknowledging tool calls mid-stream");
                    match resume_after_tool_calls(&client, &thread_id, &run).await {
                        Ok(next) => response = next,
                        Err(err) => {
                            let _ = tx.send(Err(err)).await;
                            break;
                        }
                    }
                }
            }
        }
    });
    Ok(rx)
}

async fn send_stream_request<B: Serialize>(
    client: &OpenAiClient,
    path: &str,
    body: &B,
) -> Result<reqwest::Response, ApiError> {
    let response = client
        .http()
        .post(client.url(path))
        .bearer_auth(client.key().as_str())
        .header("OpenAI-Beta", "assistants=v2")
        .header("User-Agent", crate::USER_AGENT)
        .json(body)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(classify_error(status, &text));
    }
    Ok(response)
}

async fn resume_after_tool_calls(
    client: &OpenAiClient,
    thread_id: &str,
    run: &Run,
) -> Result<reqwest::Response, ApiError> {
    let outputs: Vec<ToolOutput> = run
        .required_action
        .as_ref()
        .map(|action| {
            action
                .submit_tool_outputs
                .tool_calls
                .iter()
                .map(|call| ToolOutput::acknowledge(&call.id))
                .collect()
        })
        .unwrap_or_default();
    let body = SubmitToolOutputsRequest {
        tool_outputs: outputs,
        stream: Some(true),
    };
    let path = format!(
        "/threads/{}/runs/{}/submit_tool_outputs",
        thread_id, run.id
    );
    send_stream_request(client, &path, &body).await
}

enum PumpEnd {
    Finished,
    RequiresAction(Run),
    Lost,
}

/// Reads one SSE response to its end, forwarding events to `tx`.
async fn pump(response: reqwest::Response, tx: &mpsc::Sender<Result<RunEvent, ApiError>>) -> PumpEnd {
    let mut bytes = response.bytes_stream();
    let mut assembler = EventAssembler::default();
    let mut buf = String::new();
    let mut saw_terminal = false;

    while let Some(chunk) = bytes.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                let _ = tx.send(Err(ApiError::Network(err))).await;
                return PumpEnd::Lost;
            }
        };
        buf.push_str(&String::from_utf8_lossy(&chunk));
        while let Some(pos) = buf.find('\n') {
            let line: String = buf.drain(..=pos).collect();
            match assembler.line(line.trim_end_matches(['\n', '\r'])) {
                Some(Parsed::Event(event)) => {
                    if matches!(event, RunEvent::Completed | RunEvent::Failed(_)) {
                        saw_terminal = true;
                    }
                    if tx.send(Ok(event)).await.is_err() {
                        // Receiver gone; the run is abandoned upstream.
                        return PumpEnd::Lost;
                    }
                }
                Some(Parsed::ActionRequired(run)) => return PumpEnd::RequiresAction(*run),
                Some(Parsed::EndOfStream) => {
                    let _ = tx.send(Ok(RunEvent::Done)).await;
                    return PumpEnd::Finished;
                }
                None => {}
            }
        }
    }

    if saw_terminal {
        // Some servers close without an explicit [DONE].
        let _ = tx.send(Ok(RunEvent::Done)).await;
        PumpEnd::Finished
    } else {
        let _ = tx
            .send(Err(ApiError::Stream(
                "stream ended before a terminal event".to_string(),
            )))
            .await;
        PumpEnd::Lost
    }
}

enum Parsed {
    Event(RunEvent),
    ActionRequired(Box<Run>),
    EndOfStream,
}

/// Assembles named SSE frames from individual lines. The event name persists
/// until the next `event:` line, matching how the upstream emits frames.
#[derive(Default)]
struct EventAssembler {
    event: Option<String>,
}

impl EventAssembler {
    fn line(&mut self, line: &str) -> Option<Parsed> {
        if line.is_empty() {
            return None;
        }
        if let Some(name) = line.strip_prefix("event:") {
            self.event = Some(name.trim().to_string());
            return None;
        }
        let data = line.strip_prefix("data:")?.trim_start();
        if data == "[DONE]" {
            return Some(Parsed::EndOfStream);
        }
        match self.event.as_deref() {
            Some("thread.message.delta") => {
                let event: MessageDeltaEvent = serde_json::from_str(data).ok()?;
                let mut text = String::new();
                for part in event.delta.content {
                    if let Some(t) = part.text
                        && let Some(value) = t.value
                    {
                        text.push_str(&value);
                    }
                }
                (!text.is_empty()).then(|| Parsed::Event(RunEvent::Delta(text)))
            }
            Some("thread.message.completed") => {
                let message: ThreadMessage = serde_json::from_str(data).ok()?;
                Some(Parsed::Event(RunEvent::MessageDone(message.annotations())))
            }
            Some("thread.run.completed") => Some(Parsed::Event(RunEvent::Completed)),
            Some("thread.run.requires_action") => {
                let run: Run = serde_json::from_str(data).ok()?;
                Some(Parsed::ActionRequired(Box::new(run)))
            }
            Some(
                "thread.run.failed"
                | "thread.run.cancelled"
                | "thread.run.expired"
                | "thread.run.incomplete",
            ) => {
                let reason = serde_json::from_str::<Run>(data)
                    .ok()
                    .and_then(|run| run.last_error)
                    .and_then(|err| err.message)
                    .unwrap_or_else(|| "run did not complete".to_string());
                Some(Parsed::Event(RunEvent::Failed(reason)))
            }
            Some("error") => Some(Parsed::Event(RunEvent::Failed(data.to_string()))),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessageDeltaEvent {
    delta: MessageDelta,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    #[serde(default)]
    content: Vec<DeltaContent>,
}

#[derive(Debug, Deserialize)]
struct DeltaContent {
    #[serde(default)]
    text: Option<DeltaText>,
}

#[derive(Debug, Deserialize)]
struct DeltaText {
    #[serde(default)]
    value: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(assembler: &mut EventAssembler, transcript: &str) -> Vec<Parsed> {
        transcript
            .lines()
            .filter_map(|line| assembler.line(line))
            .collect()
    }

    #[test]
    fn delta_frames_produce_text_fragments() {
        let mut assembler = EventAssembler::default();
        let parsed = feed(
            &mut assembler,
            concat!(
                "event: thread.message.delta\n",
                r#"data: {"id":"msg_1","delta":{"content":[{"index":0,"type":"text","text":{"value":"In the "}}]}}"#,
                "\n\n",
                "event: thread.message.delta\n",
                r#"data: {"id":"msg_1","delta":{"content":[{"index":0,"type":"text","text":{"value":"beginning"}}]}}"#,
                "\n",
            ),
        );
        assert_eq!(parsed.len(), 2);
        let texts: Vec<&str> = parsed
            .iter()
            .filter_map(|p| match p {
                Parsed::Event(RunEvent::Delta(text)) => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["In the ", "beginning"]);
    }

    #[test]
    fn done_marker_ends_the_stream() {
        let mut assembler = EventAssembler::default();
        let parsed = feed(&mut assembler, "event: done\ndata: [DONE]\n");
        assert!(matches!(parsed.as_slice(), [Parsed::EndOfStream]));
    }

    #[test]
    fn failed_run_carries_last_error_message() {
        let mut assembler = EventAssembler::default();
        let parsed = feed(
            &mut assembler,
            concat!(
                "event: thread.run.failed\n",
                r#"data: {"id":"run_1","thread_id":"thread_1","status":"failed","last_error":{"code":"server_error","message":"backend overloaded"}}"#,
                "\n",
            ),
        );
        match parsed.as_slice() {
            [Parsed::Event(RunEvent::Failed(reason))] => {
                assert_eq!(reason, "backend overloaded");
            }
            other => panic!("unexpected: {} events", other.len()),
        }
    }

    #[test]
    fn unhandled_event_kinds_are_skipped() {
        let mut assembler = EventAssembler::default();
        let parsed = feed(
            &mut assembler,
            concat!(
                "event: thread.run.step.delta\n",
                r#"data: {"id":"step_1","delta":{}}"#,
                "\n\n",
                "event: thread.run.completed\n",
                r#"data: {"id":"run_1","thread_id":"thread_1","status":"completed"}"#,
                "\n",
            ),
        );
        assert!(matches!(
            parsed.as_slice(),
            [Parsed::Event(RunEvent::Completed)]
        ));
    }

    #[test]
    fn requires_action_surfaces_tool_calls() {
        let mut assembler = EventAssembler::default();
        let parsed = feed(
            &mut assembler,
            concat!(
                "event: thread.run.requires_action\n",
                r#"data: {"id":"run_1","thread_id":"thread_1","status":"requires_action","required_action":{"submit_tool_outputs":{"tool_calls":[{"id":"call_9"}]}}}"#,
                "\n",
            ),
        );
        match parsed.as_slice() {
            [Parsed::ActionRequired(run)] => {
                let action = run.required_action.as_ref().unwrap();
                assert_eq!(action.submit_tool_outputs.tool_calls[0].id, "call_9");
            }
            _ => panic!("expected an action-required frame"),
        }
    }

    #[test]
    fn crlf_lines_are_tolerated() {
        let mut assembler = EventAssembler::default();
        assert!(assembler.line("event: thread.run.completed\r".trim_end_matches(['\n', '\r'])).is_none());
        let parsed = assembler.line(
            r#"data: {"id":"run_1","thread_id":"thread_1","status":"completed"}"#,
        );
        assert!(matches!(parsed, Some(Parsed::Event(RunEvent::Completed))));
    }
}
