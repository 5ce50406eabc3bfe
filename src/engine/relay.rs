//! Streamed run execution: text deltas are relayed to the caller as they
//! arrive, then the finished message is re-fetched and reconciled exactly
//! like a polled run.
//!
//! Streamed fragments are display-only. The answer returned (and cached,
//! and shared with coalesced callers) always comes from the post-completion
//! re-fetch, so a dropped viewer never costs anyone else the result.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{Answer, AnswerEvent, EngineError, Lang, run};
use crate::citations;
use crate::openai::types::CreateRunRequest;
use crate::openai::{AssistantsApi, RunEvent};

/// Runs one streamed search, forwarding progress to `events`. On success the
/// `Sources`, `Final` and `Done` events close the stream; on failure a single
/// `Error` event does. The reconciled answer is also returned for caching.
pub(crate) async fn execute_streaming<A: AssistantsApi>(
    api: &A,
    assistant_id: &str,
    question: &str,
    store_override: Option<&str>,
    lang: Lang,
    events: &mpsc::Sender<AnswerEvent>,
) -> Result<Answer, EngineError> {
    match stream_run(api, assistant_id, question, store_override, lang, events).await {
        Ok(answer) => {
            let _ = events
                .send(AnswerEvent::Sources {
                    sources: answer.sources.clone(),
                })
                .await;
            let _ = events
                .send(AnswerEvent::Final {
                    answer: answer.clone(),
                })
                .await;
            let _ = events.send(AnswerEvent::Done).await;
            Ok(answer)
        }
        Err(err) => {
            let _ = events
                .send(AnswerEvent::Error {
                    message: err.user_message(),
                })
                .await;
            Err(err)
        }
    }
}

async fn stream_run<A: AssistantsApi>(
    api: &A,
    assistant_id: &str,
    question: &str,
    store_override: Option<&str>,
    lang: Lang,
    events: &mpsc::Sender<AnswerEvent>,
) -> Result<Answer, EngineError> {
    let thread = api.create_thread().await?;
    api.create_message(&thread.id, question).await?;
    let req = CreateRunRequest::new(assistant_id, store_override);
    let mut rx = api.run_stream(&thread.id, &req).await?;
    debug!(thread_id = %thread.id, "run stream opened");

    let mut sink_open = true;
    let mut completed = false;
    while let Some(event) = rx.recv().await {
        match event {
            Ok(RunEvent::Delta(text)) => {
                if sink_open && events.send(AnswerEvent::Delta { text }).await.is_err() {
                    // The viewer left; keep draining so callers coalesced on
                    // this run still get the reconciled answer.
                    sink_open = false;
                }
            }
            Ok(RunEvent::MessageDone(_)) => {
                // Annotations here are only a hint; the re-fetch below is
                // authoritative.
            }
            Ok(RunEvent::Completed) => completed = true,
            Ok(RunEvent::Failed(reason)) => {
                warn!(thread_id = %thread.id, %reason, "streamed run failed");
                return Err(EngineError::RunFailed { reason });
            }
            Ok(RunEvent::Done) => break,
            Err(err) => return Err(err.into()),
        }
    }
    if !completed {
        return Err(EngineError::Transport {
            reason: "stream ended before the run completed".to_string(),
        });
    }

    let output = run::final_reply(api, &thread.id).await?;
    let resolved = citations::resolve(api, &output.text, &output.annotations, lang).await;
    Ok(Answer {
        text: resolved.text,
        sources: resolved.sources,
    })
}
