//! Non-streaming run execution: create a thread, post the question, start a
//! run, then poll until it finishes or the schedule runs out.
//!
//! Only the final assistant message after completion is authoritative;
//! nothing read mid-run is kept. A run that outlives the schedule is
//! abandoned where it stands and left to expire upstream.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::EngineError;
use crate::openai::AssistantsApi;
use crate::openai::types::{Annotation, CreateRunRequest, Run, RunStatus, ToolOutput};

const INITIAL_DELAY: Duration = Duration::from_millis(1500);
const POLL_BASE: Duration = Duration::from_millis(250);
const POLL_CAP: Duration = Duration::from_millis(4000);
const MAX_POLL_ATTEMPTS: u32 = 19;

/// Polling schedule: a fixed pause before the first status check, then
/// geometrically growing delays up to a ceiling, for a bounded number of
/// checks. The defaults give up after roughly a minute.
#[derive(Debug, Clone)]
pub(crate) struct PollPolicy {
    pub initial_delay: Duration,
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: INITIAL_DELAY,
            base: POLL_BASE,
            cap: POLL_CAP,
            max_attempts: MAX_POLL_ATTEMPTS,
        }
    }
}

impl PollPolicy {
    /// Delay after the given zero-based attempt: base * 1.5^attempt, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let mut delay = self.base;
        for _ in 0..attempt {
            delay = delay * 3 / 2;
            if delay >= self.cap {
                return self.cap;
            }
        }
        delay.min(self.cap)
    }

    #[cfg(test)]
    pub fn fast() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            base: Duration::from_millis(1),
            cap: Duration::from_millis(2),
            max_attempts: 4,
        }
    }
}

/// What one observed run status means for the poll loop.
#[derive(Debug)]
pub(crate) enum PollStep {
    Wait,
    Acknowledge(Vec<String>),
    Finished,
    Failed(String),
}

pub(crate) fn transition(run: &Run) -> PollStep {
    match run.status {
        RunStatus::Completed => PollStep::Finished,
        RunStatus::Queued | RunStatus::InProgress | RunStatus::Cancelling => PollStep::Wait,
        RunStatus::RequiresAction => {
            let calls = run
                .required_action
                .as_ref()
                .map(|action| {
                    action
                        .submit_tool_outputs
                        .tool_calls
                        .iter()
                        .map(|call| call.id.clone())
                        .collect()
                })
                .unwrap_or_default();
            PollStep::Acknowledge(calls)
        }
        RunStatus::Failed | RunStatus::Cancelled | RunStatus::Expired | RunStatus::Incomplete => {
            PollStep::Failed(failure_reason(run))
        }
    }
}

fn failure_reason(run: &Run) -> String {
    run.last_error
        .as_ref()
        .and_then(|err| err.message.clone())
        .unwrap_or_else(|| format!("run ended with status {:?}", run.status))
}

/// The completed run's answer text with its citation annotations.
#[derive(Debug)]
pub(crate) struct RunOutput {
    pub text: String,
    pub annotations: Vec<Annotation>,
}

pub(crate) async fn execute<A: AssistantsApi>(
    api: &A,
    assistant_id: &str,
    question: &str,
    store_override: Option<&str>,
    policy: &PollPolicy,
) -> Result<RunOutput, EngineError> {
    let started = Instant::now();
    let thread = api.create_thread().await?;
    api.create_message(&thread.id, question).await?;
    let req = CreateRunRequest::new(assistant_id, store_override);
    let run = api.create_run(&thread.id, &req).await?;
    debug!(run_id = %run.id, thread_id = %thread.id, "run created");

    tokio::time::sleep(policy.initial_delay).await;
    for attempt in 0..policy.max_attempts {
        let current = api.retrieve_run(&thread.id, &run.id).await?;
        match transition(&current) {
            PollStep::Finished => {
                debug!(run_id = %run.id, checks = attempt + 1, "run completed");
                return final_reply(api, &thread.id).await;
            }
            PollStep::Failed(reason) => {
                warn!(run_id = %run.id, %reason, "run failed");
                return Err(EngineError::RunFailed { reason });
            }
            PollStep::Acknowledge(calls) => {
                debug!(run_id = %run.id, calls = calls.len(), "acknowledging stalled tool calls");
                let outputs = calls.iter().map(|id| ToolOutput::acknowledge(id)).collect();
                api.submit_tool_outputs(&thread.id, &run.id, outputs).await?;
                // Re-check immediately; acknowledged runs resume at once.
            }
            PollStep::Wait => {
                if attempt + 1 < policy.max_attempts {
                    tokio::time::sleep(policy.delay(attempt)).await;
                }
            }
        }
    }

    let waited_secs = started.elapsed().as_secs();
    warn!(run_id = %run.id, waited_secs, "abandoning run still in flight");
    Err(EngineError::Timeout { waited_secs })
}

/// Fetches the newest assistant message in the thread. Only valid after the
/// run reached `completed`.
pub(crate) async fn final_reply<A: AssistantsApi>(
    api: &A,
    thread_id: &str,
) -> Result<RunOutput, EngineError> {
    let messages = api.list_messages(thread_id).await?;
    let Some(reply) = messages.iter().find(|m| m.role == "assistant") else {
        return Err(EngineError::RunFailed {
            reason: "run completed without an assistant reply".to_string(),
        });
    };
    Ok(RunOutput {
        text: reply.text(),
        annotations: reply.annotations(),
    })
}
