//! Request coordination. One [`Engine`] owns the whole answer pipeline:
//! topic resolution, assistant lifecycle, run execution (polled or
//! streamed), citation reconciliation, and the caching in front of it all.
//!
//! Identical questions are deduplicated at two levels. A finished answer is
//! served from a TTL cache; a question currently in flight is joined, with
//! every caller receiving the one reconciled result when its leader
//! finishes. Cache keys fold letter case and surrounding whitespace, and
//! include the topic and answer language, so a Korean and an English
//! rendering of the same question never collide.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use super::assistant::AssistantManager;
use super::run::{self, PollPolicy};
use super::stores::{self, StoreRef, StoreResolver};
use super::{Answer, AnswerEvent, EngineError, Query, relay};
use crate::citations;
use crate::config::EngineConfig;
use crate::openai::AssistantsApi;

/// Outcome slot shared between the caller running a question and the
/// callers waiting on it. `None` until the run finishes.
type Shared = Option<Result<Answer, EngineError>>;

struct CachedAnswer {
    answer: Answer,
    at: Instant,
}

enum Role {
    Leader(watch::Sender<Shared>),
    Follower(watch::Receiver<Shared>),
}

pub struct Engine<A> {
    api: A,
    config: EngineConfig,
    assistants: AssistantManager,
    stores: StoreResolver,
    poll: PollPolicy,
    answers: Mutex<HashMap<String, CachedAnswer>>,
    pending: Mutex<HashMap<String, watch::Receiver<Shared>>>,
}

impl<A: AssistantsApi> Engine<A> {
    pub fn new(api: A, config: EngineConfig) -> Self {
        let assistants = AssistantManager::new(config.clone());
        let stores = StoreResolver::new(config.store_cache_ttl);
        Self {
            api,
            config,
            assistants,
            stores,
            poll: PollPolicy::default(),
            answers: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Answers a query, serving from cache or joining an identical in-flight
    /// request when possible.
    pub async fn handle(&self, query: &Query) -> Result<Answer, EngineError> {
        let key = cache_key(query);
        if let Some(answer) = self.fresh_answer(&key) {
            debug!(query = %query.text, "answer served from cache");
            return Ok(answer);
        }
        match self.join_or_lead(&key) {
            Role::Leader(slot) => {
                let _guard = PendingGuard {
                    engine: self,
                    key: &key,
                };
                let result = self.answer_query(query).await;
                if let Ok(answer) = &result {
                    self.store_answer(&key, answer.clone());
                }
                let _ = slot.send(Some(result.clone()));
                result
            }
            Role::Follower(rx) => {
                debug!(query = %query.text, "joining an identical in-flight request");
                await_shared(rx).await
            }
        }
    }

    /// Streamed variant of [`Engine::handle`]: progress events arrive on
    /// `events` and the reconciled answer is also returned. Cache hits and
    /// joined requests receive the finished tail without any deltas.
    pub async fn handle_streaming(
        &self,
        query: &Query,
        events: &mpsc::Sender<AnswerEvent>,
    ) -> Result<Answer, EngineError> {
        let key = cache_key(query);
        if let Some(answer) = self.fresh_answer(&key) {
            debug!(query = %query.text, "streaming a cached answer");
            deliver_finished(events, &answer).await;
            return Ok(answer);
        }
        match self.join_or_lead(&key) {
            Role::Leader(slot) => {
                let _guard = PendingGuard {
                    engine: self,
                    key: &key,
                };
                let result = self.stream_query(query, events).await;
                if let Ok(answer) = &result {
                    self.store_answer(&key, answer.clone());
                }
                let _ = slot.send(Some(result.clone()));
                result
            }
            Role::Follower(rx) => {
                debug!(query = %query.text, "joining an identical in-flight request");
                match await_shared(rx).await {
                    Ok(answer) => {
                        deliver_finished(events, &answer).await;
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
        }
    }

    /// Every library visible upstream, for topic listings.
    pub async fn topics(&self) -> Result<Vec<StoreRef>, EngineError> {
        stores::list_stores(&self.api).await
    }

    /// Resolves a topic name without running a search.
    pub async fn resolve_topic(&self, topic: &str) -> Result<StoreRef, EngineError> {
        self.stores.resolve(&self.api, topic).await
    }

    async fn answer_query(&self, query: &Query) -> Result<Answer, EngineError> {
        info!(query = %query.text, topic = query.topic.as_deref().unwrap_or("-"), lang = %query.lang, "running search");
        let prepared = self.prepare(query).await?;
        let output = run::execute(
            &self.api,
            &prepared.assistant_id,
            &prepared.question,
            prepared.store.as_ref().map(|s| s.id.as_str()),
            &self.poll,
        )
        .await?;
        let resolved =
            citations::resolve(&self.api, &output.text, &output.annotations, query.lang).await;
        Ok(Answer {
            text: resolved.text,
            sources: resolved.sources,
        })
    }

    async fn stream_query(
        &self,
        query: &Query,
        events: &mpsc::Sender<AnswerEvent>,
    ) -> Result<Answer, EngineError> {
        info!(query = %query.text, topic = query.topic.as_deref().unwrap_or("-"), lang = %query.lang, "running streamed search");
        let prepared = match self.prepare(query).await {
            Ok(prepared) => prepared,
            Err(err) => {
                // Failures before the stream opens still owe the caller a
                // terminal event.
                let _ = events
                    .send(AnswerEvent::Error {
                        message: err.user_message(),
                    })
                    .await;
                return Err(err);
            }
        };
        relay::execute_streaming(
            &self.api,
            &prepared.assistant_id,
            &prepared.question,
            prepared.store.as_ref().map(|s| s.id.as_str()),
            query.lang,
            events,
        )
        .await
    }

    /// Resolves the topic (when one is given) and ensures a live assistant.
    /// Topic failures surface before any thread or run is created.
    async fn prepare(&self, query: &Query) -> Result<Prepared, EngineError> {
        let store = match query.topic.as_deref() {
            Some(topic) => {
                let store = self.stores.resolve(&self.api, topic).await?;
                if store.file_count == 0 {
                    return Err(EngineError::TopicEmpty {
                        topic: topic.to_string(),
                    });
                }
                Some(store)
            }
            None => None,
        };
        let assistant = self.assistants.ensure(&self.api).await?;
        Ok(Prepared {
            assistant_id: assistant.id,
            question: compose_question(query),
            store,
        })
    }

    fn fresh_answer(&self, key: &str) -> Option<Answer> {
        if self.config.answer_cache_ttl.is_zero() {
            return None;
        }
        let mut answers = self.answers.lock().unwrap();
        match answers.get(key) {
            Some(cached) if cached.at.elapsed() <= self.config.answer_cache_ttl => {
                Some(cached.answer.clone())
            }
            Some(_) => {
                answers.remove(key);
                None
            }
            None => None,
        }
    }

    fn store_answer(&self, key: &str, answer: Answer) {
        if self.config.answer_cache_ttl.is_zero() {
            return;
        }
        self.answers.lock().unwrap().insert(
            key.to_string(),
            CachedAnswer {
                answer,
                at: Instant::now(),
            },
        );
    }

    /// Atomically either claims the key (becoming the leader who runs the
    /// search) or clones the existing leader's receiver to wait on.
    fn join_or_lead(&self, key: &str) -> Role {
        let mut pending = self.pending.lock().unwrap();
        if let Some(rx) = pending.get(key) {
            return Role::Follower(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        pending.insert(key.to_string(), rx);
        Role::Leader(tx)
    }
}

struct Prepared {
    assistant_id: String,
    question: String,
    store: Option<StoreRef>,
}

/// Removes the in-flight entry when the leader finishes, panics, or is
/// cancelled, so the key can be claimed again afterwards.
struct PendingGuard<'a, A> {
    engine: &'a Engine<A>,
    key: &'a str,
}

impl<A> Drop for PendingGuard<'_, A> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.engine.pending.lock() {
            pending.remove(self.key);
        }
    }
}

async fn await_shared(mut rx: watch::Receiver<Shared>) -> Result<Answer, EngineError> {
    match rx.wait_for(|slot| slot.is_some()).await {
        Ok(slot) => slot.clone().unwrap_or_else(|| Err(abandoned())),
        Err(_) => Err(abandoned()),
    }
}

fn abandoned() -> EngineError {
    EngineError::Transport {
        reason: "the in-flight request this call joined was abandoned".to_string(),
    }
}

async fn deliver_finished(events: &mpsc::Sender<AnswerEvent>, answer: &Answer) {
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
}

/// Queries differing only in letter case or surrounding whitespace share a
/// slot; the topic and answer language each segment the cache.
fn cache_key(query: &Query) -> String {
    let topic = query.topic.as_deref().unwrap_or("").trim().to_lowercase();
    format!(
        "{}\x1f{}\x1f{}",
        query.text.trim().to_lowercase(),
        topic,
        query.lang
    )
}

fn compose_question(query: &Query) -> String {
    let mut question = query.text.trim().to_string();
    if let Some(suffix) = query.lang.question_suffix() {
        question.push_str(suffix);
    }
    question
}
