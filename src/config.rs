//! Runtime configuration, read once from the environment at startup.

use std::env;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const ASSISTANT_NAME: &str = "catena-librarian";
const DEFAULT_ANSWER_TTL_SECS: u64 = 10 * 60;
const DEFAULT_STORE_TTL_SECS: u64 = 6 * 60 * 60;

const DEFAULT_INSTRUCTIONS: &str = "You are a research librarian for a curated library of classic \
Christian theology. Answer questions using only material retrieved from the attached library, \
quote sparingly, cite the works you draw on, and say plainly when the library does not cover a \
topic. Answer in the language of the question unless instructed otherwise.";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub model: String,
    pub instructions: String,
    pub assistant_name: String,
    /// Vector store attached to the assistant at creation time. Topic
    /// queries override it per run.
    pub default_store: Option<String>,
    /// Zero disables answer caching entirely.
    pub answer_cache_ttl: Duration,
    pub store_cache_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            assistant_name: ASSISTANT_NAME.to_string(),
            default_store: None,
            answer_cache_ttl: Duration::from_secs(DEFAULT_ANSWER_TTL_SECS),
            store_cache_ttl: Duration::from_secs(DEFAULT_STORE_TTL_SECS),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(model) = env::var("CATENA_MODEL")
            && !model.trim().is_empty()
        {
            config.model = model.trim().to_string();
        }
        if let Ok(instructions) = env::var("CATENA_INSTRUCTIONS")
            && !instructions.trim().is_empty()
        {
            config.instructions = instructions;
        }
        if let Ok(store) = env::var("CATENA_VECTOR_STORE")
            && !store.trim().is_empty()
        {
            config.default_store = Some(store.trim().to_string());
        }
        if let Some(ttl) = ttl_from_env("CATENA_CACHE_TTL_SECS") {
            config.answer_cache_ttl = ttl;
        }
        if let Some(ttl) = ttl_from_env("CATENA_STORE_CACHE_TTL_SECS") {
            config.store_cache_ttl = ttl;
        }
        config
    }
}

fn ttl_from_env(var: &str) -> Option<Duration> {
    let raw = env::var(var).ok()?;
    match parse_secs(&raw) {
        Some(ttl) => Some(ttl),
        None => {
            warn!(var, value = %raw, "ignoring unparseable TTL");
            None
        }
    }
}

fn parse_secs(raw: &str) -> Option<Duration> {
    raw.trim().parse::<u64>().ok().map(Duration::from_secs)
}
