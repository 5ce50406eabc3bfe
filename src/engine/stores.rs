//! Topic-to-vector-store resolution with a long-lived mapping cache.
//!
//! Topic names come from people, store names from whoever curated the
//! library, so matching is deliberately forgiving: exact (ignoring case and
//! surrounding space), then normalized, then a small synonym table, then
//! substring containment. Tiers are tried in that order across the whole
//! listing; the first tier that matches wins.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use super::EngineError;
use crate::openai::AssistantsApi;
use crate::openai::types::{Page, VectorStore};

/// Near-duplicate topic names seen in practice, normalized form on both
/// sides. One direction is enough: lookups canonicalize both the topic and
/// the store name before comparing.
const SYNONYMS: &[(&str, &str)] = &[
    ("revelations", "revelation"),
    ("psalm", "psalms"),
    ("songofsolomon", "songofsongs"),
    ("institutes", "institutesofthechristianreligion"),
    ("dogmatics", "reformeddogmatics"),
    ("churchfathers", "patristics"),
];

/// A resolved store. `file_count` is as of resolution time.
#[derive(Debug, Clone)]
pub struct StoreRef {
    pub id: String,
    pub name: String,
    pub file_count: u32,
}

struct CachedStore {
    store: StoreRef,
    at: Instant,
}

pub struct StoreResolver {
    ttl: Duration,
    cache: Mutex<HashMap<String, CachedStore>>,
}

impl StoreResolver {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves a topic to a store, consulting the cache first. Failed
    /// resolutions are never cached; neither are stores that currently hold
    /// no files, so a store being filled is picked up on the next request.
    pub async fn resolve<A: AssistantsApi>(
        &self,
        api: &A,
        topic: &str,
    ) -> Result<StoreRef, EngineError> {
        let key = normalize(topic);
        if key.is_empty() {
            return Err(EngineError::TopicNotFound {
                topic: topic.to_string(),
            });
        }

        if !self.ttl.is_zero()
            && let Some(cached) = self.lookup(&key)
        {
            debug!(topic, store_id = %cached.id, "topic resolved from cache");
            return Ok(cached);
        }

        let stores = list_until_exact(api, topic).await?;
        let Some(store) = best_match(topic, &stores) else {
            return Err(EngineError::TopicNotFound {
                topic: topic.to_string(),
            });
        };
        let resolved = StoreRef {
            id: store.id.clone(),
            name: store.name.clone().unwrap_or_default(),
            file_count: store.file_count(),
        };
        debug!(topic, store_id = %resolved.id, files = resolved.file_count, "topic resolved");

        if !self.ttl.is_zero() && resolved.file_count > 0 {
            self.cache.lock().unwrap().insert(
                key,
                CachedStore {
                    store: resolved.clone(),
                    at: Instant::now(),
                },
            );
        }
        Ok(resolved)
    }

    fn lookup(&self, key: &str) -> Option<StoreRef> {
        let cache = self.cache.lock().unwrap();
        let entry = cache.get(key)?;
        (entry.at.elapsed() <= self.ttl).then(|| entry.store.clone())
    }
}

/// Every store in the library, across all listing pages, in listing order.
pub async fn list_stores<A: AssistantsApi>(api: &A) -> Result<Vec<StoreRef>, EngineError> {
    let mut all = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let Page {
            data,
            has_more,
            last_id,
        } = api.list_vector_stores(cursor.as_deref()).await?;
        all.extend(data.into_iter().map(|store| {
            let file_count = store.file_count();
            StoreRef {
                id: store.id,
                name: store.name.unwrap_or_default(),
                file_count,
            }
        }));
        if !has_more {
            break;
        }
        match last_id {
            Some(last) => cursor = Some(last),
            None => break,
        }
    }
    Ok(all)
}

/// Walks the listing cursor, stopping early once an exact name match has
/// been seen: nothing on a later page can outrank it.
async fn list_until_exact<A: AssistantsApi>(
    api: &A,
    topic: &str,
) -> Result<Vec<VectorStore>, EngineError> {
    let mut all = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = api.list_vector_stores(cursor.as_deref()).await?;
        let exact_on_page = page
            .data
            .iter()
            .any(|store| store.name.as_deref().is_some_and(|name| exact_eq(name, topic)));
        all.extend(page.data);
        if exact_on_page || !page.has_more {
            break;
        }
        match page.last_id {
            Some(last) => cursor = Some(last),
            None => break,
        }
    }
    Ok(all)
}

fn best_match<'a>(topic: &str, stores: &'a [VectorStore]) -> Option<&'a VectorStore> {
    let named = || {
        stores
            .iter()
            .filter_map(|s| s.name.as_deref().map(|name| (name, s)))
    };

    if let Some((_, store)) = named().find(|(name, _)| exact_eq(name, topic)) {
        return Some(store);
    }

    let topic_norm = normalize(topic);
    if let Some((_, store)) = named().find(|(name, _)| normalize(name) == topic_norm) {
        return Some(store);
    }

    let topic_canon = canonical(&topic_norm);
    if let Some((_, store)) = named().find(|(name, _)| canonical(&normalize(name)) == topic_canon) {
        return Some(store);
    }

    named()
        .find(|(name, _)| {
            let name_norm = normalize(name);
            !name_norm.is_empty()
                && (name_norm.contains(topic_norm.as_str()) || topic_norm.contains(&name_norm))
        })
        .map(|(_, store)| store)
}

fn exact_eq(name: &str, topic: &str) -> bool {
    name.trim().to_lowercase() == topic.trim().to_lowercase()
}

/// Lowercases and strips everything that is not a letter or digit, so
/// "Church  History" and "church-history" compare equal.
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn canonical(norm: &str) -> &str {
    SYNONYMS
        .iter()
        .find(|(alias, _)| *alias == norm)
        .map(|(_, target)| *target)
        .unwrap_or(norm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openai::mock::{MockApi, store};
    use std::sync::atomic::Ordering;

    fn resolver() -> StoreResolver {
        StoreResolver::new(Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn exact_match_ignores_case_and_surrounding_space() {
        let api = MockApi::new();
        api.add_store_page(
            vec![
                store("vs_1", "Church History", 12),
                store("vs_2", "Systematic Theology", 40),
            ],
            false,
        );
        let resolved = resolver()
            .resolve(&api, "  systematic theology  ")
            .await
            .unwrap();
        assert_eq!(resolved.id, "vs_2");
        assert_eq!(resolved.file_count, 40);
    }

    #[tokio::test]
    async fn normalized_match_bridges_punctuation_differences() {
        let api = MockApi::new();
        api.add_store_page(vec![store("vs_1", "church-history", 5)], false);
        let resolved = resolver().resolve(&api, "Church  History").await.unwrap();
        assert_eq!(resolved.id, "vs_1");
    }

    #[tokio::test]
    async fn synonym_table_bridges_near_duplicates() {
        let api = MockApi::new();
        api.add_store_page(vec![store("vs_1", "Reformed Dogmatics", 9)], false);
        let resolved = resolver().resolve(&api, "dogmatics").await.unwrap();
        assert_eq!(resolved.id, "vs_1");
    }

    #[tokio::test]
    async fn containment_is_the_last_resort() {
        let api = MockApi::new();
        api.add_store_page(
            vec![
                store("vs_1", "John Calvin Collected Works", 30),
                store("vs_2", "Calvinism Debates", 4),
            ],
            false,
        );
        let resolved = resolver().resolve(&api, "calvin").await.unwrap();
        // Listing order decides within a tier.
        assert_eq!(resolved.id, "vs_1");
    }

    #[tokio::test]
    async fn exact_beats_containment_regardless_of_order() {
        let api = MockApi::new();
        api.add_store_page(
            vec![
                store("vs_1", "Psalms Commentary Collection", 7),
                store("vs_2", "psalms", 3),
            ],
            false,
        );
        let resolved = resolver().resolve(&api, "Psalms").await.unwrap();
        assert_eq!(resolved.id, "vs_2");
    }

    #[tokio::test]
    async fn listing_pages_until_a_match_appears() {
        let api = MockApi::new();
        api.add_store_page(vec![store("vs_1", "Church History", 12)], true);
        api.add_store_page(vec![store("vs_2", "Patristics", 8)], false);
        let resolved = resolver().resolve(&api, "patristics").await.unwrap();
        assert_eq!(resolved.id, "vs_2");

        let cursors = api.store_cursors.lock().unwrap();
        assert_eq!(cursors.as_slice(), &[None, Some("vs_1".to_string())]);
    }

    #[tokio::test]
    async fn exact_match_stops_the_listing_early() {
        let api = MockApi::new();
        api.add_store_page(vec![store("vs_1", "Patristics", 8)], true);
        api.add_store_page(vec![store("vs_2", "Never Fetched", 1)], false);
        let resolved = resolver().resolve(&api, "Patristics").await.unwrap();
        assert_eq!(resolved.id, "vs_1");
        assert_eq!(api.store_list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resolved_mapping_is_cached() {
        let api = MockApi::new();
        api.add_store_page(vec![store("vs_1", "Ethics", 3)], false);
        let resolver = resolver();
        let first = resolver.resolve(&api, "ethics").await.unwrap();
        let second = resolver.resolve(&api, "ETHICS").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(api.store_list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_resolution_is_not_cached() {
        let api = MockApi::new();
        api.add_store_page(vec![store("vs_1", "Ethics", 3)], false);
        let resolver = resolver();
        assert!(matches!(
            resolver.resolve(&api, "alchemy").await,
            Err(EngineError::TopicNotFound { .. })
        ));
        // Listing is consulted again; the miss left no cache entry behind.
        api.add_store_page(vec![store("vs_9", "Alchemy", 2)], false);
        let resolved = resolver.resolve(&api, "alchemy").await.unwrap();
        assert_eq!(resolved.id, "vs_9");
    }

    #[tokio::test]
    async fn empty_store_resolves_but_is_not_cached() {
        let api = MockApi::new();
        api.add_store_page(vec![store("vs_1", "Liturgics", 0)], false);
        let resolver = resolver();
        let first = resolver.resolve(&api, "liturgics").await.unwrap();
        assert_eq!(first.file_count, 0);

        api.add_store_page(vec![store("vs_1", "Liturgics", 6)], false);
        let second = resolver.resolve(&api, "liturgics").await.unwrap();
        assert_eq!(second.file_count, 6);
    }

    #[tokio::test]
    async fn zero_ttl_disables_the_cache() {
        let api = MockApi::new();
        api.add_store_page(vec![store("vs_1", "Ethics", 3)], false);
        api.add_store_page(vec![store("vs_1", "Ethics", 3)], false);
        let resolver = StoreResolver::new(Duration::ZERO);
        resolver.resolve(&api, "ethics").await.unwrap();
        resolver.resolve(&api, "ethics").await.unwrap();
        assert_eq!(api.store_list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn listing_collects_every_page() {
        let api = MockApi::new();
        api.add_store_page(vec![store("vs_1", "Church History", 12)], true);
        api.add_store_page(vec![store("vs_2", "Patristics", 8)], false);
        let all = list_stores(&api).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "Church History");
        assert_eq!(all[1].id, "vs_2");
        assert_eq!(api.store_list_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn normalization_keeps_unicode_letters() {
        assert_eq!(normalize("교회사 (Church History)"), "교회사churchhistory");
        assert_eq!(normalize("  Psalms!  "), "psalms");
    }
}
