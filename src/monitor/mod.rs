//! # Result monitors
//!
//! A monitor binds a remote call (url, method, params) to any mix of three
//! freshness strategies and answers "what is the current value" through one
//! operation, [`AgentContext::get_result`](crate::agent::AgentContext::get_result).
//!
//! | strategy | network activity | effect |
//! |----------|------------------|--------|
//! | cache | none of its own | serves a stored value while it is fresh |
//! | poll | local recurring `doPoll` task | refreshes cache, calls the callback |
//! | push | `registerPush` on the remote agent | remote `callbackPush` refreshes cache, calls the callback |
//!
//! The monitor record owns its poll task ids and references the remote
//! push registrations; cancelling a monitor releases both before the record
//! is deleted.

pub(crate) mod client;
pub(crate) mod push;

use std::{collections::BTreeMap, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    config::option_duration_ms,
    message::Params,
    scheduler::TaskId,
    state::AgentState,
    transport::Address,
    RpcResult,
};

pub const MONITORS_KEY: &str = "monitors";

/// Filter member overriding the configured cache max-age, in milliseconds.
pub const MAX_AGE_FILTER: &str = "maxAge";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default, with = "option_duration_ms")]
    pub max_age: Option<Duration>,
}

impl CacheConfig {
    pub fn max_age(max_age: Duration) -> Self {
        Self {
            max_age: Some(max_age),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    pub interval: Duration,
    pub first_immediate: bool,
}

impl PollConfig {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            first_immediate: false,
        }
    }

    pub fn immediately(mut self) -> Self {
        self.first_immediate = true;
        self
    }
}

/// How the remote side should push. `interval` pushes on a timer,
/// `on_event` pushes whenever `event` (or the method's triggering event)
/// fires there.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushConfig {
    pub interval: Option<Duration>,
    pub on_event: bool,
    pub event: Option<String>,
}

impl PushConfig {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval: Some(interval),
            ..Default::default()
        }
    }

    pub fn on_event() -> Self {
        Self {
            on_event: true,
            ..Default::default()
        }
    }

    pub fn on(event: impl Into<String>) -> Self {
        Self {
            on_event: true,
            event: Some(event.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorConfig {
    Cache(CacheConfig),
    Poll(PollConfig),
    Push(PushConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedValue {
    pub value: Value,
    pub stored_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorCache {
    #[serde(default, with = "option_duration_ms")]
    pub max_age: Option<Duration>,
    #[serde(default)]
    pub entry: Option<CachedValue>,
}

impl MonitorCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            max_age: config.max_age,
            entry: None,
        }
    }

    /// The stored value if it satisfies `filter` at `now`. A `maxAge` in the
    /// filter overrides the configured max-age; with neither, any stored
    /// value is fresh.
    pub fn fresh_value(&self, filter: &Params, now: DateTime<Utc>) -> Option<&Value> {
        let entry = self.entry.as_ref()?;
        let max_age = filter
            .get(MAX_AGE_FILTER)
            .and_then(Value::as_u64)
            .map(Duration::from_millis)
            .or(self.max_age);
        let Some(max_age) = max_age else {
            return Some(&entry.value);
        };
        // A stored_at in the future yields a negative age, which counts as fresh.
        let fresh = now
            .signed_duration_since(entry.stored_at)
            .to_std()
            .map_or(true, |age| age <= max_age);
        fresh.then_some(&entry.value)
    }

    /// Last writer by timestamp wins; an older write is dropped.
    pub fn store(&mut self, value: Value, at: DateTime<Utc>) -> bool {
        match &self.entry {
            Some(current) if current.stored_at > at => false,
            _ => {
                self.entry = Some(CachedValue {
                    value,
                    stored_at: at,
                });
                true
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMonitor {
    pub id: String,
    pub agent_id: String,
    pub url: Address,
    pub method: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<MonitorCache>,
    #[serde(default)]
    pub scheduler_ids: Vec<TaskId>,
    #[serde(default)]
    pub remote_ids: Vec<String>,
}

impl ResultMonitor {
    pub fn new(
        agent_id: impl Into<String>,
        url: Address,
        method: impl Into<String>,
        params: Params,
        callback_method: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            url,
            method: method.into(),
            params,
            callback_method,
            cache: None,
            scheduler_ids: Vec::new(),
            remote_ids: Vec::new(),
        }
    }

    pub fn has_cache(&self) -> bool {
        self.cache.is_some()
    }
}

pub type MonitorTable = BTreeMap<String, ResultMonitor>;

/// The agent's monitors, persisted under [`MONITORS_KEY`]. Writes are
/// serialized so a poll tick and a push landing together both see a
/// consistent record.
pub struct MonitorStore {
    state: AgentState,
    write_lock: Mutex<()>,
}

impl MonitorStore {
    pub fn new(state: AgentState) -> Self {
        Self {
            state,
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> RpcResult<MonitorTable> {
        Ok(self
            .state
            .get::<MonitorTable>(MONITORS_KEY)
            .await?
            .unwrap_or_default())
    }

    pub async fn get(&self, id: &str) -> RpcResult<Option<ResultMonitor>> {
        Ok(self.load().await?.remove(id))
    }

    pub async fn ids(&self) -> RpcResult<Vec<String>> {
        Ok(self.load().await?.into_keys().collect())
    }

    pub async fn put(&self, monitor: ResultMonitor) -> RpcResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut table = self.load().await?;
        table.insert(monitor.id.clone(), monitor);
        self.state.put(MONITORS_KEY, &table).await
    }

    /// Applies `change` to the stored record. Returns `false` when the
    /// monitor no longer exists.
    pub async fn update<F>(&self, id: &str, change: F) -> RpcResult<bool>
    where
        F: FnOnce(&mut ResultMonitor),
    {
        let _guard = self.write_lock.lock().await;
        let mut table = self.load().await?;
        let Some(monitor) = table.get_mut(id) else {
            return Ok(false);
        };
        change(monitor);
        self.state.put(MONITORS_KEY, &table).await?;
        Ok(true)
    }

    /// Stores a fresh value in the monitor's cache, if it has one. Returns
    /// whether the value was kept.
    pub async fn store_value(&self, id: &str, value: Value, at: DateTime<Utc>) -> RpcResult<bool> {
        let mut kept = false;
        self.update(id, |monitor| {
            if let Some(cache) = monitor.cache.as_mut() {
                kept = cache.store(value, at);
            }
        })
        .await?;
        Ok(kept)
    }

    pub async fn remove(&self, id: &str) -> RpcResult<Option<ResultMonitor>> {
        let _guard = self.write_lock.lock().await;
        let mut table = self.load().await?;
        let removed = table.remove(id);
        if removed.is_some() {
            self.state.put(MONITORS_KEY, &table).await?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStateStore;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::Arc;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn cache_with(max_age: Option<u64>, stored_at: i64) -> MonitorCache {
        let mut cache = MonitorCache::new(&CacheConfig {
            max_age: max_age.map(Duration::from_millis),
        });
        cache.store(json!(21.5), at(stored_at));
        cache
    }

    #[test]
    fn test_configured_max_age() {
        let cache = cache_with(Some(5000), 0);
        let filter = Params::new();
        assert_eq!(cache.fresh_value(&filter, at(4000)), Some(&json!(21.5)));
        assert_eq!(cache.fresh_value(&filter, at(5000)), Some(&json!(21.5)));
        assert_eq!(cache.fresh_value(&filter, at(6000)), None);
    }

    #[test]
    fn test_filter_overrides_max_age() {
        let cache = cache_with(Some(5000), 0);
        let strict = json!({"maxAge": 1000});
        assert_eq!(cache.fresh_value(strict.as_object().unwrap(), at(2000)), None);

        let lenient = json!({"maxAge": 60000});
        assert!(cache
            .fresh_value(lenient.as_object().unwrap(), at(30000))
            .is_some());
    }

    #[test]
    fn test_no_max_age_anywhere_means_always_fresh() {
        let cache = cache_with(None, 0);
        assert!(cache.fresh_value(&Params::new(), at(86_400_000)).is_some());
        assert!(MonitorCache::default()
            .fresh_value(&Params::new(), at(0))
            .is_none());
    }

    #[test]
    fn test_older_write_is_dropped() {
        let mut cache = cache_with(None, 1000);
        assert!(!cache.store(json!("stale"), at(500)));
        assert!(cache.store(json!("newer"), at(1500)));
        assert_eq!(cache.entry.as_ref().unwrap().value, json!("newer"));
    }

    #[tokio::test]
    async fn test_store_round_trip() {
        let store = MonitorStore::new(AgentState::new(
            "display",
            Arc::new(MemoryStateStore::new()),
        ));
        let mut monitor = ResultMonitor::new(
            "display",
            Address::local("sensor"),
            "getTemperature",
            Params::new(),
            Some("onTemperature".to_string()),
        );
        monitor.cache = Some(MonitorCache::new(&CacheConfig::max_age(Duration::from_secs(5))));
        let id = monitor.id.clone();
        store.put(monitor.clone()).await.unwrap();

        assert!(store.store_value(&id, json!(19.0), at(0)).await.unwrap());
        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.cache.unwrap().entry.unwrap().value, json!(19.0));
        assert_eq!(stored.callback_method.as_deref(), Some("onTemperature"));

        assert_eq!(store.remove(&id).await.unwrap().map(|m| m.id), Some(id.clone()));
        assert!(store.get(&id).await.unwrap().is_none());
        assert!(!store.update(&id, |_| {}).await.unwrap());
    }
}
