//! Per-agent key/value persistence.
//!
//! Values are replaced wholesale; the store offers no multi-key atomicity.
//! Callers needing read-modify-write consistency serialize on their own
//! lock (see the subscription registry).

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::{RpcError, RpcResult};

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, agent_id: &str, key: &str) -> RpcResult<Option<Value>>;
    async fn put(&self, agent_id: &str, key: &str, value: Value) -> RpcResult<()>;
    async fn remove(&self, agent_id: &str, key: &str) -> RpcResult<()>;
    /// Drops every key of `agent_id`.
    async fn clear(&self, agent_id: &str) -> RpcResult<()>;
}

#[derive(Default)]
pub struct MemoryStateStore {
    data: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, agent_id: &str, key: &str) -> RpcResult<Option<Value>> {
        let data = self.data.read().await;
        Ok(data.get(agent_id).and_then(|state| state.get(key)).cloned())
    }

    async fn put(&self, agent_id: &str, key: &str, value: Value) -> RpcResult<()> {
        let mut data = self.data.write().await;
        data.entry(agent_id.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, agent_id: &str, key: &str) -> RpcResult<()> {
        let mut data = self.data.write().await;
        if let Some(state) = data.get_mut(agent_id) {
            state.remove(key);
        }
        Ok(())
    }

    async fn clear(&self, agent_id: &str) -> RpcResult<()> {
        self.data.write().await.remove(agent_id);
        Ok(())
    }
}

/// One agent's view of the store, with typed access.
#[derive(Clone)]
pub struct AgentState {
    agent_id: String,
    store: Arc<dyn StateStore>,
}

impl AgentState {
    pub fn new(agent_id: impl Into<String>, store: Arc<dyn StateStore>) -> Self {
        Self {
            agent_id: agent_id.into(),
            store,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> RpcResult<Option<T>> {
        match self.store.get(&self.agent_id, key).await? {
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                RpcError::Storage(format!("Failed to decode state '{}': {}", key, e))
            }),
            None => Ok(None),
        }
    }

    pub async fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> RpcResult<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| RpcError::Storage(format!("Failed to encode state '{}': {}", key, e)))?;
        self.store.put(&self.agent_id, key, value).await
    }

    pub async fn remove(&self, key: &str) -> RpcResult<()> {
        self.store.remove(&self.agent_id, key).await
    }

    pub async fn clear(&self) -> RpcResult<()> {
        self.store.clear(&self.agent_id).await
    }
}
