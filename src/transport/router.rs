//! Outbound transport selection by address scheme.

use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use super::{Address, Transport};
use crate::{RpcError, RpcResult};

/// Scheme → transport. Lookups run concurrently with registration.
#[derive(Clone, Default)]
pub struct Router {
    transports: Arc<DashMap<String, Arc<dyn Transport>>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `transport` for each scheme it declares. A scheme that is
    /// already known is taken over by the new transport.
    pub fn register(&self, transport: Arc<dyn Transport>) {
        for protocol in transport.protocols() {
            let scheme = protocol.to_lowercase();
            if self
                .transports
                .insert(scheme.clone(), transport.clone())
                .is_some()
            {
                debug!("Transport for scheme '{}' replaced", scheme);
            }
        }
    }

    fn transport_for(&self, address: &Address) -> RpcResult<Arc<dyn Transport>> {
        let scheme = address.scheme();
        self.transports
            .get(scheme)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RpcError::NoTransportForScheme(scheme.to_string()))
    }

    #[instrument(skip(self, payload), fields(len = payload.len()))]
    pub async fn send(&self, address: &Address, payload: &str, tag: &str) -> RpcResult<()> {
        // Clone the Arc out of the map so no shard lock is held across the await.
        let transport = self.transport_for(address)?;
        transport.send(address, payload, tag).await
    }

    /// Deduplicated reachable addresses of all registered transports.
    pub fn addresses(&self) -> Vec<Address> {
        self.transports
            .iter()
            .filter_map(|entry| entry.value().address())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn protocols(&self) -> Vec<String> {
        let mut protocols: Vec<String> =
            self.transports.iter().map(|entry| entry.key().clone()).collect();
        protocols.sort();
        protocols
    }

    pub fn describe(&self) -> Value {
        let transports: Vec<Value> = self
            .transports
            .iter()
            .map(|entry| {
                json!({
                    "scheme": entry.key(),
                    "transport": entry.value().describe(),
                })
            })
            .collect();
        json!({ "transports": transports })
    }

    fn distinct_transports(&self) -> Vec<Arc<dyn Transport>> {
        let mut seen: Vec<Arc<dyn Transport>> = Vec::new();
        for entry in self.transports.iter() {
            if !seen.iter().any(|t| Arc::ptr_eq(t, entry.value())) {
                seen.push(entry.value().clone());
            }
        }
        seen
    }

    pub async fn connect_all(&self) -> RpcResult<()> {
        for transport in self.distinct_transports() {
            transport.connect().await?;
        }
        Ok(())
    }

    /// Disconnects every transport concurrently, continuing past failures.
    pub async fn disconnect_all(&self) {
        let transports = self.distinct_transports();
        let results = join_all(transports.iter().map(|t| t.disconnect())).await;
        for (transport, result) in transports.iter().zip(results) {
            if let Err(e) = result {
                warn!("Failed to disconnect transport {:?}: {}", transport.protocols(), e);
            }
        }
    }
}

#[async_trait]
impl Transport for Router {
    async fn send(&self, address: &Address, payload: &str, tag: &str) -> RpcResult<()> {
        Router::send(self, address, payload, tag).await
    }

    fn protocols(&self) -> Vec<String> {
        Router::protocols(self)
    }

    fn address(&self) -> Option<Address> {
        None
    }

    async fn connect(&self) -> RpcResult<()> {
        self.connect_all().await
    }

    async fn disconnect(&self) -> RpcResult<()> {
        self.disconnect_all().await;
        Ok(())
    }

    fn describe(&self) -> Value {
        Router::describe(self)
    }
}
