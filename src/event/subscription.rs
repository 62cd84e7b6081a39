//! Subscriptions held by one agent, keyed by event name.
//!
//! The whole table lives in the agent's state under
//! [`SUBSCRIPTIONS_KEY`] and is replaced wholesale on every change. All
//! mutations of one agent go through a single async lock, so concurrent
//! subscribe and unsubscribe calls cannot lose each other's updates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::{message::Params, state::AgentState, transport::Address, RpcResult};

pub const SUBSCRIPTIONS_KEY: &str = "subscriptions";

/// Event name → subscriptions, in registration order.
pub type SubscriptionTable = BTreeMap<String, Vec<Callback>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Callback {
    pub id: String,
    pub url: Address,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Params>,
}

impl Callback {
    /// Same target and same echoed parameters. Two absent parameter sets
    /// are equal; an absent set never equals a present one.
    pub fn same_target(&self, url: &Address, method: &str, params: Option<&Params>) -> bool {
        self.url == *url && self.method == method && self.params.as_ref() == params
    }
}

/// Selects subscriptions to remove. A subscription matches when its id
/// equals `subscription_id`, or when `url` equals its url and the optional
/// `method` and `event` agree. With every field absent nothing matches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnsubscribeFilter {
    pub subscription_id: Option<String>,
    pub event: Option<String>,
    pub url: Option<Address>,
    pub method: Option<String>,
}

impl UnsubscribeFilter {
    pub fn by_id(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: Some(subscription_id.into()),
            ..Default::default()
        }
    }

    pub fn by_url(url: Address) -> Self {
        Self {
            url: Some(url),
            ..Default::default()
        }
    }

    pub fn event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.subscription_id.is_none()
            && self.event.is_none()
            && self.url.is_none()
            && self.method.is_none()
    }

    fn matches(&self, event: &str, callback: &Callback) -> bool {
        if self.subscription_id.as_deref() == Some(callback.id.as_str()) {
            return true;
        }
        match &self.url {
            Some(url) if *url == callback.url => {
                self.method.as_deref().map_or(true, |m| m == callback.method)
                    && self.event.as_deref().map_or(true, |e| e == event)
            }
            _ => false,
        }
    }
}

pub struct SubscriptionRegistry {
    state: AgentState,
    write_lock: Mutex<()>,
}

impl SubscriptionRegistry {
    pub fn new(state: AgentState) -> Self {
        Self {
            state,
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> RpcResult<SubscriptionTable> {
        Ok(self
            .state
            .get::<SubscriptionTable>(SUBSCRIPTIONS_KEY)
            .await?
            .unwrap_or_default())
    }

    /// Registers a callback for `event` and returns its id. Registering the
    /// same (url, method, params) again returns the existing id.
    pub async fn subscribe(
        &self,
        event: &str,
        url: Address,
        method: &str,
        params: Option<Params>,
    ) -> RpcResult<String> {
        let _guard = self.write_lock.lock().await;
        let mut table = self.load().await?;
        let callbacks = table.entry(event.to_string()).or_default();

        if let Some(existing) = callbacks
            .iter()
            .find(|cb| cb.same_target(&url, method, params.as_ref()))
        {
            debug!("{} already subscribed to {} as {}", url, event, existing.id);
            return Ok(existing.id.clone());
        }

        let id = Uuid::new_v4().to_string();
        debug!("{} subscribed to {} as {}", url, event, id);
        callbacks.push(Callback {
            id: id.clone(),
            url,
            method: method.to_string(),
            params,
        });
        self.state.put(SUBSCRIPTIONS_KEY, &table).await?;
        Ok(id)
    }

    /// Removes every subscription matching `filter`, across all events, and
    /// returns the removed ones. Unknown ids simply remove nothing.
    pub async fn unsubscribe(&self, filter: &UnsubscribeFilter) -> RpcResult<Vec<Callback>> {
        if filter.is_empty() {
            return Ok(Vec::new());
        }
        let _guard = self.write_lock.lock().await;
        let mut table = self.load().await?;

        let mut removed = Vec::new();
        for (event, callbacks) in table.iter_mut() {
            let (gone, kept): (Vec<_>, Vec<_>) = callbacks
                .drain(..)
                .partition(|cb| filter.matches(event, cb));
            *callbacks = kept;
            removed.extend(gone);
        }
        if removed.is_empty() {
            return Ok(removed);
        }
        table.retain(|_, callbacks| !callbacks.is_empty());
        self.state.put(SUBSCRIPTIONS_KEY, &table).await?;
        debug!("removed {} subscriptions", removed.len());
        Ok(removed)
    }

    pub async fn subscriptions(&self, event: &str) -> RpcResult<Vec<Callback>> {
        Ok(self.load().await?.remove(event).unwrap_or_default())
    }

    pub async fn all(&self) -> RpcResult<SubscriptionTable> {
        self.load().await
    }

    pub async fn clear(&self) -> RpcResult<()> {
        let _guard = self.write_lock.lock().await;
        self.state.remove(SUBSCRIPTIONS_KEY).await
    }
}
