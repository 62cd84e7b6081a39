use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    bridge::{AsyncCallback, CallBridge},
    clock::Clock,
    config::PushDefaults,
    event::{EventLogger, EventTrigger, SubscriptionRegistry},
    message::{CorrelationId, MethodSchema, MethodTable, Params},
    monitor::{self, MonitorConfig, MonitorStore},
    scheduler::{Scheduler, TaskId},
    state::AgentState,
    transport::Address,
    RpcResult,
};

pub(crate) struct ContextParts {
    pub agent_id: String,
    pub methods: MethodTable,
    pub bridge: CallBridge,
    pub clock: Arc<dyn Clock>,
    pub state: AgentState,
    pub scheduler: Arc<dyn Scheduler>,
    pub logger: Arc<dyn EventLogger>,
    pub push_defaults: PushDefaults,
}

struct ContextInner {
    agent_id: String,
    address: Address,
    methods: MethodTable,
    bridge: CallBridge,
    clock: Arc<dyn Clock>,
    state: AgentState,
    scheduler: Arc<dyn Scheduler>,
    subscriptions: Arc<SubscriptionRegistry>,
    monitors: MonitorStore,
    events: EventTrigger,
    push_defaults: PushDefaults,
}

/// Everything an agent can do: call other agents, publish events, keep
/// result monitors and reach its own state and tasks. Cheap to clone.
#[derive(Clone)]
pub struct AgentContext {
    inner: Arc<ContextInner>,
}

impl AgentContext {
    pub(crate) fn new(parts: ContextParts) -> Self {
        let address = Address::local(&parts.agent_id);
        let subscriptions = Arc::new(SubscriptionRegistry::new(parts.state.clone()));
        let events = EventTrigger::new(
            parts.agent_id.clone(),
            subscriptions.clone(),
            parts.scheduler.clone(),
            parts.logger,
        );
        Self {
            inner: Arc::new(ContextInner {
                monitors: MonitorStore::new(parts.state.clone()),
                agent_id: parts.agent_id,
                address,
                methods: parts.methods,
                bridge: parts.bridge,
                clock: parts.clock,
                state: parts.state,
                scheduler: parts.scheduler,
                subscriptions,
                events,
                push_defaults: parts.push_defaults,
            }),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.inner.agent_id
    }

    /// `local://<agentId>`
    pub fn address(&self) -> &Address {
        &self.inner.address
    }

    /// Addresses under which this agent is reachable: one per transport that
    /// publishes a base address, then the local address.
    pub fn urls(&self) -> Vec<Address> {
        agent_urls(&self.inner.bridge, &self.inner.agent_id, &self.inner.address)
    }

    /// Reply address carried on outbound calls.
    pub fn first_url(&self) -> Address {
        self.urls()
            .into_iter()
            .next()
            .unwrap_or_else(|| self.inner.address.clone())
    }

    pub fn is_own_address(&self, address: &Address) -> bool {
        self.urls().contains(address)
    }

    pub async fn send(&self, url: &Address, method: &str, params: Params) -> RpcResult<Value> {
        self.inner
            .bridge
            .send(&self.first_url(), url, method, params)
            .await
    }

    pub async fn send_typed<T: DeserializeOwned>(
        &self,
        url: &Address,
        method: &str,
        params: Params,
    ) -> RpcResult<T> {
        self.inner
            .bridge
            .send_typed(&self.first_url(), url, method, params)
            .await
    }

    pub async fn send_void(&self, url: &Address, method: &str, params: Params) -> RpcResult<()> {
        self.inner
            .bridge
            .send_void(&self.first_url(), url, method, params)
            .await
    }

    /// Sends without expecting a reply.
    pub async fn notify(&self, url: &Address, method: &str, params: Params) -> RpcResult<()> {
        self.inner
            .bridge
            .notify(&self.first_url(), url, method, params)
            .await
    }

    pub fn send_async<T>(
        &self,
        url: &Address,
        method: &str,
        params: Params,
        callback: Box<dyn AsyncCallback<T>>,
    ) -> RpcResult<CorrelationId>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.inner
            .bridge
            .send_async(&self.first_url(), url, method, params, callback)
    }

    /// Publishes `event` to its subscribers under this agent's current first
    /// url; see [`EventTrigger::trigger`].
    pub async fn trigger(&self, event: &str, params: Params) -> RpcResult<Vec<TaskId>> {
        self.inner
            .events
            .trigger(&self.first_url(), event, params)
            .await
    }

    /// Subscribes this agent's `callback_method` to `event` on the agent at
    /// `url`. Returns the subscription id issued there.
    pub async fn subscribe(
        &self,
        url: &Address,
        event: &str,
        callback_method: &str,
        callback_params: Option<Params>,
    ) -> RpcResult<String> {
        let mut params = Params::new();
        params.insert("event".to_string(), Value::from(event));
        params.insert("callbackUrl".to_string(), Value::from(self.first_url().as_str()));
        params.insert("callbackMethod".to_string(), Value::from(callback_method));
        if let Some(callback_params) = callback_params {
            params.insert("callbackParams".to_string(), Value::Object(callback_params));
        }
        self.send_typed(url, "onSubscribe", params).await
    }

    pub async fn unsubscribe(&self, url: &Address, subscription_id: &str) -> RpcResult<()> {
        let mut params = Params::new();
        params.insert("subscriptionId".to_string(), Value::from(subscription_id));
        self.send_void(url, "onUnsubscribe", params).await
    }

    /// Removes this agent's subscriptions on `url` for `event` with
    /// `callback_method`.
    pub async fn unsubscribe_matching(
        &self,
        url: &Address,
        event: &str,
        callback_method: &str,
    ) -> RpcResult<()> {
        let mut params = Params::new();
        params.insert("event".to_string(), Value::from(event));
        params.insert("callbackUrl".to_string(), Value::from(self.first_url().as_str()));
        params.insert("callbackMethod".to_string(), Value::from(callback_method));
        self.send_void(url, "onUnsubscribe", params).await
    }

    /// Creates a monitor on `method` at `url` and returns its id.
    pub async fn init_result_monitor(
        &self,
        url: &Address,
        method: &str,
        params: Params,
        callback_method: Option<&str>,
        configs: Vec<MonitorConfig>,
    ) -> RpcResult<String> {
        monitor::client::init(self, url, method, params, callback_method, configs).await
    }

    /// The monitored value, served from the cache when it satisfies
    /// `filter`, else fetched with a direct call.
    pub async fn get_result(&self, monitor_id: &str, filter: &Params) -> RpcResult<Value> {
        monitor::client::get_result(self, monitor_id, filter).await
    }

    pub async fn get_result_typed<T: DeserializeOwned>(
        &self,
        monitor_id: &str,
        filter: &Params,
    ) -> RpcResult<T> {
        let value = self.get_result(monitor_id, filter).await?;
        serde_json::from_value(value).map_err(|e| {
            crate::RpcError::InternalError(format!(
                "unexpected result shape from monitor {}: {}",
                monitor_id, e
            ))
        })
    }

    /// Releases the monitor's tasks and push registrations, then deletes it.
    /// Unknown ids are ignored.
    pub async fn cancel_result_monitor(&self, monitor_id: &str) -> RpcResult<()> {
        monitor::client::cancel(self, monitor_id).await
    }

    /// Callable methods, sorted by name.
    pub fn methods(&self) -> Vec<MethodSchema> {
        self.inner.methods.list().into_iter().cloned().collect()
    }

    pub fn method_table(&self) -> &MethodTable {
        &self.inner.methods
    }

    pub fn tasks(&self) -> Vec<TaskId> {
        self.inner.scheduler.list_tasks()
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.inner.scheduler
    }

    pub fn state(&self) -> &AgentState {
        &self.inner.state
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.inner.subscriptions
    }

    pub fn monitors(&self) -> &MonitorStore {
        &self.inner.monitors
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub(crate) fn push_defaults(&self) -> &PushDefaults {
        &self.inner.push_defaults
    }

    /// Cancels every task and wipes the agent's state.
    pub(crate) async fn shutdown(&self) -> RpcResult<()> {
        self.inner.scheduler.cancel_all();
        self.inner.state.clear().await
    }
}

fn agent_urls(bridge: &CallBridge, agent_id: &str, local: &Address) -> Vec<Address> {
    let mut urls: Vec<Address> = bridge
        .router()
        .addresses()
        .iter()
        .filter_map(|base| {
            let base = base.as_str().trim_end_matches('/');
            Address::parse(format!("{}/{}", base, agent_id)).ok()
        })
        .collect();
    urls.push(local.clone());
    urls
}
