//! # Agent host
//!
//! The runtime context. One host owns the router, the call bridge, the
//! state store, the clock and the table of registered agents; nothing in
//! the crate lives in process-wide statics.
//!
//! The host sits on both ends of every transport:
//!
//! - as the [`Receiver`] it decodes inbound payloads, hands responses to the
//!   call bridge and dispatches requests to the addressed agent, routing the
//!   reply back to the address carried in the transport tag;
//! - as the [`TaskRunner`] of every agent scheduler it dispatches due tasks
//!   to their agent, with the agent itself as sender.
//!
//! ```rust,no_run
//! # use courier::host::AgentHost;
//! # use courier::config::RuntimeConfig;
//! # async fn example() -> courier::RpcResult<()> {
//! let host = AgentHost::builder()
//!     .config(RuntimeConfig::default())
//!     .build();
//! assert!(host.agent_ids().is_empty());
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use tracing::{debug, info, warn};

use crate::{
    agent::{builtin, dispatcher::dispatch, Agent, AgentContext, ContextParts},
    bridge::CallBridge,
    clock::{Clock, SystemClock},
    config::RuntimeConfig,
    event::{EventLogger, TracingEventLogger},
    message::{Message, MethodTable, Request, Response},
    scheduler::{TaskRunner, TokioScheduler},
    state::{AgentState, MemoryStateStore, StateStore},
    transport::{Address, LocalTransport, Receiver, Router, Transport},
    RpcError, RpcResult,
};

struct AgentEntry {
    agent: Arc<dyn Agent>,
    ctx: AgentContext,
}

struct HostInner {
    weak: Weak<HostInner>,
    config: RuntimeConfig,
    router: Router,
    bridge: CallBridge,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    logger: Arc<dyn EventLogger>,
    agents: DashMap<String, Arc<AgentEntry>>,
}

#[derive(Clone)]
pub struct AgentHost {
    inner: Arc<HostInner>,
}

#[derive(Default)]
pub struct AgentHostBuilder {
    config: RuntimeConfig,
    store: Option<Arc<dyn StateStore>>,
    clock: Option<Arc<dyn Clock>>,
    logger: Option<Arc<dyn EventLogger>>,
    transports: Vec<Arc<dyn Transport>>,
}

impl AgentHostBuilder {
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn event_logger(mut self, logger: Arc<dyn EventLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Adds an outbound transport. The in-process `local` transport is
    /// always present.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.push(transport);
        self
    }

    pub fn build(self) -> AgentHost {
        let inner = Arc::new_cyclic(|weak: &Weak<HostInner>| {
            let router = Router::new();
            let receiver: Weak<dyn Receiver> = weak.clone();
            router.register(Arc::new(LocalTransport::new(receiver)));
            for transport in self.transports {
                router.register(transport);
            }
            let bridge = CallBridge::new(router.clone(), self.config.request_timeout);
            HostInner {
                weak: weak.clone(),
                router,
                bridge,
                store: self
                    .store
                    .unwrap_or_else(|| Arc::new(MemoryStateStore::new())),
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                logger: self.logger.unwrap_or_else(|| Arc::new(TracingEventLogger)),
                config: self.config,
                agents: DashMap::new(),
            }
        });
        AgentHost { inner }
    }
}

impl Default for AgentHost {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl AgentHost {
    pub fn builder() -> AgentHostBuilder {
        AgentHostBuilder::default()
    }

    pub fn new(config: RuntimeConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn router(&self) -> &Router {
        &self.inner.router
    }

    pub fn bridge(&self) -> &CallBridge {
        &self.inner.bridge
    }

    /// Inbound side for transports created after the host.
    pub fn receiver(&self) -> Weak<dyn Receiver> {
        let receiver: Weak<dyn Receiver> = self.inner.weak.clone();
        receiver
    }

    pub fn register_transport(&self, transport: Arc<dyn Transport>) {
        self.inner.router.register(transport);
    }

    /// Registers `agent` under `id` and runs its init hook. The agent's
    /// method table is its own schemas plus the built-ins.
    pub async fn register_agent(&self, id: &str, agent: Arc<dyn Agent>) -> RpcResult<AgentContext> {
        if id.is_empty() || id.contains('/') {
            return Err(RpcError::InvalidParams(format!("invalid agent id '{}'", id)));
        }
        let inner = &self.inner;

        let mut methods: MethodTable = agent.methods().into_iter().collect();
        for schema in builtin::schemas() {
            methods.register(schema);
        }
        let runner: Weak<dyn TaskRunner> = inner.weak.clone();
        let ctx = AgentContext::new(ContextParts {
            agent_id: id.to_string(),
            methods,
            bridge: inner.bridge.clone(),
            clock: inner.clock.clone(),
            state: AgentState::new(id, inner.store.clone()),
            scheduler: Arc::new(TokioScheduler::new(id, runner)),
            logger: inner.logger.clone(),
            push_defaults: inner.config.push.clone(),
        });

        match inner.agents.entry(id.to_string()) {
            Entry::Occupied(_) => return Err(RpcError::AgentAlreadyExists(id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(AgentEntry {
                    agent: agent.clone(),
                    ctx: ctx.clone(),
                }));
            }
        }

        if let Err(e) = agent.on_init(&ctx).await {
            warn!("agent {} failed to initialise: {}", id, e);
            inner.agents.remove(id);
            ctx.scheduler().cancel_all();
            return Err(e);
        }
        info!("agent {} registered", id);
        Ok(ctx)
    }

    /// Deletes the agent: runs its destroy hook, cancels its tasks and clears
    /// its state.
    pub async fn unregister_agent(&self, id: &str) -> RpcResult<()> {
        let (_, entry) = self
            .inner
            .agents
            .remove(id)
            .ok_or_else(|| RpcError::AgentNotFound(id.to_string()))?;
        entry.agent.on_destroy(&entry.ctx).await;
        entry.ctx.shutdown().await?;
        info!("agent {} unregistered", id);
        Ok(())
    }

    pub fn context(&self, id: &str) -> Option<AgentContext> {
        self.inner.agents.get(id).map(|entry| entry.ctx.clone())
    }

    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .agents
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Stops every agent's tasks, fails waiting calls and disconnects the
    /// transports. Agent state is kept.
    pub async fn shutdown(&self) {
        for entry in self.inner.agents.iter() {
            entry.ctx.scheduler().cancel_all();
        }
        let cancelled = self.inner.bridge.cancel_pending("host shutting down");
        if cancelled > 0 {
            debug!("cancelled {} pending calls", cancelled);
        }
        self.inner.router.disconnect_all().await;
    }
}

impl HostInner {
    /// Agent addressed by `recipient`: the last path segment, so both
    /// `local://sensor` and `http://host/agents/sensor` reach `sensor`.
    fn entry_for(&self, recipient: &Address) -> RpcResult<Arc<AgentEntry>> {
        let id = recipient.path().rsplit('/').next().unwrap_or_default();
        self.agents
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RpcError::AgentNotFound(id.to_string()))
    }

    async fn handle_request(&self, recipient: &Address, request: Request, tag: &str) {
        let sender = Address::parse(tag).ok();
        let id = request.id().map(str::to_string);
        let method = request.method().to_string();

        let result = match self.entry_for(recipient) {
            Ok(entry) => {
                dispatch(
                    entry.agent.as_ref(),
                    &entry.ctx,
                    &method,
                    request.into_params(),
                    sender.as_ref(),
                )
                .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            debug!("{} {} failed: {}", recipient, method, e);
        }
        if id.is_some() {
            self.reply(tag, recipient, Response::from_result(id, result))
                .await;
        }
    }

    async fn reply(&self, tag: &str, from: &Address, response: Response) {
        let Ok(to) = Address::parse(tag) else {
            warn!("no reply address for response from {}", from);
            return;
        };
        let payload = match response.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("failed to encode response for {}: {}", to, e);
                return;
            }
        };
        if let Err(e) = self.router.send(&to, &payload, from.as_str()).await {
            warn!("failed to deliver response to {}: {}", to, e);
        }
    }
}

#[async_trait]
impl Receiver for HostInner {
    async fn receive(&self, recipient: Address, payload: String, tag: String) {
        match Message::decode(&payload) {
            Ok(Message::Request(request)) => self.handle_request(&recipient, request, &tag).await,
            Ok(Message::Response(response)) => {
                self.bridge.handle_response(response);
            }
            Err(e) => {
                warn!("undecodable message for {}: {}", recipient, e);
                self.reply(&tag, &recipient, Response::from_result(None, Err(e)))
                    .await;
            }
        }
    }
}

#[async_trait]
impl TaskRunner for HostInner {
    async fn run_task(&self, agent_id: &str, request: Request) {
        let Some(entry) = self.agents.get(agent_id).map(|e| e.value().clone()) else {
            debug!("dropping task {} for unknown agent {}", request.method(), agent_id);
            return;
        };
        let method = request.method().to_string();
        let own = entry.ctx.address().clone();
        if let Err(e) = dispatch(
            entry.agent.as_ref(),
            &entry.ctx,
            &method,
            request.into_params(),
            Some(&own),
        )
        .await
        {
            warn!("task {} of agent {} failed: {}", method, agent_id, e);
        }
    }
}
