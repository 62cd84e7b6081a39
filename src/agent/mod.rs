//! # Agents
//!
//! An agent declares its callable methods as [`MethodSchema`]s and answers
//! invocations of them. Everything else (subscriptions, triggers, result
//! monitors, scheduled tasks) comes from the [`AgentContext`] the host hands
//! it, together with the built-in RPC methods of [`builtin`].
//!
//! ```text
//! inbound Request ─▶ dispatcher ─▶ method table ─▶ validate ─▶ access check
//!                                                                   │
//!                                         ┌─────────────────────────┤
//!                                         ▼                         ▼
//!                                  builtin::handle           Agent::invoke
//! ```

pub mod builtin;
mod context;
pub mod dispatcher;

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    message::{MethodSchema, Params},
    transport::Address,
    RpcResult,
};

pub use context::AgentContext;
pub(crate) use context::ContextParts;

#[async_trait]
pub trait Agent: Send + Sync + 'static {
    /// Methods this agent serves besides the built-ins. Built-in names
    /// cannot be overridden.
    fn methods(&self) -> Vec<MethodSchema>;

    /// Runs one of the declared methods. `params` passed schema validation;
    /// `sender` is the caller's reply address when known.
    async fn invoke(
        &self,
        ctx: &AgentContext,
        method: &str,
        params: Params,
        sender: Option<&Address>,
    ) -> RpcResult<Value>;

    /// Decides on calls to [`Private`](crate::message::AccessLevel::Private)
    /// methods.
    fn on_access(&self, _sender: Option<&Address>, _method: &str) -> bool {
        true
    }

    async fn on_init(&self, _ctx: &AgentContext) -> RpcResult<()> {
        Ok(())
    }

    async fn on_destroy(&self, _ctx: &AgentContext) {}
}
