//! # courier: messaging core for addressable agents
//!
//! Agents talk to each other only through asynchronous RPC carried by
//! pluggable transports. This crate is the transport-agnostic core.
//!
//! ## Building blocks
//!
//! - Wire values: requests, responses and errors ([`message`], [`error`])
//! - Transport selection by address scheme ([`transport`])
//! - Correlated calls with timeouts on top of fire-and-forget sends ([`bridge`])
//! - Subscriptions and event fan-out ([`event`])
//! - Result monitors combining cache, poll and push ([`monitor`])
//! - Agents, their context and the built-in RPC methods ([`agent`])
//! - The runtime context tying it together ([`host`])
//!
//! ## Call path
//!
//! ```text
//! AgentContext::send ─▶ CallBridge ─▶ Router ─▶ Transport ─▶ AgentHost (receiver)
//!        ▲                  ▲                                      │
//!        │                  └──── Response (by correlation id) ◀──┤ dispatch
//!        └──────────────────────────────────────────────────────── Agent::invoke
//! ```
//!
//! Collaborators with their own lifetimes (scheduler, state store, clock,
//! event log) sit behind traits and are injected through the host builder.

pub mod agent;
pub mod bridge;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod host;
pub mod logging;
pub mod message;
pub mod monitor;
pub mod scheduler;
pub mod state;
pub mod transport;

// Re-exports
pub use agent::{Agent, AgentContext};
pub use error::{RpcError, RpcResult};
pub use host::AgentHost;
pub use message::{Params, Request, Response};
pub use transport::Address;

#[cfg(test)]
#[ctor::ctor]
fn init_test_logging() {
    let _ = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
