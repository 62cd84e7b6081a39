//! # Events
//!
//! Agents publish named events to whoever subscribed to them. A
//! subscription is a [`Callback`](subscription::Callback): where to send the
//! notification, which method to call there and optional parameters echoed
//! back with every delivery.
//!
//! ```text
//!  subscriber ──onSubscribe──▶ ┌──────────────────────┐
//!                              │ SubscriptionRegistry │  (agent state, "subscriptions")
//!  subscriber ◀─┐              └──────────┬───────────┘
//!               │                         │ event ∪ "*"
//!               │   ┌─────────┐    ┌──────▼──────┐
//!               └───│onTrigger│◀───│  Scheduler  │◀── trigger(event, params)
//!                   └─────────┘    └─────────────┘
//! ```
//!
//! Triggering never delivers inline: every matching subscription becomes a
//! one-shot `onTrigger` task, so a slow or unreachable subscriber cannot
//! stall or fail the trigger call, and cannot affect its siblings.

pub mod subscription;
pub mod trigger;

use tracing::info;

use crate::message::Params;

pub use subscription::{Callback, SubscriptionRegistry, UnsubscribeFilter};
pub use trigger::{EventTrigger, RESERVED_PREFIX, WILDCARD};

/// Records every triggered event.
pub trait EventLogger: Send + Sync {
    fn log(&self, agent_id: &str, event: &str, params: &Params);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventLogger;

impl EventLogger for TracingEventLogger {
    fn log(&self, agent_id: &str, event: &str, params: &Params) {
        let params = serde_json::Value::Object(params.clone());
        info!(agent = agent_id, event, %params, "event triggered");
    }
}
