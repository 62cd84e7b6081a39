use std::{sync::Arc, time::Duration};

use serde_json::Value;
use tracing::{debug, warn};

use super::{subscription::Callback, EventLogger, SubscriptionRegistry};
use crate::{
    message::{Params, Request},
    scheduler::{Scheduler, TaskId},
    transport::Address,
    RpcError, RpcResult,
};

/// Subscription pattern matching every event. It cannot be triggered itself.
pub const WILDCARD: &str = "*";

pub const ON_TRIGGER: &str = "onTrigger";

/// Stored subscription keys with this prefix belong to the runtime; event
/// parameters never overwrite them.
pub const RESERVED_PREFIX: char = '$';

pub struct EventTrigger {
    agent_id: String,
    registry: Arc<SubscriptionRegistry>,
    scheduler: Arc<dyn Scheduler>,
    logger: Arc<dyn EventLogger>,
}

impl EventTrigger {
    pub fn new(
        agent_id: impl Into<String>,
        registry: Arc<SubscriptionRegistry>,
        scheduler: Arc<dyn Scheduler>,
        logger: Arc<dyn EventLogger>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            registry,
            scheduler,
            logger,
        }
    }

    /// Schedules one `onTrigger` delivery per subscription on `event` or on
    /// the wildcard, and returns the ids of the scheduled tasks. `origin` is
    /// reported to subscribers as the publishing agent. A delivery that
    /// cannot be scheduled is logged and skipped.
    pub async fn trigger(
        &self,
        origin: &Address,
        event: &str,
        params: Params,
    ) -> RpcResult<Vec<TaskId>> {
        if event == WILDCARD {
            return Err(RpcError::InvalidEvent(format!(
                "'{}' is a subscription pattern, not an event",
                WILDCARD
            )));
        }
        self.logger.log(&self.agent_id, event, &params);

        let mut subscriptions = self.registry.subscriptions(event).await?;
        subscriptions.extend(self.registry.subscriptions(WILDCARD).await?);

        let mut tasks = Vec::with_capacity(subscriptions.len());
        for subscription in &subscriptions {
            let request = delivery_request(origin, event, &params, subscription)?;
            match self
                .scheduler
                .create_task(request, Duration::ZERO, false, false)
            {
                Ok(task_id) => tasks.push(task_id),
                Err(e) => warn!(
                    "{}: failed to schedule {} delivery to {}: {}",
                    self.agent_id, event, subscription.url, e
                ),
            }
        }
        debug!(
            "{}: {} scheduled for {} subscribers",
            self.agent_id,
            event,
            tasks.len()
        );
        Ok(tasks)
    }
}

/// Builds the parameters delivered to one subscriber: the subscription's
/// stored parameters (its nested `params` object when it has one) with the
/// event's parameters merged in. Event values replace stored ones, except
/// for stored keys starting with [`RESERVED_PREFIX`].
pub fn merge_params(subscription: &Callback, event_params: &Params) -> Params {
    let Some(stored) = &subscription.params else {
        warn!(
            "subscription {} carries no params, delivering event params only",
            subscription.id
        );
        return event_params.clone();
    };
    let mut merged = match stored.get("params") {
        Some(Value::Object(inner)) => inner.clone(),
        _ => stored.clone(),
    };
    for (key, value) in event_params {
        if key.starts_with(RESERVED_PREFIX) && merged.contains_key(key) {
            continue;
        }
        merged.insert(key.clone(), value.clone());
    }
    merged
}

fn delivery_request(
    origin: &Address,
    event: &str,
    event_params: &Params,
    subscription: &Callback,
) -> RpcResult<Request> {
    let mut callback_params = Params::new();
    callback_params.insert("agent".to_string(), Value::from(origin.as_str()));
    callback_params.insert("event".to_string(), Value::from(event));
    callback_params.insert(
        "subscriptionId".to_string(),
        Value::from(subscription.id.as_str()),
    );
    callback_params.insert(
        "params".to_string(),
        Value::Object(merge_params(subscription, event_params)),
    );

    let mut task_params = Params::new();
    task_params.insert("url".to_string(), Value::from(subscription.url.as_str()));
    task_params.insert("method".to_string(), Value::from(subscription.method.as_str()));
    task_params.insert("params".to_string(), Value::Object(callback_params));
    Request::call(ON_TRIGGER, task_params)
}
