//! Push registrations on the serving side.
//!
//! A registration carries the subscriber's monitor id, the method whose
//! result is pushed and its parameters. It becomes a recurring `doPush`
//! task, an event subscription routed to `doPush`, or both.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    agent::AgentContext,
    event::UnsubscribeFilter,
    message::{Params, ParamsExt, Request},
    transport::Address,
    RpcError, RpcResult,
};

pub(crate) const DO_PUSH: &str = "doPush";

/// Where a `doPush` call finds its registration, inside its `params`. The
/// key is runtime-reserved, so event parameters cannot replace it.
const PUSH_DESCRIPTOR: &str = "$push";

/// Registers a push for `sender` and returns the ids of everything created,
/// which the subscriber later hands back to [`unregister_push`].
pub(crate) async fn register_push(
    ctx: &AgentContext,
    mut push_params: Params,
    sender: Option<&Address>,
) -> RpcResult<Vec<String>> {
    let sender = sender.ok_or_else(|| {
        RpcError::InvalidParams("registerPush needs the caller's reply address".to_string())
    })?;
    let method = push_params.required_str("method")?.to_string();
    if !ctx.method_table().contains(&method) {
        return Err(RpcError::MethodNotFound(method));
    }
    push_params.insert("url".to_string(), Value::from(sender.as_str()));

    let interval = push_params
        .get("interval")
        .and_then(Value::as_u64)
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis);
    let on_event = push_params
        .get("onEvent")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let event = match push_params.optional_str("event")? {
        Some(event) => event.to_string(),
        None => ctx
            .method_table()
            .triggering_event(&method)
            .unwrap_or(ctx.push_defaults().default_event.as_str())
            .to_string(),
    };

    let mut descriptor = Params::new();
    descriptor.insert(PUSH_DESCRIPTOR.to_string(), Value::Object(push_params));

    let mut ids = Vec::new();
    if let Some(interval) = interval {
        let mut task_params = Params::new();
        task_params.insert("params".to_string(), Value::Object(descriptor.clone()));
        let request = Request::call(DO_PUSH, task_params)?;
        ids.push(ctx.scheduler().create_task(request, interval, true, false)?);
    }
    if on_event {
        match ctx
            .subscriptions()
            .subscribe(&event, ctx.address().clone(), DO_PUSH, Some(descriptor))
            .await
        {
            Ok(id) => ids.push(id),
            Err(e) => warn!("failed to register push on {} for {}: {}", event, sender, e),
        }
    }
    debug!("{} registered push of {} for {}: {:?}", ctx.agent_id(), method, sender, ids);
    Ok(ids)
}

/// `push_id` is either a task id or a subscription id; unknown ids are fine.
pub(crate) async fn unregister_push(ctx: &AgentContext, push_id: &str) -> RpcResult<()> {
    if ctx.scheduler().cancel_task(push_id) {
        debug!("{} cancelled push task {}", ctx.agent_id(), push_id);
    }
    if let Err(e) = ctx
        .subscriptions()
        .unsubscribe(&UnsubscribeFilter::by_id(push_id))
        .await
    {
        warn!("failed to remove push subscription {}: {}", push_id, e);
    }
    Ok(())
}

/// Runs the pushed method locally and sends its result to the subscriber's
/// `callbackPush`.
pub(crate) async fn do_push(ctx: &AgentContext, params: &Params) -> RpcResult<()> {
    let push = params
        .optional_object("params")?
        .map(|delivered| delivered.optional_object(PUSH_DESCRIPTOR))
        .transpose()?
        .flatten()
        .ok_or_else(|| RpcError::InvalidParams("doPush without push params".to_string()))?;
    let method = push.required_str("method")?;
    let url = Address::parse(push.required_str("url")?)?;
    let monitor_id = push.required_str("monitorId")?;
    let call_params = push.optional_object("params")?.cloned().unwrap_or_default();

    let result = ctx.send(ctx.address(), method, call_params).await?;

    let mut callback = Params::new();
    callback.insert("result".to_string(), result);
    callback.insert("monitorId".to_string(), Value::from(monitor_id));
    ctx.send_void(&url, "callbackPush", callback).await
}
