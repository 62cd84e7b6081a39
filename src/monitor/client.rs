//! Monitor operations on the owning side.

use serde_json::Value;
use tracing::{debug, warn};

use super::{MonitorCache, MonitorConfig, PollConfig, PushConfig, ResultMonitor};
use crate::{
    agent::AgentContext,
    message::{Params, Request},
    transport::Address,
    RpcError, RpcResult,
};

pub(crate) async fn init(
    ctx: &AgentContext,
    url: &Address,
    method: &str,
    params: Params,
    callback_method: Option<&str>,
    configs: Vec<MonitorConfig>,
) -> RpcResult<String> {
    let mut monitor = ResultMonitor::new(
        ctx.agent_id(),
        url.clone(),
        method,
        params.clone(),
        callback_method.map(str::to_string),
    );
    for config in &configs {
        if let MonitorConfig::Cache(cache) = config {
            monitor.cache = Some(MonitorCache::new(cache));
        }
    }
    let id = monitor.id.clone();
    ctx.monitors().put(monitor).await?;

    // The record exists before anything refers to it, so a poll tick or a
    // push arriving early finds it. On failure, undo what was created.
    if let Err(e) = attach(ctx, &id, url, method, &params, &configs).await {
        warn!("monitor {} setup failed, rolling back: {}", id, e);
        if let Err(rollback) = cancel(ctx, &id).await {
            warn!("monitor {} rollback incomplete: {}", id, rollback);
        }
        return Err(e);
    }
    debug!("monitor {} on {} {}", id, url, method);
    Ok(id)
}

async fn attach(
    ctx: &AgentContext,
    id: &str,
    url: &Address,
    method: &str,
    params: &Params,
    configs: &[MonitorConfig],
) -> RpcResult<()> {
    for config in configs {
        match config {
            MonitorConfig::Cache(_) => {}
            MonitorConfig::Poll(poll) => {
                let task_id = schedule_poll(ctx, id, poll)?;
                ctx.monitors()
                    .update(id, |m| m.scheduler_ids.push(task_id))
                    .await?;
            }
            MonitorConfig::Push(push) => {
                let remote_ids: Vec<String> = ctx
                    .send_typed(url, "registerPush", push_request(id, method, params, push))
                    .await?;
                ctx.monitors()
                    .update(id, |m| m.remote_ids.extend(remote_ids))
                    .await?;
            }
        }
    }
    Ok(())
}

fn schedule_poll(ctx: &AgentContext, id: &str, poll: &PollConfig) -> RpcResult<String> {
    let mut params = Params::new();
    params.insert("monitorId".to_string(), Value::from(id));
    let request = Request::call("doPoll", params)?;
    ctx.scheduler()
        .create_task(request, poll.interval, true, poll.first_immediate)
}

fn push_request(id: &str, method: &str, params: &Params, push: &PushConfig) -> Params {
    let mut push_params = Params::new();
    push_params.insert("method".to_string(), Value::from(method));
    push_params.insert("params".to_string(), Value::Object(params.clone()));
    push_params.insert("monitorId".to_string(), Value::from(id));
    push_params.insert("onEvent".to_string(), Value::from(push.on_event));
    if let Some(event) = &push.event {
        push_params.insert("event".to_string(), Value::from(event.as_str()));
    }
    if let Some(interval) = push.interval {
        push_params.insert(
            "interval".to_string(),
            Value::from(interval.as_millis() as u64),
        );
    }
    let mut params = Params::new();
    params.insert("params".to_string(), Value::Object(push_params));
    params
}

pub(crate) async fn get_result(
    ctx: &AgentContext,
    monitor_id: &str,
    filter: &Params,
) -> RpcResult<Value> {
    let monitor = ctx
        .monitors()
        .get(monitor_id)
        .await?
        .ok_or_else(|| RpcError::MonitorNotFound(monitor_id.to_string()))?;

    if let Some(value) = monitor
        .cache
        .as_ref()
        .and_then(|cache| cache.fresh_value(filter, ctx.clock().now()))
    {
        debug!("monitor {} served from cache", monitor_id);
        return Ok(value.clone());
    }

    let value = ctx
        .send(&monitor.url, &monitor.method, monitor.params.clone())
        .await?;
    if monitor.has_cache() {
        ctx.monitors()
            .store_value(monitor_id, value.clone(), ctx.clock().now())
            .await?;
    }
    Ok(value)
}

/// Best effort: one unreachable push source does not keep the others
/// registered or the record alive.
pub(crate) async fn cancel(ctx: &AgentContext, monitor_id: &str) -> RpcResult<()> {
    let Some(monitor) = ctx.monitors().get(monitor_id).await? else {
        debug!("monitor {} already gone", monitor_id);
        return Ok(());
    };

    for task_id in &monitor.scheduler_ids {
        ctx.scheduler().cancel_task(task_id);
    }
    for push_id in &monitor.remote_ids {
        let mut params = Params::new();
        params.insert("pushId".to_string(), Value::from(push_id.as_str()));
        if let Err(e) = ctx.send_void(&monitor.url, "unregisterPush", params).await {
            warn!(
                "failed to unregister push {} of monitor {} at {}: {}",
                push_id, monitor_id, monitor.url, e
            );
        }
    }
    ctx.monitors().remove(monitor_id).await?;
    Ok(())
}

/// Body of a poll tick.
pub(crate) async fn do_poll(ctx: &AgentContext, monitor_id: &str) -> RpcResult<()> {
    let monitor = ctx
        .monitors()
        .get(monitor_id)
        .await?
        .ok_or_else(|| RpcError::MonitorNotFound(monitor_id.to_string()))?;
    let value = ctx
        .send(&monitor.url, &monitor.method, monitor.params.clone())
        .await?;
    deliver(ctx, &monitor, value).await
}

/// A value pushed by the remote side. Pushes for monitors cancelled in the
/// meantime are dropped.
pub(crate) async fn callback_push(
    ctx: &AgentContext,
    monitor_id: &str,
    result: Value,
) -> RpcResult<()> {
    match ctx.monitors().get(monitor_id).await? {
        Some(monitor) => deliver(ctx, &monitor, result).await,
        None => {
            debug!("dropping push for unknown monitor {}", monitor_id);
            Ok(())
        }
    }
}

async fn deliver(ctx: &AgentContext, monitor: &ResultMonitor, value: Value) -> RpcResult<()> {
    if monitor.has_cache() {
        ctx.monitors()
            .store_value(&monitor.id, value.clone(), ctx.clock().now())
            .await?;
    }
    if let Some(callback) = &monitor.callback_method {
        let mut params = Params::new();
        params.insert("result".to_string(), value);
        ctx.send_void(ctx.address(), callback, params).await?;
    }
    Ok(())
}
