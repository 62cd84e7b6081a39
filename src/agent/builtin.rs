//! RPC methods every agent answers, on top of its own.

use serde_json::Value;

use super::AgentContext;
use crate::{
    event::{trigger, UnsubscribeFilter},
    message::{AccessLevel, MethodSchema, ParamKind, Params, ParamsExt},
    monitor::{client, push},
    transport::Address,
    RpcError, RpcResult,
};

pub const ON_SUBSCRIBE: &str = "onSubscribe";
pub const ON_UNSUBSCRIBE: &str = "onUnsubscribe";
pub const ON_TRIGGER: &str = trigger::ON_TRIGGER;
pub const REGISTER_PUSH: &str = "registerPush";
pub const UNREGISTER_PUSH: &str = "unregisterPush";
pub const DO_PUSH: &str = push::DO_PUSH;
pub const CALLBACK_PUSH: &str = "callbackPush";
pub const DO_POLL: &str = "doPoll";
pub const GET_METHODS: &str = "getMethods";

const BUILTINS: [&str; 9] = [
    ON_SUBSCRIBE,
    ON_UNSUBSCRIBE,
    ON_TRIGGER,
    REGISTER_PUSH,
    UNREGISTER_PUSH,
    DO_PUSH,
    CALLBACK_PUSH,
    DO_POLL,
    GET_METHODS,
];

pub fn is_builtin(method: &str) -> bool {
    BUILTINS.contains(&method)
}

pub fn schemas() -> Vec<MethodSchema> {
    vec![
        MethodSchema::new(ON_SUBSCRIBE)
            .param("event", ParamKind::String)
            .param("callbackUrl", ParamKind::String)
            .param("callbackMethod", ParamKind::String)
            .optional("callbackParams", ParamKind::Object),
        MethodSchema::new(ON_UNSUBSCRIBE)
            .optional("subscriptionId", ParamKind::String)
            .optional("event", ParamKind::String)
            .optional("callbackUrl", ParamKind::String)
            .optional("callbackMethod", ParamKind::String),
        MethodSchema::new(ON_TRIGGER)
            .param("url", ParamKind::String)
            .param("method", ParamKind::String)
            .param("params", ParamKind::Object)
            .access(AccessLevel::SelfOnly),
        MethodSchema::new(REGISTER_PUSH).param("params", ParamKind::Object),
        MethodSchema::new(UNREGISTER_PUSH).param("pushId", ParamKind::String),
        MethodSchema::new(DO_PUSH)
            .param("params", ParamKind::Object)
            .access(AccessLevel::SelfOnly),
        MethodSchema::new(CALLBACK_PUSH)
            .optional("result", ParamKind::Any)
            .param("monitorId", ParamKind::String),
        MethodSchema::new(DO_POLL)
            .param("monitorId", ParamKind::String)
            .access(AccessLevel::SelfOnly),
        MethodSchema::new(GET_METHODS),
    ]
}

/// Runs a built-in method. Parameters are already validated against
/// [`schemas`].
pub async fn handle(
    ctx: &AgentContext,
    method: &str,
    mut params: Params,
    sender: Option<&Address>,
) -> RpcResult<Value> {
    match method {
        ON_SUBSCRIBE => {
            let url = Address::parse(params.required_str("callbackUrl")?)?;
            let id = ctx
                .subscriptions()
                .subscribe(
                    params.required_str("event")?,
                    url,
                    params.required_str("callbackMethod")?,
                    params.optional_object("callbackParams")?.cloned(),
                )
                .await?;
            Ok(Value::String(id))
        }
        ON_UNSUBSCRIBE => {
            let filter = UnsubscribeFilter {
                subscription_id: params.optional_str("subscriptionId")?.map(str::to_string),
                event: params.optional_str("event")?.map(str::to_string),
                url: params
                    .optional_str("callbackUrl")?
                    .map(Address::parse)
                    .transpose()?,
                method: params.optional_str("callbackMethod")?.map(str::to_string),
            };
            ctx.subscriptions().unsubscribe(&filter).await?;
            Ok(Value::Null)
        }
        ON_TRIGGER => {
            let url = Address::parse(params.required_str("url")?)?;
            let target = params.required_str("method")?.to_string();
            let delivered = params.optional_object("params")?.cloned().unwrap_or_default();
            ctx.send(&url, &target, delivered).await
        }
        REGISTER_PUSH => {
            let push_params = match params.remove("params") {
                Some(Value::Object(map)) => map,
                _ => return Err(RpcError::InvalidParams("registerPush needs params".to_string())),
            };
            let ids = push::register_push(ctx, push_params, sender).await?;
            Ok(Value::from(ids))
        }
        UNREGISTER_PUSH => {
            push::unregister_push(ctx, params.required_str("pushId")?).await?;
            Ok(Value::Null)
        }
        DO_PUSH => {
            push::do_push(ctx, &params).await?;
            Ok(Value::Null)
        }
        CALLBACK_PUSH => {
            let monitor_id = params.required_str("monitorId")?.to_string();
            let result = params.remove("result").unwrap_or(Value::Null);
            client::callback_push(ctx, &monitor_id, result).await?;
            Ok(Value::Null)
        }
        DO_POLL => {
            client::do_poll(ctx, params.required_str("monitorId")?).await?;
            Ok(Value::Null)
        }
        GET_METHODS => Ok(serde_json::to_value(ctx.methods())?),
        other => Err(RpcError::MethodNotFound(other.to_string())),
    }
}
