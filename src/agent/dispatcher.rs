use serde_json::Value;
use tracing::{debug, instrument};

use super::{builtin, Agent, AgentContext};
use crate::{
    message::{AccessLevel, Params},
    transport::Address,
    RpcError, RpcResult,
};

/// Invokes `method` on `agent`: table lookup, parameter validation, access
/// check, then the built-in handler or the agent's own.
#[instrument(skip(agent, ctx, params), fields(agent = ctx.agent_id()))]
pub async fn dispatch(
    agent: &dyn Agent,
    ctx: &AgentContext,
    method: &str,
    params: Params,
    sender: Option<&Address>,
) -> RpcResult<Value> {
    let schema = ctx
        .method_table()
        .get(method)
        .filter(|schema| schema.access != AccessLevel::Unavailable)
        .ok_or_else(|| RpcError::MethodNotFound(method.to_string()))?;
    schema.validate(&params)?;
    check_access(agent, ctx, schema.access, method, sender)?;

    debug!("invoking {}", method);
    if builtin::is_builtin(method) {
        builtin::handle(ctx, method, params, sender).await
    } else {
        agent.invoke(ctx, method, params, sender).await
    }
}

/// The agent's own addresses pass every check.
fn check_access(
    agent: &dyn Agent,
    ctx: &AgentContext,
    access: AccessLevel,
    method: &str,
    sender: Option<&Address>,
) -> RpcResult<()> {
    let is_self = sender.is_some_and(|s| ctx.is_own_address(s));
    let allowed = match access {
        AccessLevel::Public => true,
        AccessLevel::SelfOnly => is_self,
        AccessLevel::Private => is_self || agent.on_access(sender, method),
        AccessLevel::Unavailable => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(RpcError::AccessDenied {
            method: method.to_string(),
            sender: sender.map(|s| s.to_string()).unwrap_or_default(),
        })
    }
}
