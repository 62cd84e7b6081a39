//! # Call Bridge
//!
//! Turns the fire-and-forget [`Router::send`] into correlated calls.
//!
//! Every outbound request with an id gets a pending entry holding a oneshot
//! sender. The entry is removed exactly once: by the matching response
//! ([`CallBridge::handle_response`]) or by the timeout path, whichever
//! claims it first from the map. The loser finds nothing and does nothing,
//! so duplicated or late responses are discarded silently.
//!
//! ```text
//! caller ──send──▶ pending[id] ──Router──▶ transport ──▶ remote agent
//!    ▲                 │
//!    └── oneshot ◀─────┴──── handle_response(id) ◀── transport ◀──┘
//! ```
//!
//! A dropped caller future also removes its entry, so abandoned calls do
//! not leak slots.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::{sync::oneshot, time::Instant};
use tracing::{debug, instrument, warn};

use crate::{
    message::{CorrelationId, Params, Request, Response},
    transport::{Address, Router},
    RpcError, RpcResult,
};

/// Receives the outcome of a [`CallBridge::send_async`] call. Exactly one of
/// the two methods is invoked, and only once; both consume the callback.
pub trait AsyncCallback<T>: Send + 'static {
    fn on_success(self: Box<Self>, result: T);
    fn on_failure(self: Box<Self>, error: RpcError);
}

/// Adapts a closure over the call's result into an [`AsyncCallback`].
pub struct FnCallback<F>(F);

impl<T, F> AsyncCallback<T> for FnCallback<F>
where
    F: FnOnce(RpcResult<T>) + Send + 'static,
{
    fn on_success(self: Box<Self>, result: T) {
        (self.0)(Ok(result))
    }

    fn on_failure(self: Box<Self>, error: RpcError) {
        (self.0)(Err(error))
    }
}

pub fn callback_fn<T, F>(f: F) -> Box<dyn AsyncCallback<T>>
where
    T: 'static,
    F: FnOnce(RpcResult<T>) + Send + 'static,
{
    Box::new(FnCallback(f))
}

struct PendingCall {
    sender: oneshot::Sender<RpcResult<Response>>,
    method: String,
    created_at: Instant,
}

/// Removes the pending entry when the waiting side goes away, however it
/// goes away.
struct PendingGuard {
    pending: Arc<DashMap<CorrelationId, PendingCall>>,
    id: CorrelationId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

#[derive(Clone)]
pub struct CallBridge {
    router: Router,
    pending: Arc<DashMap<CorrelationId, PendingCall>>,
    default_timeout: Duration,
}

impl CallBridge {
    pub fn new(router: Router, default_timeout: Duration) -> Self {
        Self {
            router,
            pending: Arc::new(DashMap::new()),
            default_timeout,
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    /// Calls `method` on `to` and waits for the result.
    pub async fn send(
        &self,
        from: &Address,
        to: &Address,
        method: &str,
        params: Params,
    ) -> RpcResult<Value> {
        self.send_with_timeout(from, to, method, params, self.default_timeout)
            .await
    }

    #[instrument(skip(self, params), fields(from = %from, to = %to))]
    pub async fn send_with_timeout(
        &self,
        from: &Address,
        to: &Address,
        method: &str,
        params: Params,
        timeout: Duration,
    ) -> RpcResult<Value> {
        let request = Request::call(method, params)?;
        let (id, rx) = self.register(&request)?;
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            id: id.clone(),
        };

        self.router
            .send(to, &request.encode()?, from.as_str())
            .await?;

        self.await_response(id, rx, timeout).await?.into_result()
    }

    /// Like [`send`](Self::send), decoding the result into `T`.
    pub async fn send_typed<T: DeserializeOwned>(
        &self,
        from: &Address,
        to: &Address,
        method: &str,
        params: Params,
    ) -> RpcResult<T> {
        let value = self.send(from, to, method, params).await?;
        decode_result(method, value)
    }

    /// Like [`send`](Self::send) for methods without a meaningful result.
    pub async fn send_void(
        &self,
        from: &Address,
        to: &Address,
        method: &str,
        params: Params,
    ) -> RpcResult<()> {
        self.send(from, to, method, params).await.map(|_| ())
    }

    /// Sends a notification: no id, no pending entry, no reply.
    pub async fn notify(
        &self,
        from: &Address,
        to: &Address,
        method: &str,
        params: Params,
    ) -> RpcResult<()> {
        let request = Request::notification(method, params)?;
        self.router
            .send(to, &request.encode()?, from.as_str())
            .await
    }

    /// Issues the call and returns its correlation id immediately. The
    /// outcome, including a locally synthesized timeout, reaches `callback`
    /// exactly once.
    pub fn send_async<T>(
        &self,
        from: &Address,
        to: &Address,
        method: &str,
        params: Params,
        callback: Box<dyn AsyncCallback<T>>,
    ) -> RpcResult<CorrelationId>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.send_async_with_timeout(from, to, method, params, callback, self.default_timeout)
    }

    pub fn send_async_with_timeout<T>(
        &self,
        from: &Address,
        to: &Address,
        method: &str,
        params: Params,
        callback: Box<dyn AsyncCallback<T>>,
        timeout: Duration,
    ) -> RpcResult<CorrelationId>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let request = Request::call(method, params)?;
        let payload = request.encode()?;
        let (id, rx) = self.register(&request)?;

        let bridge = self.clone();
        let from = from.clone();
        let to = to.clone();
        let method = method.to_string();
        let call_id = id.clone();
        tokio::spawn(async move {
            let _guard = PendingGuard {
                pending: bridge.pending.clone(),
                id: call_id.clone(),
            };
            let outcome = match bridge.router.send(&to, &payload, from.as_str()).await {
                Ok(()) => bridge
                    .await_response(call_id, rx, timeout)
                    .await
                    .and_then(Response::into_result)
                    .and_then(|value| decode_result::<T>(&method, value)),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(result) => callback.on_success(result),
                Err(e) => {
                    debug!("async call {} to {} failed: {}", method, to, e);
                    callback.on_failure(e)
                }
            }
        });
        Ok(id)
    }

    fn register(
        &self,
        request: &Request,
    ) -> RpcResult<(CorrelationId, oneshot::Receiver<RpcResult<Response>>)> {
        let id = request
            .id()
            .ok_or_else(|| RpcError::InvalidRequest("request has no correlation id".to_string()))?
            .to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id.clone(),
            PendingCall {
                sender: tx,
                method: request.method().to_string(),
                created_at: Instant::now(),
            },
        );
        Ok((id, rx))
    }

    async fn await_response(
        &self,
        id: CorrelationId,
        mut rx: oneshot::Receiver<RpcResult<Response>>,
        timeout: Duration,
    ) -> RpcResult<Response> {
        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RpcError::InternalError(format!(
                "response channel for {} closed",
                id
            ))),
            Err(_) => {
                if let Some((_, call)) = self.pending.remove(&id) {
                    debug!(
                        "{} ({}) timed out after {:?}",
                        id,
                        call.method,
                        call.created_at.elapsed()
                    );
                    return Err(RpcError::Timeout {
                        request_id: id,
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
                // A response claimed the entry at the deadline; its send is imminent.
                rx.await.unwrap_or_else(|_| {
                    Err(RpcError::Timeout {
                        request_id: id,
                        timeout_ms: timeout.as_millis() as u64,
                    })
                })
            }
        }
    }

    /// Resolves the pending call matching `response`. Returns `false` when
    /// no call was waiting for it (duplicate, late or foreign responses).
    pub fn handle_response(&self, response: Response) -> bool {
        let Some(id) = response.id().map(str::to_string) else {
            warn!("discarding response without id: {:?}", response.error());
            return false;
        };
        match self.pending.remove(&id) {
            Some((_, call)) => {
                // The waiting side may have been dropped meanwhile; nothing to do then.
                let _ = call.sender.send(Ok(response));
                true
            }
            None => {
                debug!("discarding response for unknown or resolved request {}", id);
                false
            }
        }
    }

    /// Fails every waiting call, e.g. on shutdown.
    pub fn cancel_pending(&self, reason: &str) -> usize {
        let ids: Vec<CorrelationId> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut cancelled = 0;
        for id in ids {
            if let Some((_, call)) = self.pending.remove(&id) {
                let _ = call.sender.send(Err(RpcError::InternalError(format!(
                    "request cancelled: {}",
                    reason
                ))));
                cancelled += 1;
            }
        }
        cancelled
    }
}

fn decode_result<T: DeserializeOwned>(method: &str, value: Value) -> RpcResult<T> {
    serde_json::from_value(value).map_err(|e| {
        RpcError::InternalError(format!("unexpected result shape from '{}': {}", method, e))
    })
}
