#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, Weak,
    },
    time::Duration,
};

use async_trait::async_trait;
use courier::{
    message::{AccessLevel, Message, MethodSchema, ParamKind},
    transport::{Receiver, Transport},
    Address, Agent, AgentContext, AgentHost, Params, RpcError, RpcResult,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[ctor::ctor]
fn init_tests() {
    let _ = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub const TEMPERATURE_CHANGED: &str = "temperatureChanged";

/// Serves a temperature reading and counts how often it was read.
#[derive(Default)]
pub struct Sensor {
    temperature: Mutex<f64>,
    reads: AtomicUsize,
}

impl Sensor {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn current(&self) -> f64 {
        *self.temperature.lock().unwrap()
    }
}

#[async_trait]
impl Agent for Sensor {
    fn methods(&self) -> Vec<MethodSchema> {
        vec![
            MethodSchema::new("getTemperature").triggered_by(TEMPERATURE_CHANGED),
            MethodSchema::new("setTemperature").param("value", ParamKind::Number),
            MethodSchema::new("fail"),
            MethodSchema::new("slow").param("millis", ParamKind::Number),
            MethodSchema::new("calibrate").access(AccessLevel::SelfOnly),
            MethodSchema::new("reset").access(AccessLevel::Private),
            MethodSchema::new("firmware").access(AccessLevel::Unavailable),
        ]
    }

    async fn invoke(
        &self,
        ctx: &AgentContext,
        method: &str,
        params: Params,
        _sender: Option<&Address>,
    ) -> RpcResult<Value> {
        match method {
            "getTemperature" => {
                self.reads.fetch_add(1, Ordering::SeqCst);
                Ok(Value::from(self.current()))
            }
            "setTemperature" => {
                let value = params.get("value").and_then(Value::as_f64).unwrap_or_default();
                *self.temperature.lock().unwrap() = value;
                let mut event = Params::new();
                event.insert("value".to_string(), Value::from(value));
                ctx.trigger(TEMPERATURE_CHANGED, event).await?;
                Ok(Value::Null)
            }
            "fail" => Err(RpcError::InvalidParams("sensor offline".to_string())),
            "slow" => {
                let millis = params.get("millis").and_then(Value::as_u64).unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(Value::from("done"))
            }
            "calibrate" | "reset" => Ok(Value::from(true)),
            other => Err(RpcError::MethodNotFound(other.to_string())),
        }
    }

    fn on_access(&self, sender: Option<&Address>, _method: &str) -> bool {
        sender.is_some_and(|s| s.path() == "display")
    }
}

/// Forwards every invocation to a channel.
pub struct Recorder {
    tx: mpsc::UnboundedSender<(String, Params)>,
}

impl Recorder {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, Params)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Agent for Recorder {
    fn methods(&self) -> Vec<MethodSchema> {
        vec![
            MethodSchema::new("onEvent").optional("params", ParamKind::Object),
            MethodSchema::new("onOther").optional("params", ParamKind::Object),
            MethodSchema::new("onMonitor").optional("result", ParamKind::Any),
        ]
    }

    async fn invoke(
        &self,
        _ctx: &AgentContext,
        method: &str,
        params: Params,
        _sender: Option<&Address>,
    ) -> RpcResult<Value> {
        let _ = self.tx.send((method.to_string(), params));
        Ok(Value::Null)
    }
}

pub struct Fixture {
    pub host: AgentHost,
    pub sensor: Arc<Sensor>,
    pub sensor_ctx: AgentContext,
    pub display_ctx: AgentContext,
    pub calls: mpsc::UnboundedReceiver<(String, Params)>,
}

pub async fn setup_with(host: AgentHost) -> Fixture {
    let sensor = Arc::new(Sensor::default());
    let sensor_ctx = host.register_agent("sensor", sensor.clone()).await.unwrap();
    let (recorder, calls) = Recorder::new();
    let display_ctx = host
        .register_agent("display", Arc::new(recorder))
        .await
        .unwrap();
    Fixture {
        host,
        sensor,
        sensor_ctx,
        display_ctx,
        calls,
    }
}

pub async fn setup() -> Fixture {
    setup_with(AgentHost::default()).await
}

/// Next recorded invocation, if one arrives within `millis`.
pub async fn next_call(
    calls: &mut mpsc::UnboundedReceiver<(String, Params)>,
    millis: u64,
) -> Option<(String, Params)> {
    tokio::time::timeout(Duration::from_millis(millis), calls.recv())
        .await
        .ok()
        .flatten()
}

pub fn params(pairs: &[(&str, Value)]) -> Params {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Transport for a made-up `mem` scheme that loops back into a host, with a
/// published base address.
pub struct LoopbackTransport {
    receiver: Weak<dyn Receiver>,
    base: Address,
}

impl LoopbackTransport {
    pub fn new(receiver: Weak<dyn Receiver>, base: &str) -> Self {
        Self {
            receiver,
            base: Address::parse(base).unwrap(),
        }
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, address: &Address, payload: &str, tag: &str) -> RpcResult<()> {
        let receiver = self
            .receiver
            .upgrade()
            .ok_or_else(|| RpcError::Transport("host gone".to_string()))?;
        let (recipient, payload, tag) = (address.clone(), payload.to_string(), tag.to_string());
        tokio::spawn(async move { receiver.receive(recipient, payload, tag).await });
        Ok(())
    }

    fn protocols(&self) -> Vec<String> {
        vec!["mem".to_string()]
    }

    fn address(&self) -> Option<Address> {
        Some(self.base.clone())
    }
}

/// Loops `flaky://` sends back into a host, except requests for `failing`,
/// which are recorded and then fail as a broken link would.
pub struct FlakyTransport {
    receiver: Weak<dyn Receiver>,
    failing: String,
    rejected: Mutex<Vec<Params>>,
}

impl FlakyTransport {
    pub fn new(receiver: Weak<dyn Receiver>, failing: &str) -> Self {
        Self {
            receiver,
            failing: failing.to_string(),
            rejected: Mutex::new(Vec::new()),
        }
    }

    /// Params of every request that was refused.
    pub fn rejected(&self) -> Vec<Params> {
        self.rejected.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FlakyTransport {
    async fn send(&self, address: &Address, payload: &str, tag: &str) -> RpcResult<()> {
        if let Ok(Message::Request(request)) = Message::decode(payload) {
            if request.method() == self.failing {
                self.rejected.lock().unwrap().push(request.into_params());
                return Err(RpcError::Transport("link down".to_string()));
            }
        }
        let receiver = self
            .receiver
            .upgrade()
            .ok_or_else(|| RpcError::Transport("host gone".to_string()))?;
        let (recipient, payload, tag) = (address.clone(), payload.to_string(), tag.to_string());
        tokio::spawn(async move { receiver.receive(recipient, payload, tag).await });
        Ok(())
    }

    fn protocols(&self) -> Vec<String> {
        vec!["flaky".to_string()]
    }

    fn address(&self) -> Option<Address> {
        None
    }
}
