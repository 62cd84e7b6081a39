use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use clap::Parser;
use courier::{
    config::RuntimeConfig,
    logging::init_logging,
    message::{MethodSchema, ParamKind},
    monitor::{CacheConfig, MonitorConfig, PollConfig, PushConfig},
    Address, Agent, AgentContext, AgentHost, Params, RpcError, RpcResult,
};
use serde_json::{json, Value};
use tracing::{debug, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of temperature changes to simulate
    #[arg(short, long, default_value_t = 3)]
    ticks: u32,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

struct Sensor;

#[async_trait]
impl Agent for Sensor {
    fn methods(&self) -> Vec<MethodSchema> {
        vec![
            MethodSchema::new("getTemperature").triggered_by("temperatureChanged"),
            MethodSchema::new("setTemperature").param("value", ParamKind::Number),
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
            "getTemperature" => Ok(ctx
                .state()
                .get::<Value>("temperature")
                .await?
                .unwrap_or(Value::Null)),
            "setTemperature" => {
                let value = params.get("value").cloned().unwrap_or(Value::Null);
                ctx.state().put("temperature", &value).await?;
                let mut event = Params::new();
                event.insert("value".to_string(), value);
                ctx.trigger("temperatureChanged", event).await?;
                Ok(Value::Null)
            }
            other => Err(RpcError::MethodNotFound(other.to_string())),
        }
    }
}

struct Display;

#[async_trait]
impl Agent for Display {
    fn methods(&self) -> Vec<MethodSchema> {
        vec![
            MethodSchema::new("onTemperature")
                .param("event", ParamKind::String)
                .optional("params", ParamKind::Object),
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
        match method {
            "onTemperature" => {
                println!(
                    "[display] {} -> {}",
                    params.get("event").unwrap_or(&Value::Null),
                    params.get("params").unwrap_or(&Value::Null)
                );
                Ok(Value::Null)
            }
            "onMonitor" => {
                println!(
                    "[display] monitor update: {}",
                    params.get("result").unwrap_or(&Value::Null)
                );
                Ok(Value::Null)
            }
            other => Err(RpcError::MethodNotFound(other.to_string())),
        }
    }
}

async fn run(cli: &Cli) -> RpcResult<()> {
    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::from_file(path)?,
        None => RuntimeConfig::default(),
    };
    if cli.verbose {
        config.logging.filter = "debug".to_string();
    }
    init_logging(&config.logging);
    debug!("config: {:?}", config);

    let host = AgentHost::new(config);
    let sensor = host.register_agent("sensor", Arc::new(Sensor)).await?;
    let display = host.register_agent("display", Arc::new(Display)).await?;
    info!("agents registered: {:?}", host.agent_ids());

    let sensor_url = sensor.address().clone();
    display
        .subscribe(&sensor_url, "temperatureChanged", "onTemperature", None)
        .await?;

    let monitor = display
        .init_result_monitor(
            &sensor_url,
            "getTemperature",
            Params::new(),
            Some("onMonitor"),
            vec![
                MonitorConfig::Cache(CacheConfig::max_age(Duration::from_millis(1000))),
                MonitorConfig::Poll(PollConfig::every(Duration::from_millis(750))),
                MonitorConfig::Push(PushConfig::on_event()),
            ],
        )
        .await?;

    for tick in 0..cli.ticks {
        let mut params = Params::new();
        params.insert("value".to_string(), json!(20.0 + f64::from(tick) * 0.5));
        display.send_void(&sensor_url, "setTemperature", params).await?;
        tokio::time::sleep(Duration::from_millis(400)).await;

        let current = display.get_result(&monitor, &Params::new()).await?;
        println!("[main] tick {}: current temperature {}", tick, current);
    }

    display.cancel_result_monitor(&monitor).await?;
    host.shutdown().await;
    println!("Demo finished.");
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(&cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
