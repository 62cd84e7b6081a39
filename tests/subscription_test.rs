mod common;

use std::sync::Arc;

use common::{next_call, params, setup, LoopbackTransport, TEMPERATURE_CHANGED};
use courier::{error::codes, Address, Params, RpcError};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

#[tokio::test]
async fn test_trigger_reaches_exact_and_wildcard_subscribers() {
    let mut f = setup().await;
    let sensor = f.sensor_ctx.address().clone();
    let exact = f
        .display_ctx
        .subscribe(&sensor, TEMPERATURE_CHANGED, "onEvent", None)
        .await
        .unwrap();
    let wildcard = f
        .display_ctx
        .subscribe(&sensor, "*", "onOther", None)
        .await
        .unwrap();
    assert_ne!(exact, wildcard);

    let tasks = f
        .sensor_ctx
        .trigger(TEMPERATURE_CHANGED, params(&[("value", json!(22.0))]))
        .await
        .unwrap();
    assert_eq!(tasks.len(), 2);

    let mut received = vec![
        next_call(&mut f.calls, 1000).await.unwrap(),
        next_call(&mut f.calls, 1000).await.unwrap(),
    ];
    received.sort_by(|a, b| a.0.cmp(&b.0));

    let (method, delivered) = &received[0];
    assert_eq!(method, "onEvent");
    assert_eq!(
        Value::Object(delivered.clone()),
        json!({
            "agent": "local://sensor",
            "event": "temperatureChanged",
            "subscriptionId": exact,
            "params": { "value": 22.0 },
        })
    );
    let (method, delivered) = &received[1];
    assert_eq!(method, "onOther");
    assert_eq!(delivered["subscriptionId"], json!(wildcard));
    assert_eq!(delivered["event"], "temperatureChanged");
}

#[tokio::test]
async fn test_delivery_names_the_publisher_by_its_current_url() {
    let mut f = setup().await;
    f.display_ctx
        .subscribe(f.sensor_ctx.address(), TEMPERATURE_CHANGED, "onEvent", None)
        .await
        .unwrap();

    f.host.register_transport(Arc::new(LoopbackTransport::new(
        f.host.receiver(),
        "mem://node1/",
    )));
    f.sensor_ctx
        .trigger(TEMPERATURE_CHANGED, Params::new())
        .await
        .unwrap();

    let (_, delivered) = next_call(&mut f.calls, 1000).await.unwrap();
    assert_eq!(delivered["agent"], "mem://node1/sensor");
}

#[tokio::test]
async fn test_wildcard_cannot_be_triggered() {
    let f = setup().await;
    let result = f.sensor_ctx.trigger("*", Params::new()).await;
    assert!(matches!(result, Err(RpcError::InvalidEvent(_))));
}

#[tokio::test]
async fn test_event_without_subscribers_schedules_nothing() {
    let f = setup().await;
    let tasks = f.sensor_ctx.trigger("doorOpened", Params::new()).await.unwrap();
    assert!(tasks.is_empty());
    assert!(f.sensor_ctx.tasks().is_empty());
}

#[tokio::test]
async fn test_duplicate_subscription_keeps_one_entry() {
    let f = setup().await;
    let sensor = f.sensor_ctx.address().clone();

    let first = f
        .display_ctx
        .subscribe(&sensor, TEMPERATURE_CHANGED, "onEvent", None)
        .await
        .unwrap();
    let second = f
        .display_ctx
        .subscribe(&sensor, TEMPERATURE_CHANGED, "onEvent", None)
        .await
        .unwrap();
    let with_params = f
        .display_ctx
        .subscribe(
            &sensor,
            TEMPERATURE_CHANGED,
            "onEvent",
            Some(params(&[("room", json!("kitchen"))])),
        )
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_ne!(first, with_params);
    let stored = f
        .sensor_ctx
        .subscriptions()
        .subscriptions(TEMPERATURE_CHANGED)
        .await
        .unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].url, Address::local("display"));
}

#[tokio::test]
async fn test_live_event_params_replace_stored_callback_params() {
    let mut f = setup().await;
    let sensor = f.sensor_ctx.address().clone();
    f.display_ctx
        .subscribe(
            &sensor,
            TEMPERATURE_CHANGED,
            "onEvent",
            Some(params(&[("room", json!("kitchen")), ("value", json!(0))])),
        )
        .await
        .unwrap();

    f.display_ctx
        .send_void(&sensor, "setTemperature", params(&[("value", json!(19.5))]))
        .await
        .unwrap();

    let (method, delivered) = next_call(&mut f.calls, 1000).await.unwrap();
    assert_eq!(method, "onEvent");
    assert_eq!(delivered["params"], json!({ "room": "kitchen", "value": 19.5 }));
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let mut f = setup().await;
    let sensor = f.sensor_ctx.address().clone();
    let id = f
        .display_ctx
        .subscribe(&sensor, TEMPERATURE_CHANGED, "onEvent", None)
        .await
        .unwrap();
    f.display_ctx
        .subscribe(&sensor, "*", "onOther", None)
        .await
        .unwrap();

    f.display_ctx.unsubscribe(&sensor, &id).await.unwrap();
    f.sensor_ctx
        .trigger(TEMPERATURE_CHANGED, Params::new())
        .await
        .unwrap();
    let (method, _) = next_call(&mut f.calls, 1000).await.unwrap();
    assert_eq!(method, "onOther");

    f.display_ctx
        .unsubscribe_matching(&sensor, "*", "onOther")
        .await
        .unwrap();
    let table = f.sensor_ctx.subscriptions().all().await.unwrap();
    assert!(table.is_empty());

    f.sensor_ctx
        .trigger(TEMPERATURE_CHANGED, Params::new())
        .await
        .unwrap();
    assert!(next_call(&mut f.calls, 200).await.is_none());
}

#[tokio::test]
async fn test_unreachable_subscriber_does_not_block_others() {
    let mut f = setup().await;
    let sensor = f.sensor_ctx.address().clone();
    f.sensor_ctx
        .subscriptions()
        .subscribe(
            TEMPERATURE_CHANGED,
            Address::parse("xmpp://display@elsewhere").unwrap(),
            "onEvent",
            None,
        )
        .await
        .unwrap();
    f.display_ctx
        .subscribe(&sensor, TEMPERATURE_CHANGED, "onEvent", None)
        .await
        .unwrap();

    let tasks = f
        .sensor_ctx
        .trigger(TEMPERATURE_CHANGED, Params::new())
        .await
        .unwrap();
    assert_eq!(tasks.len(), 2);

    let (method, _) = next_call(&mut f.calls, 1000).await.unwrap();
    assert_eq!(method, "onEvent");
}

#[tokio::test]
async fn test_delivery_task_is_not_callable_by_others() {
    let f = setup().await;
    let result = f
        .display_ctx
        .send(
            f.sensor_ctx.address(),
            "onTrigger",
            params(&[
                ("url", json!("local://display")),
                ("method", json!("onEvent")),
                ("params", json!({})),
            ]),
        )
        .await;
    assert!(matches!(result, Err(RpcError::Remote { code, .. }) if code == codes::ACCESS_DENIED));
}

#[tokio::test]
async fn test_subscriptions_are_kept_in_agent_state() {
    let f = setup().await;
    f.display_ctx
        .subscribe(f.sensor_ctx.address(), TEMPERATURE_CHANGED, "onEvent", None)
        .await
        .unwrap();

    let raw: Value = f
        .sensor_ctx
        .state()
        .get("subscriptions")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(raw[TEMPERATURE_CHANGED][0]["method"], "onEvent");
    assert_eq!(raw[TEMPERATURE_CHANGED][0]["url"], "local://display");
}
