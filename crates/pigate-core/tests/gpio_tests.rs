//! GPIO tools end to end: policy gating, agent payloads, reply handling.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use pigate_config::{PolicyDocument, PolicyStore, TargetConfig};
use pigate_core::tools::ToolContext;
use pigate_core::{ErrorKind, GatewayError, ToolCall, ToolRequest, Transport};
use pigate_test_utils::{FakeConnector, TestGateway};

const GPIO_POLICY: &str = r#"
[gpio.pi1]
default_mode = "BCM"
agent_path = "/opt/pigate/gpio_agent.py"

[gpio.pi1.allowed_pins]
BCM = [17, 18, 27]

[gpio.pi1.capabilities]
17 = ["write", "read"]
18 = ["pwm"]
27 = ["read"]
"#;

async fn call(tg: &TestGateway, tool: &str, args: Value) -> Result<Value, GatewayError> {
    tg.gateway
        .dispatcher()
        .invoke(tg.meta(), ToolCall::new(tool, args))
        .await
}

/// Decode the base64 payload from `python3 "<agent>" "<payload>"`.
fn payload(command: &str) -> Value {
    assert!(command.starts_with("python3 \"/opt/pigate/gpio_agent.py\" \""));
    let encoded = command
        .trim_end_matches('"')
        .rsplit('"')
        .next()
        .unwrap();
    serde_json::from_slice(&STANDARD.decode(encoded).unwrap()).unwrap()
}

#[tokio::test]
async fn test_gpio_write_sends_resolved_payload() {
    let tg = TestGateway::with_policy(GPIO_POLICY).await;
    tg.connector.reply("gpio_agent", r#"{"ok": true, "pin": 17}"#, "", 0);

    let out = call(&tg, "gpio_write", json!({"target": "pi1", "pin": 17, "value": true}))
        .await
        .unwrap();
    assert_eq!(out["ok"], true);
    assert_eq!(out["result"]["pin"], 17);

    let lines = tg.connector.command_lines();
    assert_eq!(lines.len(), 1);
    assert_eq!(
        payload(&lines[0]),
        json!({
            "op": "write",
            "data": {"pin": 17, "value": 1, "mode": "BCM", "direction": "out"}
        })
    );
}

#[tokio::test]
async fn test_pin_outside_allowlist_is_denied_without_connecting() {
    let tg = TestGateway::with_policy(GPIO_POLICY).await;
    let err = call(&tg, "gpio_write", json!({"target": "pi1", "pin": 4, "value": 1}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PolicyDenied);
    assert_eq!(tg.connector.connects(), 0);
}

#[tokio::test]
async fn test_missing_capability_is_denied() {
    let tg = TestGateway::with_policy(GPIO_POLICY).await;
    let err = call(&tg, "gpio_write", json!({"target": "pi1", "pin": 27, "value": 0}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PolicyDenied);
    assert!(err.to_string().contains("lacks capability"));
}

#[tokio::test]
async fn test_target_without_gpio_policy_is_denied() {
    let tg = TestGateway::with_policy(GPIO_POLICY).await;
    let err = call(&tg, "gpio_read", json!({"target": "pi2", "pin": 17}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PolicyDenied);
}

#[tokio::test]
async fn test_unknown_mode_is_denied() {
    let tg = TestGateway::with_policy(GPIO_POLICY).await;
    let err = call(
        &tg,
        "gpio_read",
        json!({"target": "pi1", "pin": 17, "mode": "WIRINGPI"}),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PolicyDenied);
}

#[tokio::test]
async fn test_out_of_range_duty_is_invalid() {
    let tg = TestGateway::with_policy(GPIO_POLICY).await;
    let err = call(
        &tg,
        "gpio_pwm",
        json!({"target": "pi1", "pin": 18, "duty": 140.0}),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArguments);
}

#[tokio::test]
async fn test_agent_failure_reply_is_structured() {
    let tg = TestGateway::with_policy(GPIO_POLICY).await;
    tg.connector
        .reply("gpio_agent", r#"{"ok": false, "error": "pin busy"}"#, "", 1);

    let out = call(&tg, "gpio_read", json!({"target": "pi1", "pin": 17}))
        .await
        .unwrap();
    assert_eq!(out, json!({"ok": false, "error": "pin busy"}));
}

#[tokio::test]
async fn test_garbage_agent_output_is_agent_error() {
    let tg = TestGateway::with_policy(GPIO_POLICY).await;
    tg.connector
        .reply("gpio_agent", "Traceback (most recent call last):", "", 1);

    let err = call(&tg, "gpio_read", json!({"target": "pi1", "pin": 17}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Agent);
}

#[tokio::test]
async fn test_macro_runs_as_one_agent_call() {
    let tg = TestGateway::with_policy(GPIO_POLICY).await;
    tg.connector.reply("gpio_agent", r#"{"ok": true}"#, "", 0);

    call(
        &tg,
        "macro_run",
        json!({
            "target": "pi1",
            "steps": [
                {"op": "write", "data": {"pin": 17, "value": 1}},
                {"op": "pwm", "data": {"pin": 18, "duty": 50}},
                {"op": "read", "data": {"pin": 27}}
            ]
        }),
    )
    .await
    .unwrap();

    assert_eq!(tg.connector.connects(), 1);
    let lines = tg.connector.command_lines();
    assert_eq!(lines.len(), 1);
    let sent = payload(&lines[0]);
    assert_eq!(sent["op"], "macro");
    let steps = sent["data"]["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 3);
    assert!(steps.iter().all(|s| s["data"]["mode"] == "BCM"));
}

#[tokio::test]
async fn test_macro_with_one_bad_step_runs_nothing() {
    let tg = TestGateway::with_policy(GPIO_POLICY).await;
    let err = call(
        &tg,
        "macro_run",
        json!({
            "target": "pi1",
            "steps": [
                {"op": "write", "data": {"pin": 17, "value": 1}},
                {"op": "write", "data": {"pin": 18, "value": 1}}
            ]
        }),
    )
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PolicyDenied);
    assert!(err.to_string().contains("step 1"));
    assert_eq!(tg.connector.connects(), 0);
}

#[tokio::test]
async fn test_macro_step_values_get_the_single_tool_range_checks() {
    let tg = TestGateway::with_policy(GPIO_POLICY).await;
    tg.connector.reply("gpio_agent", r#"{"ok": true}"#, "", 0);

    for steps in [
        json!([{"op": "pwm", "data": {"pin": 18, "duty": 500, "freq": -3}}]),
        json!([{"op": "write", "data": {"pin": 17, "value": 7}}]),
        json!([
            {"op": "write", "data": {"pin": 17, "value": 1}},
            {"op": "pwm", "data": {"pin": 18, "duty": 50, "duration": -2}}
        ]),
    ] {
        let err = call(&tg, "macro_run", json!({"target": "pi1", "steps": steps}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArguments, "{steps}");
    }
    assert_eq!(tg.connector.connects(), 0);
}

#[tokio::test]
async fn test_policy_change_revokes_pin() {
    let tg = TestGateway::with_policy(GPIO_POLICY).await;
    tg.connector.reply("gpio_agent", r#"{"ok": true}"#, "", 0);
    assert!(call(&tg, "gpio_pwm", json!({"target": "pi1", "pin": 18, "duty": 25})).await.is_ok());

    tg.set_policy(&GPIO_POLICY.replace("18 = [\"pwm\"]", "18 = []")).await;
    let err = call(&tg, "gpio_pwm", json!({"target": "pi1", "pin": 18, "duty": 25}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PolicyDenied);
    assert_eq!(tg.connector.connects(), 1);
}

fn pi1() -> TargetConfig {
    TargetConfig {
        name: "pi1".to_string(),
        host: "10.0.0.11".to_string(),
        port: 22,
        username: "pi".to_string(),
        private_key_path: PathBuf::from("/nonexistent/id_ed25519"),
        known_hosts_path: None,
        connect_timeout_secs: 5,
    }
}

#[tokio::test]
async fn test_gpio_policy_removed_after_check_runs_nothing() {
    let fake = FakeConnector::new();
    fake.reply("gpio_agent", r#"{"ok": true}"#, "", 0);
    let transport = Transport::new(Arc::new(fake.clone()), Duration::from_secs(5));
    let store = PolicyStore::from_document(PolicyDocument::parse(GPIO_POLICY).unwrap());
    let target = pi1();

    for (tool, args) in [
        ("gpio_write", json!({"target": "pi1", "pin": 17, "value": 1})),
        (
            "macro_run",
            json!({"target": "pi1", "steps": [{"op": "read", "data": {"pin": 27}}]}),
        ),
    ] {
        store.replace(PolicyDocument::parse(GPIO_POLICY).unwrap());
        let request = ToolRequest::parse(tool, args).unwrap();
        request.check_policy(&store.current()).unwrap();

        // GPIO section dropped between the policy pass and execution.
        store.replace(PolicyDocument::parse("").unwrap());
        let ctx = ToolContext {
            transport: &transport,
            target: &target,
            policy: &store,
        };
        let err = request.execute(&ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PolicyDenied, "{tool}");
    }
    assert_eq!(fake.connects(), 0);
}

#[tokio::test]
async fn test_gpio_runs_against_the_current_snapshot() {
    let fake = FakeConnector::new();
    fake.reply("gpio_agent", r#"{"ok": true}"#, "", 0);
    let transport = Transport::new(Arc::new(fake.clone()), Duration::from_secs(5));
    let store = PolicyStore::from_document(PolicyDocument::parse(GPIO_POLICY).unwrap());
    let target = pi1();
    let ctx = ToolContext {
        transport: &transport,
        target: &target,
        policy: &store,
    };

    let request =
        ToolRequest::parse("gpio_write", json!({"target": "pi1", "pin": 17, "value": 1})).unwrap();
    request.check_policy(&store.current()).unwrap();
    let result = request.execute(&ctx).await.unwrap();

    assert_eq!(result["ok"], true);
    assert_eq!(fake.connects(), 1);
}
