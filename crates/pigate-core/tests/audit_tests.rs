//! One audit event per call, with nothing sensitive in it.

use serde_json::json;
use tracing_subscriber::layer::SubscriberExt;

use pigate_core::{CallMeta, ToolCall};
use pigate_test_utils::{AuditCollector, AuditEntry, AuditReader, TEST_API_KEY, TestGateway};

fn capture() -> (AuditReader, tracing::subscriber::DefaultGuard) {
    let collector = AuditCollector::new(64);
    let reader = collector.reader();
    let subscriber = tracing_subscriber::registry().with(collector);
    (reader, tracing::subscriber::set_default(subscriber))
}

fn only(reader: &AuditReader) -> AuditEntry {
    let entries = reader.entries();
    assert_eq!(entries.len(), 1, "expected exactly one audit event: {entries:?}");
    entries.into_iter().next().unwrap()
}

#[tokio::test]
async fn test_successful_call_is_audited_once() {
    let tg = TestGateway::permissive().await;
    let (reader, _guard) = capture();

    tg.gateway
        .dispatcher()
        .invoke(tg.meta(), ToolCall::new("ssh_exec", json!({"target": "pi1", "command": "ls"})))
        .await
        .unwrap();

    let entry = only(&reader);
    assert_eq!(entry.level, tracing::Level::INFO);
    assert_eq!(entry.field("event"), Some("tool_call"));
    assert_eq!(entry.field("tool"), Some("ssh_exec"));
    assert_eq!(entry.field("target_host"), Some("pi1"));
    assert_eq!(entry.field("caller"), Some("api-key:0"));
    assert_eq!(entry.field("source"), Some("127.0.0.1"));
    assert_eq!(entry.field("outcome"), Some("ok"));
}

#[tokio::test]
async fn test_denied_call_records_reason() {
    let tg = TestGateway::with_policy(r#"enabled_tools = ["git_status"]"#).await;
    let (reader, _guard) = capture();

    let _ = tg
        .gateway
        .dispatcher()
        .invoke(tg.meta(), ToolCall::new("ssh_exec", json!({"target": "pi1", "command": "ls"})))
        .await;

    let entry = only(&reader);
    assert_eq!(entry.level, tracing::Level::WARN);
    assert_eq!(entry.field("event"), Some("tool_blocked"));
    assert_eq!(entry.field("error_kind"), Some("policy_denied"));
    assert!(entry.field("reason").is_some_and(|r| r.contains("ssh_exec")));
}

#[tokio::test]
async fn test_rejected_credentials_are_audited_without_the_secret() {
    let tg = TestGateway::permissive().await;
    let (reader, _guard) = capture();
    let attempted = "Bearer hunter2-not-the-key";

    let _ = tg
        .gateway
        .dispatcher()
        .invoke(
            CallMeta {
                authorization: Some(attempted),
                source: tg.meta().source,
            },
            ToolCall::new("ssh_exec", json!({"target": "pi1", "command": "ls"})),
        )
        .await;

    let entry = only(&reader);
    assert_eq!(entry.field("event"), Some("auth_denied"));
    for value in entry.fields.values() {
        assert!(!value.contains("hunter2"), "secret leaked: {value}");
    }
}

#[tokio::test]
async fn test_audit_never_carries_key_env_or_content() {
    let tg = TestGateway::permissive().await;
    let (reader, _guard) = capture();

    tg.gateway
        .dispatcher()
        .invoke(
            tg.meta(),
            ToolCall::new(
                "ssh_exec",
                json!({"target": "pi1", "command": "./deploy", "env": {"TOKEN": "s3cr3t-env"}}),
            ),
        )
        .await
        .unwrap();
    tg.gateway
        .dispatcher()
        .invoke(
            tg.meta(),
            ToolCall::new(
                "scp_put",
                json!({
                    "target": "pi1",
                    "remote_path": "/tmp/k",
                    "content_b64": "c2VjcmV0LWJ5dGVz"
                }),
            ),
        )
        .await
        .unwrap();

    let entries = reader.entries();
    assert_eq!(entries.len(), 2);
    for entry in &entries {
        for value in entry.fields.values() {
            assert!(!value.contains(TEST_API_KEY));
            assert!(!value.contains("s3cr3t-env"));
            assert!(!value.contains("c2VjcmV0LWJ5dGVz"));
            assert!(!value.contains("nonexistent/id_ed25519"));
        }
    }
}
