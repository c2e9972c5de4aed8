//! HTTP surface tests driven through the router with `oneshot`.

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;

use pigate_core::server::router;
use pigate_test_utils::TestGateway;
use pigate_test_utils::gateway::TEST_BEARER;

async fn send(tg: &TestGateway, req: Request<Body>) -> (StatusCode, Value) {
    let response = router(tg.gateway.state()).oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::AUTHORIZATION, TEST_BEARER)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_needs_no_credentials() {
    let tg = TestGateway::permissive().await;
    let (status, body) = send(&tg, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_tool_call_without_credentials_is_401() {
    let tg = TestGateway::permissive().await;
    let req = Request::post("/tools/ssh_exec")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"target": "pi1", "command": "ls"}).to_string()))
        .unwrap();
    let (status, body) = send(&tg, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "unauthorized");
    assert_eq!(tg.connector.connects(), 0);
}

#[tokio::test]
async fn test_named_call_runs_tool() {
    let tg = TestGateway::permissive().await;
    tg.connector.reply("git status", "## main\n", "", 0);

    let (status, body) = send(
        &tg,
        post("/tools/git_status", json!({"target": "pi1", "project_dir": "/srv/app"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stdout"], "## main\n");
    assert_eq!(
        tg.connector.command_lines(),
        vec!["cd /srv/app && git status --short --branch".to_string()]
    );
}

#[tokio::test]
async fn test_envelope_call_runs_tool() {
    let tg = TestGateway::permissive().await;
    let (status, body) = send(
        &tg,
        post(
            "/tools",
            json!({"name": "ssh_exec", "arguments": {"target": "pi2", "command": "uptime"}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exit_code"], 0);
    assert_eq!(tg.connector.commands()[0].target, "pi2");
}

#[tokio::test]
async fn test_policy_denial_is_403() {
    let tg = TestGateway::with_policy(r#"enabled_tools = ["git_status"]"#).await;
    let (status, body) = send(
        &tg,
        post("/tools/ssh_exec", json!({"target": "pi1", "command": "ls"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "policy_denied");
}

#[tokio::test]
async fn test_tool_listing_follows_policy_and_target() {
    let tg = TestGateway::with_policy(
        r#"
        enabled_tools = ["ssh_exec", "git_status", "gpio_write"]

        [per_target_tools]
        pi2 = ["git_status"]
    "#,
    )
    .await;

    let list = |uri: &str| {
        Request::get(uri)
            .header(header::AUTHORIZATION, TEST_BEARER)
            .body(Body::empty())
            .unwrap()
    };
    let names = |body: &Value| -> Vec<String> {
        body["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect()
    };

    let (status, body) = send(&tg, list("/.well-known/mcp/tools")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(names(&body), vec!["ssh_exec", "git_status", "gpio_write"]);

    let (_, body) = send(&tg, list("/.well-known/mcp/tools?target=pi2")).await;
    assert_eq!(names(&body), vec!["git_status"]);
}

#[tokio::test]
async fn test_remote_timeout_is_504() {
    let tg = TestGateway::permissive().await;
    tg.connector.time_out_commands();
    let (status, body) = send(
        &tg,
        post("/tools/ssh_exec", json!({"target": "pi1", "command": "sleep 60"})),
    )
    .await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["kind"], "timeout");
}

#[tokio::test]
async fn test_invalid_base64_is_400() {
    let tg = TestGateway::permissive().await;
    let (status, body) = send(
        &tg,
        post(
            "/tools/scp_put",
            json!({"target": "pi1", "remote_path": "/tmp/x", "content_b64": "!!not base64!!"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_arguments");
}
