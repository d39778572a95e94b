//! Tests for the GARM HTTP client against a one-shot local listener.

use rstest::rstest;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use super::*;
use crate::api::{InstanceStatus, RunnerStatus};

/// Accepts one connection, answers with the canned response and returns
/// the head of the request it received.
async fn serve_once(status_line: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap_or_else(|err| panic!("bind listener: {err}"));
    let addr = listener
        .local_addr()
        .unwrap_or_else(|err| panic!("local addr: {err}"));

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener
            .accept()
            .await
            .unwrap_or_else(|err| panic!("accept: {err}"));
        let mut buf = vec![0_u8; 8192];
        let read = socket
            .read(&mut buf)
            .await
            .unwrap_or_else(|err| panic!("read request: {err}"));
        buf.truncate(read);
        let response = format!(
            "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        socket
            .write_all(response.as_bytes())
            .await
            .unwrap_or_else(|err| panic!("write response: {err}"));
        socket.shutdown().await.ok();
        String::from_utf8_lossy(&buf).into_owned()
    });

    (format!("http://{addr}"), handle)
}

fn client_for(base_url: String) -> GarmClient {
    let profile = ClientProfile {
        base_url,
        token: String::from("tok-123"),
    };
    GarmClient::new(&profile).unwrap_or_else(|err| panic!("client: {err}"))
}

#[tokio::test]
async fn list_scopes_decodes_records_and_sends_bearer_token() {
    let (base, server) = serve_once(
        "200 OK",
        r#"[{"id":"r-1","owner":"acme","name":"repo","credentials_name":"gh"}]"#,
    )
    .await;
    let client = client_for(base);

    let scopes = client
        .list_scopes(ScopeKind::Repository)
        .await
        .unwrap_or_else(|err| panic!("list scopes: {err}"));
    let request = server
        .await
        .unwrap_or_else(|err| panic!("server task: {err}"));

    assert_eq!(scopes.len(), 1);
    assert_eq!(scopes.first().map(|scope| scope.id.as_str()), Some("r-1"));
    assert!(
        request.starts_with("GET /api/v1/repositories HTTP/1.1"),
        "unexpected request line: {request}"
    );
    assert!(
        request.to_ascii_lowercase().contains("authorization: bearer tok-123"),
        "missing bearer token: {request}"
    );
}

#[tokio::test]
async fn get_instance_decodes_status_pair() {
    let (base, server) = serve_once(
        "200 OK",
        r#"{"name":"garm-1","pool_id":"p-1","status":"running","runner_status":"idle"}"#,
    )
    .await;
    let client = client_for(base);

    let instance = client
        .get_instance("garm-1")
        .await
        .unwrap_or_else(|err| panic!("get instance: {err}"));
    let request = server
        .await
        .unwrap_or_else(|err| panic!("server task: {err}"));

    assert_eq!(instance.status, InstanceStatus::Running);
    assert_eq!(instance.runner_status, RunnerStatus::Idle);
    assert!(request.starts_with("GET /api/v1/instances/garm-1 "));
}

#[tokio::test]
async fn non_success_status_surfaces_api_error_details() {
    let (base, server) = serve_once(
        "404 Not Found",
        r#"{"error":"Not Found","details":"pool not found"}"#,
    )
    .await;
    let client = client_for(base);
    let pool = PoolRef::Global {
        pool_id: String::from("p-9"),
    };

    let err = client
        .delete_pool(&pool)
        .await
        .expect_err("404 should be an error");
    server
        .await
        .unwrap_or_else(|err| panic!("server task: {err}"));

    assert_eq!(err.status(), Some(404));
    assert_eq!(err.endpoint(), "pools/p-9");
    assert!(
        err.to_string().contains("Not Found: pool not found"),
        "unexpected message: {err}"
    );
}

#[tokio::test]
async fn malformed_body_is_a_decode_error() {
    let (base, server) = serve_once("200 OK", "not-json").await;
    let client = client_for(base);

    let err = client
        .list_pools()
        .await
        .expect_err("decode should fail");
    server
        .await
        .unwrap_or_else(|err| panic!("server task: {err}"));

    assert!(matches!(err, RemoteError::Decode { .. }), "got {err:?}");
}

#[tokio::test]
async fn unreachable_host_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap_or_else(|err| panic!("bind listener: {err}"));
    let addr = listener
        .local_addr()
        .unwrap_or_else(|err| panic!("local addr: {err}"));
    drop(listener);
    let client = client_for(format!("http://{addr}"));

    let err = client
        .list_instances()
        .await
        .expect_err("connection should be refused");

    assert!(matches!(err, RemoteError::Transport { .. }), "got {err:?}");
}

#[rstest]
#[case(r#"{"error":"Bad Request","details":"invalid pool"}"#, "Bad Request: invalid pool")]
#[case(r#"{"error":"Unauthorized"}"#, "Unauthorized")]
#[case("plain failure\n", "plain failure")]
#[case("{}", "{}")]
fn error_message_prefers_structured_fields(#[case] body: &str, #[case] expected: &str) {
    assert_eq!(error_message(body), expected);
}
