//! OpenAI gateway tests against a mock completion API

use chatguard_core::ChatMessage;
use chatguard_server::config::UpstreamConfig;
use chatguard_server::{CompletionGateway, GatewayError, OpenAiGateway};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gateway_for(server: &MockServer, api_key: Option<&str>) -> OpenAiGateway {
    let config = UpstreamConfig {
        base_url: format!("{}/v1", server.uri()),
        timeout_secs: 5,
        allow_insecure: true,
        ..Default::default()
    };
    OpenAiGateway::new(&config, api_key.map(str::to_string)).unwrap()
}

fn conversation() -> Vec<ChatMessage> {
    vec![
        ChatMessage::system("You are a supportive counsellor."),
        ChatMessage::system("Intake: {}"),
        ChatMessage::user("hello"),
    ]
}

#[tokio::test]
async fn test_successful_completion() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "max_tokens": 800,
            "messages": [
                { "role": "system", "content": "You are a supportive counsellor." },
                { "role": "system", "content": "Intake: {}" },
                { "role": "user", "content": "hello" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "Hi! How can I help today?" },
                "finish_reason": "stop"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server, Some("sk-test"));
    let reply = gateway.complete(&conversation()).await.unwrap();
    assert_eq!(reply, "Hi! How can I help today?");
}

#[tokio::test]
async fn test_missing_content_is_empty_reply() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server, Some("sk-test"));
    let reply = gateway.complete(&conversation()).await.unwrap();
    assert_eq!(reply, "");
}

#[tokio::test]
async fn test_non_success_status_is_upstream_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(401).set_body_string(r#"{"error":{"message":"Incorrect API key"}}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway_for(&server, None);
    let err = gateway.complete(&conversation()).await.unwrap_err();

    match err {
        GatewayError::Upstream { status, body } => {
            assert_eq!(status, 401);
            assert!(body.contains("Incorrect API key"));
        }
        other => panic!("expected upstream error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_undecodable_body_is_decode_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let gateway = gateway_for(&server, Some("sk-test"));
    let err = gateway.complete(&conversation()).await.unwrap_err();
    assert!(matches!(err, GatewayError::Decode(_)));
}

#[tokio::test]
async fn test_unreachable_upstream_is_transport_error() {
    // Pooled servers keep listening after drop; a bare one actually shuts down.
    let server = MockServer::builder().start().await;
    let gateway = gateway_for(&server, Some("sk-test"));
    drop(server);

    let err = gateway.complete(&conversation()).await.unwrap_err();
    assert!(matches!(err, GatewayError::Transport(_)));
}
