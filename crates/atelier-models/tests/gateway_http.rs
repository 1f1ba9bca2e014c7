#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Gateway calls against a mocked OpenAI-compatible server.

use atelier_core::{MemorySink, SpanGuard, SpanStatus, TraceId, TraceRecorder};
use atelier_models::{
    AuthScheme, BackendConfig, BackendKind, GatewayConfig, ImageSource, ModelGateway,
    ModelRequest, ModelResponse, RetryPolicy,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn chat_reply(content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-1",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 10, "completion_tokens": 20, "total_tokens": 30}
    })
}

fn config(server: &MockServer) -> GatewayConfig {
    GatewayConfig {
        reasoning: BackendConfig::new(server.uri(), "gpt-4o-mini").with_api_key("sk-reason"),
        premium: BackendConfig::new(server.uri(), "gpt-4o").with_api_key("sk-premium"),
        image: Some(BackendConfig::new(server.uri(), "dall-e-3").with_api_key("sk-image")),
        vision: Some(BackendConfig::new(server.uri(), "gpt-4o").with_api_key("sk-vision")),
        retry: RetryPolicy::immediate(1),
    }
}

fn root() -> (SpanGuard, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let recorder = TraceRecorder::new(sink.clone());
    (recorder.start("test", TraceId::new()), sink)
}

#[tokio::test]
async fn test_chat_success_extracts_confidence() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer sk-reason"))
        .and(body_partial_json(serde_json::json!({"model": "gpt-4o-mini", "max_tokens": 800})))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply(
            r#"{"analysis": "Courtyard layout", "confidence": 0.85}"#,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = ModelGateway::from_config(&config(&server)).unwrap();
    let (parent, _sink) = root();
    let resp = gateway
        .call(
            BackendKind::Reasoning,
            &ModelRequest::chat("You are an architect.", "Design a house").with_max_tokens(800),
            Duration::from_secs(5),
            &parent,
        )
        .await
        .unwrap();

    match resp {
        ModelResponse::Text {
            confidence,
            tokens_used,
            ..
        } => {
            assert_eq!(confidence, Some(0.85));
            assert_eq!(tokens_used, Some(30));
        }
        other => panic!("expected text, got {other:?}"),
    }
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let gateway = ModelGateway::from_config(&config(&server)).unwrap();
    let (parent, sink) = root();
    let err = gateway
        .call(
            BackendKind::Reasoning,
            &ModelRequest::chat("s", "u"),
            Duration::from_secs(5),
            &parent,
        )
        .await
        .unwrap_err();

    assert!(err.is_transient());
    assert_eq!(err.status(), Some(503));
    let span = &sink.named("gateway.call")[0];
    assert_eq!(span.status, SpanStatus::Error);
    assert_eq!(span.attribute("outcome"), Some(&serde_json::json!("transient")));
}

#[tokio::test]
async fn test_client_errors_are_permanent() {
    for status in [400u16, 401, 422] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .mount(&server)
            .await;

        let gateway = ModelGateway::from_config(&config(&server)).unwrap();
        let (parent, _sink) = root();
        let err = gateway
            .call(
                BackendKind::Premium,
                &ModelRequest::chat("s", "u"),
                Duration::from_secs(5),
                &parent,
            )
            .await
            .unwrap_err();
        assert!(!err.is_transient(), "{status} should be permanent");
    }
}

#[tokio::test]
async fn test_malformed_body_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&server)
        .await;

    let gateway = ModelGateway::from_config(&config(&server)).unwrap();
    let (parent, _sink) = root();
    let err = gateway
        .call(
            BackendKind::Reasoning,
            &ModelRequest::chat("s", "u"),
            Duration::from_secs(5),
            &parent,
        )
        .await
        .unwrap_err();
    assert!(!err.is_transient());
    assert!(err.reason().contains("malformed"));
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(chat_reply("late"))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let gateway = ModelGateway::from_config(&config(&server)).unwrap();
    let (parent, _sink) = root();
    let started = Instant::now();
    let err = gateway
        .call(
            BackendKind::Reasoning,
            &ModelRequest::chat("s", "u"),
            Duration::from_millis(100),
            &parent,
        )
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_call_with_retry_recovers_from_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("Final synthesis")))
        .mount(&server)
        .await;

    let gateway = ModelGateway::from_config(&config(&server)).unwrap();
    let (parent, sink) = root();
    let outcome = gateway
        .call_with_retry(
            BackendKind::Premium,
            &ModelRequest::chat("s", "u"),
            Instant::now() + Duration::from_secs(5),
            &parent,
        )
        .await;

    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.result.unwrap().into_text(), "Final synthesis");
    assert_eq!(sink.named("gateway.call").len(), 2);
}

#[tokio::test]
async fn test_api_key_scheme_and_version() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/deployments/gpt-4o/chat/completions"))
        .and(query_param("api-version", "2024-10-21"))
        .and(header("api-key", "azure-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("ok")))
        .expect(1)
        .mount(&server)
        .await;

    let mut cfg = config(&server);
    cfg.premium = BackendConfig::new(server.uri(), "gpt-4o").with_api_key("azure-key");
    cfg.premium.auth = AuthScheme::ApiKey;
    cfg.premium.path = Some("/openai/deployments/gpt-4o/chat/completions".to_string());
    cfg.premium.api_version = Some("2024-10-21".to_string());

    let gateway = ModelGateway::from_config(&cfg).unwrap();
    let (parent, _sink) = root();
    let resp = gateway
        .call(
            BackendKind::Premium,
            &ModelRequest::chat("s", "u"),
            Duration::from_secs(5),
            &parent,
        )
        .await
        .unwrap();
    assert_eq!(resp.into_text(), "ok");
}

#[tokio::test]
async fn test_image_generation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .and(body_partial_json(serde_json::json!({"size": "1024x1024", "n": 1, "model": "dall-e-3"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"data": [{"url": "https://img.example.com/1.png"}]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let gateway = ModelGateway::from_config(&config(&server)).unwrap();
    let (parent, _sink) = root();
    let resp = gateway
        .call(
            BackendKind::ImageGeneration,
            &ModelRequest::GenerateImage {
                prompt: "A brick courtyard house at dusk".to_string(),
                reference_image: None,
            },
            Duration::from_secs(5),
            &parent,
        )
        .await
        .unwrap();
    assert_eq!(
        resp,
        ModelResponse::Image {
            url: "https://img.example.com/1.png".to_string()
        }
    );
}

#[tokio::test]
async fn test_vision_analysis_parses_details() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer sk-vision"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply(
            r#"{"style": "brutalist", "materials": ["concrete"]}"#,
        )))
        .mount(&server)
        .await;

    let gateway = ModelGateway::from_config(&config(&server)).unwrap();
    let (parent, _sink) = root();
    let resp = gateway
        .call(
            BackendKind::Vision,
            &ModelRequest::AnalyzeImage {
                image: ImageSource::Url("https://img.example.com/ref.jpg".to_string()),
                instructions: "Describe the architectural style.".to_string(),
            },
            Duration::from_secs(5),
            &parent,
        )
        .await
        .unwrap();

    match resp {
        ModelResponse::Analysis { details, .. } => assert_eq!(details["style"], "brutalist"),
        other => panic!("expected analysis, got {other:?}"),
    }
}
