//! Providers against a local stub server: a streamed answer, once collected,
//! matches the one-shot completion for the same request.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing, Json, Router,
};
use enclave_llm::{collect_stream, LlmClient, LlmRequest, OllamaClient, OpenAiClient};
use serde_json::{json, Value};
use tokio::net::TcpListener;

const PIECES: [&str; 3] = ["Employees get ", "25 days ", "of annual leave."];

async fn start_stub_server() -> String {
    let app = Router::new()
        .route("/api/generate", routing::post(ollama_generate))
        .route("/v1/chat/completions", routing::post(chat_completions));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}", addr)
}

fn wants_stream(body: &Value) -> bool {
    body.get("stream").and_then(Value::as_bool).unwrap_or(false)
}

fn text(content_type: &'static str, body: String) -> Response {
    (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], body).into_response()
}

async fn ollama_generate(Json(body): Json<Value>) -> Response {
    if !wants_stream(&body) {
        return Json(json!({
            "model": "stub",
            "response": PIECES.concat(),
            "done": true,
            "prompt_eval_count": 4,
            "eval_count": 3,
        }))
        .into_response();
    }

    let mut lines: Vec<String> = PIECES
        .iter()
        .map(|p| json!({ "model": "stub", "response": p, "done": false }).to_string())
        .collect();
    lines.push(
        json!({ "model": "stub", "response": "", "done": true, "prompt_eval_count": 4, "eval_count": 3 })
            .to_string(),
    );
    text("application/x-ndjson", lines.join("\n"))
}

async fn chat_completions(Json(body): Json<Value>) -> Response {
    let usage = json!({ "prompt_tokens": 4, "completion_tokens": 3 });
    if !wants_stream(&body) {
        return Json(json!({
            "model": "stub",
            "choices": [{ "message": { "role": "assistant", "content": PIECES.concat() } }],
            "usage": usage,
        }))
        .into_response();
    }

    let mut events: Vec<String> = PIECES
        .iter()
        .map(|p| {
            let event = json!({
                "model": "stub",
                "choices": [{ "delta": { "content": p }, "finish_reason": null }],
            });
            format!("data: {}\n\n", event)
        })
        .collect();
    let last = json!({
        "model": "stub",
        "choices": [{ "delta": {}, "finish_reason": "stop" }],
        "usage": usage,
    });
    events.push(format!("data: {}\n\n", last));
    events.push("data: [DONE]\n\n".to_string());
    text("text/event-stream", events.concat())
}

async fn assert_stream_matches_complete(client: &dyn LlmClient) {
    let request = LlmRequest::new("How much leave do I get?", "stub").with_max_tokens(64);

    let complete = client.complete(&request).await.unwrap();
    let streamed = collect_stream(client.stream(&request.clone().with_streaming()).await.unwrap())
        .await
        .unwrap();

    assert_eq!(streamed.content, complete.content);
    assert_eq!(streamed.content, "Employees get 25 days of annual leave.");
    assert_eq!(streamed.model, complete.model);
    assert_eq!(streamed.usage.total_tokens, complete.usage.total_tokens);
}

#[tokio::test]
async fn test_ollama_stream_collects_to_completion() {
    let base = start_stub_server().await;
    let client = OllamaClient::with_base_url(base);
    assert_stream_matches_complete(&client).await;
}

#[tokio::test]
async fn test_openai_stream_collects_to_completion() {
    let base = start_stub_server().await;
    let client = OpenAiClient::new(format!("{}/v1", base), "test-key");
    assert_stream_matches_complete(&client).await;
}
