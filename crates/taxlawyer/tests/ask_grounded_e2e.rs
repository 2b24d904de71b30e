use axum::{
    extract::Query,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn sse_event(text: &str) -> String {
    let v = serde_json::json!({
        "candidates": [{ "content": { "role": "model", "parts": [{ "text": text }] } }]
    });
    format!("data: {v}\n\n")
}

fn brave_fixture(seen: Arc<Mutex<Vec<String>>>) -> Router {
    Router::new().route(
        "/res/v1/web/search",
        get(
            move |headers: HeaderMap, Query(params): Query<HashMap<String, String>>| {
                let seen = seen.clone();
                async move {
                    if headers.get("x-subscription-token").and_then(|v| v.to_str().ok())
                        != Some("brave-test")
                    {
                        return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({})));
                    }
                    seen.lock()
                        .unwrap()
                        .push(params.get("q").cloned().unwrap_or_default());
                    let results: Vec<_> = (1..=3)
                        .map(|i| {
                            serde_json::json!({
                                "url": format!("https://ura.go.ug/vat/{i}"),
                                "title": format!("VAT guide {i}"),
                                "description": "Registration threshold is UGX 150 million.",
                            })
                        })
                        .collect();
                    (
                        StatusCode::OK,
                        Json(serde_json::json!({ "web": { "results": results } })),
                    )
                }
            },
        ),
    )
}

fn gemini_fixture(prompts: Arc<Mutex<Vec<String>>>) -> Router {
    Router::new().route(
        "/v1beta/models/:model",
        post(move |Json(body): Json<serde_json::Value>| {
            let prompts = prompts.clone();
            async move {
                let prompt = body["contents"][0]["parts"][0]["text"]
                    .as_str()
                    .unwrap_or("")
                    .to_string();
                prompts.lock().unwrap().push(prompt);
                let mut sse = String::new();
                for t in ["The VAT registration ", "threshold is ", "UGX 150 million [1]."] {
                    sse.push_str(&sse_event(t));
                }
                ([(header::CONTENT_TYPE, "text/event-stream")], sse).into_response()
            }
        }),
    )
}

#[tokio::test]
async fn ask_json_grounds_answer_on_brave_sources() {
    let queries = Arc::new(Mutex::new(Vec::new()));
    let prompts = Arc::new(Mutex::new(Vec::new()));
    let brave = serve(brave_fixture(queries.clone())).await;
    let gemini = serve(gemini_fixture(prompts.clone())).await;

    let bin = assert_cmd::cargo::cargo_bin!("taxlawyer");
    let out = tokio::process::Command::new(bin)
        .args(["ask", "--output", "json", "--count", "3", "web: VAT threshold"])
        .env_remove("TAXLAWYER_ENV_FILE")
        .env_remove("TAXLAWYER_GEMINI_API_KEY")
        .env_remove("BRAVE_SEARCH_API_KEY")
        .env("GEMINI_API_KEY", "gemini-test")
        .env("BRAVE_API_KEY", "brave-test")
        .env(
            "TAXLAWYER_BRAVE_ENDPOINT",
            format!("http://{brave}/res/v1/web/search"),
        )
        .env("TAXLAWYER_GEMINI_BASE_URL", format!("http://{gemini}"))
        .output()
        .await
        .expect("run taxlawyer ask");

    assert!(
        out.status.success(),
        "ask failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse ask json");
    assert_eq!(v["kind"].as_str(), Some("ask"));
    assert_eq!(v["history_len"].as_u64(), Some(2));

    let outcome = &v["outcome"];
    assert_eq!(outcome["mode"].as_str(), Some("search_then_answer"));
    assert_eq!(outcome["question"].as_str(), Some("VAT threshold"));
    assert_eq!(outcome["source_urls"].as_array().map(Vec::len), Some(3));
    assert_eq!(
        outcome["answer"].as_str(),
        Some("The VAT registration threshold is UGX 150 million [1].")
    );
    assert_eq!(outcome["suggested_verification"].as_bool(), Some(false));

    let q = queries.lock().unwrap()[0].clone();
    assert!(q.starts_with("VAT threshold "), "{q}");
    assert!(q.contains("site:ura.go.ug OR site:finance.go.ug"), "{q}");

    let prompt = prompts.lock().unwrap()[0].clone();
    assert!(prompt.contains("User question:\nVAT threshold"));
    assert!(prompt.contains("[1] VAT guide 1 — https://ura.go.ug/vat/1"));

    let kinds: Vec<&str> = v["events"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["kind"].as_str())
        .collect();
    assert_eq!(kinds.first(), Some(&"search_started"));
    assert_eq!(kinds.get(1), Some(&"sources"));
    assert_eq!(kinds.last(), Some(&"answer_done"));
}

#[tokio::test]
async fn ask_without_prefix_skips_search_and_suggests_verification() {
    let queries = Arc::new(Mutex::new(Vec::new()));
    let prompts = Arc::new(Mutex::new(Vec::new()));
    let brave = serve(brave_fixture(queries.clone())).await;
    let gemini = serve(gemini_fixture(prompts.clone())).await;

    let bin = assert_cmd::cargo::cargo_bin!("taxlawyer");
    let out = tokio::process::Command::new(bin)
        .args(["ask", "--output", "json", "What is the VAT threshold in 2024?"])
        .env_remove("TAXLAWYER_ENV_FILE")
        .env("GEMINI_API_KEY", "gemini-test")
        .env("BRAVE_API_KEY", "brave-test")
        .env(
            "TAXLAWYER_BRAVE_ENDPOINT",
            format!("http://{brave}/res/v1/web/search"),
        )
        .env("TAXLAWYER_GEMINI_BASE_URL", format!("http://{gemini}"))
        .output()
        .await
        .expect("run taxlawyer ask");

    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["outcome"]["mode"].as_str(), Some("no_grounding"));
    assert_eq!(v["outcome"]["suggested_verification"].as_bool(), Some(true));
    assert!(queries.lock().unwrap().is_empty());
    assert!(!prompts.lock().unwrap()[0].contains("Context from authoritative"));
}
