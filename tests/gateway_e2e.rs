//! End-to-end tests: real sockets, mock worker, reqwest and the SDK.

use std::time::Duration;

use doc_gateway::config::AuthMode;
use futures_util::stream;
use gateway_sdk::{AskRequest, GatewayClient, SearchParams};
use reqwest::multipart;
use serde_json::Value;

mod common;

use common::{config_for, start_gateway, start_mock_worker, AskMode, ARCHIVE_BYTES};

fn text_file(contents: &str) -> multipart::Form {
    multipart::Form::new()
        .text("title", "notes")
        .part(
            "file",
            multipart::Part::bytes(contents.as_bytes().to_vec())
                .file_name("notes.txt")
                .mime_str("text/plain")
                .unwrap(),
        )
}

#[tokio::test]
async fn test_upload_relayed_then_rate_limited() {
    let worker = start_mock_worker().await;
    let mut config = config_for(&worker.url());
    config.auth.mode = Some(AuthMode::Strict);
    config.auth.token = "client-secret".into();
    config.rate_limit.upload_per_minute = 3;
    let gateway = start_gateway(config).await;
    let client = common::client();

    for i in 1..=3 {
        let res = client
            .post(gateway.url("/upload"))
            .bearer_auth("client-secret")
            .multipart(text_file("hello world"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200, "upload {} should pass", i);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["doc_id"], format!("doc-{}", i * 2));
    }

    let res = client
        .post(gateway.url("/upload"))
        .bearer_auth("client-secret")
        .multipart(text_file("hello world"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 429);
    assert_eq!(res.headers()["retry-after"], "20");
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "rate_limited");

    // The denied request never reached the worker.
    assert_eq!(worker.state.seen_for("/upload").len(), 3);
}

#[tokio::test]
async fn test_upload_parts_preserved_and_trigger_fired() {
    let worker = start_mock_worker().await;
    let gateway = start_gateway(config_for(&worker.url())).await;

    let res = common::client()
        .post(gateway.url("/upload"))
        .header("x-request-id", "upload-trace-1")
        .multipart(text_file("quarterly report body"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let parts = worker.state.uploads.lock().unwrap().clone();
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0].name, "title");
    assert_eq!(parts[0].file_name, None);
    assert_eq!(parts[0].bytes, b"notes");
    assert_eq!(parts[1].name, "file");
    assert_eq!(parts[1].file_name.as_deref(), Some("notes.txt"));
    assert_eq!(parts[1].content_type.as_deref(), Some("text/plain"));
    assert_eq!(parts[1].bytes, b"quarterly report body");

    let processed = worker.state.wait_for_processed(1).await;
    assert_eq!(processed, vec!["doc-2".to_string()]);
    let trigger = worker.state.seen_for("/process");
    assert_eq!(trigger[0].request_id.as_deref(), Some("upload-trace-1"));
}

#[tokio::test]
async fn test_upload_requires_multipart() {
    let worker = start_mock_worker().await;
    let gateway = start_gateway(config_for(&worker.url())).await;

    let res = common::client()
        .post(gateway.url("/upload"))
        .header("content-type", "application/json")
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
    assert!(worker.state.seen_for("/upload").is_empty());
}

#[tokio::test]
async fn test_upload_over_declared_limit() {
    let worker = start_mock_worker().await;
    let mut config = config_for(&worker.url());
    config.listener.max_upload_bytes = 64;
    let gateway = start_gateway(config).await;

    let res = common::client()
        .post(gateway.url("/upload"))
        .multipart(text_file(&"x".repeat(1024)))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 413);
    assert!(worker.state.seen_for("/upload").is_empty());
}

#[tokio::test]
async fn test_malformed_multipart_is_client_error() {
    let worker = start_mock_worker().await;
    let gateway = start_gateway(config_for(&worker.url())).await;

    let res = common::client()
        .post(gateway.url("/upload"))
        .header("content-type", "multipart/form-data; boundary=XYZ")
        .body("this is not a multipart body at all")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
    assert!(worker.state.uploads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_chunked_upload_over_limit() {
    let worker = start_mock_worker().await;
    let mut config = config_for(&worker.url());
    config.listener.max_upload_bytes = 1024;
    let gateway = start_gateway(config).await;

    let chunks: Vec<Result<Vec<u8>, std::io::Error>> = vec![
        Ok(b"--XYZ\r\nContent-Disposition: form-data; name=\"file\"; filename=\"big.bin\"\r\n\r\n".to_vec()),
        Ok(vec![b'a'; 2048]),
        Ok(vec![b'a'; 2048]),
        Ok(b"\r\n--XYZ--\r\n".to_vec()),
    ];
    let res = common::client()
        .post(gateway.url("/upload"))
        .header("content-type", "multipart/form-data; boundary=XYZ")
        .body(reqwest::Body::wrap_stream(stream::iter(chunks)))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 413);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "payload_too_large");
}

#[tokio::test]
async fn test_worker_credential_replaces_client_token() {
    let worker = start_mock_worker().await;
    let mut config = config_for(&worker.url());
    config.auth.mode = Some(AuthMode::Strict);
    config.auth.token = "client-secret".into();
    config.worker.token = "worker-secret".into();
    let gateway = start_gateway(config).await;

    let res = common::client()
        .get(gateway.url("/search?q=rust"))
        .bearer_auth("client-secret")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let seen = worker.state.seen_for("/search");
    assert_eq!(seen[0].authorization.as_deref(), Some("Bearer worker-secret"));

    let body = res.text().await.unwrap();
    assert!(!body.contains("worker-secret"));
}

#[tokio::test]
async fn test_client_token_not_forwarded_without_worker_token() {
    let worker = start_mock_worker().await;
    let gateway = start_gateway(config_for(&worker.url())).await;

    let res = common::client()
        .get(gateway.url("/status"))
        .bearer_auth("client-secret")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(worker.state.seen_for("/status")[0].authorization, None);
}

#[tokio::test]
async fn test_request_id_propagation() {
    let worker = start_mock_worker().await;
    let gateway = start_gateway(config_for(&worker.url())).await;
    let client = common::client();

    let res = client
        .get(gateway.url("/status"))
        .header("x-request-id", "trace-abc")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-request-id"], "trace-abc");
    assert_eq!(
        worker.state.seen_for("/status")[0].request_id.as_deref(),
        Some("trace-abc")
    );

    let res = client.get(gateway.url("/status")).send().await.unwrap();
    let generated = res.headers()["x-request-id"].to_str().unwrap().to_string();
    assert_eq!(generated.len(), 36);
    assert_eq!(
        worker.state.seen_for("/status")[1].request_id.as_deref(),
        Some(generated.as_str())
    );
}

#[tokio::test]
async fn test_search_validation_and_param_filtering() {
    let worker = start_mock_worker().await;
    let gateway = start_gateway(config_for(&worker.url())).await;
    let client = common::client();

    let res = client.get(gateway.url("/search")).send().await.unwrap();
    assert_eq!(res.status(), 400);
    let res = client.get(gateway.url("/search?q=x&k=500")).send().await.unwrap();
    assert_eq!(res.status(), 400);
    assert!(worker.state.seen_for("/search").is_empty());

    let res = client
        .get(gateway.url("/search?q=tokio+runtime&k=3&debug=1&kind=pdf&drop_index=yes"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let seen = worker.state.seen_for("/search");
    assert_eq!(seen[0].query.as_deref(), Some("q=tokio+runtime&k=3&kind=pdf"));
}

#[tokio::test]
async fn test_export_streams_and_archive_bytes_intact() {
    let worker = start_mock_worker().await;
    let gateway = start_gateway(config_for(&worker.url())).await;
    let client = common::client();

    let res = client
        .get(gateway.url("/export?doc_id=doc-1&q=ignored"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["content-type"], "application/x-ndjson");
    assert_eq!(res.text().await.unwrap().lines().count(), 2);
    assert_eq!(
        worker.state.seen_for("/export")[0].query.as_deref(),
        Some("doc_id=doc-1")
    );

    let res = client
        .get(gateway.url("/export/archive?doc_id=doc-1&kind=zip"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["content-type"], "application/zip");
    assert_eq!(
        res.headers()["content-disposition"],
        "attachment; filename=\"export.zip\""
    );
    assert_eq!(res.bytes().await.unwrap().as_ref(), ARCHIVE_BYTES);
    assert_eq!(
        worker.state.seen_for("/export/archive")[0].query.as_deref(),
        Some("doc_id=doc-1")
    );
}

#[tokio::test]
async fn test_ask_relayed() {
    let worker = start_mock_worker().await;
    let gateway = start_gateway(config_for(&worker.url())).await;
    let sdk = GatewayClient::new(&format!("http://{}", gateway.addr));

    let answer = sdk
        .ask(&AskRequest {
            question: "what is the answer?".into(),
            k: None,
        })
        .await
        .unwrap();
    assert_eq!(answer["answer"], "forty-two");
    assert_eq!(answer["question"], "what is the answer?");
}

#[tokio::test]
async fn test_ask_falls_back_to_search() {
    let worker = start_mock_worker().await;
    *worker.state.ask_mode.lock().unwrap() = AskMode::NotFound;
    let gateway = start_gateway(config_for(&worker.url())).await;
    let sdk = GatewayClient::new(&format!("http://{}", gateway.addr));

    let answer = sdk
        .ask(&AskRequest {
            question: "where are the invoices".into(),
            k: Some(7),
        })
        .await
        .unwrap();
    assert_eq!(answer["mode"], "search_only");
    assert!(answer["answer"].is_null());
    assert_eq!(answer["results"]["results"][0]["doc_id"], "doc-1");

    let search = worker.state.seen_for("/search");
    assert_eq!(search[0].query.as_deref(), Some("q=where+are+the+invoices&k=7"));
}

#[tokio::test]
async fn test_ask_rejects_bad_bodies() {
    let worker = start_mock_worker().await;
    let gateway = start_gateway(config_for(&worker.url())).await;
    let client = common::client();

    for body in ["not json", "{}", r#"{"question":"   "}"#, r#"{"question":"q","k":0}"#] {
        let res = client
            .post(gateway.url("/ask"))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 400, "body {:?}", body);
    }
    assert!(worker.state.seen_for("/ask").is_empty());
}

#[tokio::test]
async fn test_sdk_round_trip() {
    let worker = start_mock_worker().await;
    let mut config = config_for(&worker.url());
    config.auth.mode = Some(AuthMode::Strict);
    config.auth.token = "sdk-token".into();
    let gateway = start_gateway(config).await;
    let base = format!("http://{}", gateway.addr);

    let sdk = GatewayClient::new(&base).with_token("sdk-token");
    assert_eq!(sdk.health().await.unwrap().status, "ok");
    assert_eq!(sdk.status().await.unwrap()["ready"], true);

    let uploaded = sdk
        .upload("a.md", "text/markdown", b"# title".to_vec())
        .await
        .unwrap();
    assert_eq!(uploaded["status"], "queued");

    let results = sdk
        .search(&SearchParams {
            q: "title".into(),
            k: Some(2),
            ..SearchParams::default()
        })
        .await
        .unwrap();
    assert_eq!(results["query"], "q=title&k=2");

    let archive = sdk.export(Some("doc-1"), true).await.unwrap();
    assert_eq!(archive, ARCHIVE_BYTES);

    let anonymous = GatewayClient::new(&base);
    let err = anonymous.export(None, false).await.unwrap_err();
    assert_eq!(err.status().map(|s| s.as_u16()), Some(401));
    assert_eq!(err.code().as_deref(), Some("missing_credential"));
}

#[tokio::test]
async fn test_health_full_reports_worker() {
    let worker = start_mock_worker().await;
    let gateway = start_gateway(config_for(&worker.url())).await;
    let sdk = GatewayClient::new(&format!("http://{}", gateway.addr));

    let report = sdk.health_full().await.unwrap();
    assert_eq!(report.status, "ok");
    let probe = report.worker.unwrap();
    assert!(probe.reachable);
    assert_eq!(probe.status, Some(200));
    assert!(probe.latency_ms < Duration::from_secs(1).as_millis() as u64);
}

#[tokio::test]
async fn test_cors_policy_over_the_wire() {
    let worker = start_mock_worker().await;
    let mut config = config_for(&worker.url());
    config.cors.allowed_origins = vec!["http://app.example".into()];
    let gateway = start_gateway(config).await;
    let client = common::client();

    let res = client
        .get(gateway.url("/health"))
        .header("origin", "http://evil.example")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert!(res.headers().get("access-control-allow-origin").is_none());

    let res = client
        .get(gateway.url("/health"))
        .header("origin", "http://app.example")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["access-control-allow-origin"], "http://app.example");

    let res = client
        .request(reqwest::Method::OPTIONS, gateway.url("/upload"))
        .header("origin", "http://app.example")
        .header("access-control-request-method", "POST")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 204);
    assert!(res.headers().get("access-control-allow-methods").is_some());
    assert!(worker.state.seen_for("/upload").is_empty());
}
