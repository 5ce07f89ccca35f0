mod common;

use std::collections::HashSet;
use std::time::Duration;

use common::{form, jpeg_bytes, part, png_bytes, spawn_server, Script, StubEngine};
use facematch_backend::models::verification::RawVerdict;
use tokio::time::sleep;

#[tokio::test]
async fn test_verify_success_returns_plain_boolean() {
    let engine = StubEngine::matching();
    let server = spawn_server(engine.clone()).await;

    let resp = server.verify(form(part(jpeg_bytes(32, 32), "a.jpg"), part(jpeg_bytes(32, 32), "b.jpg"))).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], 200);
    let result = &body["result"];
    assert_eq!(result["verified"], serde_json::json!(true));
    assert_eq!(result["model"], "Facenet512");
    assert_eq!(result["detector_backend"], "scrfd");
    assert_eq!(result["similarity_metric"], "cosine");
    assert_eq!(result["threshold"], 0.3);
    assert!(result["distance"].as_f64().unwrap() <= result["threshold"].as_f64().unwrap());
    assert_eq!(result["facial_areas"]["img1"], serde_json::json!({"x": 4, "y": 6, "w": 20, "h": 22}));
    assert_eq!(result["time"], 0.42);

    let calls = engine.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].existed);
    assert!(!calls[0].config.enforce_detection);
    assert!(calls[0].paths.iter().all(|p| !p.exists()));
    assert!(server.staged_files().is_empty());
}

#[tokio::test]
async fn test_verify_plain_false_verdict() {
    let engine = StubEngine::new(Script::Match { verdict: RawVerdict::Plain(false), distance: 0.71 });
    let server = spawn_server(engine).await;

    let resp = server.verify(form(part(png_bytes(16, 16), "a.png"), part(png_bytes(16, 16), "b.png"))).await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["result"]["verified"], serde_json::json!(false));
    assert_eq!(body["result"]["distance"], 0.71);
}

#[tokio::test]
async fn test_empty_filename_is_rejected() {
    let engine = StubEngine::matching();
    let server = spawn_server(engine.clone()).await;

    let resp = server.verify(form(part(png_bytes(8, 8), ""), part(png_bytes(8, 8), "b.png"))).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body, serde_json::json!({"status": 400, "message": "file1 and file2 are required"}));
    assert!(engine.calls().is_empty());
    assert!(server.staged_files().is_empty());
}

#[tokio::test]
async fn test_missing_field_is_rejected() {
    let server = spawn_server(StubEngine::matching()).await;

    let only_one = reqwest::multipart::Form::new().part("file1", part(png_bytes(8, 8), "a.png"));
    let resp = server.verify(only_one).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "file1 and file2 are required");
}

#[tokio::test]
async fn test_non_multipart_body_is_rejected() {
    let server = spawn_server(StubEngine::matching()).await;

    let resp = server
        .client
        .post(server.url("/api/facematch/v1/verify"))
        .json(&serde_json::json!({"file1": "a"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_engine_failure_is_500_and_cleans_up() {
    let engine = StubEngine::new(Script::Fail("corrupt embedding computation".into()));
    let server = spawn_server(engine.clone()).await;

    let resp = server.verify(form(part(png_bytes(8, 8), "a.png"), part(png_bytes(8, 8), "b.png"))).await;
    assert_eq!(resp.status(), 500);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["detail"], "corrupt embedding computation");

    let calls = engine.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].paths.iter().all(|p| !p.exists()));
    assert!(server.staged_files().is_empty());
}

#[tokio::test]
async fn test_engine_panic_is_500_and_cleans_up() {
    let engine = StubEngine::new(Script::Panic("numerical error in model".into()));
    let server = spawn_server(engine.clone()).await;

    let resp = server.verify(form(part(png_bytes(8, 8), "a.png"), part(png_bytes(8, 8), "b.png"))).await;
    assert_eq!(resp.status(), 500);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["detail"], "numerical error in model");
    assert!(server.staged_files().is_empty());
}

#[tokio::test]
async fn test_ambiguous_verdict_is_engine_error() {
    let engine = StubEngine::new(Script::Match { verdict: RawVerdict::Boxed(vec![true, false]), distance: 0.1 });
    let server = spawn_server(engine).await;

    let resp = server.verify(form(part(png_bytes(8, 8), "a.png"), part(png_bytes(8, 8), "b.png"))).await;
    assert_eq!(resp.status(), 500);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["detail"].as_str().unwrap().contains("more than one element"));
    assert!(server.staged_files().is_empty());
}

// Undecodable uploads are a server error, not a validation error.
#[tokio::test]
async fn test_corrupt_image_is_500_and_engine_not_called() {
    let engine = StubEngine::matching();
    let server = spawn_server(engine.clone()).await;

    let resp = server
        .verify(form(part(b"NOT AN IMAGE FILE".to_vec(), "a.jpg"), part(png_bytes(8, 8), "b.png")))
        .await;
    assert_eq!(resp.status(), 500);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["detail"].as_str().unwrap().starts_with("failed to decode image"));
    assert!(engine.calls().is_empty());
    assert!(server.staged_files().is_empty());
}

#[tokio::test]
async fn test_oversized_images_are_normalized_before_engine() {
    let engine = StubEngine::matching();
    let server = spawn_server(engine.clone()).await;

    // Bound is 64 in the test config.
    let resp = server.verify(form(part(jpeg_bytes(200, 100), "wide.jpg"), part(png_bytes(30, 120), "tall.png"))).await;
    assert_eq!(resp.status(), 200);

    let calls = engine.calls();
    assert_eq!(calls[0].dimensions, [(64, 32), (16, 64)]);
}

#[tokio::test]
async fn test_browser_blob_uploads_reach_engine_decodable() {
    let engine = StubEngine::matching();
    let server = spawn_server(engine.clone()).await;

    let blob = reqwest::multipart::Part::bytes(jpeg_bytes(40, 20)).file_name("blob").mime_str("image/jpeg").unwrap();
    let bare = part(png_bytes(20, 40), "face");
    let resp = server.verify(form(blob, bare)).await;
    assert_eq!(resp.status(), 200);

    let calls = engine.calls();
    assert_eq!(calls[0].dimensions, [(40, 20), (20, 40)]);
    assert_eq!(calls[0].paths[0].extension().unwrap(), "jpg");
    assert_eq!(calls[0].paths[1].extension().unwrap(), "png");
}

#[tokio::test]
async fn test_concurrent_requests_use_distinct_paths() {
    let engine = StubEngine::with_delay(
        Script::Match { verdict: RawVerdict::Boxed(vec![true]), distance: 0.1 },
        Duration::from_millis(100),
    );
    let server = spawn_server(engine.clone()).await;

    let requests = (0..6).map(|_| server.verify(form(part(png_bytes(8, 8), "same.png"), part(png_bytes(8, 8), "same.png"))));
    let responses = futures_util::future::join_all(requests).await;
    assert!(responses.iter().all(|r| r.status() == 200));

    let calls = engine.calls();
    assert_eq!(calls.len(), 6);
    let paths: HashSet<_> = calls.iter().flat_map(|c| c.paths.iter().cloned()).collect();
    assert_eq!(paths.len(), 12);
    assert!(server.staged_files().is_empty());
}

#[tokio::test]
async fn test_client_disconnect_still_cleans_up() {
    let engine = StubEngine::with_delay(
        Script::Match { verdict: RawVerdict::Plain(true), distance: 0.1 },
        Duration::from_millis(500),
    );
    let server = spawn_server(engine.clone()).await;

    let request = server.verify(form(part(png_bytes(8, 8), "a.png"), part(png_bytes(8, 8), "b.png")));
    assert!(tokio::time::timeout(Duration::from_millis(150), request).await.is_err());

    for _ in 0..30 {
        if !engine.calls().is_empty() && server.staged_files().is_empty() {
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(engine.calls().len(), 1);
    assert!(server.staged_files().is_empty());
}
