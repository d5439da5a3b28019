use super::*;
use serde_json::json;

#[tokio::test]
async fn test_api_client_update_job_success() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("PATCH", "/api/v1/imports/import-123")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"status": "success"}"#)
        .create_async()
        .await;

    let client = ApiClient::new(server.url());

    let result = client
        .update_job("import-123", JobUpdatePayload::status("PROCESSING", Some(0)))
        .await;

    assert!(result.is_ok());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_api_client_update_job_failure() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("PATCH", "/api/v1/imports/import-123")
        .with_status(500)
        .with_body("Internal Server Error")
        .create_async()
        .await;

    let client = ApiClient::new(server.url());

    let payload = JobUpdatePayload {
        status: Some("FAILED".to_string()),
        progress: None,
        result_summary: None,
        error: Some("Something went wrong".to_string()),
    };

    let result = client.update_job("import-123", payload).await;

    assert!(result.is_err());
    assert_eq!(result.unwrap_err().to_string(), "API Error: Internal Server Error");
}

#[tokio::test]
async fn test_progress_update_sends_only_progress() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("PATCH", "/api/v1/imports/import-7")
        .match_body(mockito::Matcher::Json(json!({"progress": 45})))
        .with_status(200)
        .create_async()
        .await;

    let client = ApiClient::new(server.url());
    client
        .update_job("import-7", JobUpdatePayload::progress(45))
        .await
        .expect("progress update failed");

    mock.assert_async().await;
}

#[test]
fn test_import_job_deserialization() {
    let job: ImportJob = serde_json::from_str(
        r#"{"job_id": "j-1", "files": ["/data/system.arxml", "/data/ecu.arxml"], "created_at": "2024-05-01T10:00:00Z"}"#,
    )
    .expect("Failed to deserialize job");

    assert_eq!(job.job_id, "j-1");
    assert_eq!(job.files.len(), 2);
    assert_eq!(job.files[1], "/data/ecu.arxml");
}

#[test]
fn test_completion_payload_for_success() {
    let result = ImportResult {
        success: true,
        node_count: 4,
        relationship_count: 3,
        unresolved_references: Vec::new(),
        dropped_relationships: Vec::new(),
        error: None,
    };

    let payload = completion_payload(&result).expect("Failed to build payload");
    let parsed = serde_json::to_value(&payload).expect("Failed to serialize");

    assert_eq!(parsed["status"], "COMPLETED");
    assert_eq!(parsed["progress"], 100);
    assert_eq!(parsed["result_summary"]["node_count"], 4);
    assert!(parsed.get("error").is_none());
}

#[test]
fn test_completion_payload_for_failure() {
    let result = ImportResult::failure(&ImportError::parse("broken.arxml", "unexpected end of file"));

    let payload = completion_payload(&result).expect("Failed to build payload");

    assert_eq!(payload.status.as_deref(), Some("FAILED"));
    assert_eq!(payload.progress, None);
    assert_eq!(
        payload.error.as_deref(),
        Some("Failed to parse broken.arxml: unexpected end of file")
    );
    assert_eq!(payload.result_summary.unwrap()["success"], false);
}

#[test]
fn test_batch_size_parsing() {
    assert_eq!(parse_batch_size(None), DEFAULT_BATCH_SIZE);
    assert_eq!(parse_batch_size(Some("500")), 500);
    assert_eq!(parse_batch_size(Some(" 64 ")), 64);
    assert_eq!(parse_batch_size(Some("0")), DEFAULT_BATCH_SIZE);
    assert_eq!(parse_batch_size(Some("lots")), DEFAULT_BATCH_SIZE);
    assert_eq!(parse_batch_size(Some("-5")), DEFAULT_BATCH_SIZE);
}

#[tokio::test]
async fn test_missing_file_is_reported_with_its_name() {
    let err = read_documents(&["/definitely/not/here.arxml".to_string()])
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::Io { .. }));
    assert!(err.to_string().starts_with("Failed to read /definitely/not/here.arxml"));
}

#[tokio::test]
async fn test_read_documents_keeps_file_names() {
    let dir = std::env::temp_dir().join(format!("arxml-importer-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("system.arxml");
    std::fs::write(&path, "<AUTOSAR/>").unwrap();
    let file = path.to_string_lossy().to_string();

    let documents = read_documents(&[file.clone()]).await.unwrap();

    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].file_name, file);
    assert_eq!(documents[0].content, "<AUTOSAR/>");
    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_progress_forwarder_skips_endpoints_and_repeats() {
    let mut server = mockito::Server::new_async().await;
    let mid = server
        .mock("PATCH", "/api/v1/imports/fwd")
        .match_body(mockito::Matcher::Json(json!({"progress": 40})))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let (reporter, rx) = ProgressReporter::channel();
    let handle = spawn_progress_forwarder(ApiClient::new(server.url()), "fwd".to_string(), rx);

    reporter.report(0, "Parsing documents");
    reporter.report(40, "Clearing existing graph");
    reporter.report(40, "Clearing existing graph");
    reporter.report(100, "Import complete");
    drop(reporter);
    handle.await.unwrap();

    mid.assert_async().await;
}

#[test]
fn test_log_filter_honours_rust_log() {
    assert_eq!(log_filter(Some("debug")).max_level_hint(), Some(tracing::level_filters::LevelFilter::DEBUG));
    assert_eq!(log_filter(None).max_level_hint(), Some(tracing::level_filters::LevelFilter::INFO));
}
