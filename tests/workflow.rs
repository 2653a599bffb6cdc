//! Workflow pipeline tests using a wiremock mock server.
//!
//! These tests verify:
//! - Upload field-name fallback and identifier synonym handling
//! - Options fetch replacing the schema and clearing selections
//! - Generate payload shape and content-type dispatch
//! - Local preconditions issuing zero network requests
//! - Timeout classification

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use faturamento::{
    Client, Config, LogCallbacks, LogLevel, LogRecord, OptionsView, SelectionValue,
    TransportErrorKind, UploadSource,
};
use serde_json::json;
use wiremock::matchers::{body_json, body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Helper to create a client pointing at the mock server.
fn client_for_server(server: &MockServer) -> Client {
    Client::new(Config {
        base_url: Some(server.uri()),
        ..Default::default()
    })
    .expect("client creation should succeed")
}

fn spreadsheet() -> UploadSource {
    UploadSource::from_bytes("planilha.xlsx", b"PK\x03\x04fake".to_vec())
}

/// Mount a happy-path upload mock and run an upload so later operations have
/// a live handle.
async fn seed_upload(server: &MockServer, client: &Client) {
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "upload_id": "u1",
            "filename": "planilha.xlsx"
        })))
        .mount(server)
        .await;

    client
        .workflow()
        .upload(spreadsheet())
        .await
        .expect("seed upload should succeed");
}

#[tokio::test]
async fn health_check_reports_affirmative_status() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for_server(&server);
    let health = client
        .workflow()
        .health_check()
        .await
        .expect("health check should succeed");
    assert!(health.is_affirmative());
    assert_eq!(health.status.as_deref(), Some("ok"));
}

#[tokio::test]
async fn health_check_tolerates_non_json_body() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
        .mount(&server)
        .await;

    let client = client_for_server(&server);
    let health = client
        .workflow()
        .health_check()
        .await
        .expect("non-JSON body is still a healthy response");
    assert!(!health.is_affirmative());
    assert_eq!(health.status, None);
}

#[tokio::test]
async fn health_check_surfaces_server_rejection() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(
            ResponseTemplate::new(503).set_body_json(json!({"detail": "warming up"})),
        )
        .mount(&server)
        .await;

    let client = client_for_server(&server);
    let err = client
        .workflow()
        .health_check()
        .await
        .expect_err("must fail");
    assert_eq!(err.status(), Some(503));
    assert!(err.to_string().contains("warming up"));
}

#[tokio::test]
async fn upload_uses_primary_field_name() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(body_string_contains("name=\"file\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "upload_id": "u1",
            "filename": "stored.xlsx"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for_server(&server);
    let receipt = client
        .workflow()
        .upload(spreadsheet())
        .await
        .expect("upload should succeed");

    assert_eq!(receipt.field_name, "file");
    assert_eq!(receipt.handle.upload_id, "u1");
    assert_eq!(receipt.handle.display_name, "stored.xlsx");

    let session = client.workflow().session();
    assert_eq!(session.upload, Some(receipt.handle));
}

#[tokio::test]
async fn upload_falls_back_to_alternate_field_name() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(body_string_contains("name=\"file\""))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({"detail": "campo invalido"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(body_string_contains("name=\"arquivo\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "u2"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for_server(&server);
    let receipt = client
        .workflow()
        .upload(spreadsheet())
        .await
        .expect("fallback attempt should succeed");

    assert_eq!(receipt.field_name, "arquivo");
    assert_eq!(receipt.handle.upload_id, "u2");
    // Display name falls back to the source's own name.
    assert_eq!(receipt.handle.display_name, "planilha.xlsx");
}

#[tokio::test]
async fn upload_gives_up_after_the_fallback_attempt() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(body_string_contains("name=\"file\""))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({"detail": "nope"})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(body_string_contains("name=\"arquivo\""))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"detail": "ainda nao"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for_server(&server);
    let err = client
        .workflow()
        .upload(spreadsheet())
        .await
        .expect_err("both attempts rejected");

    assert_eq!(err.status(), Some(400));
    assert!(client.workflow().session().upload.is_none());
}

#[tokio::test]
async fn upload_without_a_file_issues_no_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for_server(&server);
    let err = client
        .workflow()
        .upload(UploadSource::from_bytes("empty.xlsx", Vec::new()))
        .await
        .expect_err("must fail locally");
    assert!(err.is_precondition());

    server.verify().await;
}

#[tokio::test]
async fn options_and_generate_require_an_upload_handle() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/faturamento/options"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/faturamento/gerar"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for_server(&server);
    let err = client
        .workflow()
        .fetch_options()
        .await
        .expect_err("no handle yet");
    assert!(err.is_precondition());

    let err = client.workflow().generate().await.expect_err("no handle yet");
    assert!(err.is_precondition());

    server.verify().await;
}

#[tokio::test]
async fn fetch_options_classifies_fields_in_schema_order() {
    let server = MockServer::start().await;
    let client = client_for_server(&server);
    seed_upload(&server, &client).await;

    Mock::given(method("GET"))
        .and(path("/faturamento/options"))
        .and(query_param("upload_id", "u1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uf": ["SC", "PR"],
            "ano": 2025,
            "meta": {"x": 1}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let view = client
        .workflow()
        .fetch_options()
        .await
        .expect("options fetch should succeed");

    let fields = view.fields();
    assert_eq!(fields.len(), 3);
    assert_eq!(fields[0].key, "uf");
    assert!(fields[0].is_multi_choice());
    assert_eq!(fields[1].key, "ano");
    assert_eq!(fields[2].key, "meta");
}

#[tokio::test]
async fn refetching_options_clears_prior_selections() {
    let server = MockServer::start().await;
    let client = client_for_server(&server);
    seed_upload(&server, &client).await;

    Mock::given(method("GET"))
        .and(path("/faturamento/options"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"uf": ["SC", "PR"]})))
        .expect(2)
        .mount(&server)
        .await;

    let workflow = client.workflow();
    workflow.fetch_options().await.expect("first fetch");
    workflow
        .set_choices("uf", vec!["SC".into()])
        .expect("edit should apply");
    assert_eq!(
        workflow.session().selections.get("uf"),
        Some(&SelectionValue::Multi(vec!["SC".into()]))
    );

    workflow.fetch_options().await.expect("second fetch");
    assert!(workflow.session().selections.is_empty());
}

#[tokio::test]
async fn empty_options_schema_is_distinguishable_from_none() {
    let server = MockServer::start().await;
    let client = client_for_server(&server);

    assert_eq!(client.workflow().session().options, OptionsView::NotFetched);

    seed_upload(&server, &client).await;
    Mock::given(method("GET"))
        .and(path("/faturamento/options"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let view = client
        .workflow()
        .fetch_options()
        .await
        .expect("empty schema is a valid outcome");
    assert_eq!(view, OptionsView::Empty);
    assert_eq!(client.workflow().session().options, OptionsView::Empty);
}

#[tokio::test]
async fn generate_sends_selections_merged_with_the_identifier() {
    let server = MockServer::start().await;
    let client = client_for_server(&server);
    seed_upload(&server, &client).await;

    Mock::given(method("GET"))
        .and(path("/faturamento/options"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uf": ["SC", "PR"],
            "ano": 2025
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/faturamento/gerar"))
        .and(body_json(json!({
            "uf": ["SC", "PR"],
            "ano": "2024",
            "upload_id": "u1"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"resultado": "ok"})))
        .expect(1)
        .mount(&server)
        .await;

    let workflow = client.workflow();
    workflow.fetch_options().await.expect("options");
    workflow
        .set_choices("uf", vec!["SC".into(), "PR".into()])
        .expect("choices");
    workflow.set_text("ano", "2024").expect("text");

    let report = workflow.generate().await.expect("generate should succeed");
    assert!(report.is_json());
    assert_eq!(report.json(), Some(&json!({"resultado": "ok"})));
}

#[tokio::test]
async fn generate_json_response_becomes_a_pretty_json_artifact() {
    let server = MockServer::start().await;
    let client = client_for_server(&server);
    seed_upload(&server, &client).await;

    Mock::given(method("POST"))
        .and(path("/faturamento/gerar"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"total": 10})))
        .mount(&server)
        .await;

    let report = client
        .workflow()
        .generate()
        .await
        .expect("generate should succeed");

    assert!(report.file_name.starts_with("relatorio_"));
    assert!(report.file_name.ends_with(".json"));
    assert_eq!(
        String::from_utf8(report.to_bytes()).expect("utf8"),
        "{\n  \"total\": 10\n}"
    );
}

#[tokio::test]
async fn generate_binary_response_uses_the_disposition_filename() {
    let server = MockServer::start().await;
    let client = client_for_server(&server);
    seed_upload(&server, &client).await;

    Mock::given(method("POST"))
        .and(path("/faturamento/gerar"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"%PDF-1.7".to_vec())
                .insert_header("content-type", "application/octet-stream")
                .insert_header("content-disposition", "attachment; filename=\"r.pdf\""),
        )
        .mount(&server)
        .await;

    let report = client
        .workflow()
        .generate()
        .await
        .expect("generate should succeed");

    assert_eq!(report.file_name, "r.pdf");
    assert!(!report.is_json());
    assert_eq!(report.to_bytes(), b"%PDF-1.7".to_vec());
}

#[tokio::test]
async fn generate_rejection_is_not_retried() {
    let server = MockServer::start().await;
    let client = client_for_server(&server);
    seed_upload(&server, &client).await;

    Mock::given(method("POST"))
        .and(path("/faturamento/gerar"))
        .respond_with(
            ResponseTemplate::new(500).set_body_string("geracao falhou"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = client
        .workflow()
        .generate()
        .await
        .expect_err("server rejected");
    assert_eq!(err.status(), Some(500));
    assert!(err.to_string().contains("geracao falhou"));

    server.verify().await;
}

#[tokio::test]
async fn timeouts_surface_as_timeout_transport_errors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(400)))
        .mount(&server)
        .await;

    let client = Client::new(Config {
        base_url: Some(server.uri()),
        health_timeout: Some(Duration::from_millis(50)),
        ..Default::default()
    })
    .expect("client");

    let err = client
        .workflow()
        .health_check()
        .await
        .expect_err("deadline must expire");
    assert_eq!(err.transport_kind(), Some(TransportErrorKind::Timeout));
}

#[tokio::test]
async fn reset_session_is_idempotent_and_clears_the_handle() {
    let server = MockServer::start().await;
    let client = client_for_server(&server);
    seed_upload(&server, &client).await;

    let workflow = client.workflow();
    assert!(workflow.session().upload.is_some());

    workflow.reset_session();
    let first = workflow.session();
    workflow.reset_session();
    let second = workflow.session();

    assert_eq!(first, second);
    assert!(second.upload.is_none());
    assert_eq!(second.options, OptionsView::NotFetched);
    assert!(second.selections.is_empty());
}

#[tokio::test]
async fn edits_against_missing_or_mismatched_fields_are_preconditions() {
    let server = MockServer::start().await;
    let client = client_for_server(&server);
    seed_upload(&server, &client).await;

    Mock::given(method("GET"))
        .and(path("/faturamento/options"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uf": ["SC"],
            "ano": 2025
        })))
        .mount(&server)
        .await;

    let workflow = client.workflow();
    workflow.fetch_options().await.expect("options");

    assert!(workflow.set_text("nope", "x").expect_err("unknown").is_precondition());
    assert!(workflow
        .set_text("uf", "SC")
        .expect_err("choice field")
        .is_precondition());
    assert!(workflow
        .set_choices("ano", vec!["2025".into()])
        .expect_err("text field")
        .is_precondition());
    assert!(workflow
        .set_choices("uf", vec!["XX".into()])
        .expect_err("unknown choice")
        .is_precondition());
}

#[tokio::test]
async fn failures_are_reported_to_the_log_sink() {
    let records: Arc<Mutex<Vec<LogRecord>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = records.clone();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"detail": "boom"})))
        .mount(&server)
        .await;

    let client = Client::new(Config {
        base_url: Some(server.uri()),
        logs: Some(LogCallbacks::sink(move |record| {
            sink.lock().expect("mutex should not be poisoned").push(record);
        })),
        ..Default::default()
    })
    .expect("client");

    let _ = client.workflow().health_check().await;

    let records = records.lock().expect("mutex should not be poisoned");
    assert!(records
        .iter()
        .any(|r| r.level == LogLevel::Error && r.message.contains("health check rejected")));
}
