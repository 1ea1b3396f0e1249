//! Integration tests for mistral-ocr-pipeline.
//!
//! Every test runs against an in-process axum server bound to an ephemeral
//! port on 127.0.0.1, standing in for both the OCR provider and the chat
//! endpoint. No network access or API keys are needed.
//!
//! Run with:
//!   cargo test --test pipeline -- --nocapture

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use mistral_ocr_pipeline::{
    analyze_only, run, run_from_bytes, run_ocr_only, AnalysisConfig, ChatBackend, PipelineConfig,
    PipelineProgressCallback, PipelineState, ReferenceStrategy,
};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const PDF: &[u8] = b"%PDF-1.4\n1 0 obj << /Type /Catalog >> endobj\n%%EOF\n";

// ── Mock provider ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Recorded {
    path: String,
    query: Option<String>,
    auth: Option<String>,
    body: Vec<u8>,
}

impl Recorded {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("request body is JSON")
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Clone)]
struct Mock {
    calls: Arc<Mutex<Vec<Recorded>>>,
    base: Arc<Mutex<String>>,
    upload_status: u16,
    upload_body: Value,
    url_status: u16,
    url_body: Option<Value>,
    ocr_status: u16,
    ocr_body: Value,
    ocr_delay: Duration,
    chat_reply: String,
}

impl Default for Mock {
    fn default() -> Self {
        Self {
            calls: Arc::default(),
            base: Arc::default(),
            upload_status: 200,
            upload_body: json!({"id": "file-123", "purpose": "ocr"}),
            url_status: 200,
            url_body: None,
            ocr_status: 200,
            ocr_body: json!({
                "model": "mistral-ocr-2505",
                "pages": [
                    {"index": 0, "markdown": "# Invoice\nTotal: 42"},
                    {"index": 1, "markdown": ""},
                    {"index": 2, "markdown": "Thank you"}
                ],
                "usage_info": {"pages_processed": 3}
            }),
            ocr_delay: Duration::ZERO,
            chat_reply: "```json\n{\"total\": 42}\n```".into(),
        }
    }
}

impl Mock {
    fn calls(&self) -> Vec<Recorded> {
        self.calls.lock().unwrap().clone()
    }

    fn call(&self, path: &str) -> Recorded {
        self.calls()
            .into_iter()
            .find(|c| c.path == path)
            .unwrap_or_else(|| panic!("no request to {path}"))
    }

    fn signed_url(&self) -> String {
        format!("{}/signed/sample.pdf?sig=abc", self.base.lock().unwrap())
    }
}

async fn handle(State(mock): State<Mock>, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    mock.calls.lock().unwrap().push(Recorded {
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        auth: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: body.to_vec(),
    });

    match uri.path() {
        "/v1/files" => {
            let status = StatusCode::from_u16(mock.upload_status).unwrap();
            (status, Json(mock.upload_body.clone())).into_response()
        }
        "/v1/files/file-123/url" => {
            let status = StatusCode::from_u16(mock.url_status).unwrap();
            let body = mock
                .url_body
                .clone()
                .unwrap_or_else(|| json!({"url": mock.signed_url()}));
            (status, Json(body)).into_response()
        }
        "/v1/ocr" => {
            tokio::time::sleep(mock.ocr_delay).await;
            let status = StatusCode::from_u16(mock.ocr_status).unwrap();
            (status, Json(mock.ocr_body.clone())).into_response()
        }
        "/v1/chat/completions" => Json(json!({
            "choices": [{"message": {"role": "assistant", "content": mock.chat_reply}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 8, "total_tokens": 128}
        }))
        .into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Start the mock and return its `/v1` base URL.
async fn start(mock: &Mock) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base = format!("http://{addr}/v1");
    *mock.base.lock().unwrap() = base.clone();

    let app = Router::new().fallback(handle).with_state(mock.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    base
}

// ── Test helpers ─────────────────────────────────────────────────────────────

fn write_pdf(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("sample.pdf");
    std::fs::write(&path, PDF).unwrap();
    path
}

fn write_template(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("sample.json");
    std::fs::write(&path, r#"{"total": 0}"#).unwrap();
    path
}

fn base_config(base: &str, out: &Path) -> mistral_ocr_pipeline::PipelineConfigBuilder {
    PipelineConfig::builder()
        .api_key("test-key")
        .api_base_url(base)
        .output_dir(out)
}

#[derive(Default)]
struct Recorder {
    states: Mutex<Vec<PipelineState>>,
    urls: Mutex<Vec<(String, u32)>>,
}

impl PipelineProgressCallback for Recorder {
    fn on_transition(&self, _from: &PipelineState, to: &PipelineState) {
        self.states.lock().unwrap().push(to.clone());
    }

    fn on_signed_url(&self, url: &str, expiry_hours: u32) {
        self.urls.lock().unwrap().push((url.to_string(), expiry_hours));
    }
}

// ── Reference strategies ─────────────────────────────────────────────────────

#[tokio::test]
async fn upload_flow_persists_json_and_markdown() {
    let mock = Mock::default();
    let base = start(&mock).await;
    let tmp = tempfile::tempdir().unwrap();
    let pdf = write_pdf(tmp.path());
    let out = tmp.path().join("output");

    let config = base_config(&base, &out).build().unwrap();
    let output = run(&pdf, &config).await.unwrap();

    // Upload is multipart with purpose=ocr and the file part.
    let upload = mock.call("/v1/files");
    assert_eq!(upload.auth.as_deref(), Some("Bearer test-key"));
    let form = upload.text();
    assert!(form.contains("name=\"purpose\""), "form: {form}");
    assert!(form.contains("\r\n\r\nocr\r\n"));
    assert!(form.contains("filename=\"sample.pdf\""));
    assert!(form.contains("%PDF-1.4"));

    let url_call = mock.call("/v1/files/file-123/url");
    assert_eq!(url_call.query.as_deref(), Some("expiry=24"));

    let ocr = mock.call("/v1/ocr").json();
    assert_eq!(ocr["model"], "mistral-ocr-latest");
    assert_eq!(ocr["document"]["type"], "document_url");
    assert_eq!(ocr["document"]["document_url"], mock.signed_url());
    assert_eq!(ocr["include_image_base64"], true);

    assert_eq!(output.signed_url.as_deref(), Some(mock.signed_url().as_str()));
    assert!(output.analysis.is_none());

    let artifacts = output.artifacts.unwrap();
    assert_eq!(artifacts.page_count, 3);
    let saved: Value =
        serde_json::from_str(&std::fs::read_to_string(&artifacts.json_path).unwrap()).unwrap();
    assert_eq!(saved, mock.ocr_body);
    let md = std::fs::read_to_string(artifacts.markdown_path.unwrap()).unwrap();
    assert_eq!(md, "# Invoice\nTotal: 42\n\nThank you");
}

#[tokio::test]
async fn inline_flow_sends_data_url_without_upload() {
    let mock = Mock::default();
    let base = start(&mock).await;
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out");

    let config = base_config(&base, &out)
        .strategy(ReferenceStrategy::Inline)
        .include_image_base64(false)
        .build()
        .unwrap();
    let output = run_from_bytes("sample.pdf", PDF.to_vec(), &config).await.unwrap();

    let paths: Vec<String> = mock.calls().into_iter().map(|c| c.path).collect();
    assert_eq!(paths, vec!["/v1/ocr".to_string()]);

    let ocr = mock.call("/v1/ocr").json();
    let url = ocr["document"]["document_url"].as_str().unwrap();
    assert!(url.starts_with("data:application/pdf;base64,JVBERi0xLjQ"));
    assert_eq!(ocr["include_image_base64"], false);
    assert!(output.signed_url.is_none());
    assert!(out.join("ocr_output.json").exists());
}

#[tokio::test]
async fn reuse_flow_skips_upload_and_file_read() {
    let mock = Mock::default();
    let base = start(&mock).await;
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out");

    let config = base_config(&base, &out)
        .strategy(ReferenceStrategy::Reuse)
        .prior_url("https://files.example/doc.pdf?sig=old")
        .build()
        .unwrap();
    // The path does not exist: reuse never reads it.
    let output = run(tmp.path().join("missing.pdf"), &config).await.unwrap();

    assert_eq!(mock.calls().len(), 1);
    let ocr = mock.call("/v1/ocr").json();
    assert_eq!(
        ocr["document"]["document_url"],
        "https://files.example/doc.pdf?sig=old"
    );
    assert!(output.signed_url.is_none());
}

#[tokio::test]
async fn reuse_without_url_falls_back_to_upload() {
    let mock = Mock::default();
    let base = start(&mock).await;
    let tmp = tempfile::tempdir().unwrap();
    let pdf = write_pdf(tmp.path());

    let config = base_config(&base, &tmp.path().join("out"))
        .strategy(ReferenceStrategy::Reuse)
        .prior_url("   ")
        .build()
        .unwrap();
    let output = run(&pdf, &config).await.unwrap();

    mock.call("/v1/files");
    assert_eq!(output.signed_url.as_deref(), Some(mock.signed_url().as_str()));
}

#[tokio::test]
async fn non_pdf_input_is_rejected_before_any_request() {
    let mock = Mock::default();
    let base = start(&mock).await;
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("notes.pdf");
    std::fs::write(&path, b"hello world").unwrap();

    let config = base_config(&base, &tmp.path().join("out")).build().unwrap();
    let err = run(&path, &config).await.unwrap_err();

    assert_eq!(err.kind(), "ConfigurationError");
    assert!(mock.calls().is_empty());
}

// ── Upload failures ──────────────────────────────────────────────────────────

/// Run an upload against `mock` and check that OCR never ran.
async fn failed_upload(mock: Mock) -> mistral_ocr_pipeline::OcrPipelineError {
    let base = start(&mock).await;
    let tmp = tempfile::tempdir().unwrap();
    let pdf = write_pdf(tmp.path());
    let out = tmp.path().join("out");

    let config = base_config(&base, &out).build().unwrap();
    let err = run(&pdf, &config).await.unwrap_err();

    assert!(mock.calls().iter().all(|c| c.path != "/v1/ocr"));
    assert!(!out.join("ocr_output.json").exists());
    err
}

#[tokio::test]
async fn upload_error_status_is_upload_error() {
    let err = failed_upload(Mock {
        upload_status: 503,
        upload_body: json!({"error": "storage unavailable"}),
        ..Mock::default()
    })
    .await;

    assert_eq!(err.kind(), "UploadError");
    assert_eq!(err.status(), Some(503));
    assert!(err.to_string().contains("storage unavailable"));
}

#[tokio::test]
async fn upload_without_file_id_is_url_retrieval_error() {
    let err = failed_upload(Mock {
        upload_body: json!({"purpose": "ocr"}),
        ..Mock::default()
    })
    .await;
    assert_eq!(err.kind(), "UrlRetrievalError");

    let err = failed_upload(Mock {
        upload_body: json!({"id": ""}),
        ..Mock::default()
    })
    .await;
    assert_eq!(err.kind(), "UrlRetrievalError");
}

#[tokio::test]
async fn signed_url_error_status_is_url_retrieval_error() {
    let err = failed_upload(Mock {
        url_status: 404,
        url_body: Some(json!({"detail": "file not found"})),
        ..Mock::default()
    })
    .await;

    assert_eq!(err.kind(), "UrlRetrievalError");
    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn empty_signed_url_is_url_retrieval_error() {
    let err = failed_upload(Mock {
        url_body: Some(json!({"url": ""})),
        ..Mock::default()
    })
    .await;

    assert_eq!(err.kind(), "UrlRetrievalError");
}

// ── OCR failures ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn ocr_error_status_fails_without_writing_output() {
    let mock = Mock {
        ocr_status: 422,
        ocr_body: json!({"detail": "document_url is not reachable"}),
        ..Mock::default()
    };
    let base = start(&mock).await;
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out");

    let config = base_config(&base, &out)
        .strategy(ReferenceStrategy::Inline)
        .build()
        .unwrap();
    let err = run_from_bytes("sample.pdf", PDF.to_vec(), &config)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "ApiError");
    assert_eq!(err.status(), Some(422));
    assert!(err.to_string().contains("document_url is not reachable"));
    assert!(!out.join("ocr_output.json").exists());
}

#[tokio::test]
async fn ocr_timeout_fails_without_writing_output() {
    let mock = Mock {
        ocr_delay: Duration::from_secs(3),
        ..Mock::default()
    };
    let base = start(&mock).await;
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out");

    let config = base_config(&base, &out)
        .strategy(ReferenceStrategy::Inline)
        .ocr_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let err = run_from_bytes("sample.pdf", PDF.to_vec(), &config)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "TimeoutError");
    assert!(!out.join("ocr_output.json").exists());
}

#[tokio::test]
async fn non_json_ocr_reply_is_invalid_response() {
    let mock = Mock {
        ocr_body: Value::String("not an object".into()),
        ..Mock::default()
    };
    let base = start(&mock).await;
    let tmp = tempfile::tempdir().unwrap();

    let config = base_config(&base, &tmp.path().join("out"))
        .strategy(ReferenceStrategy::Inline)
        .build()
        .unwrap();
    let err = run_from_bytes("sample.pdf", PDF.to_vec(), &config)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "InvalidResponseError");
}

// ── Analysis ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn analysis_runs_after_ocr_and_strips_fences() {
    let mock = Mock::default();
    let base = start(&mock).await;
    let tmp = tempfile::tempdir().unwrap();
    let pdf = write_pdf(tmp.path());
    let template = write_template(tmp.path());
    let out = tmp.path().join("out");

    let analysis = AnalysisConfig::new(ChatBackend::compatible(&base, None), &template)
        .with_model("local-model")
        .with_temperature(0.0);
    let config = base_config(&base, &out).analysis(analysis).build().unwrap();
    let output = run(&pdf, &config).await.unwrap();

    let chat = mock.call("/v1/chat/completions");
    assert!(chat.auth.is_none(), "no key configured, no header sent");
    let body = chat.json();
    assert_eq!(body["model"], "local-model");
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "system");
    let prompt = messages[1]["content"].as_str().unwrap();
    assert!(prompt.contains("Thank you"), "OCR JSON embedded");
    assert!(prompt.contains(r#"{"total": 0}"#), "template embedded");

    let analysis = output.analysis.unwrap();
    assert!(analysis.is_valid_json);
    assert_eq!(analysis.result, json!({"total": 42}));
    let usage = analysis.usage.unwrap();
    assert_eq!((usage.input_tokens, usage.output_tokens, usage.total_tokens), (120, 8, 128));

    let saved: Value =
        serde_json::from_str(&std::fs::read_to_string(out.join("openai_analysis_output.json")).unwrap())
            .unwrap();
    assert_eq!(saved, json!({"total": 42}));
}

#[tokio::test]
async fn ocr_only_run_ignores_analysis_settings() {
    let mock = Mock::default();
    let base = start(&mock).await;
    let tmp = tempfile::tempdir().unwrap();
    let pdf = write_pdf(tmp.path());
    let template = write_template(tmp.path());
    let out = tmp.path().join("out");

    let config = base_config(&base, &out)
        .analysis(AnalysisConfig::new(ChatBackend::compatible(&base, None), &template))
        .build()
        .unwrap();
    let output = run_ocr_only(&pdf, &config).await.unwrap();

    assert!(output.analysis.is_none());
    assert!(mock.calls().iter().all(|c| c.path != "/v1/chat/completions"));
    assert!(!out.join("openai_analysis_output.json").exists());
}

#[tokio::test]
async fn analysis_keeps_non_json_reply_verbatim() {
    let mock = Mock {
        chat_reply: "I could not find a total.".into(),
        ..Mock::default()
    };
    let base = start(&mock).await;
    let tmp = tempfile::tempdir().unwrap();
    let template = write_template(tmp.path());
    let out = tmp.path().join("out");
    std::fs::create_dir_all(&out).unwrap();
    std::fs::write(out.join("ocr_output.json"), r#"{"pages": []}"#).unwrap();

    let analysis = AnalysisConfig::new(
        ChatBackend::compatible(&base, Some("chat-key".into())),
        &template,
    );
    let config = PipelineConfig::builder()
        .output_dir(&out)
        .analysis(analysis)
        .build()
        .unwrap();
    let result = analyze_only(&config).await.unwrap();

    assert_eq!(
        mock.call("/v1/chat/completions").auth.as_deref(),
        Some("Bearer chat-key")
    );
    assert!(!result.is_valid_json);
    assert_eq!(
        std::fs::read_to_string(result.output_path).unwrap(),
        "I could not find a total."
    );
}

#[tokio::test]
async fn analysis_output_keeps_reply_key_order() {
    let mock = Mock {
        chat_reply: r#"{"vendor": "ACME", "total": 42, "currency": "EUR"}"#.into(),
        ..Mock::default()
    };
    let base = start(&mock).await;
    let tmp = tempfile::tempdir().unwrap();
    let template = write_template(tmp.path());
    let out = tmp.path().join("out");
    std::fs::create_dir_all(&out).unwrap();
    std::fs::write(out.join("ocr_output.json"), r#"{"pages": []}"#).unwrap();

    let analysis = AnalysisConfig::new(ChatBackend::compatible(&base, None), &template);
    let config = PipelineConfig::builder()
        .output_dir(&out)
        .analysis(analysis)
        .build()
        .unwrap();
    let result = analyze_only(&config).await.unwrap();

    let text = std::fs::read_to_string(result.output_path).unwrap();
    let pos = |key: &str| text.find(&format!("\"{key}\"")).unwrap();
    assert!(pos("vendor") < pos("total"));
    assert!(pos("total") < pos("currency"));
}

#[tokio::test]
async fn analyze_only_without_ocr_output_is_missing_input() {
    let mock = Mock::default();
    let base = start(&mock).await;
    let tmp = tempfile::tempdir().unwrap();
    let template = write_template(tmp.path());

    let analysis = AnalysisConfig::new(ChatBackend::compatible(&base, None), &template);
    let config = PipelineConfig::builder()
        .output_dir(tmp.path().join("out"))
        .analysis(analysis)
        .build()
        .unwrap();
    let err = analyze_only(&config).await.unwrap_err();

    assert_eq!(err.kind(), "MissingInputError");
    assert!(err.to_string().contains("ocr_output.json"));
    assert!(mock.calls().is_empty());
}

// ── Progress reporting ───────────────────────────────────────────────────────

#[tokio::test]
async fn progress_reports_every_stage_in_order() {
    let mock = Mock::default();
    let base = start(&mock).await;
    let tmp = tempfile::tempdir().unwrap();
    let pdf = write_pdf(tmp.path());
    let template = write_template(tmp.path());
    let recorder = Arc::new(Recorder::default());

    let config = base_config(&base, &tmp.path().join("out"))
        .analysis(AnalysisConfig::new(ChatBackend::compatible(&base, None), &template))
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    run(&pdf, &config).await.unwrap();

    assert_eq!(
        *recorder.states.lock().unwrap(),
        vec![
            PipelineState::AcquiringReference,
            PipelineState::Ocr,
            PipelineState::Persisting,
            PipelineState::Analyzing,
            PipelineState::Done,
        ]
    );
    assert_eq!(
        *recorder.urls.lock().unwrap(),
        vec![(mock.signed_url(), 24)]
    );
}

#[tokio::test]
async fn progress_ends_in_failed_state() {
    let mock = Mock {
        ocr_status: 500,
        ocr_body: json!({"error": "boom"}),
        ..Mock::default()
    };
    let base = start(&mock).await;
    let tmp = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());

    let config = base_config(&base, &tmp.path().join("out"))
        .strategy(ReferenceStrategy::Inline)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    run_from_bytes("sample.pdf", PDF.to_vec(), &config)
        .await
        .unwrap_err();

    let states = recorder.states.lock().unwrap();
    match states.last() {
        Some(PipelineState::Failed { kind, .. }) => assert_eq!(kind, "ApiError"),
        other => panic!("expected Failed, got {other:?}"),
    }
    assert!(!states.contains(&PipelineState::Persisting));
}
