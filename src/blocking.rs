//! Blocking mirror of the workflow client, for hosts without an async
//! runtime. Interpretation of responses is shared with the async client;
//! only the transport differs.

use std::{
    path::Path,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use reqwest::{
    blocking::{
        multipart::{Form, Part},
        Client as HttpClient,
    },
    header::CONTENT_TYPE,
    Method, StatusCode, Url,
};
use serde_json::json;

use crate::{
    client::Timeouts,
    errors::{Error, PreconditionError, Result, TransportError, TransportErrorKind},
    http::{content_disposition_filename, parse_api_error_parts, to_transport_error},
    report::{GeneratedReport, ReportBody},
    session::{OptionsView, SessionSnapshot, SessionState},
    telemetry::{Journal, LogCallbacks},
    workflow::{
        build_generate_payload, interpret_report, parse_health, parse_options_schema,
        parse_upload_handle, Health, UploadReceipt, UploadSource,
    },
    CLIENT_HEADER, DEFAULT_BASE_URL, DEFAULT_CLIENT_HEADER, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_GENERATE_TIMEOUT, DEFAULT_HEALTH_TIMEOUT, DEFAULT_OPTIONS_TIMEOUT,
    DEFAULT_UPLOAD_TIMEOUT, UPLOAD_FIELD_FALLBACK, UPLOAD_FIELD_PRIMARY, UPLOAD_ID_KEY,
};

/// Blocking client configuration; mirrors [`crate::Config`].
#[derive(Clone, Debug, Default)]
pub struct BlockingConfig {
    pub base_url: Option<String>,
    pub http_client: Option<HttpClient>,
    pub connect_timeout: Option<Duration>,
    pub health_timeout: Option<Duration>,
    pub upload_timeout: Option<Duration>,
    pub options_timeout: Option<Duration>,
    pub generate_timeout: Option<Duration>,
    pub logs: Option<LogCallbacks>,
}

#[derive(Clone)]
pub struct BlockingClient {
    inner: Arc<BlockingInner>,
}

struct BlockingInner {
    base_url: Url,
    http: HttpClient,
    timeouts: Timeouts,
    journal: Journal,
    session: Mutex<SessionState>,
}

impl BlockingClient {
    pub fn new(cfg: BlockingConfig) -> Result<Self> {
        let base = cfg
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let base_url =
            Url::parse(&base).map_err(|err| Error::Config(format!("invalid base url: {err}")))?;

        let timeouts = Timeouts {
            health: cfg.health_timeout.unwrap_or(DEFAULT_HEALTH_TIMEOUT),
            upload: cfg.upload_timeout.unwrap_or(DEFAULT_UPLOAD_TIMEOUT),
            options: cfg.options_timeout.unwrap_or(DEFAULT_OPTIONS_TIMEOUT),
            generate: cfg.generate_timeout.unwrap_or(DEFAULT_GENERATE_TIMEOUT),
        };

        let http = match cfg.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .connect_timeout(cfg.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT))
                .build()
                .map_err(|err| TransportError {
                    kind: TransportErrorKind::Connect,
                    message: "failed to build http client".to_string(),
                    source: Some(err),
                })?,
        };

        Ok(Self {
            inner: Arc::new(BlockingInner {
                base_url,
                http,
                timeouts,
                journal: Journal::new(cfg.logs),
                session: Mutex::new(SessionState::default()),
            }),
        })
    }

    pub fn workflow(&self) -> BlockingWorkflowClient {
        BlockingWorkflowClient {
            inner: self.inner.clone(),
        }
    }
}

impl BlockingInner {
    fn request(&self, method: Method, path: &str) -> Result<reqwest::blocking::RequestBuilder> {
        let url = self
            .base_url
            .join(path)
            .map_err(|err| Error::Config(format!("invalid path: {err}")))?;
        Ok(self
            .http
            .request(method, url)
            .header(CLIENT_HEADER, DEFAULT_CLIENT_HEADER))
    }

    fn send(
        &self,
        builder: reqwest::blocking::RequestBuilder,
        timeout: Duration,
    ) -> Result<reqwest::blocking::Response> {
        builder.timeout(timeout).send().map_err(to_transport_error)
    }

    fn session(&self) -> MutexGuard<'_, SessionState> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl UploadSource {
    /// Read a file from disk without an async runtime.
    pub fn from_path_blocking(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                PreconditionError::new(format!("{} has no file name", path.display()))
                    .with_field("file")
            })?;
        let bytes = std::fs::read(path).map_err(|err| {
            Error::Precondition(
                PreconditionError::new(format!("failed to read {}: {err}", path.display()))
                    .with_field("file"),
            )
        })?;
        Ok(Self { file_name, bytes })
    }
}

enum UploadAttempt {
    Accepted(reqwest::blocking::Response),
    Rejected { status: StatusCode, body: String },
}

/// Blocking mirror of [`crate::WorkflowClient`].
#[derive(Clone)]
pub struct BlockingWorkflowClient {
    inner: Arc<BlockingInner>,
}

impl BlockingWorkflowClient {
    pub fn health_check(&self) -> Result<Health> {
        let builder = self.inner.request(Method::GET, "/health")?;
        let resp = match self.inner.send(builder, self.inner.timeouts.health) {
            Ok(resp) => resp,
            Err(err) => {
                self.inner
                    .journal
                    .error("health check failed", Some(json!({"error": err.to_string()})));
                return Err(err);
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            let err = parse_api_error_parts(status, body);
            self.inner.journal.error(
                "health check rejected",
                Some(json!({"status": err.status, "body": err.raw_body})),
            );
            return Err(err.into());
        }

        let bytes = resp.bytes().map_err(to_transport_error)?;
        let health = parse_health(&bytes);
        self.inner.journal.info(
            "health check ok",
            health.raw.clone().or(Some(json!({"ok": true}))),
        );
        Ok(health)
    }

    pub fn upload(&self, source: UploadSource) -> Result<UploadReceipt> {
        if source.file_name.trim().is_empty() || source.bytes.is_empty() {
            let err = PreconditionError::new("select a file before uploading").with_field("file");
            self.inner
                .journal
                .error("upload refused", Some(json!({"reason": err.message.clone()})));
            return Err(err.into());
        }

        let epoch = self.inner.session().epoch;
        self.inner.journal.info(
            "upload starting",
            Some(json!({"name": source.file_name, "size": source.bytes.len()})),
        );

        let (resp, field_name) = match self.attempt_upload(&source, UPLOAD_FIELD_PRIMARY)? {
            UploadAttempt::Accepted(resp) => (resp, UPLOAD_FIELD_PRIMARY),
            UploadAttempt::Rejected { status, .. } => {
                self.inner.journal.warn(
                    "upload rejected; retrying with fallback field",
                    Some(json!({"status": status.as_u16(), "field": UPLOAD_FIELD_FALLBACK})),
                );
                match self.attempt_upload(&source, UPLOAD_FIELD_FALLBACK)? {
                    UploadAttempt::Accepted(resp) => (resp, UPLOAD_FIELD_FALLBACK),
                    UploadAttempt::Rejected { status, body } => {
                        let mut err = parse_api_error_parts(status, body);
                        err.upload_field = Some(UPLOAD_FIELD_FALLBACK.to_string());
                        self.inner.journal.error(
                            "upload failed",
                            Some(json!({
                                "status": err.status,
                                "field": UPLOAD_FIELD_FALLBACK,
                                "body": err.raw_body,
                            })),
                        );
                        return Err(err.into());
                    }
                }
            }
        };

        let bytes = resp.bytes().map_err(to_transport_error)?;
        let handle = parse_upload_handle(&bytes, &source.file_name)?;

        {
            let mut session = self.inner.session();
            if session.epoch != epoch {
                self.inner.journal.warn(
                    "session changed during upload; result discarded",
                    Some(json!({"upload_id": handle.upload_id})),
                );
                return Err(PreconditionError::new(
                    "session changed during upload; result discarded",
                )
                .into());
            }
            session.commit_upload(handle.clone());
        }

        self.inner.journal.info(
            "upload ok",
            Some(json!({
                "field": field_name,
                "upload_id": handle.upload_id,
                "filename": handle.display_name,
            })),
        );
        Ok(UploadReceipt {
            handle,
            field_name: field_name.to_string(),
        })
    }

    fn attempt_upload(&self, source: &UploadSource, field: &str) -> Result<UploadAttempt> {
        let part = Part::bytes(source.bytes.clone()).file_name(source.file_name.clone());
        let form = Form::new().part(field.to_string(), part);
        let builder = self.inner.request(Method::POST, "/upload")?.multipart(form);
        let resp = match self.inner.send(builder, self.inner.timeouts.upload) {
            Ok(resp) => resp,
            Err(err) => {
                self.inner.journal.error(
                    "upload failed",
                    Some(json!({"field": field, "error": err.to_string()})),
                );
                return Err(err);
            }
        };
        let status = resp.status();
        if status.is_success() {
            Ok(UploadAttempt::Accepted(resp))
        } else {
            let body = resp.text().unwrap_or_default();
            Ok(UploadAttempt::Rejected { status, body })
        }
    }

    pub fn fetch_options(&self) -> Result<OptionsView> {
        let (upload_id, epoch) = {
            let session = self.inner.session();
            match &session.upload {
                Some(handle) => (handle.upload_id.clone(), session.epoch),
                None => {
                    let err = PreconditionError::new("upload a file first (no upload id)")
                        .with_field(UPLOAD_ID_KEY);
                    self.inner.journal.error(
                        "options fetch refused",
                        Some(json!({"reason": err.message.clone()})),
                    );
                    return Err(err.into());
                }
            }
        };

        self.inner
            .journal
            .info("fetching options", Some(json!({"upload_id": upload_id})));

        let builder = self
            .inner
            .request(Method::GET, "/faturamento/options")?
            .query(&[(UPLOAD_ID_KEY, upload_id.as_str())]);
        let resp = match self.inner.send(builder, self.inner.timeouts.options) {
            Ok(resp) => resp,
            Err(err) => {
                self.inner
                    .journal
                    .error("options fetch failed", Some(json!({"error": err.to_string()})));
                return Err(err);
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            let err = parse_api_error_parts(status, body);
            self.inner.journal.error(
                "options fetch rejected",
                Some(json!({"status": err.status, "body": err.raw_body})),
            );
            return Err(err.into());
        }

        let bytes = resp.bytes().map_err(to_transport_error)?;
        let (schema, warning) = parse_options_schema(&bytes);
        if let Some(detail) = warning {
            self.inner.journal.warn(
                "options body was not a JSON object; treating as empty",
                Some(detail),
            );
        }

        let view = {
            let mut session = self.inner.session();
            if session.epoch != epoch {
                self.inner
                    .journal
                    .warn("session changed during options fetch; result discarded", None);
                return Err(PreconditionError::new(
                    "session changed during options fetch; result discarded",
                )
                .into());
            }
            session.commit_schema(schema);
            session.snapshot().options
        };

        self.inner.journal.info(
            "options loaded",
            Some(json!({"fields": view.fields().len()})),
        );
        Ok(view)
    }

    pub fn generate(&self) -> Result<GeneratedReport> {
        let payload = {
            let session = self.inner.session();
            if session.upload.is_none() {
                let err = PreconditionError::new("upload a file first (no upload id)")
                    .with_field(UPLOAD_ID_KEY);
                self.inner
                    .journal
                    .error("generate refused", Some(json!({"reason": err.message.clone()})));
                return Err(err.into());
            }
            build_generate_payload(&session)
        };

        self.inner.journal.info(
            "generating report",
            Some(serde_json::Value::Object(payload.clone())),
        );

        let builder = self
            .inner
            .request(Method::POST, "/faturamento/gerar")?
            .json(&payload);
        let resp = match self.inner.send(builder, self.inner.timeouts.generate) {
            Ok(resp) => resp,
            Err(err) => {
                self.inner
                    .journal
                    .error("generate failed", Some(json!({"error": err.to_string()})));
                return Err(err);
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            let err = parse_api_error_parts(status, body);
            self.inner.journal.error(
                "generate rejected",
                Some(json!({"status": err.status, "body": err.raw_body})),
            );
            return Err(err.into());
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let disposition_name = content_disposition_filename(resp.headers());
        let bytes = resp.bytes().map_err(to_transport_error)?;

        let (report, degraded) = interpret_report(content_type, disposition_name, bytes.to_vec());
        if degraded {
            self.inner.journal.warn(
                "report body declared JSON but did not parse; keeping raw bytes",
                None,
            );
        }
        match &report.body {
            ReportBody::Json(value) => self
                .inner
                .journal
                .info("report generated (json)", Some(value.clone())),
            ReportBody::Binary(raw) => self.inner.journal.info(
                "report generated (file)",
                Some(json!({
                    "contentType": report.content_type,
                    "filename": report.file_name,
                    "size": raw.len(),
                })),
            ),
        }
        Ok(report)
    }

    pub fn reset_session(&self) {
        self.inner.session().reset();
        self.inner.journal.info("session reset", None);
    }

    pub fn set_text(&self, key: &str, value: impl Into<String>) -> Result<()> {
        let mut session = self.inner.session();
        let field = session
            .field(key)
            .ok_or_else(|| PreconditionError::new("unknown field").with_field(key))?;
        if field.is_multi_choice() {
            return Err(PreconditionError::new("field takes a choice list, not text")
                .with_field(key)
                .into());
        }
        session.selections.insert(
            key.to_string(),
            crate::session::SelectionValue::Text(value.into()),
        );
        Ok(())
    }

    pub fn set_choices(&self, key: &str, values: Vec<String>) -> Result<()> {
        let mut session = self.inner.session();
        let field = session
            .field(key)
            .ok_or_else(|| PreconditionError::new("unknown field").with_field(key))?;
        let crate::form::FieldKind::MultiChoice { choices } = &field.kind else {
            return Err(PreconditionError::new("field takes text, not a choice list")
                .with_field(key)
                .into());
        };
        for value in &values {
            if !choices.iter().any(|c| &c.value == value) {
                return Err(PreconditionError::new(format!("unknown choice {value:?}"))
                    .with_field(key)
                    .into());
            }
        }
        session.selections.insert(
            key.to_string(),
            crate::session::SelectionValue::Multi(values),
        );
        Ok(())
    }

    pub fn session(&self) -> SessionSnapshot {
        self.inner.session().snapshot()
    }
}
