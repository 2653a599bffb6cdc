//! The report workflow: status probe, file upload, option fetch, report
//! generation, plus the field-edit commands and session view a presentation
//! layer drives.

use std::{path::Path, sync::Arc};

use chrono::Utc;
use reqwest::{
    header::CONTENT_TYPE,
    multipart::{Form, Part},
    Method, StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{
    client::ClientInner,
    errors::{Error, PreconditionError, Result},
    form::FieldKind,
    http::{content_disposition_filename, parse_api_error_parts, to_transport_error},
    report::{GeneratedReport, ReportBody},
    session::{OptionsView, SelectionValue, SessionSnapshot, SessionState, UploadHandle},
    UPLOAD_FIELD_FALLBACK, UPLOAD_FIELD_PRIMARY, UPLOAD_ID_KEY,
};

/// Response keys the server may use for the upload identifier, in lookup
/// priority order. The service does not document a canonical form.
const UPLOAD_ID_RESPONSE_KEYS: [&str; 3] = ["upload_id", "uploadId", "id"];

/// Response keys that may carry the stored filename.
const DISPLAY_NAME_RESPONSE_KEYS: [&str; 2] = ["filename", "file_name"];

/// A file to upload: a name and its contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSource {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl UploadSource {
    pub fn from_bytes(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk. Read failures stay local; no request is made.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                PreconditionError::new(format!("{} has no file name", path.display()))
                    .with_field("file")
            })?;
        let bytes = tokio::fs::read(path).await.map_err(|err| {
            Error::Precondition(
                PreconditionError::new(format!("failed to read {}: {err}", path.display()))
                    .with_field("file"),
            )
        })?;
        Ok(Self { file_name, bytes })
    }
}

/// Result of the status probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Health {
    /// The service's self-reported status string, when the body was JSON.
    pub status: Option<String>,
    /// Raw response body, when it parsed as JSON.
    pub raw: Option<Value>,
}

impl Health {
    /// Whether the service reported the affirmative `"ok"` status.
    pub fn is_affirmative(&self) -> bool {
        self.status.as_deref() == Some("ok")
    }
}

/// Successful upload: the live handle plus which multipart field name the
/// server accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadReceipt {
    pub handle: UploadHandle,
    pub field_name: String,
}

enum UploadAttempt {
    Accepted(reqwest::Response),
    Rejected { status: StatusCode, body: String },
}

/// Client for the report workflow operations.
///
/// All operations are idempotent at the state level: repeating one is safe
/// and simply re-executes the side effect. Failures leave the session in a
/// consistent shape, so any operation can be retried by re-invoking it.
#[derive(Clone)]
pub struct WorkflowClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl WorkflowClient {
    /// Bounded-time status probe. Does not touch the session.
    pub async fn health_check(&self) -> Result<Health> {
        let builder = self.inner.request(Method::GET, "/health")?;
        let resp = match self.inner.send(builder, self.inner.timeouts.health).await {
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
            let body = resp.text().await.unwrap_or_default();
            let err = parse_api_error_parts(status, body);
            self.inner.journal.error(
                "health check rejected",
                Some(json!({"status": err.status, "body": err.raw_body})),
            );
            return Err(err.into());
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(to_transport_error)?;
        let health = parse_health(&bytes);
        self.inner.journal.info(
            "health check ok",
            health.raw.clone().or(Some(json!({"ok": true}))),
        );
        Ok(health)
    }

    /// Upload a file, replacing the live upload handle on success.
    ///
    /// The multipart field is named `file`; if the server rejects that
    /// request, exactly one sequential retry is made under the alternate
    /// name `arquivo` before giving up.
    pub async fn upload(&self, source: UploadSource) -> Result<UploadReceipt> {
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

        let (resp, field_name) = match self.attempt_upload(&source, UPLOAD_FIELD_PRIMARY).await? {
            UploadAttempt::Accepted(resp) => (resp, UPLOAD_FIELD_PRIMARY),
            UploadAttempt::Rejected { status, .. } => {
                self.inner.journal.warn(
                    "upload rejected; retrying with fallback field",
                    Some(json!({"status": status.as_u16(), "field": UPLOAD_FIELD_FALLBACK})),
                );
                match self.attempt_upload(&source, UPLOAD_FIELD_FALLBACK).await? {
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

        let bytes = resp
            .bytes()
            .await
            .map_err(to_transport_error)?;
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

    async fn attempt_upload(&self, source: &UploadSource, field: &str) -> Result<UploadAttempt> {
        let part = Part::bytes(source.bytes.clone()).file_name(source.file_name.clone());
        let form = Form::new().part(field.to_string(), part);
        let builder = self.inner.request(Method::POST, "/upload")?.multipart(form);
        let resp = match self.inner.send(builder, self.inner.timeouts.upload).await {
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
            let body = resp.text().await.unwrap_or_default();
            Ok(UploadAttempt::Rejected { status, body })
        }
    }

    /// Fetch the options schema for the live upload, replacing the previous
    /// schema wholesale and clearing every selection.
    pub async fn fetch_options(&self) -> Result<OptionsView> {
        let (upload_id, epoch) = {
            let session = self.inner.session();
            match &session.upload {
                Some(handle) => (handle.upload_id.clone(), session.epoch),
                None => {
                    let err = PreconditionError::new("upload a file first (no upload id)")
                        .with_field(UPLOAD_ID_KEY);
                    self.inner
                        .journal
                        .error("options fetch refused", Some(json!({"reason": err.message.clone()})));
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
        let resp = match self.inner.send(builder, self.inner.timeouts.options).await {
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
            let body = resp.text().await.unwrap_or_default();
            let err = parse_api_error_parts(status, body);
            self.inner.journal.error(
                "options fetch rejected",
                Some(json!({"status": err.status, "body": err.raw_body})),
            );
            return Err(err.into());
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(to_transport_error)?;
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

    /// Submit the current selections and return the generated report.
    ///
    /// Never retried: generation is assumed non-idempotent server-side, so a
    /// rejection is surfaced for the caller to decide.
    pub async fn generate(&self) -> Result<GeneratedReport> {
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

        self.inner
            .journal
            .info("generating report", Some(Value::Object(payload.clone())));

        let builder = self
            .inner
            .request(Method::POST, "/faturamento/gerar")?
            .json(&payload);
        let resp = match self.inner.send(builder, self.inner.timeouts.generate).await {
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
            let body = resp.text().await.unwrap_or_default();
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
        let bytes = resp
            .bytes()
            .await
            .map_err(to_transport_error)?;

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

    /// Clear the whole session: handle, schema, descriptors, selections.
    /// Calling it twice in a row is equivalent to calling it once.
    pub fn reset_session(&self) {
        self.inner.session().reset();
        self.inner.journal.info("session reset", None);
    }

    /// Record a text edit for a `Text` or `OpaqueJson` field. The raw edited
    /// string replaces the selection entry; no coercion or re-parsing.
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
        session
            .selections
            .insert(key.to_string(), SelectionValue::Text(value.into()));
        Ok(())
    }

    /// Record a multi-choice selection: zero, one, or many of the field's
    /// choice values, kept in the order given.
    pub fn set_choices(&self, key: &str, values: Vec<String>) -> Result<()> {
        let mut session = self.inner.session();
        let field = session
            .field(key)
            .ok_or_else(|| PreconditionError::new("unknown field").with_field(key))?;
        let FieldKind::MultiChoice { choices } = &field.kind else {
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
        session
            .selections
            .insert(key.to_string(), SelectionValue::Multi(values));
        Ok(())
    }

    /// Owned copy of the session for rendering.
    pub fn session(&self) -> SessionSnapshot {
        self.inner.session().snapshot()
    }
}

/// Interpret the status-probe body. A non-JSON success body degrades to an
/// unknown status, not an error.
pub(crate) fn parse_health(bytes: &[u8]) -> Health {
    let raw = serde_json::from_slice::<Value>(bytes).ok();
    Health {
        status: raw
            .as_ref()
            .and_then(|v| v.get("status"))
            .and_then(Value::as_str)
            .map(str::to_string),
        raw,
    }
}

/// Interpret an options body. Anything that is not a JSON object degrades to
/// the empty schema; the second element carries the offending body for the
/// caller to log.
pub(crate) fn parse_options_schema(bytes: &[u8]) -> (crate::form::OptionsSchema, Option<Value>) {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => (map, None),
        Ok(other) => (Map::new(), Some(other)),
        Err(_) => (
            Map::new(),
            Some(json!({"body": String::from_utf8_lossy(bytes)})),
        ),
    }
}

/// Dispatch a successful generate response on its declared content type.
/// Returns the artifact plus whether a declared-JSON body failed to parse
/// and was kept as raw bytes instead.
pub(crate) fn interpret_report(
    content_type: String,
    disposition_name: Option<String>,
    bytes: Vec<u8>,
) -> (GeneratedReport, bool) {
    let millis = Utc::now().timestamp_millis();

    if content_type.contains("application/json") || content_type.contains("text/json") {
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => {
                return (
                    GeneratedReport {
                        file_name: format!("relatorio_{millis}.json"),
                        content_type,
                        body: ReportBody::Json(value),
                    },
                    false,
                );
            }
            Err(_) => {
                let file_name =
                    disposition_name.unwrap_or_else(|| format!("relatorio_{millis}"));
                return (
                    GeneratedReport {
                        file_name,
                        content_type,
                        body: ReportBody::Binary(bytes),
                    },
                    true,
                );
            }
        }
    }

    let file_name = disposition_name.unwrap_or_else(|| format!("relatorio_{millis}"));
    (
        GeneratedReport {
            file_name,
            content_type,
            body: ReportBody::Binary(bytes),
        },
        false,
    )
}

/// Identifier text for an upload id value: strings verbatim, numbers
/// stringified, anything else unusable.
fn ident_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn parse_upload_handle(bytes: &[u8], source_name: &str) -> Result<UploadHandle> {
    let body: Value = serde_json::from_slice(bytes).map_err(|_| {
        crate::errors::MalformedError::new("upload response was not JSON")
            .with_body(String::from_utf8_lossy(bytes).into_owned())
    })?;

    let upload_id = UPLOAD_ID_RESPONSE_KEYS
        .iter()
        .find_map(|key| body.get(key).and_then(ident_text))
        .ok_or_else(|| {
            crate::errors::MalformedError::new("upload response carried no identifier")
                .with_body(body.to_string())
        })?;

    let display_name = DISPLAY_NAME_RESPONSE_KEYS
        .iter()
        .find_map(|key| body.get(key).and_then(Value::as_str))
        .unwrap_or(source_name)
        .to_string();

    Ok(UploadHandle {
        upload_id,
        display_name,
    })
}

/// Outgoing generate payload: selections in field order, identifier last so
/// the reserved `upload_id` key always wins a collision with a schema key.
pub(crate) fn build_generate_payload(session: &SessionState) -> Map<String, Value> {
    let mut payload = Map::new();
    for field in &session.fields {
        if let Some(selection) = session.selections.get(&field.key) {
            let value = match selection {
                SelectionValue::Text(text) => Value::String(text.clone()),
                SelectionValue::Multi(values) => Value::Array(
                    values.iter().map(|v| Value::String(v.clone())).collect(),
                ),
            };
            payload.insert(field.key.clone(), value);
        }
    }
    if let Some(handle) = &session.upload {
        payload.insert(
            UPLOAD_ID_KEY.to_string(),
            Value::String(handle.upload_id.clone()),
        );
    }
    payload
}
