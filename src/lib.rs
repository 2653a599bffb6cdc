//! Minimal Rust SDK for the Faturamento report generation API.
//!
//! Drives the service's three-step workflow: upload a spreadsheet, fetch
//! the dynamic option schema it unlocks, submit a selection and receive the
//! generated report (JSON descriptor or binary download). The option schema
//! is an arbitrary JSON object the service is free to reshape; this crate
//! classifies it into renderable fields and stays correct for any shape.

/// Default API base URL (the production deployment).
pub const DEFAULT_BASE_URL: &str = "https://gerador-relatorios-production-eca0.up.railway.app";

/// Default connection timeout (5 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Default status-probe deadline (20 seconds).
pub const DEFAULT_HEALTH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(20);

/// Default upload deadline (120 seconds); file transfer may be slow.
pub const DEFAULT_UPLOAD_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(120);

/// Default options-fetch deadline (120 seconds).
pub const DEFAULT_OPTIONS_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(120);

/// Default report-generation deadline (180 seconds), the longest of the four.
pub const DEFAULT_GENERATE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(180);

/// Default client identification header value.
pub(crate) const DEFAULT_CLIENT_HEADER: &str =
    concat!("faturamento-rust/", env!("CARGO_PKG_VERSION"));

/// HTTP header name for client identification.
pub(crate) const CLIENT_HEADER: &str = "x-faturamento-client";

/// Primary multipart field name for uploads.
pub const UPLOAD_FIELD_PRIMARY: &str = "file";

/// Alternate multipart field name tried once when the primary is rejected.
pub const UPLOAD_FIELD_FALLBACK: &str = "arquivo";

/// Reserved identifier key in query strings and generate payloads. Wins any
/// collision with a schema key of the same name.
pub const UPLOAD_ID_KEY: &str = "upload_id";

mod client;
mod errors;
mod form;
mod http;
mod report;
mod session;
mod telemetry;
mod workflow;

#[cfg(feature = "blocking")]
mod blocking;

pub use client::{Client, Config};
pub use errors::{
    ApiError, Error, MalformedError, PreconditionError, Result, TransportError, TransportErrorKind,
};
pub use form::{normalize, synthesize, ChoiceItem, FieldDescriptor, FieldKind, OptionsSchema};
pub use report::{GeneratedReport, ReportBody};
pub use session::{OptionsView, SelectionValue, SessionSnapshot, UploadHandle};
pub use telemetry::{LogCallbacks, LogLevel, LogRecord};
pub use workflow::{Health, UploadReceipt, UploadSource, WorkflowClient};

#[cfg(feature = "blocking")]
pub use blocking::{BlockingClient, BlockingConfig, BlockingWorkflowClient};
