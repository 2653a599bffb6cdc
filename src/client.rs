use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use reqwest::Method;

use crate::{
    errors::{Error, Result, TransportError, TransportErrorKind},
    http::to_transport_error,
    session::SessionState,
    telemetry::{Journal, LogCallbacks},
    workflow::WorkflowClient,
    CLIENT_HEADER, DEFAULT_BASE_URL, DEFAULT_CLIENT_HEADER, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_GENERATE_TIMEOUT, DEFAULT_HEALTH_TIMEOUT, DEFAULT_OPTIONS_TIMEOUT,
    DEFAULT_UPLOAD_TIMEOUT,
};

/// Client configuration. Every field is optional; defaults point at the
/// production deployment with the standard per-operation deadlines.
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// API base address. Trailing slashes are trimmed.
    pub base_url: Option<String>,
    /// Bring-your-own reqwest client (connection pools, proxies).
    pub http_client: Option<reqwest::Client>,
    /// Override the connect timeout (defaults to 5s).
    pub connect_timeout: Option<Duration>,
    /// Status-probe deadline (defaults to 20s).
    pub health_timeout: Option<Duration>,
    /// Upload deadline; file transfer may be slow (defaults to 120s).
    pub upload_timeout: Option<Duration>,
    /// Options-fetch deadline (defaults to 120s).
    pub options_timeout: Option<Duration>,
    /// Report-generation deadline, the longest of the four (defaults to 180s).
    pub generate_timeout: Option<Duration>,
    /// Sink for human-readable progress/error records.
    pub logs: Option<LogCallbacks>,
}

/// Per-operation request deadlines.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Timeouts {
    pub(crate) health: Duration,
    pub(crate) upload: Duration,
    pub(crate) options: Duration,
    pub(crate) generate: Duration,
}

#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
pub(crate) struct ClientInner {
    pub(crate) base_url: reqwest::Url,
    pub(crate) http: reqwest::Client,
    pub(crate) timeouts: Timeouts,
    pub(crate) journal: Journal,
    session: Mutex<SessionState>,
}

impl Client {
    pub fn new(cfg: Config) -> Result<Self> {
        let base = cfg
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let base_url = reqwest::Url::parse(&base)
            .map_err(|err| Error::Config(format!("invalid base url: {err}")))?;

        let connect_timeout = cfg.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let timeouts = Timeouts {
            health: cfg.health_timeout.unwrap_or(DEFAULT_HEALTH_TIMEOUT),
            upload: cfg.upload_timeout.unwrap_or(DEFAULT_UPLOAD_TIMEOUT),
            options: cfg.options_timeout.unwrap_or(DEFAULT_OPTIONS_TIMEOUT),
            generate: cfg.generate_timeout.unwrap_or(DEFAULT_GENERATE_TIMEOUT),
        };

        let http = match cfg.http_client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .connect_timeout(connect_timeout)
                .build()
                .map_err(|err| TransportError {
                    kind: TransportErrorKind::Connect,
                    message: "failed to build http client".to_string(),
                    source: Some(err),
                })?,
        };

        Ok(Self {
            inner: Arc::new(ClientInner {
                base_url,
                http,
                timeouts,
                journal: Journal::new(cfg.logs),
                session: Mutex::new(SessionState::default()),
            }),
        })
    }

    /// The report workflow: health probe, upload, options, generate.
    pub fn workflow(&self) -> WorkflowClient {
        WorkflowClient {
            inner: self.inner.clone(),
        }
    }
}

impl ClientInner {
    pub(crate) fn request(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder> {
        let url = self
            .base_url
            .join(path)
            .map_err(|err| Error::Config(format!("invalid path: {err}")))?;
        Ok(self
            .http
            .request(method, url)
            .header(CLIENT_HEADER, DEFAULT_CLIENT_HEADER))
    }

    /// Send one request with its per-operation deadline. The deadline aborts
    /// the in-flight transfer; expiry surfaces as a timeout-kind transport
    /// error. No retries happen at this layer.
    pub(crate) async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<reqwest::Response> {
        #[cfg(feature = "tracing")]
        let span = tracing::debug_span!("faturamento.http", timeout_ms = timeout.as_millis() as u64);
        #[cfg(feature = "tracing")]
        let _guard = span.enter();

        match builder.timeout(timeout).send().await {
            Ok(resp) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(status = %resp.status(), "request completed");
                Ok(resp)
            }
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %err, "transport error");
                Err(to_transport_error(err))
            }
        }
    }

    /// Lock the session. A poisoned lock is recovered rather than
    /// propagated: session mutations are single synchronous steps, so the
    /// state behind a poisoned lock is still consistent.
    pub(crate) fn session(&self) -> MutexGuard<'_, SessionState> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
