use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Severity of a log record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Human-readable progress/error entry emitted by the workflow operations.
///
/// Every operation reports what it did (and every failure, before the `Err`
/// returns) so a host application can mirror the records into whatever log
/// panel it renders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    /// Contextual data (request payloads, statuses, filenames).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

/// User-provided callback for receiving log records without taking on a
/// logging-framework dependency.
#[derive(Clone, Default)]
pub struct LogCallbacks {
    pub record: Option<Arc<dyn Fn(LogRecord) + Send + Sync>>,
}

impl LogCallbacks {
    /// Route every record through the given function.
    pub fn sink(f: impl Fn(LogRecord) + Send + Sync + 'static) -> Self {
        Self {
            record: Some(Arc::new(f)),
        }
    }
}

impl fmt::Debug for LogCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogCallbacks")
            .field("record", &self.record.as_ref().map(|_| "callback"))
            .finish()
    }
}

/// Internal helper that owns the registered callback (if any).
#[derive(Clone, Default, Debug)]
pub(crate) struct Journal {
    callbacks: LogCallbacks,
}

impl Journal {
    pub(crate) fn new(callbacks: Option<LogCallbacks>) -> Self {
        Self {
            callbacks: callbacks.unwrap_or_default(),
        }
    }

    pub(crate) fn info(&self, message: impl Into<String>, detail: Option<Value>) {
        self.record(LogLevel::Info, message, detail);
    }

    pub(crate) fn warn(&self, message: impl Into<String>, detail: Option<Value>) {
        self.record(LogLevel::Warn, message, detail);
    }

    pub(crate) fn error(&self, message: impl Into<String>, detail: Option<Value>) {
        self.record(LogLevel::Error, message, detail);
    }

    fn record(&self, level: LogLevel, message: impl Into<String>, detail: Option<Value>) {
        if let Some(cb) = &self.callbacks.record {
            cb(LogRecord {
                level,
                message: message.into(),
                detail,
            });
        }
    }
}
