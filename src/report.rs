//! Generated report artifacts.

use std::{
    io,
    path::{Path, PathBuf},
};

use serde_json::Value;

/// Body of a generated report, split by the response's declared content
/// type. Some deployments return a JSON descriptor object instead of a
/// binary file; both are usable outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportBody {
    Json(Value),
    Binary(Vec<u8>),
}

/// A downloadable artifact produced by a generate call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedReport {
    /// Resolved download name: taken from `Content-Disposition` when the
    /// server sent one, otherwise a timestamp-based fallback.
    pub file_name: String,
    /// The response's declared content type, verbatim.
    pub content_type: String,
    pub body: ReportBody,
}

impl GeneratedReport {
    pub fn is_json(&self) -> bool {
        matches!(self.body, ReportBody::Json(_))
    }

    /// Parsed JSON payload, when the report is a JSON descriptor.
    pub fn json(&self) -> Option<&Value> {
        match &self.body {
            ReportBody::Json(value) => Some(value),
            ReportBody::Binary(_) => None,
        }
    }

    /// Bytes to write to disk: pretty-printed for JSON reports, verbatim
    /// for binary ones.
    pub fn to_bytes(&self) -> Vec<u8> {
        match &self.body {
            ReportBody::Json(value) => {
                // Pretty-printing a Value cannot fail.
                serde_json::to_vec_pretty(value).unwrap_or_else(|_| value.to_string().into_bytes())
            }
            ReportBody::Binary(bytes) => bytes.clone(),
        }
    }

    /// Write the artifact into `dir` under its resolved name, returning the
    /// full path. Any directory components in a server-sent name are
    /// discarded so the artifact always lands inside `dir`.
    pub fn persist_to(&self, dir: &Path) -> io::Result<PathBuf> {
        let name = Path::new(&self.file_name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "relatorio".to_string());
        let path = dir.join(name);
        std::fs::write(&path, self.to_bytes())?;
        Ok(path)
    }
}
