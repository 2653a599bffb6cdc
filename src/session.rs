//! Session state shared by the workflow operations.
//!
//! One live upload handle, one live schema, one selections map. Commits
//! always replace whole pieces of state (new upload, new schema, reset) so
//! selections can never outlive the schema they were made against. An epoch
//! counter, bumped on every replacing commit, lets an operation that was in
//! flight across a reset detect that its result is stale and discard it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::form::{synthesize, FieldDescriptor, OptionsSchema};

/// Identifier and display name returned by a successful upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadHandle {
    pub upload_id: String,
    pub display_name: String,
}

/// One field's current edit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum SelectionValue {
    /// Raw edited text for `Text` / `OpaqueJson` fields. Sent verbatim; the
    /// server interprets it.
    Text(String),
    /// Selected choice values for `MultiChoice` fields, in the order the
    /// selection control reported them.
    Multi(Vec<String>),
}

/// View of the options portion of the session. `Empty` is a loaded-but-empty
/// schema, which callers must present differently from `NotFetched`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum OptionsView {
    NotFetched,
    Empty,
    Fields(Vec<FieldDescriptor>),
}

impl OptionsView {
    pub fn fields(&self) -> &[FieldDescriptor] {
        match self {
            OptionsView::Fields(fields) => fields,
            _ => &[],
        }
    }
}

/// Owned copy of the session for rendering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub upload: Option<UploadHandle>,
    pub options: OptionsView,
    pub selections: HashMap<String, SelectionValue>,
}

#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub(crate) upload: Option<UploadHandle>,
    pub(crate) schema: Option<OptionsSchema>,
    pub(crate) fields: Vec<FieldDescriptor>,
    pub(crate) selections: HashMap<String, SelectionValue>,
    pub(crate) epoch: u64,
}

impl SessionState {
    /// Replace the upload handle wholesale.
    pub(crate) fn commit_upload(&mut self, handle: UploadHandle) {
        self.upload = Some(handle);
        self.epoch += 1;
    }

    /// Replace the schema wholesale, re-synthesizing descriptors and
    /// dropping every prior selection.
    pub(crate) fn commit_schema(&mut self, schema: OptionsSchema) {
        self.fields = synthesize(&schema);
        self.schema = Some(schema);
        self.selections.clear();
        self.epoch += 1;
    }

    /// Clear everything. Calling this twice is the same as calling it once
    /// (the epoch still moves, so in-flight results are still discarded).
    pub(crate) fn reset(&mut self) {
        self.upload = None;
        self.schema = None;
        self.fields.clear();
        self.selections.clear();
        self.epoch += 1;
    }

    pub(crate) fn field(&self, key: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.key == key)
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        let options = match &self.schema {
            None => OptionsView::NotFetched,
            Some(schema) if schema.is_empty() => OptionsView::Empty,
            Some(_) => OptionsView::Fields(self.fields.clone()),
        };
        SessionSnapshot {
            upload: self.upload.clone(),
            options,
            selections: self.selections.clone(),
        }
    }
}
