//! The decision capability behind `/mutate`.
//!
//! The server only depends on the [`Mutator`] trait. Two stock
//! implementations ship with the binary: [`AllowAll`] and [`LabelInjector`].

use std::collections::BTreeMap;

use serde_json::Value;

use crate::admission::types::{
    escape_pointer_token, AdmissionRequest, AdmissionResponse, PatchOperation,
};

/// Error returned by a mutator. Never shown to the caller.
pub type MutateError = Box<dyn std::error::Error + Send + Sync>;

/// Decides how an object under review should be edited.
///
/// Called concurrently from the blocking pool, one call per request.
pub trait Mutator: Send + Sync + 'static {
    fn mutate(&self, request: &AdmissionRequest) -> Result<AdmissionResponse, MutateError>;
}

impl<F> Mutator for F
where
    F: Fn(&AdmissionRequest) -> Result<AdmissionResponse, MutateError> + Send + Sync + 'static,
{
    fn mutate(&self, request: &AdmissionRequest) -> Result<AdmissionResponse, MutateError> {
        self(request)
    }
}

/// Admits everything unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Mutator for AllowAll {
    fn mutate(&self, request: &AdmissionRequest) -> Result<AdmissionResponse, MutateError> {
        Ok(AdmissionResponse::allow(request))
    }
}

/// Adds a fixed set of labels to every object that does not already carry them.
#[derive(Debug, Clone, Default)]
pub struct LabelInjector {
    labels: BTreeMap<String, String>,
}

impl LabelInjector {
    pub fn new(labels: BTreeMap<String, String>) -> Self {
        Self { labels }
    }

    /// Edits needed to bring `object`'s labels up to date.
    pub fn patch_for(&self, object: &Value) -> Vec<PatchOperation> {
        let existing = object.pointer("/metadata/labels").and_then(Value::as_object);

        let missing: BTreeMap<&String, &String> = self
            .labels
            .iter()
            .filter(|(k, v)| {
                existing
                    .and_then(|labels| labels.get(k.as_str()))
                    .and_then(Value::as_str)
                    != Some(v.as_str())
            })
            .collect();

        if missing.is_empty() {
            return Vec::new();
        }

        match existing {
            Some(_) => missing
                .into_iter()
                .map(|(k, v)| {
                    PatchOperation::add(
                        format!("/metadata/labels/{}", escape_pointer_token(k)),
                        Value::String(v.clone()),
                    )
                })
                .collect(),
            // No labels map yet: create it in one go.
            None => {
                let labels = missing
                    .into_iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect::<serde_json::Map<_, _>>();
                let mut ops = Vec::with_capacity(2);
                if object.get("metadata").is_none() {
                    ops.push(PatchOperation::add("/metadata", Value::Object(Default::default())));
                }
                ops.push(PatchOperation::add("/metadata/labels", Value::Object(labels)));
                ops
            }
        }
    }
}

impl Mutator for LabelInjector {
    fn mutate(&self, request: &AdmissionRequest) -> Result<AdmissionResponse, MutateError> {
        let response = AdmissionResponse::allow(request);
        let Some(object) = &request.object else {
            return Ok(response);
        };

        let ops = self.patch_for(object);
        if ops.is_empty() {
            return Ok(response);
        }

        let count = ops.len();
        Ok(response
            .with_patch(ops)?
            .with_audit_annotation("mutating-webhook/labels-injected", count.to_string()))
    }
}
