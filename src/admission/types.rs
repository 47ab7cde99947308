//! Admission review wire types.
//!
//! Only the fields the webhook itself needs are typed; raw objects stay as
//! `serde_json::Value` and unknown fields are ignored on input.

use std::collections::BTreeMap;

use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// `apiVersion` used when the inbound review does not carry one.
pub const DEFAULT_API_VERSION: &str = "admission.k8s.io/v1";
/// `kind` used when the inbound review does not carry one.
pub const REVIEW_KIND: &str = "AdmissionReview";

/// The envelope wrapping either a request (inbound) or a response (outbound).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionRequest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

impl AdmissionReview {
    /// Wrap a response in an envelope typed like the inbound one.
    pub fn respond_to(inbound: &AdmissionReview, response: AdmissionResponse) -> Self {
        Self {
            api_version: Some(
                inbound
                    .api_version
                    .clone()
                    .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            ),
            kind: Some(
                inbound
                    .kind
                    .clone()
                    .unwrap_or_else(|| REVIEW_KIND.to_string()),
            ),
            request: None,
            response: Some(response),
        }
    }
}

/// Group/version/kind triple.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupVersionKind {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kind: String,
}

/// Group/version/resource triple.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupVersionResource {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub resource: String,
}

/// What the API server is doing to the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Connect,
}

/// The identity behind the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Vec<String>>,
}

/// The request half of an admission review.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    /// Identifier the response must echo.
    pub uid: String,

    /// Kind of the object under review.
    #[serde(default)]
    pub kind: GroupVersionKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<GroupVersionResource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_resource: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_kind: Option<GroupVersionKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_resource: Option<GroupVersionResource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,

    #[serde(default)]
    pub user_info: UserInfo,

    /// The candidate object, as sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_object: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
}

/// Encoding of the `patch` field. JSON Patch is the only one the API server accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchType {
    #[serde(rename = "JSONPatch")]
    JsonPatch,
}

/// A single structured-patch edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOperation {
    /// add, remove, replace, copy, move or test.
    pub op: String,
    /// JSON Pointer to the target.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl PatchOperation {
    pub fn add(path: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            op: "add".to_string(),
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn replace(path: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            op: "replace".to_string(),
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: "remove".to_string(),
            path: path.into(),
            value: None,
        }
    }
}

/// Escape one reference token of a JSON Pointer.
pub fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// Outcome details attached to a response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
}

/// The response half of an admission review.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    /// Must equal the request's uid.
    pub uid: String,

    pub allowed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,

    /// Serialized edit list; base64 on the wire.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_patch",
        deserialize_with = "deserialize_patch"
    )]
    pub patch: Option<Vec<u8>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<PatchType>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub audit_annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl AdmissionResponse {
    /// Allow the request unchanged.
    pub fn allow(request: &AdmissionRequest) -> Self {
        Self {
            uid: request.uid.clone(),
            allowed: true,
            ..Default::default()
        }
    }

    /// Reject the request with a message surfaced to the API client.
    pub fn deny(request: &AdmissionRequest, message: impl Into<String>) -> Self {
        Self {
            uid: request.uid.clone(),
            allowed: false,
            status: Some(Status {
                status: Some("Failure".to_string()),
                message: Some(message.into()),
                reason: None,
                code: Some(403),
            }),
            ..Default::default()
        }
    }

    /// Attach edits. An empty list leaves the response without a patch.
    pub fn with_patch(mut self, operations: Vec<PatchOperation>) -> Result<Self, serde_json::Error> {
        if operations.is_empty() {
            self.patch = None;
            self.patch_type = None;
            return Ok(self);
        }

        self.patch = Some(serde_json::to_vec(&operations)?);
        self.patch_type = Some(PatchType::JsonPatch);
        self.status = Some(Status {
            status: Some("Success".to_string()),
            ..Default::default()
        });
        Ok(self)
    }

    pub fn with_audit_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.audit_annotations.insert(key.into(), value.into());
        self
    }

    /// Decode the patch back into edits, if there is one.
    pub fn patch_operations(&self) -> Option<Result<Vec<PatchOperation>, serde_json::Error>> {
        self.patch.as_deref().map(serde_json::from_slice)
    }
}

fn serialize_patch<S: Serializer>(patch: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
    match patch {
        Some(bytes) => {
            serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
        }
        None => serializer.serialize_none(),
    }
}

fn deserialize_patch<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
    let encoded: Option<String> = Option::deserialize(deserializer)?;
    encoded
        .map(|s| {
            base64::engine::general_purpose::STANDARD
                .decode(s)
                .map_err(serde::de::Error::custom)
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> AdmissionRequest {
        AdmissionRequest {
            uid: "705ab4f5-6393-11e8-b7cc-42010a800002".into(),
            ..Default::default()
        }
    }

    #[test]
    fn decodes_api_server_request() {
        let review: AdmissionReview = serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "requestKind": {"group": "", "version": "v1", "kind": "Pod"},
                "namespace": "default",
                "operation": "CREATE",
                "userInfo": {"username": "admin", "groups": ["system:authenticated"]},
                "object": {"metadata": {"name": "p"}},
                "oldObject": null,
                "dryRun": false,
                "somethingNew": 1
            }
        }))
        .unwrap();

        let request = review.request.unwrap();
        assert_eq!(request.kind.kind, "Pod");
        assert_eq!(request.operation, Some(Operation::Create));
        assert_eq!(request.namespace.as_deref(), Some("default"));
        assert_eq!(request.object.unwrap()["metadata"]["name"], "p");
        assert!(request.old_object.is_none());
    }

    #[test]
    fn allow_without_edits_omits_patch_fields() {
        let value = serde_json::to_value(AdmissionResponse::allow(&request())).unwrap();
        assert_eq!(
            value,
            json!({"uid": "705ab4f5-6393-11e8-b7cc-42010a800002", "allowed": true})
        );
    }

    #[test]
    fn patch_is_base64_json_patch() {
        let response = AdmissionResponse::allow(&request())
            .with_patch(vec![PatchOperation::add("/metadata/labels/team", json!("core"))])
            .unwrap();
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["patchType"], "JSONPatch");
        let encoded = value["patch"].as_str().unwrap();
        let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
        let ops: Vec<PatchOperation> = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(ops[0].op, "add");
        assert_eq!(ops[0].path, "/metadata/labels/team");

        let back: AdmissionResponse = serde_json::from_value(value).unwrap();
        assert_eq!(back, response);
    }

    #[test]
    fn empty_patch_is_no_patch() {
        let response = AdmissionResponse::allow(&request()).with_patch(Vec::new()).unwrap();
        assert!(response.patch.is_none());
        assert!(response.patch_type.is_none());
    }

    #[test]
    fn deny_carries_message() {
        let response = AdmissionResponse::deny(&request(), "no privileged pods");
        assert!(!response.allowed);
        let status = response.status.unwrap();
        assert_eq!(status.code, Some(403));
        assert_eq!(status.message.as_deref(), Some("no privileged pods"));
    }

    #[test]
    fn remove_has_no_value() {
        let value = serde_json::to_value(PatchOperation::remove("/spec/x")).unwrap();
        assert_eq!(value, json!({"op": "remove", "path": "/spec/x"}));
    }

    #[test]
    fn pointer_tokens_are_escaped() {
        assert_eq!(escape_pointer_token("example.com/team"), "example.com~1team");
        assert_eq!(escape_pointer_token("a~b"), "a~0b");
    }

    #[test]
    fn response_envelope_echoes_review_type() {
        let inbound = AdmissionReview {
            api_version: Some("admission.k8s.io/v1beta1".into()),
            ..Default::default()
        };
        let review = AdmissionReview::respond_to(&inbound, AdmissionResponse::allow(&request()));
        assert_eq!(review.api_version.as_deref(), Some("admission.k8s.io/v1beta1"));
        assert_eq!(review.kind.as_deref(), Some("AdmissionReview"));
        assert!(review.request.is_none());
    }
}
