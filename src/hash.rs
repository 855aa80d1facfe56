//! Content hash of a desired child object (spec §4.2, Invariant 3).
//!
//! `serde_json::Map` is a `BTreeMap` by default (no `preserve_order`
//! feature anywhere in this workspace), so `serde_json::to_vec` on a
//! `Value` already yields a canonical, key-sorted serialization — the
//! same trick `ASoldo-rust_operator`'s `rollout_fingerprint` relies on,
//! just over the whole object instead of one inline struct.

use serde::Serialize;
use serde_json::Value;
use sha1::{Digest, Sha1};

use crate::labels::RESERVED_LABELS;

/// Fields Kubernetes assigns server-side; two desired objects that only
/// differ here must still hash equal.
const SERVER_ASSIGNED_METADATA_FIELDS: &[&str] = &[
    "resourceVersion",
    "uid",
    "creationTimestamp",
    "generation",
    "managedFields",
    "selfLink",
];

/// SHA-1 hex digest of `obj`'s canonical JSON form, excluding
/// server-assigned metadata and the five reserved labels this crate
/// manages (spec §3).
pub fn content_hash<T: Serialize>(obj: &T) -> serde_json::Result<String> {
    let mut value = serde_json::to_value(obj)?;
    strip_server_fields(&mut value);

    let canonical = serde_json::to_vec(&value)?;
    let mut hasher = Sha1::new();
    hasher.update(&canonical);
    Ok(format!("{:x}", hasher.finalize()))
}

fn strip_server_fields(value: &mut Value) {
    let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) else {
        return;
    };

    for field in SERVER_ASSIGNED_METADATA_FIELDS {
        metadata.remove(*field);
    }

    if let Some(labels) = metadata.get_mut("labels").and_then(Value::as_object_mut) {
        for reserved in RESERVED_LABELS {
            labels.remove(*reserved);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn secret(resource_version: Option<&str>, extra_label: Option<&str>) -> Secret {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "demo".to_string());
        if let Some(v) = extra_label {
            labels.insert(crate::labels::LABEL_CHILD_REVISION.to_string(), v.to_string());
        }

        Secret {
            metadata: ObjectMeta {
                name: Some("demo".into()),
                resource_version: resource_version.map(str::to_string),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn server_assigned_fields_do_not_affect_hash() {
        let a = content_hash(&secret(None, None)).unwrap();
        let b = content_hash(&secret(Some("123"), None)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn reserved_labels_do_not_affect_hash() {
        let a = content_hash(&secret(None, None)).unwrap();
        let b = content_hash(&secret(None, Some("deadbeef"))).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn semantic_change_changes_hash() {
        let mut with_data = secret(None, None);
        with_data.data = Some(BTreeMap::from([(
            "key".to_string(),
            k8s_openapi::ByteString(b"secret".to_vec()),
        )]));
        let a = content_hash(&secret(None, None)).unwrap();
        let b = content_hash(&with_data).unwrap();
        assert_ne!(a, b);
    }
}
