//! VCS handler (spec §4.5): ports
//! `legion.controller.crd_controllers.vcs_controller.VCSController`.

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use serde_json::Map;

use crate::child::{ChildEntry, ChildObject};
use crate::crd::VCS;
use crate::engine::Handler;
use crate::error::{Error, Result};
use crate::labels::{ANNOTATION_DEFAULT_REF, ANNOTATION_URI};
use crate::merge::DesiredState;

/// Logical name of the one Secret this controller emits.
pub const CHILD_CREDENTIALS: &str = "credentials";

#[derive(Clone, Default)]
pub struct VcsHandler;

impl Handler<VCS> for VcsHandler {
    async fn on_update(&self, owner: &VCS, _observed: &[ChildEntry]) -> Result<Option<DesiredState>> {
        let secret = build_secret(owner)?;
        Ok(Some(DesiredState {
            children: vec![ChildEntry::new(CHILD_CREDENTIALS, ChildObject::Secret(Box::new(secret)))],
            status: Map::new(),
        }))
    }
}

fn build_secret(owner: &VCS) -> Result<Secret> {
    let mut annotations = BTreeMap::new();
    annotations.insert(ANNOTATION_URI.to_string(), owner.spec.uri.clone());
    annotations.insert(ANNOTATION_DEFAULT_REF.to_string(), owner.spec.default_ref.clone());

    let mut data = BTreeMap::new();
    if let Some(key_bytes) = owner
        .spec
        .decoded_private_key()
        .map_err(|source| Error::InvalidBase64 { field: "privateKey".into(), source })?
    {
        data.insert("key".to_string(), ByteString(key_bytes));
    }

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(owner.name_any()),
            annotations: Some(annotations),
            ..Default::default()
        },
        data: if data.is_empty() { None } else { Some(data) },
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta as MetaObjectMeta;

    fn vcs(private_key: Option<&str>) -> VCS {
        VCS {
            metadata: MetaObjectMeta {
                name: Some("v1".into()),
                namespace: Some("default".into()),
                uid: Some("uid-1".into()),
                ..Default::default()
            },
            spec: crate::crd::VcsSpec {
                uri: "git@host:x".into(),
                default_ref: "main".into(),
                private_key: private_key.map(str::to_string),
            },
        }
    }

    #[test]
    fn secret_carries_decoded_key_and_annotations() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("k");
        let owner = vcs(Some(&encoded));
        let secret = build_secret(&owner).unwrap();

        assert_eq!(
            secret.metadata.annotations.as_ref().unwrap().get(ANNOTATION_URI).unwrap(),
            "git@host:x"
        );
        assert_eq!(
            secret.metadata.annotations.as_ref().unwrap().get(ANNOTATION_DEFAULT_REF).unwrap(),
            "main"
        );
        let key = &secret.data.unwrap()["key"];
        assert_eq!(key.0, b"k");
    }

    #[test]
    fn secret_without_private_key_has_no_data() {
        let owner = vcs(None);
        let secret = build_secret(&owner).unwrap();
        assert!(secret.data.is_none());
    }
}
