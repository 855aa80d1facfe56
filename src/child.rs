//! The small, closed set of child object kinds this crate manages, and a
//! typed dispatch table replacing the Python controller's
//! `getattr(api, 'list_namespaced_{}'.format(singular))` pattern (spec
//! §4.4, REDESIGN FLAGS).

use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::{Api, Client, ResourceExt};
use serde_json::Value;

use crate::error::Result;
use crate::hash::content_hash;
use crate::labels::{
    LABEL_CHILD_REVISION, LABEL_OWNER_ID, LABEL_OWNER_NAME, LABEL_OWNER_TYPE, LABEL_SUB_NAME,
};

/// A child object, typed over the small fixed set this crate creates.
/// Adding a kind means adding one variant plus one `ChildKind`
/// dispatch-table entry here, not new branching throughout the engine.
#[derive(Clone, Debug)]
pub enum ChildObject {
    Secret(Box<Secret>),
    Pod(Box<Pod>),
}

impl ChildObject {
    pub fn kind(&self) -> &'static str {
        match self {
            ChildObject::Secret(_) => "Secret",
            ChildObject::Pod(_) => "Pod",
        }
    }

    pub fn name(&self) -> String {
        match self {
            ChildObject::Secret(s) => s.name_any(),
            ChildObject::Pod(p) => p.name_any(),
        }
    }

    pub fn content_hash(&self) -> serde_json::Result<String> {
        match self {
            ChildObject::Secret(s) => content_hash(s.as_ref()),
            ChildObject::Pod(p) => content_hash(p.as_ref()),
        }
    }

    /// The `child-revision` label already stamped on an *observed*
    /// object, if any.
    pub fn observed_revision(&self) -> Option<&str> {
        let labels = match self {
            ChildObject::Secret(s) => s.metadata.labels.as_ref(),
            ChildObject::Pod(p) => p.metadata.labels.as_ref(),
        };
        labels.and_then(|l| l.get(LABEL_CHILD_REVISION)).map(String::as_str)
    }

    /// Overwrites the five reserved labels (spec §4.2: "the controller
    /// unconditionally overwrites the five reserved labels").
    fn stamp_labels(&mut self, owner_id: &str, owner_type: &str, owner_name: &str, sub_name: &str, revision: &str) {
        let labels = match self {
            ChildObject::Secret(s) => s.metadata.labels.get_or_insert_with(Default::default),
            ChildObject::Pod(p) => p.metadata.labels.get_or_insert_with(Default::default),
        };
        labels.insert(LABEL_OWNER_ID.to_string(), owner_id.to_string());
        labels.insert(LABEL_OWNER_TYPE.to_string(), owner_type.to_string());
        labels.insert(LABEL_OWNER_NAME.to_string(), owner_name.to_string());
        labels.insert(LABEL_SUB_NAME.to_string(), sub_name.to_string());
        labels.insert(LABEL_CHILD_REVISION.to_string(), revision.to_string());
    }

    /// Observed Pod phase, used by the ModelTraining handler to fold
    /// completion into owner status (spec §9, Open Question 1).
    pub fn pod_phase(&self) -> Option<&str> {
        match self {
            ChildObject::Pod(p) => p.status.as_ref()?.phase.as_deref(),
            ChildObject::Secret(_) => None,
        }
    }
}

/// A desired or observed child paired with its merge-key sub-name.
#[derive(Clone, Debug)]
pub struct ChildEntry {
    pub sub_name: String,
    pub object: ChildObject,
}

impl ChildEntry {
    pub fn new(sub_name: impl Into<String>, object: ChildObject) -> Self {
        Self { sub_name: sub_name.into(), object }
    }

    pub fn key(&self) -> (&'static str, String) {
        (self.object.kind(), self.sub_name.clone())
    }

    /// Stamps reserved labels and returns the freshly computed revision
    /// hash, ready to `create`/`patch`.
    pub fn prepared(
        mut self,
        owner_id: &str,
        owner_type: &str,
        owner_name: &str,
    ) -> serde_json::Result<Self> {
        let revision = self.object.content_hash()?;
        self.object
            .stamp_labels(owner_id, owner_type, owner_name, &self.sub_name, &revision);
        Ok(self)
    }
}

/// Live API operations for one child kind, namespace-scoped per call.
pub struct ChildApi {
    client: Client,
}

impl ChildApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn list(&self, namespace: &str, label_selector: &str) -> Result<Vec<ChildEntry>> {
        let lp = kube::api::ListParams::default().labels(label_selector);

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);

        let mut out = Vec::new();
        for secret in secrets.list(&lp).await?.items {
            let sub_name = sub_name_of(&secret.labels());
            out.push(ChildEntry::new(sub_name, ChildObject::Secret(Box::new(secret))));
        }
        for pod in pods.list(&lp).await?.items {
            let sub_name = sub_name_of(&pod.labels());
            out.push(ChildEntry::new(sub_name, ChildObject::Pod(Box::new(pod))));
        }
        Ok(out)
    }

    pub async fn create(&self, namespace: &str, entry: &ChildEntry) -> Result<()> {
        let pp = kube::api::PostParams::default();
        match &entry.object {
            ChildObject::Secret(s) => {
                let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
                api.create(&pp, s).await?;
            }
            ChildObject::Pod(p) => {
                let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
                api.create(&pp, p).await?;
            }
        }
        Ok(())
    }

    pub async fn patch(&self, namespace: &str, entry: &ChildEntry) -> Result<()> {
        let pp = kube::api::PatchParams::apply("legion-operator").force();
        let name = entry.object.name();
        match &entry.object {
            ChildObject::Secret(s) => {
                let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
                api.patch(&name, &pp, &kube::api::Patch::Apply(s)).await?;
            }
            ChildObject::Pod(p) => {
                let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
                api.patch(&name, &pp, &kube::api::Patch::Apply(p)).await?;
            }
        }
        Ok(())
    }

    pub async fn delete(&self, namespace: &str, entry: &ChildEntry) -> Result<()> {
        let dp = kube::api::DeleteParams {
            grace_period_seconds: Some(0),
            ..Default::default()
        };
        let name = entry.object.name();
        match entry.object.kind() {
            "Secret" => {
                let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
                api.delete(&name, &dp).await?;
            }
            "Pod" => {
                let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
                api.delete(&name, &dp).await?;
            }
            other => unreachable!("unknown child kind {other}"),
        }
        Ok(())
    }
}

fn sub_name_of(labels: &std::collections::BTreeMap<String, String>) -> String {
    labels.get(LABEL_SUB_NAME).cloned().unwrap_or_default()
}

/// Placeholder alias kept for call sites that only need a JSON status
/// value rather than a typed status struct (spec status is "a short
/// message", never structured beyond state/result/failure).
pub type StatusValue = Value;
