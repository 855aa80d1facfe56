//! The generic controller engine (spec §4.3): one instance per owner
//! kind, driving one [`crate::watch`] stream and delegating desired-state
//! computation to a [`Handler`].
//!
//! This re-expresses `legion.controller.crd_controllers.base.CRDController`
//! as a handler interface consumed by a single engine, per spec §9's
//! "deep inheritance of controllers" design note: no virtual dispatch
//! across more than one level.

use std::fmt::Debug;
use std::time::Duration;

use futures_util::StreamExt;
use kube::{Api, Client, Resource, ResourceExt, api::Patch};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::child::{ChildApi, ChildEntry};
use crate::error::Result;
use crate::labels::selector;
use crate::merge::{self, DesiredState};
use crate::watch::{self, WatchEvent};

/// Kind-specific reconciliation logic. The engine owns every lifecycle
/// concern (watching, loading children, merging, applying, status
/// patching); a handler only answers "what should exist".
pub trait Handler<K>: Send + Sync
where
    K: Resource + Send + Sync + 'static,
{
    /// Current status, re-expressed as a JSON object, used as the merge
    /// baseline (spec §4.2 point 1). Owners without a status subresource
    /// (e.g. `VCS`) keep the default empty map.
    fn current_status(&self, owner: &K) -> Map<String, Value> {
        let _ = owner;
        Map::new()
    }

    fn on_create(
        &self,
        owner: &K,
        observed: &[ChildEntry],
    ) -> impl Future<Output = Result<Option<DesiredState>>> + Send {
        self.on_update(owner, observed)
    }

    fn on_update(
        &self,
        owner: &K,
        observed: &[ChildEntry],
    ) -> impl Future<Output = Result<Option<DesiredState>>> + Send;

    fn on_delete(
        &self,
        owner: &K,
        observed: &[ChildEntry],
    ) -> impl Future<Output = Result<Option<DesiredState>>> + Send {
        let _ = (owner, observed);
        async { Ok(Some(DesiredState::empty())) }
    }
}

pub struct Engine<K, H> {
    client: Client,
    handler: H,
    child_api: ChildApi,
    resync_period: Duration,
    _kind: std::marker::PhantomData<K>,
}

impl<K, H> Engine<K, H>
where
    K: Resource<DynamicType = ()>
        + k8s_openapi::Resource
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static,
    H: Handler<K>,
{
    pub fn new(client: Client, handler: H, resync_period: Duration) -> Self {
        Self {
            child_api: ChildApi::new(client.clone()),
            client,
            handler,
            resync_period,
            _kind: std::marker::PhantomData,
        }
    }

    /// Drives the watch stream to completion. Each event is processed
    /// strictly serially (spec §5) — no two reconciles of the same or
    /// different owners of this kind ever run concurrently inside one
    /// engine.
    pub async fn run(self) {
        let kind = <K as k8s_openapi::Resource>::KIND;
        info!(kind, "starting watch");

        let api: Api<K> = Api::all(self.client.clone());
        let mut events = watch::watch(api, self.resync_period);

        while let Some(event) = events.next().await {
            match event {
                WatchEvent::Added(obj) => self.dispatch(obj, Action::Create).await,
                WatchEvent::Modified(obj) => self.dispatch(obj, Action::Update).await,
                WatchEvent::Deleted(obj) => self.dispatch(obj, Action::Delete).await,
                WatchEvent::Error(message) => {
                    error!(kind, error = %message, "watch stream reported an error, continuing");
                }
            }
        }

        info!(kind, "watch stream ended");
    }

    async fn dispatch(&self, owner: K, action: Action) {
        let kind = <K as k8s_openapi::Resource>::KIND;
        let name = owner.name_any();
        let namespace = owner.namespace().unwrap_or_default();

        let observed = match owner.meta().uid.as_deref() {
            Some(uid) => {
                let label_selector = selector(uid, kind);
                match self.child_api.list(&namespace, &label_selector).await {
                    Ok(children) => children,
                    Err(err) => {
                        warn!(kind, %name, %namespace, error = %err, "failed to list observed children");
                        return;
                    }
                }
            }
            None => Vec::new(),
        };

        let outcome = match action {
            Action::Create => self.handler.on_create(&owner, &observed).await,
            Action::Update => self.handler.on_update(&owner, &observed).await,
            Action::Delete => self.handler.on_delete(&owner, &observed).await,
        };

        let desired = match outcome {
            Ok(Some(desired)) => desired,
            Ok(None) => {
                debug!(kind, %name, %namespace, "handler returned no desired state, skipping");
                return;
            }
            Err(err) => {
                warn!(kind, %name, %namespace, error = %err, "handler failed");
                return;
            }
        };

        let current_status = self.handler.current_status(&owner);
        let uid = owner.meta().uid.clone().unwrap_or_default();

        let plan = match merge::plan(&current_status, &observed, &desired) {
            Ok(plan) => plan,
            Err(err) => {
                warn!(kind, %name, %namespace, error = %err, "failed to compute merge plan");
                return;
            }
        };

        self.apply(kind, &name, &namespace, &uid, plan).await;
    }

    async fn apply(&self, kind: &str, name: &str, namespace: &str, uid: &str, plan: merge::MergePlan) {
        if !plan.status_patch.is_empty() {
            if let Err(err) = self.patch_status(namespace, name, &plan.status_patch).await {
                log_apply_error(kind, name, namespace, "status", &err);
            }
        }

        for entry in &plan.delete {
            if let Err(err) = self.child_api.delete(namespace, entry).await {
                log_apply_error(kind, name, namespace, "delete", &err);
            }
        }

        for entry in plan.create {
            let prepared = match entry.prepared(uid, kind, name) {
                Ok(prepared) => prepared,
                Err(err) => {
                    warn!(kind, name, namespace, error = %err, "failed to stamp labels on create");
                    continue;
                }
            };
            if let Err(err) = self.child_api.create(namespace, &prepared).await {
                log_apply_error(kind, name, namespace, "create", &err);
            }
        }

        for entry in plan.update {
            let prepared = match entry.prepared(uid, kind, name) {
                Ok(prepared) => prepared,
                Err(err) => {
                    warn!(kind, name, namespace, error = %err, "failed to stamp labels on update");
                    continue;
                }
            };
            if let Err(err) = self.child_api.patch(namespace, &prepared).await {
                log_apply_error(kind, name, namespace, "update", &err);
            }
        }
    }

    async fn patch_status(&self, namespace: &str, name: &str, status_patch: &Map<String, Value>) -> Result<()> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let body = serde_json::json!({ "status": status_patch });
        api.patch_status(name, &kube::api::PatchParams::default(), &Patch::Merge(&body))
            .await?;
        Ok(())
    }
}

enum Action {
    Create,
    Update,
    Delete,
}

/// Implements spec §7's policy: a 409 conflict is logged at debug and
/// swallowed (the next resync reconciles); any other API error is
/// logged at warn and the loop continues.
fn log_apply_error(kind: &str, name: &str, namespace: &str, step: &str, err: &crate::error::Error) {
    if is_conflict(err) {
        debug!(kind, name, namespace, step, "conflict applying plan, next resync will reconcile");
    } else {
        warn!(kind, name, namespace, step, error = %err, "error applying plan");
    }
}

fn is_conflict(err: &crate::error::Error) -> bool {
    matches!(err, crate::error::Error::Kube(kube::Error::Api(resp)) if resp.code == 409)
}
