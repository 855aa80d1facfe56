//! Three-way diff between observed and desired children, plus the owner
//! status patch (spec §4.2). Direct port of
//! `legion/legion/controller/crd_controllers/merge.py::merge`.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::child::ChildEntry;

/// What a [`crate::engine::Handler`] wants the world to look like.
#[derive(Clone, Debug, Default)]
pub struct DesiredState {
    pub children: Vec<ChildEntry>,
    /// Status fields to reconcile onto the owner. Empty means "leave
    /// status untouched" (e.g. the VCS handler never writes status).
    pub status: Map<String, Value>,
}

impl DesiredState {
    pub fn empty() -> Self {
        Self::default()
    }
}

#[derive(Debug, Default)]
pub struct MergePlan {
    /// Subset of `desired.status` that differs from the owner's current
    /// status; empty if nothing changed.
    pub status_patch: Map<String, Value>,
    pub create: Vec<ChildEntry>,
    pub update: Vec<ChildEntry>,
    pub delete: Vec<ChildEntry>,
}

impl MergePlan {
    pub fn is_empty(&self) -> bool {
        self.status_patch.is_empty()
            && self.create.is_empty()
            && self.update.is_empty()
            && self.delete.is_empty()
    }
}

fn index(entries: &[ChildEntry]) -> BTreeMap<(&'static str, String), &ChildEntry> {
    entries.iter().map(|e| (e.key(), e)).collect()
}

/// Computes the merge plan. `current_status` is the owner's `.status`
/// re-expressed as a JSON object (empty if the owner has none yet).
pub fn plan(
    current_status: &Map<String, Value>,
    observed: &[ChildEntry],
    desired: &DesiredState,
) -> serde_json::Result<MergePlan> {
    let mut status_patch = Map::new();
    for (field, value) in &desired.status {
        if current_status.get(field) != Some(value) {
            status_patch.insert(field.clone(), value.clone());
        }
    }

    let observed_index = index(observed);
    let desired_index = index(&desired.children);

    let mut create = Vec::new();
    let mut update = Vec::new();
    for (key, entry) in &desired_index {
        match observed_index.get(key) {
            None => create.push((*entry).clone()),
            Some(observed_entry) => {
                let fresh_hash = entry.object.content_hash()?;
                if observed_entry.object.observed_revision() != Some(fresh_hash.as_str()) {
                    update.push((*entry).clone());
                }
            }
        }
    }

    let mut delete = Vec::new();
    for (key, entry) in &observed_index {
        if !desired_index.contains_key(key) {
            delete.push((*entry).clone());
        }
    }

    Ok(MergePlan {
        status_patch,
        create,
        update,
        delete,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::child::ChildObject;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn secret_entry(sub_name: &str, key: &str) -> ChildEntry {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(sub_name.to_string()),
                ..Default::default()
            },
            data: Some(std::collections::BTreeMap::from([(
                "key".to_string(),
                k8s_openapi::ByteString(key.as_bytes().to_vec()),
            )])),
            ..Default::default()
        };
        ChildEntry::new(sub_name, ChildObject::Secret(Box::new(secret)))
            .prepared("owner-1", "VCS", "v1")
            .unwrap()
    }

    #[test]
    fn create_when_no_observed_counterpart() {
        let desired = DesiredState {
            children: vec![secret_entry("credentials", "k")],
            status: Map::new(),
        };
        let result = plan(&Map::new(), &[], &desired).unwrap();
        assert_eq!(result.create.len(), 1);
        assert!(result.update.is_empty());
        assert!(result.delete.is_empty());
    }

    #[test]
    fn update_when_hash_differs() {
        let observed = vec![secret_entry("credentials", "old")];
        let desired = DesiredState {
            children: vec![secret_entry("credentials", "new")],
            status: Map::new(),
        };
        let result = plan(&Map::new(), &observed, &desired).unwrap();
        assert!(result.create.is_empty());
        assert_eq!(result.update.len(), 1);
        assert!(result.delete.is_empty());
    }

    #[test]
    fn idempotent_merge_is_empty_second_time() {
        let entry = secret_entry("credentials", "k");
        let desired = DesiredState {
            children: vec![entry.clone()],
            status: Map::new(),
        };
        // First pass against nothing observed: a create.
        let first = plan(&Map::new(), &[], &desired).unwrap();
        assert_eq!(first.create.len(), 1);

        // Second pass: the created entry is now "observed" verbatim.
        let second = plan(&Map::new(), &[entry], &desired).unwrap();
        assert!(second.is_empty(), "second merge should be a no-op: {second:?}");
    }

    #[test]
    fn delete_closure_on_empty_desired() {
        let observed = vec![secret_entry("credentials", "k")];
        let desired = DesiredState::empty();
        let result = plan(&Map::new(), &observed, &desired).unwrap();
        assert_eq!(result.delete.len(), 1);
        assert!(result.create.is_empty());
        assert!(result.update.is_empty());
    }
}
