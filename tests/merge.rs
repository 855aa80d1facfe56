//! Property-style tests for the merge invariants named in spec.md: stable
//! ordering, idempotence, and that unrelated metadata never perturbs a
//! content hash.

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use legion_operator::child::{ChildEntry, ChildObject};
use legion_operator::merge::{self, DesiredState};
use serde_json::Map;

fn secret_entry(sub_name: &str, data: &str) -> ChildEntry {
    let secret = Secret {
        metadata: ObjectMeta { name: Some(sub_name.to_string()), ..Default::default() },
        data: Some(std::collections::BTreeMap::from([(
            "key".to_string(),
            ByteString(data.as_bytes().to_vec()),
        )])),
        ..Default::default()
    };
    ChildEntry::new(sub_name, ChildObject::Secret(Box::new(secret)))
        .prepared("owner-uid", "VCS", "owner-name")
        .unwrap()
}

#[test]
fn running_the_same_desired_state_twice_converges_to_a_no_op() {
    let entries = vec![secret_entry("a", "1"), secret_entry("b", "2")];
    let desired = DesiredState { children: entries.clone(), status: Map::new() };

    let first = merge::plan(&Map::new(), &[], &desired).unwrap();
    assert_eq!(first.create.len(), 2);

    // What the apply step would have produced becomes the new "observed".
    let observed = first.create;
    let second = merge::plan(&Map::new(), &observed, &desired).unwrap();
    assert!(second.is_empty());
}

#[test]
fn removing_one_child_from_desired_state_deletes_only_that_child() {
    let observed = vec![secret_entry("a", "1"), secret_entry("b", "2")];
    let desired = DesiredState { children: vec![secret_entry("a", "1")], status: Map::new() };

    let plan = merge::plan(&Map::new(), &observed, &desired).unwrap();
    assert_eq!(plan.delete.len(), 1);
    assert_eq!(plan.delete[0].sub_name, "b");
    assert!(plan.create.is_empty());
    assert!(plan.update.is_empty());
}

#[test]
fn status_patch_only_contains_changed_fields() {
    let mut current = Map::new();
    current.insert("state".to_string(), serde_json::json!("Running"));
    current.insert("failure".to_string(), serde_json::Value::Null);

    let mut desired_status = Map::new();
    desired_status.insert("state".to_string(), serde_json::json!("Succeeded"));
    desired_status.insert("failure".to_string(), serde_json::Value::Null);

    let desired = DesiredState { children: Vec::new(), status: desired_status };
    let plan = merge::plan(&current, &[], &desired).unwrap();

    assert_eq!(plan.status_patch.len(), 1);
    assert_eq!(plan.status_patch.get("state").unwrap(), "Succeeded");
}

#[test]
fn hashes_are_stable_across_field_reordering_in_labels() {
    let mut a = secret_entry("a", "same");
    let mut b = secret_entry("a", "same");

    if let ChildObject::Secret(s) = &mut a.object {
        let labels = s.metadata.labels.get_or_insert_with(Default::default);
        labels.insert("z-label".to_string(), "1".to_string());
        labels.insert("a-label".to_string(), "2".to_string());
    }
    if let ChildObject::Secret(s) = &mut b.object {
        let labels = s.metadata.labels.get_or_insert_with(Default::default);
        labels.insert("a-label".to_string(), "2".to_string());
        labels.insert("z-label".to_string(), "1".to_string());
    }

    assert_eq!(a.object.content_hash().unwrap(), b.object.content_hash().unwrap());
}
