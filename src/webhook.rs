//! The metacontroller sync-webhook's response shape, modeled as a pure
//! function (spec §6) — no HTTP server is wired up for it, since nothing
//! else in this crate needs to call it at runtime.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ModelDeploymentSpec {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub replicas: Option<i32>,
}

/// Builds the `{children: [...]}` body metacontroller expects back from a
/// `sync` webhook call: one ClusterIP `Service` and one `Deployment` per
/// `ModelDeployment`, both named after `parent.name`.
pub fn sync_model_children(parent: &ModelDeploymentSpec) -> Value {
    let replicas = parent.replicas.unwrap_or(1);

    let service = json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": { "name": parent.name },
        "spec": {
            "type": "ClusterIP",
            "selector": { "model": parent.name },
            "ports": [{ "name": "api", "port": 5000, "targetPort": 5000 }],
        }
    });

    let deployment = json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": parent.name },
        "spec": {
            "replicas": replicas,
            "selector": { "matchLabels": { "model": parent.name } },
            "template": {
                "metadata": { "labels": { "model": parent.name } },
                "spec": {
                    "containers": [{
                        "name": "model",
                        "image": parent.image,
                        "ports": [{ "containerPort": 5000 }],
                        "livenessProbe": {
                            "httpGet": { "path": "/healthcheck", "port": 5000 },
                            "initialDelaySeconds": 2,
                            "timeoutSeconds": 2,
                            "periodSeconds": 10,
                            "failureThreshold": 10,
                        },
                        "readinessProbe": {
                            "httpGet": { "path": "/healthcheck", "port": 5000 },
                            "initialDelaySeconds": 2,
                            "timeoutSeconds": 2,
                            "periodSeconds": 10,
                            "failureThreshold": 5,
                        },
                    }]
                }
            }
        }
    });

    json!({ "status": {}, "children": [service, deployment] })
}
