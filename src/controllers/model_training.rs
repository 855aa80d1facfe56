//! ModelTraining handler (spec §4.6): ports
//! `legion.controller.crd_controllers.model_training_controller
//! .ModelTrainingController`.

use std::collections::BTreeMap;
use std::path::Path;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EnvVar, HostPathVolumeSource, Pod, PodSpec, ResourceRequirements,
    Secret, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Api, Client, ResourceExt};
use serde_json::{Map, Value, json};

use crate::child::{ChildEntry, ChildObject};
use crate::crd::model_training::{KNOWN_ENTRYPOINT_EXTENSIONS, KNOWN_TOOLCHAINS};
use crate::crd::{ModelTraining, VCS};
use crate::engine::Handler;
use crate::error::{Error, Result};
use crate::labels::{ANNOTATION_DEFAULT_REF, ANNOTATION_URI};
use crate::merge::DesiredState;

pub const CHILD_CHECKOUT_SECRET: &str = "checkout-secret";
pub const CHILD_TRAINING_POD: &str = "training-pod";

const BOOTUP_MOUNT: &str = "/bootup/";
const DOCKER_SOCKET_PATH: &str = "/var/run/docker.sock";
const MIN_CPU_MILLIS: u64 = 100;
const MIN_MEM_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct ModelTrainingHandler {
    client: Client,
}

impl ModelTrainingHandler {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn resolve_vcs(&self, namespace: &str, name: &str) -> Result<Option<VCS>> {
        let api: Api<VCS> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await.map_err(Error::from)
    }
}

impl Handler<ModelTraining> for ModelTrainingHandler {
    fn current_status(&self, owner: &ModelTraining) -> Map<String, Value> {
        match owner.status.as_ref().and_then(|s| serde_json::to_value(s).ok()) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    async fn on_update(
        &self,
        owner: &ModelTraining,
        observed: &[ChildEntry],
    ) -> Result<Option<DesiredState>> {
        let namespace = owner.namespace().unwrap_or_default();

        if !KNOWN_TOOLCHAINS.contains(&owner.spec.toolchain.as_str()) {
            return Err(Error::UnsupportedToolchain(owner.spec.toolchain.clone()));
        }

        let extension = Path::new(&owner.spec.entrypoint)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        if !KNOWN_ENTRYPOINT_EXTENSIONS.contains(&extension) {
            return Err(Error::UnsupportedEntrypointExtension(extension.to_string()));
        }

        let vcs = match self.resolve_vcs(&namespace, &owner.spec.vcs).await? {
            Some(vcs) => vcs,
            None => {
                return Ok(Some(DesiredState {
                    children: Vec::new(),
                    status: vcs_not_found_status(&namespace, &owner.spec.vcs),
                }));
            }
        };

        let branch = owner.spec.effective_branch(&vcs.spec.default_ref).to_string();

        let secret = build_secret(owner, &vcs)?;
        let pod = build_pod(owner, &vcs, &branch);

        let status = pod_status(owner, observed);

        Ok(Some(DesiredState {
            children: vec![
                ChildEntry::new(CHILD_CHECKOUT_SECRET, ChildObject::Secret(Box::new(secret))),
                ChildEntry::new(CHILD_TRAINING_POD, ChildObject::Pod(Box::new(pod))),
            ],
            status,
        }))
    }
}

fn json_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// `status` for a `ModelTraining` whose `spec.vcs` doesn't resolve to a
/// live `VCS` in the same namespace.
fn vcs_not_found_status(namespace: &str, vcs_name: &str) -> Map<String, Value> {
    let failure = Error::VcsNotFound {
        namespace: namespace.to_string(),
        name: vcs_name.to_string(),
    }
    .to_string();
    json_map(json!({ "state": "Failed", "failure": failure }))
}

/// Folds the observed training Pod's phase into `status.state`
/// (spec §9, Open Question 1).
fn pod_status(_owner: &ModelTraining, observed: &[ChildEntry]) -> Map<String, Value> {
    let phase = observed
        .iter()
        .find(|entry| entry.sub_name == CHILD_TRAINING_POD)
        .and_then(|entry| entry.object.pod_phase());

    let (state, failure) = match phase {
        None => ("Unknown", None),
        Some("Succeeded") => ("Succeeded", None),
        Some("Failed") => ("Failed", Some("training pod failed".to_string())),
        Some(_running_or_pending) => ("Running", None),
    };

    let mut status = json_map(json!({ "state": state }));
    if let Some(failure) = failure {
        status.insert("failure".to_string(), Value::String(failure));
    }
    status
}

fn secret_name(training_name: &str) -> String {
    format!("{training_name}-training-git-creds")
}

fn build_secret(owner: &ModelTraining, vcs: &VCS) -> Result<Secret> {
    let mut annotations = BTreeMap::new();
    annotations.insert(ANNOTATION_URI.to_string(), vcs.spec.uri.clone());
    annotations.insert(ANNOTATION_DEFAULT_REF.to_string(), vcs.spec.default_ref.clone());

    let mut data = BTreeMap::new();
    if let Some(key_bytes) = vcs
        .spec
        .decoded_private_key()
        .map_err(|source| Error::InvalidBase64 { field: "privateKey".into(), source })?
    {
        data.insert("key".to_string(), ByteString(key_bytes));
    }

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(secret_name(&owner.name_any())),
            annotations: Some(annotations),
            ..Default::default()
        },
        data: if data.is_empty() { None } else { Some(data) },
        ..Default::default()
    })
}

fn build_pod(owner: &ModelTraining, vcs: &VCS, branch: &str) -> Pod {
    let training_name = owner.name_any();

    let mut args = vec![owner.spec.toolchain.clone(), owner.spec.entrypoint.clone()];
    args.extend(owner.spec.arguments.iter().cloned());

    let command = vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        format!("python3 {BOOTUP_MOUNT}bootstrapper.py {}", args.join(" ")),
    ];

    let resources = ResourceRequirements {
        limits: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity(owner.spec.resources.cpu.clone())),
            ("memory".to_string(), Quantity(owner.spec.resources.ram.clone())),
        ])),
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), reduce_cpu(&owner.spec.resources.cpu)),
            ("memory".to_string(), reduce_mem(&owner.spec.resources.ram)),
        ])),
        claims: None,
    };

    Pod {
        metadata: ObjectMeta {
            name: Some(format!("{training_name}-training-pod")),
            namespace: owner.namespace(),
            ..Default::default()
        },
        spec: Some(PodSpec {
            restart_policy: Some("Never".to_string()),
            volumes: Some(vec![
                Volume {
                    name: "docker-socket".to_string(),
                    host_path: Some(HostPathVolumeSource {
                        path: DOCKER_SOCKET_PATH.to_string(),
                        type_: None,
                    }),
                    ..Default::default()
                },
                Volume {
                    name: "git-checkout-secret".to_string(),
                    secret: Some(SecretVolumeSource {
                        secret_name: Some(secret_name(&training_name)),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                Volume {
                    name: "bootup".to_string(),
                    config_map: Some(ConfigMapVolumeSource {
                        name: format!("legion-toolchain-bootup-{}", owner.spec.toolchain),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            ]),
            containers: vec![Container {
                name: "training-pod".to_string(),
                image: Some(owner.spec.image.clone()),
                command: Some(command),
                env: Some(vec![
                    EnvVar {
                        name: "MODEL_TRAIN_METRICS_ENABLED".to_string(),
                        value: Some("false".to_string()),
                        ..Default::default()
                    },
                    EnvVar {
                        name: "GIT_CHECKOUT_REPO_URI".to_string(),
                        value: Some(vcs.spec.uri.clone()),
                        ..Default::default()
                    },
                    EnvVar {
                        name: "GIT_CHECKOUT_REPO_REF".to_string(),
                        value: Some(branch.to_string()),
                        ..Default::default()
                    },
                ]),
                resources: Some(resources),
                volume_mounts: Some(vec![
                    VolumeMount {
                        name: "docker-socket".to_string(),
                        mount_path: DOCKER_SOCKET_PATH.to_string(),
                        ..Default::default()
                    },
                    VolumeMount {
                        name: "bootup".to_string(),
                        mount_path: BOOTUP_MOUNT.to_string(),
                        read_only: Some(true),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Halves a CPU quantity (`"1"`, `"500m"`, ...), floored at
/// [`MIN_CPU_MILLIS`]. See `DESIGN.md` for why this policy is specified
/// here rather than ported — the original `reduce_cpu_resource` body
/// wasn't part of the retrieved source.
fn reduce_cpu(quantity: &str) -> Quantity {
    let millis = parse_cpu_millis(quantity).unwrap_or(MIN_CPU_MILLIS);
    let reduced = (millis / 2).max(MIN_CPU_MILLIS);
    Quantity(format!("{reduced}m"))
}

fn parse_cpu_millis(quantity: &str) -> Option<u64> {
    if let Some(stripped) = quantity.strip_suffix('m') {
        stripped.parse().ok()
    } else {
        quantity.parse::<f64>().ok().map(|cores| (cores * 1000.0).round() as u64)
    }
}

/// Halves a memory quantity (`"2Gi"`, `"512Mi"`, ...), floored at
/// [`MIN_MEM_BYTES`].
fn reduce_mem(quantity: &str) -> Quantity {
    let bytes = parse_mem_bytes(quantity).unwrap_or(MIN_MEM_BYTES);
    let reduced = (bytes / 2).max(MIN_MEM_BYTES);
    Quantity(format!("{}Mi", reduced / (1024 * 1024)))
}

fn parse_mem_bytes(quantity: &str) -> Option<u64> {
    const SUFFIXES: &[(&str, u64)] = &[
        ("Ki", 1024),
        ("Mi", 1024 * 1024),
        ("Gi", 1024 * 1024 * 1024),
        ("Ti", 1024 * 1024 * 1024 * 1024),
        ("K", 1000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
    ];

    for (suffix, multiplier) in SUFFIXES {
        if let Some(stripped) = quantity.strip_suffix(suffix) {
            return stripped.parse::<f64>().ok().map(|n| (n * *multiplier as f64).round() as u64);
        }
    }

    quantity.parse::<f64>().ok().map(|n| n.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduce_cpu_halves_and_floors() {
        assert_eq!(reduce_cpu("1").0, "500m");
        assert_eq!(reduce_cpu("100m").0, format!("{MIN_CPU_MILLIS}m"));
    }

    #[test]
    fn reduce_mem_halves_and_floors() {
        assert_eq!(reduce_mem("2Gi").0, "1024Mi");
        assert_eq!(reduce_mem("32Mi").0, "64Mi");
    }

    #[test]
    fn pod_status_unknown_before_pod_observed() {
        let status = pod_status(&sample_training(), &[]);
        assert_eq!(status.get("state").unwrap(), "Unknown");
    }

    #[test]
    fn succeeded_pod_phase_folds_into_succeeded_state() {
        let pod = k8s_openapi::api::core::v1::Pod {
            status: Some(k8s_openapi::api::core::v1::PodStatus {
                phase: Some("Succeeded".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let observed = vec![ChildEntry::new(CHILD_TRAINING_POD, ChildObject::Pod(Box::new(pod)))];

        let status = pod_status(&sample_training(), &observed);
        assert_eq!(status.get("state").unwrap(), "Succeeded");
        assert!(status.get("failure").is_none());
    }

    #[test]
    fn unknown_toolchain_is_not_in_the_known_set() {
        assert!(!KNOWN_TOOLCHAINS.contains(&"rust"));
        assert!(KNOWN_TOOLCHAINS.contains(&"python"));
    }

    #[test]
    fn unsupported_entrypoint_extension_is_not_in_the_known_set() {
        assert!(!KNOWN_ENTRYPOINT_EXTENSIONS.contains(&"rs"));
        assert!(KNOWN_ENTRYPOINT_EXTENSIONS.contains(&"ipynb"));
        assert!(KNOWN_ENTRYPOINT_EXTENSIONS.contains(&"py"));
    }

    #[test]
    fn vcs_not_found_status_carries_failed_state_and_names_both_vcs_and_namespace() {
        let status = vcs_not_found_status("default", "missing-vcs");
        assert_eq!(status.get("state").unwrap(), "Failed");
        let failure = status.get("failure").unwrap().as_str().unwrap();
        assert!(failure.contains("missing-vcs"));
        assert!(failure.contains("default"));
    }

    #[test]
    fn custom_vcs_branch_overrides_the_vcs_default_ref() {
        let mut training = sample_training();
        training.spec.custom_vcs_branch = Some("feature/x".into());
        assert_eq!(training.spec.effective_branch("main"), "feature/x");
    }

    #[test]
    fn default_ref_is_used_when_no_custom_branch_is_set() {
        let training = sample_training();
        assert_eq!(training.spec.effective_branch("main"), "main");
    }

    #[test]
    fn build_secret_carries_vcs_uri_and_decoded_private_key() {
        let training = sample_training();
        use base64::Engine;
        let vcs = sample_vcs(Some(base64::engine::general_purpose::STANDARD.encode("sshkey")));

        let secret = build_secret(&training, &vcs).unwrap();
        assert_eq!(secret.metadata.name.unwrap(), "mt1-training-git-creds");

        let annotations = secret.metadata.annotations.unwrap();
        assert_eq!(annotations.get(ANNOTATION_URI).unwrap(), &vcs.spec.uri);
        assert_eq!(annotations.get(ANNOTATION_DEFAULT_REF).unwrap(), &vcs.spec.default_ref);

        let data = secret.data.unwrap();
        assert_eq!(data.get("key").unwrap().0, b"sshkey");
    }

    #[test]
    fn build_secret_without_private_key_carries_no_data() {
        let training = sample_training();
        let vcs = sample_vcs(None);

        let secret = build_secret(&training, &vcs).unwrap();
        assert!(secret.data.is_none());
    }

    #[test]
    fn build_pod_wires_checkout_env_vars_and_training_command() {
        let training = sample_training();
        let vcs = sample_vcs(None);

        let pod = build_pod(&training, &vcs, "feature/x");
        let container = &pod.spec.unwrap().containers[0];

        let env = container.env.unwrap();
        let find = |name: &str| env.iter().find(|e| e.name == name).unwrap().value.clone().unwrap();
        assert_eq!(find("GIT_CHECKOUT_REPO_URI"), vcs.spec.uri);
        assert_eq!(find("GIT_CHECKOUT_REPO_REF"), "feature/x");

        let command = container.command.unwrap();
        assert!(command[2].contains("python"));
        assert!(command[2].contains("train.py"));
    }

    fn sample_vcs(private_key: Option<String>) -> VCS {
        VCS {
            metadata: ObjectMeta {
                name: Some("v1".into()),
                namespace: Some("default".into()),
                uid: Some("uid-vcs".into()),
                ..Default::default()
            },
            spec: crate::crd::VcsSpec {
                uri: "git@example.com:org/repo.git".into(),
                default_ref: "main".into(),
                private_key,
            },
        }
    }

    fn sample_training() -> ModelTraining {
        ModelTraining {
            metadata: ObjectMeta {
                name: Some("mt1".into()),
                namespace: Some("default".into()),
                uid: Some("uid-2".into()),
                ..Default::default()
            },
            spec: crate::crd::ModelTrainingSpec {
                toolchain: "python".into(),
                image: "foo:1".into(),
                vcs: "v1".into(),
                custom_vcs_branch: None,
                entrypoint: "train.py".into(),
                arguments: Vec::new(),
                resources: crate::crd::model_training::TrainingResources {
                    cpu: "1".into(),
                    ram: "2Gi".into(),
                },
                parameters: BTreeMap::new(),
            },
            status: None,
        }
    }
}
