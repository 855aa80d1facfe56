//! The `ModelTraining` custom resource (spec §3).

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Toolchains the bootstrapper knows how to run. Kept in sync with
/// `bin/bootstrapper.rs`'s dispatch table.
pub const KNOWN_TOOLCHAINS: &[&str] = &["python"];

/// Entrypoint extensions the bootstrapper's `train_code` stage dispatches
/// on. Kept in sync with `bin/bootstrapper.rs`'s `match extension` arms.
pub const KNOWN_ENTRYPOINT_EXTENSIONS: &[&str] = &["ipynb", "py", "pyc"];

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct TrainingResources {
    pub cpu: String,
    pub ram: String,
}

/// Desired state of a single training run.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "legion.epam.com",
    version = "v1",
    kind = "ModelTraining",
    plural = "model-trainings",
    singular = "model-training",
    namespaced,
    status = "ModelTrainingStatus"
)]
pub struct ModelTrainingSpec {
    /// Toolchain name; must be one of [`KNOWN_TOOLCHAINS`].
    pub toolchain: String,
    /// Container image the training pod runs.
    pub image: String,
    /// Name of a `VCS` resource in the same namespace.
    pub vcs: String,
    /// Overrides the VCS's default ref when set.
    #[serde(rename = "customVcsBranch", default, skip_serializing_if = "Option::is_none")]
    pub custom_vcs_branch: Option<String>,
    /// Repo-relative path to the training entrypoint.
    pub entrypoint: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    pub resources: TrainingResources,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum TrainingState {
    #[default]
    Unknown,
    Running,
    Succeeded,
    Failed,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct ModelTrainingStatus {
    #[serde(default)]
    pub state: TrainingState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl ModelTrainingSpec {
    /// Effective VCS branch: `customVcsBranch` if set, else the VCS's
    /// `defaultRef` (spec §4.6 step 2).
    pub fn effective_branch<'a>(&'a self, vcs_default_ref: &'a str) -> &'a str {
        self.custom_vcs_branch.as_deref().unwrap_or(vcs_default_ref)
    }
}
