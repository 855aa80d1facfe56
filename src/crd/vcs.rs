//! The `VCS` custom resource: a version-control source a `ModelTraining`
//! can reference by name (spec §3).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Desired state of a version-control source.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "legion.epam.com",
    version = "v1",
    kind = "VCS",
    plural = "vcss",
    singular = "vcs",
    namespaced
)]
pub struct VcsSpec {
    /// Repository URI, e.g. `git@host:org/repo.git`.
    pub uri: String,
    /// Branch/ref checked out when a `ModelTraining` doesn't override it.
    #[serde(rename = "defaultRef")]
    pub default_ref: String,
    /// Base64-encoded private key. Absent means anonymous checkout.
    #[serde(rename = "privateKey", default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

impl VcsSpec {
    /// Decodes and validates `private_key`, matching
    /// `VCS.private_key_decoded` in the Python controller.
    pub fn decoded_private_key(&self) -> Result<Option<Vec<u8>>, base64::DecodeError> {
        self.private_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .map(|key| {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD.decode(key)
            })
            .transpose()
    }
}
