pub mod model_training;
pub mod vcs;

pub use model_training::{ModelTraining, ModelTrainingSpec, ModelTrainingStatus, TrainingState};
pub use vcs::{VCS, VcsSpec};

use kube::CustomResourceExt;

/// Prints a CustomResourceDefinition as YAML, matching the teacher's
/// `print_crd_without_formats` — used by the operator binary's
/// `--print-*-crd` flags.
pub fn print_crd<K: CustomResourceExt>() -> Result<(), serde_yaml::Error> {
    let crd = K::crd();
    println!("{}", serde_yaml::to_string(&crd)?);
    Ok(())
}
