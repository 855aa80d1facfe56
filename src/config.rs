//! CLI/env-derived runtime configuration (spec §8 ambient stack).

use std::time::Duration;

use clap::Parser;

/// Default resync period: how long a single watch connection is trusted
/// before `watch.rs` drops it and relists the owner kind from scratch.
const DEFAULT_RESYNC_PERIOD_SECS: u64 = 300;

#[derive(Parser, Debug, Clone)]
#[command(name = "operator", about = "Reconciles VCS and ModelTraining custom resources")]
pub struct Config {
    /// Path to a kubeconfig file. Falls back to in-cluster config, then
    /// `~/.kube/config`, when unset (kube::Client::try_default's own rule).
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<String>,

    /// Seconds a watch connection is trusted before it is dropped and the
    /// owner kind is relisted from scratch.
    #[arg(long, env = "RESYNC_PERIOD_SECS", default_value_t = DEFAULT_RESYNC_PERIOD_SECS)]
    pub resync_period_secs: u64,

    /// Print the VCS CustomResourceDefinition as YAML and exit.
    #[arg(long)]
    pub print_vcs_crd: bool,

    /// Print the ModelTraining CustomResourceDefinition as YAML and exit.
    #[arg(long)]
    pub print_model_training_crd: bool,
}

impl Config {
    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_period_secs)
    }
}
