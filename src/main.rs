use clap::Parser;
use kube::Client;
use legion_operator::config::Config;
use legion_operator::controllers::{ModelTrainingHandler, VcsHandler};
use legion_operator::crd::{self, ModelTraining, VCS};
use legion_operator::engine::Engine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::parse();

    if config.print_vcs_crd {
        crd::print_crd::<VCS>()?;
        return Ok(());
    }
    if config.print_model_training_crd {
        crd::print_crd::<ModelTraining>()?;
        return Ok(());
    }

    if let Some(kubeconfig) = &config.kubeconfig {
        // kube::Client::try_default() consults KUBECONFIG on first use;
        // set it before that happens.
        unsafe { std::env::set_var("KUBECONFIG", kubeconfig) };
    }

    let client = Client::try_default().await?;
    let resync_period = config.resync_period();

    let vcs_engine = Engine::new(client.clone(), VcsHandler, resync_period);
    let model_training_handler = ModelTrainingHandler::new(client.clone());
    let model_training_engine = Engine::new(client, model_training_handler, resync_period);

    tokio::join!(vcs_engine.run(), model_training_engine.run());

    Ok(())
}
