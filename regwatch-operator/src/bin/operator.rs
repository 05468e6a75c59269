//! regwatch operator binary.
//!
//! Runs the Image controller against the current Kubernetes context.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use futures::StreamExt;
use kube::runtime::Controller;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, CustomResourceExt};

use regwatch_host::HostConfig;
use regwatch_host::observability::{TracingConfig, init_tracing};
use regwatch_operator::controller::{
    ControllerContext, ControllerSettings, ImageController, error_policy,
};
use regwatch_operator::crd::Image;

/// Keep Image resources pointed at their current digest.
#[derive(Parser)]
#[command(name = "regwatch-operator")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Print the CRD YAML and exit
    #[arg(long)]
    generate_crds: bool,

    /// Host configuration file (YAML)
    #[arg(short, long, env = "REGWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Only watch this namespace
    #[arg(short, long, env = "REGWATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Seconds between checks of an unchanged image
    #[arg(long, env = "REGWATCH_REQUEUE_SECS", default_value_t = 300)]
    requeue_secs: u64,

    /// Seconds to wait after a failed check
    #[arg(long, env = "REGWATCH_ERROR_BACKOFF_SECS", default_value_t = 60)]
    error_backoff_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.generate_crds {
        generate_crds()?;
        return Ok(());
    }

    init_tracing(&TracingConfig::from_env())?;
    tracing::info!("Starting regwatch operator");

    let config =
        HostConfig::load(args.config.as_deref()).context("Failed to load host configuration")?;
    let dispatcher =
        regwatch_host::build_dispatcher(&config).context("Failed to build dispatcher")?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    tracing::info!("Connected to Kubernetes cluster");

    let settings = ControllerSettings {
        requeue: Duration::from_secs(args.requeue_secs),
        error_backoff: Duration::from_secs(args.error_backoff_secs),
    };
    let ctx = Arc::new(ControllerContext::new(
        client.clone(),
        Arc::new(dispatcher),
        settings,
    ));

    let images: Api<Image> = match &args.namespace {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    };
    run_image_controller(images, ctx).await
}

/// Run the Image controller until shutdown.
async fn run_image_controller(images: Api<Image>, ctx: Arc<ControllerContext>) -> anyhow::Result<()> {
    tracing::info!("Starting Image controller");
    let controller = ImageController::new(ctx.clone());

    Controller::new(images, WatcherConfig::default())
        .with_config(ControllerConfig::default().debounce(Duration::from_secs(1)))
        .shutdown_on_signal()
        .run(
            move |image, _ctx| {
                let controller = controller.clone();
                async move { controller.reconcile(image).await.map(Into::into) }
            },
            error_policy,
            ctx,
        )
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    tracing::debug!(image = %obj.name, ?action, "Reconciled image");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Image controller stream error");
                }
            }
        })
        .await;

    Ok(())
}

/// Print the CRD YAML.
fn generate_crds() -> anyhow::Result<()> {
    println!("---");
    println!("{}", serde_yaml::to_string(&Image::crd())?);
    Ok(())
}
