use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use hpc_webhook::app::Application;
use hpc_webhook::capacity::snapshot_channel;
use hpc_webhook::capacity::CapacityPoller;
use hpc_webhook::config::Cli;
use hpc_webhook::config::Commands;
use hpc_webhook::config::ScanArgs;
use hpc_webhook::config::ServeArgs;
use hpc_webhook::k8s::KubeInventory;
use utils::logging;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    let _guard = logging::init(cli.log_file.as_deref())?;

    match cli.command {
        Commands::Serve(serve_args) => run_serve(*serve_args).await,
        Commands::Scan(scan_args) => run_scan(scan_args).await,
    }
}

async fn run_serve(serve_args: ServeArgs) -> Result<()> {
    tracing::info!("Starting hpc-webhook {}", &**version::VERSION);

    let app = Application::build(serve_args).await?;
    app.run().await
}

async fn run_scan(scan_args: ScanArgs) -> Result<()> {
    let inventory = KubeInventory::connect(scan_args.cluster.kubeconfig.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize Kubernetes client: {e:?}"))?;

    let (publisher, _reader) = snapshot_channel();
    let poller = CapacityPoller::new(
        inventory,
        scan_args.cluster.gpu_resource_name,
        Duration::ZERO,
        publisher,
    );
    let snapshot = poller
        .scan()
        .await
        .map_err(|e| anyhow::anyhow!("Cluster scan failed: {e:?}"))?;

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
