//! CAPC operator - CloudStack infrastructure provider for Cluster API

mod controller_runner;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use clap::{Parser, Subcommand};
use kube::{Api, Client};

use capc_common::crd::all_crds;
use capc_common::telemetry::{init_telemetry, TelemetryConfig};
use capc_common::FIELD_MANAGER;
use capc_controller::{Context, ReconcileConfig};

/// CloudStack infrastructure provider for Cluster API
#[derive(Parser, Debug)]
#[command(name = "capc", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    controller: ControllerArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controllers and the admission webhook (default mode)
    Controller,
}

#[derive(clap::Args, Debug)]
struct ControllerArgs {
    /// Port the admission webhook listens on
    #[arg(long, global = true, env = "CAPC_WEBHOOK_PORT", default_value_t = 9443)]
    webhook_port: u16,

    /// Webhook serving certificate
    #[arg(
        long,
        global = true,
        env = "CAPC_WEBHOOK_CERT",
        default_value = "/tmp/k8s-webhook-server/serving-certs/tls.crt"
    )]
    webhook_cert: PathBuf,

    /// Webhook serving key
    #[arg(
        long,
        global = true,
        env = "CAPC_WEBHOOK_KEY",
        default_value = "/tmp/k8s-webhook-server/serving-certs/tls.key"
    )]
    webhook_key: PathBuf,

    /// Requeue interval for Ready objects, in seconds
    #[arg(long, global = true, env = "CAPC_REQUEUE_SECS", default_value_t = 300)]
    requeue_secs: u64,

    /// Only watch this namespace
    #[arg(long, global = true, env = "CAPC_WATCH_NAMESPACE")]
    namespace: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        for crd in all_crds() {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    init_telemetry(TelemetryConfig::default())?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.controller).await,
    }
}

/// Ensure all provider CRDs are installed
///
/// The operator installs its own CRDs on startup using server-side apply so
/// the served schema always matches the operator version.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in all_crds() {
        let name = crd.metadata.name.clone().unwrap_or_default();
        tracing::info!(crd = %name, "Installing CRD");
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install CRD {}: {}", name, e))?;
    }

    tracing::info!("All provider CRDs installed/updated");
    Ok(())
}

/// Serve the admission webhook over TLS
async fn serve_webhook(args: &ControllerArgs) -> anyhow::Result<()> {
    let tls_config = RustlsConfig::from_pem_file(&args.webhook_cert, &args.webhook_key)
        .await
        .map_err(|e| anyhow::anyhow!("TLS config error: {}", e))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], args.webhook_port));
    tracing::info!(addr = %addr, path = capc_webhook::VALIDATE_PATH, "Starting admission webhook");

    axum_server::bind_rustls(addr, tls_config)
        .serve(capc_webhook::router().into_make_service())
        .await
        .map_err(|e| anyhow::anyhow!("Webhook server error: {}", e))
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    tracing::info!("CAPC controller starting...");

    let client = capc_common::kube_utils::create_client(None)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client).await?;

    let config = ReconcileConfig {
        requeue_interval: Duration::from_secs(args.requeue_secs),
        ..ReconcileConfig::default()
    };
    let ctx = Arc::new(Context::builder(client.clone()).config(config).build());

    if let Some(ns) = &args.namespace {
        tracing::info!(namespace = %ns, "Watching a single namespace");
    }
    tracing::info!("Starting controllers:");
    let controllers =
        controller_runner::build_controllers(client, ctx, args.namespace.as_deref());

    tokio::select! {
        _ = futures::future::join_all(controllers) => {
            tracing::info!("Controllers stopped");
        }
        result = serve_webhook(&args) => {
            result?;
        }
    }

    tracing::info!("CAPC controller shutting down");
    Ok(())
}
