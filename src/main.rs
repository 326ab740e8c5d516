//! configpin - pin workloads to immutable configuration snapshots

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use configpin::config::{ControllerConfig, WebhookConfig, WebhookRegistration, DEFAULT_CONCURRENCY};
use configpin::controller::{build_controllers, editable_cache};
use configpin::crd::all_crds;
use configpin::retry::{retry_with_backoff, RetryConfig};
use configpin::webhook::kinds::WorkloadKinds;
use configpin::webhook::{ensure_webhook_configs, serve, WebhookState};
use configpin::{DEFAULT_WEBHOOK_PORT, FIELD_MANAGER};

/// configpin - snapshot EditableConfigs and freeze workload references to them
#[derive(Parser, Debug)]
#[command(name = "configpin", version, about, long_about = None)]
struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the EditableConfig and ConfigSnapshot controllers (default mode)
    Controller(ControllerArgs),

    /// Run the admission webhook server (freeze + snapshot immutability)
    Webhook(WebhookArgs),
}

/// Controller mode arguments
#[derive(Args, Debug)]
struct ControllerArgs {
    /// Concurrent reconciliations per controller
    #[arg(long, env = "CONFIGPIN_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: u16,

    /// Do not install/upgrade CRDs on startup
    #[arg(long)]
    skip_crd_install: bool,

    /// Initial requeue delay after a retryable failure, in milliseconds
    #[arg(long, default_value_t = 1000)]
    retry_initial_ms: u64,

    /// Maximum requeue delay, in seconds
    #[arg(long, default_value_t = 300)]
    retry_max_secs: u64,
}

/// Webhook mode arguments
#[derive(Args, Debug)]
struct WebhookArgs {
    /// Address to serve HTTPS on
    #[arg(long, env = "CONFIGPIN_WEBHOOK_ADDR", default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_WEBHOOK_PORT)))]
    addr: SocketAddr,

    /// PEM serving certificate
    #[arg(long, env = "CONFIGPIN_TLS_CERT", default_value = "/certs/tls.crt")]
    tls_cert: PathBuf,

    /// PEM private key
    #[arg(long, env = "CONFIGPIN_TLS_KEY", default_value = "/certs/tls.key")]
    tls_key: PathBuf,

    /// PEM CA bundle; when set, webhook configurations are installed
    #[arg(long, env = "CONFIGPIN_CA_BUNDLE")]
    ca_bundle: Option<PathBuf>,

    /// Service fronting this server, used for registration
    #[arg(long, default_value = "configpin-webhook")]
    service_name: String,

    /// Namespace of that Service
    #[arg(long, env = "POD_NAMESPACE", default_value = "configpin-system")]
    service_namespace: String,

    /// Port of that Service
    #[arg(long, default_value_t = 443)]
    service_port: i32,

    /// Seconds to drain in-flight requests on shutdown
    #[arg(long, default_value_t = 10)]
    shutdown_grace_secs: u64,
}

impl From<ControllerArgs> for ControllerConfig {
    fn from(args: ControllerArgs) -> Self {
        Self {
            concurrency: args.concurrency,
            retry: RetryConfig {
                initial_delay: Duration::from_millis(args.retry_initial_ms),
                max_delay: Duration::from_secs(args.retry_max_secs),
                ..Default::default()
            },
            install_crds: !args.skip_crd_install,
        }
    }
}

impl From<WebhookArgs> for WebhookConfig {
    fn from(args: WebhookArgs) -> Self {
        let mut config = WebhookConfig::new(args.tls_cert, args.tls_key);
        config.addr = args.addr;
        config.shutdown_grace = Duration::from_secs(args.shutdown_grace_secs);
        config.registration = args.ca_bundle.map(|ca_bundle_path| WebhookRegistration {
            ca_bundle_path,
            service_name: args.service_name,
            service_namespace: args.service_namespace,
            service_port: args.service_port,
        });
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if cli.crd {
        for crd in all_crds() {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    match cli.command {
        Some(Commands::Webhook(args)) => run_webhook(args.into()).await,
        Some(Commands::Controller(args)) => run_controller(args.into()).await,
        None => run_controller(ControllerConfig::default()).await,
    }
}

/// Server-side apply all configpin CRDs
///
/// The controller installs its own CRDs so their schema always matches the
/// binary.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in all_crds() {
        let name = crd
            .metadata
            .name
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generated CRD has no name"))?;
        tracing::info!(crd = %name, "Installing CRD");
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install CRD {}: {}", name, e))?;
    }

    tracing::info!("All configpin CRDs installed/updated");
    Ok(())
}

async fn run_controller(config: ControllerConfig) -> anyhow::Result<()> {
    config.validate()?;
    tracing::info!("configpin controller starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if config.install_crds {
        retry_with_backoff(
            &RetryConfig::with_max_attempts(10),
            "install CRDs",
            || ensure_crds_installed(&client),
        )
        .await?;
    }

    let controllers = build_controllers(&client, &config);
    futures::future::join_all(controllers).await;

    tracing::info!("configpin controller shutting down");
    Ok(())
}

async fn run_webhook(config: WebhookConfig) -> anyhow::Result<()> {
    config.validate()?;
    tracing::info!("configpin webhook starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let kinds = WorkloadKinds::builtin();

    let (editables, editable_task) = editable_cache(&client);
    tokio::spawn(editable_task);
    editables
        .wait_until_ready()
        .await
        .map_err(|e| anyhow::anyhow!("EditableConfig cache closed: {}", e))?;
    tracing::info!("EditableConfig cache synced");

    if let Some(reg) = &config.registration {
        retry_with_backoff(
            &RetryConfig::with_max_attempts(10),
            "install webhook configurations",
            || ensure_webhook_configs(&client, reg, &kinds),
        )
        .await?;
    }

    let state = Arc::new(WebhookState::new(Arc::new(editables), kinds));
    serve(&config, state).await?;

    tracing::info!("configpin webhook shutting down");
    Ok(())
}
