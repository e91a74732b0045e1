//! harness-sa-rotator - rotate a service-account token into Harness

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::anyhow;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};

use harness_sa_rotator::cluster::{create_client, KubeSecretManager};
use harness_sa_rotator::config::{LogFormat, RotateArgs};
use harness_sa_rotator::harness::HarnessClient;
use harness_sa_rotator::outputs::write_report;
use harness_sa_rotator::rbac::render_manifests;
use harness_sa_rotator::telemetry::init_telemetry;
use harness_sa_rotator::workflow::RotationWorkflow;
use harness_sa_rotator::DEFAULT_NAMESPACE;

/// Rotate a Kubernetes service-account token and publish it to Harness
///
/// Without a subcommand, runs one rotation using the options below.
#[derive(Parser, Debug)]
#[command(name = "harness-sa-rotator", version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Log output format
    #[arg(long, env = "PLUGIN_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    rotate: RotateArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the Role and RoleBinding the rotator needs, then exit
    Rbac(RbacArgs),
}

#[derive(Args, Debug)]
struct RbacArgs {
    /// Namespace of the service account being rotated
    #[arg(long, env = "PLUGIN_K8S_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    k8s_namespace: String,

    /// Service account the pipeline step runs as
    #[arg(long)]
    runner_service_account: String,

    /// Namespace of the runner service account (defaults to --k8s-namespace)
    #[arg(long)]
    runner_namespace: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // kube and reqwest both pull in rustls; pin the process-wide provider
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("failed to install rustls crypto provider: {e:?}");
        return ExitCode::FAILURE;
    }

    let cli = Cli::parse();

    if let Err(e) = init_telemetry(cli.log_format) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Some(Commands::Rbac(args)) => print_rbac(args),
        None => run_rotation(cli.rotate).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            ExitCode::FAILURE
        }
    }
}

fn print_rbac(args: RbacArgs) -> anyhow::Result<()> {
    let runner_namespace = args
        .runner_namespace
        .as_deref()
        .unwrap_or(&args.k8s_namespace);
    let yaml = render_manifests(
        &args.k8s_namespace,
        runner_namespace,
        &args.runner_service_account,
    )?;
    print!("{yaml}");
    Ok(())
}

async fn run_rotation(args: RotateArgs) -> anyhow::Result<()> {
    let config = args
        .rotation_config()
        .map_err(|e| anyhow!("invalid configuration: {e}"))?;
    let harness_config = args
        .harness_client_config()
        .map_err(|e| anyhow!("invalid configuration: {e}"))?;
    let poll = args
        .poll_config()
        .map_err(|e| anyhow!("invalid configuration: {e}"))?;

    let client = create_client(args.kubeconfig.as_deref())
        .await
        .map_err(|e| anyhow!("failed to create kubernetes client: {e}"))?;
    let cluster = KubeSecretManager::new(client)
        .with_poll_config(poll)
        .with_labels(config.scope.labels());
    let store = HarnessClient::new(harness_config)
        .map_err(|e| anyhow!("failed to create harness client: {e}"))?;

    let workflow = RotationWorkflow::new(config, Arc::new(cluster), Arc::new(store));
    let report = workflow.run().await?;

    if let Some(cleanup) = &report.cleanup {
        for failure in &cleanup.failures {
            warn!(error = %failure, "Cleanup incomplete");
        }
    }

    if let Err(e) = write_report(&report, &args.output_file, &args.secret_output_file) {
        warn!(error = %e, "Failed to write step outputs");
    }

    info!(
        secret = %report.token_secret.name,
        identifier = %report.identifier,
        state = ?report.state,
        "Rotation complete"
    );
    Ok(())
}
