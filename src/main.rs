use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use dialoguer::Confirm;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tkup::cluster::kubernetes::KubeInspector;
use tkup::config::{Args, Config};
use tkup::error::TkupError;
use tkup::k8s::client::{build_client, current_context};
use tkup::output::{print_check_report, print_upgrade_plan, print_upgrade_result};
use tkup::talos::talosctl::Talosctl;
use tkup::upgrade::Orchestrator;
use tkup::version::github::GitHubReleaseIndex;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = tkup::logging::init(args.log_format, &args.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    debug!("Starting tkup - Talos and Kubernetes upgrade tool");

    match run(&args).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

/// Main application logic. Returns `Ok(false)` when the run finished with
/// errors.
async fn run(args: &Args) -> Result<bool> {
    let config = Config::from_args(args)?;
    info!(
        config = %config.config_path.display(),
        talos = %config.upgrade.talos.version,
        kubernetes = %config.upgrade.kubernetes.version,
        "Loaded upgrade configuration"
    );

    let context_name = current_context(config.kubeconfig.as_deref(), config.context.as_deref());
    let client = build_client(config.kubeconfig.as_deref(), config.context.as_deref()).await?;
    let talosctl = Arc::new(Talosctl::new(config.talosconfig.clone()));
    let releases = GitHubReleaseIndex::new(&config.release_index_url, config.github_token.clone())?;

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let orchestrator = Orchestrator::new(
        Arc::new(KubeInspector::new(client)),
        Arc::new(releases),
        talosctl.clone(),
        talosctl,
        config.upgrade.clone(),
        config.timings.clone(),
        cancel,
    );

    if config.check_only {
        let report = orchestrator.check_only().await?;
        print_check_report(&report, &context_name);
        let comparable = [&report.talos, &report.kubernetes]
            .iter()
            .all(|c| c.compare_error.is_none());
        return Ok(report.prerequisite_issues.is_empty() && comparable);
    }

    print_upgrade_plan(&config.upgrade, &context_name);

    if !config.yes
        && !Confirm::new()
            .with_prompt("Proceed with the upgrade?")
            .default(false)
            .interact()?
    {
        println!("{}", "Upgrade cancelled.".yellow());
        return Ok(true);
    }

    let result = orchestrator.run().await?;
    print_upgrade_result(&result);

    Ok(!result.has_errors())
}

/// Cancel the run on Ctrl-C. A node upgrade already in flight is abandoned
/// at the next await point.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received Ctrl-C, cancelling upgrade");
                cancel.cancel();
            }
            Err(e) => {
                error!(error = %TkupError::unavailable("signal handler", e), "Ctrl-C handling disabled");
            }
        }
    });
}
