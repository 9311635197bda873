mod manifest;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use kubefn_deploy::{Deployer, RolloutState};
use kubefn_k8s::{ClusterConfig, KubeClient};
use kubefn_logs::{LogChunk, LogFetcher};
use kubefn_types::{FunctionDefinition, LogFilterOptions, StartTime};

use crate::manifest::{DEFAULT_MANIFEST, Manifest};

/// kubefn - Deploy source-only functions to Kubernetes and read their logs
#[derive(Parser, Debug)]
#[command(name = "kubefn")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Kubernetes context name (defaults to the kubeconfig's current context)
    #[arg(long, global = true)]
    context: Option<String>,

    /// Namespace (defaults to the context's namespace)
    #[arg(long, short = 'n', global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deploy the functions of a service manifest
    Deploy {
        /// Path to the service manifest
        #[arg(long, short = 'm', default_value = DEFAULT_MANIFEST)]
        manifest: PathBuf,

        /// Replace functions whose stored definition differs
        #[arg(long, short = 'f')]
        force: bool,

        /// Deploy only this function
        #[arg(long)]
        function: Option<String>,
    },

    /// Print the logs of a deployed function
    Logs {
        /// Function name
        #[arg(value_name = "FUNCTION")]
        function: String,

        /// Keep streaming new log output
        #[arg(long, short = 't')]
        follow: bool,

        /// Number of most recent lines to keep
        #[arg(long, short = 'c')]
        count: Option<usize>,

        /// Only show lines from this time on (e.g. 15m, 2h, 1d, 2024-01-15T10:30:00Z)
        #[arg(long)]
        since: Option<StartTime>,

        /// Regex lines must match
        #[arg(long)]
        filter: Option<String>,

        /// Do not print the retrieved logs
        #[arg(long)]
        silent: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let cluster = ClusterConfig::load(args.context.as_deref()).await?;
    let client = Arc::new(KubeClient::new(&cluster)?);
    let namespace = args
        .namespace
        .clone()
        .unwrap_or_else(|| cluster.default_namespace.clone());

    match args.command {
        Command::Deploy {
            manifest,
            force,
            function,
        } => {
            let manifest = Manifest::load(&manifest)?;
            let mut functions = manifest.definitions(function.as_deref())?;
            if let Some(ns) = &args.namespace {
                for def in &mut functions {
                    def.namespace = Some(ns.clone());
                }
            }

            let deployer =
                Deployer::new(client, &namespace, &cluster.endpoint_host).with_force(force);
            deploy(deployer, &functions).await
        }
        Command::Logs {
            function,
            follow,
            count,
            since,
            filter,
            silent,
        } => {
            let options = LogFilterOptions {
                start_time: since,
                count,
                pattern: filter,
                silent,
            };
            let fetcher = LogFetcher::new(client, &namespace);
            if follow {
                follow_logs(&fetcher, &function, &options).await?;
            } else {
                fetcher
                    .fetch(&function, &options)
                    .await
                    .with_context(|| format!("Failed to get logs of function '{}'", function))?;
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn deploy(
    deployer: Deployer<KubeClient>,
    functions: &[FunctionDefinition],
) -> Result<ExitCode> {
    if functions.is_empty() {
        warn!("No functions to deploy");
        return Ok(ExitCode::SUCCESS);
    }

    let mut report = deployer.deploy(functions).await;
    for (function, outcome) in &report.outcomes {
        info!(function = %function, ?outcome, "Submitted");
    }
    let failure = report.take_failure();

    let summary = report.wait_rollouts().await;
    for (function, state) in &summary.states {
        match state {
            RolloutState::Stable => info!(function = %function, "Function deployed"),
            RolloutState::GivenUp => {
                warn!(function = %function, "No pods observed; check the function status later")
            }
            other => error!(function = %function, state = ?other, "Rollout did not settle"),
        }
    }
    for e in &summary.errors {
        error!("{}", e);
    }

    if let Some(failure) = failure {
        eprintln!("Error: {}", failure);
        return Ok(ExitCode::FAILURE);
    }
    if summary.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

async fn follow_logs(
    fetcher: &LogFetcher<KubeClient>,
    function: &str,
    options: &LogFilterOptions,
) -> Result<()> {
    let (log_tx, mut log_rx) = mpsc::unbounded_channel::<LogChunk>();
    let mut follower = fetcher
        .follow(function, options, log_tx)
        .await
        .with_context(|| format!("Failed to follow logs of function '{}'", function))?;
    info!(function, pods = follower.active_count(), "Following logs, press Ctrl-C to stop");

    loop {
        tokio::select! {
            chunk = log_rx.recv() => match chunk {
                Some(chunk) => {
                    if !options.silent {
                        println!("{}", chunk.text);
                    }
                }
                // Every pod stream ended
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                follower.stop();
                break;
            }
        }
    }

    Ok(())
}
