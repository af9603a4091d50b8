use clap::{Parser, Subcommand};
use convoy_config::Blueprint;
use convoy_driver::DriverFactory;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod deploy;

use deploy::Deployment;

#[derive(Parser)]
#[command(name = "convoy", version, about = "Distributed deployment orchestrator")]
struct Cli {
    /// Path to the blueprint file (defaults to ./convoy.toml)
    #[arg(long, global = true)]
    blueprint: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the blueprint and print a summary
    Validate,
    /// Start all resources, then the proxy controller
    Up,
    /// Stop the proxy and all resources
    Down,
}

fn load_blueprint(path: &Option<PathBuf>) -> Result<Blueprint, convoy_config::ConfigError> {
    match path {
        Some(path) => Blueprint::load(path),
        None => Blueprint::load_from_dir(&std::env::current_dir()?),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let blueprint = match load_blueprint(&cli.blueprint) {
        Ok(blueprint) => blueprint,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Validate => validate(&blueprint),
        Commands::Up => up(&blueprint).await,
        Commands::Down => down(&blueprint).await,
    }
}

fn validate(blueprint: &Blueprint) -> ExitCode {
    // Loading already validated; print what the blueprint describes.
    let summary = serde_json::json!({
        "name": blueprint.name,
        "services": blueprint.services.iter().map(|s| s.kind.to_string()).collect::<Vec<_>>(),
        "resources": blueprint.resources.iter().map(|r| {
            serde_json::json!({ "id": r.id, "kind": r.kind.to_string(), "host": r.host })
        }).collect::<Vec<_>>(),
        "proxy": blueprint.proxy.as_ref().map(|p| p.resource.clone()),
    });
    println!("{}", serde_json::to_string_pretty(&summary).unwrap_or_default());
    ExitCode::SUCCESS
}

async fn up(blueprint: &Blueprint) -> ExitCode {
    let deployment = Deployment::from_blueprint(blueprint);

    // Independent resources start fully in parallel; each lifecycle is
    // strictly sequential internally.
    let mut tasks = tokio::task::JoinSet::new();
    for resource in &deployment.backends {
        let resource = resource.clone();
        tasks.spawn(async move {
            let result = resource.start().await;
            (resource.id().to_string(), result)
        });
    }

    let mut failed = false;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((id, Ok(()))) => info!(resource = %id, "started"),
            Ok((id, Err(e))) => {
                error!(resource = %id, error = %e, "failed to start");
                failed = true;
            }
            Err(e) => {
                error!(error = %e, "start task panicked");
                failed = true;
            }
        }
    }

    if let Some(controller) = &deployment.controller {
        match controller.start().await {
            Ok(()) => info!(resource = %controller.resource().id(), "proxy controller active"),
            Err(e) => {
                error!(error = %e, "failed to start proxy controller");
                failed = true;
            }
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn down(blueprint: &Blueprint) -> ExitCode {
    let deployment = Deployment::from_blueprint(blueprint);

    // A fresh process has no lifecycle state for a deployment started by
    // an earlier run, so stop at the driver level: driver stop is
    // idempotent and a no-op for processes that are already gone.
    let mut failed = false;
    for spec in &blueprint.resources {
        let executor = deployment.executor_for(spec);
        let driver = match deployment
            .registry
            .build(&spec.kind, spec.platform, executor, &spec.id)
        {
            Ok(driver) => driver,
            Err(e) => {
                error!(resource = %spec.id, error = %e, "no driver");
                failed = true;
                continue;
            }
        };
        match driver.stop().await {
            Ok(()) => info!(resource = %spec.id, "stopped"),
            Err(e) => {
                warn!(resource = %spec.id, error = %e, "stop failed");
                failed = true;
            }
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
