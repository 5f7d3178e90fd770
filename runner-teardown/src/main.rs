use anyhow::{Context, Result};
use clap::Parser;
use deploy_core::{DeployError, Deployer, TeardownOptions, init_tracing, load_config};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

/// Delete a stack created by lambda-deploy, optionally with its artifacts.
#[derive(Parser, Debug)]
#[command(name = "lambda-teardown", version)]
struct Args {
    /// Stack to delete [default: hello-world-stack]
    stack_name: Option<String>,
    /// AWS region [default: us-east-1]
    region: Option<String>,

    /// YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Delete the uploaded archive as well
    #[arg(long)]
    purge_artifacts: bool,
    /// Delete the artifact bucket too (implies --purge-artifacts)
    #[arg(long)]
    remove_bucket: bool,
    /// Artifact bucket, instead of the account-derived one
    #[arg(long)]
    bucket: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing("deploy_core=info,lambda_teardown=info");
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Teardown failed: {:#}", e);
            let code = e
                .downcast_ref::<DeployError>()
                .map(DeployError::exit_code)
                .unwrap_or(2);
            ExitCode::from(code)
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    config = config.with_overrides(args.stack_name, None, args.region);
    if let Some(bucket) = args.bucket {
        config.bucket = Some(bucket);
    }

    let stack_name = config.stack_name.clone();
    let report = Deployer::from_aws(config)
        .await
        .teardown(TeardownOptions {
            purge_artifacts: args.purge_artifacts,
            remove_bucket: args.remove_bucket,
        })
        .await?;

    if report.stack_deleted {
        println!("Stack {stack_name} deleted");
    } else {
        println!("Stack {stack_name} did not exist");
    }
    if report.object_deleted {
        info!("Archive object removed");
    }
    if report.bucket_deleted {
        info!("Artifact bucket removed");
    }
    Ok(())
}
