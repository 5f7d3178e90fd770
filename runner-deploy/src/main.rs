use anyhow::{Context, Result};
use clap::Parser;
use deploy_core::{
    DeployError, DeployOptions, DeployReport, Deployer, format_outputs, init_tracing, load_config,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

/// Package a Lambda function, upload it to S3 and create or update the
/// CloudFormation stack that runs it.
#[derive(Parser, Debug)]
#[command(
    name = "lambda-deploy",
    version,
    after_help = "Preflight always checks AWS credentials. To also require external programs \
                  such as the aws CLI, list them under `packaging.required_tools` in the \
                  --config file; a missing one exits with status 1."
)]
struct Args {
    /// Stack to create or update [default: hello-world-stack]
    stack_name: Option<String>,
    /// Name given to the Lambda function [default: hello-world-function]
    function_name: Option<String>,
    /// AWS region [default: us-east-1]
    region: Option<String>,

    /// YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// CloudFormation template
    #[arg(long)]
    template: Option<PathBuf>,
    /// Directory holding the function code
    #[arg(long)]
    source_dir: Option<PathBuf>,
    /// Artifact bucket, instead of the account-derived one
    #[arg(long)]
    bucket: Option<String>,
    /// Check and package only, without touching S3 or CloudFormation
    #[arg(long)]
    dry_run: bool,
    /// Keep the local archive after the run
    #[arg(long)]
    keep_archive: bool,
    /// Print the deployment report as JSON
    #[arg(long)]
    json: bool,
}

/// Entry point for deploying from a workstation or a CI job.
///
/// Logs go to stderr. Stdout carries only the stack outputs (or the JSON
/// report) so it can be piped.
#[tokio::main]
async fn main() -> ExitCode {
    init_tracing("deploy_core=info,lambda_deploy=info");
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Deployment failed: {:#}", e);
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
    config = config.with_overrides(args.stack_name, args.function_name, args.region);
    if let Some(template) = args.template {
        config.template = template;
    }
    if let Some(source_dir) = args.source_dir {
        config.source_dir = source_dir;
    }
    if let Some(bucket) = args.bucket {
        config.bucket = Some(bucket);
    }

    info!(
        "Deploying stack {} (function {}) to {}",
        config.stack_name, config.function_name, config.region
    );
    let deployer = Deployer::from_aws(config).await;
    let report = deployer
        .deploy(DeployOptions {
            keep_archive: args.keep_archive,
            dry_run: args.dry_run,
        })
        .await?;

    for condition in &report.recovered {
        warn!("{}", condition);
    }
    print_report(&report, args.json)
}

fn print_report(report: &DeployReport, json: bool) -> Result<()> {
    if json {
        let rendered =
            serde_json::to_string_pretty(report).context("Failed to serialize the report")?;
        println!("{rendered}");
    } else if report.stack_status.is_some() {
        print!("{}", format_outputs(&report.stack_name, &report.outputs));
    } else {
        println!(
            "Dry run: {} files ({} bytes) ready for s3://{}/{}",
            report.archive_entries, report.archive_bytes, report.bucket, report.key
        );
    }
    Ok(())
}
