use std::path::Path;
use tracing::info;

use crate::cloud::aws::{CloudFormationStacks, S3Store, StsIdentity, load_sdk_config};
use crate::cloud::{IdentityApi, ObjectStore, StackApi, StackRequest};
use crate::config::DeployConfig;
use crate::errors::{self, StackError};
use crate::package::package;
use crate::preflight::{SystemTools, ToolLocator, check_credentials, check_tools, required_tools};
use crate::publish::{ArtifactPublisher, BucketOutcome};
use crate::stack::StackOrchestrator;
use crate::telemetry::{DeployReport, StackAction, TeardownReport};

#[derive(Debug, Clone, Copy, Default)]
pub struct DeployOptions {
    /// Leave the local archive on disk after the run.
    pub keep_archive: bool,
    /// Stop after packaging. No S3 or CloudFormation calls are made.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TeardownOptions {
    pub purge_artifacts: bool,
    /// Also delete the bucket. Implies `purge_artifacts`.
    pub remove_bucket: bool,
}

/// The deployer drives a run from preflight to stack outputs.
pub struct Deployer {
    config: DeployConfig,
    identity: Box<dyn IdentityApi>,
    store: Box<dyn ObjectStore>,
    stacks: Box<dyn StackApi>,
    tools: Box<dyn ToolLocator>,
}

impl Deployer {
    pub fn new(
        config: DeployConfig,
        identity: Box<dyn IdentityApi>,
        store: Box<dyn ObjectStore>,
        stacks: Box<dyn StackApi>,
        tools: Box<dyn ToolLocator>,
    ) -> Self {
        Self {
            config,
            identity,
            store,
            stacks,
            tools,
        }
    }

    /// Wires the deployer to AWS using the ambient credential chain.
    pub async fn from_aws(config: DeployConfig) -> Self {
        let sdk_config = load_sdk_config(&config.region, config.endpoint_url.as_deref()).await;
        let custom_endpoint = config.endpoint_url.is_some();

        Self::new(
            config,
            Box::new(StsIdentity::new(&sdk_config)),
            Box::new(S3Store::new(&sdk_config, custom_endpoint)),
            Box::new(CloudFormationStacks::new(&sdk_config)),
            Box::new(SystemTools),
        )
    }

    /// Runs one deployment.
    ///
    /// 1. Validate the configuration.
    /// 2. Check required tools, then credentials.
    /// 3. Package the function into the archive.
    /// 4. Ensure the bucket exists and upload the archive.
    /// 5. Create or update the stack and wait for it.
    /// 6. Describe the stack to collect its outputs.
    ///
    /// The archive is removed when this returns, whatever the outcome, unless
    /// `keep_archive` is set.
    pub async fn deploy(&self, options: DeployOptions) -> errors::Result<DeployReport> {
        let config = &self.config;
        config.validate()?;

        check_tools(self.tools.as_ref(), &required_tools(config))?;
        let caller = check_credentials(self.identity.as_ref()).await?;
        let bucket = config.bucket_name(&caller.account);
        let template_body = read_template(&config.template)?;

        let mut archive = package(config)?;
        if options.keep_archive {
            archive.keep();
        }

        let mut report = DeployReport {
            stack_name: config.stack_name.clone(),
            region: config.region.clone(),
            action: StackAction::Skipped,
            bucket: bucket.clone(),
            key: config.s3_key.clone(),
            bucket_created: false,
            archive_bytes: archive.size(),
            archive_entries: archive.entries(),
            stack_status: None,
            outputs: Vec::new(),
            recovered: Vec::new(),
        };

        if options.dry_run {
            info!(
                "Dry run: would upload {} to s3://{}/{} and deploy stack {} in {}",
                archive.path().display(),
                bucket,
                config.s3_key,
                config.stack_name,
                config.region
            );
            return Ok(report);
        }

        let publisher = ArtifactPublisher::new(self.store.as_ref());
        let outcome = publisher
            .ensure_bucket(&bucket, config.location_constraint())
            .await?;
        report.bucket_created = outcome == BucketOutcome::Created;
        publisher
            .upload(archive.path(), &bucket, &config.s3_key)
            .await?;

        let request = StackRequest {
            stack_name: config.stack_name.clone(),
            template_body,
            parameters: config.stack_parameters(&bucket),
            capabilities: config.capabilities.clone(),
        };
        let orchestrator = StackOrchestrator::new(self.stacks.as_ref(), &config.wait);
        let deployment = orchestrator.deploy(&request).await?;
        report.action = deployment.action;
        report.recovered.extend(deployment.recovered);

        let description = orchestrator.describe(&config.stack_name).await?;
        report.stack_status = Some(description.status);
        report.outputs = description.outputs;

        info!(
            "Deployment of {} finished ({:?}, {} outputs)",
            config.stack_name,
            report.action,
            report.outputs.len()
        );
        Ok(report)
    }

    /// Deletes the stack, then optionally the uploaded archive and the bucket.
    pub async fn teardown(&self, options: TeardownOptions) -> errors::Result<TeardownReport> {
        let config = &self.config;
        config.validate()?;

        let caller = check_credentials(self.identity.as_ref()).await?;
        let orchestrator = StackOrchestrator::new(self.stacks.as_ref(), &config.wait);

        let mut report = TeardownReport {
            stack_name: config.stack_name.clone(),
            stack_deleted: orchestrator.delete(&config.stack_name).await?,
            ..Default::default()
        };

        if !(options.purge_artifacts || options.remove_bucket) {
            return Ok(report);
        }

        let bucket = config.bucket_name(&caller.account);
        if !self.store.bucket_exists(&bucket).await {
            info!("Bucket '{}' does not exist, no artifacts to purge", bucket);
            return Ok(report);
        }

        let publisher = ArtifactPublisher::new(self.store.as_ref());
        publisher.remove(&bucket, &config.s3_key).await?;
        report.object_deleted = true;

        if options.remove_bucket {
            publisher.remove_bucket(&bucket).await?;
            report.bucket_deleted = true;
        }

        Ok(report)
    }
}

fn read_template(path: &Path) -> Result<String, StackError> {
    std::fs::read_to_string(path).map_err(|e| StackError::TemplateRead {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}
