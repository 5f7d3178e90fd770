use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_cloudformation::types::{Capability, Parameter, Stack};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use std::path::Path;
use tracing::debug;

use super::{
    CallerIdentity, CloudError, IdentityApi, ObjectStore, StackApi, StackDescription, StackOutput,
    StackRequest,
};

/// Loads the ambient AWS configuration (environment, profile, instance role)
/// pinned to `region`, optionally pointed at an alternate endpoint such as
/// LocalStack.
pub async fn load_sdk_config(region: &str, endpoint_url: Option<&str>) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(aws_config::Region::new(region.to_string()));

    if let Some(endpoint_url) = endpoint_url {
        loader = loader.endpoint_url(endpoint_url);
    }

    loader.load().await
}

fn sdk_failure<E, R>(operation: &'static str, err: SdkError<E, R>) -> CloudError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let detail = DisplayErrorContext(&err).to_string();
    match err.as_service_error() {
        Some(service) => CloudError::new(
            operation,
            service.code(),
            service.message().unwrap_or(detail.as_str()),
        ),
        None => CloudError::new(operation, None, detail),
    }
}

pub struct StsIdentity {
    client: aws_sdk_sts::Client,
}

impl StsIdentity {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_sts::Client::new(sdk_config),
        }
    }
}

#[async_trait]
impl IdentityApi for StsIdentity {
    async fn caller_identity(&self) -> Result<CallerIdentity, CloudError> {
        let response = self
            .client
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| sdk_failure("GetCallerIdentity", e))?;

        Ok(CallerIdentity {
            account: response.account().unwrap_or_default().to_string(),
            arn: response.arn().unwrap_or_default().to_string(),
            user_id: response.user_id().unwrap_or_default().to_string(),
        })
    }
}

pub struct S3Store {
    client: aws_sdk_s3::Client,
}

impl S3Store {
    pub fn new(sdk_config: &SdkConfig, custom_endpoint: bool) -> Self {
        let mut builder = aws_sdk_s3::config::Builder::from(sdk_config);
        // Emulators rarely serve virtual-hosted bucket addressing.
        if custom_endpoint {
            builder = builder.force_path_style(true);
        }
        Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn bucket_exists(&self, bucket: &str) -> bool {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => true,
            Err(e) => {
                debug!("HeadBucket on '{}' failed: {}", bucket, DisplayErrorContext(&e));
                false
            }
        }
    }

    async fn create_bucket(
        &self,
        bucket: &str,
        location_constraint: Option<String>,
    ) -> Result<(), CloudError> {
        let mut request = self.client.create_bucket().bucket(bucket);

        if let Some(region) = location_constraint {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region.as_str()))
                    .build(),
            );
        }

        request
            .send()
            .await
            .map_err(|e| sdk_failure("CreateBucket", e))?;
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, file: &Path) -> Result<(), CloudError> {
        let body = ByteStream::from_path(file)
            .await
            .map_err(|e| CloudError::new("PutObject", None, e.to_string()))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type("application/zip")
            .body(body)
            .send()
            .await
            .map_err(|e| sdk_failure("PutObject", e))?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), CloudError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_failure("DeleteObject", e))?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), CloudError> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| sdk_failure("DeleteBucket", e))?;
        Ok(())
    }
}

pub struct CloudFormationStacks {
    client: aws_sdk_cloudformation::Client,
}

impl CloudFormationStacks {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_cloudformation::Client::new(sdk_config),
        }
    }
}

fn to_parameters(request: &StackRequest) -> Vec<Parameter> {
    request
        .parameters
        .iter()
        .map(|(key, value)| {
            Parameter::builder()
                .parameter_key(key)
                .parameter_value(value)
                .build()
        })
        .collect()
}

fn to_capabilities(request: &StackRequest) -> Vec<Capability> {
    request
        .capabilities
        .iter()
        .map(|capability| Capability::from(capability.as_str()))
        .collect()
}

fn to_description(stack: &Stack, requested_name: &str) -> StackDescription {
    StackDescription {
        stack_name: stack.stack_name().unwrap_or(requested_name).to_string(),
        stack_id: stack.stack_id().map(str::to_string),
        status: stack
            .stack_status()
            .map(|status| status.as_str().to_string())
            .unwrap_or_default(),
        status_reason: stack.stack_status_reason().map(str::to_string),
        outputs: stack
            .outputs()
            .iter()
            .filter_map(|output| {
                Some(StackOutput {
                    key: output.output_key()?.to_string(),
                    value: output.output_value().unwrap_or_default().to_string(),
                    description: output.description().map(str::to_string),
                    export_name: output.export_name().map(str::to_string),
                })
            })
            .collect(),
    }
}

#[async_trait]
impl StackApi for CloudFormationStacks {
    async fn describe_stack(
        &self,
        stack_name: &str,
    ) -> Result<Option<StackDescription>, CloudError> {
        match self
            .client
            .describe_stacks()
            .stack_name(stack_name)
            .send()
            .await
        {
            Ok(response) => Ok(response
                .stacks()
                .first()
                .map(|stack| to_description(stack, stack_name))),
            Err(e) => {
                let error = sdk_failure("DescribeStacks", e);
                if error.is_stack_missing() {
                    Ok(None)
                } else {
                    Err(error)
                }
            }
        }
    }

    async fn create_stack(&self, request: &StackRequest) -> Result<String, CloudError> {
        let response = self
            .client
            .create_stack()
            .stack_name(&request.stack_name)
            .template_body(&request.template_body)
            .set_parameters(Some(to_parameters(request)))
            .set_capabilities(Some(to_capabilities(request)))
            .send()
            .await
            .map_err(|e| sdk_failure("CreateStack", e))?;

        Ok(response
            .stack_id()
            .unwrap_or(request.stack_name.as_str())
            .to_string())
    }

    async fn update_stack(&self, request: &StackRequest) -> Result<String, CloudError> {
        let response = self
            .client
            .update_stack()
            .stack_name(&request.stack_name)
            .template_body(&request.template_body)
            .set_parameters(Some(to_parameters(request)))
            .set_capabilities(Some(to_capabilities(request)))
            .send()
            .await
            .map_err(|e| sdk_failure("UpdateStack", e))?;

        Ok(response
            .stack_id()
            .unwrap_or(request.stack_name.as_str())
            .to_string())
    }

    async fn delete_stack(&self, stack_name: &str) -> Result<(), CloudError> {
        self.client
            .delete_stack()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(|e| sdk_failure("DeleteStack", e))?;
        Ok(())
    }
}
