//! Seams between the deploy flow and AWS.
//!
//! The flow only talks to these traits. [`aws`] implements them on top of the
//! AWS SDK; tests use the `mockall` mocks generated under `cfg(test)`.

pub mod aws;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

/// A failed AWS API call, reduced to what the flow needs to classify it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed: {message}")]
pub struct CloudError {
    pub operation: &'static str,
    pub code: Option<String>,
    pub message: String,
}

impl CloudError {
    pub fn new(operation: &'static str, code: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            operation,
            code: code.map(str::to_string),
            message: message.into(),
        }
    }

    /// CloudFormation answers an update with nothing to change with a
    /// `ValidationError` carrying this message.
    pub fn is_no_updates(&self) -> bool {
        self.message.contains("No updates are to be performed")
    }

    /// `DescribeStacks` on an unknown name fails with a `ValidationError`
    /// saying "Stack with id <name> does not exist". Failures without a
    /// service code never count.
    pub fn is_stack_missing(&self) -> bool {
        self.code.as_deref() == Some("ValidationError") && self.message.contains("does not exist")
    }
}

/// Who the ambient credentials belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallerIdentity {
    pub account: String,
    pub arn: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackRequest {
    pub stack_name: String,
    pub template_body: String,
    pub parameters: BTreeMap<String, String>,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackOutput {
    pub key: String,
    pub value: String,
    pub description: Option<String>,
    pub export_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackDescription {
    pub stack_name: String,
    pub stack_id: Option<String>,
    pub status: String,
    pub status_reason: Option<String>,
    pub outputs: Vec<StackOutput>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait IdentityApi: Send + Sync {
    async fn caller_identity(&self) -> Result<CallerIdentity, CloudError>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// True when the bucket exists and is reachable with these credentials.
    async fn bucket_exists(&self, bucket: &str) -> bool;

    async fn create_bucket(
        &self,
        bucket: &str,
        location_constraint: Option<String>,
    ) -> Result<(), CloudError>;

    async fn put_object(&self, bucket: &str, key: &str, file: &Path) -> Result<(), CloudError>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), CloudError>;

    async fn delete_bucket(&self, bucket: &str) -> Result<(), CloudError>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait StackApi: Send + Sync {
    /// `Ok(None)` when no stack with this name exists.
    async fn describe_stack(&self, stack_name: &str)
    -> Result<Option<StackDescription>, CloudError>;

    /// Returns the new stack id.
    async fn create_stack(&self, request: &StackRequest) -> Result<String, CloudError>;

    async fn update_stack(&self, request: &StackRequest) -> Result<String, CloudError>;

    async fn delete_stack(&self, stack_name: &str) -> Result<(), CloudError>;
}
