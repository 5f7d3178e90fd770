use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Preflight check failed: {0}")]
    Preflight(#[from] PreflightError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Packaging error: {0}")]
    Package(#[from] PackageError),

    #[error("S3 error: {0}")]
    S3(#[from] S3Error),

    #[error("CloudFormation error: {0}")]
    Stack(#[from] StackError),
}

#[derive(Error, Debug)]
pub enum PreflightError {
    #[error("required tool `{tool}` is not installed or not on PATH")]
    MissingTool { tool: String },

    #[error("AWS credentials are not configured: {reason}")]
    MissingCredentials { reason: String },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Failed to load configuration from {origin}: {error}")]
    LoadFailed {
        origin: String,
        #[source]
        error: Box<dyn std::error::Error + Send + Sync>,
    },
}

#[derive(Error, Debug)]
pub enum PackageError {
    #[error("Function source directory {path} does not exist")]
    SourceMissing { path: String },

    #[error("Dependency install with `{program}` failed: {reason}")]
    InstallFailed { program: String, reason: String },

    #[error("Failed to write archive {path}: {reason}")]
    Archive { path: String, reason: String },

    #[error("Failed to stage {path}: {reason}")]
    Staging { path: String, reason: String },
}

#[derive(Error, Debug)]
pub enum S3Error {
    #[error("Failed to create bucket {bucket}: {reason}")]
    BucketCreation { bucket: String, reason: String },

    #[error("Failed to upload object to s3://{bucket}/{key}: {reason}")]
    Upload {
        bucket: String,
        key: String,
        reason: String,
    },

    #[error("Failed to delete object s3://{bucket}/{key}: {reason}")]
    Delete {
        bucket: String,
        key: String,
        reason: String,
    },

    #[error("Failed to delete bucket {bucket}: {reason}")]
    BucketDeletion { bucket: String, reason: String },
}

#[derive(Error, Debug)]
pub enum StackError {
    #[error("Failed to read template {path}: {reason}")]
    TemplateRead { path: String, reason: String },

    #[error("Failed to look up stack {stack}: {reason}")]
    Lookup { stack: String, reason: String },

    #[error("Failed to create stack {stack}: {reason}")]
    Create { stack: String, reason: String },

    #[error("Failed to update stack {stack}: {reason}")]
    Update { stack: String, reason: String },

    #[error("Failed to delete stack {stack}: {reason}")]
    Delete { stack: String, reason: String },

    #[error("Stack {stack} ended in {status}: {reason}")]
    WaitFailed {
        stack: String,
        status: String,
        reason: String,
    },

    #[error("Gave up waiting for stack {stack} after {attempts} polls")]
    WaitTimedOut { stack: String, attempts: u32 },

    #[error("Stack {stack} disappeared while waiting for it")]
    Vanished { stack: String },
}

/// Provider responses the deploy flow expects and tolerates.
///
/// These never abort a run. They are logged and carried in the
/// [`DeployReport`](crate::telemetry::DeployReport) so callers and tests can
/// see that they happened.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecoverableError {
    #[error("Stack {stack} is already up to date, no updates were performed")]
    NoUpdatesNeeded { stack: String },

    #[error("Stack {stack} did not reach UPDATE_COMPLETE: {detail}")]
    UpdateWaitIncomplete { stack: String, detail: String },
}

pub type Result<T> = std::result::Result<T, DeployError>;

impl DeployError {
    /// Process exit status for this failure: 1 for a failed precondition
    /// (missing tool or credentials), 2 for everything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            DeployError::Preflight(_) => 1,
            _ => 2,
        }
    }
}
