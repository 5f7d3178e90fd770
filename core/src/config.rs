use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::errors::{ConfigError, DeployError};

/// Environment variable holding a YAML configuration document.
pub const CONFIG_ENV_VAR: &str = "LAMBDA_DEPLOY_CONFIG";

/// Region in which S3 buckets are created without a location constraint.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Template parameters the deployer always sets itself.
pub const RESERVED_PARAMETERS: [&str; 3] = ["FunctionName", "S3Bucket", "S3Key"];

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DeployConfig {
    pub stack_name: String,
    pub function_name: String,
    pub region: String,
    pub template: PathBuf,
    pub source_dir: PathBuf,
    pub archive_path: PathBuf,
    pub s3_key: String,
    /// Explicit artifact bucket. Derived from the caller's account when unset.
    pub bucket: Option<String>,
    pub bucket_prefix: String,
    pub capabilities: Vec<String>,
    pub parameters: BTreeMap<String, String>,
    pub endpoint_url: Option<String>,
    pub packaging: PackagingConfig,
    pub wait: WaitConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PackagingConfig {
    pub manifest: String,
    pub installer: InstallerConfig,
    pub exclude_dirs: Vec<String>,
    pub exclude_extensions: Vec<String>,
    /// Programs preflight must find on `PATH` (probed with `--version`)
    /// before anything else runs, e.g. `["aws", "zip"]`. Empty by default,
    /// since the AWS SDK stands in for the `aws` CLI. The installer is
    /// added on its own whenever the manifest exists.
    pub required_tools: Vec<String>,
}

/// Command used to vendor dependencies next to the function code.
///
/// `{manifest}` and `{target}` in `args` are replaced with the manifest path
/// and the staging directory.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct InstallerConfig {
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WaitConfig {
    pub poll_interval_secs: u64,
    pub max_attempts: u32,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            stack_name: "hello-world-stack".to_string(),
            function_name: "hello-world-function".to_string(),
            region: DEFAULT_REGION.to_string(),
            template: PathBuf::from("template.yaml"),
            source_dir: PathBuf::from("lambda"),
            archive_path: PathBuf::from("lambda-function.zip"),
            s3_key: "lambda-function.zip".to_string(),
            bucket: None,
            bucket_prefix: "lambda-deployment".to_string(),
            capabilities: vec!["CAPABILITY_NAMED_IAM".to_string()],
            parameters: BTreeMap::new(),
            endpoint_url: None,
            packaging: PackagingConfig::default(),
            wait: WaitConfig::default(),
        }
    }
}

impl Default for PackagingConfig {
    fn default() -> Self {
        Self {
            manifest: "requirements.txt".to_string(),
            installer: InstallerConfig::default(),
            exclude_dirs: vec!["__pycache__".to_string()],
            exclude_extensions: vec!["pyc".to_string()],
            required_tools: Vec::new(),
        }
    }
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            program: "pip".to_string(),
            args: ["install", "-r", "{manifest}", "-t", "{target}", "--quiet"]
                .iter()
                .map(|arg| arg.to_string())
                .collect(),
        }
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            max_attempts: 120,
        }
    }
}

impl InstallerConfig {
    pub fn render_args(&self, manifest: &Path, target: &Path) -> Vec<String> {
        let manifest = manifest.display().to_string();
        let target = target.display().to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{manifest}", &manifest)
                    .replace("{target}", &target)
            })
            .collect()
    }
}

impl WaitConfig {
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_secs)
    }
}

/// Loads the configuration from `config_path` when given, otherwise from
/// [`CONFIG_ENV_VAR`] when set, otherwise the built-in defaults.
pub fn load_config(config_path: Option<&Path>) -> Result<DeployConfig, DeployError> {
    match config_path {
        Some(path) => DeployConfig::from_file(path),
        None if std::env::var_os(CONFIG_ENV_VAR).is_some() => DeployConfig::from_env(),
        None => Ok(DeployConfig::default()),
    }
}

impl DeployConfig {
    pub fn from_file(path: &Path) -> Result<Self, DeployError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            origin: path.display().to_string(),
            error: Box::new(e),
        })?;
        Self::from_yaml(&content, &path.display().to_string())
    }

    pub fn from_env() -> Result<Self, DeployError> {
        let config_str = std::env::var(CONFIG_ENV_VAR).map_err(|_| ConfigError::MissingField {
            field: CONFIG_ENV_VAR.to_string(),
        })?;
        Self::from_yaml(&config_str, CONFIG_ENV_VAR)
    }

    fn from_yaml(content: &str, origin: &str) -> Result<Self, DeployError> {
        // An empty document means "all defaults".
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| {
            ConfigError::LoadFailed {
                origin: origin.to_string(),
                error: Box::new(e),
            }
            .into()
        })
    }

    /// Applies the positional command-line arguments on top of the loaded
    /// configuration.
    pub fn with_overrides(
        mut self,
        stack_name: Option<String>,
        function_name: Option<String>,
        region: Option<String>,
    ) -> Self {
        if let Some(stack_name) = stack_name {
            self.stack_name = stack_name;
        }
        if let Some(function_name) = function_name {
            self.function_name = function_name;
        }
        if let Some(region) = region {
            self.region = region;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stack_name.trim().is_empty() {
            return Err(validation("stack name cannot be empty"));
        }
        if self.function_name.trim().is_empty() {
            return Err(validation("function name cannot be empty"));
        }
        if self.region.trim().is_empty() {
            return Err(validation("region cannot be empty"));
        }
        if self.s3_key.trim().is_empty() {
            return Err(validation("S3 key cannot be empty"));
        }
        if self.bucket.as_deref().is_some_and(|b| b.trim().is_empty()) {
            return Err(validation("bucket cannot be empty when set"));
        }
        if self.bucket.is_none() && self.bucket_prefix.trim().is_empty() {
            return Err(validation(
                "bucket prefix cannot be empty when no bucket is configured",
            ));
        }
        if self.wait.max_attempts == 0 {
            return Err(validation("wait.max_attempts must be at least 1"));
        }
        if let Some(reserved) = self
            .parameters
            .keys()
            .find(|key| RESERVED_PARAMETERS.contains(&key.as_str()))
        {
            return Err(validation(&format!(
                "parameter {reserved} is set by the deployer and cannot be overridden"
            )));
        }
        Ok(())
    }

    /// Bucket holding the archive: the configured one, or
    /// `<bucket_prefix>-<account_id>`.
    pub fn bucket_name(&self, account_id: &str) -> String {
        match &self.bucket {
            Some(bucket) => bucket.clone(),
            None => format!(
                "{}-{}",
                self.bucket_prefix.trim_end_matches('-'),
                account_id
            )
            .to_lowercase(),
        }
    }

    /// Buckets outside the default region need an explicit location constraint.
    pub fn location_constraint(&self) -> Option<String> {
        (self.region != DEFAULT_REGION).then(|| self.region.clone())
    }

    /// Parameters handed to the stack. The `S3Key` value is always
    /// [`DeployConfig::s3_key`], the same key the archive is uploaded under.
    pub fn stack_parameters(&self, bucket: &str) -> BTreeMap<String, String> {
        let mut parameters = self.parameters.clone();
        parameters.insert("FunctionName".to_string(), self.function_name.clone());
        parameters.insert("S3Bucket".to_string(), bucket.to_string());
        parameters.insert("S3Key".to_string(), self.s3_key.clone());
        parameters
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.source_dir.join(&self.packaging.manifest)
    }
}

fn validation(reason: &str) -> ConfigError {
    ConfigError::ValidationFailed {
        reason: reason.to_string(),
    }
}
