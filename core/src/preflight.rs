use std::process::Command;
use tracing::{debug, info};

use crate::cloud::{CallerIdentity, IdentityApi};
use crate::config::DeployConfig;
use crate::errors::PreflightError;

#[cfg(test)]
use mockall::automock;

/// Answers whether an external program can be run.
#[cfg_attr(test, automock)]
pub trait ToolLocator: Send + Sync {
    fn is_available(&self, program: &str) -> bool;
}

/// Probes `PATH` by running `<program> --version`.
pub struct SystemTools;

impl ToolLocator for SystemTools {
    fn is_available(&self, program: &str) -> bool {
        let mut parts = program.split_whitespace();
        let Some(bin) = parts.next() else {
            return false;
        };

        Command::new(bin)
            .args(parts)
            .arg("--version")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
}

/// Programs the run cannot do without: the configured extras, plus the
/// dependency installer when the function ships a manifest.
pub fn required_tools(config: &DeployConfig) -> Vec<String> {
    let mut tools = config.packaging.required_tools.clone();
    let installer = &config.packaging.installer.program;
    if config.manifest_path().is_file() && !tools.contains(installer) {
        tools.push(installer.clone());
    }
    tools
}

pub fn check_tools(tools: &dyn ToolLocator, required: &[String]) -> Result<(), PreflightError> {
    for tool in required {
        if !tools.is_available(tool) {
            return Err(PreflightError::MissingTool { tool: tool.clone() });
        }
        debug!("Found required tool `{}`", tool);
    }
    Ok(())
}

/// Any failure of the identity call counts as "credentials not configured".
pub async fn check_credentials(
    identity: &dyn IdentityApi,
) -> Result<CallerIdentity, PreflightError> {
    let caller = identity
        .caller_identity()
        .await
        .map_err(|e| PreflightError::MissingCredentials {
            reason: e.message,
        })?;

    info!("Authenticated as {} (account {})", caller.arn, caller.account);
    Ok(caller)
}
