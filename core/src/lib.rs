pub mod cloud;
pub mod config;
pub mod deployer;
pub mod errors;
pub mod package;
pub mod preflight;
pub mod publish;
pub mod stack;
pub mod telemetry;

pub use config::{DeployConfig, load_config};
pub use deployer::{DeployOptions, Deployer, TeardownOptions};
pub use errors::{DeployError, RecoverableError, Result};
pub use telemetry::{DeployReport, TeardownReport, format_outputs, init_tracing};
