use serde::Serialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cloud::StackOutput;
use crate::errors::RecoverableError;

/// Installs the stderr log subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StackAction {
    Created,
    Updated,
    Unchanged,
    /// `--dry-run`: nothing was sent to CloudFormation.
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeployReport {
    pub stack_name: String,
    pub region: String,
    pub action: StackAction,
    pub bucket: String,
    pub key: String,
    pub bucket_created: bool,
    pub archive_bytes: u64,
    pub archive_entries: usize,
    pub stack_status: Option<String>,
    pub outputs: Vec<StackOutput>,
    pub recovered: Vec<RecoverableError>,
}

impl DeployReport {
    pub fn is_clean(&self) -> bool {
        self.recovered.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TeardownReport {
    pub stack_name: String,
    pub stack_deleted: bool,
    pub object_deleted: bool,
    pub bucket_deleted: bool,
}

/// Renders stack outputs the way the deploy command prints them.
pub fn format_outputs(stack_name: &str, outputs: &[StackOutput]) -> String {
    if outputs.is_empty() {
        return format!("Stack {stack_name} declares no outputs\n");
    }

    let width = outputs.iter().map(|o| o.key.len()).max().unwrap_or(0);
    let mut rendered = format!("Outputs of stack {stack_name}:\n");
    for output in outputs {
        rendered.push_str(&format!("  {:<width$}  {}", output.key, output.value));
        if let Some(description) = &output.description {
            rendered.push_str(&format!("  ({description})"));
        }
        rendered.push('\n');
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(key: &str, value: &str, description: Option<&str>) -> StackOutput {
        StackOutput {
            key: key.to_string(),
            value: value.to_string(),
            description: description.map(str::to_string),
            export_name: None,
        }
    }

    #[test]
    fn test_format_outputs_aligns_keys() {
        let rendered = format_outputs(
            "hello-world-stack",
            &[
                output("FunctionArn", "arn:aws:lambda:us-east-1:1:function:f", None),
                output("Role", "arn:aws:iam::1:role/r", Some("Execution role")),
            ],
        );
        assert_eq!(
            rendered,
            "Outputs of stack hello-world-stack:\n\
             \x20 FunctionArn  arn:aws:lambda:us-east-1:1:function:f\n\
             \x20 Role         arn:aws:iam::1:role/r  (Execution role)\n"
        );
    }

    #[test]
    fn test_format_outputs_empty() {
        assert_eq!(
            format_outputs("s", &[]),
            "Stack s declares no outputs\n"
        );
    }

    #[test]
    fn test_report_serializes_action_snake_case() {
        let report = DeployReport {
            stack_name: "s".to_string(),
            region: "us-east-1".to_string(),
            action: StackAction::Unchanged,
            bucket: "b".to_string(),
            key: "k".to_string(),
            bucket_created: false,
            archive_bytes: 10,
            archive_entries: 1,
            stack_status: Some("UPDATE_COMPLETE".to_string()),
            outputs: vec![],
            recovered: vec![RecoverableError::NoUpdatesNeeded {
                stack: "s".to_string(),
            }],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["action"], "unchanged");
        assert_eq!(json["recovered"][0]["kind"], "no_updates_needed");
        assert!(!report.is_clean());
    }
}
