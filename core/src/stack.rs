use tracing::{debug, info, warn};

use crate::cloud::{StackApi, StackDescription, StackRequest};
use crate::config::WaitConfig;
use crate::errors::{RecoverableError, StackError};
use crate::telemetry::StackAction;

/// Whether the named stack exists, as seen by one `DescribeStacks` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackState {
    Absent,
    Present(StackDescription),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTarget {
    CreateComplete,
    UpdateComplete,
    DeleteComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Done,
    Failed,
    Pending,
}

impl WaitTarget {
    // Mirrors the success/failure states of the CloudFormation CLI waiters.
    fn classify(self, status: &str) -> Phase {
        match (self, status) {
            (WaitTarget::CreateComplete, "CREATE_COMPLETE") => Phase::Done,
            (
                WaitTarget::CreateComplete,
                "CREATE_FAILED" | "ROLLBACK_COMPLETE" | "ROLLBACK_FAILED" | "DELETE_COMPLETE"
                | "DELETE_FAILED",
            ) => Phase::Failed,
            (WaitTarget::UpdateComplete, "UPDATE_COMPLETE") => Phase::Done,
            (
                WaitTarget::UpdateComplete,
                "UPDATE_FAILED" | "UPDATE_ROLLBACK_COMPLETE" | "UPDATE_ROLLBACK_FAILED",
            ) => Phase::Failed,
            (WaitTarget::DeleteComplete, "DELETE_COMPLETE") => Phase::Done,
            (WaitTarget::DeleteComplete, "DELETE_FAILED") => Phase::Failed,
            _ => Phase::Pending,
        }
    }

    fn label(self) -> &'static str {
        match self {
            WaitTarget::CreateComplete => "CREATE_COMPLETE",
            WaitTarget::UpdateComplete => "UPDATE_COMPLETE",
            WaitTarget::DeleteComplete => "DELETE_COMPLETE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Target reached. `None` when the stack is gone, which is how a delete
    /// usually finishes.
    Reached(Option<StackDescription>),
    Failed { status: String, reason: String },
    TimedOut { attempts: u32 },
    /// The stack disappeared while a create or update was awaited.
    Vanished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackDeployment {
    pub action: StackAction,
    pub recovered: Option<RecoverableError>,
}

pub struct StackOrchestrator<'a> {
    api: &'a dyn StackApi,
    wait: &'a WaitConfig,
}

impl<'a> StackOrchestrator<'a> {
    pub fn new(api: &'a dyn StackApi, wait: &'a WaitConfig) -> Self {
        Self { api, wait }
    }

    pub async fn lookup(&self, stack_name: &str) -> Result<StackState, StackError> {
        let description =
            self.api
                .describe_stack(stack_name)
                .await
                .map_err(|e| StackError::Lookup {
                    stack: stack_name.to_string(),
                    reason: e.to_string(),
                })?;

        Ok(match description {
            Some(description) => StackState::Present(description),
            None => StackState::Absent,
        })
    }

    /// Creates the stack when absent, updates it when present, and blocks
    /// until CloudFormation settles.
    pub async fn deploy(&self, request: &StackRequest) -> Result<StackDeployment, StackError> {
        let stack = request.stack_name.as_str();

        match self.lookup(stack).await? {
            StackState::Absent => {
                info!("Stack {} does not exist, creating it", stack);
                let stack_id =
                    self.api
                        .create_stack(request)
                        .await
                        .map_err(|e| StackError::Create {
                            stack: stack.to_string(),
                            reason: e.to_string(),
                        })?;
                debug!("Create of {} accepted as {}", stack, stack_id);

                match self.wait_for(stack, WaitTarget::CreateComplete).await? {
                    WaitOutcome::Reached(_) => {
                        info!("Stack {} created", stack);
                        Ok(StackDeployment {
                            action: StackAction::Created,
                            recovered: None,
                        })
                    }
                    WaitOutcome::Failed { status, reason } => Err(StackError::WaitFailed {
                        stack: stack.to_string(),
                        status,
                        reason,
                    }),
                    WaitOutcome::TimedOut { attempts } => Err(StackError::WaitTimedOut {
                        stack: stack.to_string(),
                        attempts,
                    }),
                    WaitOutcome::Vanished => Err(StackError::Vanished {
                        stack: stack.to_string(),
                    }),
                }
            }
            StackState::Present(existing) => {
                info!(
                    "Stack {} exists ({}), updating it",
                    stack, existing.status
                );
                match self.api.update_stack(request).await {
                    Ok(stack_id) => debug!("Update of {} accepted as {}", stack, stack_id),
                    Err(e) if e.is_no_updates() => {
                        let condition = RecoverableError::NoUpdatesNeeded {
                            stack: stack.to_string(),
                        };
                        info!("{}", condition);
                        return Ok(StackDeployment {
                            action: StackAction::Unchanged,
                            recovered: Some(condition),
                        });
                    }
                    Err(e) => {
                        return Err(StackError::Update {
                            stack: stack.to_string(),
                            reason: e.to_string(),
                        });
                    }
                }

                let incomplete = match self.wait_for(stack, WaitTarget::UpdateComplete).await {
                    Ok(WaitOutcome::Reached(_)) => None,
                    Ok(WaitOutcome::Failed { status, reason }) => {
                        Some(format!("ended in {status}: {reason}"))
                    }
                    Ok(WaitOutcome::TimedOut { attempts }) => {
                        Some(format!("still pending after {attempts} polls"))
                    }
                    Ok(WaitOutcome::Vanished) => Some("stack disappeared".to_string()),
                    Err(e) => Some(e.to_string()),
                };

                let recovered = incomplete.map(|detail| {
                    let condition = RecoverableError::UpdateWaitIncomplete {
                        stack: stack.to_string(),
                        detail,
                    };
                    warn!("{}, continuing", condition);
                    condition
                });
                if recovered.is_none() {
                    info!("Stack {} updated", stack);
                }

                Ok(StackDeployment {
                    action: StackAction::Updated,
                    recovered,
                })
            }
        }
    }

    /// Polls until `target` is reached, a failure state shows up, or the
    /// attempt budget runs out. The first poll happens immediately.
    pub async fn wait_for(
        &self,
        stack_name: &str,
        target: WaitTarget,
    ) -> Result<WaitOutcome, StackError> {
        info!("Waiting for stack {} to reach {}", stack_name, target.label());
        let mut last_status = String::new();

        for attempt in 1..=self.wait.max_attempts {
            let description = match self.lookup(stack_name).await? {
                StackState::Present(description) => description,
                StackState::Absent if target == WaitTarget::DeleteComplete => {
                    return Ok(WaitOutcome::Reached(None));
                }
                StackState::Absent => return Ok(WaitOutcome::Vanished),
            };

            if description.status != last_status {
                info!("Stack {} is {}", stack_name, description.status);
                last_status = description.status.clone();
            } else {
                debug!(
                    "Stack {} still {} (poll {}/{})",
                    stack_name, description.status, attempt, self.wait.max_attempts
                );
            }

            match target.classify(&description.status) {
                Phase::Done => return Ok(WaitOutcome::Reached(Some(description))),
                Phase::Failed => {
                    return Ok(WaitOutcome::Failed {
                        status: description.status,
                        reason: description.status_reason.unwrap_or_default(),
                    });
                }
                Phase::Pending if attempt < self.wait.max_attempts => {
                    tokio::time::sleep(self.wait.poll_interval()).await;
                }
                Phase::Pending => {}
            }
        }

        Ok(WaitOutcome::TimedOut {
            attempts: self.wait.max_attempts,
        })
    }

    /// The stack as it stands after the run, including its outputs.
    pub async fn describe(&self, stack_name: &str) -> Result<StackDescription, StackError> {
        match self.lookup(stack_name).await? {
            StackState::Present(description) => Ok(description),
            StackState::Absent => Err(StackError::Vanished {
                stack: stack_name.to_string(),
            }),
        }
    }

    /// Deletes the stack and waits for it to go away. Returns `false` when
    /// there was nothing to delete.
    pub async fn delete(&self, stack_name: &str) -> Result<bool, StackError> {
        if self.lookup(stack_name).await? == StackState::Absent {
            info!("Stack {} does not exist, nothing to delete", stack_name);
            return Ok(false);
        }

        self.api
            .delete_stack(stack_name)
            .await
            .map_err(|e| StackError::Delete {
                stack: stack_name.to_string(),
                reason: e.to_string(),
            })?;

        match self.wait_for(stack_name, WaitTarget::DeleteComplete).await? {
            WaitOutcome::Reached(_) => {
                info!("Stack {} deleted", stack_name);
                Ok(true)
            }
            WaitOutcome::Failed { status, reason } => Err(StackError::WaitFailed {
                stack: stack_name.to_string(),
                status,
                reason,
            }),
            WaitOutcome::TimedOut { attempts } => Err(StackError::WaitTimedOut {
                stack: stack_name.to_string(),
                attempts,
            }),
            WaitOutcome::Vanished => Ok(true),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cloud::{CloudError, MockStackApi};
    use std::collections::{BTreeMap, VecDeque};

    pub(crate) fn description(name: &str, status: &str) -> StackDescription {
        StackDescription {
            stack_name: name.to_string(),
            stack_id: Some(format!(
                "arn:aws:cloudformation:us-east-1:123456789012:stack/{name}/1"
            )),
            status: status.to_string(),
            status_reason: None,
            outputs: vec![],
        }
    }

    /// Answers `describe_stack` with each scripted status in turn and keeps
    /// repeating the last one. `None` means the stack does not exist.
    pub(crate) fn scripted(
        statuses: Vec<Option<&'static str>>,
    ) -> impl FnMut(&str) -> Result<Option<StackDescription>, CloudError> + Send + 'static {
        let mut queue = VecDeque::from(statuses);
        move |name: &str| {
            let status = if queue.len() > 1 {
                queue.pop_front().flatten()
            } else {
                queue.front().copied().flatten()
            };
            Ok(status.map(|status| description(name, status)))
        }
    }

    fn request() -> StackRequest {
        StackRequest {
            stack_name: "hello-world-stack".to_string(),
            template_body: "Resources: {}".to_string(),
            parameters: BTreeMap::new(),
            capabilities: vec!["CAPABILITY_NAMED_IAM".to_string()],
        }
    }

    fn fast_wait(max_attempts: u32) -> WaitConfig {
        WaitConfig {
            poll_interval_secs: 0,
            max_attempts,
        }
    }

    #[test]
    fn test_classify_terminal_states() {
        use WaitTarget::*;
        assert_eq!(CreateComplete.classify("CREATE_COMPLETE"), Phase::Done);
        assert_eq!(CreateComplete.classify("CREATE_IN_PROGRESS"), Phase::Pending);
        assert_eq!(CreateComplete.classify("ROLLBACK_IN_PROGRESS"), Phase::Pending);
        assert_eq!(CreateComplete.classify("ROLLBACK_COMPLETE"), Phase::Failed);
        assert_eq!(UpdateComplete.classify("UPDATE_COMPLETE"), Phase::Done);
        assert_eq!(
            UpdateComplete.classify("UPDATE_COMPLETE_CLEANUP_IN_PROGRESS"),
            Phase::Pending
        );
        assert_eq!(
            UpdateComplete.classify("UPDATE_ROLLBACK_COMPLETE"),
            Phase::Failed
        );
        assert_eq!(DeleteComplete.classify("DELETE_IN_PROGRESS"), Phase::Pending);
        assert_eq!(DeleteComplete.classify("DELETE_FAILED"), Phase::Failed);
    }

    #[tokio::test]
    async fn test_absent_stack_is_created_not_updated() {
        let mut api = MockStackApi::new();
        api.expect_describe_stack().returning(scripted(vec![
            None,
            Some("CREATE_IN_PROGRESS"),
            Some("CREATE_COMPLETE"),
        ]));
        api.expect_create_stack()
            .times(1)
            .returning(|_| Ok("stack-id".to_string()));
        api.expect_update_stack().never();

        let wait = fast_wait(5);
        let deployment = StackOrchestrator::new(&api, &wait)
            .deploy(&request())
            .await
            .unwrap();

        assert_eq!(deployment.action, StackAction::Created);
        assert_eq!(deployment.recovered, None);
    }

    #[tokio::test]
    async fn test_present_stack_is_updated_not_created() {
        let mut api = MockStackApi::new();
        api.expect_describe_stack().returning(scripted(vec![
            Some("CREATE_COMPLETE"),
            Some("UPDATE_IN_PROGRESS"),
            Some("UPDATE_COMPLETE"),
        ]));
        api.expect_update_stack()
            .times(1)
            .returning(|_| Ok("stack-id".to_string()));
        api.expect_create_stack().never();

        let wait = fast_wait(5);
        let deployment = StackOrchestrator::new(&api, &wait)
            .deploy(&request())
            .await
            .unwrap();

        assert_eq!(deployment.action, StackAction::Updated);
        assert_eq!(deployment.recovered, None);
    }

    #[tokio::test]
    async fn test_no_updates_is_recoverable_and_skips_wait() {
        let mut api = MockStackApi::new();
        api.expect_describe_stack()
            .times(1)
            .returning(scripted(vec![Some("UPDATE_COMPLETE")]));
        api.expect_update_stack().times(1).returning(|_| {
            Err(CloudError::new(
                "UpdateStack",
                Some("ValidationError"),
                "No updates are to be performed.",
            ))
        });

        let wait = fast_wait(5);
        let deployment = StackOrchestrator::new(&api, &wait)
            .deploy(&request())
            .await
            .unwrap();

        assert_eq!(deployment.action, StackAction::Unchanged);
        assert_eq!(
            deployment.recovered,
            Some(RecoverableError::NoUpdatesNeeded {
                stack: "hello-world-stack".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_update_rollback_is_swallowed() {
        let mut api = MockStackApi::new();
        api.expect_describe_stack().returning(scripted(vec![
            Some("CREATE_COMPLETE"),
            Some("UPDATE_ROLLBACK_COMPLETE"),
        ]));
        api.expect_update_stack()
            .returning(|_| Ok("stack-id".to_string()));

        let wait = fast_wait(5);
        let deployment = StackOrchestrator::new(&api, &wait)
            .deploy(&request())
            .await
            .unwrap();

        assert_eq!(deployment.action, StackAction::Updated);
        assert!(matches!(
            deployment.recovered,
            Some(RecoverableError::UpdateWaitIncomplete { ref detail, .. })
                if detail.contains("UPDATE_ROLLBACK_COMPLETE")
        ));
    }

    #[tokio::test]
    async fn test_update_wait_timeout_is_swallowed() {
        let mut api = MockStackApi::new();
        api.expect_describe_stack().returning(scripted(vec![
            Some("CREATE_COMPLETE"),
            Some("UPDATE_IN_PROGRESS"),
        ]));
        api.expect_update_stack()
            .returning(|_| Ok("stack-id".to_string()));

        let wait = fast_wait(3);
        let deployment = StackOrchestrator::new(&api, &wait)
            .deploy(&request())
            .await
            .unwrap();

        assert!(matches!(
            deployment.recovered,
            Some(RecoverableError::UpdateWaitIncomplete { ref detail, .. })
                if detail.contains("after 3 polls")
        ));
    }

    #[tokio::test]
    async fn test_describe_error_during_update_wait_is_swallowed() {
        let mut api = MockStackApi::new();
        let mut calls = 0;
        api.expect_describe_stack().returning(move |name| {
            calls += 1;
            if calls == 1 {
                Ok(Some(description(name, "UPDATE_COMPLETE")))
            } else {
                Err(CloudError::new(
                    "DescribeStacks",
                    Some("Throttling"),
                    "Rate exceeded",
                ))
            }
        });
        api.expect_update_stack()
            .times(1)
            .returning(|_| Ok("stack-id".to_string()));

        let wait = fast_wait(5);
        let deployment = StackOrchestrator::new(&api, &wait)
            .deploy(&request())
            .await
            .unwrap();

        assert_eq!(deployment.action, StackAction::Updated);
        assert!(matches!(
            deployment.recovered,
            Some(RecoverableError::UpdateWaitIncomplete { ref detail, .. })
                if detail.contains("Rate exceeded")
        ));
    }

    #[tokio::test]
    async fn test_other_update_errors_are_fatal() {
        let mut api = MockStackApi::new();
        api.expect_describe_stack()
            .returning(scripted(vec![Some("CREATE_COMPLETE")]));
        api.expect_update_stack().returning(|_| {
            Err(CloudError::new(
                "UpdateStack",
                Some("InsufficientCapabilitiesException"),
                "Requires capabilities : [CAPABILITY_NAMED_IAM]",
            ))
        });

        let wait = fast_wait(5);
        let result = StackOrchestrator::new(&api, &wait)
            .deploy(&request())
            .await;

        assert!(matches!(result, Err(StackError::Update { .. })));
    }

    #[tokio::test]
    async fn test_create_rollback_is_fatal() {
        let mut api = MockStackApi::new();
        api.expect_describe_stack().returning(scripted(vec![
            None,
            Some("ROLLBACK_IN_PROGRESS"),
            Some("ROLLBACK_COMPLETE"),
        ]));
        api.expect_create_stack()
            .returning(|_| Ok("stack-id".to_string()));

        let wait = fast_wait(5);
        let result = StackOrchestrator::new(&api, &wait)
            .deploy(&request())
            .await;

        match result {
            Err(StackError::WaitFailed { status, .. }) => assert_eq!(status, "ROLLBACK_COMPLETE"),
            other => panic!("expected WaitFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_timeout_is_fatal() {
        let mut api = MockStackApi::new();
        api.expect_describe_stack()
            .returning(scripted(vec![None, Some("CREATE_IN_PROGRESS")]));
        api.expect_create_stack()
            .returning(|_| Ok("stack-id".to_string()));

        let wait = fast_wait(2);
        let result = StackOrchestrator::new(&api, &wait)
            .deploy(&request())
            .await;

        assert!(matches!(
            result,
            Err(StackError::WaitTimedOut { attempts: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_lookup_error_is_fatal() {
        let mut api = MockStackApi::new();
        api.expect_describe_stack().returning(|_| {
            Err(CloudError::new(
                "DescribeStacks",
                Some("AccessDenied"),
                "not authorized to perform cloudformation:DescribeStacks",
            ))
        });
        api.expect_create_stack().never();
        api.expect_update_stack().never();

        let wait = fast_wait(5);
        let result = StackOrchestrator::new(&api, &wait)
            .deploy(&request())
            .await;

        assert!(matches!(result, Err(StackError::Lookup { .. })));
    }

    #[tokio::test]
    async fn test_delete_absent_stack_is_noop() {
        let mut api = MockStackApi::new();
        api.expect_describe_stack().returning(scripted(vec![None]));
        api.expect_delete_stack().never();

        let wait = fast_wait(5);
        let deleted = StackOrchestrator::new(&api, &wait)
            .delete("hello-world-stack")
            .await
            .unwrap();
        assert!(!deleted);
    }

    #[tokio::test]
    async fn test_delete_waits_until_gone() {
        let mut api = MockStackApi::new();
        api.expect_describe_stack().returning(scripted(vec![
            Some("CREATE_COMPLETE"),
            Some("DELETE_IN_PROGRESS"),
            None,
        ]));
        api.expect_delete_stack()
            .withf(|name| name == "hello-world-stack")
            .times(1)
            .returning(|_| Ok(()));

        let wait = fast_wait(5);
        let deleted = StackOrchestrator::new(&api, &wait)
            .delete("hello-world-stack")
            .await
            .unwrap();
        assert!(deleted);
    }

    #[tokio::test]
    async fn test_delete_failure_is_fatal() {
        let mut api = MockStackApi::new();
        api.expect_describe_stack().returning(scripted(vec![
            Some("CREATE_COMPLETE"),
            Some("DELETE_FAILED"),
        ]));
        api.expect_delete_stack().returning(|_| Ok(()));

        let wait = fast_wait(5);
        let result = StackOrchestrator::new(&api, &wait)
            .delete("hello-world-stack")
            .await;
        assert!(matches!(result, Err(StackError::WaitFailed { .. })));
    }
}
