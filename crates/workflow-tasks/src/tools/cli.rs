//! Process execution executor.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::TaskError;
use crate::model::{CliTask, Task, TaskPayload, TaskType};
use crate::registry::TaskExecutor;
use crate::result::{CliOutput, TaskResult};
use crate::template::Expander;

/// Executes `cli` tasks. The command is run directly, without a shell.
#[derive(Debug, Default)]
pub struct CliExecutor;

impl CliExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Run an already expanded argv.
    pub async fn run(command: Vec<String>, execution_timeout: Option<Duration>) -> CliOutput {
        let Some((program, args)) = command.split_first() else {
            return CliOutput {
                command,
                exit_code: -1,
                error: "empty command".to_string(),
                ..Default::default()
            };
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return CliOutput {
                    command,
                    exit_code: -1,
                    error: format!("Failed to spawn process: {}", e),
                    ..Default::default()
                }
            }
        };

        let output = match execution_timeout {
            Some(duration) => match timeout(duration, child.wait_with_output()).await {
                Ok(output) => output,
                Err(_) => {
                    return CliOutput {
                        command,
                        exit_code: -1,
                        error: format!("Command timed out after {}s", duration.as_secs()),
                        ..Default::default()
                    }
                }
            },
            None => child.wait_with_output().await,
        };

        match output {
            Ok(output) => CliOutput {
                command,
                output: String::from_utf8_lossy(&output.stdout).into_owned(),
                error: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit_code: output.status.code().unwrap_or(-1),
            },
            Err(e) => CliOutput {
                command,
                exit_code: -1,
                error: format!("Failed to wait for process: {}", e),
                ..Default::default()
            },
        }
    }

    async fn execute_command(
        &self,
        task: &Task,
        cli: &CliTask,
        expander: &Expander<'_>,
    ) -> Result<TaskResult, TaskError> {
        if cli.command.is_empty() {
            return Err(TaskError::Definition(task.task_type));
        }

        let command: Vec<String> = cli.command.iter().map(|arg| expander.expand(arg)).collect();
        let execution_timeout =
            (cli.execution_timeout > 0).then(|| Duration::from_secs(cli.execution_timeout));

        tracing::debug!(
            task = %task.name,
            command = ?command,
            timeout = ?execution_timeout,
            "Executing command"
        );

        let output = Self::run(command, execution_timeout).await;
        Ok(TaskResult::from_cli(task, output))
    }
}

#[async_trait]
impl TaskExecutor for CliExecutor {
    fn task_type(&self) -> TaskType {
        TaskType::Cli
    }

    async fn execute(
        &self,
        task: &Task,
        expander: &Expander<'_>,
    ) -> Result<TaskResult, TaskError> {
        match task.payload()? {
            TaskPayload::Cli(cli) => self.execute_command(task, cli, expander).await,
            _ => Err(TaskError::Definition(task.task_type)),
        }
    }
}
