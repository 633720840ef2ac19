mod coordinator;

use async_trait::async_trait;

use crate::{AppError, Result};

pub use coordinator::{ReloadCoordinator, ReloadState, SharedReloadState};

/// Whatever makes the monitoring agent pick up new check files.
#[async_trait]
pub trait AgentReloader: Send + Sync {
    async fn reload(&self) -> Result<()>;
}

/// Runs an external command, e.g. `service datadog-agent reload`.
pub struct CommandReloader {
    program: String,
    args: Vec<String>,
}

impl CommandReloader {
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| AppError::Config("reload command is empty".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl AgentReloader for CommandReloader {
    async fn reload(&self) -> Result<()> {
        let status = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| AppError::Reload(format!("Could not run {}: {}", self.program, e)))?;

        if !status.success() {
            return Err(AppError::Reload(format!(
                "{} {} exited with {}",
                self.program,
                self.args.join(" "),
                status
            )));
        }
        Ok(())
    }
}
