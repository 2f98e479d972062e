//! Stale port holder cleanup.
//!
//! A previous run that died without releasing its sockets would make every
//! bind fail, so each port is freed before this process binds it. Freeing a
//! port nobody holds is a successful no-op.

use async_trait::async_trait;

use crate::config::schema::CleanupConfig;
use crate::error::BindError;
use crate::process;

/// Frees a port held by another process.
#[async_trait]
pub trait PortKiller: Send + Sync {
    async fn free_port(&self, port: u16) -> Result<(), BindError>;
}

/// Runs a configured command such as `fuser -k {port}/tcp`.
#[derive(Debug, Clone)]
pub struct ShellPortKiller {
    command: Vec<String>,
}

impl ShellPortKiller {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl PortKiller for ShellPortKiller {
    async fn free_port(&self, port: u16) -> Result<(), BindError> {
        let port_str = port.to_string();
        let argv = process::render(&self.command, &[("port", port_str.as_str())]);
        match process::run(&argv).await {
            Ok(status) => {
                // non-zero usually means nothing was listening
                tracing::debug!(port, status = %status, "Port cleanup finished");
                Ok(())
            }
            Err(e) => Err(BindError::Cleanup {
                port,
                reason: e.to_string(),
            }),
        }
    }
}

/// Used when cleanup is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPortKiller;

#[async_trait]
impl PortKiller for NoopPortKiller {
    async fn free_port(&self, _port: u16) -> Result<(), BindError> {
        Ok(())
    }
}

/// Port killer selected by the settings.
pub fn from_config(config: &CleanupConfig) -> Box<dyn PortKiller> {
    if config.enabled && !config.command.is_empty() {
        Box::new(ShellPortKiller::new(config.command.clone()))
    } else {
        Box::new(NoopPortKiller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failing_command_is_still_success() {
        let killer = ShellPortKiller::new(vec!["false".to_string()]);
        assert!(killer.free_port(4080).await.is_ok());
        assert!(killer.free_port(4080).await.is_ok());
    }

    #[tokio::test]
    async fn missing_program_is_cleanup_error() {
        let killer = ShellPortKiller::new(vec!["/nonexistent/port-killer".to_string()]);
        let err = killer.free_port(4080).await.unwrap_err();
        assert!(matches!(err, BindError::Cleanup { port: 4080, .. }));
    }
}
