//! Certificate issuance capability for development auto-TLS.

use std::path::Path;

use async_trait::async_trait;

use crate::error::CertificateError;
use crate::process;

/// Produces TLS material for a host inside `dir`.
///
/// Only the resulting files are inspected afterwards; command output is not.
#[async_trait]
pub trait CertIssuer: Send + Sync {
    async fn issue(&self, host: &str, dir: &Path) -> Result<(), CertificateError>;
}

/// Runs a configured command with `{host}` and `{dir}` substituted.
#[derive(Debug, Clone)]
pub struct CommandCertIssuer {
    command: Vec<String>,
}

impl CommandCertIssuer {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl CertIssuer for CommandCertIssuer {
    async fn issue(&self, host: &str, dir: &Path) -> Result<(), CertificateError> {
        let issuance = |reason: String| CertificateError::Issuance {
            host: host.to_string(),
            reason,
        };

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| issuance(format!("cannot create {}: {e}", dir.display())))?;

        let dir_str = dir.to_string_lossy().into_owned();
        let argv = process::render(&self.command, &[("host", host), ("dir", dir_str.as_str())]);
        let status = process::run(&argv).await.map_err(|e| issuance(e.to_string()))?;
        if status.success() {
            Ok(())
        } else {
            Err(issuance(format!("issuer exited with {status}")))
        }
    }
}
