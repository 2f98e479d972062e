//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::{DeployDescriptor, HostConfig, ProxySettings};
use crate::config::validation::validate_host_config;
use crate::error::ConfigError;

/// A deployment together with its parsed host config.
#[derive(Debug, Clone)]
pub struct Deployment {
    pub descriptor: DeployDescriptor,
    pub hosts: HostConfig,
}

/// Load proxy settings from a TOML file.
pub fn load_settings(path: &Path) -> Result<ProxySettings, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Toml {
        path: path.to_path_buf(),
        source,
    })
}

/// Load and validate one deployment's host config.
pub fn load_host_config(path: &Path) -> Result<HostConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: HostConfig = serde_json::from_str(&content).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    validate_host_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Load every deployment named in the settings, in order.
///
/// A deployment whose config fails to load is logged and left out; the rest
/// still come up.
pub fn load_deployments(settings: &ProxySettings) -> Vec<Deployment> {
    settings
        .deploys
        .iter()
        .filter_map(|descriptor| match load_host_config(&descriptor.config) {
            Ok(hosts) => {
                tracing::debug!(
                    deploy_id = %descriptor.id,
                    hosts = hosts.len(),
                    "Host config loaded"
                );
                Some(Deployment {
                    descriptor: descriptor.clone(),
                    hosts,
                })
            }
            Err(e) => {
                tracing::error!(deploy_id = %descriptor.id, error = %e, "Skipping deployment");
                None
            }
        })
        .collect()
}

/// Load every deployment named in the settings, failing on the first one
/// that does not load.
///
/// Planning depends on the position of every deployment, so a reload that
/// lost one would shift the ports of all the deployments after it.
pub fn load_all_deployments(settings: &ProxySettings) -> Result<Vec<Deployment>, ConfigError> {
    settings
        .deploys
        .iter()
        .map(|descriptor| {
            load_host_config(&descriptor.config).map(|hosts| Deployment {
                descriptor: descriptor.clone(),
                hosts,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn write_temp(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn load_skips_broken_deployment() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_temp(dir.path(), "good.json", r#"{"a.com": {"/": {"proxyPorts": [80]}}}"#);
        let bad = write_temp(dir.path(), "bad.json", r#"{"a.com": {"nope": {}}}"#);

        let mut settings = ProxySettings::default();
        settings.deploys = vec![
            DeployDescriptor {
                id: "dd-bad".into(),
                replica_host: None,
                config: bad,
            },
            DeployDescriptor {
                id: "dd-good".into(),
                replica_host: None,
                config: good,
            },
        ];

        let loaded = load_deployments(&settings);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].descriptor.id, "dd-good");
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_host_config(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn load_all_rejects_any_broken_deployment() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_temp(dir.path(), "good.json", r#"{"a.com": {"/": {"proxyPorts": [80]}}}"#);
        let bad = write_temp(dir.path(), "bad.json", r#"{"b.com": {"/": "#);

        let mut settings = ProxySettings::default();
        settings.deploys = vec![
            DeployDescriptor {
                id: "dd-good".into(),
                replica_host: None,
                config: good,
            },
            DeployDescriptor {
                id: "dd-bad".into(),
                replica_host: None,
                config: bad.clone(),
            },
        ];

        let err = load_all_deployments(&settings).unwrap_err();
        assert!(matches!(err, ConfigError::Json { ref path, .. } if *path == bad));

        settings.deploys.pop();
        assert_eq!(load_all_deployments(&settings).unwrap().len(), 1);
    }
}
