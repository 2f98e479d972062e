//! Per-host TLS material and SNI certificate selection.
//!
//! # Responsibilities
//! - Locate `key`, `cert` and `ca_bundle` for a host under `{cert_root}/{host}/`
//! - Decide whether a host can be served over TLS
//! - Build one rustls server config that picks a certificate by SNI
//!
//! # Design Decisions
//! - Exact hostname matches only, no wildcards
//! - A host with broken material is excluded from the TLS listener, the rest
//!   of the listener still comes up
//! - Clients without SNI get the first valid host's certificate

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;

use crate::config::schema::TlsConfig;
use crate::config::Environment;
use crate::error::CertificateError;
use crate::net::issuer::CertIssuer;

/// On-disk location of a host's TLS artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificatePaths {
    pub dir: PathBuf,
    pub key: PathBuf,
    pub cert: PathBuf,
    pub ca_bundle: PathBuf,
}

/// Parsed TLS material for one host.
#[derive(Debug)]
pub struct CertificateBundle {
    pub host: String,
    pub key: PrivateKeyDer<'static>,
    pub cert: Vec<CertificateDer<'static>>,
    pub ca_bundle: Vec<CertificateDer<'static>>,
}

impl CertificateBundle {
    fn certified_key(self, provider: &CryptoProvider) -> Result<CertifiedKey, CertificateError> {
        let signing_key = provider
            .key_provider
            .load_private_key(self.key)
            .map_err(|e| CertificateError::Invalid {
                host: self.host.clone(),
                artifact: "key",
                reason: e.to_string(),
            })?;
        let mut chain = self.cert;
        chain.extend(self.ca_bundle);
        Ok(CertifiedKey::new(chain, signing_key))
    }
}

/// Resolves and validates TLS material per host.
#[derive(Debug, Clone)]
pub struct CertificateStore {
    config: TlsConfig,
    provider: Arc<CryptoProvider>,
}

impl CertificateStore {
    pub fn new(config: TlsConfig) -> Self {
        Self {
            config,
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        }
    }

    pub fn paths(&self, host: &str) -> CertificatePaths {
        let dir = self.config.cert_root.join(host);
        CertificatePaths {
            key: dir.join(&self.config.key_file),
            cert: dir.join(&self.config.cert_file),
            ca_bundle: dir.join(&self.config.ca_file),
            dir,
        }
    }

    /// Load all three artifacts for a host.
    pub fn load_bundle(&self, host: &str) -> Result<CertificateBundle, CertificateError> {
        let paths = self.paths(host);
        for (artifact, path) in [("key", &paths.key), ("cert", &paths.cert), ("ca_bundle", &paths.ca_bundle)] {
            if !path.is_file() {
                return Err(CertificateError::Missing {
                    host: host.to_string(),
                    artifact,
                    path: path.clone(),
                });
            }
        }

        Ok(CertificateBundle {
            host: host.to_string(),
            key: load_private_key(host, &paths.key)?,
            cert: load_certs(host, "cert", &paths.cert)?,
            ca_bundle: load_certs(host, "ca_bundle", &paths.ca_bundle)?,
        })
    }

    fn certified_key(&self, host: &str) -> Result<Arc<CertifiedKey>, CertificateError> {
        let bundle = self.load_bundle(host)?;
        bundle.certified_key(&self.provider).map(Arc::new)
    }

    /// Whether a host has complete, well-formed TLS material.
    pub fn validate_secure_context(&self, host: &str) -> bool {
        match self.certified_key(host) {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(host = %host, error = %e, "Secure context invalid");
                false
            }
        }
    }

    /// Build the SNI context for the hosts served on the TLS port.
    ///
    /// In development with auto-TLS on, a host with missing material gets one
    /// issuance attempt before being excluded.
    pub async fn build_sni(
        &self,
        hosts: &[String],
        environment: Environment,
        issuer: Option<&dyn CertIssuer>,
    ) -> SniContext {
        let auto_tls = self.config.auto_tls && !environment.is_production();
        let mut default: Option<Arc<CertifiedKey>> = None;
        let mut by_host = HashMap::new();
        let mut order = Vec::new();

        for host in hosts {
            let mut loaded = self.certified_key(host);

            if let (Some(issuer), true) = (issuer, auto_tls && loaded.is_err()) {
                tracing::info!(host = %host, "Issuing development certificate");
                match issuer.issue(host, &self.paths(host).dir).await {
                    Ok(()) => loaded = self.certified_key(host),
                    Err(e) => tracing::error!(host = %host, error = %e, "Certificate issuance failed"),
                }
            }

            match loaded {
                Ok(key) => {
                    tracing::info!(host = %host, "TLS context registered");
                    default.get_or_insert_with(|| key.clone());
                    by_host.insert(host.to_ascii_lowercase(), key);
                    order.push(host.clone());
                }
                Err(e) => {
                    tracing::error!(host = %host, error = %e, "Host excluded from TLS listener");
                }
            }
        }

        SniContext {
            resolver: default.map(|default| Arc::new(SniResolver { default, by_host })),
            hosts: order,
            provider: self.provider.clone(),
        }
    }
}

fn load_certs(host: &str, artifact: &'static str, path: &Path) -> Result<Vec<CertificateDer<'static>>, CertificateError> {
    let invalid = |reason: String| CertificateError::Invalid {
        host: host.to_string(),
        artifact,
        reason,
    };
    let file = File::open(path).map_err(|e| invalid(e.to_string()))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| invalid(e.to_string()))?;
    if certs.is_empty() {
        return Err(invalid("no PEM certificate found".to_string()));
    }
    Ok(certs)
}

fn load_private_key(host: &str, path: &Path) -> Result<PrivateKeyDer<'static>, CertificateError> {
    let invalid = |reason: String| CertificateError::Invalid {
        host: host.to_string(),
        artifact: "key",
        reason,
    };
    let file = File::open(path).map_err(|e| invalid(e.to_string()))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| invalid(e.to_string()))?
        .ok_or_else(|| invalid("no private key found".to_string()))
}

/// Picks a certificate by exact SNI hostname.
#[derive(Debug)]
pub struct SniResolver {
    default: Arc<CertifiedKey>,
    by_host: HashMap<String, Arc<CertifiedKey>>,
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        match client_hello.server_name() {
            Some(name) => self.by_host.get(&name.to_ascii_lowercase()).cloned(),
            None => Some(self.default.clone()),
        }
    }
}

/// TLS hosts of the listener and the resolver that serves them.
#[derive(Debug, Clone)]
pub struct SniContext {
    resolver: Option<Arc<SniResolver>>,
    hosts: Vec<String>,
    provider: Arc<CryptoProvider>,
}

impl SniContext {
    /// Hosts with a registered certificate, default first.
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn contains(&self, host: &str) -> bool {
        self.resolver
            .as_ref()
            .is_some_and(|r| r.by_host.contains_key(&host.to_ascii_lowercase()))
    }

    pub fn host_set(&self) -> HashSet<String> {
        self.hosts.iter().map(|h| h.to_ascii_lowercase()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.resolver.is_none()
    }

    /// rustls server config for the TLS listener.
    pub fn server_config(&self) -> Result<Arc<ServerConfig>, CertificateError> {
        let resolver = self.resolver.clone().ok_or(CertificateError::Empty)?;
        let mut config = ServerConfig::builder_with_provider(self.provider.clone())
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_cert_resolver(resolver);
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        Ok(Arc::new(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn write_material(store: &CertificateStore, host: &str, with_ca: bool) {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec![host.to_string()]).unwrap();
        let paths = store.paths(host);
        std::fs::create_dir_all(&paths.dir).unwrap();
        std::fs::write(&paths.key, key_pair.serialize_pem()).unwrap();
        std::fs::write(&paths.cert, cert.pem()).unwrap();
        if with_ca {
            std::fs::write(&paths.ca_bundle, cert.pem()).unwrap();
        }
    }

    fn store(root: &Path, auto_tls: bool) -> CertificateStore {
        CertificateStore::new(TlsConfig {
            cert_root: root.to_path_buf(),
            auto_tls,
            ..TlsConfig::default()
        })
    }

    /// Writes material on demand and counts calls.
    struct FakeIssuer {
        calls: AtomicUsize,
        store: CertificateStore,
    }

    #[async_trait]
    impl CertIssuer for FakeIssuer {
        async fn issue(&self, host: &str, _dir: &Path) -> Result<(), CertificateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            write_material(&self.store, host, true);
            Ok(())
        }
    }

    #[test]
    fn two_of_three_artifacts_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), false);
        write_material(&store, "partial.com", false);

        assert!(!store.validate_secure_context("partial.com"));
        let err = store.load_bundle("partial.com").unwrap_err();
        assert!(matches!(err, CertificateError::Missing { artifact: "ca_bundle", .. }));
    }

    #[test]
    fn garbage_pem_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), false);
        let paths = store.paths("junk.com");
        std::fs::create_dir_all(&paths.dir).unwrap();
        for path in [&paths.key, &paths.cert, &paths.ca_bundle] {
            std::fs::write(path, "not a pem").unwrap();
        }
        assert!(!store.validate_secure_context("junk.com"));
    }

    #[tokio::test]
    async fn sni_context_excludes_incomplete_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), false);
        write_material(&store, "good.com", true);
        write_material(&store, "partial.com", false);

        assert!(store.validate_secure_context("good.com"));

        let hosts = vec!["partial.com".to_string(), "good.com".to_string()];
        let sni = store.build_sni(&hosts, Environment::Production, None).await;
        assert_eq!(sni.hosts(), ["good.com".to_string()]);
        assert!(sni.contains("good.com"));
        assert!(!sni.contains("partial.com"));
        assert!(sni.server_config().is_ok());
    }

    #[tokio::test]
    async fn no_valid_host_means_no_tls_config() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), false);
        let sni = store
            .build_sni(&["missing.com".to_string()], Environment::Production, None)
            .await;
        assert!(sni.is_empty());
        assert!(matches!(sni.server_config(), Err(CertificateError::Empty)));
    }

    #[tokio::test]
    async fn auto_tls_issues_once_in_development() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), true);
        let issuer = FakeIssuer {
            calls: AtomicUsize::new(0),
            store: store.clone(),
        };

        let sni = store
            .build_sni(&["dev.local".to_string()], Environment::Development, Some(&issuer))
            .await;
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);
        assert!(sni.contains("dev.local"));
    }

    #[tokio::test]
    async fn auto_tls_never_runs_in_production() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), true);
        let issuer = FakeIssuer {
            calls: AtomicUsize::new(0),
            store: store.clone(),
        };

        let sni = store
            .build_sni(&["prod.com".to_string()], Environment::Production, Some(&issuer))
            .await;
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 0);
        assert!(sni.is_empty());
    }
}
