//! TLS context handling
//!
//! The engine performs the TLS handshake; this module only decides which
//! client context it uses. Either the caller supplies one, or a default is
//! synthesized from the Mozilla root set, optionally extended with a PEM CA
//! bundle.

use rustls::{ClientConfig, RootCertStore};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// A client-side TLS context handed to the transport engine.
#[derive(Debug, Clone)]
pub struct TlsContext {
    config: Arc<ClientConfig>,
}

impl TlsContext {
    /// Wrap a caller-built client configuration.
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self { config }
    }

    /// Synthesize the default context trusting the Mozilla root set.
    pub fn with_default_roots() -> Result<Self, String> {
        Self::from_roots(default_roots())
    }

    /// Default roots plus every certificate found in a PEM bundle.
    pub fn from_ca_bundle(path: &Path) -> Result<Self, String> {
        let file = File::open(path)
            .map_err(|e| format!("Failed to open CA bundle {}: {}", path.display(), e))?;
        let mut reader = BufReader::new(file);

        let mut roots = default_roots();
        let mut added = 0usize;
        for cert in rustls_pemfile::certs(&mut reader) {
            let cert = cert
                .map_err(|e| format!("Failed to read CA bundle {}: {}", path.display(), e))?;
            roots
                .add(cert)
                .map_err(|e| format!("Failed to add CA certificate: {}", e))?;
            added += 1;
        }

        if added == 0 {
            return Err(format!("No certificates found in {}", path.display()));
        }

        debug!(path = %path.display(), added, "Loaded CA bundle");
        Self::from_roots(roots)
    }

    /// The underlying rustls configuration.
    pub fn client_config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.config)
    }

    fn from_roots(roots: RootCertStore) -> Result<Self, String> {
        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| format!("Failed to build TLS client config: {}", e))?
        .with_root_certificates(roots)
        .with_no_client_auth();

        Ok(Self {
            config: Arc::new(config),
        })
    }
}

fn default_roots() -> RootCertStore {
    RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.into(),
    }
}

/// Where the connection's TLS context comes from.
#[derive(Debug, Clone, Default)]
pub enum TlsSource {
    /// Synthesize the default trust context.
    #[default]
    Default,
    /// Use a caller-built context as is.
    Supplied(TlsContext),
    /// Default roots extended with a PEM bundle read at connect time.
    CaBundle(PathBuf),
}

impl TlsSource {
    /// Build (or hand back) the context. Errors are descriptive strings the
    /// caller captures as a TLS setup failure.
    pub fn resolve(&self) -> Result<TlsContext, String> {
        match self {
            Self::Default => TlsContext::with_default_roots(),
            Self::Supplied(context) => Ok(context.clone()),
            Self::CaBundle(path) => TlsContext::from_ca_bundle(path),
        }
    }
}

/// TLS settings installed on the bound transport.
///
/// Always client mode with peer verification required. There is no way to
/// build a domain that skips verification.
#[derive(Debug, Clone)]
pub struct TlsDomain {
    /// None when the context could not be built; the attempt is already
    /// marked failed in that case.
    pub context: Option<TlsContext>,
}

impl TlsDomain {
    pub fn client(context: Option<TlsContext>) -> Self {
        Self { context }
    }
}
