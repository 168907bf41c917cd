//! TLS setup for the client side of a connection.
//!
//! Initialization is synchronous and happens before the first connect: the
//! verification file is loaded into a root store and a client configuration
//! is built that verifies the peer certificate and checks it against the
//! configured domain. A failed init leaves the client in a state where every
//! subsequent connect reports `NotConnected`.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio_rustls::rustls::pki_types::{InvalidDnsNameError, ServerName};
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::info;

/// Why TLS initialization failed.
#[derive(Debug, Error)]
pub(crate) enum TlsInitError {
    #[error("no certificate file at {}", .0.display())]
    MissingCertificate(PathBuf),
    #[error("failed to read certificate file: {0}")]
    Io(#[from] io::Error),
    #[error("certificate rejected: {0}")]
    Store(#[from] tokio_rustls::rustls::Error),
    #[error("invalid tls domain: {0}")]
    InvalidDomain(#[from] InvalidDnsNameError),
    #[error("certificate file contains no certificates")]
    EmptyCertificateFile,
}

/// A ready-to-use client-side TLS context.
#[derive(Clone)]
pub(crate) struct TlsContext {
    pub(crate) connector: TlsConnector,
    pub(crate) server_name: ServerName<'static>,
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsContext")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

/// Load the verification file and build the connector.
pub(crate) fn init(cert_path: &Path, domain: &str) -> Result<TlsContext, TlsInitError> {
    info!(domain, cert = %cert_path.display(), "initializing tls");
    if !cert_path.is_file() {
        return Err(TlsInitError::MissingCertificate(cert_path.to_path_buf()));
    }

    let mut reader = BufReader::new(File::open(cert_path)?);
    let mut roots = RootCertStore::empty();
    let mut loaded = 0usize;
    for cert in rustls_pemfile::certs(&mut reader) {
        roots.add(cert?)?;
        loaded += 1;
    }
    if loaded == 0 {
        return Err(TlsInitError::EmptyCertificateFile);
    }

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let server_name = ServerName::try_from(domain.to_owned())?;

    Ok(TlsContext {
        connector: TlsConnector::from(Arc::new(config)),
        server_name,
    })
}
