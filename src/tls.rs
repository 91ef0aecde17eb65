//! TLS acceptor construction.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::ServerConfig as RustlsServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::config::TlsConfig;

/// Why TLS material could not be turned into an acceptor.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("both cert_path and key_path are required")]
    MissingPaths,

    #[error("reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no certificates found in {0:?}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0:?}")]
    NoPrivateKey(PathBuf),

    #[error("building server config: {0}")]
    Rustls(#[from] rustls::Error),
}

impl TlsError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self::Io { path: path.to_owned(), source }
    }
}

/// Builds the acceptor for `config`.
///
/// A prebuilt rustls config is used as is. PEM material is loaded from disk
/// and advertises `h2` and `http/1.1` over ALPN.
pub(crate) fn build_acceptor(config: &TlsConfig) -> Result<TlsAcceptor, TlsError> {
    if let Some(server_config) = &config.server_config {
        return Ok(TlsAcceptor::from(Arc::clone(server_config)));
    }

    let (Some(cert_path), Some(key_path)) = (&config.cert_path, &config.key_path) else {
        return Err(TlsError::MissingPaths);
    };

    let mut tls_config = load_pem(cert_path, key_path)?;
    tls_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}

fn load_pem(cert_path: &Path, key_path: &Path) -> Result<RustlsServerConfig, TlsError> {
    let cert_file = File::open(cert_path).map_err(TlsError::io(cert_path))?;
    let key_file = File::open(key_path).map_err(TlsError::io(key_path))?;

    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(TlsError::io(cert_path))?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(cert_path.to_owned()));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(TlsError::io(key_path))?
        .ok_or_else(|| TlsError::NoPrivateKey(key_path.to_owned()))?;

    Ok(RustlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?)
}
