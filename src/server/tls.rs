//! TLS context initialization over `rustls`, loading a certificate/key pair
//! from PEM files at startup. The accepted stream implements the same
//! `AsyncRead + AsyncWrite` contract as a plain [`tokio::net::TcpStream`],
//! so the connection loop in [`crate::server::connection`] runs unmodified
//! over either.

use crate::errors::TlsError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::{path::Path, sync::Arc};
use tokio_rustls::TlsAcceptor;

/// Builds a [`TlsAcceptor`] from a PEM certificate chain and private key.
pub(crate) fn build_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, TlsError> {
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(TlsError::Config)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = std::fs::File::open(path).map_err(TlsError::CertFile)?;
    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(TlsError::CertFile)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = std::fs::File::open(path).map_err(TlsError::KeyFile)?;
    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(TlsError::KeyFile)?
        .ok_or(TlsError::NoKey)
}
