//! TLS termination material for the shared listener.

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::Path;
use std::sync::Arc;

use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::{self, Certificate, PrivateKey};

use crate::error::Error;

/// Certificate chain and private key used to terminate TLS on the listener.
///
/// When supplied to [`attach`](crate::attach) or [`Server::tls`](crate::Server::tls),
/// every accepted stream completes a TLS handshake before HTTP is spoken.
#[derive(Clone)]
pub struct TlsConfig {
    acceptor: TlsAcceptor,
}

impl TlsConfig {
    /// Builds from PEM-encoded certificate chain and private key.
    /// The key may be PKCS#8 or PKCS#1 (RSA).
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, Error> {
        Self::load(&mut Cursor::new(cert_pem), &mut Cursor::new(key_pem))
    }

    pub fn from_pem_files(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<Self, Error> {
        let mut certs = BufReader::new(File::open(cert_path)?);
        let mut key = BufReader::new(File::open(key_path)?);
        Self::load(&mut certs, &mut key)
    }

    pub(crate) fn acceptor(&self) -> &TlsAcceptor {
        &self.acceptor
    }

    fn load(certs: &mut dyn BufRead, key: &mut dyn BufRead) -> Result<Self, Error> {
        let certs: Vec<Certificate> = rustls_pemfile::certs(certs)?
            .into_iter()
            .map(Certificate)
            .collect();
        if certs.is_empty() {
            return Err(Error::Certificate("no certificate found".into()));
        }

        let key = private_key(key)?;
        let config = rustls::ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;

        Ok(Self { acceptor: TlsAcceptor::from(Arc::new(config)) })
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig").finish_non_exhaustive()
    }
}

fn private_key(reader: &mut dyn BufRead) -> Result<PrivateKey, Error> {
    loop {
        match rustls_pemfile::read_one(reader)? {
            Some(rustls_pemfile::Item::PKCS8Key(der))
            | Some(rustls_pemfile::Item::RSAKey(der))
            | Some(rustls_pemfile::Item::ECKey(der)) => return Ok(PrivateKey(der)),
            Some(_) => continue,
            None => return Err(Error::Certificate("no private key found".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_generated_certificate() {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_owned()]).unwrap();
        let cert = generated.cert.pem();
        let key = generated.key_pair.serialize_pem();
        assert!(TlsConfig::from_pem(cert.as_bytes(), key.as_bytes()).is_ok());
    }

    #[test]
    fn missing_key_is_reported() {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_owned()]).unwrap();
        let cert = generated.cert.pem();
        let err = TlsConfig::from_pem(cert.as_bytes(), b"").unwrap_err();
        assert!(matches!(err, Error::Certificate(_)));
    }

    #[test]
    fn missing_certificate_is_reported() {
        let err = TlsConfig::from_pem(b"", b"").unwrap_err();
        assert!(matches!(err, Error::Certificate(_)));
    }
}
