//! TLS setup for remote daemons.
//!
//! LXD authenticates remote clients by certificate and usually serves a
//! self-signed certificate of its own, so the server certificate is pinned
//! as the only trust root.

use crate::config::RemoteEndpoint;
use crate::error::{LxdError, Result};
use hyper::client::HttpConnector;
use hyper_rustls::HttpsConnector;
use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore};
use rustls_pemfile::Item;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Build an HTTPS connector that presents the endpoint's client certificate.
pub(crate) fn connector(remote: &RemoteEndpoint) -> Result<HttpsConnector<HttpConnector>> {
    let config = client_config(remote)?;
    Ok(hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(config)
        .https_only()
        .enable_http1()
        .build())
}

fn client_config(remote: &RemoteEndpoint) -> Result<ClientConfig> {
    let mut roots = RootCertStore::empty();
    for cert in read_certs(&remote.server_cert)? {
        roots.add(&cert).map_err(|e| {
            LxdError::Config(format!(
                "invalid server certificate {}: {e}",
                remote.server_cert.display()
            ))
        })?;
    }

    let chain = read_certs(&remote.client_cert)?;
    let key = read_key(&remote.client_key)?;

    ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_client_auth_cert(chain, key)
        .map_err(|e| LxdError::Config(format!("invalid client certificate: {e}")))
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| LxdError::Config(format!("cannot read {}: {e}", path.display())))
}

fn read_certs(path: &Path) -> Result<Vec<Certificate>> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .map_err(|e| LxdError::Config(format!("invalid PEM in {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(LxdError::Config(format!(
            "no certificate found in {}",
            path.display()
        )));
    }
    Ok(certs.into_iter().map(Certificate).collect())
}

fn read_key(path: &Path) -> Result<PrivateKey> {
    let mut reader = open(path)?;
    loop {
        let item = rustls_pemfile::read_one(&mut reader)
            .map_err(|e| LxdError::Config(format!("invalid PEM in {}: {e}", path.display())))?;
        match item {
            Some(Item::PKCS8Key(key)) | Some(Item::RSAKey(key)) | Some(Item::ECKey(key)) => {
                return Ok(PrivateKey(key));
            }
            Some(_) => continue,
            None => {
                return Err(LxdError::Config(format!(
                    "no private key found in {}",
                    path.display()
                )))
            }
        }
    }
}
