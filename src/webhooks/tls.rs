use std::io::Cursor;
use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;
use eyre::{Context, ContextCompat, Result};
use rustls::pki_types::PrivateKeyDer;
use tokio::fs::File;
use tokio::io::copy;

use crate::webhooks::config::CertConfig;

const TLS_CRT: &str = "tls.crt";
const TLS_KEY: &str = "tls.key";

/// Loads the webhook's server certificate once at startup. Unlike the
/// teacher's reactive variant this never reloads; rotating the cert
/// directory requires a process restart (cert plumbing is an external
/// collaborator, see the purpose/scope notes).
pub async fn build_rustls_config(config: &CertConfig) -> Result<RustlsConfig> {
    match config {
        CertConfig::CertDir(cert_dir) => {
            let (certs, key) = load_cert_from(cert_dir).await?;
            Ok(RustlsConfig::from_der(certs, key).await?)
        }
        CertConfig::Override(cert, key) => {
            let certs = vec![Vec::from(cert.as_ref())];
            let key = Vec::from(key.secret_der());
            Ok(RustlsConfig::from_der(certs, key).await?)
        }
    }
}

async fn load_cert_from(cert_dir: &Path) -> Result<(Vec<Vec<u8>>, Vec<u8>)> {
    let certs = {
        let path = cert_dir.join(TLS_CRT);
        let mut file = File::open(&path).await.context(format!("File({path:?})"))?;
        let mut crt = Vec::new();
        copy(&mut file, &mut crt).await?;
        rustls_pemfile::certs(&mut Cursor::new(crt))
            .map(|cert| cert.map(|cert| Vec::from(cert.as_ref())))
            .collect::<std::io::Result<Vec<_>>>()
            .context(format!("Cert({path:?})"))?
    };

    let key = {
        let path = cert_dir.join(TLS_KEY);
        let mut file = File::open(&path).await.context(format!("File({path:?})"))?;
        let mut key = Vec::new();
        copy(&mut file, &mut key).await?;
        let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut Cursor::new(key))
            .context(format!("Key({path:?})"))?
            .context("empty key")?;
        Vec::from(key.secret_der())
    };

    Ok((certs, key))
}
