use std::net::SocketAddr;
use std::path::PathBuf;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};

pub struct WebhookConfig {
    pub(crate) bind: BindConfig,
    pub(crate) cert: CertConfig,
}

pub enum BindConfig {
    SocketAddr(SocketAddr),
    RandomForTest,
}

pub enum CertConfig {
    /// A `tls.crt`/`tls.key` pair read once at startup from this directory.
    /// No hot-reload: certificate plumbing is an external collaborator.
    CertDir(PathBuf),
    /// Override cert for test.
    Override(CertificateDer<'static>, PrivateKeyDer<'static>),
}

impl WebhookConfig {
    pub fn from_cert_dir(port: u16, cert_dir: impl Into<PathBuf>) -> Self {
        Self {
            bind: BindConfig::SocketAddr(SocketAddr::from(([0, 0, 0, 0], port))),
            cert: CertConfig::CertDir(cert_dir.into()),
        }
    }

    pub fn random_port_for_test(
        cert: CertificateDer<'static>,
        key_pair_der: PrivateKeyDer<'static>,
    ) -> Self {
        Self {
            bind: BindConfig::RandomForTest,
            cert: CertConfig::Override(cert, key_pair_der),
        }
    }
}
