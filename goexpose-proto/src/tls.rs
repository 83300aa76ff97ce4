/// TLS material provider: the concrete, disk-backed realization of the
/// `TlsMaterial` contract. The Server requires and verifies a client
/// certificate signed by the configured CA (client certificate presence is
/// the sole authentication per spec §4.4); the Client presents its own
/// certificate and, for self-signed server deployments, may skip server
/// chain verification (a deployment setting, never a protocol one).
use crate::config::{ClientTlsPathsConfig, TlsPathsConfig};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig as RustlsServerConfig, SignatureScheme};
use std::io;
use std::path::Path;
use std::sync::Arc;

/// Installs the process-wide default crypto provider. rustls 0.23 requires
/// this to be called once before any `ServerConfig`/`ClientConfig` builder
/// runs; both binaries call it at the top of `main`.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Contract consumed by the core: produce the rustls configs needed to
/// accept (server) or dial (client) the mutually authenticated control
/// connection. Kept as a trait so tests can substitute in-memory material
/// (via `rcgen`) without touching disk.
pub trait TlsMaterial: Send + Sync {
    fn server_config(&self) -> io::Result<Arc<RustlsServerConfig>>;
    fn client_config(&self) -> io::Result<Arc<ClientConfig>>;
}

fn load_certs(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(path)
        .map_err(|e| io::Error::new(e.kind(), format!("{}: {}", path.display(), e)))?;
    let mut reader = io::BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{}: {}", path.display(), e)))
}

fn load_private_key(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path)
        .map_err(|e| io::Error::new(e.kind(), format!("{}: {}", path.display(), e)))?;
    let mut reader = io::BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{}: {}", path.display(), e)))?
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, format!("{}: no private key found", path.display())))
}

fn load_root_store(ca_path: &Path) -> io::Result<RootCertStore> {
    let mut store = RootCertStore::empty();
    for cert in load_certs(ca_path)? {
        store
            .add(cert)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    }
    Ok(store)
}

/// Disk-backed `TlsMaterial`, reading the paths laid out in spec §6:
/// `~/certs/myCA.pem`, `~/certs/server.{key,crt}`, `~/certs/<name>.{key,crt}`.
pub struct FileServerTlsMaterial {
    paths: TlsPathsConfig,
}

impl FileServerTlsMaterial {
    pub fn new(paths: TlsPathsConfig) -> Self {
        Self { paths }
    }
}

impl TlsMaterial for FileServerTlsMaterial {
    fn server_config(&self) -> io::Result<Arc<RustlsServerConfig>> {
        let roots = load_root_store(&self.paths.ca)?;
        let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

        let certs = load_certs(&self.paths.cert)?;
        let key = load_private_key(&self.paths.key)?;

        let config = RustlsServerConfig::builder()
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        Ok(Arc::new(config))
    }

    fn client_config(&self) -> io::Result<Arc<ClientConfig>> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "server material has no client config"))
    }
}

/// Disk-backed client-side `TlsMaterial`.
pub struct FileClientTlsMaterial {
    paths: ClientTlsPathsConfig,
}

impl FileClientTlsMaterial {
    pub fn new(paths: ClientTlsPathsConfig) -> Self {
        Self { paths }
    }
}

impl TlsMaterial for FileClientTlsMaterial {
    fn server_config(&self) -> io::Result<Arc<RustlsServerConfig>> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "client material has no server config"))
    }

    fn client_config(&self) -> io::Result<Arc<ClientConfig>> {
        let certs = load_certs(&self.paths.cert)?;
        let key = load_private_key(&self.paths.key)?;

        let builder = ClientConfig::builder();
        let config = if self.paths.insecure_skip_verify {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(InsecureServerCertVerifier::default()))
                .with_client_auth_cert(certs, key)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?
        } else {
            let roots = load_root_store(&self.paths.ca)?;
            builder
                .with_root_certificates(roots)
                .with_client_auth_cert(certs, key)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?
        };
        Ok(Arc::new(config))
    }
}

/// Accepts any server certificate chain without verification. Used only
/// when the operator has explicitly opted into `insecure_skip_verify` for
/// a self-signed server deployment — the control connection is still
/// encrypted and the Client still presents (and the Server still checks) a
/// client certificate; only the Server's chain goes unchecked.
#[derive(Debug, Default)]
struct InsecureServerCertVerifier;

impl ServerCertVerifier for InsecureServerCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}
