/// In-memory mTLS material for end-to-end tests: one self-signed CA, one
/// server leaf cert and one client leaf cert, both signed by that CA.
use std::io;
use std::sync::Arc;

use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};
use rustls::pki_types::CertificateDer;
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};

use goexpose_proto::tls::TlsMaterial;

pub struct TestPki {
    pub ca_cert: CertificateDer<'static>,
    pub server_cert: CertificateDer<'static>,
    pub server_key: PrivateKeyDer<'static>,
    pub client_cert: CertificateDer<'static>,
    pub client_key: PrivateKeyDer<'static>,
}

pub fn generate() -> TestPki {
    let mut ca_params = CertificateParams::new(Vec::new()).expect("ca params");
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let ca_key = KeyPair::generate().expect("ca key");
    let ca_cert = ca_params.self_signed(&ca_key).expect("ca cert");

    let server_key = KeyPair::generate().expect("server key");
    let server_params = CertificateParams::new(vec!["localhost".to_string()]).expect("server params");
    let server_cert = server_params.signed_by(&server_key, &ca_cert, &ca_key).expect("server cert");

    let client_key = KeyPair::generate().expect("client key");
    let client_params = CertificateParams::new(vec!["goexpose-client".to_string()]).expect("client params");
    let client_cert = client_params.signed_by(&client_key, &ca_cert, &ca_key).expect("client cert");

    TestPki {
        ca_cert: ca_cert.der().clone(),
        server_cert: server_cert.der().clone(),
        server_key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(server_key.serialize_der())),
        client_cert: client_cert.der().clone(),
        client_key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(client_key.serialize_der())),
    }
}

impl TestPki {
    pub fn server_config(&self) -> Arc<ServerConfig> {
        let mut roots = RootCertStore::empty();
        roots.add(self.ca_cert.clone()).expect("add ca to server roots");
        let verifier = WebPkiClientVerifier::builder(Arc::new(roots)).build().expect("client verifier");

        let config = ServerConfig::builder()
            .with_client_cert_verifier(verifier)
            .with_single_cert(vec![self.server_cert.clone()], self.server_key.clone_key())
            .expect("server config");
        Arc::new(config)
    }

    pub fn client_config(&self) -> Arc<ClientConfig> {
        let mut roots = RootCertStore::empty();
        roots.add(self.ca_cert.clone()).expect("add ca to client roots");

        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_client_auth_cert(vec![self.client_cert.clone()], self.client_key.clone_key())
            .expect("client config");
        Arc::new(config)
    }
}

/// Adapts `TestPki` to the `TlsMaterial` contract `session::pair` expects.
pub struct TestClientTlsMaterial(pub Arc<ClientConfig>);

impl TlsMaterial for TestClientTlsMaterial {
    fn server_config(&self) -> io::Result<Arc<ServerConfig>> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "test client material has no server config"))
    }

    fn client_config(&self) -> io::Result<Arc<ClientConfig>> {
        Ok(self.0.clone())
    }
}
