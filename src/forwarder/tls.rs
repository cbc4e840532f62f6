// SPDX-License-Identifier: Apache-2.0

use hyper_rustls::ConfigBuilderExt;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime, pem::PemObject};
use std::fmt::{Debug, Formatter};
use std::path::PathBuf;
use std::sync::Arc;
use tower::BoxError;
use tracing::warn;

/// TLS trust settings for the collector connection
#[derive(Default)]
pub struct TlsConfig {
    skip_verify: bool,
    // Native roots are used when absent
    ca_certificates: Vec<CertificateDer<'static>>,
}

#[derive(Clone, Debug)]
enum CaSource {
    File(PathBuf),
    Pem(String),
}

#[derive(Clone, Default)]
pub struct TlsConfigBuilder {
    ca: Option<CaSource>,
    skip_verify: bool,
}

impl TlsConfig {
    pub fn builder() -> TlsConfigBuilder {
        Default::default()
    }

    pub fn skip_verify(&self) -> bool {
        self.skip_verify
    }

    pub fn into_client_config(self) -> Result<ClientConfig, BoxError> {
        if self.skip_verify {
            warn!("TLS certificate verification is disabled for the forwarder endpoint");
            return Ok(ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(SkipServerVerification::new())
                .with_no_client_auth());
        }

        if self.ca_certificates.is_empty() {
            return match ClientConfig::builder().with_native_roots() {
                Ok(builder) => Ok(builder.with_no_client_auth()),
                Err(e) => {
                    // Plain http endpoints still work without any roots
                    warn!(error = %e, "Unable to load native root certificates");
                    Ok(ClientConfig::builder()
                        .with_root_certificates(RootCertStore::empty())
                        .with_no_client_auth())
                }
            };
        }

        let mut roots = RootCertStore::empty();
        for cert in self.ca_certificates {
            roots.add(cert)?;
        }
        Ok(ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth())
    }
}

impl TlsConfigBuilder {
    pub fn with_ca_file(mut self, ca_file: impl Into<PathBuf>) -> Self {
        self.ca = Some(CaSource::File(ca_file.into()));
        self
    }

    pub fn with_ca_pem(mut self, ca_pem: String) -> Self {
        self.ca = Some(CaSource::Pem(ca_pem));
        self
    }

    pub fn with_skip_verify(mut self, skip_verify: bool) -> Self {
        self.skip_verify = skip_verify;
        self
    }

    pub fn build(self) -> Result<TlsConfig, BoxError> {
        let ca_certificates = match &self.ca {
            None => Vec::new(),
            Some(source) => load_certs(source)?,
        };

        Ok(TlsConfig {
            skip_verify: self.skip_verify,
            ca_certificates,
        })
    }
}

fn load_certs(source: &CaSource) -> Result<Vec<CertificateDer<'static>>, BoxError> {
    let certs = match source {
        CaSource::File(path) => CertificateDer::pem_file_iter(path)
            .map_err(|e| format!("unable to read CA file {}: {}", path.display(), e))?
            .collect::<Result<Vec<_>, _>>()?,
        CaSource::Pem(pem) => CertificateDer::pem_slice_iter(pem.as_bytes())
            .collect::<Result<Vec<_>, _>>()?,
    };
    if certs.is_empty() {
        return Err("no certificates found in CA source".into());
    }
    Ok(certs)
}

// Accepts any server certificate. Only for self-signed collectors that are fully trusted.
struct SkipServerVerification;

impl SkipServerVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl Debug for SkipServerVerification {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SkipServerVerification")
    }
}

impl ServerCertVerifier for SkipServerVerification {
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
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
