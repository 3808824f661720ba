//! TLS configuration
//!
//! Client-side TLS built on OpenSSL. A [`TlsConfig`] is built once and then
//! hands out [`openssl::ssl::Ssl`] handles for individual connections; the
//! connect engine drives the handshake, blocking or not.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use openssl::ssl::{Ssl, SslContext, SslContextBuilder, SslMethod, SslVerifyMode};

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.0
    Tls10,
    /// TLS 1.1
    Tls11,
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Parse TLS version from string (case-insensitive)
    pub fn from_str(s: &str) -> Result<Self, TlsError> {
        match s.to_uppercase().as_str() {
            "TLSV1.0" | "TLS1.0" | "TLSV1" | "TLS1" => Ok(TlsVersion::Tls10),
            "TLSV1.1" | "TLS1.1" => Ok(TlsVersion::Tls11),
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(TlsError::InvalidVersion(s.to_string())),
        }
    }

    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(&self) -> openssl::ssl::SslVersion {
        use openssl::ssl::SslVersion;
        match self {
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    /// Get version as string
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls10 => "TLSv1.0",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TLS version: {0}")]
    InvalidVersion(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
}

/// Client TLS configuration (immutable after building)
#[derive(Clone)]
pub struct TlsConfig {
    pub(crate) ctx: SslContext,
    pub(crate) servername: Option<String>,
    pub(crate) verify_peer: bool,
}

impl TlsConfig {
    /// Create a new configuration builder
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::new()
    }

    /// Create an [`Ssl`] handle for one connection
    ///
    /// SNI is the configured servername, falling back to `default_sni`
    /// (normally the host being connected to). When peer verification is on,
    /// the certificate is also checked against that name.
    pub(crate) fn new_ssl(&self, default_sni: &str) -> Result<Ssl, TlsError> {
        let mut ssl = Ssl::new(&self.ctx)?;
        let name = self.servername.as_deref().unwrap_or(default_sni);
        if !name.is_empty() {
            ssl.set_hostname(name)?;
            if self.verify_peer {
                ssl.param_mut().set_host(name)?;
            }
        }
        Ok(ssl)
    }
}

/// Client configuration builder
pub struct TlsConfigBuilder {
    ctx_builder: SslContextBuilder,
    servername: Option<String>,
    verify_peer: bool,
}

impl TlsConfigBuilder {
    fn new() -> Self {
        let mut ctx_builder =
            SslContextBuilder::new(SslMethod::tls_client()).expect("Failed to create SSL context");

        // Default: don't verify peer (for testing)
        ctx_builder.set_verify(SslVerifyMode::NONE);

        TlsConfigBuilder {
            ctx_builder,
            servername: None,
            verify_peer: false,
        }
    }

    /// Set TLS version (both min and max)
    pub fn version(mut self, version: TlsVersion) -> Self {
        self.ctx_builder
            .set_min_proto_version(Some(version.to_openssl_version()))
            .expect("Failed to set min proto version");
        self.ctx_builder
            .set_max_proto_version(Some(version.to_openssl_version()))
            .expect("Failed to set max proto version");
        self
    }

    /// Set TLS version range
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Self {
        self.ctx_builder
            .set_min_proto_version(Some(min.to_openssl_version()))
            .expect("Failed to set min proto version");
        self.ctx_builder
            .set_max_proto_version(Some(max.to_openssl_version()))
            .expect("Failed to set max proto version");
        self
    }

    /// Set cipher list (for TLS <= 1.2)
    pub fn cipher_list(mut self, ciphers: &str) -> Result<Self, TlsError> {
        self.ctx_builder.set_cipher_list(ciphers)?;
        Ok(self)
    }

    /// Set cipher suites (for TLS 1.3)
    pub fn ciphersuites(mut self, ciphers: &str) -> Result<Self, TlsError> {
        self.ctx_builder.set_ciphersuites(ciphers)?;
        Ok(self)
    }

    /// Set ALPN protocols
    pub fn alpn(mut self, protocols: &[&str]) -> Result<Self, TlsError> {
        // length-prefixed wire encoding
        let mut alpn_bytes = Vec::new();
        for proto in protocols {
            alpn_bytes.push(proto.len() as u8);
            alpn_bytes.extend_from_slice(proto.as_bytes());
        }
        self.ctx_builder.set_alpn_protos(&alpn_bytes)?;
        Ok(self)
    }

    /// Set SNI servername, overriding the connection's host
    pub fn servername(mut self, name: impl Into<String>) -> Self {
        self.servername = Some(name.into());
        self
    }

    /// Enable/disable peer certificate verification
    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.verify_peer = verify;
        if verify {
            self.ctx_builder.set_verify(SslVerifyMode::PEER);
        } else {
            self.ctx_builder.set_verify(SslVerifyMode::NONE);
        }
        self
    }

    /// Set CA file for peer verification
    pub fn ca_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, TlsError> {
        self.ctx_builder.set_ca_file(path.as_ref())?;
        Ok(self)
    }

    /// Load client certificate and private key from a PEM file
    pub fn cert_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, TlsError> {
        use openssl::pkey::PKey;
        use openssl::x509::X509;

        let mut cert_pem = Vec::new();
        File::open(path.as_ref())?.read_to_end(&mut cert_pem)?;

        let cert = X509::from_pem(&cert_pem)
            .map_err(|e| TlsError::Certificate(format!("Failed to load certificate: {}", e)))?;
        self.ctx_builder.set_certificate(&cert)?;

        let key = PKey::private_key_from_pem(&cert_pem)
            .map_err(|e| TlsError::Certificate(format!("Failed to load private key: {}", e)))?;
        self.ctx_builder.set_private_key(&key)?;

        Ok(self)
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        Ok(TlsConfig {
            ctx: self.ctx_builder.build(),
            servername: self.servername,
            verify_peer: self.verify_peer,
        })
    }
}
