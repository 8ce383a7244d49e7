//! Transport setup and stream abstraction
//!
//! A [`Transport`] is the pair of boxed read/write halves a protocol's
//! `setup` returns. TCP and TLS client connections are provided here; a
//! protocol is free to return halves over any other stream type (tests use
//! in-memory duplex pipes).

use crate::{Error, Result};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

/// Read half of a connection stream
pub trait TransportRead: AsyncRead + Send + Unpin {}
impl<T: AsyncRead + Send + Unpin> TransportRead for T {}

/// Write half of a connection stream
pub trait TransportWrite: AsyncWrite + Send + Unpin {}
impl<T: AsyncWrite + Send + Unpin> TransportWrite for T {}

/// A live byte stream to a server, split for independent read/write tasks
pub struct Transport {
    /// Read half, consumed by the protocol's read loop
    pub read: Box<dyn TransportRead>,
    /// Write half, consumed by the connection's writer task
    pub write: Box<dyn TransportWrite>,
}

impl Transport {
    /// Wrap an already-connected stream
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        Self {
            read: Box::new(read),
            write: Box::new(write),
        }
    }
}

/// Open a plain TCP connection
pub async fn connect_tcp(host: &str, port: u16) -> Result<Transport> {
    let stream = TcpStream::connect((host, port)).await?;
    tracing::debug!("connected to {}:{}", host, port);
    Ok(Transport::from_stream(stream))
}

/// Open a TLS connection, optionally accepting invalid certificates
pub async fn connect_tls(host: &str, port: u16, allow_invalid: bool) -> Result<Transport> {
    let tcp = TcpStream::connect((host, port)).await?;
    let connector = TlsConnector::from(tls_client_config(allow_invalid)?);
    let server_name = rustls::ServerName::try_from(host)
        .map_err(|_| Error::Connection(format!("invalid server name '{}'", host)))?;
    let stream = connector.connect(server_name, tcp).await?;
    tracing::debug!("TLS handshake completed with {}:{}", host, port);
    Ok(Transport::from_stream(stream))
}

fn tls_client_config(allow_invalid: bool) -> Result<Arc<rustls::ClientConfig>> {
    let mut roots = rustls::RootCertStore::empty();
    if !allow_invalid {
        for cert in rustls_native_certs::load_native_certs()? {
            if let Err(e) = roots.add(&rustls::Certificate(cert.0)) {
                tracing::warn!("failed to add native root certificate: {}", e);
            }
        }
    }

    let mut config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    if allow_invalid {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(AcceptAllVerifier));
    }

    Ok(Arc::new(config))
}

/// Certificate verifier that accepts any server certificate
///
/// Only installed when `tls_allow_invalid` is set for a network.
struct AcceptAllVerifier;

impl rustls::client::ServerCertVerifier for AcceptAllVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> std::result::Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}
