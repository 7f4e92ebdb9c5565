//! Client transports: plain TCP, TLS, and either one through a SOCKS5 proxy
//!
//! ```text
//! rtmp://host/app/key                          TCP
//! rtmps://host/app/key                         TCP ─► TLS (verified, SNI = host)
//! rtmpx://host/app/key                         TCP ─► TLS (any certificate)
//! rtmps://host/app/key#proxy=socks5://p:1080   SOCKS5 ─► TLS
//! ```
//!
//! TLS certificates are not verified for `rtmpx` or when the host is an IP
//! literal; cameras and self-hosted relays rarely carry a valid chain.

use std::io;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{self, CryptoProvider};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{self, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::TlsConnector;
use tokio_socks::tcp::Socks5Stream;

use crate::client::config::{RtmpUrl, Scheme};
use crate::error::{ProtocolError, Result};

/// Byte stream returned by [`dial`](crate::client::dial)
#[derive(Debug)]
pub enum Transport {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Transport {
    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }

    fn tcp(&self) -> &TcpStream {
        match self {
            Transport::Tcp(socket) => socket,
            Transport::Tls(tls) => tls.get_ref().0,
        }
    }

    pub fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        self.tcp().set_nodelay(nodelay)
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(socket) => Pin::new(socket).poll_read(cx, buf),
            Transport::Tls(tls) => Pin::new(tls.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Tcp(socket) => Pin::new(socket).poll_write(cx, buf),
            Transport::Tls(tls) => Pin::new(tls.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(socket) => Pin::new(socket).poll_flush(cx),
            Transport::Tls(tls) => Pin::new(tls.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Tcp(socket) => Pin::new(socket).poll_shutdown(cx),
            Transport::Tls(tls) => Pin::new(tls.as_mut()).poll_shutdown(cx),
        }
    }
}

/// `socks5://[user:pass@]host:port`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Socks5Proxy {
    pub addr: String,
    pub auth: Option<(String, String)>,
}

impl Socks5Proxy {
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = || ProtocolError::InvalidUrl(url.to_string());

        let (scheme, rest) = url.split_once("://").ok_or_else(invalid)?;
        if !scheme.eq_ignore_ascii_case("socks5") {
            return Err(ProtocolError::UnsupportedScheme(scheme.to_string()).into());
        }
        let authority = rest.split('/').next().unwrap_or_default();

        let (auth, addr) = match authority.rsplit_once('@') {
            Some((userinfo, addr)) => {
                let (user, pass) = userinfo.split_once(':').unwrap_or((userinfo, ""));
                (Some((user.to_string(), pass.to_string())), addr)
            }
            None => (None, authority),
        };
        if addr.is_empty() || !addr.contains(':') {
            return Err(invalid().into());
        }

        Ok(Self {
            addr: addr.to_string(),
            auth,
        })
    }

    async fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        let stream = match &self.auth {
            Some((user, pass)) => {
                Socks5Stream::connect_with_password(self.addr.as_str(), (host, port), user, pass)
                    .await
            }
            None => Socks5Stream::connect(self.addr.as_str(), (host, port)).await,
        };
        // after the SOCKS handshake the socket is a plain tunnel
        stream
            .map(Socks5Stream::into_inner)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

/// Open the transport for `url`; the caller bounds this with its timeout
pub async fn connect(url: &RtmpUrl) -> Result<Transport> {
    let proxy = url.fragment_param("proxy").map(Socks5Proxy::parse).transpose()?;

    let socket = match &proxy {
        Some(proxy) => {
            tracing::debug!(proxy = %proxy.addr, target = %url.addr(), "Dialing through SOCKS5");
            proxy.connect(&url.host, url.port).await?
        }
        None => {
            tracing::debug!(addr = %url.addr(), "Dialing");
            TcpStream::connect(url.addr()).await?
        }
    };

    if !url.scheme.is_tls() {
        return Ok(Transport::Tcp(socket));
    }

    let verify = url.scheme != Scheme::Rtmpx && url.host.parse::<IpAddr>().is_err();
    let connector = TlsConnector::from(Arc::new(tls_config(verify)?));
    let server_name = ServerName::try_from(url.host.clone())
        .map_err(|_| ProtocolError::InvalidUrl(url.tc_url.clone()))?;

    let tls = connector.connect(server_name, socket).await?;
    tracing::debug!(host = %url.host, verified = verify, "TLS established");
    Ok(Transport::Tls(Box::new(tls)))
}

fn tls_config(verify: bool) -> Result<rustls::ClientConfig> {
    let provider = Arc::new(crypto::ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    let config = if verify {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        builder.with_root_certificates(roots).with_no_client_auth()
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
            .with_no_client_auth()
    };
    Ok(config)
}

/// Skips chain and name checks but still checks handshake signatures
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
