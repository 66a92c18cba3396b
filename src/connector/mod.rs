//! Target connector: resolves the data target, opens the data connection,
//! performs the protocol handshake and sizes the payload buffer.
//!
//! Everything that can be rejected from the documents alone (cookie, payload
//! size) is checked in [`ConnectPlan::new`], before any socket exists.

pub mod handshake;
pub mod header;

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, info};

use crate::control::documents::{TestConfig, TestParams};
use handshake::COOKIE_SIZE;
use header::HeaderFormat;

/// Payload size used when the config carries neither `MSS` nor `len`.
pub const DEFAULT_PAYLOAD_SIZE: usize = 8192;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("cookie has {len} characters, {required} required")]
    CookieTooShort { len: usize, required: usize },

    #[error("cookie is not valid hex: {0}")]
    CookieInvalid(#[source] hex::FromHexError),

    #[error("payload size {size} is below the minimum of {minimum} bytes")]
    PayloadTooSmall { size: usize, minimum: usize },

    #[error("failed to resolve {target}:{port}: {source}")]
    Resolve {
        target: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("no {family} address found for {target}:{port}")]
    NoAddress {
        target: String,
        port: u16,
        family: AddressFamily,
    },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("handshake with {addr} failed: {source}")]
    Handshake {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

// ---------------------------------------------------------------------------
// Resolution hints
// ---------------------------------------------------------------------------

/// Address family restriction derived from `version4` / `version6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Any,
    V4,
    V6,
}

impl AddressFamily {
    /// `version4` takes precedence when both flags are present.
    pub fn from_params(params: &TestParams) -> Self {
        if params.version4 {
            Self::V4
        } else if params.version6 {
            Self::V6
        } else {
            Self::Any
        }
    }

    pub fn admits(self, addr: &SocketAddr) -> bool {
        match self {
            Self::Any => true,
            Self::V4 => addr.is_ipv4(),
            Self::V6 => addr.is_ipv6(),
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::Any => write!(f, "any"),
            AddressFamily::V4 => write!(f, "IPv4"),
            AddressFamily::V6 => write!(f, "IPv6"),
        }
    }
}

/// Socket type of the data connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Stream,
    Datagram,
}

impl Transport {
    pub fn from_params(params: &TestParams) -> Self {
        if params.udp {
            Self::Datagram
        } else {
            Self::Stream
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Stream => write!(f, "tcp"),
            Transport::Datagram => write!(f, "udp"),
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectPlan
// ---------------------------------------------------------------------------

/// Everything needed to open the data connection, validated up front.
#[derive(Debug, Clone)]
pub struct ConnectPlan {
    pub family: AddressFamily,
    pub transport: Transport,
    pub payload_size: usize,
    /// UDP payload header variant; `None` for TCP.
    pub header: Option<HeaderFormat>,
    /// Decoded session cookie; `None` for UDP.
    pub cookie: Option<[u8; COOKIE_SIZE]>,
}

impl ConnectPlan {
    pub fn new(
        config: &TestConfig,
        params: &TestParams,
        default_payload_size: usize,
    ) -> Result<Self, ConnectError> {
        let family = AddressFamily::from_params(params);
        let transport = Transport::from_params(params);
        let payload_size = config.payload_size(default_payload_size);

        let (header, cookie) = match transport {
            Transport::Datagram => (Some(HeaderFormat::from_flag(params.udp_counters_64bit)), None),
            Transport::Stream => (None, Some(handshake::decode_cookie(&config.cookie)?)),
        };

        let minimum = header.map(HeaderFormat::encoded_len).unwrap_or(1);
        if payload_size < minimum {
            return Err(ConnectError::PayloadTooSmall {
                size: payload_size,
                minimum,
            });
        }

        Ok(Self {
            family,
            transport,
            payload_size,
            header,
            cookie,
        })
    }

    /// Resolve `target`:`port` and keep the first address of the hinted family.
    pub async fn resolve(&self, target: &str, port: u16) -> Result<SocketAddr, ConnectError> {
        let mut addrs = tokio::net::lookup_host((target, port))
            .await
            .map_err(|source| ConnectError::Resolve {
                target: target.to_string(),
                port,
                source,
            })?;

        addrs
            .find(|addr| self.family.admits(addr))
            .ok_or_else(|| ConnectError::NoAddress {
                target: target.to_string(),
                port,
                family: self.family,
            })
    }

    /// Resolve, connect and handshake.
    pub async fn connect(&self, target: &str, port: u16) -> Result<DataConnection, ConnectError> {
        let addr = self.resolve(target, port).await?;
        debug!(%addr, transport = %self.transport, "resolved data target");

        let socket = match self.transport {
            Transport::Stream => {
                let mut stream = TcpStream::connect(addr)
                    .await
                    .map_err(|source| ConnectError::Connect { addr, source })?;
                if let Some(cookie) = &self.cookie {
                    stream
                        .write_all(cookie)
                        .await
                        .map_err(|source| ConnectError::Handshake { addr, source })?;
                }
                DataSocket::Tcp(stream)
            }
            Transport::Datagram => {
                let local: SocketAddr = if addr.is_ipv4() {
                    (Ipv4Addr::UNSPECIFIED, 0).into()
                } else {
                    (Ipv6Addr::UNSPECIFIED, 0).into()
                };
                let socket = UdpSocket::bind(local)
                    .await
                    .map_err(|source| ConnectError::Connect { addr, source })?;
                socket
                    .connect(addr)
                    .await
                    .map_err(|source| ConnectError::Connect { addr, source })?;
                socket
                    .send(&handshake::udp_connect_marker())
                    .await
                    .map_err(|source| ConnectError::Handshake { addr, source })?;
                DataSocket::Udp(socket)
            }
        };

        info!(
            %addr,
            transport = %self.transport,
            payload_size = self.payload_size,
            "data connection established"
        );

        Ok(DataConnection {
            socket,
            peer: addr,
            payload: Payload::new(self.payload_size, self.header),
        })
    }
}

/// Validate the documents, then resolve, connect and handshake.
pub async fn connect_target(
    config: &TestConfig,
    params: &TestParams,
    default_payload_size: usize,
) -> Result<DataConnection, ConnectError> {
    ConnectPlan::new(config, params, default_payload_size)?
        .connect(&config.target, config.data_port)
        .await
}

// ---------------------------------------------------------------------------
// Data connection
// ---------------------------------------------------------------------------

/// An established data connection with its payload buffer.
#[derive(Debug)]
pub struct DataConnection {
    pub socket: DataSocket,
    pub peer: SocketAddr,
    pub payload: Payload,
}

/// Send buffer allocated once at its final size.
#[derive(Debug)]
pub struct Payload {
    pub buffer: Vec<u8>,
    pub header: Option<HeaderFormat>,
}

impl Payload {
    pub fn new(size: usize, header: Option<HeaderFormat>) -> Self {
        Self {
            buffer: vec![0u8; size],
            header,
        }
    }
}

/// Connected data socket.
#[derive(Debug)]
pub enum DataSocket {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

/// Destination for test payloads.
#[async_trait]
pub trait PayloadSink: Send {
    /// Send one payload, returning the number of bytes accepted.
    async fn send_payload(&mut self, buf: &[u8]) -> io::Result<usize>;
}

#[async_trait]
impl PayloadSink for DataSocket {
    async fn send_payload(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            DataSocket::Tcp(stream) => stream.write(buf).await,
            DataSocket::Udp(socket) => socket.send(buf).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn config(cookie: &str, extra: serde_json::Value) -> TestConfig {
        let mut doc = json!({
            "target": "127.0.0.1",
            "data_port": 0,
            "cookie": cookie,
            "interval": 1
        });
        if let (Some(base), Some(extra)) = (doc.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        TestConfig::from_document(doc).unwrap()
    }

    fn params(doc: serde_json::Value) -> TestParams {
        TestParams::from_document(doc).unwrap()
    }

    fn valid_cookie() -> String {
        "5a".repeat(COOKIE_SIZE)
    }

    #[test]
    fn test_transport_is_datagram_iff_udp_present() {
        let cases = [
            (json!({"time": 1}), Transport::Stream),
            (json!({"time": 1, "udp": true}), Transport::Datagram),
            (json!({"time": 1, "udp": null, "version6": 1}), Transport::Datagram),
            (json!({"time": 1, "version4": 1}), Transport::Stream),
        ];
        for (doc, expected) in cases {
            assert_eq!(Transport::from_params(&params(doc.clone())), expected, "{}", doc);
        }
    }

    #[test]
    fn test_family_hints() {
        assert_eq!(AddressFamily::from_params(&params(json!({"time": 1}))), AddressFamily::Any);
        assert_eq!(
            AddressFamily::from_params(&params(json!({"time": 1, "version6": 1}))),
            AddressFamily::V6
        );
        assert_eq!(
            AddressFamily::from_params(&params(json!({"time": 1, "version4": 1, "version6": 1}))),
            AddressFamily::V4
        );

        let v4: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let v6: SocketAddr = "[::1]:1".parse().unwrap();
        assert!(AddressFamily::Any.admits(&v4) && AddressFamily::Any.admits(&v6));
        assert!(AddressFamily::V4.admits(&v4) && !AddressFamily::V4.admits(&v6));
        assert!(AddressFamily::V6.admits(&v6) && !AddressFamily::V6.admits(&v4));
    }

    #[test]
    fn test_plan_payload_size_resolution() {
        let tcp = params(json!({"time": 1}));
        let cases = [
            (json!({}), 8192),
            (json!({"len": 4000}), 4000),
            (json!({"MSS": 1448}), 1448),
            (json!({"MSS": 1448, "len": 4000}), 1448),
        ];
        for (extra, expected) in cases {
            let plan = ConnectPlan::new(&config(&valid_cookie(), extra), &tcp, DEFAULT_PAYLOAD_SIZE)
                .unwrap();
            assert_eq!(plan.payload_size, expected);
        }
    }

    #[test]
    fn test_plan_tcp_decodes_cookie() {
        let plan = ConnectPlan::new(
            &config(&valid_cookie(), json!({})),
            &params(json!({"time": 1})),
            DEFAULT_PAYLOAD_SIZE,
        )
        .unwrap();
        assert_eq!(plan.cookie, Some([0x5a; COOKIE_SIZE]));
        assert_eq!(plan.header, None);
    }

    #[test]
    fn test_plan_short_cookie_fails() {
        let err = ConnectPlan::new(
            &config(&"5a".repeat(36), json!({})),
            &params(json!({"time": 1})),
            DEFAULT_PAYLOAD_SIZE,
        )
        .unwrap_err();
        assert!(matches!(err, ConnectError::CookieTooShort { len: 72, .. }));
    }

    #[test]
    fn test_plan_udp_ignores_cookie() {
        let plan = ConnectPlan::new(
            &config("", json!({})),
            &params(json!({"time": 1, "udp": true, "udp_counters_64bit": 1})),
            DEFAULT_PAYLOAD_SIZE,
        )
        .unwrap();
        assert_eq!(plan.cookie, None);
        assert_eq!(plan.header, Some(HeaderFormat::Counter64));
    }

    #[test]
    fn test_plan_udp_payload_must_hold_header() {
        let err = ConnectPlan::new(
            &config("", json!({"len": 8})),
            &params(json!({"time": 1, "udp": true})),
            DEFAULT_PAYLOAD_SIZE,
        )
        .unwrap_err();
        assert!(matches!(err, ConnectError::PayloadTooSmall { size: 8, minimum: 12 }));
    }

    #[test]
    fn test_plan_rejects_zero_payload() {
        let err = ConnectPlan::new(
            &config(&valid_cookie(), json!({"MSS": 0})),
            &params(json!({"time": 1})),
            DEFAULT_PAYLOAD_SIZE,
        )
        .unwrap_err();
        assert!(matches!(err, ConnectError::PayloadTooSmall { size: 0, minimum: 1 }));
    }

    #[tokio::test]
    async fn test_tcp_connect_sends_cookie() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut cfg = config(&valid_cookie(), json!({"MSS": 1000}));
        cfg.data_port = port;

        let accept = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut cookie = [0u8; COOKIE_SIZE];
            stream.read_exact(&mut cookie).await.unwrap();
            cookie
        });

        let conn = connect_target(&cfg, &params(json!({"time": 1})), DEFAULT_PAYLOAD_SIZE)
            .await
            .unwrap();
        assert!(matches!(conn.socket, DataSocket::Tcp(_)));
        assert_eq!(conn.payload.buffer.len(), 1000);
        assert_eq!(conn.payload.header, None);

        assert_eq!(accept.await.unwrap(), [0x5a; COOKIE_SIZE]);
    }

    #[tokio::test]
    async fn test_udp_connect_sends_marker() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut cfg = config("", json!({}));
        cfg.data_port = receiver.local_addr().unwrap().port();

        let conn = connect_target(&cfg, &params(json!({"time": 1, "udp": 1})), DEFAULT_PAYLOAD_SIZE)
            .await
            .unwrap();
        assert!(matches!(conn.socket, DataSocket::Udp(_)));
        assert_eq!(conn.payload.buffer.len(), DEFAULT_PAYLOAD_SIZE);
        assert_eq!(conn.payload.header, Some(HeaderFormat::Counter32));

        let mut buf = [0u8; 64];
        let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &handshake::udp_connect_marker());
    }

    #[tokio::test]
    async fn test_resolve_family_mismatch() {
        let plan = ConnectPlan::new(
            &config("", json!({})),
            &params(json!({"time": 1, "udp": 1, "version6": 1})),
            DEFAULT_PAYLOAD_SIZE,
        )
        .unwrap();

        let err = plan.resolve("127.0.0.1", 5001).await.unwrap_err();
        assert!(matches!(err, ConnectError::NoAddress { family: AddressFamily::V6, .. }));
    }

    #[tokio::test]
    async fn test_resolve_failure() {
        let plan = ConnectPlan::new(
            &config("", json!({})),
            &params(json!({"time": 1, "udp": 1})),
            DEFAULT_PAYLOAD_SIZE,
        )
        .unwrap();

        let err = plan.resolve("no-such-host.invalid", 5001).await.unwrap_err();
        assert!(matches!(err, ConnectError::Resolve { .. }));
    }

    #[tokio::test]
    async fn test_tcp_connect_refused() {
        // Grab a free port, then close the listener so nothing is accepting.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut cfg = config(&valid_cookie(), json!({}));
        cfg.data_port = port;
        let err = connect_target(&cfg, &params(json!({"time": 1})), DEFAULT_PAYLOAD_SIZE)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::Connect { .. }));
    }
}
