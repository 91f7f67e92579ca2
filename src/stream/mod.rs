//! Transport streams the websocket protocol is applied on top of.

use std::fmt::{Display, Formatter};
use std::io;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::vec;

use socket2::{Domain, Protocol, Socket, Type};
use url::Url;

#[cfg(feature = "rustls")]
pub mod tls;

/// Byte oriented duplex transport. The websocket close handshake must be able
/// to actually close the transport, hence `shutdown` on top of `Read + Write`.
pub trait NetworkStream: Read + Write {
    /// Shuts down both directions of the transport.
    fn shutdown(&mut self) -> io::Result<()>;
}

impl NetworkStream for TcpStream {
    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

/// Host and port a dialer connects to, extracted from the connection url.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    host: String,
    port: u16,
}

impl ToSocketAddrs for ConnectionInfo {
    type Iter = vec::IntoIter<SocketAddr>;

    fn to_socket_addrs(&self) -> io::Result<Self::Iter> {
        format!("{}:{}", self.host, self.port).to_socket_addrs()
    }
}

impl Display for ConnectionInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl TryFrom<&Url> for ConnectionInfo {
    type Error = io::Error;

    fn try_from(url: &Url) -> Result<Self, Self::Error> {
        Ok(ConnectionInfo {
            host: url
                .host_str()
                .ok_or_else(|| io::Error::other("host not present"))?
                .to_owned(),
            port: url
                .port_or_known_default()
                .ok_or_else(|| io::Error::other("port not present"))?,
        })
    }
}

impl ConnectionInfo {
    pub fn new(host: impl AsRef<str>, port: u16) -> Self {
        Self {
            host: host.as_ref().to_string(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolves the address and performs a blocking connect, with nodelay and
    /// keepalive enabled on the socket.
    pub fn into_tcp_stream(self) -> io::Result<TcpStream> {
        let socket_addr = self
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::other("unable to resolve socket address"))?;

        let socket = Socket::new(
            match &socket_addr {
                SocketAddr::V4(_) => Domain::IPV4,
                SocketAddr::V6(_) => Domain::IPV6,
            },
            Type::STREAM,
            Some(Protocol::TCP),
        )?;
        socket.set_nodelay(true)?;
        socket.set_keepalive(true)?;
        socket.connect(&socket_addr.into())?;
        Ok(socket.into())
    }
}

/// Stream that is either plain TCP or TLS, selected by the url scheme at dial
/// time.
pub enum TlsReadyStream<S> {
    Plain(S),
    #[cfg(feature = "rustls")]
    Tls(tls::TlsStream<S>),
}

impl<S: Read + Write> Read for TlsReadyStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            TlsReadyStream::Plain(stream) => stream.read(buf),
            #[cfg(feature = "rustls")]
            TlsReadyStream::Tls(stream) => stream.read(buf),
        }
    }
}

impl<S: Read + Write> Write for TlsReadyStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            TlsReadyStream::Plain(stream) => stream.write(buf),
            #[cfg(feature = "rustls")]
            TlsReadyStream::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            TlsReadyStream::Plain(stream) => stream.flush(),
            #[cfg(feature = "rustls")]
            TlsReadyStream::Tls(stream) => stream.flush(),
        }
    }
}

impl<S: NetworkStream> NetworkStream for TlsReadyStream<S> {
    fn shutdown(&mut self) -> io::Result<()> {
        match self {
            TlsReadyStream::Plain(stream) => stream.shutdown(),
            #[cfg(feature = "rustls")]
            TlsReadyStream::Tls(stream) => stream.shutdown(),
        }
    }
}
