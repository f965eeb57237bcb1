//! Daemon endpoints and connection setup.

use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::Connection;

/// Where the daemon listens.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Endpoint {
    /// Unix-domain stream socket.
    Unix(PathBuf),
    /// TCP socket.
    Tcp {
        /// Host name or address.
        host: String,
        /// Port number.
        port: u16,
    },
}

impl Endpoint {
    /// Unix-domain socket at `path`.
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self::Unix(path.into())
    }

    /// TCP socket at `host:port`.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// TCP socket on the loopback interface, the daemon's default bind address.
    pub fn loopback(port: u16) -> Self {
        Self::tcp(Ipv4Addr::LOCALHOST.to_string(), port)
    }

    /// Returns `true` for Unix-domain endpoints.
    pub const fn is_unix(&self) -> bool {
        matches!(self, Self::Unix(_))
    }

    /// Resolves a TCP endpoint to socket addresses.
    fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|_| Error::Unresolvable {
                host: host.to_owned(),
            })?
            .collect();
        if addrs.is_empty() {
            return Err(Error::Unresolvable {
                host: host.to_owned(),
            });
        }
        Ok(addrs)
    }

    /// Returns `true` if the daemon runs on another host.
    ///
    /// A TCP address is local when a socket can be bound to it. Remote
    /// daemons cannot open client paths, so file contents must be uploaded.
    pub fn is_remote(&self) -> Result<bool> {
        match self {
            Self::Unix(_) => Ok(false),
            Self::Tcp { host, port } => {
                let addr = Self::resolve(host, *port)?[0];
                let local = TcpListener::bind((addr.ip(), 0)).is_ok();
                debug!(%addr, local, "checked daemon locality");
                Ok(!local)
            }
        }
    }

    /// Opens a new stream connection to the daemon.
    pub fn connect(&self) -> Result<Connection> {
        let connect_err = |source| Error::Connect {
            endpoint: self.clone(),
            source,
        };
        match self {
            #[cfg(unix)]
            Self::Unix(path) => {
                let stream = UnixStream::connect(path).map_err(connect_err)?;
                Ok(Connection::unix(stream, self.clone()))
            }
            #[cfg(not(unix))]
            Self::Unix(_) => Err(connect_err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "unix sockets are not available on this platform",
            ))),
            Self::Tcp { host, port } => {
                let addrs = Self::resolve(host, *port)?;
                let stream = TcpStream::connect(&addrs[..]).map_err(connect_err)?;
                Ok(Connection::tcp(stream, self.clone()))
            }
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Tcp { host, port } if host.contains(':') => write!(f, "[{host}]:{port}"),
            Self::Tcp { host, port } => write!(f, "{host}:{port}"),
        }
    }
}

impl std::str::FromStr for Endpoint {
    type Err = String;

    /// Parses `unix:<path>`, a bare absolute path, `<host>:<port>` or
    /// `[<ipv6>]:<port>`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("unix:") {
            return Ok(Self::unix(path));
        }
        if s.starts_with('/') {
            return Ok(Self::unix(s));
        }
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("expected HOST:PORT, got {s:?}"))?;
        let port: u16 = port
            .parse()
            .map_err(|_| format!("invalid port in {s:?}"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Ok(Self::loopback(port));
        }
        Ok(Self::tcp(host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_endpoint_spellings() {
        assert_eq!(
            "unix:/run/scand.sock".parse::<Endpoint>().unwrap(),
            Endpoint::unix("/run/scand.sock")
        );
        assert_eq!(
            "/run/scand.sock".parse::<Endpoint>().unwrap(),
            Endpoint::unix("/run/scand.sock")
        );
        assert_eq!(
            "scan.example.org:3310".parse::<Endpoint>().unwrap(),
            Endpoint::tcp("scan.example.org", 3310)
        );
        assert_eq!(
            "[::1]:3310".parse::<Endpoint>().unwrap(),
            Endpoint::tcp("::1", 3310)
        );
        assert_eq!(":3310".parse::<Endpoint>().unwrap(), Endpoint::loopback(3310));
        assert!("localhost".parse::<Endpoint>().is_err());
        assert!("localhost:http".parse::<Endpoint>().is_err());
    }

    #[test]
    fn display_round_trips() {
        for s in ["unix:/run/scand.sock", "127.0.0.1:3310", "[::1]:3310"] {
            assert_eq!(s.parse::<Endpoint>().unwrap().to_string(), s);
        }
    }

    #[test]
    fn loopback_and_unix_are_local() {
        assert!(!Endpoint::unix("/nonexistent.sock").is_remote().unwrap());
        assert!(!Endpoint::loopback(3310).is_remote().unwrap());
    }

    #[test]
    fn connect_failure_names_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::unix(dir.path().join("missing.sock"));
        let err = endpoint.connect().unwrap_err();
        assert!(matches!(err, Error::Connect { .. }));
        assert!(err.to_string().contains("missing.sock"));
    }
}
