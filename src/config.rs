//! Server configuration.
//!
//! [`ServerConfig`] is a plain snapshot: the server copies what it needs when
//! it starts and never looks back. Build one in code with the setters, or load
//! it from TOML:
//!
//! ```toml
//! addr = ":8080"
//! read_header_timeout_ms = 5000
//! write_timeout_ms = 30000
//! idle_timeout_ms = 60000
//! max_header_bytes = 65536
//!
//! [tls]
//! cert_path = "/etc/ssl/service.pem"
//! key_path = "/etc/ssl/service.key"
//! ```
//!
//! Every duration is in milliseconds; `0` means "no timeout" or, where noted,
//! "inherit from `read_timeout_ms`".

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use http::Extensions;
use serde::{Deserialize, Serialize};

/// Header budget applied when `max_header_bytes` is `0`.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 1 << 20;

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Lifecycle of one client connection, reported through
/// [`ServerConfig::on_conn_state`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnState {
    /// Accepted; no request seen yet.
    New,
    /// At least one request is being handled.
    Active,
    /// Between requests on a kept-alive connection. Reported after the last
    /// response body has been handed to the transport.
    Idle,
    /// Closed. Reported exactly once per connection.
    Closed,
}

/// Callback invoked on every [`ConnState`] transition.
pub type ConnStateHook = Arc<dyn Fn(SocketAddr, ConnState) + Send + Sync>;

/// Callback run once per accepted connection. Whatever it inserts is copied
/// into the extensions of every request served on that connection.
pub type ConnContextHook = Arc<dyn Fn(SocketAddr, &mut Extensions) + Send + Sync>;

/// TLS material. Either PEM files on disk or a ready-made rustls config.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct TlsConfig {
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,

    /// Takes precedence over the PEM paths when set.
    #[serde(skip)]
    pub server_config: Option<Arc<rustls::ServerConfig>>,
}

impl TlsConfig {
    pub fn from_pem(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: Some(cert_path.into()),
            key_path: Some(key_path.into()),
            server_config: None,
        }
    }

    pub fn from_rustls(config: Arc<rustls::ServerConfig>) -> Self {
        Self { server_config: Some(config), ..Self::default() }
    }
}

/// Parameters for running a [`Server`](crate::Server).
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// `host:port` to listen on. `":8080"` binds every interface; empty
    /// means port 80 on every interface.
    pub addr: String,

    /// Maximum time to read one request body.
    #[serde(rename = "read_timeout_ms", with = "duration_ms")]
    pub read_timeout: Duration,

    /// Time allowed to read request headers. `0` inherits `read_timeout`.
    #[serde(rename = "read_header_timeout_ms", with = "duration_ms")]
    pub read_header_timeout: Duration,

    /// Maximum time to produce one response.
    #[serde(rename = "write_timeout_ms", with = "duration_ms")]
    pub write_timeout: Duration,

    /// How long a kept-alive connection may wait for its next request. `0`
    /// inherits `read_timeout`.
    #[serde(rename = "idle_timeout_ms", with = "duration_ms")]
    pub idle_timeout: Duration,

    /// Limit on the request line plus headers. `0` means
    /// [`DEFAULT_MAX_HEADER_BYTES`].
    pub max_header_bytes: usize,

    pub tls: Option<TlsConfig>,

    #[serde(skip)]
    pub conn_state: Option<ConnStateHook>,

    #[serde(skip)]
    pub conn_context: Option<ConnContextHook>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: String::new(),
            read_timeout: Duration::ZERO,
            read_header_timeout: Duration::ZERO,
            write_timeout: Duration::ZERO,
            idle_timeout: Duration::ZERO,
            max_header_bytes: 0,
            tls: None,
            conn_state: None,
            conn_context: None,
        }
    }
}

impl ServerConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into(), ..Self::default() }
    }

    /// Parses a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn read_header_timeout(mut self, timeout: Duration) -> Self {
        self.read_header_timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn max_header_bytes(mut self, bytes: usize) -> Self {
        self.max_header_bytes = bytes;
        self
    }

    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn on_conn_state(
        mut self,
        hook: impl Fn(SocketAddr, ConnState) + Send + Sync + 'static,
    ) -> Self {
        self.conn_state = Some(Arc::new(hook));
        self
    }

    /// Seeds per-connection request extensions, e.g. a connection id or the
    /// peer's TLS identity.
    pub fn on_connect(
        mut self,
        hook: impl Fn(SocketAddr, &mut Extensions) + Send + Sync + 'static,
    ) -> Self {
        self.conn_context = Some(Arc::new(hook));
        self
    }

    /// The address to hand to the socket layer.
    pub(crate) fn bind_addr(&self) -> String {
        match self.addr.as_str() {
            "" => "0.0.0.0:80".to_owned(),
            addr if addr.starts_with(':') => format!("0.0.0.0{addr}"),
            addr => addr.to_owned(),
        }
    }

    pub(crate) fn effective_read_timeout(&self) -> Option<Duration> {
        non_zero(self.read_timeout)
    }

    pub(crate) fn effective_header_timeout(&self) -> Option<Duration> {
        non_zero(self.read_header_timeout).or_else(|| non_zero(self.read_timeout))
    }

    pub(crate) fn effective_write_timeout(&self) -> Option<Duration> {
        non_zero(self.write_timeout)
    }

    pub(crate) fn effective_idle_timeout(&self) -> Option<Duration> {
        non_zero(self.idle_timeout).or_else(|| non_zero(self.read_timeout))
    }

    pub(crate) fn effective_max_header_bytes(&self) -> usize {
        match self.max_header_bytes {
            0 => DEFAULT_MAX_HEADER_BYTES,
            n => n,
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("addr", &self.addr)
            .field("read_timeout", &self.read_timeout)
            .field("read_header_timeout", &self.read_header_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_header_bytes", &self.max_header_bytes)
            .field("tls", &self.tls.is_some())
            .field("conn_state", &self.conn_state.is_some())
            .field("conn_context", &self.conn_context.is_some())
            .finish()
    }
}

fn non_zero(d: Duration) -> Option<Duration> {
    (!d.is_zero()).then_some(d)
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_toml_with_defaults() {
        let config = ServerConfig::from_toml_str(
            r#"
                addr = ":8080"
                read_timeout_ms = 2000
                write_timeout_ms = 500

                [tls]
                cert_path = "cert.pem"
                key_path = "key.pem"
            "#,
        )
        .unwrap();

        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.read_timeout, Duration::from_secs(2));
        assert_eq!(config.write_timeout, Duration::from_millis(500));
        assert_eq!(config.max_header_bytes, 0);
        let tls = config.tls.unwrap();
        assert_eq!(tls.cert_path.as_deref(), Some(Path::new("cert.pem")));
        assert!(tls.server_config.is_none());
    }

    #[test]
    fn rejects_unknown_types() {
        assert!(matches!(
            ServerConfig::from_toml_str("read_timeout_ms = \"soon\""),
            Err(ConfigError::Parse(_)),
        ));
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = ServerConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }

    #[test]
    fn zero_timeouts_inherit_read_timeout() {
        let config = ServerConfig::new("127.0.0.1:0").read_timeout(Duration::from_secs(3));
        assert_eq!(config.effective_header_timeout(), Some(Duration::from_secs(3)));
        assert_eq!(config.effective_idle_timeout(), Some(Duration::from_secs(3)));
        assert_eq!(config.effective_write_timeout(), None);

        let config = config
            .read_header_timeout(Duration::from_secs(1))
            .idle_timeout(Duration::from_secs(9));
        assert_eq!(config.effective_header_timeout(), Some(Duration::from_secs(1)));
        assert_eq!(config.effective_idle_timeout(), Some(Duration::from_secs(9)));
    }

    #[test]
    fn no_timeouts_by_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:80");
        assert_eq!(config.effective_read_timeout(), None);
        assert_eq!(config.effective_header_timeout(), None);
        assert_eq!(config.effective_idle_timeout(), None);
        assert_eq!(config.effective_max_header_bytes(), DEFAULT_MAX_HEADER_BYTES);
    }
}
