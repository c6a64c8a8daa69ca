use crate::dns::cname::Depth;
use crate::dns::tsig::{KeyAlgorithm, TsigKey};
use crate::error::Error;
use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr, DurationSeconds};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub type Shared = Arc<Config>;

pub const DEFAULT_PORT: u16 = 53;

#[serde_as]
#[derive(Deserialize, Clone)]
pub struct Config {
    #[serde_as(as = "DisplayFromStr")]
    pub server: ServerEndpoint,
    pub key_name: String,
    pub key_secret: String,
    #[serde_as(as = "DisplayFromStr")]
    #[serde(default)]
    pub key_algorithm: KeyAlgorithm,
    #[serde(default)]
    pub follow: bool,
    #[serde(default)]
    pub depth: Depth,
    #[serde(default)]
    pub sign_query: bool,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_timeout")]
    pub timeout: Duration,
    #[serde(default = "default_ttl")]
    pub ttl: u32,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_propagation")]
    pub propagation_seconds: Duration,
}

fn default_timeout() -> Duration {
    Duration::from_secs(45)
}

fn default_ttl() -> u32 {
    120
}

fn default_propagation() -> Duration {
    Duration::from_secs(60)
}

// The secret is redacted. Everything holding a Config may be debug-logged.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("server", &self.server)
            .field("key_name", &self.key_name)
            .field("key_secret", &"<redacted>")
            .field("key_algorithm", &self.key_algorithm)
            .field("follow", &self.follow)
            .field("depth", &self.depth)
            .field("sign_query", &self.sign_query)
            .field("timeout", &self.timeout)
            .field("ttl", &self.ttl)
            .field("propagation_seconds", &self.propagation_seconds)
            .finish()
    }
}

impl Config {
    pub fn try_from_file(p: impl AsRef<Path>) -> Result<Self, Error> {
        let f = File::open(p)?;
        let reader = BufReader::new(f);
        let conf: Config = serde_json::from_reader(reader)?;
        conf.tsig_key()?;
        Ok(conf)
    }

    /// The configured TSIG key.
    ///
    /// # Errors
    ///
    /// See [`TsigKey::new`].
    pub fn tsig_key(&self) -> Result<TsigKey, Error> {
        TsigKey::new(&self.key_name, &self.key_secret, self.key_algorithm)
    }
}

/// The DNS server updates and lookups are sent to. The host is resolved at the start of every
/// operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    pub host: String,
    pub port: u16,
}

impl ServerEndpoint {
    /// Resolve the endpoint to a socket address, preferring the first address returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServerLookup`] if the host doesn't resolve.
    pub async fn resolve(&self) -> Result<SocketAddr, Error> {
        if let Ok(ip) = self.host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|_| Error::ServerLookup(self.host.clone()))?
            .next()
            .ok_or_else(|| Error::ServerLookup(self.host.clone()))
    }
}

impl FromStr for ServerEndpoint {
    type Err = Error;

    /// Parses `host`, `host:port`, a bare IPv6 address, or `[v6addr]:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidServer(s.to_string());
        let s = s.trim();

        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(ServerEndpoint {
                host: addr.ip().to_string(),
                port: addr.port(),
            });
        }
        if let Ok(ip) = s.parse::<IpAddr>() {
            return Ok(ServerEndpoint {
                host: ip.to_string(),
                port: DEFAULT_PORT,
            });
        }

        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
            None => (s, DEFAULT_PORT),
        };
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() || host.contains(|c: char| c.is_whitespace() || c == ':') {
            return Err(invalid());
        }
        Ok(ServerEndpoint {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
