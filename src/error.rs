//! Error types.

use crate::dns::cname::Chain;
use std::net::SocketAddr;
use trust_dns_client::op::ResponseCode;
use trust_dns_client::rr::LowerName;
use trust_dns_proto::error::ProtoError;

/// Error enumerates the possible CNAME Crab error states.
///
/// None of these are retried internally. A caller wanting to retry a failed
/// [`publish`][crate::challenge::Authenticator::publish] or
/// [`remove`][crate::challenge::Authenticator::remove] runs the whole operation again.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Returned when the configured server did not answer a single query or update attempt
    /// within [`Config::timeout`][crate::config::Config::timeout].
    #[error("timed out waiting for a {protocol} response from {server}")]
    Timeout {
        server: SocketAddr,
        protocol: &'static str,
    },

    /// Returned when a response can't be matched to its request, e.g. because the transaction
    /// ID differs or its TSIG doesn't verify. Stray or spoofed answers are never accepted.
    #[error("protocol error talking to {server}: {reason}")]
    Protocol { server: SocketAddr, reason: String },

    /// Returned when a DNS message can't be encoded, or a response can't be decoded.
    #[error("DNS error")]
    Dns(#[from] ProtoError),

    /// Returned by the [zone finder][crate::dns::zone] when no suffix of the name has an
    /// authoritative SOA record on the configured server.
    #[error("unable to determine the zone for \"{name}\" using names: {}", join(.tried))]
    ZoneNotFound {
        name: LowerName,
        tried: Vec<LowerName>,
    },

    /// Returned when the configured server refuses to answer for a name in the CNAME chain.
    /// Every hop must be served by the one configured server.
    #[error(
        "configured server does not serve \"{name}\" ({rcode}); \
        check the server setting and the CNAME delegation"
    )]
    NotAuthoritative {
        name: LowerName,
        rcode: ResponseCode,
    },

    /// Returned when a CNAME chain revisits a name, or when `auto` depth passes its safety
    /// ceiling.
    #[error("CNAME loop detected: {chain}")]
    Loop { chain: Chain },

    /// Returned when a CNAME chain is longer than the configured fixed depth.
    #[error("reached maximum CNAME depth ({depth}): {chain}")]
    DepthExceeded { depth: u32, chain: Chain },

    /// Returned when the server rejects the TSIG signature on an update. A bad key never
    /// succeeds, so this is fatal.
    #[error("server rejected the TSIG key for an update to zone \"{zone}\"")]
    Auth { zone: LowerName },

    /// Returned when the server rejects an update for any reason other than authentication.
    #[error("server rejected the update to zone \"{zone}\": {rcode}")]
    Update {
        zone: LowerName,
        rcode: ResponseCode,
    },

    /// Returned when the configured server host name doesn't resolve to an address.
    #[error("unable to resolve DNS server \"{0}\"")]
    ServerLookup(String),

    /// Returned when the configured server isn't of the form `host`, `host:port` or
    /// `[v6addr]:port`.
    #[error("invalid DNS server \"{0}\"")]
    InvalidServer(String),

    /// Returned when the configured CNAME depth isn't a positive integer or `auto`.
    #[error("invalid CNAME depth \"{0}\": must be an integer >= 1 or \"auto\"")]
    InvalidDepth(String),

    /// Returned when the configured TSIG algorithm name isn't recognised.
    #[error("unknown TSIG algorithm: {0}")]
    UnknownAlgorithm(String),

    /// Returned when the TSIG key secret isn't valid base64.
    #[error("TSIG key secret is not valid base64")]
    InvalidSecret(#[from] base64::DecodeError),

    /// Returned when a generic IO error occurs.
    #[error("an IO error occurred")]
    IO(#[from] std::io::Error),

    /// Returned when [trying to load a `Config`][crate::config::Config::try_from_file] fails
    /// due to invalid JSON content.
    #[error("invalid JSON")]
    InvalidJSON(#[from] serde_json::Error),
}

fn join(names: &[LowerName]) -> String {
    names
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
