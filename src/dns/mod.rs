//! DNS client plumbing for [RFC-2136][RFC-2136] challenge updates.
//!
//! Each challenge operation runs these pieces top to bottom, once, against the single
//! configured server:
//!
//! 1. [`cname::resolve`] follows any CNAMEs from the challenge name to the name the TXT
//!    record must actually be written at.
//! 2. [`zone::find_zone`] walks up from that name with SOA queries until it hits the apex of
//!    the zone that owns it.
//! 3. [`update::apply`] sends a [TSIG][tsig] signed add or delete for the TXT record to that
//!    zone.
//!
//! All three talk to the server through a [`transport::Transport`], which makes exactly one
//! attempt per message (UDP first, TCP if the answer was truncated).
//!
//! # Example
//!
//! Given this data on the configured server:
//!
//! ```text
//! example.com.                          SOA    ns1.example.com. ...
//! _acme-challenge.example.com.          CNAME  example.com.acme.example.net.
//! acme.example.net.                     SOA    ns1.example.net. ...
//! ```
//!
//! resolving `_acme-challenge.example.com.` with following enabled yields the effective name
//! `example.com.acme.example.net.` in zone `acme.example.net.`, and the challenge TXT record
//! is added there.
//!
//! [RFC-2136]: https://www.rfc-editor.org/rfc/rfc2136

pub mod cname;
pub mod transport;
pub mod tsig;
pub mod update;
pub mod zone;

pub use cname::{resolve, Chain, Depth, ResolutionResult};
pub use transport::Transport;
pub use tsig::{KeyAlgorithm, TsigKey};
pub use update::Operation;
pub use zone::find_zone;
