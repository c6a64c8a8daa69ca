//! CNAME Crab
//!
//! Fulfils [RFC-8555][RFC-8555] [DNS-01] challenges with [RFC-2136][RFC-2136] dynamic updates
//! signed with [TSIG][RFC-8945], against any authoritative server that accepts them (e.g.
//! BIND, Knot or PowerDNS).
//!
//! Optionally follows CNAMEs from `_acme-challenge.<domain>` so the TXT record can be
//! written in a zone you can update, when the zone of the domain being validated has
//! delegated its challenge name there. See [`dns`] for how a challenge name becomes an update.
//!
//! [RFC-8555]: https://www.rfc-editor.org/rfc/rfc8555
//! [DNS-01]: https://www.rfc-editor.org/rfc/rfc8555#section-8.4
//! [RFC-2136]: https://www.rfc-editor.org/rfc/rfc2136
//! [RFC-8945]: https://www.rfc-editor.org/rfc/rfc8945
//!
#![warn(clippy::pedantic)]

pub mod challenge;
pub mod config;
pub mod dns;
pub mod error;

pub use challenge::Authenticator;
pub use config::{Config, ServerEndpoint, Shared};
pub use dns::{Depth, ResolutionResult, TsigKey};
pub use error::Error;
