//! CNAME chain following.
//!
//! A zone operator without an update API for their own zone can delegate the challenge name
//! with a CNAME, e.g.
//!
//! ```text
//! _acme-challenge.example.com.  CNAME  example.com.acme.example.net.
//! ```
//!
//! With following enabled, the TXT record is then written at
//! `example.com.acme.example.net.` in whichever zone owns it. Every hop is looked up on the
//! one configured server; no recursive resolution is performed.

use crate::dns::transport::Transport;
use crate::dns::zone::find_zone;
use crate::error::Error;
use serde::Deserialize;
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use tracing::debug;
use trust_dns_client::op::{Message, ResponseCode};
use trust_dns_client::rr::{LowerName, RData, RecordType};

/// Hop ceiling for [`Depth::Auto`]: the most labels a domain name can have.
pub const AUTO_DEPTH_CEILING: usize = 127;

/// How many CNAME hops to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawDepth")]
pub enum Depth {
    /// Fail with [`Error::DepthExceeded`] rather than follow more than this many hops.
    Hops(NonZeroU32),
    /// Follow until the chain ends or loops.
    Auto,
}

impl Default for Depth {
    fn default() -> Self {
        Depth::Hops(NonZeroU32::MIN)
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Depth::Hops(hops) => write!(f, "{hops}"),
            Depth::Auto => f.write_str("auto"),
        }
    }
}

impl FromStr for Depth {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            return Ok(Depth::Auto);
        }
        s.trim()
            .parse::<NonZeroU32>()
            .map(Depth::Hops)
            .map_err(|_| Error::InvalidDepth(s.to_string()))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDepth {
    Hops(i64),
    Text(String),
}

impl TryFrom<RawDepth> for Depth {
    type Error = Error;

    fn try_from(raw: RawDepth) -> Result<Self, Self::Error> {
        match raw {
            RawDepth::Hops(hops) => u32::try_from(hops)
                .ok()
                .and_then(NonZeroU32::new)
                .map(Depth::Hops)
                .ok_or_else(|| Error::InvalidDepth(hops.to_string())),
            RawDepth::Text(text) => text.parse(),
        }
    }
}

/// The names visited while following CNAMEs, in traversal order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chain(Vec<LowerName>);

impl Chain {
    #[must_use]
    pub fn names(&self) -> &[LowerName] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn contains(&self, name: &LowerName) -> bool {
        self.0.contains(name)
    }

    /// This chain with `name` appended, for error reporting.
    fn ending_at(&self, name: &LowerName) -> Chain {
        let mut names = self.0.clone();
        names.push(name.clone());
        Chain(names)
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, name) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{name}")?;
        }
        Ok(())
    }
}

/// Where a challenge record has to be written.
///
/// `zone` is always `effective_name` or one of its parents, and `chain` never repeats a
/// name. Each publish or remove builds its own result; nothing is cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionResult {
    zone: LowerName,
    effective_name: LowerName,
    chain: Chain,
}

impl ResolutionResult {
    /// The apex of the zone owning [`ResolutionResult::effective_name`].
    #[must_use]
    pub fn zone(&self) -> &LowerName {
        &self.zone
    }

    /// The end of the chain, the name that has no further CNAME.
    #[must_use]
    pub fn effective_name(&self) -> &LowerName {
        &self.effective_name
    }

    /// Every name visited, starting with the requested one and ending with
    /// [`ResolutionResult::effective_name`].
    #[must_use]
    pub fn chain(&self) -> &Chain {
        &self.chain
    }
}

impl fmt::Display for ResolutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in zone {}", self.chain, self.zone)
    }
}

/// Work out where the record for `name` lives.
///
/// With `follow` unset `name` itself is the effective name. Otherwise CNAMEs are followed
/// from `name` according to `depth`. Either way the owning zone is then found for the
/// effective name.
///
/// # Errors
///
/// Returns [`Error::Loop`] for a CNAME cycle (or an `auto` chain past
/// [`AUTO_DEPTH_CEILING`]), [`Error::DepthExceeded`] for a chain longer than a fixed depth,
/// [`Error::NotAuthoritative`] if the server won't answer for a hop, [`Error::ZoneNotFound`]
/// if the effective name has no zone on the server, or any transport error.
pub async fn resolve(
    transport: &Transport,
    name: &LowerName,
    follow: bool,
    depth: Depth,
) -> Result<ResolutionResult, Error> {
    let chain = if follow {
        follow_chain(transport, name, depth).await?
    } else {
        Chain(vec![name.clone()])
    };

    // The chain always holds at least the starting name.
    let effective_name = chain.0.last().cloned().unwrap_or_else(|| name.clone());
    let zone = find_zone(transport, &effective_name).await?;
    Ok(ResolutionResult {
        zone,
        effective_name,
        chain,
    })
}

async fn follow_chain(
    transport: &Transport,
    name: &LowerName,
    depth: Depth,
) -> Result<Chain, Error> {
    let mut chain = Chain(vec![name.clone()]);
    let mut current = name.clone();

    while let Some(target) = lookup_cname(transport, &current).await? {
        if chain.contains(&target) {
            return Err(Error::Loop {
                chain: chain.ending_at(&target),
            });
        }

        let hops = chain.len() - 1;
        match depth {
            Depth::Hops(max) if hops >= max.get() as usize => {
                return Err(Error::DepthExceeded {
                    depth: max.get(),
                    chain: chain.ending_at(&target),
                });
            }
            Depth::Auto if hops >= AUTO_DEPTH_CEILING => {
                return Err(Error::Loop {
                    chain: chain.ending_at(&target),
                });
            }
            _ => {}
        }

        debug!("following CNAME {current} -> {target}");
        chain.0.push(target.clone());
        current = target;
    }

    debug!("no further CNAME for {current}");
    Ok(chain)
}

async fn lookup_cname(
    transport: &Transport,
    name: &LowerName,
) -> Result<Option<LowerName>, Error> {
    let response = transport.query(&name.into(), RecordType::CNAME).await?;
    match response.response_code() {
        ResponseCode::NoError | ResponseCode::NXDomain => Ok(cname_target(&response, name)),
        rcode @ (ResponseCode::Refused | ResponseCode::NotAuth | ResponseCode::ServFail) => {
            Err(Error::NotAuthoritative {
                name: name.clone(),
                rcode,
            })
        }
        rcode => Err(Error::Protocol {
            server: transport.server(),
            reason: format!("unexpected {rcode} answering CNAME query for {name}"),
        }),
    }
}

fn cname_target(response: &Message, owner: &LowerName) -> Option<LowerName> {
    response
        .answers()
        .iter()
        .filter(|record| LowerName::from(record.name()) == *owner)
        .find_map(|record| match record.data() {
            Some(RData::CNAME(target)) => {
                let mut target = target.clone();
                target.set_fqdn(true);
                Some(LowerName::from(target))
            }
            _ => None,
        })
}
