//! Zone apex discovery.
//!
//! Only a server authoritative for a zone answers an SOA query for the zone apex with SOA
//! data and the Authoritative Answer flag, so walking up from a name and asking about each
//! suffix in turn finds the zone that owns it.

use crate::dns::transport::Transport;
use crate::error::Error;
use tracing::debug;
use trust_dns_client::op::{Message, ResponseCode};
use trust_dns_client::rr::{LowerName, Name, RecordType};

/// Find the apex of the zone on the transport's server that owns `name`.
///
/// # Errors
///
/// Returns [`Error::ZoneNotFound`] if no suffix of `name` (short of the root) is a zone apex
/// on the server, or any transport error raised while asking.
pub async fn find_zone(transport: &Transport, name: &LowerName) -> Result<LowerName, Error> {
    let candidates = candidates(name);
    for candidate in &candidates {
        let response = transport.query(&candidate.into(), RecordType::SOA).await?;
        if is_apex(&response, candidate) {
            debug!("received authoritative SOA response for {candidate}");
            return Ok(candidate.clone());
        }
        debug!("no authoritative SOA record found for {candidate}");
    }
    Err(Error::ZoneNotFound {
        name: name.clone(),
        tried: candidates,
    })
}

/// `name` followed by each of its parents, stopping before the root.
pub(crate) fn candidates(name: &LowerName) -> Vec<LowerName> {
    let mut guesses = Vec::new();
    let mut current: Name = name.into();
    current.set_fqdn(true);
    while current.num_labels() > 0 {
        guesses.push(LowerName::from(&current));
        current = current.base_name();
    }
    guesses
}

fn is_apex(response: &Message, candidate: &LowerName) -> bool {
    response.response_code() == ResponseCode::NoError
        && response.authoritative()
        && response.answers().iter().any(|record| {
            record.record_type() == RecordType::SOA && LowerName::from(record.name()) == *candidate
        })
}
