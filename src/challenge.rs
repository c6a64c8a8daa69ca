//! [DNS-01] challenge fulfillment.
//!
//! [`Authenticator`] is the entry point for ACME clients and hooks: it publishes and removes
//! the TXT record for `_acme-challenge.<domain>`, following CNAME delegation when
//! [`Config::follow`][crate::config::Config::follow] is set.
//!
//! [DNS-01]: https://www.rfc-editor.org/rfc/rfc8555#section-8.4

use crate::config::Shared;
use crate::dns::cname::{self, ResolutionResult};
use crate::dns::transport::Transport;
use crate::dns::tsig::TsigKey;
use crate::dns::update::{self, Operation};
use crate::error::Error;
use lazy_static::lazy_static;
use std::str::FromStr;
use trust_dns_client::rr::rdata::TXT;
use trust_dns_client::rr::{LowerName, Name, RData, Record};

lazy_static! {
    // NB: unwrap is safe: a constant, valid label.
    static ref ACME_CHALLENGE_LABEL: Name = Name::from_ascii("_acme-challenge").unwrap();
}

/// Publishes and removes challenge TXT records with dynamic updates.
///
/// Holds only read-only configuration, so one instance may serve any number of concurrent
/// operations. Every operation resolves its target afresh.
#[derive(Debug, Clone)]
pub struct Authenticator {
    config: Shared,
    key: TsigKey,
}

impl Authenticator {
    /// Build an authenticator from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured TSIG key is invalid, see [`TsigKey::new`].
    pub fn new(config: Shared) -> Result<Self, Error> {
        let key = config.tsig_key()?;
        Ok(Authenticator { config, key })
    }

    /// Add a TXT record holding `value` for the challenge name of `domain`.
    ///
    /// Returns where the record was written.
    ///
    /// # Errors
    ///
    /// Returns an error if resolution fails (see [`cname::resolve`]) or the server rejects
    /// the update (see [`update::apply`]).
    pub async fn publish(&self, domain: &str, value: &str) -> Result<ResolutionResult, Error> {
        let (transport, resolution) = self.prepare(domain).await?;
        let record = self.txt_record(&resolution, value);
        update::apply(
            &transport,
            Operation::Add,
            resolution.zone(),
            &record,
            &self.key,
        )
        .await?;
        tracing::info!("published TXT record at {}", resolution.effective_name());
        Ok(resolution)
    }

    /// Delete the TXT records at the challenge name of `domain`. Succeeds if there were none.
    ///
    /// Returns where the records were removed from.
    ///
    /// # Errors
    ///
    /// See [`Authenticator::publish`].
    pub async fn remove(&self, domain: &str, value: &str) -> Result<ResolutionResult, Error> {
        let (transport, resolution) = self.prepare(domain).await?;
        let record = self.txt_record(&resolution, value);
        update::apply(
            &transport,
            Operation::Delete,
            resolution.zone(),
            &record,
            &self.key,
        )
        .await?;
        tracing::info!("removed TXT records at {}", resolution.effective_name());
        Ok(resolution)
    }

    /// Work out where the challenge record for `domain` lives, without changing anything.
    ///
    /// # Errors
    ///
    /// See [`cname::resolve`].
    pub async fn resolve(&self, domain: &str) -> Result<ResolutionResult, Error> {
        Ok(self.prepare(domain).await?.1)
    }

    async fn prepare(&self, domain: &str) -> Result<(Transport, ResolutionResult), Error> {
        let server = self.config.server.resolve().await?;
        let mut transport = Transport::new(server, self.config.timeout);
        if self.config.sign_query {
            transport = transport.with_query_key(self.key.clone());
        }

        let validation_name = validation_name(domain)?;
        tracing::debug!("resolving {validation_name} against {server}");
        let resolution = cname::resolve(
            &transport,
            &validation_name,
            self.config.follow,
            self.config.depth,
        )
        .await?;
        tracing::debug!("resolved {resolution}");
        Ok((transport, resolution))
    }

    fn txt_record(&self, resolution: &ResolutionResult, value: &str) -> Record {
        Record::from_rdata(
            resolution.effective_name().into(),
            self.config.ttl,
            RData::TXT(TXT::new(vec![value.to_string()])),
        )
    }
}

/// The fully qualified `_acme-challenge` name for `domain`. A wildcard domain shares the
/// challenge name of its base domain.
///
/// # Errors
///
/// Returns [`Error::Dns`] if `domain` isn't a valid domain name.
pub fn validation_name(domain: &str) -> Result<LowerName, Error> {
    let domain = domain.trim().trim_start_matches("*.");
    let mut domain = Name::from_str(domain)?;
    domain.set_fqdn(true);
    let name = ACME_CHALLENGE_LABEL.clone().append_domain(&domain)?;
    Ok(LowerName::from(name))
}
