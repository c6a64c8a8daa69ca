//! TSIG keys ([RFC-8945][RFC-8945]) used to authorize dynamic updates.
//!
//! The MAC is computed here rather than by the DNS library, so that every algorithm BIND
//! generates keys for can be used, including the legacy HMAC-MD5 and HMAC-SHA1.
//!
//! [RFC-8945]: https://www.rfc-editor.org/rfc/rfc8945

use crate::error::Error;
use base64::engine::general_purpose;
use base64::Engine;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha224, Sha256, Sha384, Sha512};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use trust_dns_client::op::Message;
use trust_dns_client::rr::{Name, RData, Record};
use trust_dns_proto::error::{ProtoError, ProtoResult};
use trust_dns_proto::op::{MessageFinalizer, MessageVerifier};
use trust_dns_proto::rr::dnssec::rdata::tsig::{
    make_tsig_record, message_tbs, signed_bitmessage_to_buf, TsigAlgorithm, TSIG,
};
use trust_dns_proto::rr::dnssec::rdata::DNSSECRData;

/// Allowed clock skew, in seconds, between us and the server.
const FUDGE_SECS: u16 = 300;

/// The HMAC algorithms a [`TsigKey`] may declare.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAlgorithm {
    #[default]
    HmacMd5,
    HmacSha1,
    HmacSha224,
    HmacSha256,
    HmacSha384,
    HmacSha512,
}

impl KeyAlgorithm {
    fn as_str(self) -> &'static str {
        match self {
            KeyAlgorithm::HmacMd5 => "HMAC-MD5",
            KeyAlgorithm::HmacSha1 => "HMAC-SHA1",
            KeyAlgorithm::HmacSha224 => "HMAC-SHA224",
            KeyAlgorithm::HmacSha256 => "HMAC-SHA256",
            KeyAlgorithm::HmacSha384 => "HMAC-SHA384",
            KeyAlgorithm::HmacSha512 => "HMAC-SHA512",
        }
    }

    /// The algorithm as named on the wire.
    pub(crate) fn tsig_algorithm(self) -> TsigAlgorithm {
        match self {
            KeyAlgorithm::HmacMd5 => TsigAlgorithm::HmacMd5,
            KeyAlgorithm::HmacSha1 => TsigAlgorithm::HmacSha1,
            KeyAlgorithm::HmacSha224 => TsigAlgorithm::HmacSha224,
            KeyAlgorithm::HmacSha256 => TsigAlgorithm::HmacSha256,
            KeyAlgorithm::HmacSha384 => TsigAlgorithm::HmacSha384,
            KeyAlgorithm::HmacSha512 => TsigAlgorithm::HmacSha512,
        }
    }

    fn mac(self, key: &[u8], data: &[u8]) -> ProtoResult<Vec<u8>> {
        match self {
            KeyAlgorithm::HmacMd5 => hmac_sign::<Hmac<Md5>>(key, data),
            KeyAlgorithm::HmacSha1 => hmac_sign::<Hmac<Sha1>>(key, data),
            KeyAlgorithm::HmacSha224 => hmac_sign::<Hmac<Sha224>>(key, data),
            KeyAlgorithm::HmacSha256 => hmac_sign::<Hmac<Sha256>>(key, data),
            KeyAlgorithm::HmacSha384 => hmac_sign::<Hmac<Sha384>>(key, data),
            KeyAlgorithm::HmacSha512 => hmac_sign::<Hmac<Sha512>>(key, data),
        }
    }

    fn verify_mac(self, key: &[u8], data: &[u8], tag: &[u8]) -> ProtoResult<bool> {
        match self {
            KeyAlgorithm::HmacMd5 => hmac_verify::<Hmac<Md5>>(key, data, tag),
            KeyAlgorithm::HmacSha1 => hmac_verify::<Hmac<Sha1>>(key, data, tag),
            KeyAlgorithm::HmacSha224 => hmac_verify::<Hmac<Sha224>>(key, data, tag),
            KeyAlgorithm::HmacSha256 => hmac_verify::<Hmac<Sha256>>(key, data, tag),
            KeyAlgorithm::HmacSha384 => hmac_verify::<Hmac<Sha384>>(key, data, tag),
            KeyAlgorithm::HmacSha512 => hmac_verify::<Hmac<Sha512>>(key, data, tag),
        }
    }
}

fn hmac_sign<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> ProtoResult<Vec<u8>> {
    let mut mac = <M as KeyInit>::new_from_slice(key)
        .map_err(|_| ProtoError::from("invalid TSIG key length"))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn hmac_verify<M: Mac + KeyInit>(key: &[u8], data: &[u8], tag: &[u8]) -> ProtoResult<bool> {
    let mut mac = <M as KeyInit>::new_from_slice(key)
        .map_err(|_| ProtoError::from("invalid TSIG key length"))?;
    mac.update(data);
    // Constant time comparison.
    Ok(mac.verify_slice(tag).is_ok())
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyAlgorithm {
    type Err = Error;

    /// Accepts the BIND spelling in any case, with or without a trailing dot,
    /// e.g. `hmac-sha256` or `HMAC-SHA256.`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().trim_end_matches('.').to_ascii_uppercase();
        match normalized.as_str() {
            "HMAC-MD5" | "HMAC-MD5.SIG-ALG.REG.INT" => Ok(KeyAlgorithm::HmacMd5),
            "HMAC-SHA1" => Ok(KeyAlgorithm::HmacSha1),
            "HMAC-SHA224" => Ok(KeyAlgorithm::HmacSha224),
            "HMAC-SHA256" => Ok(KeyAlgorithm::HmacSha256),
            "HMAC-SHA384" => Ok(KeyAlgorithm::HmacSha384),
            "HMAC-SHA512" => Ok(KeyAlgorithm::HmacSha512),
            _ => Err(Error::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// A shared TSIG secret. Whoever holds one can update the zones the server grants to its
/// name, so the secret never appears in `Debug` or `Display` output, logs or errors.
#[derive(Clone, PartialEq, Eq)]
pub struct TsigKey {
    name: Name,
    secret: Vec<u8>,
    algorithm: KeyAlgorithm,
}

impl TsigKey {
    /// Build a key from its name, base64 secret and algorithm.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSecret`] if the secret isn't base64 and [`Error::Dns`] if the
    /// name isn't a valid domain name.
    pub fn new(name: &str, secret: &str, algorithm: KeyAlgorithm) -> Result<Self, Error> {
        let mut name = Name::from_str(name)?;
        name.set_fqdn(true);
        let secret = general_purpose::STANDARD.decode(secret.trim())?;
        Ok(TsigKey {
            name,
            secret,
            algorithm,
        })
    }

    #[must_use]
    pub fn name(&self) -> &Name {
        &self.name
    }

    #[must_use]
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// Append a TSIG record to `message`, signed at the current time, and return its MAC
    /// for checking the response with [`TsigKey::verify_response`].
    ///
    /// The message must be complete: anything added afterwards isn't covered by the MAC.
    pub(crate) fn sign(&self, message: &mut Message) -> Result<Vec<u8>, Error> {
        message.finalize(self, unix_now())?;
        message
            .signature()
            .last()
            .and_then(tsig_rdata)
            .map(|tsig| tsig.mac().to_vec())
            .ok_or_else(|| ProtoError::from("signed message carries no TSIG record").into())
    }

    /// Check the TSIG record closing the raw `response` to a request signed with
    /// `request_mac`. Returns `false` if it wasn't made with this key.
    pub(crate) fn verify_response(
        &self,
        request_mac: &[u8],
        response: &[u8],
    ) -> Result<bool, Error> {
        let (signed_data, record) = signed_bitmessage_to_buf(Some(request_mac), response, true)?;
        let Some(tsig) = tsig_rdata(&record) else {
            return Ok(false);
        };
        // Names compare case-insensitively; algorithm names arrive lower-cased.
        if record.name() != &self.name
            || tsig.algorithm().to_name() != self.algorithm.tsig_algorithm().to_name()
        {
            return Ok(false);
        }
        Ok(self
            .algorithm
            .verify_mac(&self.secret, &signed_data, tsig.mac())?)
    }

    fn tsig_for(&self, message: &Message, time_signed: u32) -> ProtoResult<TSIG> {
        let unsigned = TSIG::new(
            self.algorithm.tsig_algorithm(),
            u64::from(time_signed),
            FUDGE_SECS,
            Vec::new(),
            message.id(),
            0,
            Vec::new(),
        );
        let signed_data = message_tbs(None, message, &unsigned, &self.name)?;
        let mac = self.algorithm.mac(&self.secret, &signed_data)?;
        Ok(unsigned.set_mac(mac))
    }
}

impl MessageFinalizer for TsigKey {
    fn finalize_message(
        &self,
        message: &Message,
        current_time: u32,
    ) -> ProtoResult<(Vec<Record>, Option<MessageVerifier>)> {
        let tsig = self.tsig_for(message, current_time)?;
        Ok((vec![make_tsig_record(self.name.clone(), tsig)], None))
    }
}

impl fmt::Debug for TsigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TsigKey")
            .field("name", &self.name)
            .field("algorithm", &self.algorithm)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl fmt::Display for TsigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.algorithm)
    }
}

fn tsig_rdata(record: &Record) -> Option<&TSIG> {
    match record.data() {
        Some(RData::DNSSEC(DNSSECRData::TSIG(tsig))) => Some(tsig),
        _ => None,
    }
}

fn unix_now() -> u32 {
    // TSIG carries 48 bit timestamps but finalizers take u32 seconds, good until 2106.
    u32::try_from(OffsetDateTime::now_utc().unix_timestamp()).unwrap_or(u32::MAX)
}
