//! TSIG-signed dynamic updates ([RFC-2136][RFC-2136]).
//!
//! [RFC-2136]: https://www.rfc-editor.org/rfc/rfc2136

use crate::dns::transport::Transport;
use crate::dns::tsig::TsigKey;
use crate::error::Error;
use tracing::debug;
use trust_dns_client::op::{Message, MessageType, OpCode, Query, ResponseCode};
use trust_dns_client::rr::{DNSClass, LowerName, Name, Record, RecordType};

/// What an update does to its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Add the record, without prerequisites.
    Add,
    /// Delete every record of the record's name and type. Deleting nothing is not an error.
    Delete,
}

/// Apply `op` for `record` in `zone`, signed with `key`.
///
/// # Errors
///
/// Returns [`Error::Auth`] when the server rejects the signature, [`Error::Update`] when it
/// rejects the update for any other reason, or any transport error.
pub async fn apply(
    transport: &Transport,
    op: Operation,
    zone: &LowerName,
    record: &Record,
    key: &TsigKey,
) -> Result<(), Error> {
    let message = build_update(op, zone, record);
    let response = transport.send_signed(message, key).await?;
    match response.response_code() {
        ResponseCode::NoError => {
            debug!(
                "applied {op:?} of {} {} in zone {zone}",
                record.record_type(),
                record.name()
            );
            Ok(())
        }
        ResponseCode::NotAuth => Err(Error::Auth { zone: zone.clone() }),
        rcode => Err(Error::Update {
            zone: zone.clone(),
            rcode,
        }),
    }
}

/// Build the unsigned update message for `op`.
///
/// The zone section names `zone`'s SOA. The update section holds a single RR: `record`
/// itself for [`Operation::Add`], or a class ANY, TTL 0, empty RR of the same name and type
/// for [`Operation::Delete`].
pub(crate) fn build_update(op: Operation, zone: &LowerName, record: &Record) -> Message {
    let mut zone_query = Query::query(zone.into(), RecordType::SOA);
    zone_query.set_query_class(DNSClass::IN);

    let update = match op {
        Operation::Add => {
            let mut add = record.clone();
            add.set_dns_class(DNSClass::IN);
            add
        }
        Operation::Delete => {
            let name: Name = record.name().clone();
            let mut delete = Record::with(name, record.record_type(), 0);
            delete.set_dns_class(DNSClass::ANY);
            delete
        }
    };

    let mut message = Message::new();
    message
        .set_id(rand::random::<u16>())
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Update)
        .add_query(zone_query)
        .add_name_server(update);
    message
}
