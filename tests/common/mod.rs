//! An in-process authoritative server for integration tests.
//!
//! Serves SOA, CNAME and TXT data for a set of zones over UDP and TCP on one localhost port,
//! and applies dynamic updates to its TXT data. TSIG signatures on requests are checked
//! against the server's own copy of the key, and answers to signed requests are signed.

#![allow(dead_code)]

use base64::engine::general_purpose;
use base64::Engine;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::RwLock;
use trust_dns_client::op::{Message, MessageType, OpCode, ResponseCode};
use trust_dns_client::rr::rdata::{SOA, TXT};
use trust_dns_client::rr::{DNSClass, LowerName, Name, RData, Record, RecordType};
use trust_dns_proto::rr::dnssec::rdata::tsig::{
    make_tsig_record, signed_bitmessage_to_buf, TsigAlgorithm, TSIG,
};
use trust_dns_proto::rr::dnssec::rdata::DNSSECRData;
use trust_dns_proto::serialize::binary::BinEncoder;

pub const SECRET: &str = "SSB3b25kZXIgd2hvIHdpbGwgYm90aGVyIHRvIGRlY29kZSB0aGlzIHRleHQK";

pub fn name(s: &str) -> Name {
    let mut name = Name::from_str(s).unwrap();
    name.set_fqdn(true);
    name
}

pub fn lower(s: &str) -> LowerName {
    LowerName::from(name(s))
}

pub const KEY_NAME: &str = "a-tsig-key";

/// Zone data and knobs for misbehaving.
#[derive(Debug, Default)]
pub struct Zones {
    apexes: HashSet<LowerName>,
    cnames: HashMap<LowerName, Name>,
    txt: HashMap<LowerName, Vec<String>>,
    key_name: Name,
    secret: Vec<u8>,
    /// Answer updates with this code instead of applying them.
    pub update_rcode: Option<ResponseCode>,
    /// Answer UDP queries with an empty, truncated response.
    pub truncate_udp: bool,
    /// Answer with a different transaction ID.
    pub wrong_id: bool,
    /// Never answer.
    pub silent: bool,
    /// Sign answers with a broken MAC.
    pub corrupt_response_mac: bool,
    pub udp_requests: usize,
    pub tcp_requests: usize,
    /// Queries that carried a valid signature.
    pub signed_queries: usize,
    pub updates: Vec<Message>,
}

/// What a request's TSIG record proved.
enum Signature {
    Unsigned,
    Invalid,
    Valid { algorithm: TsigAlgorithm, mac: Vec<u8> },
}

impl Zones {
    pub fn new() -> Self {
        Zones {
            key_name: name(KEY_NAME),
            secret: general_purpose::STANDARD.decode(SECRET).unwrap(),
            ..Self::default()
        }
    }

    /// Use `secret` (base64) as the server's copy of the key.
    pub fn server_secret(mut self, secret: &str) -> Self {
        self.secret = general_purpose::STANDARD.decode(secret).unwrap();
        self
    }

    pub fn zone(mut self, apex: &str) -> Self {
        self.apexes.insert(lower(apex));
        self
    }

    pub fn cname(mut self, from: &str, to: &str) -> Self {
        self.cnames.insert(lower(from), name(to));
        self
    }

    pub fn txt(mut self, owner: &str, value: &str) -> Self {
        self.txt
            .entry(lower(owner))
            .or_default()
            .push(value.to_string());
        self
    }

    pub fn txt_values(&self, owner: &str) -> Vec<String> {
        self.txt.get(&lower(owner)).cloned().unwrap_or_default()
    }

    fn zone_of(&self, owner: &LowerName) -> Option<&LowerName> {
        self.apexes.iter().find(|apex| apex.zone_of(owner))
    }

    fn handle(&mut self, request: &[u8], udp: bool) -> Option<Vec<u8>> {
        if udp {
            self.udp_requests += 1;
        } else {
            self.tcp_requests += 1;
        }
        if self.silent {
            return None;
        }

        let request_message = Message::from_vec(request).ok()?;
        let signature = if request_message.signature().is_empty() {
            Signature::Unsigned
        } else {
            self.check_signature(request)
        };

        let mut response = Message::new();
        response
            .set_id(request_message.id())
            .set_message_type(MessageType::Response)
            .set_op_code(request_message.op_code())
            .add_queries(request_message.queries().to_vec());

        match (request_message.op_code(), &signature) {
            (_, Signature::Invalid) => {
                response.set_response_code(ResponseCode::NotAuth);
            }
            (OpCode::Update, Signature::Unsigned) => {
                response.set_response_code(ResponseCode::Refused);
            }
            (OpCode::Update, Signature::Valid { .. }) => {
                self.handle_update(&request_message, &mut response);
            }
            (OpCode::Query, _) => {
                if matches!(signature, Signature::Valid { .. }) {
                    self.signed_queries += 1;
                }
                self.handle_query(&request_message, &mut response);
            }
            _ => {
                response.set_response_code(ResponseCode::NotImp);
            }
        }

        if udp && self.truncate_udp {
            response.take_answers();
            response.set_truncated(true);
        }
        if self.wrong_id {
            response.set_id(request_message.id().wrapping_add(1));
        }
        if let Signature::Valid { algorithm, mac } = signature {
            self.sign_response(&mut response, algorithm, &mac)?;
        }
        response.to_vec().ok()
    }

    fn check_signature(&self, raw: &[u8]) -> Signature {
        let Ok((signed_data, record)) = signed_bitmessage_to_buf(None, raw, true) else {
            return Signature::Invalid;
        };
        let Some(RData::DNSSEC(DNSSECRData::TSIG(tsig))) = record.data() else {
            return Signature::Invalid;
        };
        if record.name() != &self.key_name {
            return Signature::Invalid;
        }
        match tsig_mac(tsig.algorithm(), &self.secret, &signed_data) {
            Some(expected) if expected == tsig.mac() => Signature::Valid {
                algorithm: tsig.algorithm().clone(),
                mac: tsig.mac().to_vec(),
            },
            _ => Signature::Invalid,
        }
    }

    /// RFC 8945 4.3.1: the response MAC covers the request MAC, the unsigned response and
    /// the TSIG variables.
    fn sign_response(
        &self,
        response: &mut Message,
        algorithm: TsigAlgorithm,
        request_mac: &[u8],
    ) -> Option<()> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
        let unsigned = TSIG::new(algorithm, now, 300, Vec::new(), response.id(), 0, Vec::new());

        let mut signed_data = Vec::new();
        signed_data.extend_from_slice(&u16::try_from(request_mac.len()).ok()?.to_be_bytes());
        signed_data.extend_from_slice(request_mac);
        signed_data.extend_from_slice(&response.to_vec().ok()?);
        let mut variables = Vec::new();
        unsigned
            .emit_tsig_for_mac(&mut BinEncoder::new(&mut variables), &self.key_name)
            .ok()?;
        signed_data.extend_from_slice(&variables);

        let mut mac = tsig_mac(unsigned.algorithm(), &self.secret, &signed_data)?;
        if self.corrupt_response_mac {
            mac[0] ^= 0xff;
        }
        response.add_tsig(make_tsig_record(self.key_name.clone(), unsigned.set_mac(mac)));
        Some(())
    }

    fn handle_query(&self, request: &Message, response: &mut Message) {
        let Some(query) = request.queries().first() else {
            response.set_response_code(ResponseCode::FormErr);
            return;
        };
        let owner = LowerName::from(query.name());
        let Some(apex) = self.zone_of(&owner) else {
            response.set_response_code(ResponseCode::Refused);
            return;
        };
        response.set_authoritative(true);

        let owner_name: Name = query.name().clone();
        match query.query_type() {
            RecordType::SOA if owner == *apex => {
                let soa = SOA::new(
                    name("ns1.example.com."),
                    name("dns-admin.example.com."),
                    20_230_312,
                    86_400,
                    7_200,
                    3_600_000,
                    172_800,
                );
                response.add_answer(Record::from_rdata(owner_name, 3600, RData::SOA(soa)));
            }
            RecordType::CNAME => {
                if let Some(target) = self.cnames.get(&owner) {
                    response.add_answer(Record::from_rdata(
                        owner_name,
                        300,
                        RData::CNAME(target.clone()),
                    ));
                }
            }
            RecordType::TXT => {
                for value in self.txt.get(&owner).into_iter().flatten() {
                    response.add_answer(Record::from_rdata(
                        owner_name.clone(),
                        120,
                        RData::TXT(TXT::new(vec![value.clone()])),
                    ));
                }
            }
            _ => {}
        }
    }

    fn handle_update(&mut self, request: &Message, response: &mut Message) {
        self.updates.push(request.clone());

        let Some(zone) = request.queries().first().map(|q| LowerName::from(q.name())) else {
            response.set_response_code(ResponseCode::FormErr);
            return;
        };
        if !self.apexes.contains(&zone) {
            response.set_response_code(ResponseCode::NotZone);
            return;
        }
        if let Some(rcode) = self.update_rcode {
            response.set_response_code(rcode);
            return;
        }

        for record in request.name_servers() {
            let owner = LowerName::from(record.name());
            if record.record_type() != RecordType::TXT || !zone.zone_of(&owner) {
                response.set_response_code(ResponseCode::NotZone);
                return;
            }
            match record.dns_class() {
                DNSClass::IN => {
                    if let Some(RData::TXT(txt)) = record.data() {
                        let value: String = txt
                            .txt_data()
                            .iter()
                            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
                            .collect();
                        let values = self.txt.entry(owner).or_default();
                        if !values.contains(&value) {
                            values.push(value);
                        }
                    }
                }
                DNSClass::ANY => {
                    self.txt.remove(&owner);
                }
                _ => {
                    response.set_response_code(ResponseCode::FormErr);
                    return;
                }
            }
        }
    }
}

fn tsig_mac(algorithm: &TsigAlgorithm, key: &[u8], data: &[u8]) -> Option<Vec<u8>> {
    let algorithm = algorithm.to_name().to_ascii().to_ascii_lowercase();
    match algorithm.trim_end_matches('.') {
        "hmac-md5.sig-alg.reg.int" => Some(mac::<Hmac<md5::Md5>>(key, data)),
        "hmac-sha1" => Some(mac::<Hmac<sha1::Sha1>>(key, data)),
        "hmac-sha224" => Some(mac::<Hmac<sha2::Sha224>>(key, data)),
        "hmac-sha256" => Some(mac::<Hmac<sha2::Sha256>>(key, data)),
        "hmac-sha384" => Some(mac::<Hmac<sha2::Sha384>>(key, data)),
        "hmac-sha512" => Some(mac::<Hmac<sha2::Sha512>>(key, data)),
        _ => None,
    }
}

fn mac<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = <M as KeyInit>::new_from_slice(key).unwrap();
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// A running fake server. Tasks stop when the test runtime shuts down.
pub struct FakeAuthority {
    pub addr: SocketAddr,
    pub zones: Arc<RwLock<Zones>>,
}

impl FakeAuthority {
    pub async fn start(zones: Zones) -> Self {
        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = udp.local_addr().unwrap();
        let tcp = TcpListener::bind(addr).await.unwrap();
        let zones = Arc::new(RwLock::new(zones));

        tokio::spawn(serve_udp(udp, zones.clone()));
        tokio::spawn(serve_tcp(tcp, zones.clone()));
        FakeAuthority { addr, zones }
    }

    pub async fn txt_values(&self, owner: &str) -> Vec<String> {
        self.zones.read().await.txt_values(owner)
    }
}

pub fn short_timeout() -> Duration {
    Duration::from_millis(300)
}

async fn serve_udp(socket: UdpSocket, zones: Arc<RwLock<Zones>>) {
    let mut buf = vec![0u8; 4096];
    loop {
        let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
            return;
        };
        let reply = zones.write().await.handle(&buf[..len], true);
        if let Some(reply) = reply {
            let _ = socket.send_to(&reply, peer).await;
        }
    }
}

async fn serve_tcp(listener: TcpListener, zones: Arc<RwLock<Zones>>) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        tokio::spawn(serve_tcp_conn(stream, zones.clone()));
    }
}

async fn serve_tcp_conn(mut stream: TcpStream, zones: Arc<RwLock<Zones>>) {
    let mut len_bytes = [0u8; 2];
    if stream.read_exact(&mut len_bytes).await.is_err() {
        return;
    }
    let mut request = vec![0u8; usize::from(u16::from_be_bytes(len_bytes))];
    if stream.read_exact(&mut request).await.is_err() {
        return;
    }
    let reply = zones.write().await.handle(&request, false);
    if let Some(reply) = reply {
        let len = u16::try_from(reply.len()).unwrap();
        let _ = stream.write_all(&len.to_be_bytes()).await;
        let _ = stream.write_all(&reply).await;
        let _ = stream.flush().await;
    }
}
