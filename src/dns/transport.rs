//! Single-attempt DNS exchanges over UDP with TCP fallback ([RFC-1035][RFC-1035] 4.2).
//!
//! [RFC-1035]: https://www.rfc-editor.org/rfc/rfc1035#section-4.2

use crate::dns::tsig::TsigKey;
use crate::error::Error;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::debug;
use trust_dns_client::op::{Message, MessageType, OpCode, Query, ResponseCode};
use trust_dns_client::rr::{DNSClass, Name, RecordType};

/// Largest request we send over UDP. Anything bigger goes straight to TCP.
pub const MAX_UDP_REQUEST: usize = 512;

/// Receive buffer for UDP responses, generous enough for EDNS(0) sized answers.
const UDP_RECV_BUFFER: usize = 4096;

/// Sends DNS messages to one server, one attempt per call.
///
/// Retrying after a failure is up to the caller; the only continuation handled here is
/// re-sending a request over TCP when the UDP answer comes back truncated.
#[derive(Debug, Clone)]
pub struct Transport {
    server: SocketAddr,
    timeout: Duration,
    query_key: Option<TsigKey>,
}

impl Transport {
    #[must_use]
    pub fn new(server: SocketAddr, timeout: Duration) -> Self {
        Transport {
            server,
            timeout,
            query_key: None,
        }
    }

    /// TSIG-sign the queries built by [`Transport::query`] with `key`. Used with servers that
    /// only answer authenticated clients.
    #[must_use]
    pub fn with_query_key(mut self, key: TsigKey) -> Self {
        self.query_key = Some(key);
        self
    }

    #[must_use]
    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Ask the server for its own `record_type` records at `name`, with recursion disabled.
    ///
    /// # Errors
    ///
    /// See [`Transport::send`].
    pub async fn query(&self, name: &Name, record_type: RecordType) -> Result<Message, Error> {
        let mut query = Query::query(name.clone(), record_type);
        query.set_query_class(DNSClass::IN);

        let mut message = Message::new();
        message
            .set_id(rand::random::<u16>())
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(false)
            .add_query(query);

        match &self.query_key {
            Some(key) => self.send_signed(message, key).await,
            None => self.send(&message).await,
        }
    }

    /// Send `message` and return the server's response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if an attempt doesn't complete in time,
    /// [`Error::Protocol`] if the response doesn't belong to the request, [`Error::Dns`] if
    /// either message fails to encode or decode, and [`Error::IO`] for socket failures.
    pub async fn send(&self, message: &Message) -> Result<Message, Error> {
        Ok(self.exchange(message).await?.0)
    }

    /// Sign `message` with `key`, send it, and check the signature on the response.
    ///
    /// Responses carrying a TSIG must verify against `key` and the request's MAC. Unsigned
    /// responses and NOTAUTH responses (whose TSIG carries the server's complaint rather than
    /// a MAC) are passed on for the caller to judge by response code.
    ///
    /// # Errors
    ///
    /// As [`Transport::send`], plus [`Error::Protocol`] for a response signature that
    /// doesn't verify.
    pub async fn send_signed(
        &self,
        mut message: Message,
        key: &TsigKey,
    ) -> Result<Message, Error> {
        let request_mac = key.sign(&mut message)?;
        let (response, raw) = self.exchange(&message).await?;

        if !response.signature().is_empty()
            && response.response_code() != ResponseCode::NotAuth
            && !key.verify_response(&request_mac, &raw)?
        {
            return Err(Error::Protocol {
                server: self.server,
                reason: format!("response signature does not verify with key {key}"),
            });
        }
        Ok(response)
    }

    /// One request/response exchange, returning the decoded response and its wire form.
    async fn exchange(&self, message: &Message) -> Result<(Message, Vec<u8>), Error> {
        let request = message.to_vec()?;
        let id = message.id();

        if request.len() > MAX_UDP_REQUEST {
            debug!(
                "{} byte request to {} is too large for UDP, using TCP",
                request.len(),
                self.server
            );
            return self.send_tcp(id, &request).await;
        }

        let (response, raw) = self.send_udp(id, &request).await?;
        if response.truncated() {
            debug!("truncated UDP response from {}, retrying over TCP", self.server);
            return self.send_tcp(id, &request).await;
        }
        Ok((response, raw))
    }

    async fn send_udp(&self, id: u16, request: &[u8]) -> Result<(Message, Vec<u8>), Error> {
        let exchange = async {
            let socket = UdpSocket::bind(self.unspecified_bind_addr()).await?;
            socket.connect(self.server).await?;
            socket.send(request).await?;

            let mut buf = vec![0u8; UDP_RECV_BUFFER];
            let len = socket.recv(&mut buf).await?;
            buf.truncate(len);
            Ok::<_, Error>(buf)
        };
        let buf = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| self.timed_out("UDP"))??;
        Ok((self.decode_response(id, &buf)?, buf))
    }

    async fn send_tcp(&self, id: u16, request: &[u8]) -> Result<(Message, Vec<u8>), Error> {
        let prefix = u16::try_from(request.len()).map_err(|_| Error::Protocol {
            server: self.server,
            reason: format!("request of {} bytes can't be framed", request.len()),
        })?;

        let exchange = async {
            let mut stream = TcpStream::connect(self.server).await?;
            stream.set_nodelay(true)?;

            let mut framed = Vec::with_capacity(request.len() + 2);
            framed.extend_from_slice(&prefix.to_be_bytes());
            framed.extend_from_slice(request);
            stream.write_all(&framed).await?;
            stream.flush().await?;

            let mut len_bytes = [0u8; 2];
            stream.read_exact(&mut len_bytes).await?;
            let mut buf = vec![0u8; usize::from(u16::from_be_bytes(len_bytes))];
            stream.read_exact(&mut buf).await?;
            Ok::<_, Error>(buf)
        };
        let buf = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| self.timed_out("TCP"))??;
        Ok((self.decode_response(id, &buf)?, buf))
    }

    fn decode_response(&self, id: u16, buf: &[u8]) -> Result<Message, Error> {
        let response = Message::from_vec(buf).map_err(|err| Error::Protocol {
            server: self.server,
            reason: format!("undecodable response: {err}"),
        })?;
        if response.id() != id {
            return Err(Error::Protocol {
                server: self.server,
                reason: format!(
                    "response ID {} does not match request ID {id}",
                    response.id()
                ),
            });
        }
        if response.message_type() != MessageType::Response {
            return Err(Error::Protocol {
                server: self.server,
                reason: "received a query instead of a response".to_string(),
            });
        }
        Ok(response)
    }

    fn unspecified_bind_addr(&self) -> SocketAddr {
        if self.server.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        }
    }

    fn timed_out(&self, protocol: &'static str) -> Error {
        Error::Timeout {
            server: self.server,
            protocol,
        }
    }
}
