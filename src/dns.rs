use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use hickory_proto::op::{Edns, Message, MessageType, Query, ResponseCode};
use hickory_proto::rr::{Name, RecordType};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::transport::QueryType;

/// Failure categories reported by a query primitive.
#[derive(Error, Debug)]
pub enum ResolveError {
	#[error("query timed out")]
	Timeout,

	#[error("domain does not exist")]
	NxDomain,

	#[error("server failure")]
	ServFail,

	#[error("query refused")]
	Refused,

	#[error("unexpected response code {0}")]
	UnexpectedRcode(String),

	#[error("malformed response: {0}")]
	Malformed(String),

	#[error("invalid query: {0}")]
	InvalidQuery(String),

	#[error("network error: {0}")]
	Io(#[from] std::io::Error),
}

/// A successful answer from a resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Answer {
	pub answer_count: usize,
}

/// The external "send one query, await answer or failure" capability.
///
/// Implementations own the protocol details; callers only measure and classify.
pub trait DnsQuery: Send + Sync + 'static {
	fn resolve(
		&self,
		server: SocketAddr,
		domain: &str,
		record_type: QueryType,
		timeout: Duration,
	) -> impl Future<Output = Result<Answer, ResolveError>> + Send;
}

/// DNS response information extracted from a parsed message
#[derive(Debug)]
pub struct DnsResponse {
	pub rcode: ResponseCode,
	pub answer_count: usize,
}

pub fn record_type(query_type: QueryType) -> RecordType {
	match query_type {
		QueryType::A => RecordType::A,
		QueryType::AAAA => RecordType::AAAA,
		QueryType::CNAME => RecordType::CNAME,
		QueryType::MX => RecordType::MX,
		QueryType::NS => RecordType::NS,
		QueryType::PTR => RecordType::PTR,
		QueryType::SOA => RecordType::SOA,
		QueryType::TXT => RecordType::TXT,
	}
}

/// Check that a string is an encodable DNS name.
pub fn is_valid_name(domain: &str) -> bool {
	Name::from_ascii(domain).is_ok()
}

/// Build a DNS query message for the given domain and query type.
///
/// When dnssec is true, the DO (DNSSEC OK) bit is set via EDNS.
/// Returns the serialized query bytes ready to send over UDP.
pub fn build_query(
	domain: &str,
	query_type: QueryType,
	txid: u16,
	dnssec: bool,
) -> Result<Vec<u8>, ResolveError> {
	let name = Name::from_ascii(domain)
		.map_err(|e| ResolveError::InvalidQuery(format!("'{}': {}", domain, e)))?;

	let mut message = Message::new();
	message.set_id(txid);
	message.set_recursion_desired(true);
	message.add_query(Query::query(name, record_type(query_type)));

	if dnssec {
		let edns = message.extensions_mut().get_or_insert_with(Edns::new);
		edns.set_dnssec_ok(true);
	}

	message.to_vec()
		.map_err(|e| ResolveError::InvalidQuery(format!("failed to serialize query: {}", e)))
}

/// Parse a DNS response, validating the transaction ID and extracting the rcode.
pub fn parse_response(bytes: &[u8], expected_txid: u16) -> Result<DnsResponse, ResolveError> {
	let message = Message::from_vec(bytes)
		.map_err(|e| ResolveError::Malformed(e.to_string()))?;

	if message.id() != expected_txid {
		return Err(ResolveError::Malformed(format!(
			"txid mismatch: expected {}, got {}",
			expected_txid, message.id()
		)));
	}

	if message.message_type() != MessageType::Response {
		return Err(ResolveError::Malformed("received a query instead of a response".to_string()));
	}

	Ok(DnsResponse {
		rcode: message.response_code(),
		answer_count: message.answer_count() as usize,
	})
}

/// Map a response code onto an answer or a failure category.
pub fn check_rcode(response: &DnsResponse) -> Result<Answer, ResolveError> {
	match response.rcode {
		ResponseCode::NoError => Ok(Answer { answer_count: response.answer_count }),
		ResponseCode::NXDomain => Err(ResolveError::NxDomain),
		ResponseCode::ServFail => Err(ResolveError::ServFail),
		ResponseCode::Refused => Err(ResolveError::Refused),
		other => Err(ResolveError::UnexpectedRcode(other.to_string())),
	}
}

/// Plain UDP queries encoded with hickory-proto.
///
/// Creates a dedicated socket per query to avoid response stealing between
/// concurrent tasks sharing the same resolver socket.
#[derive(Debug, Clone, Default)]
pub struct UdpQuery {
	pub dnssec: bool,
}

impl UdpQuery {
	pub fn new(dnssec: bool) -> Self {
		UdpQuery { dnssec }
	}

	async fn exchange(
		&self,
		server: SocketAddr,
		domain: &str,
		query_type: QueryType,
		timeout: Duration,
	) -> Result<Answer, ResolveError> {
		let txid: u16 = rand::random();
		let query_bytes = build_query(domain, query_type, txid, self.dnssec)?;

		let bind_addr = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
		let socket = UdpSocket::bind(bind_addr).await?;

		let start = Instant::now();
		socket.send_to(&query_bytes, server).await?;

		// Use 4096-byte buffer to handle EDNS-extended responses
		let mut buf = vec![0u8; 4096];
		let mut last_err = ResolveError::Timeout;
		loop {
			let elapsed = start.elapsed();
			if elapsed >= timeout {
				return Err(last_err);
			}
			let remaining = timeout - elapsed;

			let (len, src) = match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
				Ok(received) => received?,
				Err(_) => return Err(ResolveError::Timeout),
			};
			if src != server {
				continue;
			}
			match parse_response(&buf[..len], txid) {
				Ok(response) => return check_rcode(&response),
				// Stray or mangled datagram; keep listening until the deadline
				Err(e) => last_err = e,
			}
		}
	}
}

impl DnsQuery for UdpQuery {
	fn resolve(
		&self,
		server: SocketAddr,
		domain: &str,
		record_type: QueryType,
		timeout: Duration,
	) -> impl Future<Output = Result<Answer, ResolveError>> + Send {
		self.exchange(server, domain, record_type, timeout)
	}
}
