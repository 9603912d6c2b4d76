use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dns::is_valid_name;
use crate::error::ConfigError;

/// A DNS provider under test: one logical service with one or more resolver addresses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Provider {
	pub id: String,
	pub name: String,
	/// First entry is the primary address; the rest are secondaries used on retries.
	pub addresses: Vec<SocketAddr>,
	pub category: Option<String>,
	pub tags: Vec<String>,
	/// Overrides the run-wide minimum spacing between queries to this provider.
	#[serde(skip)]
	pub min_interval: Option<Duration>,
}

impl Provider {
	pub fn new(id: &str, name: &str, addresses: Vec<SocketAddr>) -> Self {
		Provider {
			id: id.to_string(),
			name: name.to_string(),
			addresses,
			category: None,
			tags: Vec::new(),
			min_interval: None,
		}
	}

	/// Address used for the given 1-based attempt, rotating through secondaries.
	pub fn address_for_attempt(&self, attempt: u32) -> Option<SocketAddr> {
		if self.addresses.is_empty() {
			return None;
		}
		let idx = (attempt.saturating_sub(1) as usize) % self.addresses.len();
		Some(self.addresses[idx])
	}
}

/// DNS query type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum QueryType {
	#[default]
	A,
	AAAA,
	CNAME,
	MX,
	NS,
	PTR,
	SOA,
	TXT,
}

impl FromStr for QueryType {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_uppercase().as_str() {
			"A" => Ok(QueryType::A),
			"AAAA" => Ok(QueryType::AAAA),
			"CNAME" => Ok(QueryType::CNAME),
			"MX" => Ok(QueryType::MX),
			"NS" => Ok(QueryType::NS),
			"PTR" => Ok(QueryType::PTR),
			"SOA" => Ok(QueryType::SOA),
			"TXT" => Ok(QueryType::TXT),
			other => Err(ConfigError::UnknownRecordType(other.to_string())),
		}
	}
}

impl TryFrom<String> for QueryType {
	type Error = ConfigError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		value.parse()
	}
}

impl From<QueryType> for String {
	fn from(value: QueryType) -> Self {
		value.to_string()
	}
}

impl fmt::Display for QueryType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			QueryType::A => "A",
			QueryType::AAAA => "AAAA",
			QueryType::CNAME => "CNAME",
			QueryType::MX => "MX",
			QueryType::NS => "NS",
			QueryType::PTR => "PTR",
			QueryType::SOA => "SOA",
			QueryType::TXT => "TXT",
		};
		f.write_str(s)
	}
}

/// A target domain with the record type to ask for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Domain {
	pub name: String,
	pub record_type: QueryType,
	pub category: Option<String>,
}

impl Domain {
	pub fn new(name: &str) -> Self {
		Domain {
			name: name.to_string(),
			record_type: QueryType::A,
			category: None,
		}
	}

	pub fn with_type(name: &str, record_type: QueryType) -> Self {
		Domain {
			record_type,
			..Domain::new(name)
		}
	}
}

/// One (provider, domain, iteration) unit of work.
///
/// Indices point into the run's provider and domain lists, which stay
/// immutable for the lifetime of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Job {
	/// Position in dispatch order.
	pub seq: usize,
	pub provider: usize,
	pub domain: usize,
	/// 0-based iteration index
	pub iteration: u32,
}

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
	Timeout,
	Nxdomain,
	Servfail,
	Refused,
	NetworkError,
}

impl FailureKind {
	/// Timeouts, SERVFAIL and connection-level errors may succeed on a second try.
	/// NXDOMAIN and REFUSED are deterministic server decisions.
	pub fn is_retryable(self) -> bool {
		matches!(
			self,
			FailureKind::Timeout | FailureKind::Servfail | FailureKind::NetworkError
		)
	}

	pub fn as_str(self) -> &'static str {
		match self {
			FailureKind::Timeout => "timeout",
			FailureKind::Nxdomain => "nxdomain",
			FailureKind::Servfail => "servfail",
			FailureKind::Refused => "refused",
			FailureKind::NetworkError => "network_error",
		}
	}
}

impl fmt::Display for FailureKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Result of a single query attempt
#[derive(Debug, Clone)]
pub struct QueryResult {
	pub job: Job,
	/// 1-based attempt number
	pub attempt: u32,
	/// Present only when `success` is true
	pub latency: Option<Duration>,
	pub success: bool,
	pub failure: Option<FailureKind>,
	/// True when this attempt ended the job (success, terminal failure, or retries exhausted)
	pub is_final: bool,
	pub timestamp: DateTime<Utc>,
}

impl QueryResult {
	pub fn latency_ms(&self) -> Option<f64> {
		self.latency.map(|d| d.as_nanos() as f64 / 1_000_000.0)
	}
}

/// Exponential retry backoff settings.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
	pub base: Duration,
	pub multiplier: f64,
	pub max: Option<Duration>,
	/// Upper bound of uniform random jitter added to each delay; zero disables it.
	pub jitter: Duration,
}

impl Default for BackoffPolicy {
	fn default() -> Self {
		BackoffPolicy {
			base: Duration::from_millis(200),
			multiplier: 2.0,
			max: Some(Duration::from_millis(2500)),
			jitter: Duration::ZERO,
		}
	}
}

/// Per-provider admission limits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitPolicy {
	/// Minimum spacing between two queries admitted to the same provider.
	pub min_interval: Duration,
	/// Cap on attempts in flight against one provider at a time.
	pub max_inflight_per_provider: Option<usize>,
}

/// Reference points for mapping mean latency onto a 0-100 score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringPolicy {
	/// Mean latency at or above this scores 0.
	pub latency_ceiling_ms: f64,
}

impl Default for ScoringPolicy {
	fn default() -> Self {
		ScoringPolicy { latency_ceiling_ms: 1000.0 }
	}
}

/// Benchmark configuration
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
	pub providers: Vec<Provider>,
	pub domains: Vec<Domain>,
	pub iterations: u32,
	pub timeout: Duration,
	pub concurrency: usize,
	pub max_retries: u32,
	pub rate_limit: RateLimitPolicy,
	pub backoff: BackoffPolicy,
	pub scoring: ScoringPolicy,
	/// Seeds domain-order shuffling and backoff jitter for reproducible runs.
	pub seed: Option<u64>,
}

impl Default for BenchmarkConfig {
	fn default() -> Self {
		BenchmarkConfig {
			providers: Vec::new(),
			domains: Vec::new(),
			iterations: 3,
			timeout: Duration::from_millis(1500),
			concurrency: 10,
			max_retries: 3,
			rate_limit: RateLimitPolicy::default(),
			backoff: BackoffPolicy::default(),
			scoring: ScoringPolicy::default(),
			seed: None,
		}
	}
}

impl BenchmarkConfig {
	/// Reject configurations that cannot produce a meaningful run.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.providers.is_empty() {
			return Err(ConfigError::NoProviders);
		}
		if self.domains.is_empty() {
			return Err(ConfigError::NoDomains);
		}
		for (i, p) in self.providers.iter().enumerate() {
			if p.addresses.is_empty() {
				return Err(ConfigError::NoAddresses(p.id.clone()));
			}
			if self.providers[..i].iter().any(|other| other.id == p.id) {
				return Err(ConfigError::DuplicateProvider(p.id.clone()));
			}
		}
		for d in &self.domains {
			if d.name.trim().is_empty() {
				return Err(ConfigError::EmptyDomain);
			}
			if !is_valid_name(&d.name) {
				return Err(ConfigError::InvalidDomain(d.name.clone()));
			}
		}
		if self.iterations == 0 {
			return Err(ConfigError::ZeroIterations);
		}
		if self.timeout.is_zero() {
			return Err(ConfigError::ZeroTimeout);
		}
		if self.concurrency == 0 {
			return Err(ConfigError::ZeroConcurrency);
		}
		if self.rate_limit.max_inflight_per_provider == Some(0) {
			return Err(ConfigError::ZeroProviderInflight);
		}
		if !self.backoff.multiplier.is_finite() || self.backoff.multiplier < 1.0 {
			return Err(ConfigError::InvalidBackoff(format!(
				"multiplier must be >= 1.0, got {}",
				self.backoff.multiplier
			)));
		}
		if let Some(max) = self.backoff.max {
			if max < self.backoff.base {
				return Err(ConfigError::InvalidBackoff(format!(
					"cap {} ms is below base {} ms",
					max.as_millis(),
					self.backoff.base.as_millis()
				)));
			}
		}
		let ceiling = self.scoring.latency_ceiling_ms;
		if !ceiling.is_finite() || ceiling <= 0.0 {
			return Err(ConfigError::InvalidLatencyCeiling(self.scoring.latency_ceiling_ms));
		}
		Ok(())
	}

	/// Number of jobs the run will schedule.
	pub fn total_jobs(&self) -> usize {
		self.providers.len() * self.domains.len() * self.iterations as usize
	}

	/// Effective minimum spacing for one provider.
	pub fn interval_for(&self, provider: &Provider) -> Duration {
		provider.min_interval.unwrap_or(self.rate_limit.min_interval)
	}
}
