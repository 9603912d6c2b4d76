use std::net::SocketAddr;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::debug;

use crate::dns::{DnsQuery, ResolveError};
use crate::transport::{Domain, FailureKind, Job, QueryResult};

/// Everything needed to run one attempt of a job.
#[derive(Debug, Clone, Copy)]
pub struct AttemptPlan {
	pub job: Job,
	/// 1-based
	pub attempt: u32,
	/// max_retries + 1
	pub max_attempts: u32,
	pub server: SocketAddr,
	pub timeout: Duration,
}

/// Map a primitive failure onto the benchmark's failure kinds.
pub fn classify(err: &ResolveError) -> FailureKind {
	match err {
		ResolveError::Timeout => FailureKind::Timeout,
		ResolveError::NxDomain => FailureKind::Nxdomain,
		ResolveError::ServFail => FailureKind::Servfail,
		ResolveError::Refused => FailureKind::Refused,
		ResolveError::UnexpectedRcode(_)
		| ResolveError::Malformed(_)
		| ResolveError::InvalidQuery(_)
		| ResolveError::Io(_) => FailureKind::NetworkError,
	}
}

/// Perform exactly one query attempt and classify the outcome.
///
/// The timeout is a hard cutoff: if the primitive has not answered when it
/// elapses, the attempt is abandoned and recorded as a timeout.
pub async fn execute_attempt<Q: DnsQuery>(
	query: &Q,
	plan: AttemptPlan,
	domain: &Domain,
) -> QueryResult {
	let timestamp = Utc::now();
	let start = Instant::now();
	let outcome = tokio::time::timeout(
		plan.timeout,
		query.resolve(plan.server, &domain.name, domain.record_type, plan.timeout),
	).await;
	let elapsed = start.elapsed();

	// A query that cannot be encoded fails the same way on every attempt
	let (failure, retryable) = match outcome {
		Ok(Ok(_answer)) => (None, false),
		Ok(Err(err)) => {
			debug!(server = %plan.server, domain = %domain.name, error = %err, "query failed");
			let kind = classify(&err);
			(Some(kind), kind.is_retryable() && !matches!(err, ResolveError::InvalidQuery(_)))
		}
		Err(_) => (Some(FailureKind::Timeout), true),
	};

	let success = failure.is_none();
	let is_final = success || !retryable || plan.attempt >= plan.max_attempts;

	QueryResult {
		job: plan.job,
		attempt: plan.attempt,
		latency: if success { Some(elapsed) } else { None },
		success,
		failure,
		is_final,
		timestamp,
	}
}
