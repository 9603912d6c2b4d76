//! Immutable result snapshot handed to formatters.

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stats::LatencyStats;
use crate::transport::{FailureKind, QueryType};

/// Per-kind failure tallies over every recorded attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FailureCounts {
	pub timeout: usize,
	pub nxdomain: usize,
	pub servfail: usize,
	pub refused: usize,
	pub network_error: usize,
}

impl FailureCounts {
	pub fn record(&mut self, kind: FailureKind) {
		match kind {
			FailureKind::Timeout => self.timeout += 1,
			FailureKind::Nxdomain => self.nxdomain += 1,
			FailureKind::Servfail => self.servfail += 1,
			FailureKind::Refused => self.refused += 1,
			FailureKind::NetworkError => self.network_error += 1,
		}
	}

	pub fn get(&self, kind: FailureKind) -> usize {
		match kind {
			FailureKind::Timeout => self.timeout,
			FailureKind::Nxdomain => self.nxdomain,
			FailureKind::Servfail => self.servfail,
			FailureKind::Refused => self.refused,
			FailureKind::NetworkError => self.network_error,
		}
	}

	pub fn total(&self) -> usize {
		self.timeout + self.nxdomain + self.servfail + self.refused + self.network_error
	}
}

/// Final metrics for one provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderMetrics {
	pub id: String,
	pub name: String,
	/// `None` when no job succeeded.
	pub latency: Option<LatencyStats>,
	pub avg_latency_ms: Option<f64>,
	/// Successful jobs over completed jobs, 0-100.
	pub success_rate: f64,
	pub latency_score: f64,
	pub stability_score: f64,
	pub overall_score: f64,
	/// Jobs that reached a final attempt.
	pub jobs: usize,
	pub successful_jobs: usize,
	/// Jobs cut short by cancellation between attempts.
	pub abandoned_jobs: usize,
	pub attempts: usize,
	pub retries: usize,
	pub failures: FailureCounts,
}

/// Argmax/argmin winners, by provider id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Rankings {
	pub best_overall: Option<String>,
	pub fastest: Option<String>,
	pub most_reliable: Option<String>,
	pub most_stable: Option<String>,
}

/// Index of the first maximum; earlier entries win ties.
fn first_max<T>(items: &[T], key: impl Fn(&T) -> Option<f64>) -> Option<usize> {
	let mut best: Option<(usize, f64)> = None;
	for (i, item) in items.iter().enumerate() {
		let Some(value) = key(item) else { continue };
		match best {
			Some((_, current)) if value <= current => {}
			_ => best = Some((i, value)),
		}
	}
	best.map(|(i, _)| i)
}

impl Rankings {
	/// Rank providers kept in input order.
	pub fn compute(providers: &[ProviderMetrics]) -> Rankings {
		let id = |idx: Option<usize>| idx.map(|i| providers[i].id.clone());
		Rankings {
			best_overall: id(first_max(providers, |m| Some(m.overall_score))),
			fastest: id(first_max(providers, |m| m.avg_latency_ms.map(|v| -v))),
			most_reliable: id(first_max(providers, |m| Some(m.success_rate))),
			most_stable: id(first_max(providers, |m| Some(m.stability_score))),
		}
	}
}

/// One job as it was measured, with its attempts folded together.
///
/// Flat so it can be written as a CSV row as well as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
	pub provider: String,
	pub domain: String,
	pub record_type: QueryType,
	pub iteration: u32,
	pub attempts: u32,
	pub retries: u32,
	pub success: bool,
	/// False when cancellation cut the job short between attempts.
	pub completed: bool,
	/// Latency of the successful attempt.
	pub latency_ms: Option<f64>,
	/// Failure of the last attempt.
	pub failure: Option<FailureKind>,
	/// Address the last attempt was sent to.
	pub server: Option<SocketAddr>,
	pub started_at: DateTime<Utc>,
	pub last_attempt_at: DateTime<Utc>,
}

/// Outcome of a benchmark run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkResult {
	/// In provider input order, not ranked.
	pub providers: Vec<ProviderMetrics>,
	pub rankings: Rankings,
	pub total_jobs: usize,
	pub completed_jobs: usize,
	pub cancelled: bool,
	pub started_at: DateTime<Utc>,
	pub finished_at: DateTime<Utc>,
	pub elapsed_ms: f64,
	/// Per-job rows in job order. Exported separately from the summary.
	#[serde(skip)]
	pub measurements: Vec<Measurement>,
}

impl BenchmarkResult {
	pub fn provider(&self, id: &str) -> Option<&ProviderMetrics> {
		self.providers.iter().find(|m| m.id == id)
	}

	/// Providers sorted best overall first; ties keep input order.
	pub fn ranked(&self) -> Vec<&ProviderMetrics> {
		let mut ranked: Vec<&ProviderMetrics> = self.providers.iter().collect();
		ranked.sort_by(|a, b| {
			b.overall_score.partial_cmp(&a.overall_score)
				.unwrap_or(std::cmp::Ordering::Equal)
		});
		ranked
	}
}
