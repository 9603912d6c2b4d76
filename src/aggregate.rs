//! Folds the stream of attempt results into per-provider metrics.
//!
//! The aggregator is owned by a single consumer task; workers only ever send
//! [`QueryResult`] values to it, so none of its state needs locking.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::report::{BenchmarkResult, FailureCounts, Measurement, ProviderMetrics, Rankings};
use crate::stats::{
	bucket_count, bucket_for, latency_consistency, latency_score, overall_score,
	stability_score, success_consistency, LatencyStats,
};
use crate::transport::{BenchmarkConfig, Provider, QueryResult};

/// Every attempt recorded for one provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderObservationSet {
	results: Vec<QueryResult>,
}

impl ProviderObservationSet {
	pub fn push(&mut self, result: QueryResult) {
		self.results.push(result);
	}

	pub fn results(&self) -> &[QueryResult] {
		&self.results
	}

	/// Attempts that ended their job.
	pub fn finals(&self) -> impl Iterator<Item = &QueryResult> {
		self.results.iter().filter(|r| r.is_final)
	}
}

/// Run bookkeeping passed to [`Aggregator::finalize`].
#[derive(Debug, Clone)]
pub struct RunInfo {
	pub total_jobs: usize,
	pub cancelled: bool,
	pub started_at: DateTime<Utc>,
	pub finished_at: DateTime<Utc>,
	pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct Aggregator {
	observations: Vec<ProviderObservationSet>,
	received: usize,
}

impl Aggregator {
	pub fn new(provider_count: usize) -> Self {
		Aggregator {
			observations: vec![ProviderObservationSet::default(); provider_count],
			received: 0,
		}
	}

	/// Record one attempt. Results for unknown provider indices are dropped.
	pub fn record(&mut self, result: QueryResult) {
		if let Some(set) = self.observations.get_mut(result.job.provider) {
			set.push(result);
			self.received += 1;
		}
	}

	/// Attempts recorded so far.
	pub fn received(&self) -> usize {
		self.received
	}

	pub fn observations(&self, provider: usize) -> Option<&ProviderObservationSet> {
		self.observations.get(provider)
	}

	/// Build the result snapshot.
	pub fn finalize(self, config: &BenchmarkConfig, run: RunInfo) -> BenchmarkResult {
		let providers: Vec<ProviderMetrics> = config.providers.iter()
			.zip(self.observations.iter())
			.map(|(provider, set)| provider_metrics(provider, set, config))
			.collect();

		let rankings = Rankings::compute(&providers);
		let completed_jobs = providers.iter().map(|m| m.jobs).sum();
		let measurements = measurements(config, &self.observations);

		BenchmarkResult {
			providers,
			rankings,
			total_jobs: run.total_jobs,
			completed_jobs,
			cancelled: run.cancelled,
			started_at: run.started_at,
			finished_at: run.finished_at,
			elapsed_ms: run.elapsed.as_secs_f64() * 1000.0,
			measurements,
		}
	}
}

/// Fold every recorded attempt into one row per job, in job order.
pub fn measurements(config: &BenchmarkConfig, sets: &[ProviderObservationSet]) -> Vec<Measurement> {
	let mut by_job: BTreeMap<usize, Vec<&QueryResult>> = BTreeMap::new();
	for r in sets.iter().flat_map(|set| set.results()) {
		by_job.entry(r.job.seq).or_default().push(r);
	}

	by_job.into_values()
		.filter_map(|mut attempts| {
			attempts.sort_by_key(|r| r.attempt);
			let first = attempts.first()?;
			let last = attempts.last()?;
			let provider = config.providers.get(first.job.provider)?;
			let domain = config.domains.get(first.job.domain)?;
			Some(Measurement {
				provider: provider.id.clone(),
				domain: domain.name.clone(),
				record_type: domain.record_type,
				iteration: first.job.iteration,
				attempts: last.attempt,
				retries: last.attempt.saturating_sub(1),
				success: last.success,
				completed: last.is_final,
				latency_ms: last.latency_ms(),
				failure: last.failure,
				server: provider.address_for_attempt(last.attempt),
				started_at: first.timestamp,
				last_attempt_at: last.timestamp,
			})
		})
		.collect()
}

/// Compute metrics for one provider from its observations.
///
/// Success rate and latency only count jobs that reached a final attempt;
/// failure tallies count every attempt.
pub fn provider_metrics(
	provider: &Provider,
	set: &ProviderObservationSet,
	config: &BenchmarkConfig,
) -> ProviderMetrics {
	let mut failures = FailureCounts::default();
	let mut retries = 0;
	let mut seen_jobs = HashSet::new();
	for r in set.results() {
		if let Some(kind) = r.failure {
			failures.record(kind);
		}
		if r.attempt > 1 {
			retries += 1;
		}
		seen_jobs.insert(r.job.seq);
	}

	let mut buckets = vec![(0usize, 0usize); bucket_count(config.iterations)];
	let mut latencies = Vec::new();
	let mut completed = HashSet::new();
	let mut successful_jobs = 0;
	for r in set.finals() {
		if !completed.insert(r.job.seq) {
			continue;
		}
		let bucket = &mut buckets[bucket_for(r.job.iteration, config.iterations)];
		bucket.1 += 1;
		if r.success {
			successful_jobs += 1;
			bucket.0 += 1;
			if let Some(ms) = r.latency_ms() {
				latencies.push(ms);
			}
		}
	}
	let jobs = completed.len();

	let success_rate = if jobs > 0 {
		100.0 * successful_jobs as f64 / jobs as f64
	} else {
		0.0
	};

	let latency = LatencyStats::from_latencies(&latencies);
	let latency_term = latency.as_ref()
		.map(|s| latency_consistency(s.coefficient_of_variation()));
	let success_term = if jobs > 0 { success_consistency(&buckets) } else { None };
	let stability = stability_score(latency_term, success_term);

	let avg_latency_ms = latency.as_ref().map(|s| s.mean_ms);
	let lat_score = latency_score(avg_latency_ms, config.scoring.latency_ceiling_ms);

	ProviderMetrics {
		id: provider.id.clone(),
		name: provider.name.clone(),
		latency,
		avg_latency_ms,
		success_rate,
		latency_score: lat_score,
		stability_score: stability,
		overall_score: overall_score(lat_score, success_rate, stability),
		jobs,
		successful_jobs,
		abandoned_jobs: seen_jobs.len() - jobs,
		attempts: set.results().len(),
		retries,
		failures,
	}
}
