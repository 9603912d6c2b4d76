use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::aggregate::{Aggregator, RunInfo};
use crate::dns::DnsQuery;
use crate::error::ConfigError;
use crate::executor::{execute_attempt, AttemptPlan};
use crate::limiter::{Backoff, RateLimiter};
use crate::report::BenchmarkResult;
use crate::transport::{BenchmarkConfig, Job, QueryResult};

/// Capacity of the worker -> aggregator channel.
const RESULT_BUFFER: usize = 1024;

/// Triggers cancellation of a running benchmark.
#[derive(Debug, Clone)]
pub struct CancelHandle {
	tx: Arc<watch::Sender<bool>>,
}

/// Observed by workers to stop taking new jobs.
#[derive(Debug, Clone)]
pub struct CancelSignal {
	rx: watch::Receiver<bool>,
}

impl CancelHandle {
	pub fn new() -> (CancelHandle, CancelSignal) {
		let (tx, rx) = watch::channel(false);
		(CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx })
	}

	pub fn cancel(&self) {
		self.tx.send_replace(true);
	}
}

impl CancelSignal {
	/// A signal that never fires.
	pub fn never() -> CancelSignal {
		let (_tx, rx) = watch::channel(false);
		CancelSignal { rx }
	}

	pub fn is_cancelled(&self) -> bool {
		*self.rx.borrow()
	}

	/// Resolve once cancellation is requested. Pends forever if the handle is
	/// dropped without cancelling.
	pub async fn cancelled(&mut self) {
		if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
			std::future::pending::<()>().await;
		}
	}
}

/// Expand the configuration into the dispatch-ordered job list.
///
/// Jobs are iteration-major, then domain, then provider, so consecutive jobs
/// target different providers instead of bursting one provider. With a seed,
/// the domain order inside each iteration is shuffled reproducibly.
pub fn build_jobs(config: &BenchmarkConfig) -> Vec<Job> {
	let mut rng = config.seed.map(StdRng::seed_from_u64);
	let mut jobs = Vec::with_capacity(config.total_jobs());
	let mut domain_order: Vec<usize> = (0..config.domains.len()).collect();

	for iteration in 0..config.iterations {
		if let Some(rng) = rng.as_mut() {
			domain_order.shuffle(rng);
		}
		for &domain in &domain_order {
			for provider in 0..config.providers.len() {
				jobs.push(Job {
					seq: jobs.len(),
					provider,
					domain,
					iteration,
				});
			}
		}
	}
	jobs
}

/// Per-job retry state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
	Pending,
	Attempting(u32),
	/// Waiting out the backoff before the given attempt.
	Retrying(u32),
	Success,
	/// Failed with no attempts left, or with a non-retryable failure.
	Exhausted,
	/// Cancelled between attempts.
	Abandoned,
}

/// Shared, read-mostly state for one run.
struct RunContext<Q> {
	config: Arc<BenchmarkConfig>,
	query: Arc<Q>,
	limiter: RateLimiter,
	backoff: Backoff,
	queue: Mutex<VecDeque<Job>>,
}

impl<Q: DnsQuery> RunContext<Q> {
	fn new(config: Arc<BenchmarkConfig>, query: Arc<Q>, jobs: Vec<Job>) -> Self {
		RunContext {
			limiter: RateLimiter::from_config(&config),
			backoff: Backoff::new(config.backoff.clone(), config.seed),
			queue: Mutex::new(VecDeque::from(jobs)),
			query,
			config,
		}
	}

	fn next_job(&self) -> Option<Job> {
		self.queue.lock().pop_front()
	}

	/// Drive one job to completion, streaming each attempt to the aggregator.
	async fn run_job(
		&self,
		job: Job,
		cancel: &mut CancelSignal,
		results: &mpsc::Sender<QueryResult>,
	) -> JobState {
		let provider = &self.config.providers[job.provider];
		let domain = &self.config.domains[job.domain];
		let limits = self.limiter.limits(&provider.id);
		let max_attempts = self.config.max_retries + 1;

		let mut state = JobState::Pending;
		loop {
			state = match state {
				JobState::Pending => JobState::Attempting(1),
				JobState::Attempting(attempt) => {
					let Some(server) = provider.address_for_attempt(attempt) else {
						return JobState::Abandoned;
					};

					let admitted = tokio::select! {
						biased;
						_ = cancel.cancelled() => None,
						permit = async {
							match &limits {
								Some(limits) => limits.admit().await,
								None => None,
							}
						} => Some(permit),
					};
					let Some(permit) = admitted else {
						return JobState::Abandoned;
					};

					let plan = AttemptPlan {
						job,
						attempt,
						max_attempts,
						server,
						timeout: self.config.timeout,
					};
					let result = execute_attempt(self.query.as_ref(), plan, domain).await;
					drop(permit);

					debug!(
						provider = %provider.id,
						domain = %domain.name,
						iteration = job.iteration,
						attempt,
						success = result.success,
						failure = result.failure.map(|k| k.as_str()),
						latency_ms = result.latency_ms(),
						"attempt finished"
					);

					let next = if result.success {
						JobState::Success
					} else if result.is_final {
						JobState::Exhausted
					} else {
						JobState::Retrying(attempt + 1)
					};
					if results.send(result).await.is_err() {
						warn!("result collector closed; dropping job {}", job.seq);
						return JobState::Abandoned;
					}
					next
				}
				JobState::Retrying(attempt) => {
					let delay = self.backoff.delay(attempt);
					tokio::select! {
						biased;
						_ = cancel.cancelled() => JobState::Abandoned,
						_ = tokio::time::sleep(delay) => JobState::Attempting(attempt),
					}
				}
				done @ (JobState::Success | JobState::Exhausted | JobState::Abandoned) => {
					return done;
				}
			};
		}
	}
}

async fn worker<Q: DnsQuery>(
	id: usize,
	ctx: Arc<RunContext<Q>>,
	mut cancel: CancelSignal,
	results: mpsc::Sender<QueryResult>,
) {
	let mut handled = 0usize;
	while !cancel.is_cancelled() {
		let Some(job) = ctx.next_job() else { break };
		ctx.run_job(job, &mut cancel, &results).await;
		handled += 1;
	}
	debug!(worker = id, jobs = handled, "worker finished");
}

/// A validated benchmark ready to run.
#[derive(Debug)]
pub struct Benchmark<Q> {
	config: Arc<BenchmarkConfig>,
	query: Arc<Q>,
}

impl<Q: DnsQuery> Benchmark<Q> {
	/// Validate the configuration. Nothing is scheduled on error.
	pub fn new(config: BenchmarkConfig, query: Q) -> Result<Self, ConfigError> {
		Self::with_shared_query(config, Arc::new(query))
	}

	pub fn with_shared_query(config: BenchmarkConfig, query: Arc<Q>) -> Result<Self, ConfigError> {
		config.validate()?;
		Ok(Benchmark {
			config: Arc::new(config),
			query,
		})
	}

	pub fn config(&self) -> &BenchmarkConfig {
		&self.config
	}

	/// Run every job and aggregate the results.
	///
	/// Cancellation stops workers from taking new jobs; attempts already in
	/// flight finish within their timeout. The returned result covers whatever
	/// completed before that point.
	pub async fn run(&self, cancel: CancelSignal) -> BenchmarkResult {
		let started_at = Utc::now();
		let start = Instant::now();
		let config = self.config.clone();

		let jobs = build_jobs(&config);
		let total_jobs = jobs.len();
		let worker_count = config.concurrency;
		info!(
			providers = config.providers.len(),
			domains = config.domains.len(),
			iterations = config.iterations,
			jobs = total_jobs,
			workers = worker_count,
			"starting benchmark"
		);

		let ctx = Arc::new(RunContext::new(config.clone(), self.query.clone(), jobs));

		let (tx, mut rx) = mpsc::channel::<QueryResult>(RESULT_BUFFER);
		let provider_count = config.providers.len();
		let collector = tokio::spawn(async move {
			let mut aggregator = Aggregator::new(provider_count);
			while let Some(result) = rx.recv().await {
				aggregator.record(result);
			}
			aggregator
		});

		let mut handles = Vec::with_capacity(worker_count);
		for id in 0..worker_count {
			handles.push(tokio::spawn(worker(id, ctx.clone(), cancel.clone(), tx.clone())));
		}
		drop(tx);

		for handle in handles {
			if let Err(e) = handle.await {
				warn!("worker task failed: {}", e);
			}
		}

		let aggregator = match collector.await {
			Ok(aggregator) => aggregator,
			Err(e) => {
				warn!("result collector failed: {}", e);
				Aggregator::new(provider_count)
			}
		};

		let cancelled = cancel.is_cancelled();
		let attempts = aggregator.received();
		let result = aggregator.finalize(&config, RunInfo {
			total_jobs,
			cancelled,
			started_at,
			finished_at: Utc::now(),
			elapsed: start.elapsed(),
		});

		if cancelled {
			info!(
				completed = result.completed_jobs,
				total = total_jobs,
				"benchmark cancelled; returning partial results"
			);
		} else {
			info!(jobs = total_jobs, attempts, elapsed_ms = result.elapsed_ms, "benchmark finished");
		}
		result
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashSet;
	use std::future::Future;
	use std::net::SocketAddr;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	use crate::dns::{Answer, ResolveError};
	use crate::sim::{ScriptedQuery, Step};
	use crate::transport::{BackoffPolicy, Domain, FailureKind, Provider, QueryType, RateLimitPolicy};

	fn addr(s: &str) -> SocketAddr {
		s.parse().unwrap()
	}

	fn provider(id: &str, a: &str) -> Provider {
		Provider::new(id, id, vec![addr(a)])
	}

	fn domains(n: usize) -> Vec<Domain> {
		(0..n).map(|i| Domain::new(&format!("d{}.example", i))).collect()
	}

	fn quick_backoff() -> BackoffPolicy {
		BackoffPolicy {
			base: Duration::from_millis(10),
			multiplier: 2.0,
			max: Some(Duration::from_millis(100)),
			jitter: Duration::ZERO,
		}
	}

	#[test]
	fn test_job_count_is_cross_product() {
		let config = BenchmarkConfig {
			providers: vec![provider("a", "192.0.2.1:53"), provider("b", "192.0.2.2:53"), provider("c", "192.0.2.3:53")],
			domains: domains(4),
			iterations: 5,
			..BenchmarkConfig::default()
		};
		let jobs = build_jobs(&config);
		assert_eq!(jobs.len(), 3 * 4 * 5);

		let mut per_provider = [0usize; 3];
		for job in &jobs {
			per_provider[job.provider] += 1;
		}
		assert_eq!(per_provider, [20, 20, 20]);

		let unique: HashSet<(usize, usize, u32)> = jobs.iter()
			.map(|j| (j.provider, j.domain, j.iteration))
			.collect();
		assert_eq!(unique.len(), jobs.len());
	}

	#[test]
	fn test_jobs_interleave_providers() {
		let config = BenchmarkConfig {
			providers: vec![provider("a", "192.0.2.1:53"), provider("b", "192.0.2.2:53")],
			domains: domains(3),
			iterations: 2,
			..BenchmarkConfig::default()
		};
		let jobs = build_jobs(&config);
		for pair in jobs.windows(2) {
			assert_ne!(pair[0].provider, pair[1].provider);
		}
		for (i, job) in jobs.iter().enumerate() {
			assert_eq!(job.seq, i);
		}
		// All of iteration 0 is dispatched before iteration 1
		let first_iter1 = jobs.iter().position(|j| j.iteration == 1).unwrap();
		assert!(jobs[..first_iter1].iter().all(|j| j.iteration == 0));
	}

	#[test]
	fn test_seeded_shuffle_is_reproducible() {
		let config = BenchmarkConfig {
			providers: vec![provider("a", "192.0.2.1:53")],
			domains: domains(8),
			iterations: 3,
			seed: Some(99),
			..BenchmarkConfig::default()
		};
		let a = build_jobs(&config);
		let b = build_jobs(&config);
		assert_eq!(a, b);
		for iteration in 0..3 {
			let mut seen: Vec<usize> = a.iter()
				.filter(|j| j.iteration == iteration)
				.map(|j| j.domain)
				.collect();
			seen.sort();
			assert_eq!(seen, (0..8).collect::<Vec<_>>());
		}
	}

	#[test]
	fn test_invalid_config_rejected_before_run() {
		let config = BenchmarkConfig {
			providers: vec![],
			domains: domains(1),
			..BenchmarkConfig::default()
		};
		let err = Benchmark::new(config, ScriptedQuery::new()).unwrap_err();
		assert_eq!(err, ConfigError::NoProviders);
	}

	#[tokio::test(start_paused = true)]
	async fn test_deterministic_reference_run() {
		let server = addr("192.0.2.1:53");
		let steps = [10, 12, 11, 13, 10]
			.into_iter()
			.map(|ms| Step::Answer(Duration::from_millis(ms)))
			.collect();
		let query = ScriptedQuery::new().with_steps(server, steps);
		let config = BenchmarkConfig {
			providers: vec![Provider::new("p", "P", vec![server])],
			domains: domains(1),
			iterations: 5,
			concurrency: 1,
			..BenchmarkConfig::default()
		};
		let result = Benchmark::new(config, query).unwrap().run(CancelSignal::never()).await;

		let p = result.provider("p").unwrap();
		let stats = p.latency.as_ref().unwrap();
		assert!((stats.mean_ms - 11.2).abs() < 1e-9);
		assert_eq!(stats.p50_ms, 11.0);
		assert_eq!(p.success_rate, 100.0);
		assert_eq!(result.completed_jobs, 5);
		assert!(!result.cancelled);
	}

	#[tokio::test(start_paused = true)]
	async fn test_retry_until_success_counts_job_once() {
		let server = addr("192.0.2.1:53");
		let query = ScriptedQuery::new().with_steps(server, vec![
			Step::Fail(|| ResolveError::Timeout),
			Step::Fail(|| ResolveError::Timeout),
			Step::Answer(Duration::from_millis(20)),
		]);
		let config = BenchmarkConfig {
			providers: vec![Provider::new("p", "P", vec![server])],
			domains: domains(1),
			iterations: 1,
			max_retries: 3,
			backoff: quick_backoff(),
			..BenchmarkConfig::default()
		};
		let bench = Benchmark::new(config, query).unwrap();
		let result = bench.run(CancelSignal::never()).await;

		let p = result.provider("p").unwrap();
		assert_eq!(p.attempts, 3);
		assert_eq!(p.retries, 2);
		assert_eq!(p.jobs, 1);
		assert_eq!(p.successful_jobs, 1);
		assert_eq!(p.success_rate, 100.0);
		assert_eq!(p.failures.timeout, 2);
		assert_eq!(p.latency.as_ref().unwrap().mean_ms, 20.0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_attempts_numbered_in_order() {
		let server = addr("192.0.2.1:53");
		let query = ScriptedQuery::new().with_steps(server, vec![
			Step::Fail(|| ResolveError::Timeout),
			Step::FailAfter(Duration::from_millis(30), || ResolveError::ServFail),
			Step::Answer(Duration::from_millis(7)),
		]);
		let config = Arc::new(BenchmarkConfig {
			providers: vec![Provider::new("p", "P", vec![server])],
			domains: domains(1),
			iterations: 1,
			max_retries: 3,
			backoff: quick_backoff(),
			..BenchmarkConfig::default()
		});
		let ctx = RunContext::new(config.clone(), Arc::new(query), build_jobs(&config));
		let job = ctx.next_job().unwrap();
		let (tx, mut rx) = mpsc::channel(8);
		let mut cancel = CancelSignal::never();

		let start = Instant::now();
		let state = ctx.run_job(job, &mut cancel, &tx).await;
		drop(tx);
		assert_eq!(state, JobState::Success);
		// 30 ms failing answer, backoff 10 + 20 ms, 7 ms answer
		assert!(start.elapsed() >= Duration::from_millis(67));

		let mut seen = Vec::new();
		while let Some(r) = rx.recv().await {
			seen.push((r.attempt, r.is_final, r.failure, r.latency));
		}
		assert_eq!(seen, vec![
			(1, false, Some(FailureKind::Timeout), None),
			(2, false, Some(FailureKind::Servfail), None),
			(3, true, None, Some(Duration::from_millis(7))),
		]);
	}

	#[tokio::test(start_paused = true)]
	async fn test_slow_failure_excluded_from_latency() {
		let server = addr("192.0.2.1:53");
		let query = ScriptedQuery::new().with_steps(server, vec![
			Step::FailAfter(Duration::from_millis(300), || ResolveError::ServFail),
			Step::Answer(Duration::from_millis(10)),
		]);
		let config = BenchmarkConfig {
			providers: vec![Provider::new("p", "P", vec![server])],
			domains: domains(1),
			iterations: 1,
			backoff: quick_backoff(),
			..BenchmarkConfig::default()
		};
		let result = Benchmark::new(config, query).unwrap().run(CancelSignal::never()).await;
		let p = result.provider("p").unwrap();
		assert_eq!(p.latency.as_ref().unwrap().mean_ms, 10.0);
		assert_eq!(p.failures.servfail, 1);
		assert!(result.elapsed_ms >= 310.0);

		let m = &result.measurements[0];
		assert_eq!(m.attempts, 2);
		assert_eq!(m.latency_ms, Some(10.0));
	}

	#[tokio::test(start_paused = true)]
	async fn test_rate_gate_spaces_retries() {
		let server = addr("192.0.2.1:53");
		let query = Arc::new(ScriptedQuery::new().with_steps(server, vec![
			Step::Fail(|| ResolveError::Timeout),
			Step::Answer(Duration::from_millis(1)),
		]));
		let config = BenchmarkConfig {
			providers: vec![Provider::new("p", "P", vec![server])],
			domains: domains(1),
			iterations: 1,
			rate_limit: RateLimitPolicy {
				min_interval: Duration::from_millis(100),
				max_inflight_per_provider: None,
			},
			backoff: BackoffPolicy {
				base: Duration::ZERO,
				multiplier: 1.0,
				max: Some(Duration::ZERO),
				jitter: Duration::ZERO,
			},
			..BenchmarkConfig::default()
		};
		let start = Instant::now();
		let bench = Benchmark::with_shared_query(config, query.clone()).unwrap();
		let result = bench.run(CancelSignal::never()).await;
		// Zero backoff, so the gate alone holds the retry back
		assert!(start.elapsed() >= Duration::from_millis(100));
		assert_eq!(query.calls().len(), 2);
		assert_eq!(result.provider("p").unwrap().successful_jobs, 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_retries_exhausted() {
		let server = addr("192.0.2.1:53");
		let query = ScriptedQuery::new()
			.with_fallback(Step::Fail(|| ResolveError::ServFail));
		let config = BenchmarkConfig {
			providers: vec![Provider::new("p", "P", vec![server])],
			domains: domains(1),
			iterations: 1,
			max_retries: 2,
			backoff: quick_backoff(),
			..BenchmarkConfig::default()
		};
		let bench = Benchmark::new(config, query).unwrap();
		let result = bench.run(CancelSignal::never()).await;

		let p = result.provider("p").unwrap();
		assert_eq!(p.attempts, 3);
		assert_eq!(p.jobs, 1);
		assert_eq!(p.success_rate, 0.0);
		assert_eq!(p.failures.servfail, 3);
	}

	#[tokio::test(start_paused = true)]
	async fn test_backoff_delays_between_attempts() {
		let server = addr("192.0.2.1:53");
		let query = ScriptedQuery::new()
			.with_fallback(Step::Fail(|| ResolveError::Timeout));
		let config = BenchmarkConfig {
			providers: vec![Provider::new("p", "P", vec![server])],
			domains: domains(1),
			iterations: 1,
			max_retries: 3,
			backoff: BackoffPolicy {
				base: Duration::from_millis(100),
				multiplier: 2.0,
				max: None,
				jitter: Duration::ZERO,
			},
			..BenchmarkConfig::default()
		};
		let start = Instant::now();
		let result = Benchmark::new(config, query).unwrap().run(CancelSignal::never()).await;
		// 100 + 200 + 400 ms of backoff before attempts 2, 3 and 4
		assert!(start.elapsed() >= Duration::from_millis(700));
		assert_eq!(result.provider("p").unwrap().attempts, 4);
	}

	#[tokio::test(start_paused = true)]
	async fn test_terminal_failures_not_retried() {
		let server = addr("192.0.2.1:53");
		let query = ScriptedQuery::new()
			.with_domain_steps(server, "d0.example", vec![Step::Fail(|| ResolveError::NxDomain)])
			.with_domain_steps(server, "d1.example", vec![Step::Fail(|| ResolveError::Refused)]);
		let config = BenchmarkConfig {
			providers: vec![Provider::new("p", "P", vec![server])],
			domains: domains(2),
			iterations: 1,
			max_retries: 5,
			..BenchmarkConfig::default()
		};
		let bench = Benchmark::new(config, query).unwrap();
		let result = bench.run(CancelSignal::never()).await;

		let p = result.provider("p").unwrap();
		assert_eq!(p.attempts, 2);
		assert_eq!(p.retries, 0);
		assert_eq!(p.failures.nxdomain, 1);
		assert_eq!(p.failures.refused, 1);
		assert_eq!(p.success_rate, 0.0);
		assert_eq!(p.latency, None);
		assert_eq!(p.latency_score, 0.0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_retry_fails_over_to_secondary() {
		let primary = addr("192.0.2.1:53");
		let secondary = addr("192.0.2.2:53");
		let query = Arc::new(
			ScriptedQuery::new()
				.with_steps(primary, vec![Step::Fail(|| ResolveError::Timeout)])
				.with_steps(secondary, vec![Step::Answer(Duration::from_millis(5))]),
		);
		let config = BenchmarkConfig {
			providers: vec![Provider::new("p", "P", vec![primary, secondary])],
			domains: domains(1),
			iterations: 1,
			backoff: quick_backoff(),
			..BenchmarkConfig::default()
		};
		let bench = Benchmark::with_shared_query(config, query.clone()).unwrap();
		let result = bench.run(CancelSignal::never()).await;

		let servers: Vec<SocketAddr> = query.calls().into_iter().map(|(s, _)| s).collect();
		assert_eq!(servers, vec![primary, secondary]);
		assert_eq!(result.provider("p").unwrap().success_rate, 100.0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_rate_limit_spacing_with_large_pool() {
		let server = addr("192.0.2.1:53");
		let query = ScriptedQuery::new().with_fallback(Step::Answer(Duration::from_millis(1)));
		let config = BenchmarkConfig {
			providers: vec![Provider::new("p", "P", vec![server])],
			domains: domains(10),
			iterations: 1,
			concurrency: 16,
			rate_limit: RateLimitPolicy {
				min_interval: Duration::from_millis(100),
				max_inflight_per_provider: None,
			},
			..BenchmarkConfig::default()
		};
		let start = Instant::now();
		let result = Benchmark::new(config, query).unwrap().run(CancelSignal::never()).await;
		assert!(start.elapsed() >= Duration::from_millis(900));
		assert_eq!(result.completed_jobs, 10);
	}

	#[tokio::test(start_paused = true)]
	async fn test_rate_limit_does_not_block_other_providers() {
		let slow = addr("192.0.2.1:53");
		let free = addr("192.0.2.2:53");
		let mut limited = Provider::new("limited", "Limited", vec![slow]);
		limited.min_interval = Some(Duration::from_secs(1));
		let mut open = Provider::new("open", "Open", vec![free]);
		open.min_interval = Some(Duration::ZERO);

		let query = Arc::new(ScriptedQuery::new().with_fallback(Step::Answer(Duration::from_millis(1))));
		let config = BenchmarkConfig {
			providers: vec![limited, open],
			domains: domains(5),
			iterations: 1,
			concurrency: 10,
			..BenchmarkConfig::default()
		};
		let bench = Benchmark::with_shared_query(config, query.clone()).unwrap();
		let (handle, signal) = CancelHandle::new();
		let run = tokio::spawn(async move { bench.run(signal).await });

		// Every job has a worker; the open provider finishes while the limited
		// one is still waiting on its gate.
		tokio::time::sleep(Duration::from_millis(500)).await;
		let open_calls = query.calls().iter().filter(|(s, _)| *s == free).count();
		assert_eq!(open_calls, 5);

		handle.cancel();
		let result = run.await.unwrap();
		assert!(result.cancelled);
		assert_eq!(result.provider("open").unwrap().jobs, 5);
	}

	/// Tracks how many resolves are in flight at once.
	struct CountingQuery {
		inflight: AtomicUsize,
		peak: AtomicUsize,
	}

	impl DnsQuery for CountingQuery {
		fn resolve(
			&self,
			_server: SocketAddr,
			_domain: &str,
			_record_type: QueryType,
			_timeout: Duration,
		) -> impl Future<Output = Result<Answer, ResolveError>> + Send {
			async move {
				let now = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
				self.peak.fetch_max(now, Ordering::SeqCst);
				tokio::time::sleep(Duration::from_millis(10)).await;
				self.inflight.fetch_sub(1, Ordering::SeqCst);
				Ok(Answer::default())
			}
		}
	}

	#[tokio::test(start_paused = true)]
	async fn test_global_concurrency_bound() {
		let query = Arc::new(CountingQuery {
			inflight: AtomicUsize::new(0),
			peak: AtomicUsize::new(0),
		});
		let config = BenchmarkConfig {
			providers: vec![provider("a", "192.0.2.1:53"), provider("b", "192.0.2.2:53")],
			domains: domains(10),
			iterations: 3,
			concurrency: 4,
			..BenchmarkConfig::default()
		};
		let bench = Benchmark::with_shared_query(config, query.clone()).unwrap();
		let result = bench.run(CancelSignal::never()).await;
		assert_eq!(result.completed_jobs, 60);
		assert_eq!(query.peak.load(Ordering::SeqCst), 4);
	}

	#[tokio::test(start_paused = true)]
	async fn test_per_provider_inflight_cap() {
		let query = Arc::new(CountingQuery {
			inflight: AtomicUsize::new(0),
			peak: AtomicUsize::new(0),
		});
		let config = BenchmarkConfig {
			providers: vec![provider("a", "192.0.2.1:53")],
			domains: domains(6),
			iterations: 1,
			concurrency: 6,
			rate_limit: RateLimitPolicy {
				min_interval: Duration::ZERO,
				max_inflight_per_provider: Some(2),
			},
			..BenchmarkConfig::default()
		};
		let bench = Benchmark::with_shared_query(config, query.clone()).unwrap();
		bench.run(CancelSignal::never()).await;
		assert_eq!(query.peak.load(Ordering::SeqCst), 2);
	}

	/// Answers every query and requests cancellation during the N-th one.
	struct CancelOnCall {
		handle: CancelHandle,
		at: usize,
		calls: AtomicUsize,
		fail: bool,
	}

	impl DnsQuery for CancelOnCall {
		fn resolve(
			&self,
			_server: SocketAddr,
			_domain: &str,
			_record_type: QueryType,
			_timeout: Duration,
		) -> impl Future<Output = Result<Answer, ResolveError>> + Send {
			let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
			if n == self.at {
				self.handle.cancel();
			}
			let fail = self.fail;
			async move {
				tokio::time::sleep(Duration::from_millis(5)).await;
				if fail {
					Err(ResolveError::Timeout)
				} else {
					Ok(Answer::default())
				}
			}
		}
	}

	#[tokio::test(start_paused = true)]
	async fn test_cancel_mid_run_returns_completed_jobs() {
		let (handle, signal) = CancelHandle::new();
		let query = CancelOnCall {
			handle,
			at: 3,
			calls: AtomicUsize::new(0),
			fail: false,
		};
		let config = BenchmarkConfig {
			providers: vec![provider("a", "192.0.2.1:53"), provider("b", "192.0.2.2:53")],
			domains: domains(5),
			iterations: 2,
			concurrency: 1,
			..BenchmarkConfig::default()
		};
		let result = Benchmark::new(config, query).unwrap().run(signal).await;

		assert!(result.cancelled);
		assert_eq!(result.total_jobs, 20);
		// The in-flight third job finishes; nothing new is admitted after it
		assert_eq!(result.completed_jobs, 3);
		let jobs: usize = result.providers.iter().map(|m| m.jobs).sum();
		assert_eq!(jobs, 3);
		assert_eq!(result.provider("a").unwrap().jobs, 2);
		assert_eq!(result.provider("b").unwrap().jobs, 1);
		for m in &result.providers {
			assert_eq!(m.success_rate, 100.0);
		}
	}

	#[tokio::test(start_paused = true)]
	async fn test_cancel_during_backoff_abandons_job() {
		let (handle, signal) = CancelHandle::new();
		let query = CancelOnCall {
			handle,
			at: 1,
			calls: AtomicUsize::new(0),
			fail: true,
		};
		let config = BenchmarkConfig {
			providers: vec![provider("a", "192.0.2.1:53")],
			domains: domains(3),
			iterations: 1,
			concurrency: 1,
			max_retries: 3,
			backoff: BackoffPolicy {
				base: Duration::from_secs(10),
				multiplier: 2.0,
				max: None,
				jitter: Duration::ZERO,
			},
			..BenchmarkConfig::default()
		};
		let start = Instant::now();
		let result = Benchmark::new(config, query).unwrap().run(signal).await;

		assert!(start.elapsed() < Duration::from_secs(1));
		let a = result.provider("a").unwrap();
		assert_eq!(a.jobs, 0);
		assert_eq!(a.abandoned_jobs, 1);
		assert_eq!(a.attempts, 1);
		assert_eq!(a.failures.timeout, 1);
		assert_eq!(a.success_rate, 0.0);
		assert_eq!(result.completed_jobs, 0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_cancel_with_hung_resolver_drains_within_timeout() {
		let server = addr("192.0.2.1:53");
		let query = ScriptedQuery::new().with_fallback(Step::Hang);
		let config = BenchmarkConfig {
			providers: vec![Provider::new("p", "P", vec![server])],
			domains: domains(4),
			iterations: 1,
			concurrency: 2,
			max_retries: 0,
			timeout: Duration::from_millis(200),
			..BenchmarkConfig::default()
		};
		let bench = Benchmark::new(config, query).unwrap();
		let (handle, signal) = CancelHandle::new();
		let start = Instant::now();
		let run = tokio::spawn(async move { bench.run(signal).await });

		tokio::time::sleep(Duration::from_millis(50)).await;
		handle.cancel();
		let result = run.await.unwrap();

		assert!(start.elapsed() <= Duration::from_millis(250));
		assert!(result.cancelled);
		let p = result.provider("p").unwrap();
		assert_eq!(p.jobs, 2);
		assert_eq!(p.failures.timeout, 2);
		assert_eq!(p.latency, None);
	}

	#[tokio::test(start_paused = true)]
	async fn test_scores_within_bounds() {
		let good = addr("192.0.2.1:53");
		let flaky = addr("192.0.2.2:53");
		let query = ScriptedQuery::new()
			.with_steps(flaky, vec![
				Step::Answer(Duration::from_millis(300)),
				Step::Fail(|| ResolveError::Refused),
				Step::Answer(Duration::from_millis(5)),
				Step::Fail(|| ResolveError::NxDomain),
			])
			.with_fallback(Step::Answer(Duration::from_millis(20)));
		let config = BenchmarkConfig {
			providers: vec![
				Provider::new("good", "Good", vec![good]),
				Provider::new("flaky", "Flaky", vec![flaky]),
			],
			domains: domains(2),
			iterations: 4,
			concurrency: 3,
			..BenchmarkConfig::default()
		};
		let result = Benchmark::new(config, query).unwrap().run(CancelSignal::never()).await;

		assert_eq!(result.completed_jobs, 16);
		for m in &result.providers {
			assert!((0.0..=100.0).contains(&m.success_rate));
			assert!((0.0..=100.0).contains(&m.stability_score));
			assert!((0.0..=100.0).contains(&m.overall_score));
			if let Some(s) = &m.latency {
				assert!(s.p50_ms <= s.p95_ms);
				assert!(s.p95_ms <= s.p99_ms);
				assert!(s.p99_ms <= s.max_ms);
			}
		}
		assert_eq!(result.rankings.best_overall.as_deref(), Some("good"));
		assert_eq!(result.rankings.most_reliable.as_deref(), Some("good"));
	}
}
