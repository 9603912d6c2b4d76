//! Per-provider admission control and retry backoff.
//!
//! A [`RateGate`] enforces a minimum spacing between queries to one provider.
//! Admission reserves a slot under a short critical section and then sleeps
//! outside of it, so a worker waiting on one provider never delays workers
//! handling another.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::transport::{BackoffPolicy, BenchmarkConfig};

/// Minimum-interval admission gate for a single provider.
#[derive(Debug)]
pub struct RateGate {
	interval: Duration,
	/// Earliest instant the next admission may happen.
	next_slot: Mutex<Option<Instant>>,
}

impl RateGate {
	pub fn new(interval: Duration) -> Self {
		RateGate {
			interval,
			next_slot: Mutex::new(None),
		}
	}

	/// Reserve the next admission slot and return when it opens.
	///
	/// Consecutive reservations are exactly `interval` apart no matter how many
	/// callers race for the gate.
	pub fn reserve(&self) -> Instant {
		let now = Instant::now();
		let mut next = self.next_slot.lock();
		let slot = match *next {
			Some(t) if t > now => t,
			_ => now,
		};
		*next = Some(slot + self.interval);
		slot
	}

	/// Wait until this caller is admitted.
	pub async fn admit(&self) {
		if self.interval.is_zero() {
			return;
		}
		let slot = self.reserve();
		if slot > Instant::now() {
			tokio::time::sleep_until(slot).await;
		}
	}
}

/// Admission limits for one provider.
#[derive(Debug)]
pub struct ProviderLimits {
	pub gate: RateGate,
	inflight: Option<Arc<Semaphore>>,
}

impl ProviderLimits {
	/// Take an in-flight permit (if capped) and pass the spacing gate.
	///
	/// The returned permit must be held for the duration of the attempt.
	pub async fn admit(&self) -> Option<OwnedSemaphorePermit> {
		let permit = match &self.inflight {
			// The semaphore is never closed while the limiter is alive
			Some(sem) => sem.clone().acquire_owned().await.ok(),
			None => None,
		};
		self.gate.admit().await;
		permit
	}
}

/// Map from provider id to its admission limits, built once per run.
#[derive(Debug, Default)]
pub struct RateLimiter {
	providers: HashMap<String, Arc<ProviderLimits>>,
}

impl RateLimiter {
	pub fn from_config(config: &BenchmarkConfig) -> Self {
		let providers = config.providers.iter()
			.map(|p| {
				let limits = ProviderLimits {
					gate: RateGate::new(config.interval_for(p)),
					inflight: config.rate_limit.max_inflight_per_provider
						.map(|n| Arc::new(Semaphore::new(n))),
				};
				(p.id.clone(), Arc::new(limits))
			})
			.collect();
		RateLimiter { providers }
	}

	pub fn limits(&self, provider_id: &str) -> Option<Arc<ProviderLimits>> {
		self.providers.get(provider_id).cloned()
	}
}

/// Retry delay calculator.
///
/// Delay before attempt k (k >= 2) is `base * multiplier^(k-2)`, capped at
/// `max`, plus uniform jitter in `[0, jitter]` when jitter is non-zero.
#[derive(Debug)]
pub struct Backoff {
	policy: BackoffPolicy,
	rng: Mutex<StdRng>,
}

impl Backoff {
	pub fn new(policy: BackoffPolicy, seed: Option<u64>) -> Self {
		let rng = match seed {
			Some(seed) => StdRng::seed_from_u64(seed),
			None => StdRng::from_entropy(),
		};
		Backoff {
			policy,
			rng: Mutex::new(rng),
		}
	}

	/// Deterministic part of the delay before `attempt`.
	pub fn base_delay(&self, attempt: u32) -> Duration {
		if attempt < 2 {
			return Duration::ZERO;
		}
		let exponent = (attempt - 2) as i32;
		let secs = self.policy.base.as_secs_f64() * self.policy.multiplier.powi(exponent);
		let uncapped = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
		match self.policy.max {
			Some(max) => uncapped.min(max),
			None => uncapped,
		}
	}

	/// Full delay before `attempt`, including jitter.
	pub fn delay(&self, attempt: u32) -> Duration {
		let base = self.base_delay(attempt);
		if attempt < 2 {
			return base;
		}
		let jitter = self.policy.jitter;
		if jitter.is_zero() {
			return base;
		}
		let extra = self.rng.lock().gen_range(0.0..=jitter.as_secs_f64());
		base.saturating_add(Duration::from_secs_f64(extra))
	}
}
