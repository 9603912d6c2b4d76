//! Query primitives that never touch the network.
//!
//! [`SimulatedQuery`] draws latencies and failures from per-server profiles and
//! backs the `--simulate` mode. [`ScriptedQuery`] replays fixed step lists and is
//! what the scheduler tests are written against.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dns::{Answer, DnsQuery, ResolveError};
use crate::transport::{Provider, QueryType};

/// One scripted primitive outcome.
#[derive(Debug, Clone, Copy)]
pub enum Step {
	/// Answer successfully after the given delay.
	Answer(Duration),
	/// Fail immediately.
	Fail(fn() -> ResolveError),
	/// Fail after the given delay.
	FailAfter(Duration, fn() -> ResolveError),
	/// Never answer.
	Hang,
}

/// Deterministic primitive replaying per-server step lists.
///
/// Steps registered for a (server, domain) pair take precedence over steps for
/// the server alone. Once a list is exhausted the fallback step is used.
#[derive(Debug)]
pub struct ScriptedQuery {
	by_domain: Mutex<HashMap<(SocketAddr, String), VecDeque<Step>>>,
	by_server: Mutex<HashMap<SocketAddr, VecDeque<Step>>>,
	fallback: Step,
	calls: Mutex<Vec<(SocketAddr, String)>>,
}

impl Default for ScriptedQuery {
	fn default() -> Self {
		ScriptedQuery::new()
	}
}

impl ScriptedQuery {
	pub fn new() -> Self {
		ScriptedQuery {
			by_domain: Mutex::new(HashMap::new()),
			by_server: Mutex::new(HashMap::new()),
			fallback: Step::Answer(Duration::from_millis(1)),
			calls: Mutex::new(Vec::new()),
		}
	}

	pub fn with_steps(self, server: SocketAddr, steps: Vec<Step>) -> Self {
		self.by_server.lock().insert(server, steps.into());
		self
	}

	pub fn with_domain_steps(self, server: SocketAddr, domain: &str, steps: Vec<Step>) -> Self {
		self.by_domain.lock().insert((server, domain.to_string()), steps.into());
		self
	}

	pub fn with_fallback(mut self, step: Step) -> Self {
		self.fallback = step;
		self
	}

	/// Every (server, domain) the primitive was asked to resolve, in call order.
	pub fn calls(&self) -> Vec<(SocketAddr, String)> {
		self.calls.lock().clone()
	}

	fn next_step(&self, server: SocketAddr, domain: &str) -> Step {
		self.calls.lock().push((server, domain.to_string()));
		if let Some(steps) = self.by_domain.lock().get_mut(&(server, domain.to_string())) {
			if let Some(step) = steps.pop_front() {
				return step;
			}
		}
		if let Some(steps) = self.by_server.lock().get_mut(&server) {
			if let Some(step) = steps.pop_front() {
				return step;
			}
		}
		self.fallback
	}
}

async fn play(step: Step) -> Result<Answer, ResolveError> {
	match step {
		Step::Answer(delay) => {
			tokio::time::sleep(delay).await;
			Ok(Answer { answer_count: 1 })
		}
		Step::Fail(make) => Err(make()),
		Step::FailAfter(delay, make) => {
			tokio::time::sleep(delay).await;
			Err(make())
		}
		Step::Hang => std::future::pending().await,
	}
}

impl DnsQuery for ScriptedQuery {
	fn resolve(
		&self,
		server: SocketAddr,
		domain: &str,
		_record_type: QueryType,
		_timeout: Duration,
	) -> impl Future<Output = Result<Answer, ResolveError>> + Send {
		play(self.next_step(server, domain))
	}
}

/// Latency and failure model for one simulated resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct SimProfile {
	pub min_latency: Duration,
	pub max_latency: Duration,
	pub timeout_rate: f64,
	pub servfail_rate: f64,
	pub network_error_rate: f64,
}

impl Default for SimProfile {
	fn default() -> Self {
		SimProfile {
			min_latency: Duration::from_millis(20),
			max_latency: Duration::from_millis(250),
			timeout_rate: 0.05,
			servfail_rate: 0.05,
			network_error_rate: 0.0,
		}
	}
}

/// Randomized primitive driven by per-server [`SimProfile`]s.
#[derive(Debug)]
pub struct SimulatedQuery {
	profiles: HashMap<SocketAddr, SimProfile>,
	default_profile: SimProfile,
	rng: Mutex<StdRng>,
}

enum SimOutcome {
	Answer(Duration),
	Fail(Duration, ResolveError),
	Stall(Duration),
}

impl SimulatedQuery {
	pub fn new(seed: Option<u64>) -> Self {
		let rng = match seed {
			Some(seed) => StdRng::seed_from_u64(seed),
			None => StdRng::from_entropy(),
		};
		SimulatedQuery {
			profiles: HashMap::new(),
			default_profile: SimProfile::default(),
			rng: Mutex::new(rng),
		}
	}

	pub fn with_profile(mut self, server: SocketAddr, profile: SimProfile) -> Self {
		self.profiles.insert(server, profile);
		self
	}

	fn draw(&self, server: SocketAddr, timeout: Duration) -> SimOutcome {
		let profile = self.profiles.get(&server).unwrap_or(&self.default_profile);
		let mut rng = self.rng.lock();

		let lo = profile.min_latency.as_secs_f64();
		let hi = profile.max_latency.as_secs_f64().max(lo);
		let latency = Duration::from_secs_f64(rng.gen_range(lo..=hi));

		let mut roll: f64 = rng.gen();
		if roll < profile.timeout_rate {
			// Overshoot so the executor's cutoff fires
			return SimOutcome::Stall(timeout.saturating_mul(2));
		}
		roll -= profile.timeout_rate;
		if roll < profile.servfail_rate {
			return SimOutcome::Fail(latency, ResolveError::ServFail);
		}
		roll -= profile.servfail_rate;
		if roll < profile.network_error_rate {
			let err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "simulated reset");
			return SimOutcome::Fail(latency, ResolveError::Io(err));
		}
		SimOutcome::Answer(latency)
	}
}

impl DnsQuery for SimulatedQuery {
	fn resolve(
		&self,
		server: SocketAddr,
		_domain: &str,
		_record_type: QueryType,
		timeout: Duration,
	) -> impl Future<Output = Result<Answer, ResolveError>> + Send {
		let outcome = self.draw(server, timeout);
		async move {
			match outcome {
				SimOutcome::Answer(latency) => {
					tokio::time::sleep(latency).await;
					Ok(Answer { answer_count: 1 })
				}
				SimOutcome::Fail(latency, err) => {
					tokio::time::sleep(latency).await;
					Err(err)
				}
				SimOutcome::Stall(delay) => {
					tokio::time::sleep(delay).await;
					Err(ResolveError::Timeout)
				}
			}
		}
	}
}

/// Built-in simulated providers on documentation addresses (RFC 5737).
///
/// Returns the providers together with a primitive configured for them.
pub fn simulated_catalog(seed: Option<u64>) -> (Vec<Provider>, SimulatedQuery) {
	let entries = [
		("sim-stable", "Simulated Stable", "192.0.2.1:53", SimProfile {
			min_latency: Duration::from_millis(15),
			max_latency: Duration::from_millis(50),
			timeout_rate: 0.01,
			servfail_rate: 0.01,
			network_error_rate: 0.0,
		}),
		("sim-flaky", "Simulated Flaky", "192.0.2.2:53", SimProfile {
			min_latency: Duration::from_millis(30),
			max_latency: Duration::from_millis(300),
			timeout_rate: 0.10,
			servfail_rate: 0.15,
			network_error_rate: 0.05,
		}),
		("sim-slow", "Simulated Slow", "192.0.2.3:53", SimProfile {
			min_latency: Duration::from_millis(100),
			max_latency: Duration::from_millis(600),
			timeout_rate: 0.05,
			servfail_rate: 0.05,
			network_error_rate: 0.0,
		}),
	];

	let mut query = SimulatedQuery::new(seed);
	let mut providers = Vec::new();
	for (id, name, addr, profile) in entries {
		// Literal addresses above always parse
		let Ok(addr) = addr.parse::<SocketAddr>() else { continue };
		let mut provider = Provider::new(id, name, vec![addr]);
		provider.category = Some("simulated".to_string());
		providers.push(provider);
		query = query.with_profile(addr, profile);
	}
	(providers, query)
}
