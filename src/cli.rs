use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;

use dns_bench::{BenchmarkConfig, Provider};

/// DNS provider benchmark tool
#[derive(Parser, Debug)]
#[command(name = "dns-bench")]
#[command(about = "Benchmark DNS providers for latency, reliability and stability")]
pub struct Cli {
	/// Resolver to test (repeatable): 1.1.1.1, 1.1.1.1:53 or Name=primary,secondary
	#[arg(short = 'r', long = "resolver")]
	pub resolvers: Vec<String>,

	/// File containing resolvers (one per line)
	#[arg(short = 'f', long = "resolver-file")]
	pub resolver_file: Option<String>,

	/// YAML or JSON configuration file
	#[arg(long = "config")]
	pub config: Option<PathBuf>,

	/// File containing domains to query (`name [TYPE]` per line)
	#[arg(long = "domains")]
	pub domains: Option<String>,

	/// Number of iterations over every provider and domain [default: 3]
	#[arg(short = 'n', long = "iterations")]
	pub iterations: Option<u32>,

	/// Per-attempt timeout in milliseconds [default: 1500]
	#[arg(short = 't', long = "timeout")]
	pub timeout: Option<u64>,

	/// Maximum concurrent in-flight queries [default: 10]
	#[arg(short = 'c', long = "concurrency")]
	pub concurrency: Option<usize>,

	/// Retries after a retryable failure [default: 3]
	#[arg(long = "retries")]
	pub retries: Option<u32>,

	/// Minimum spacing between queries to the same provider, in milliseconds
	#[arg(long = "spacing")]
	pub spacing: Option<u64>,

	/// Cap on queries in flight against one provider
	#[arg(long = "max-inflight-per-provider")]
	pub max_inflight_per_provider: Option<usize>,

	/// Delay before the first retry, in milliseconds [default: 200]
	#[arg(long = "backoff-base")]
	pub backoff_base: Option<u64>,

	/// Growth factor between retries [default: 2.0]
	#[arg(long = "backoff-multiplier")]
	pub backoff_multiplier: Option<f64>,

	/// Upper bound on a single retry delay, in milliseconds [default: 2500]
	#[arg(long = "backoff-max")]
	pub backoff_max: Option<u64>,

	/// Maximum random jitter added to each retry delay, in milliseconds
	#[arg(long = "backoff-jitter")]
	pub backoff_jitter: Option<u64>,

	/// Mean latency in milliseconds that scores zero [default: 1000]
	#[arg(long = "latency-ceiling")]
	pub latency_ceiling: Option<f64>,

	/// Only benchmark these provider ids (comma-separated)
	#[arg(long = "providers", value_delimiter = ',')]
	pub providers: Vec<String>,

	/// List the providers that would be benchmarked and exit
	#[arg(long = "list-providers")]
	pub list_providers: bool,

	/// Include the operating system's configured resolvers
	#[arg(long = "system-resolvers")]
	pub system_resolvers: bool,

	/// Benchmark built-in simulated providers instead of the network
	#[arg(long = "simulate")]
	pub simulate: bool,

	/// Enable DNSSEC (set DO bit on all queries)
	#[arg(long = "dnssec")]
	pub dnssec: bool,

	/// Output CSV file path
	#[arg(short = 'o', long = "output")]
	pub output: Option<String>,

	/// Write one CSV row per measured job to this path
	#[arg(long = "csv-out")]
	pub csv_out: Option<PathBuf>,

	/// Write per-job measurements as JSON to this path
	#[arg(long = "json-out")]
	pub json_out: Option<PathBuf>,

	/// Print the result as JSON instead of a table
	#[arg(long = "json")]
	pub json: bool,

	/// Random seed for reproducible ordering and jitter
	#[arg(short = 's', long = "seed")]
	pub seed: Option<u64>,
}

impl Cli {
	/// Overlay the flags given on the command line onto `config`.
	pub fn apply(&self, config: &mut BenchmarkConfig) {
		if let Some(v) = self.iterations {
			config.iterations = v;
		}
		if let Some(v) = self.timeout {
			config.timeout = Duration::from_millis(v);
		}
		if let Some(v) = self.concurrency {
			config.concurrency = v;
		}
		if let Some(v) = self.retries {
			config.max_retries = v;
		}
		if let Some(v) = self.spacing {
			config.rate_limit.min_interval = Duration::from_millis(v);
		}
		if let Some(v) = self.max_inflight_per_provider {
			config.rate_limit.max_inflight_per_provider = Some(v);
		}
		if let Some(v) = self.backoff_base {
			config.backoff.base = Duration::from_millis(v);
		}
		if let Some(v) = self.backoff_multiplier {
			config.backoff.multiplier = v;
		}
		if let Some(v) = self.backoff_max {
			config.backoff.max = Some(Duration::from_millis(v));
		}
		if let Some(v) = self.backoff_jitter {
			config.backoff.jitter = Duration::from_millis(v);
		}
		if let Some(v) = self.latency_ceiling {
			config.scoring.latency_ceiling_ms = v;
		}
		if self.seed.is_some() {
			config.seed = self.seed;
		}
	}

	/// Keep only the providers named by `--providers`, in their original order.
	/// Ids match case-insensitively; an unknown id is an error.
	pub fn select_providers(&self, providers: Vec<Provider>) -> Result<Vec<Provider>> {
		if self.providers.is_empty() {
			return Ok(providers);
		}
		let wanted: Vec<String> = self.providers.iter()
			.map(|id| id.trim().to_ascii_lowercase())
			.filter(|id| !id.is_empty())
			.collect();
		for id in &wanted {
			if !providers.iter().any(|p| p.id.eq_ignore_ascii_case(id)) {
				let known: Vec<&str> = providers.iter().map(|p| p.id.as_str()).collect();
				bail!("unknown provider '{}' (available: {})", id, known.join(", "));
			}
		}
		Ok(providers.into_iter()
			.filter(|p| wanted.iter().any(|id| p.id.eq_ignore_ascii_case(id)))
			.collect())
	}
}
