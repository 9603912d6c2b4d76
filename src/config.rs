//! YAML/JSON configuration files.
//!
//! ```yaml
//! providers:
//!   - name: Google
//!     primary_ip: 8.8.8.8
//!     secondary_ip: 8.8.4.4
//!     category: public
//! domains:
//!   - name: example.com
//!     record_type: AAAA
//! benchmark:
//!   iterations: 5
//!   timeout_ms: 2000
//!   concurrency: 20
//! ```
//!
//! Every `benchmark` key is optional; missing keys keep the
//! [`BenchmarkConfig`] defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::resolver::{parse_address, slugify};
use crate::transport::{BenchmarkConfig, Domain, Provider, QueryType};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
	pub providers: Vec<ProviderEntry>,
	pub domains: Vec<DomainEntry>,
	pub benchmark: BenchmarkSection,
	pub output: OutputSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEntry {
	pub name: String,
	/// Defaults to a slug of `name`.
	pub id: Option<String>,
	pub primary_ip: String,
	pub secondary_ip: Option<String>,
	pub category: Option<String>,
	#[serde(default)]
	pub tags: Vec<String>,
	pub min_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DomainEntry {
	pub name: String,
	pub record_type: Option<String>,
	pub category: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BenchmarkSection {
	pub iterations: Option<u32>,
	pub timeout_ms: Option<u64>,
	#[serde(alias = "concurrent_queries")]
	pub concurrency: Option<usize>,
	pub retries: Option<u32>,
	pub rate_limit_ms: Option<u64>,
	pub max_inflight_per_provider: Option<usize>,
	pub backoff_base_ms: Option<u64>,
	pub backoff_multiplier: Option<f64>,
	pub backoff_max_ms: Option<u64>,
	pub backoff_jitter_ms: Option<u64>,
	pub latency_ceiling_ms: Option<f64>,
	pub seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
	Table,
	Json,
	Csv,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutputSection {
	pub format: Option<OutputFormat>,
	pub path: Option<PathBuf>,
}

/// Load a configuration file. The format is chosen by extension.
pub fn load(path: &Path) -> Result<FileConfig> {
	let content = std::fs::read_to_string(path)
		.with_context(|| format!("failed to read config file '{}'", path.display()))?;
	if content.trim().is_empty() {
		return Ok(FileConfig::default());
	}

	let ext = path.extension()
		.and_then(|e| e.to_str())
		.map(|e| e.to_ascii_lowercase());
	let config = match ext.as_deref() {
		Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
			.with_context(|| format!("invalid YAML in '{}'", path.display()))?,
		Some("json") => serde_json::from_str(&content)
			.with_context(|| format!("invalid JSON in '{}'", path.display()))?,
		_ => bail!(
			"unsupported config format for '{}': use .yaml, .yml or .json",
			path.display()
		),
	};
	Ok(config)
}

impl ProviderEntry {
	pub fn to_provider(&self) -> Result<Provider> {
		let mut addresses = vec![parse_address(&self.primary_ip)
			.with_context(|| format!("provider '{}': bad primary_ip", self.name))?];
		if let Some(secondary) = &self.secondary_ip {
			addresses.push(parse_address(secondary)
				.with_context(|| format!("provider '{}': bad secondary_ip", self.name))?);
		}

		let id = match &self.id {
			Some(id) => id.clone(),
			None => slugify(&self.name),
		};
		let mut provider = Provider::new(&id, &self.name, addresses);
		provider.category = self.category.clone();
		provider.tags = self.tags.clone();
		provider.min_interval = self.min_interval_ms.map(Duration::from_millis);
		Ok(provider)
	}
}

impl DomainEntry {
	pub fn to_domain(&self) -> Result<Domain> {
		let record_type = match &self.record_type {
			Some(t) => t.parse::<QueryType>()
				.with_context(|| format!("domain '{}'", self.name))?,
			None => QueryType::A,
		};
		let mut domain = Domain::with_type(&self.name, record_type);
		domain.category = self.category.clone();
		Ok(domain)
	}
}

impl BenchmarkSection {
	/// Overlay the keys present in the file onto `config`.
	pub fn apply(&self, config: &mut BenchmarkConfig) {
		if let Some(v) = self.iterations {
			config.iterations = v;
		}
		if let Some(v) = self.timeout_ms {
			config.timeout = Duration::from_millis(v);
		}
		if let Some(v) = self.concurrency {
			config.concurrency = v;
		}
		if let Some(v) = self.retries {
			config.max_retries = v;
		}
		if let Some(v) = self.rate_limit_ms {
			config.rate_limit.min_interval = Duration::from_millis(v);
		}
		if let Some(v) = self.max_inflight_per_provider {
			config.rate_limit.max_inflight_per_provider = Some(v);
		}
		if let Some(v) = self.backoff_base_ms {
			config.backoff.base = Duration::from_millis(v);
		}
		if let Some(v) = self.backoff_multiplier {
			config.backoff.multiplier = v;
		}
		if let Some(v) = self.backoff_max_ms {
			config.backoff.max = Some(Duration::from_millis(v));
		}
		if let Some(v) = self.backoff_jitter_ms {
			config.backoff.jitter = Duration::from_millis(v);
		}
		if let Some(v) = self.latency_ceiling_ms {
			config.scoring.latency_ceiling_ms = v;
		}
		if self.seed.is_some() {
			config.seed = self.seed;
		}
	}
}

impl FileConfig {
	pub fn providers(&self) -> Result<Vec<Provider>> {
		self.providers.iter().map(ProviderEntry::to_provider).collect()
	}

	pub fn domains(&self) -> Result<Vec<Domain>> {
		self.domains.iter().map(DomainEntry::to_domain).collect()
	}

	/// Build an (unvalidated) benchmark config from the file alone.
	pub fn to_benchmark_config(&self) -> Result<BenchmarkConfig> {
		let mut config = BenchmarkConfig {
			providers: self.providers()?,
			domains: self.domains()?,
			..BenchmarkConfig::default()
		};
		self.benchmark.apply(&mut config);
		Ok(config)
	}
}
