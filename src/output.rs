use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};

use dns_bench::{BenchmarkConfig, BenchmarkResult, Measurement, Provider, ProviderMetrics};

fn ms(value: Option<f64>) -> String {
	match value {
		Some(v) => format!("{:.1} ms", v),
		None => "-".to_string(),
	}
}

/// Print a summary of the benchmark configuration before running.
pub fn print_config_summary(config: &BenchmarkConfig, simulated: bool) {
	println!("DNS Benchmark Configuration");
	println!("===========================");
	println!("Providers:      {}{}", config.providers.len(), if simulated { " (simulated)" } else { "" });
	for p in &config.providers {
		let addrs: Vec<String> = p.addresses.iter().map(|a| a.to_string()).collect();
		println!("  - {} ({})", p.name, addrs.join(", "));
	}
	println!("Domains:        {}", config.domains.len());
	println!("Iterations:     {}", config.iterations);
	println!("Total jobs:     {}", config.total_jobs());
	println!("Timeout:        {} ms", config.timeout.as_millis());
	println!("Concurrency:    {}", config.concurrency);
	println!("Retries:        {}", config.max_retries);
	if !config.rate_limit.min_interval.is_zero() {
		println!("Spacing:        {} ms", config.rate_limit.min_interval.as_millis());
	}
	if let Some(n) = config.rate_limit.max_inflight_per_provider {
		println!("Per-provider:   {} in flight", n);
	}
	if let Some(seed) = config.seed {
		println!("Seed:           {}", seed);
	}
	println!();
}

/// Print the providers a run would use, then exit.
pub fn print_provider_list(providers: &[Provider]) {
	let mut table = Table::new();
	table.load_preset(UTF8_FULL);
	table.set_content_arrangement(ContentArrangement::Dynamic);
	table.set_header(vec!["Id", "Name", "Addresses", "Category", "Tags"]);
	for p in providers {
		let addrs: Vec<String> = p.addresses.iter().map(|a| a.to_string()).collect();
		table.add_row(vec![
			p.id.clone(),
			p.name.clone(),
			addrs.join(", "),
			p.category.clone().unwrap_or_default(),
			p.tags.join(", "),
		]);
	}
	println!("{table}");
}

/// Print the benchmark results as a formatted table, best overall first.
pub fn print_results_table(result: &BenchmarkResult) {
	let mut table = Table::new();
	table.load_preset(UTF8_FULL);
	table.set_content_arrangement(ContentArrangement::Dynamic);
	table.set_header(vec![
		"Rank", "Provider", "Score",
		"Avg", "p50", "p95",
		"Success %", "Stability",
		"Jobs", "Retries", "Failures",
	]);

	for (i, m) in result.ranked().into_iter().enumerate() {
		let stats = m.latency.as_ref();
		table.add_row(vec![
			format!("{}", i + 1),
			m.name.clone(),
			format!("{:.1}", m.overall_score),
			ms(m.avg_latency_ms),
			ms(stats.map(|s| s.p50_ms)),
			ms(stats.map(|s| s.p95_ms)),
			format!("{:.1}%", m.success_rate),
			format!("{:.1}", m.stability_score),
			format!("{}", m.jobs),
			format!("{}", m.retries),
			format!("{}", m.failures.total()),
		]);
	}

	println!("\nBenchmark Results");
	println!("=================\n");
	println!("{table}");
}

/// Print the category winners and run totals.
pub fn print_rankings(result: &BenchmarkResult) {
	let name = |id: &Option<String>| {
		id.as_deref()
			.and_then(|id| result.provider(id))
			.map(|m| m.name.clone())
			.unwrap_or_else(|| "-".to_string())
	};
	println!();
	println!("Best overall:   {}", name(&result.rankings.best_overall));
	println!("Fastest:        {}", name(&result.rankings.fastest));
	println!("Most reliable:  {}", name(&result.rankings.most_reliable));
	println!("Most stable:    {}", name(&result.rankings.most_stable));
	println!();
	println!(
		"Completed {} of {} jobs in {:.2} s",
		result.completed_jobs,
		result.total_jobs,
		result.elapsed_ms / 1000.0,
	);
	if result.cancelled {
		println!("Run was cancelled; results are partial.");
	}
}

fn csv_row(rank: usize, m: &ProviderMetrics) -> Vec<String> {
	let stats = m.latency.as_ref();
	let opt = |v: Option<f64>| v.map(|v| format!("{:.2}", v)).unwrap_or_default();
	vec![
		rank.to_string(),
		m.id.clone(),
		m.name.clone(),
		format!("{:.2}", m.overall_score),
		opt(m.avg_latency_ms),
		opt(stats.map(|s| s.p50_ms)),
		opt(stats.map(|s| s.p95_ms)),
		opt(stats.map(|s| s.p99_ms)),
		opt(stats.map(|s| s.stddev_ms)),
		format!("{:.1}", m.success_rate),
		format!("{:.2}", m.latency_score),
		format!("{:.2}", m.stability_score),
		m.jobs.to_string(),
		m.successful_jobs.to_string(),
		m.abandoned_jobs.to_string(),
		m.attempts.to_string(),
		m.retries.to_string(),
		m.failures.timeout.to_string(),
		m.failures.nxdomain.to_string(),
		m.failures.servfail.to_string(),
		m.failures.refused.to_string(),
		m.failures.network_error.to_string(),
	]
}

/// Write ranked results as CSV to any writer.
pub fn write_csv_to<W: std::io::Write>(out: W, result: &BenchmarkResult) -> Result<()> {
	let mut writer = csv::Writer::from_writer(out);

	writer.write_record([
		"rank", "id", "provider", "overall_score",
		"avg_ms", "p50_ms", "p95_ms", "p99_ms", "stddev_ms",
		"success_rate", "latency_score", "stability_score",
		"jobs", "successful_jobs", "abandoned_jobs", "attempts", "retries",
		"timeout", "nxdomain", "servfail", "refused", "network_error",
	])?;

	for (i, m) in result.ranked().into_iter().enumerate() {
		writer.write_record(csv_row(i + 1, m))?;
	}

	writer.flush()?;
	Ok(())
}

/// Write benchmark results to a CSV file.
pub fn write_csv(path: &Path, result: &BenchmarkResult) -> Result<()> {
	let file = std::fs::File::create(path)
		.with_context(|| format!("failed to create '{}'", path.display()))?;
	write_csv_to(file, result)?;
	println!("\nResults written to: {}", path.display());
	Ok(())
}

pub fn to_json(result: &BenchmarkResult) -> Result<String> {
	serde_json::to_string_pretty(result).context("failed to serialize results")
}

/// Write benchmark results to a JSON file.
pub fn write_json(path: &Path, result: &BenchmarkResult) -> Result<()> {
	std::fs::write(path, to_json(result)?)
		.with_context(|| format!("failed to write '{}'", path.display()))?;
	println!("\nResults written to: {}", path.display());
	Ok(())
}

/// Write one row per measured job as CSV to any writer.
pub fn write_measurements_csv_to<W: std::io::Write>(out: W, measurements: &[Measurement]) -> Result<()> {
	let mut writer = csv::Writer::from_writer(out);
	for m in measurements {
		writer.serialize(m)?;
	}
	writer.flush()?;
	Ok(())
}

/// Write per-job measurements to a CSV file.
pub fn write_measurements_csv(path: &Path, result: &BenchmarkResult) -> Result<()> {
	let file = std::fs::File::create(path)
		.with_context(|| format!("failed to create '{}'", path.display()))?;
	write_measurements_csv_to(file, &result.measurements)?;
	println!("Measurements written to: {}", path.display());
	Ok(())
}

/// Write per-job measurements to a JSON file.
pub fn write_measurements_json(path: &Path, result: &BenchmarkResult) -> Result<()> {
	let json = serde_json::to_string_pretty(&result.measurements)
		.context("failed to serialize measurements")?;
	std::fs::write(path, json)
		.with_context(|| format!("failed to write '{}'", path.display()))?;
	println!("Measurements written to: {}", path.display());
	Ok(())
}
