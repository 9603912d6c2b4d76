mod cli;
mod output;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dns_bench::config::{self, FileConfig, OutputFormat};
use dns_bench::{domains, resolver, sim};
use dns_bench::{Benchmark, BenchmarkConfig, BenchmarkResult, CancelHandle, DnsQuery, Provider, UdpQuery};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| "dns_bench=info".into()),
		)
		.with_writer(std::io::stderr)
		.init();

	let cli = Cli::parse();

	let file = match &cli.config {
		Some(path) => Some(config::load(path)?),
		None => None,
	};
	let mut config = match &file {
		Some(file) => file.to_benchmark_config()?,
		None => BenchmarkConfig::default(),
	};
	cli.apply(&mut config);

	let simulated = if cli.simulate {
		let (providers, query) = sim::simulated_catalog(config.seed);
		config.providers = providers;
		Some(query)
	} else {
		config.providers = gather_providers(&cli, std::mem::take(&mut config.providers))?;
		None
	};
	config.providers = cli.select_providers(std::mem::take(&mut config.providers))?;

	if cli.list_providers {
		output::print_provider_list(&config.providers);
		return Ok(());
	}

	if let Some(path) = &cli.domains {
		config.domains = domains::read_domain_file(path)?;
	}
	if config.domains.is_empty() {
		config.domains = domains::default_domains();
	}

	let result = match simulated {
		Some(query) => run(config, query, &cli).await?,
		None => run(config, UdpQuery::new(cli.dnssec), &cli).await?,
	};

	render(&cli, file.as_ref(), &result)
}

/// Resolvers named on the command line replace those from the config file.
fn gather_providers(cli: &Cli, from_file: Vec<Provider>) -> Result<Vec<Provider>> {
	let mut providers = Vec::new();
	for r in &cli.resolvers {
		providers.push(resolver::parse_resolver(r)?);
	}
	if let Some(path) = &cli.resolver_file {
		providers.extend(resolver::read_resolver_file(path)?);
	}
	if providers.is_empty() {
		providers = from_file;
	}
	if cli.system_resolvers {
		providers.extend(resolver::system_resolvers());
	}
	if providers.is_empty() {
		providers = resolver::default_resolvers();
	}
	Ok(resolver::dedup_providers(providers))
}

async fn run<Q: DnsQuery>(config: BenchmarkConfig, query: Q, cli: &Cli) -> Result<BenchmarkResult> {
	let bench = Benchmark::new(config, query).context("invalid benchmark configuration")?;
	if !cli.json {
		output::print_config_summary(bench.config(), cli.simulate);
		println!("Running benchmark...");
	}

	let (handle, signal) = CancelHandle::new();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			warn!("interrupted; waiting for in-flight queries");
			handle.cancel();
		}
	});

	let result = bench.run(signal).await;
	info!(
		completed = result.completed_jobs,
		total = result.total_jobs,
		"run complete"
	);
	Ok(result)
}

fn render(cli: &Cli, file: Option<&FileConfig>, result: &BenchmarkResult) -> Result<()> {
	if cli.json {
		println!("{}", output::to_json(result)?);
	} else {
		output::print_results_table(result);
		output::print_rankings(result);
	}

	if let Some(path) = &cli.output {
		output::write_csv(std::path::Path::new(path), result)?;
	}
	if let Some(path) = &cli.csv_out {
		output::write_measurements_csv(path, result)?;
	}
	if let Some(path) = &cli.json_out {
		output::write_measurements_json(path, result)?;
	}

	// Config file output section, used when no output flag was given
	if cli.output.is_none() {
		if let Some(out) = file.map(|f| &f.output) {
			match (out.format, &out.path) {
				(Some(OutputFormat::Csv), Some(path)) => output::write_csv(path, result)?,
				(Some(OutputFormat::Json), Some(path)) => output::write_json(path, result)?,
				_ => {}
			}
		}
	}
	Ok(())
}
