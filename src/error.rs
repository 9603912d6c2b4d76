use thiserror::Error;

/// Invalid benchmark input, caught before any query is issued.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
	#[error("at least one provider is required")]
	NoProviders,

	#[error("at least one domain is required")]
	NoDomains,

	#[error("provider '{0}' has no resolver addresses")]
	NoAddresses(String),

	#[error("duplicate provider id '{0}'")]
	DuplicateProvider(String),

	#[error("domain names must not be empty")]
	EmptyDomain,

	#[error("'{0}' is not a valid DNS name")]
	InvalidDomain(String),

	#[error("unknown record type '{0}'")]
	UnknownRecordType(String),

	#[error("iterations must be at least 1")]
	ZeroIterations,

	#[error("query timeout must be greater than zero")]
	ZeroTimeout,

	#[error("concurrency must be at least 1")]
	ZeroConcurrency,

	#[error("per-provider in-flight limit must be at least 1")]
	ZeroProviderInflight,

	#[error("invalid backoff policy: {0}")]
	InvalidBackoff(String),

	#[error("latency ceiling must be a positive number of milliseconds, got {0}")]
	InvalidLatencyCeiling(f64),
}
