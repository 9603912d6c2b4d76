//! Concurrent DNS provider benchmarking engine.
//!
//! A [`Benchmark`] expands providers x domains x iterations into jobs, runs
//! them through a bounded worker pool with per-provider rate limiting and
//! retry backoff, and folds every attempt into a [`BenchmarkResult`].

pub mod aggregate;
pub mod bench;
pub mod config;
pub mod dns;
pub mod domains;
pub mod error;
pub mod executor;
pub mod limiter;
pub mod report;
pub mod resolver;
pub mod sim;
pub mod stats;
pub mod transport;

pub use bench::{Benchmark, CancelHandle, CancelSignal};
pub use dns::{Answer, DnsQuery, ResolveError, UdpQuery};
pub use error::ConfigError;
pub use report::{BenchmarkResult, Measurement, ProviderMetrics, Rankings};
pub use transport::{BenchmarkConfig, Domain, FailureKind, Provider, QueryResult, QueryType};
