use serde::Serialize;

/// Weight of mean latency in the overall score.
pub const LATENCY_WEIGHT: f64 = 0.40;
/// Weight of success rate in the overall score.
pub const SUCCESS_WEIGHT: f64 = 0.35;
/// Weight of stability in the overall score.
pub const STABILITY_WEIGHT: f64 = 0.25;

/// Share of the latency-consistency term inside the stability score.
pub const STABILITY_LATENCY_SHARE: f64 = 0.6;
/// Share of the success-consistency term inside the stability score.
pub const STABILITY_SUCCESS_SHARE: f64 = 0.4;

/// Coefficient of variation at which latency consistency bottoms out at 0.
pub const CV_CEILING: f64 = 1.0;

/// Upper bound on chronological buckets used for success consistency.
pub const MAX_STABILITY_BUCKETS: usize = 4;

/// Latency distribution over successful queries, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyStats {
	pub samples: usize,
	pub min_ms: f64,
	pub max_ms: f64,
	pub mean_ms: f64,
	pub stddev_ms: f64,
	pub p50_ms: f64,
	pub p95_ms: f64,
	pub p99_ms: f64,
}

impl LatencyStats {
	/// Compute stats from raw latencies. Returns `None` ("no data") for an empty slice.
	pub fn from_latencies(latencies_ms: &[f64]) -> Option<LatencyStats> {
		let mut sorted = latencies_ms.to_vec();
		sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

		Some(LatencyStats {
			samples: sorted.len(),
			min_ms: *sorted.first()?,
			max_ms: *sorted.last()?,
			mean_ms: mean(&sorted)?,
			stddev_ms: stddev(&sorted)?,
			p50_ms: percentile(&sorted, 50.0)?,
			p95_ms: percentile(&sorted, 95.0)?,
			p99_ms: percentile(&sorted, 99.0)?,
		})
	}

	/// Standard deviation relative to the mean.
	pub fn coefficient_of_variation(&self) -> f64 {
		if self.mean_ms > 0.0 {
			self.stddev_ms / self.mean_ms
		} else {
			0.0
		}
	}
}

/// Calculate the p-th percentile from a sorted slice using nearest-rank method.
///
/// Args:
///   sorted_values: Pre-sorted slice of f64 values.
///   p: Percentile between 0.0 and 100.0 (e.g. 50.0 for median).
///
/// Returns:
///   None if the slice is empty, otherwise the percentile value.
pub fn percentile(sorted_values: &[f64], p: f64) -> Option<f64> {
	if sorted_values.is_empty() {
		return None;
	}
	let n = sorted_values.len();
	// Nearest-rank: rank = ceil(p/100 * N). The epsilon keeps exact products
	// such as 0.95 * 20 from rounding up a whole rank.
	let rank = ((p / 100.0) * n as f64 - 1e-9).ceil() as usize;
	let rank = rank.clamp(1, n);
	Some(sorted_values[rank - 1])
}

/// Calculate the arithmetic mean of a slice of values.
pub fn mean(values: &[f64]) -> Option<f64> {
	if values.is_empty() {
		return None;
	}
	let sum: f64 = values.iter().sum();
	Some(sum / values.len() as f64)
}

/// Calculate the population standard deviation of a slice of values.
pub fn stddev(values: &[f64]) -> Option<f64> {
	let avg = mean(values)?;
	let variance = values.iter()
		.map(|v| (v - avg).powi(2))
		.sum::<f64>() / values.len() as f64;
	Some(variance.sqrt())
}

fn clamp_score(value: f64) -> f64 {
	if value.is_nan() {
		return 0.0;
	}
	value.clamp(0.0, 100.0)
}

/// Map mean latency onto 0-100: 0 ms scores 100, `ceiling_ms` or slower scores 0,
/// linear in between. No data scores 0.
pub fn latency_score(mean_ms: Option<f64>, ceiling_ms: f64) -> f64 {
	match mean_ms {
		Some(mean) if ceiling_ms > 0.0 => clamp_score(100.0 * (1.0 - mean / ceiling_ms)),
		_ => 0.0,
	}
}

/// Map a coefficient of variation onto 0-100; lower variation scores higher.
pub fn latency_consistency(cv: f64) -> f64 {
	clamp_score(100.0 * (1.0 - cv / CV_CEILING))
}

/// Number of chronological buckets for a run with `iterations` iterations.
pub fn bucket_count(iterations: u32) -> usize {
	(iterations as usize).clamp(1, MAX_STABILITY_BUCKETS)
}

/// Bucket index for a 0-based iteration.
pub fn bucket_for(iteration: u32, iterations: u32) -> usize {
	let buckets = bucket_count(iterations);
	let iterations = iterations.max(1) as usize;
	((iteration as usize) * buckets / iterations).min(buckets - 1)
}

/// Score how evenly successes are spread across chronological buckets.
///
/// Each entry is `(successful_jobs, completed_jobs)` for one bucket; empty
/// buckets are ignored. Returns `None` when fewer than two buckets hold data.
pub fn success_consistency(buckets: &[(usize, usize)]) -> Option<f64> {
	let populated: Vec<(usize, usize)> = buckets.iter()
		.copied()
		.filter(|&(_, total)| total > 0)
		.collect();
	if populated.len() < 2 {
		return None;
	}

	let successes: usize = populated.iter().map(|&(s, _)| s).sum();
	let total: usize = populated.iter().map(|&(_, t)| t).sum();
	let overall = 100.0 * successes as f64 / total as f64;

	let mean_sq_dev = populated.iter()
		.map(|&(s, t)| {
			let rate = 100.0 * s as f64 / t as f64;
			(rate - overall).powi(2)
		})
		.sum::<f64>() / populated.len() as f64;

	// Rates live in [0, 100], so the deviation is at most 50
	Some(clamp_score(100.0 - 2.0 * mean_sq_dev.sqrt()))
}

/// Blend the two consistency terms, renormalizing when one is undefined.
pub fn stability_score(latency_term: Option<f64>, success_term: Option<f64>) -> f64 {
	match (latency_term, success_term) {
		(Some(l), Some(s)) => clamp_score(STABILITY_LATENCY_SHARE * l + STABILITY_SUCCESS_SHARE * s),
		(Some(l), None) => clamp_score(l),
		(None, Some(s)) => clamp_score(s),
		(None, None) => 0.0,
	}
}

/// `0.40 * latency_score + 0.35 * success_rate + 0.25 * stability`
pub fn overall_score(latency_score: f64, success_rate: f64, stability: f64) -> f64 {
	clamp_score(
		LATENCY_WEIGHT * latency_score
			+ SUCCESS_WEIGHT * success_rate
			+ STABILITY_WEIGHT * stability,
	)
}
