use anyhow::{anyhow, Context, Result};

use crate::transport::{Domain, QueryType};

/// Return a default set of popular domains spread over a few record types.
pub fn default_domains() -> Vec<Domain> {
	let general = [
		"google.com",
		"youtube.com",
		"facebook.com",
		"amazon.com",
		"wikipedia.org",
		"reddit.com",
		"microsoft.com",
		"apple.com",
	];
	let cdn = ["cloudflare.com", "akamai.com", "fastly.com"];

	let mut domains: Vec<Domain> = general.iter()
		.map(|name| categorized(name, QueryType::A, "general"))
		.collect();
	domains.extend(cdn.iter().map(|name| categorized(name, QueryType::A, "cdn")));
	domains.push(categorized("google.com", QueryType::AAAA, "general"));
	domains.push(categorized("gmail.com", QueryType::MX, "mail"));
	domains
}

fn categorized(name: &str, record_type: QueryType, category: &str) -> Domain {
	let mut domain = Domain::with_type(name, record_type);
	domain.category = Some(category.to_string());
	domain
}

/// Parse one domain line: `name [TYPE]`. The record type defaults to A.
pub fn parse_domain_line(line: &str) -> Result<Domain> {
	let mut parts = line.split_whitespace();
	let name = parts.next().ok_or_else(|| anyhow!("empty domain line"))?;
	let record_type = match parts.next() {
		Some(t) => t.parse::<QueryType>()?,
		None => QueryType::A,
	};
	if let Some(extra) = parts.next() {
		return Err(anyhow!("unexpected '{}' after record type", extra));
	}
	Ok(Domain::with_type(name.trim_end_matches('.'), record_type))
}

/// Read domains from a file, one per line.
///
/// Blank lines and lines starting with '#' are skipped.
pub fn read_domain_file(path: &str) -> Result<Vec<Domain>> {
	let content = std::fs::read_to_string(path)
		.with_context(|| format!("failed to read domain file '{}'", path))?;
	let mut domains = Vec::new();
	for (lineno, line) in content.lines().enumerate() {
		let trimmed = line.trim();
		if trimmed.is_empty() || trimmed.starts_with('#') {
			continue;
		}
		let domain = parse_domain_line(trimmed)
			.with_context(|| format!("{}:{}", path, lineno + 1))?;
		domains.push(domain);
	}
	Ok(domains)
}
