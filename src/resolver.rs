use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, warn};

use crate::transport::Provider;

/// Parse a resolver address string into a socket address.
///
/// Supports formats:
///   "1.1.1.1"              -- IPv4, default port 53
///   "1.1.1.1:53"           -- IPv4 with explicit port
///   "2606:4700::1111"      -- bare IPv6, default port 53
///   "[2606:4700::1111]:53" -- bracketed IPv6 with port
pub fn parse_address(input: &str) -> Result<SocketAddr> {
	let trimmed = input.trim();
	if trimmed.is_empty() {
		return Err(anyhow!("empty resolver address"));
	}

	let addr: SocketAddr = if trimmed.starts_with('[') {
		// Bracketed IPv6 with port: [::1]:53
		trimmed.parse()
			.map_err(|e| anyhow!("invalid bracketed IPv6 address '{}': {}", trimmed, e))?
	} else if trimmed.contains("::") || trimmed.matches(':').count() > 1 {
		// Bare IPv6 address without port
		let ip = trimmed.parse()
			.map_err(|e| anyhow!("invalid IPv6 address '{}': {}", trimmed, e))?;
		SocketAddr::new(ip, 53)
	} else if let Ok(addr) = trimmed.parse::<SocketAddr>() {
		// IPv4 with port (e.g. "8.8.8.8:5353")
		addr
	} else {
		// Plain IPv4 without port
		let ip = trimmed.parse()
			.map_err(|e| anyhow!("invalid IP address '{}': {}", trimmed, e))?;
		SocketAddr::new(ip, 53)
	};
	Ok(addr)
}

/// Lowercase id derived from a display name: "Quad9 Secure" -> "quad9-secure".
pub fn slugify(name: &str) -> String {
	let mut slug = String::with_capacity(name.len());
	for c in name.trim().chars() {
		if c.is_ascii_alphanumeric() || c == '.' {
			slug.push(c.to_ascii_lowercase());
		} else if !slug.ends_with('-') {
			slug.push('-');
		}
	}
	slug.trim_matches('-').to_string()
}

/// Parse a resolver argument into a provider.
///
/// Accepts a bare address ("1.1.1.1") or a named provider with one or more
/// comma-separated addresses ("Cloudflare=1.1.1.1,1.0.0.1"). The first
/// address is the primary.
pub fn parse_resolver(input: &str) -> Result<Provider> {
	let trimmed = input.trim();
	let (name, addrs) = match trimmed.split_once('=') {
		Some((name, addrs)) => (name.trim().to_string(), addrs),
		None => (String::new(), trimmed),
	};

	let addresses = addrs.split(',')
		.map(parse_address)
		.collect::<Result<Vec<_>>>()?;
	let Some(primary) = addresses.first() else {
		return Err(anyhow!("resolver '{}' has no address", trimmed));
	};

	let name = if name.is_empty() {
		primary.ip().to_string()
	} else {
		name
	};
	let id = slugify(&name);
	if id.is_empty() {
		return Err(anyhow!("resolver name '{}' has no usable characters", name));
	}
	Ok(Provider::new(&id, &name, addresses))
}

/// Read resolvers from a file, one per line.
///
/// Blank lines and lines starting with '#' are skipped.
pub fn read_resolver_file(path: &str) -> Result<Vec<Provider>> {
	let content = std::fs::read_to_string(path)
		.with_context(|| format!("failed to read resolver file '{}'", path))?;
	let mut resolvers = Vec::new();
	for (lineno, line) in content.lines().enumerate() {
		let trimmed = line.trim();
		if trimmed.is_empty() || trimmed.starts_with('#') {
			continue;
		}
		let provider = parse_resolver(trimmed)
			.with_context(|| format!("{}:{}", path, lineno + 1))?;
		resolvers.push(provider);
	}
	Ok(resolvers)
}

/// One local provider per distinct nameserver address.
pub fn local_providers(addrs: impl IntoIterator<Item = SocketAddr>) -> Vec<Provider> {
	let mut seen = HashSet::new();
	let mut providers = Vec::new();
	for addr in addrs {
		if !seen.insert(addr) {
			continue;
		}
		let ip = addr.ip().to_string();
		let mut provider = Provider::new(
			&format!("system-{}", slugify(&ip)),
			&format!("System ({})", ip),
			vec![addr],
		);
		provider.category = Some("local".to_string());
		providers.push(provider);
	}
	providers
}

/// Resolvers from the operating system's DNS configuration.
///
/// Returns an empty vec if the configuration cannot be read.
pub fn system_resolvers() -> Vec<Provider> {
	match hickory_resolver::system_conf::read_system_conf() {
		Ok((config, _opts)) => {
			let addrs = config.name_servers().iter().map(|ns| ns.socket_addr);
			let providers = local_providers(addrs);
			debug!(count = providers.len(), "detected system resolvers");
			providers
		}
		Err(e) => {
			warn!("could not read system resolver configuration: {}", e);
			Vec::new()
		}
	}
}

/// Drop providers whose id was already seen, keeping the first.
pub fn dedup_providers(providers: Vec<Provider>) -> Vec<Provider> {
	let mut seen = HashSet::new();
	providers.into_iter()
		.filter(|p| {
			let fresh = seen.insert(p.id.clone());
			if !fresh {
				warn!("ignoring duplicate resolver '{}'", p.id);
			}
			fresh
		})
		.collect()
}

fn v4(a: u8, b: u8, c: u8, d: u8) -> SocketAddr {
	SocketAddr::new(IpAddr::V4(Ipv4Addr::new(a, b, c, d)), 53)
}

fn public(id: &str, name: &str, addresses: Vec<SocketAddr>, tags: &[&str]) -> Provider {
	let mut provider = Provider::new(id, name, addresses);
	provider.category = Some("public".to_string());
	provider.tags = tags.iter().map(|t| t.to_string()).collect();
	provider
}

/// Return a list of well-known default resolvers.
pub fn default_resolvers() -> Vec<Provider> {
	vec![
		public("cloudflare", "Cloudflare", vec![v4(1, 1, 1, 1), v4(1, 0, 0, 1)], &["privacy"]),
		public("google", "Google", vec![v4(8, 8, 8, 8), v4(8, 8, 4, 4)], &[]),
		public("quad9", "Quad9", vec![v4(9, 9, 9, 9), v4(149, 112, 112, 112)], &["security"]),
		public("opendns", "OpenDNS", vec![v4(208, 67, 222, 222), v4(208, 67, 220, 220)], &["filtering"]),
	]
}
