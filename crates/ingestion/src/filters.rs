//! Per-project origin-domain and client-IP admission filters.

use std::net::IpAddr;

/// Reduce an `Origin`/`Referer` header value to a bare domain: scheme,
/// `:port`, and any path are stripped.
pub fn origin_domain(origin: &str) -> String {
    let trimmed = origin.trim();
    let without_scheme = match trimmed.find("://") {
        Some(pos) => &trimmed[pos + 3..],
        None => trimmed,
    };
    let without_path = without_scheme
        .split_once('/')
        .map_or(without_scheme, |(host, _)| host);
    let without_port = without_path
        .rsplit_once(':')
        .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
        .map_or(without_path, |(host, _)| host);
    without_port.to_ascii_lowercase()
}

/// An entry matches exactly, or as a `*.suffix` wildcard covering any
/// subdomain. A request with no resolvable origin never matches.
pub fn domain_allowed(origin: Option<&str>, allowed_domains: &[String]) -> bool {
    let Some(origin) = origin.map(origin_domain).filter(|d| !d.is_empty()) else {
        return false;
    };
    allowed_domains.iter().any(|entry| {
        let entry = entry.trim().to_ascii_lowercase();
        match entry.strip_prefix("*.") {
            Some(suffix) => origin.ends_with(&format!(".{suffix}")),
            None => origin == entry,
        }
    })
}

/// An entry matches as a parsed IP equality or as CIDR containment.
/// Unparsable client IPs and unparsable entries never match.
pub fn ip_allowed(client_ip: &str, allowed_ips: &[String]) -> bool {
    let Ok(ip) = client_ip.trim().parse::<IpAddr>() else {
        return false;
    };
    allowed_ips.iter().any(|entry| {
        let entry = entry.trim();
        if let Ok(allowed) = entry.parse::<IpAddr>() {
            return allowed == ip;
        }
        cidr_contains(entry, ip).unwrap_or(false)
    })
}

/// `a.b.c.d/n` (or v6 equivalent) containment. `None` when the entry is not
/// a CIDR block or the families differ.
fn cidr_contains(cidr: &str, ip: IpAddr) -> Option<bool> {
    let (base, prefix_len) = cidr.split_once('/')?;
    let base: IpAddr = base.trim().parse().ok()?;
    let prefix_len: u32 = prefix_len.trim().parse().ok()?;
    match (base, ip) {
        (IpAddr::V4(base), IpAddr::V4(ip)) => {
            if prefix_len > 32 {
                return None;
            }
            let mask = if prefix_len == 0 {
                0
            } else {
                u32::MAX << (32 - prefix_len)
            };
            Some(u32::from(base) & mask == u32::from(ip) & mask)
        },
        (IpAddr::V6(base), IpAddr::V6(ip)) => {
            if prefix_len > 128 {
                return None;
            }
            let mask = if prefix_len == 0 {
                0
            } else {
                u128::MAX << (128 - prefix_len)
            };
            Some(u128::from(base) & mask == u128::from(ip) & mask)
        },
        _ => Some(false),
    }
}
