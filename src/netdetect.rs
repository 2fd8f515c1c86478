use anyhow::Result;
use if_addrs::{get_if_addrs, IfAddr};
use ipnet::{IpNet, Ipv4Net};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};

use crate::error::ScanError;

/// Target used when nothing is configured and no interface could be detected.
pub const FALLBACK_TARGET: &str = "127.0.0.1";

/// Detect local non-loopback IPv4 addresses and convert each to a default /24 CIDR network.
///
/// For example, an interface IP `192.168.1.42` becomes `192.168.1.0/24`.
/// Duplicates are removed.
pub fn detect_local_cidrs() -> Result<Vec<IpNet>> {
    let mut set = HashSet::<Ipv4Net>::new();
    for iface in get_if_addrs()? {
        if let IfAddr::V4(v4) = iface.addr {
            let ip = v4.ip;
            if ip.is_loopback() {
                continue;
            }
            set.insert(ipv4_to_default_cidr(ip));
        }
    }
    let mut cidrs: Vec<IpNet> = set.into_iter().map(IpNet::V4).collect();
    // Sort for stable output
    cidrs.sort_by_key(|n| match n {
        IpNet::V4(n4) => (u32::from(n4.network()), n4.prefix_len()),
        IpNet::V6(_) => (0, 0),
    });
    Ok(cidrs)
}

/// Scan target for requests that did not name one: the first local /24, else loopback.
pub fn default_target() -> String {
    match detect_local_cidrs() {
        Ok(cidrs) => cidrs
            .first()
            .map(ToString::to_string)
            .unwrap_or_else(|| FALLBACK_TARGET.to_string()),
        Err(e) => {
            tracing::warn!(error = %e, "failed to detect local networks");
            FALLBACK_TARGET.to_string()
        }
    }
}

/// Helper: convert an IPv4 address into its default /24 network.
pub fn ipv4_to_default_cidr(ip: Ipv4Addr) -> Ipv4Net {
    let o = ip.octets();
    let net = Ipv4Addr::new(o[0], o[1], o[2], 0);
    Ipv4Net::new(net, 24).expect("/24 is always valid")
}

/// Accept an IP address, a CIDR range, or a plain hostname.
///
/// The target ends up on the scanner's command line, so anything that could be
/// read as an option (leading `-`) or carries shell-ish characters is refused.
pub fn validate_target(target: &str) -> Result<(), ScanError> {
    let invalid = |reason: &str| ScanError::InvalidTarget {
        target: target.to_string(),
        reason: reason.to_string(),
    };

    if target.is_empty() {
        return Err(invalid("empty target"));
    }
    if target.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    if target.contains('/') {
        return target
            .parse::<IpNet>()
            .map(|_| ())
            .map_err(|e| invalid(&e.to_string()));
    }
    if target.starts_with('-') || target.starts_with('.') {
        return Err(invalid("must start with a letter or digit"));
    }
    if target.len() > 253 {
        return Err(invalid("hostname too long"));
    }
    if !target
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(invalid("only letters, digits, '.' and '-' are allowed"));
    }
    Ok(())
}
