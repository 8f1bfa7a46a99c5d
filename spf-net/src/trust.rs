// spf-net/src/trust.rs
//! Which origins may be talked to without TLS, and which hosts the user has
//! explicitly trusted.

use std::fmt;
use std::net::IpAddr;
use std::sync::RwLock;

use spf_common::locator::Locator;
use tracing::{info, warn};

/// Port part of a secure origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortPattern {
    Any,
    /// The origin entry does not constrain the port.
    Unspecified,
    Exact(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPattern {
    Any,
    Name(String),
    Network { addr: IpAddr, prefix: u8 },
}

impl HostPattern {
    /// `*`, a CIDR network such as `127.0.0.0/8`, or a hostname.
    pub fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            return HostPattern::Any;
        }
        if let Some((addr, prefix)) = pattern.split_once('/') {
            if let (Ok(addr), Ok(prefix)) = (addr.parse::<IpAddr>(), prefix.parse::<u8>()) {
                return HostPattern::Network { addr, prefix };
            }
        }
        if let Ok(addr) = pattern.parse::<IpAddr>() {
            let prefix = if addr.is_ipv4() { 32 } else { 128 };
            return HostPattern::Network { addr, prefix };
        }
        HostPattern::Name(pattern.to_string())
    }

    fn matches(&self, host: Option<&str>) -> bool {
        let Some(host) = host else {
            return true;
        };
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        match (self, bare.parse::<IpAddr>()) {
            (HostPattern::Any, _) => true,
            (HostPattern::Network { addr, prefix }, Ok(ip)) => network_contains(*addr, *prefix, ip),
            (HostPattern::Network { addr, .. }, Err(_)) => addr.to_string().eq_ignore_ascii_case(bare),
            (HostPattern::Name(name), _) => name.eq_ignore_ascii_case(bare),
        }
    }
}

fn network_contains(network: IpAddr, prefix: u8, ip: IpAddr) -> bool {
    match (network, ip) {
        (IpAddr::V4(net), IpAddr::V4(ip)) => {
            let prefix = u32::from(prefix.min(32));
            let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
            u32::from(net) & mask == u32::from(ip) & mask
        }
        (IpAddr::V6(net), IpAddr::V6(ip)) => {
            let prefix = u32::from(prefix.min(128));
            let mask = u128::MAX.checked_shl(128 - prefix).unwrap_or(0);
            u128::from(net) & mask == u128::from(ip) & mask
        }
        _ => false,
    }
}

impl fmt::Display for HostPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostPattern::Any => f.write_str("*"),
            HostPattern::Name(name) => f.write_str(name),
            HostPattern::Network { addr, prefix } => write!(f, "{addr}/{prefix}"),
        }
    }
}

/// A `(scheme, host, port)` triple that is considered secure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureOrigin {
    pub scheme: String,
    pub host: HostPattern,
    pub port: PortPattern,
}

impl SecureOrigin {
    fn new(scheme: &str, host: &str, port: PortPattern) -> Self {
        Self {
            scheme: scheme.to_string(),
            host: HostPattern::parse(host),
            port,
        }
    }

    fn matches(&self, scheme: &str, host: Option<&str>, port: Option<u16>) -> bool {
        if self.scheme != "*" && !self.scheme.eq_ignore_ascii_case(scheme) {
            return false;
        }
        if !self.host.matches(host) {
            return false;
        }
        match self.port {
            PortPattern::Any | PortPattern::Unspecified => true,
            PortPattern::Exact(expected) => port == Some(expected),
        }
    }
}

impl fmt::Display for SecureOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let port = match self.port {
            PortPattern::Any => "*".to_string(),
            PortPattern::Unspecified => "None".to_string(),
            PortPattern::Exact(p) => p.to_string(),
        };
        write!(f, "({}, {}, {})", self.scheme, self.host, port)
    }
}

fn builtin_secure_origins() -> Vec<SecureOrigin> {
    vec![
        SecureOrigin::new("https", "*", PortPattern::Any),
        SecureOrigin::new("*", "localhost", PortPattern::Any),
        SecureOrigin::new("*", "127.0.0.0/8", PortPattern::Any),
        SecureOrigin::new("*", "::1/128", PortPattern::Any),
        SecureOrigin::new("file", "*", PortPattern::Unspecified),
        SecureOrigin::new("ssh", "*", PortPattern::Any),
    ]
}

/// Splits `host[:port]` (or `[v6]:port`) into its parts.
fn split_host_port(entry: &str) -> (&str, Option<u16>) {
    if let Some(rest) = entry.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail.strip_prefix(':').and_then(|p| p.parse().ok());
            return (host, port);
        }
    }
    match entry.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host, Some(port)),
            Err(_) => (entry, None),
        },
        _ => (entry, None),
    }
}

/// Secure-origin policy plus the user's trusted-host list.
#[derive(Debug)]
pub struct OriginTrustPolicy {
    builtin: Vec<SecureOrigin>,
    trusted_hosts: RwLock<Vec<String>>,
}

impl Default for OriginTrustPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl OriginTrustPolicy {
    pub fn new() -> Self {
        Self {
            builtin: builtin_secure_origins(),
            trusted_hosts: RwLock::new(Vec::new()),
        }
    }

    pub fn with_trusted_hosts<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let policy = Self::new();
        for host in hosts {
            policy.add_trusted_host(host.as_ref(), None);
        }
        policy
    }

    /// Trusts `host` (optionally `host:port`). Logged every time, even when
    /// the host is already trusted.
    pub fn add_trusted_host(&self, host: &str, source: Option<&str>) {
        let suffix = source.map(|s| format!(" (from {s})")).unwrap_or_default();
        info!("adding trusted host: '{}'{}", host, suffix);

        let mut hosts = match self.trusted_hosts.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !hosts.iter().any(|h| h.eq_ignore_ascii_case(host)) {
            hosts.push(host.to_string());
        }
    }

    pub fn trusted_hosts(&self) -> Vec<String> {
        match self.trusted_hosts.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Whether `host` (and `port`, for entries that name one) was explicitly
    /// trusted. Such hosts are reached without certificate verification.
    pub fn is_trusted_host(&self, host: &str, port: Option<u16>) -> bool {
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        self.trusted_hosts().iter().any(|entry| {
            let (trusted, trusted_port) = split_host_port(entry);
            trusted.eq_ignore_ascii_case(bare) && (trusted_port.is_none() || trusted_port == port)
        })
    }

    /// The built-in origins followed by one entry per trusted host.
    pub fn iter_secure_origins(&self) -> impl Iterator<Item = SecureOrigin> {
        let trusted: Vec<SecureOrigin> = self
            .trusted_hosts()
            .iter()
            .map(|entry| {
                let (host, port) = split_host_port(entry);
                let port = port.map(PortPattern::Exact).unwrap_or(PortPattern::Any);
                SecureOrigin::new("*", host, port)
            })
            .collect();
        self.builtin.clone().into_iter().chain(trusted)
    }

    /// Decides whether an origin is secure. Compound `vcs+transport` schemes
    /// are judged by their transport. Warns once when the answer is no.
    pub fn is_secure(&self, scheme: &str, host: Option<&str>, port: Option<u16>) -> bool {
        let scheme = scheme.rsplit('+').next().unwrap_or(scheme).to_ascii_lowercase();
        if self
            .iter_secure_origins()
            .any(|origin| origin.matches(&scheme, host, port))
        {
            return true;
        }
        let shown = host.unwrap_or_default();
        warn!(
            "The repository located at {} is not a trusted or secure host and is being ignored. If this repository is available via HTTPS we recommend you use HTTPS instead, otherwise you may silence this warning and allow it anyway with '--trusted-host {}'.",
            shown,
            shown
        );
        false
    }

    pub fn is_secure_locator(&self, locator: &Locator) -> bool {
        self.is_secure(locator.transport_scheme(), locator.host(), locator.url().port())
    }
}
