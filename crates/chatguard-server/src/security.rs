//! Upstream URL validation
//!
//! The completion API base URL comes from configuration. It is checked once
//! at startup so a misconfigured relay cannot be pointed at metadata services
//! or internal hosts with the API credential attached.

use std::net::IpAddr;
use thiserror::Error;
use url::Url;

use crate::config::UpstreamConfig;

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("invalid upstream URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("upstream scheme '{0}' is not allowed, only HTTPS is permitted")]
    InvalidScheme(String),

    #[error("upstream host '{0}' is blocked: local and private addresses are not allowed")]
    BlockedHost(String),

    #[error("upstream URL must have a host")]
    MissingHost,
}

/// Hostnames that never receive the API credential
const BLOCKED_HOSTNAMES: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "ip6-localhost",
    "ip6-loopback",
    "metadata.google.internal",
    "metadata.goog",
];

/// What the upstream URL is allowed to be
#[derive(Debug, Clone, Copy, Default)]
pub struct UpstreamUrlPolicy {
    pub allow_http: bool,
    pub allow_local: bool,
}

impl UpstreamUrlPolicy {
    /// Policy for a configured upstream
    pub fn for_upstream(config: &UpstreamConfig) -> Self {
        if config.allow_insecure {
            Self {
                allow_http: true,
                allow_local: true,
            }
        } else {
            Self::default()
        }
    }
}

/// Validate the upstream base URL against `policy`
pub fn validate_upstream_url(url_str: &str, policy: UpstreamUrlPolicy) -> Result<Url, SecurityError> {
    let url = Url::parse(url_str)?;

    match url.scheme() {
        "https" => {}
        "http" if policy.allow_http => {}
        scheme => return Err(SecurityError::InvalidScheme(scheme.to_string())),
    }

    let host = url.host_str().ok_or(SecurityError::MissingHost)?;

    // Cloud metadata endpoints are link-local and stay blocked regardless.
    if let Ok(ip) = host.trim_matches(|c: char| c == '[' || c == ']').parse::<IpAddr>() {
        if is_link_local(&ip) || (!policy.allow_local && (ip.is_loopback() || is_private(&ip))) {
            return Err(SecurityError::BlockedHost(host.to_string()));
        }
        return Ok(url);
    }

    if !policy.allow_local {
        let host_lower = host.to_lowercase();
        let blocked = BLOCKED_HOSTNAMES
            .iter()
            .any(|b| host_lower == *b || host_lower.ends_with(&format!(".{}", b)));
        if blocked {
            return Err(SecurityError::BlockedHost(host.to_string()));
        }
    }

    Ok(url)
}

fn is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            v4.is_private()
                // 100.64.0.0/10 carrier-grade NAT
                || (octets[0] == 100 && (octets[1] & 0xC0) == 64)
                || octets[0] == 0
        }
        // fc00::/7 unique local
        IpAddr::V6(v6) => (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

fn is_link_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}
