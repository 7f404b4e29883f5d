//! Request fingerprint generation.

use std::net::IpAddr;

use crate::middleware::RequestInfo;

/// Address used when a request carries no usable client address.
pub const UNKNOWN_ADDRESS: &str = "0.0.0.0";

/// Header consulted first when resolving the client address.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// The (client address, method, path) triple that identifies a caller.
///
/// The address is canonicalized on construction so that loopback callers
/// collide regardless of address family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    /// Canonical client address
    pub address: String,
    /// Request method, as received
    pub method: String,
    /// Request path, as received
    pub path: String,
}

impl Fingerprint {
    /// Create a fingerprint from its parts.
    pub fn new(address: &str, method: &str, path: &str) -> Self {
        Self {
            address: canonicalize_address(address),
            method: method.to_string(),
            path: path.to_string(),
        }
    }

    /// Create a fingerprint for a request.
    pub fn from_request(request: &RequestInfo) -> Self {
        Self {
            address: resolve_client_address(request),
            method: request.method.clone(),
            path: request.path.clone(),
        }
    }

    /// Render the triple as `[address][method][path]`.
    ///
    /// `\` and `]` are backslash-escaped inside each segment, so distinct
    /// triples always render to distinct keys.
    pub fn to_string_key(&self) -> String {
        let mut key = String::with_capacity(self.address.len() + self.method.len() + self.path.len() + 6);
        for segment in [&self.address, &self.method, &self.path] {
            key.push('[');
            for c in segment.chars() {
                if matches!(c, '\\' | ']') {
                    key.push('\\');
                }
                key.push(c);
            }
            key.push(']');
        }
        key
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}

/// Compute the store key for a request.
pub fn fingerprint(request: &RequestInfo) -> String {
    Fingerprint::from_request(request).to_string_key()
}

/// Resolve the client address of a request.
///
/// Fallback order: first entry of `x-forwarded-for` (all whitespace
/// stripped), the framework-provided address, the transport peer address,
/// then [`UNKNOWN_ADDRESS`].
pub fn resolve_client_address(request: &RequestInfo) -> String {
    let forwarded = request.header(FORWARDED_FOR_HEADER).and_then(|value| {
        let stripped: String = value.chars().filter(|c| !c.is_whitespace()).collect();
        stripped
            .split(',')
            .next()
            .filter(|first| !first.is_empty())
            .map(str::to_string)
    });

    let address = forwarded
        .or_else(|| request.ip.clone().filter(|ip| !ip.trim().is_empty()))
        .or_else(|| request.peer_addr.map(|addr| addr.ip().to_string()));

    match address {
        Some(address) => canonicalize_address(&address),
        None => UNKNOWN_ADDRESS.to_string(),
    }
}

/// Canonicalize an address literal.
///
/// The IPv6 loopback becomes `127.0.0.1` and IPv4-mapped IPv6 addresses
/// become their IPv4 form. Anything that does not parse as an IP address is
/// returned trimmed but otherwise unchanged.
pub fn canonicalize_address(address: &str) -> String {
    let trimmed = address.trim();
    let bare = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(trimmed);

    match bare.parse::<IpAddr>() {
        Ok(IpAddr::V6(v6)) if v6.is_loopback() => "127.0.0.1".to_string(),
        Ok(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => v6.to_string(),
        },
        Ok(IpAddr::V4(v4)) => v4.to_string(),
        Err(_) => trimmed.to_string(),
    }
}
