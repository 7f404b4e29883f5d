//! The request fields the guard reads from its host.

use std::collections::HashMap;
use std::net::SocketAddr;

/// Name of the header carrying request cookies.
const COOKIE_HEADER: &str = "cookie";

/// A host-agnostic view of an incoming request.
///
/// Hosts fill in what they know; every field except `method` and `path` is
/// optional. Header names are case-insensitive and a header may be given
/// several times.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    /// Request method, e.g. `GET`
    pub method: String,
    /// Request path without the query string
    pub path: String,
    /// Client address as resolved by the host framework
    pub ip: Option<String>,
    /// Transport peer address
    pub peer_addr: Option<SocketAddr>,
    /// Cookies already parsed by the host, preferred over the `Cookie` header
    pub cookies: Option<HashMap<String, String>>,
    /// Request scheme, e.g. `http` or `https`
    pub protocol: String,
    /// Host name the request was addressed to
    pub hostname: String,
    headers: HashMap<String, Vec<String>>,
}

impl RequestInfo {
    /// Create a plain-http request descriptor.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            protocol: "http".to_string(),
            ..Self::default()
        }
    }

    /// Add a header value. Repeated names accumulate.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    /// Add a pre-parsed cookie.
    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// All values of a header, in arrival order.
    pub fn header_values(&self, name: &str) -> &[String] {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// A header's values joined with `,`.
    pub fn header(&self, name: &str) -> Option<String> {
        let values = self.header_values(name);
        if values.is_empty() {
            None
        } else {
            Some(values.join(","))
        }
    }

    /// Look up a cookie, first in the pre-parsed cookies, then in the
    /// `Cookie` header.
    pub fn cookie(&self, name: &str) -> Option<String> {
        if let Some(value) = self.cookies.as_ref().and_then(|cookies| cookies.get(name)) {
            return Some(value.clone());
        }

        self.header_values(COOKIE_HEADER)
            .iter()
            .flat_map(|header| header.split(';'))
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| key.trim() == name)
            .map(|(_, value)| value.trim().to_string())
    }

    /// Whether the request arrived over TLS.
    pub fn is_secure(&self) -> bool {
        matches!(self.protocol.as_str(), "https" | "https:")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_are_case_insensitive() {
        let req = RequestInfo::new("GET", "/").with_header("X-Forwarded-For", "1.2.3.4");

        assert_eq!(req.header("x-forwarded-for").as_deref(), Some("1.2.3.4"));
        assert_eq!(req.header("X-FORWARDED-FOR").as_deref(), Some("1.2.3.4"));
        assert_eq!(req.header("accept"), None);
    }

    #[test]
    fn test_repeated_headers_join() {
        let req = RequestInfo::new("GET", "/")
            .with_header("x-forwarded-for", "1.1.1.1")
            .with_header("X-Forwarded-For", "2.2.2.2");

        assert_eq!(req.header_values("x-forwarded-for").len(), 2);
        assert_eq!(req.header("x-forwarded-for").as_deref(), Some("1.1.1.1,2.2.2.2"));
    }

    #[test]
    fn test_cookie_from_header() {
        let req = RequestInfo::new("GET", "/")
            .with_header("Cookie", "theme=dark; ddos-blocked-times=3 ;session=abc");

        assert_eq!(req.cookie("ddos-blocked-times").as_deref(), Some("3"));
        assert_eq!(req.cookie("session").as_deref(), Some("abc"));
        assert_eq!(req.cookie("blocked-times"), None);
    }

    #[test]
    fn test_parsed_cookies_win() {
        let req = RequestInfo::new("GET", "/")
            .with_header("cookie", "ddos-blocked-times=1")
            .with_cookie("ddos-blocked-times", "9");

        assert_eq!(req.cookie("ddos-blocked-times").as_deref(), Some("9"));
    }

    #[test]
    fn test_is_secure() {
        assert!(!RequestInfo::new("GET", "/").is_secure());
        assert!(RequestInfo::new("GET", "/").with_protocol("https").is_secure());
        assert!(RequestInfo::new("GET", "/").with_protocol("https:").is_secure());
    }
}
