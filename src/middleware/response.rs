//! The response operations the guard needs from its host.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Attributes of a cookie written by the guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CookieOptions {
    pub expires: DateTime<Utc>,
    pub http_only: bool,
    /// Omitted from the header when `None`
    pub domain: Option<String>,
    pub secure: bool,
    pub path: String,
}

impl CookieOptions {
    /// Render a `Set-Cookie` header value.
    pub fn to_set_cookie(&self, name: &str, value: &str) -> String {
        let mut header = format!(
            "{}={}; Expires={}; Path={}",
            name,
            value,
            self.expires.format("%a, %d %b %Y %H:%M:%S GMT"),
            self.path
        );
        if let Some(domain) = &self.domain {
            header.push_str("; Domain=");
            header.push_str(domain);
        }
        if self.secure {
            header.push_str("; Secure");
        }
        if self.http_only {
            header.push_str("; HttpOnly");
        }
        header
    }
}

/// A cookie to set on the response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseCookie {
    pub name: String,
    pub value: String,
    pub options: CookieOptions,
}

/// Where the guard writes a rejection.
pub trait ResponseSink {
    fn set_status(&mut self, status: u16);

    fn send_json(&mut self, body: Value);

    fn set_cookie(&mut self, name: &str, value: &str, options: &CookieOptions);
}

/// A [`ResponseSink`] that keeps whatever it is given.
///
/// Useful for hosts that build their own response after the guard runs, and
/// for tests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordedResponse {
    pub status: Option<u16>,
    pub body: Option<Value>,
    pub cookies: Vec<ResponseCookie>,
}

impl RecordedResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last cookie set under `name`.
    pub fn cookie(&self, name: &str) -> Option<&ResponseCookie> {
        self.cookies.iter().rev().find(|cookie| cookie.name == name)
    }
}

impl ResponseSink for RecordedResponse {
    fn set_status(&mut self, status: u16) {
        self.status = Some(status);
    }

    fn send_json(&mut self, body: Value) {
        self.body = Some(body);
    }

    fn set_cookie(&mut self, name: &str, value: &str, options: &CookieOptions) {
        self.cookies.push(ResponseCookie {
            name: name.to_string(),
            value: value.to_string(),
            options: options.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn options() -> CookieOptions {
        CookieOptions {
            expires: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap(),
            http_only: true,
            domain: Some("example.com".to_string()),
            secure: true,
            path: "/orders".to_string(),
        }
    }

    #[test]
    fn test_set_cookie_header() {
        assert_eq!(
            options().to_set_cookie("ddos-blocked-times", "2"),
            "ddos-blocked-times=2; Expires=Fri, 01 Mar 2024 12:30:00 GMT; Path=/orders; Domain=example.com; Secure; HttpOnly"
        );
    }

    #[test]
    fn test_set_cookie_header_minimal() {
        let opts = CookieOptions {
            domain: None,
            secure: false,
            http_only: false,
            ..options()
        };
        assert_eq!(
            opts.to_set_cookie("n", "1"),
            "n=1; Expires=Fri, 01 Mar 2024 12:30:00 GMT; Path=/orders"
        );
    }

    #[test]
    fn test_recorded_response() {
        let mut response = RecordedResponse::new();
        response.set_cookie("a", "1", &options());
        response.set_cookie("a", "2", &options());
        response.set_status(403);
        response.send_json(json!({ "error": "no" }));

        assert_eq!(response.status, Some(403));
        assert_eq!(response.body, Some(json!({ "error": "no" })));
        assert_eq!(response.cookie("a").map(|c| c.value.as_str()), Some("2"));
        assert!(response.cookie("b").is_none());
    }
}
