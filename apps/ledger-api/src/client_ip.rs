//! # Client IP Resolution
//!
//! The audit trail records where a request came from. Behind a proxy the
//! socket peer is the proxy, so operators list the headers their proxy sets
//! (`server.trusted_proxy_headers`) and the first usable one wins.
//!
//! ```text
//!  trusted = ["x-real-ip", "x-forwarded-for"]
//!
//!  x-real-ip: (absent)
//!  x-forwarded-for: 203.0.113.9, 10.0.0.2     ──►  "203.0.113.9"
//!  (no usable header)                          ──►  peer address
//! ```
//!
//! Headers not in the trusted list are ignored: any client can send them.

use axum::http::HeaderMap;
use std::net::IpAddr;

/// First valid address from the trusted headers, in order, else the peer.
pub fn resolve(headers: &HeaderMap, trusted: &[String], peer: Option<IpAddr>) -> Option<String> {
    trusted
        .iter()
        .filter_map(|name| headers.get(name.as_str()))
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(',').next())
        .map(str::trim)
        .find_map(|candidate| candidate.parse::<IpAddr>().ok())
        .or(peer)
        .map(|ip| ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn trusted() -> Vec<String> {
        vec!["x-real-ip".into(), "x-forwarded-for".into()]
    }

    fn peer() -> Option<IpAddr> {
        Some("10.0.0.1".parse().unwrap())
    }

    #[test]
    fn test_first_trusted_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.2"),
        );
        assert_eq!(
            resolve(&headers, &trusted(), peer()).as_deref(),
            Some("198.51.100.4")
        );
    }

    #[test]
    fn test_forwarded_chain_uses_leftmost() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static(" 203.0.113.9 , 10.0.0.2"),
        );
        assert_eq!(
            resolve(&headers, &trusted(), peer()).as_deref(),
            Some("203.0.113.9")
        );
    }

    #[test]
    fn test_untrusted_and_garbage_fall_back_to_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-client-ip", HeaderValue::from_static("192.0.2.7"));
        headers.insert("x-real-ip", HeaderValue::from_static("not-an-ip"));
        assert_eq!(
            resolve(&headers, &trusted(), peer()).as_deref(),
            Some("10.0.0.1")
        );
    }

    #[test]
    fn test_no_trusted_headers_configured() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9"));
        assert_eq!(resolve(&headers, &[], None), None);
        assert_eq!(resolve(&headers, &[], peer()).as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_ipv6() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("2001:db8::1"));
        assert_eq!(
            resolve(&headers, &trusted(), None).as_deref(),
            Some("2001:db8::1")
        );
    }
}
