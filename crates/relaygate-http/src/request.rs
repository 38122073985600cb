//! Inbound request routing and per-request context.

use std::net::IpAddr;

use http::{HeaderMap, Method};
use percent_encoding::percent_decode_str;
use relaygate_core::storage::LinkArgs;
use relaygate_core::utils::parse_bool;

/// Entry point a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    /// `/d/<path>`: redirect when possible, proxy otherwise.
    Down,
    /// `/p/<path>`: always proxy, subject to proxy policy.
    Proxy,
}

impl Entry {
    /// Route name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Down => "down",
            Self::Proxy => "proxy",
        }
    }
}

/// Map a URI path to an entry point and the decoded object path.
///
/// Returns `None` for paths outside `/d` and `/p`.
#[must_use]
pub fn route(uri_path: &str) -> Option<(Entry, String)> {
    let (entry, rest) = if let Some(rest) = uri_path.strip_prefix("/d") {
        (Entry::Down, rest)
    } else if let Some(rest) = uri_path.strip_prefix("/p") {
        (Entry::Proxy, rest)
    } else {
        return None;
    };
    if !(rest.is_empty() || rest.starts_with('/')) {
        return None;
    }
    let decoded = percent_decode_str(rest).decode_utf8().ok()?;
    let path = if decoded.is_empty() {
        "/".to_owned()
    } else {
        decoded.into_owned()
    };
    Some((entry, path))
}

/// Everything request handling needs to know about the inbound request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Entry point.
    pub entry: Entry,
    /// Request method.
    pub method: Method,
    /// Decoded object path.
    pub path: String,
    /// Client address, when known.
    pub client_ip: Option<IpAddr>,
    /// Request headers.
    pub headers: HeaderMap,
    /// Decoded query parameters in request order.
    pub query: Vec<(String, String)>,
    /// Request id, echoed in `x-request-id`.
    pub request_id: String,
}

impl RequestContext {
    /// Build a context from request parts.
    #[must_use]
    pub fn new(
        entry: Entry,
        method: Method,
        path: String,
        raw_query: Option<&str>,
        headers: HeaderMap,
        client_ip: Option<IpAddr>,
        request_id: String,
    ) -> Self {
        let query = raw_query
            .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        Self {
            entry,
            method,
            path,
            client_ip,
            headers,
            query,
            request_id,
        }
    }

    /// First value of a query parameter.
    #[must_use]
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Whether a query parameter is present, with any value.
    #[must_use]
    pub fn has_query(&self, name: &str) -> bool {
        self.query.iter().any(|(k, _)| k == name)
    }

    /// Whether the client asked for raw content (`raw=true` or `raw=1`).
    #[must_use]
    pub fn is_raw(&self) -> bool {
        self.query_value("raw").is_some_and(parse_bool)
    }

    /// The `type` link hint, if present and non-empty.
    #[must_use]
    pub fn link_type(&self) -> Option<String> {
        self.query_value("type")
            .filter(|t| !t.is_empty())
            .map(str::to_owned)
    }

    /// Query parameters to forward to a direct link, minus the ignored names
    /// (compared case-insensitively).
    #[must_use]
    pub fn forwarded_query(&self, ignore: &[String]) -> Vec<(String, String)> {
        self.query
            .iter()
            .filter(|(k, _)| !ignore.iter().any(|i| i.eq_ignore_ascii_case(k)))
            .cloned()
            .collect()
    }

    /// Arguments for resolving this request's link.
    #[must_use]
    pub fn link_args(&self, redirect: bool) -> LinkArgs {
        LinkArgs {
            ip: self.client_ip,
            headers: self.headers.clone(),
            link_type: self.link_type(),
            redirect,
        }
    }
}
