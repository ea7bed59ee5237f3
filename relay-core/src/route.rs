//! Wildcard capture parsing and backend URL construction
//!
//! ```text
//! GET /proxy/items/42?limit=5
//!           └──┬───┘ └──┬──┘
//!        RouteCapture  query
//!              │         │
//!              ▼         ▼
//!   https://api.example.com/items/42?limit=5
//! ```
//!
//! Segments are kept exactly as they appeared on the wire (still
//! percent-encoded), so the backend sees the same path bytes the caller
//! sent.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use bytes::Bytes;
use http::Method;
use url::Url;

use crate::error::{RelayError, Result, RouteFault};

/// The wildcard tail of an inbound proxy path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteCapture {
    Segments(Vec<String>),
    Malformed,
}

impl RouteCapture {
    /// Parse the raw path remainder that follows the mount prefix.
    ///
    /// `None` means the request hit the bare prefix with no capture at all.
    pub fn parse(remainder: Option<&str>) -> Self {
        let Some(raw) = remainder else {
            return RouteCapture::Malformed;
        };

        let trimmed = raw.strip_prefix('/').unwrap_or(raw);
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        if trimmed.is_empty() {
            return RouteCapture::Malformed;
        }

        let mut segments = Vec::new();
        for segment in trimmed.split('/') {
            if !is_clean_segment(segment) {
                return RouteCapture::Malformed;
            }
            segments.push(segment.to_string());
        }

        RouteCapture::Segments(segments)
    }
}

fn is_clean_segment(segment: &str) -> bool {
    if segment.is_empty() || segment.contains('\\') {
        return false;
    }

    let lowered = segment.to_ascii_lowercase();
    !matches!(
        lowered.as_str(),
        "." | ".." | "%2e" | "%2e%2e" | ".%2e" | "%2e."
    )
}

/// The backend target for one inbound request
#[derive(Debug, Clone)]
pub struct RouteDescriptor {
    pub path_segments: Vec<String>,
    pub query: BTreeMap<String, String>,
    pub method: Method,
    pub body: Option<Bytes>,
}

impl RouteDescriptor {
    /// Validate the routing input of one request.
    ///
    /// Fails with [`RouteFault::Slug`] for a malformed capture and with
    /// [`RouteFault::Query`] when a query key carries more than one value.
    pub fn from_parts(
        capture: RouteCapture,
        raw_query: Option<&str>,
        method: Method,
        body: Bytes,
    ) -> Result<Self> {
        let path_segments = match capture {
            RouteCapture::Segments(segments) if !segments.is_empty() => segments,
            RouteCapture::Segments(_) | RouteCapture::Malformed => {
                return Err(RelayError::MalformedRoute(RouteFault::Slug));
            }
        };

        let query = parse_query(raw_query.unwrap_or(""))?;
        let body = if body.is_empty() { None } else { Some(body) };

        Ok(Self {
            path_segments,
            query,
            method,
            body,
        })
    }

    /// The joined backend path, always starting with `/`
    pub fn path(&self) -> String {
        format!("/{}", self.path_segments.join("/"))
    }

    /// Build the full backend URL under `base`.
    pub fn backend_url(&self, base: &Url) -> Result<Url> {
        let joined = format!("{}{}", base.as_str().trim_end_matches('/'), self.path());
        let mut url =
            Url::parse(&joined).map_err(|_| RelayError::MalformedRoute(RouteFault::Slug))?;

        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query {
                pairs.append_pair(key, value);
            }
        }

        Ok(url)
    }
}

fn parse_query(raw: &str) -> Result<BTreeMap<String, String>> {
    let mut query = BTreeMap::new();

    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        match query.entry(key.into_owned()) {
            Entry::Vacant(slot) => {
                slot.insert(value.into_owned());
            }
            // Repeated keys arrive as a list, which has no plain-string form
            Entry::Occupied(_) => return Err(RelayError::MalformedRoute(RouteFault::Query)),
        }
    }

    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://api.example.com").unwrap()
    }

    fn descriptor(path: &str, query: Option<&str>) -> Result<RouteDescriptor> {
        RouteDescriptor::from_parts(
            RouteCapture::parse(Some(path)),
            query,
            Method::GET,
            Bytes::new(),
        )
    }

    #[test]
    fn test_parse_segments() {
        assert_eq!(
            RouteCapture::parse(Some("/items/42")),
            RouteCapture::Segments(vec!["items".to_string(), "42".to_string()])
        );
        assert_eq!(
            RouteCapture::parse(Some("items/")),
            RouteCapture::Segments(vec!["items".to_string()])
        );
    }

    #[test]
    fn test_parse_malformed_captures() {
        assert_eq!(RouteCapture::parse(None), RouteCapture::Malformed);
        assert_eq!(RouteCapture::parse(Some("")), RouteCapture::Malformed);
        assert_eq!(RouteCapture::parse(Some("/")), RouteCapture::Malformed);
        assert_eq!(RouteCapture::parse(Some("/a//b")), RouteCapture::Malformed);
        assert_eq!(RouteCapture::parse(Some("/a/../b")), RouteCapture::Malformed);
        assert_eq!(RouteCapture::parse(Some("/a/%2E%2e/b")), RouteCapture::Malformed);
        assert_eq!(RouteCapture::parse(Some("/./a")), RouteCapture::Malformed);
    }

    #[test]
    fn test_malformed_capture_is_slug_fault() {
        let err = RouteDescriptor::from_parts(
            RouteCapture::Malformed,
            Some("limit=5"),
            Method::GET,
            Bytes::new(),
        )
        .unwrap_err();

        assert!(matches!(err, RelayError::MalformedRoute(RouteFault::Slug)));
        assert_eq!(err.public_message(), "Malformed slug.");
    }

    #[test]
    fn test_empty_segment_list_is_slug_fault() {
        let err = RouteDescriptor::from_parts(
            RouteCapture::Segments(vec![]),
            None,
            Method::GET,
            Bytes::new(),
        )
        .unwrap_err();

        assert!(matches!(err, RelayError::MalformedRoute(RouteFault::Slug)));
    }

    #[test]
    fn test_repeated_query_key_rejected() {
        let err = descriptor("/items", Some("tag=a&tag=b")).unwrap_err();

        assert!(matches!(err, RelayError::MalformedRoute(RouteFault::Query)));
        assert_eq!(err.public_message(), "Endpoint formatted incorrectly.");
    }

    #[test]
    fn test_backend_url_with_query() {
        let route = descriptor("/items", Some("limit=5&cursor=abc")).unwrap();
        let url = route.backend_url(&base()).unwrap();

        assert_eq!(url.host_str(), Some("api.example.com"));
        assert_eq!(url.path(), "/items");

        let pairs: BTreeMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs.get("limit").map(String::as_str), Some("5"));
        assert_eq!(pairs.get("cursor").map(String::as_str), Some("abc"));
    }

    #[test]
    fn test_backend_url_without_query_has_none() {
        let route = descriptor("/users/7/settings", None).unwrap();
        let url = route.backend_url(&base()).unwrap();

        assert_eq!(url.as_str(), "https://api.example.com/users/7/settings");
        assert!(url.query().is_none());
    }

    #[test]
    fn test_backend_url_keeps_base_path_and_encoding() {
        let base = Url::parse("https://api.example.com/v2/").unwrap();
        let route = descriptor("/files/a%20b", None).unwrap();
        let url = route.backend_url(&base).unwrap();

        assert_eq!(url.path(), "/v2/files/a%20b");
    }

    #[test]
    fn test_query_values_survive_encoding() {
        let route = descriptor("/search", Some("q=a%26b+c")).unwrap();
        assert_eq!(route.query.get("q").map(String::as_str), Some("a&b c"));

        let url = route.backend_url(&base()).unwrap();
        let (_, value) = url.query_pairs().next().unwrap();
        assert_eq!(value, "a&b c");
    }

    #[test]
    fn test_empty_body_is_absent() {
        let route = RouteDescriptor::from_parts(
            RouteCapture::parse(Some("/items")),
            None,
            Method::POST,
            Bytes::new(),
        )
        .unwrap();
        assert!(route.body.is_none());

        let route = RouteDescriptor::from_parts(
            RouteCapture::parse(Some("/items")),
            None,
            Method::POST,
            Bytes::from_static(b"{\"name\":\"x\"}"),
        )
        .unwrap();
        assert_eq!(route.body.as_deref(), Some(&b"{\"name\":\"x\"}"[..]));
    }
}
