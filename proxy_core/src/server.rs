use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use hyper::client::HttpConnector;
use hyper::header::{HeaderName, HeaderValue};
use hyper::{Body, Client, Request, Response, Uri};
use uuid::Uuid;

use crate::error::DispatchError;

/// Headers that must not be forwarded verbatim between proxy and backend
/// (RFC 7230 §6.1), generalizing the `Host`-only filtering seen in simpler
/// reverse proxy examples to the full hop-by-hop set.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// One backend replica, immutable except for `alive` (spec.md §3).
#[derive(Debug)]
pub struct Server {
    pub uid: Uuid,
    pub url: Uri,
    pub service_name: String,
    pub weight: u32,
    pub metadata: HashMap<String, String>,
    alive: AtomicBool,
}

impl Server {
    /// Builds a server for a replica of `service_name`. Weight is read from
    /// `metadata["weight"]`, defaulting to 1 (spec.md §3).
    pub fn new(url: Uri, service_name: String, metadata: HashMap<String, String>) -> Self {
        let weight = get_meta_or_default_int(&metadata, "weight", 1).max(1) as u32;
        Self {
            uid: Uuid::new_v4(),
            url,
            service_name,
            weight,
            metadata,
            alive: AtomicBool::new(true),
        }
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    /// Forwards `req` to this replica and streams the response back
    /// unbuffered (spec.md §4.1). No retry is attempted here; the caller
    /// (the dispatcher) decides how to surface a failure.
    pub async fn proxy(
        &self,
        client: &Client<HttpConnector>,
        mut req: Request<Body>,
    ) -> Result<Response<Body>, DispatchError> {
        let uri = rewrite_uri(&self.url, req.uri());
        *req.uri_mut() = uri;
        strip_hop_by_hop(req.headers_mut());

        let mut response = client.request(req).await?;
        strip_hop_by_hop(response.headers_mut());
        Ok(response)
    }
}

/// Parses `metadata[key]` as an integer, falling back to `default` when the
/// key is absent or fails to parse (spec.md §4.1).
pub fn get_meta_or_default_int(metadata: &HashMap<String, String>, key: &str, default: i64) -> i64 {
    metadata
        .get(key)
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default)
}

fn rewrite_uri(backend: &Uri, incoming: &Uri) -> Uri {
    let path_and_query = incoming
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");
    let rebuilt = format!(
        "{}://{}{}",
        backend.scheme_str().unwrap_or("http"),
        backend.authority().map(|a| a.as_str()).unwrap_or(""),
        path_and_query
    );
    rebuilt
        .parse()
        .unwrap_or_else(|_| backend.clone())
}

fn strip_hop_by_hop(headers: &mut hyper::HeaderMap<HeaderValue>) {
    for name in HOP_BY_HOP {
        let header_name: HeaderName = name.parse().expect("static hop-by-hop header name");
        headers.remove(header_name);
    }
}
