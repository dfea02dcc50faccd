use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Request, Response, StatusCode};

use crate::error::DispatchError;
use crate::route_table::RouteTable;

/// Caps the number of concurrently in-flight requests (spec.md §4.5 step 1,
/// §9 "admission counter underflow"). A single atomic counter, decremented
/// via compare-then-subtract so a buggy double-release can never wrap it
/// around to `usize::MAX`.
pub struct AdmissionControl {
    max_connections: AtomicUsize,
    connections: AtomicUsize,
}

/// RAII guard returned on successful admission; decrements the counter
/// exactly once when dropped, regardless of which exit path the request
/// takes (spec.md §4.5 step 1).
pub struct AdmissionGuard<'a>(&'a AdmissionControl);

impl AdmissionControl {
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections: AtomicUsize::new(max_connections),
            connections: AtomicUsize::new(0),
        }
    }

    /// Updates the admission cap, e.g. after a config reload changes
    /// `max_connections`. Does not affect requests already admitted.
    pub fn set_max_connections(&self, max_connections: usize) {
        self.max_connections.store(max_connections, Ordering::SeqCst);
    }

    /// Attempts to admit one more request. Returns `None` when at capacity.
    pub fn try_admit(&self) -> Option<AdmissionGuard<'_>> {
        loop {
            let current = self.connections.load(Ordering::SeqCst);
            let max = self.max_connections.load(Ordering::SeqCst);
            if current >= max {
                return None;
            }
            if self
                .connections
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Some(AdmissionGuard(self));
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        let _ = self
            .0
            .connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_sub(1)
            });
    }
}

/// Process-wide dispatch state: the active route table (swapped atomically
/// on reload) plus admission control (spec.md §3).
pub struct ProxyState {
    route_table: ArcSwap<RouteTable>,
    pub admission: AdmissionControl,
    pub client: Client<HttpConnector>,
}

impl ProxyState {
    pub fn new(route_table: RouteTable, max_connections: usize) -> Self {
        Self {
            route_table: ArcSwap::from_pointee(route_table),
            admission: AdmissionControl::new(max_connections),
            client: Client::new(),
        }
    }

    /// Atomically replaces the active route table (spec.md §4.6 step 4 /
    /// §9 "hot swap under traffic").
    pub fn swap_route_table(&self, new_table: RouteTable) -> Arc<RouteTable> {
        self.route_table.swap(Arc::new(new_table))
    }

    /// One snapshot of the active route table, to be used for the whole
    /// lifetime of a single request (spec.md §4.5 step 2).
    pub fn snapshot(&self) -> Arc<RouteTable> {
        self.route_table.load_full()
    }
}

/// Entry point for one inbound request (spec.md §4.5). Runs admission,
/// route lookup, replica selection and forwarding in order, mapping every
/// failure into the HTTP status spec.md §7 assigns it.
pub async fn dispatch(state: &ProxyState, req: Request<Body>) -> Response<Body> {
    let _guard = match state.admission.try_admit() {
        Some(guard) => guard,
        None => {
            log::warn!("admission rejected: at capacity ({})", state.admission.in_flight());
            return error_response(DispatchError::AdmissionRejected);
        }
    };

    let route_table = state.snapshot();
    let path = req.uri().path().to_owned();
    let route = match route_table.lookup(&path) {
        Some(route) => route,
        None => {
            log::warn!("no route for path {}", path);
            return error_response(DispatchError::NoSuchRoute);
        }
    };

    let server = match route.balancer.next().await {
        Ok(server) => server,
        Err(err) => {
            log::error!("dispatch failed for path {}: {}", path, err);
            return error_response(err);
        }
    };

    match server.proxy(&state.client, req).await {
        Ok(response) => response,
        Err(err) => {
            log::error!("backend proxy error for {}: {}", server.url, err);
            error_response(err)
        }
    }
}

fn error_response(err: DispatchError) -> Response<Body> {
    Response::builder()
        .status(err.status_code())
        .body(Body::from(err.to_string()))
        .unwrap_or_else(|_| {
            let mut resp = Response::new(Body::empty());
            *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            resp
        })
}
