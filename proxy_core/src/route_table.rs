use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::balancer::{build_balancer, Balancer};
use crate::config::Config;
use crate::health::HealthChecker;
use crate::server::Server;

/// A service's balancer plus the health checker watching the same replica
/// set (spec.md §3 — "a Balancer and its HealthChecker are created by the
/// route-table builder").
pub struct ServiceRoute {
    pub balancer: Box<dyn Balancer>,
    pub health_checker: Arc<HealthChecker>,
}

/// Immutable mapping from matcher to balancer (spec.md §3). A new instance
/// is built on every reload and swapped in atomically; it is never mutated
/// in place.
pub struct RouteTable {
    routes: HashMap<String, Arc<ServiceRoute>>,
}

impl RouteTable {
    pub fn empty() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Exact-match lookup by request path (spec.md §6 — "exact-match is the
    /// contract").
    pub fn lookup(&self, path: &str) -> Option<Arc<ServiceRoute>> {
        self.routes.get(path).cloned()
    }

    pub fn routes(&self) -> impl Iterator<Item = &Arc<ServiceRoute>> {
        self.routes.values()
    }
}

/// Builds a fresh [`RouteTable`] from `config`. Invalid replica URLs are
/// logged and skipped rather than failing the whole build (mirrors
/// `BackendState::load_config`'s per-replica tolerance in the teacher).
pub fn build_route_table(config: &Config) -> RouteTable {
    let strategy = config.strategy();
    let health_interval = Duration::from_secs(config.health_check_interval_secs.max(1));
    let mut routes = HashMap::new();
    for service in &config.services {
        let mut servers = Vec::with_capacity(service.replicas.len());
        for replica in &service.replicas {
            let uri: hyper::Uri = match replica.url.parse() {
                Ok(uri) => uri,
                Err(err) => {
                    log::error!(
                        "skipping replica {} for service {}: invalid url ({})",
                        replica.url,
                        service.name,
                        err
                    );
                    continue;
                }
            };
            servers.push(Arc::new(Server::new(
                uri,
                service.name.clone(),
                replica.metadata.clone(),
            )));
        }
        let balancer = build_balancer(strategy, servers.clone());
        let health_checker = Arc::new(HealthChecker::new(servers, health_interval));
        balancer.set_health_checker(health_checker.clone());
        routes.insert(
            service.matcher.clone(),
            Arc::new(ServiceRoute {
                balancer,
                health_checker,
            }),
        );
    }
    RouteTable { routes }
}
