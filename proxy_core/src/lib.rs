//! Engine for an HTTP reverse proxy and load balancer.
//!
//! For each inbound request, [`dispatch::dispatch`] picks a healthy backend
//! replica for the matched service via a [`balancer::Balancer`] and forwards
//! the request, streaming the response back. Configuration is hot-reloaded
//! through [`lifecycle::Lifecycle`] without dropping in-flight requests: the
//! active [`route_table::RouteTable`] is replaced with a single atomic
//! pointer swap, and dispatchers take one snapshot per request.
//!
//! The actual HTTP listener, the config file parser's on-disk watcher
//! machinery, and a logging sink are external collaborators this crate is
//! invoked by, not implementations it owns.

pub mod balancer;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod route_table;
pub mod server;
pub mod watcher;

pub use balancer::{Balancer, RoundRobinBalancer, WeightedRoundRobinBalancer};
pub use config::{Config, ConfigProvider};
pub use dispatch::{dispatch, AdmissionControl, ProxyState};
pub use error::{ConfigLoadError, DispatchError};
pub use health::HealthChecker;
pub use lifecycle::Lifecycle;
pub use route_table::{build_route_table, RouteTable, ServiceRoute};
pub use server::Server;
pub use watcher::{ConfigWatcher, WatchEvent};
