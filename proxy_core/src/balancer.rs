use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::DispatchError;
use crate::health::HealthChecker;
use crate::server::Server;

/// Selects the next replica to send a request to. Each service in the route
/// table owns exactly one balancer (spec.md §3).
#[async_trait::async_trait]
pub trait Balancer: Send + Sync {
    /// Returns the next live replica, or [`DispatchError::AllReplicasDown`]
    /// if none are alive.
    async fn next(&self) -> Result<Arc<Server>, DispatchError>;

    /// Appends a replica to the end of the sequence. Safe against
    /// concurrent `next()` calls (spec.md §4.2).
    async fn add(&self, server: Arc<Server>);

    fn set_health_checker(&self, checker: Arc<HealthChecker>);

    fn health_checker(&self) -> Option<Arc<HealthChecker>>;
}

/// Shared machinery for the health-checker handle, common to every balancer
/// variant.
struct HealthCheckerSlot(std::sync::Mutex<Option<Arc<HealthChecker>>>);

impl HealthCheckerSlot {
    fn new() -> Self {
        Self(std::sync::Mutex::new(None))
    }

    fn set(&self, checker: Arc<HealthChecker>) {
        *self.0.lock().expect("health checker slot poisoned") = Some(checker);
    }

    fn get(&self) -> Option<Arc<HealthChecker>> {
        self.0.lock().expect("health checker slot poisoned").clone()
    }
}

/// Round-robin balancer (spec.md §4.2). Cursor advances exactly once per
/// `next()` call, including past dead replicas, so selection stays fair
/// under flapping.
pub struct RoundRobinBalancer {
    state: Mutex<RrState>,
    health_checker: HealthCheckerSlot,
}

struct RrState {
    servers: Vec<Arc<Server>>,
    cursor: usize,
}

impl RoundRobinBalancer {
    pub fn new(servers: Vec<Arc<Server>>) -> Self {
        Self {
            state: Mutex::new(RrState { servers, cursor: 0 }),
            health_checker: HealthCheckerSlot::new(),
        }
    }
}

#[async_trait::async_trait]
impl Balancer for RoundRobinBalancer {
    async fn next(&self) -> Result<Arc<Server>, DispatchError> {
        let mut state = self.state.lock().await;
        let len = state.servers.len();
        if len == 0 {
            return Err(DispatchError::AllReplicasDown);
        }
        for _ in 0..len {
            let index = state.cursor;
            state.cursor = (state.cursor + 1) % len;
            let server = state.servers[index].clone();
            if server.is_alive() {
                return Ok(server);
            }
        }
        Err(DispatchError::AllReplicasDown)
    }

    async fn add(&self, server: Arc<Server>) {
        let mut state = self.state.lock().await;
        state.servers.push(server);
    }

    fn set_health_checker(&self, checker: Arc<HealthChecker>) {
        self.health_checker.set(checker);
    }

    fn health_checker(&self) -> Option<Arc<HealthChecker>> {
        self.health_checker.get()
    }
}

/// Weighted round-robin balancer (spec.md §4.2). When all weights are 1 this
/// behaves identically to plain round robin.
pub struct WeightedRoundRobinBalancer {
    state: Mutex<WrrState>,
    health_checker: HealthCheckerSlot,
}

struct WrrState {
    servers: Vec<Arc<Server>>,
    cursor: usize,
    load_counter: u32,
}

impl WeightedRoundRobinBalancer {
    pub fn new(servers: Vec<Arc<Server>>) -> Self {
        Self {
            state: Mutex::new(WrrState {
                servers,
                cursor: 0,
                load_counter: 0,
            }),
            health_checker: HealthCheckerSlot::new(),
        }
    }
}

#[async_trait::async_trait]
impl Balancer for WeightedRoundRobinBalancer {
    async fn next(&self) -> Result<Arc<Server>, DispatchError> {
        let mut state = self.state.lock().await;
        let len = state.servers.len();
        if len == 0 {
            return Err(DispatchError::AllReplicasDown);
        }
        // Equivalent to spec.md §4.2's "while load_counter < weight, return
        // and increment; on reaching weight, reset to 1 and advance cursor",
        // restructured as an exhaust-then-advance check at the top of each
        // iteration: simpler to get right than interleaving the advance with
        // the return.
        for _ in 0..len {
            let weight = state.servers[state.cursor].weight;
            if state.load_counter >= weight {
                state.cursor = (state.cursor + 1) % len;
                state.load_counter = 0;
            }
            let index = state.cursor;
            state.load_counter += 1;
            let server = state.servers[index].clone();
            if server.is_alive() {
                return Ok(server);
            }
            // Dead replica: force this slot exhausted so the next iteration
            // advances past it, same as RR's skip-and-continue.
            state.load_counter = server.weight;
        }
        Err(DispatchError::AllReplicasDown)
    }

    async fn add(&self, server: Arc<Server>) {
        let mut state = self.state.lock().await;
        state.servers.push(server);
    }

    fn set_health_checker(&self, checker: Arc<HealthChecker>) {
        self.health_checker.set(checker);
    }

    fn health_checker(&self) -> Option<Arc<HealthChecker>> {
        self.health_checker.get()
    }
}

/// Builds the balancer for a service from its configured strategy
/// (spec.md §4.4).
pub fn build_balancer(
    strategy: crate::config::Strategy,
    servers: Vec<Arc<Server>>,
) -> Box<dyn Balancer> {
    match strategy {
        crate::config::Strategy::RoundRobin => Box::new(RoundRobinBalancer::new(servers)),
        crate::config::Strategy::WeightedRoundRobin => {
            Box::new(WeightedRoundRobinBalancer::new(servers))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn server(name: &str) -> Arc<Server> {
        Arc::new(Server::new(
            "http://127.0.0.1:9090".parse().unwrap(),
            name.to_owned(),
            HashMap::new(),
        ))
    }

    fn weighted_server(weight: &str) -> Arc<Server> {
        let mut metadata = HashMap::new();
        metadata.insert("weight".to_owned(), weight.to_owned());
        Arc::new(Server::new(
            "http://127.0.0.1:9090".parse().unwrap(),
            "a".to_owned(),
            metadata,
        ))
    }

    #[tokio::test]
    async fn rr_fairness_uniform_weight() {
        let servers = vec![server("a"), server("b"), server("c")];
        let ids: Vec<_> = servers.iter().map(|s| s.uid).collect();
        let balancer = RoundRobinBalancer::new(servers);
        let mut counts = std::collections::HashMap::new();
        for _ in 0..30 {
            let s = balancer.next().await.unwrap();
            *counts.entry(s.uid).or_insert(0) += 1;
        }
        for id in ids {
            assert_eq!(*counts.get(&id).unwrap(), 10);
        }
    }

    #[tokio::test]
    async fn rr_skips_dead_replicas_but_still_advances_cursor() {
        let dead = server("dead");
        dead.set_alive(false);
        let alive = server("alive");
        let balancer = RoundRobinBalancer::new(vec![dead, alive.clone()]);
        for _ in 0..4 {
            let s = balancer.next().await.unwrap();
            assert_eq!(s.uid, alive.uid);
        }
    }

    #[tokio::test]
    async fn rr_all_dead_returns_error() {
        let dead = server("dead");
        dead.set_alive(false);
        let balancer = RoundRobinBalancer::new(vec![dead]);
        assert!(matches!(
            balancer.next().await,
            Err(DispatchError::AllReplicasDown)
        ));
    }

    #[tokio::test]
    async fn wrr_respects_weights_over_a_full_window() {
        let s1 = weighted_server("2");
        let s2 = {
            let mut m = HashMap::new();
            m.insert("weight".to_owned(), "1".to_owned());
            Arc::new(Server::new(
                "http://127.0.0.1:9091".parse().unwrap(),
                "a".to_owned(),
                m,
            ))
        };
        let id1 = s1.uid;
        let id2 = s2.uid;
        let balancer = WeightedRoundRobinBalancer::new(vec![s1, s2]);
        let mut sequence = Vec::new();
        for _ in 0..9 {
            sequence.push(balancer.next().await.unwrap().uid);
        }
        let count1 = sequence.iter().filter(|id| **id == id1).count();
        let count2 = sequence.iter().filter(|id| **id == id2).count();
        assert_eq!(count1, 6);
        assert_eq!(count2, 3);
        assert_eq!(
            sequence[0..3].iter().map(|id| *id == id1).collect::<Vec<_>>(),
            vec![true, true, false]
        );
    }

    #[tokio::test]
    async fn wrr_all_weight_one_behaves_like_rr() {
        let servers = vec![server("a"), server("b")];
        let ids: Vec<_> = servers.iter().map(|s| s.uid).collect();
        let balancer = WeightedRoundRobinBalancer::new(servers);
        let mut sequence = Vec::new();
        for _ in 0..4 {
            sequence.push(balancer.next().await.unwrap().uid);
        }
        assert_eq!(sequence, vec![ids[0], ids[1], ids[0], ids[1]]);
    }

    #[tokio::test]
    async fn add_appends_and_is_immediately_selectable() {
        let balancer = RoundRobinBalancer::new(vec![server("a")]);
        let new_server = server("b");
        balancer.add(new_server.clone()).await;
        let _ = balancer.next().await.unwrap();
        let second = balancer.next().await.unwrap();
        assert_eq!(second.uid, new_server.uid);
    }
}
