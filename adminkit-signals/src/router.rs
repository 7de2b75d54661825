//! Static signal-to-signal routing declared at boot.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use crate::bus::{SignalBus, SignalEvent, SignalSubscription, SubscribeOptions};
use crate::error::RouterError;

type Transform = Arc<dyn Fn(Value) -> Value + Send + Sync>;
type Callback = Arc<dyn Fn(&SignalEvent, &SignalBus) + Send + Sync>;

/// One routing destination for a source signal.
#[derive(Clone)]
pub enum Destination {
    /// Re-emit the payload under another signal name.
    Signal(String),
    /// Re-emit under another name with a transformed payload.
    Transform { signal: String, transform: Transform },
    /// Invoke a callback with the event and the bus.
    Callback(Callback),
}

impl Destination {
    pub fn signal(name: impl Into<String>) -> Self {
        Destination::Signal(name.into())
    }

    pub fn transform<F>(name: impl Into<String>, transform: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        Destination::Transform {
            signal: name.into(),
            transform: Arc::new(transform),
        }
    }

    pub fn callback<F>(callback: F) -> Self
    where
        F: Fn(&SignalEvent, &SignalBus) + Send + Sync + 'static,
    {
        Destination::Callback(Arc::new(callback))
    }
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Signal(name) => f.debug_tuple("Signal").field(name).finish(),
            Destination::Transform { signal, .. } => {
                f.debug_tuple("Transform").field(signal).finish()
            }
            Destination::Callback(_) => f.write_str("Callback"),
        }
    }
}

/// Routing table built at boot: source signal name → destinations.
#[derive(Default)]
pub struct EventRouterConfig {
    routes: Vec<(String, Vec<Destination>)>,
}

impl EventRouterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(
        mut self,
        source: impl Into<String>,
        destinations: impl IntoIterator<Item = Destination>,
    ) -> Self {
        self.routes
            .push((source.into(), destinations.into_iter().collect()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Static, acyclic signal-to-signal router.
///
/// At construction the signal graph (edges from each source to its
/// signal-emitting destinations) is checked for cycles; a cycle is a boot
/// failure, since routing would re-enter forever at emit time.
pub struct EventRouter {
    routes: HashMap<String, Vec<Destination>>,
    subscriptions: Vec<SignalSubscription>,
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter").finish_non_exhaustive()
    }
}

impl EventRouter {
    /// Validate the routing graph and attach it to the bus.
    pub fn connect(config: EventRouterConfig, bus: &SignalBus) -> Result<Self, RouterError> {
        let mut routes: HashMap<String, Vec<Destination>> = HashMap::new();
        for (source, destinations) in config.routes {
            routes.entry(source).or_default().extend(destinations);
        }

        check_acyclic(&routes)?;

        let mut subscriptions = Vec::with_capacity(routes.len());
        for (source, destinations) in &routes {
            let destinations = destinations.clone();
            let bus_for_handler = bus.clone();
            subscriptions.push(bus.on(
                source,
                move |event| {
                    for destination in &destinations {
                        match destination {
                            Destination::Signal(target) => {
                                bus_for_handler.emit(target, event.payload.clone());
                            }
                            Destination::Transform { signal, transform } => {
                                bus_for_handler.emit(signal, transform(event.payload.clone()));
                            }
                            Destination::Callback(callback) => {
                                callback(event, &bus_for_handler);
                            }
                        }
                    }
                },
                SubscribeOptions::default().with_id(format!("event-router:{source}")),
            ));
        }

        Ok(Self {
            routes,
            subscriptions,
        })
    }

    /// Source signal names with at least one destination.
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = self.routes.keys().cloned().collect();
        sources.sort();
        sources
    }

    /// Detach every route from the bus.
    pub fn disconnect(self) {
        for sub in self.subscriptions {
            sub.unsubscribe();
        }
    }
}

/// Kahn's algorithm over source → destination-signal edges.
fn check_acyclic(routes: &HashMap<String, Vec<Destination>>) -> Result<(), RouterError> {
    let mut nodes: HashSet<&str> = HashSet::new();
    let mut edges: Vec<(&str, &str)> = Vec::new();
    for (source, destinations) in routes {
        nodes.insert(source.as_str());
        for destination in destinations {
            let target = match destination {
                Destination::Signal(name) => name.as_str(),
                Destination::Transform { signal, .. } => signal.as_str(),
                Destination::Callback(_) => continue,
            };
            nodes.insert(target);
            edges.push((source.as_str(), target));
        }
    }

    let index: HashMap<&str, usize> = nodes.iter().enumerate().map(|(i, n)| (*n, i)).collect();
    let mut in_degree = vec![0usize; index.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); index.len()];
    for (from, to) in edges {
        in_degree[index[to]] += 1;
        dependents[index[from]].push(index[to]);
    }

    let mut queue: Vec<usize> = (0..index.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut visited = 0usize;
    while let Some(i) = queue.pop() {
        visited += 1;
        for &dep in &dependents[i] {
            in_degree[dep] -= 1;
            if in_degree[dep] == 0 {
                queue.push(dep);
            }
        }
    }

    if visited != index.len() {
        let mut cycle: Vec<String> = index
            .iter()
            .filter(|(_, &i)| in_degree[i] > 0)
            .map(|(name, _)| name.to_string())
            .collect();
        cycle.sort();
        return Err(RouterError::Cycle { cycle });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn fan_out_to_two_signals() {
        let bus = SignalBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        bus.on(
            "cache:entity:invalidate:*",
            move |event| s.lock().unwrap().push(event.name.clone()),
            SubscribeOptions::default(),
        );

        let config = EventRouterConfig::new().route(
            "auth:impersonate",
            [
                Destination::signal("cache:entity:invalidate:loans"),
                Destination::signal("cache:entity:invalidate:tasks"),
            ],
        );
        let _router = EventRouter::connect(config, &bus).unwrap();

        bus.emit("auth:impersonate", json!({"target": "u2"}));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "cache:entity:invalidate:loans",
                "cache:entity:invalidate:tasks",
            ]
        );
    }

    #[test]
    fn transform_rewrites_payload() {
        let bus = SignalBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        bus.on(
            "audit:record",
            move |event| s.lock().unwrap().push(event.payload.clone()),
            SubscribeOptions::default(),
        );

        let config = EventRouterConfig::new().route(
            "books:created",
            [Destination::transform("audit:record", |payload| {
                json!({ "action": "create", "source": payload })
            })],
        );
        let _router = EventRouter::connect(config, &bus).unwrap();

        bus.emit("books:created", json!({"id": "1"}));
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0]["action"], "create");
        assert_eq!(seen[0]["source"]["id"], "1");
    }

    #[test]
    fn callback_destination_runs() {
        let bus = SignalBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();

        let config = EventRouterConfig::new().route(
            "a:b",
            [Destination::callback(move |event, _bus| {
                assert_eq!(event.name, "a:b");
                h.fetch_add(1, Ordering::SeqCst);
            })],
        );
        let _router = EventRouter::connect(config, &bus).unwrap();

        bus.emit("a:b", json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn chained_routes_terminate() {
        let bus = SignalBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        bus.on(
            "c:done",
            move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            },
            SubscribeOptions::default(),
        );

        let config = EventRouterConfig::new()
            .route("a:start", [Destination::signal("b:middle")])
            .route("b:middle", [Destination::signal("c:done")]);
        let _router = EventRouter::connect(config, &bus).unwrap();

        bus.emit("a:start", json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cycle_fails_at_construction() {
        let bus = SignalBus::new();
        let config = EventRouterConfig::new()
            .route("a:x", [Destination::signal("b:y")])
            .route("b:y", [Destination::signal("a:x")]);
        let err = EventRouter::connect(config, &bus).unwrap_err();
        match err {
            RouterError::Cycle { cycle } => {
                assert!(cycle.contains(&"a:x".to_string()));
                assert!(cycle.contains(&"b:y".to_string()));
            }
        }
    }

    #[test]
    fn self_loop_fails() {
        let bus = SignalBus::new();
        let config = EventRouterConfig::new().route("a:x", [Destination::signal("a:x")]);
        assert!(EventRouter::connect(config, &bus).is_err());
    }

    #[test]
    fn callbacks_do_not_create_edges() {
        let bus = SignalBus::new();
        // A callback re-emitting its own source would loop at runtime, but
        // only declared signal destinations participate in the static check.
        let config = EventRouterConfig::new()
            .route("a:x", [Destination::callback(|_, _| {})])
            .route("b:y", [Destination::signal("a:x")]);
        assert!(EventRouter::connect(config, &bus).is_ok());
    }

    #[test]
    fn disconnect_detaches_routes() {
        let bus = SignalBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        bus.on(
            "out:sig",
            move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            },
            SubscribeOptions::default(),
        );

        let config = EventRouterConfig::new().route("in:sig", [Destination::signal("out:sig")]);
        let router = EventRouter::connect(config, &bus).unwrap();
        bus.emit("in:sig", json!({}));
        router.disconnect();
        bus.emit("in:sig", json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
