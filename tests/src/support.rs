//! Shared fixtures: a node on an ephemeral port, wrappers connected to
//! it, and event recorders for asserting on bus traffic.

use parking_lot::Mutex;
use rand::Rng;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use stratus_bus::{ClusterEvent, EventBus, EventKind, EventListener, EventListenerResult, EventOwner};
use stratus_node::{Node, NodeConfig};
use stratus_types::{Document, EnvironmentKind, ServiceConfiguration, ServiceId};
use stratus_wrapper::{Wrapper, WrapperOptions};
use uuid::Uuid;

/// Connection key shared by all test fixtures.
pub const TEST_CONNECTION_KEY: &str = "test-connection-key";

/// Bound on every await in the suite.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Start a node on an ephemeral localhost port.
pub async fn start_node() -> (Arc<Node>, SocketAddr) {
    let config = NodeConfig {
        name: "Node-1".to_string(),
        bind_addr: "127.0.0.1:0".parse().expect("literal addr"),
        connection_key: TEST_CONNECTION_KEY.to_string(),
    };
    let node = Arc::new(Node::new(config, None));
    let addr = node.start().await.expect("node binds");
    (node, addr)
}

/// A service configuration with a unique instance id and a randomized
/// port, suitable for provisioning and for wrapper options.
pub fn service_configuration(name: &str, task: &str) -> ServiceConfiguration {
    let port = rand::thread_rng().gen_range(30000..60000);
    ServiceConfiguration {
        service_id: ServiceId {
            instance_id: Uuid::new_v4(),
            name: name.to_string(),
            task_name: task.to_string(),
            node_id: "Node-1".to_string(),
            environment: EnvironmentKind::Server,
        },
        groups: vec![task.to_string()],
        templates: Vec::new(),
        max_heap_mb: 256,
        process_arguments: Vec::new(),
        port,
        auto_delete_on_stop: false,
        properties: Document::new(),
    }
}

/// Provision `configuration` on the node and start a wrapper for it.
pub async fn start_wrapper(
    node: &Node,
    addr: SocketAddr,
    configuration: ServiceConfiguration,
) -> Arc<Wrapper> {
    node.provision(configuration.clone());
    let options = WrapperOptions::new(addr, TEST_CONNECTION_KEY, configuration);
    let wrapper = Wrapper::new(options, None);
    wrapper.start().await.expect("wrapper starts");
    wrapper
}

/// Records every event of the kinds it is registered for.
pub struct EventRecorder {
    events: Mutex<Vec<ClusterEvent>>,
}

impl EventRecorder {
    /// Register a recorder on `bus` for `kinds`.
    pub fn install(bus: &EventBus, kinds: &[EventKind]) -> Arc<Self> {
        let recorder = Arc::new(Self { events: Mutex::new(Vec::new()) });
        bus.register_all(kinds, EventOwner::new(), recorder.clone());
        recorder
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<ClusterEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded events.
    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    /// Await until `predicate` holds over the recorded events.
    ///
    /// Panics when [`WAIT_TIMEOUT`] elapses first.
    pub async fn wait_until(&self, predicate: impl Fn(&[ClusterEvent]) -> bool) {
        tokio::time::timeout(WAIT_TIMEOUT, async {
            loop {
                if predicate(&self.events.lock()) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("recorder predicate not satisfied in time");
    }
}

impl EventListener for EventRecorder {
    fn handle(&self, event: &mut ClusterEvent) -> EventListenerResult {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Await until `predicate` returns true, panicking after
/// [`WAIT_TIMEOUT`].
pub async fn wait_until(predicate: impl Fn() -> bool) {
    tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            if predicate() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("predicate not satisfied in time");
}
