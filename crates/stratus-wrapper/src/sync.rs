//! Service snapshot creation, configuration, and publication.

use parking_lot::{Mutex, RwLock};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use stratus_bus::{ClusterEvent, EventBus};
use stratus_net::{channels, NetworkChannel, Packet};
use stratus_types::{
    ProcessSnapshot, ServiceConfiguration, ServiceInfoSnapshot, ServiceLifecycle, ThreadSnapshot,
};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, warn};

/// Current/previous snapshot pair, swapped as one unit so a reader
/// never observes a torn pair.
struct SnapshotPair {
    current: ServiceInfoSnapshot,
    previous: ServiceInfoSnapshot,
}

/// Builds, rotates, and publishes this agent's service snapshots.
pub struct ServiceInfoSync {
    configuration: ServiceConfiguration,
    address: SocketAddr,
    event_bus: Arc<EventBus>,
    pair: RwLock<SnapshotPair>,
    system: Mutex<System>,
}

impl ServiceInfoSync {
    /// Create the syncer with an initial `Prepared` snapshot on both
    /// sides of the pair.
    #[must_use]
    pub fn new(
        configuration: ServiceConfiguration,
        address: SocketAddr,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let initial = ServiceInfoSnapshot {
            creation_time_millis: now_millis(),
            address,
            connected_time_millis: 0,
            lifecycle: ServiceLifecycle::Prepared,
            process: ProcessSnapshot::empty(),
            properties: configuration.properties.clone(),
            configuration: configuration.clone(),
        };

        Self {
            configuration,
            address,
            event_bus,
            pair: RwLock::new(SnapshotPair { current: initial.clone(), previous: initial }),
            system: Mutex::new(System::new()),
        }
    }

    /// The snapshot most recently installed as current.
    #[must_use]
    pub fn current(&self) -> ServiceInfoSnapshot {
        self.pair.read().current.clone()
    }

    /// The snapshot that was current before the last rotation.
    #[must_use]
    pub fn previous(&self) -> ServiceInfoSnapshot {
        self.pair.read().previous.clone()
    }

    /// Sample current process metrics and combine them with the carried
    /// properties and the immutable configuration into a new snapshot.
    #[must_use]
    pub fn create_snapshot(&self, connected_time_millis: u64) -> ServiceInfoSnapshot {
        let properties = self.pair.read().current.properties.clone();

        ServiceInfoSnapshot {
            creation_time_millis: now_millis(),
            address: self.address,
            connected_time_millis,
            lifecycle: ServiceLifecycle::Running,
            process: self.sample_process(),
            properties,
            configuration: self.configuration.clone(),
        }
    }

    /// Run the configure extension point over `snapshot`, then rotate
    /// current→previous and install it as current. Returns the
    /// configured snapshot.
    pub fn configure(&self, mut snapshot: ServiceInfoSnapshot) -> ServiceInfoSnapshot {
        let mut event =
            ClusterEvent::ServiceInfoConfigure { properties: snapshot.properties.clone() };
        self.event_bus.call_event(&mut event);
        if let ClusterEvent::ServiceInfoConfigure { properties } = event {
            snapshot.properties = properties;
        }

        let mut pair = self.pair.write();
        pair.previous = std::mem::replace(&mut pair.current, snapshot.clone());
        snapshot
    }

    /// Publish `snapshot` to the authority over `channel`.
    ///
    /// When the snapshot describes this agent's own tracked service,
    /// the local configure/rotate step runs first, so the local and
    /// remote views cannot diverge even under racing publishes. A
    /// snapshot for a foreign service id is forwarded untouched.
    pub fn publish(&self, channel: &NetworkChannel, snapshot: ServiceInfoSnapshot) {
        let snapshot = if snapshot.service_id() == &self.configuration.service_id {
            self.configure(snapshot)
        } else {
            snapshot
        };

        match Packet::typed(channels::SERVICE_INFO_PUBLISH, stratus_types::Document::new(), &snapshot)
        {
            Ok(packet) => {
                debug!(service = %snapshot.service_id(), lifecycle = %snapshot.lifecycle, "publishing service info");
                channel.send(packet);
            }
            Err(error) => warn!(error = %error, "failed to encode service snapshot"),
        }
    }

    /// Create, configure, and publish a fresh snapshot in one step.
    pub fn publish_update(&self, channel: &NetworkChannel) {
        let snapshot = self.create_snapshot(channel.connected_at_millis());
        self.publish(channel, snapshot);
    }

    fn sample_process(&self) -> ProcessSnapshot {
        let Ok(pid) = sysinfo::get_current_pid() else {
            return ProcessSnapshot::empty();
        };

        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::everything(),
        );

        let Some(process) = system.process(pid) else {
            return ProcessSnapshot::empty();
        };

        let threads = process
            .tasks()
            .map(|tasks| {
                tasks
                    .iter()
                    .filter_map(|task_pid| system.process(*task_pid))
                    .map(|task| ThreadSnapshot {
                        id: u64::from(task.pid().as_u32()),
                        name: task.name().to_string_lossy().into_owned(),
                        state: task.status().to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        ProcessSnapshot {
            heap_usage_bytes: process.memory(),
            no_heap_usage_bytes: process.virtual_memory().saturating_sub(process.memory()),
            max_heap_bytes: u64::from(self.configuration.max_heap_mb) * 1024 * 1024,
            threads,
            cpu_usage_percent: f64::from(process.cpu_usage()),
            pid: pid.as_u32() as i32,
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_bus::{EventKind, EventListener, EventListenerResult, EventOwner};
    use stratus_types::{Document, EnvironmentKind, ServiceId};
    use uuid::Uuid;

    fn configuration(name: &str) -> ServiceConfiguration {
        ServiceConfiguration {
            service_id: ServiceId {
                instance_id: Uuid::new_v4(),
                name: name.to_string(),
                task_name: "Lobby".to_string(),
                node_id: "Node-1".to_string(),
                environment: EnvironmentKind::Server,
            },
            groups: vec!["Lobby".to_string()],
            templates: Vec::new(),
            max_heap_mb: 512,
            process_arguments: Vec::new(),
            port: 25565,
            auto_delete_on_stop: false,
            properties: Document::new(),
        }
    }

    fn syncer(name: &str) -> ServiceInfoSync {
        ServiceInfoSync::new(
            configuration(name),
            "127.0.0.1:25565".parse().unwrap(),
            Arc::new(EventBus::new()),
        )
    }

    #[test]
    fn test_initial_pair_is_prepared() {
        let sync = syncer("Lobby-1");
        assert_eq!(sync.current().lifecycle, ServiceLifecycle::Prepared);
        assert_eq!(sync.previous().lifecycle, ServiceLifecycle::Prepared);
    }

    #[test]
    fn test_create_snapshot_samples_running_state() {
        let sync = syncer("Lobby-1");
        let snapshot = sync.create_snapshot(12345);

        assert_eq!(snapshot.lifecycle, ServiceLifecycle::Running);
        assert_eq!(snapshot.connected_time_millis, 12345);
        // We are sampling our own process, so a pid must be present.
        assert!(snapshot.process.pid > 0);
    }

    #[test]
    fn test_configure_rotates_pair() {
        let sync = syncer("Lobby-1");
        let first = sync.create_snapshot(1);
        let configured = sync.configure(first);

        assert_eq!(sync.current(), configured);
        assert_eq!(sync.previous().lifecycle, ServiceLifecycle::Prepared);

        let second = sync.create_snapshot(2);
        sync.configure(second.clone());
        assert_eq!(sync.previous(), configured);
        assert_eq!(sync.current().connected_time_millis, 2);
    }

    struct CountAppender;

    impl EventListener for CountAppender {
        fn handle(&self, event: &mut ClusterEvent) -> EventListenerResult {
            if let ClusterEvent::ServiceInfoConfigure { properties } = event {
                properties.insert("online_count", 3u64);
            }
            Ok(())
        }
    }

    #[test]
    fn test_configure_applies_extension_properties() {
        let bus = Arc::new(EventBus::new());
        bus.register(EventKind::ServiceInfoConfigure, EventOwner::new(), Arc::new(CountAppender));
        let sync = ServiceInfoSync::new(
            configuration("Lobby-1"),
            "127.0.0.1:25565".parse().unwrap(),
            bus,
        );

        let configured = sync.configure(sync.create_snapshot(1));
        assert_eq!(configured.properties.get_u64("online_count"), Some(3));
        // Properties carry forward into the next created snapshot.
        let next = sync.create_snapshot(2);
        assert_eq!(next.properties.get_u64("online_count"), Some(3));
    }

    #[tokio::test]
    async fn test_publish_foreign_snapshot_does_not_rotate() {
        let sync = syncer("Lobby-1");
        let foreign_sync = syncer("Other-1");
        let foreign_snapshot = foreign_sync.create_snapshot(9);

        let (channel, _peer) = stub_channel().await;
        sync.publish(&channel, foreign_snapshot);

        assert_eq!(sync.current().lifecycle, ServiceLifecycle::Prepared);
        assert_eq!(sync.current().connected_time_millis, 0);
    }

    #[tokio::test]
    async fn test_publish_own_snapshot_rotates() {
        let sync = syncer("Lobby-1");
        let snapshot = sync.create_snapshot(7);

        let (channel, _peer) = stub_channel().await;
        sync.publish(&channel, snapshot);

        assert_eq!(sync.current().lifecycle, ServiceLifecycle::Running);
        assert_eq!(sync.current().connected_time_millis, 7);
    }

    async fn stub_channel() -> (Arc<NetworkChannel>, Arc<NetworkChannel>) {
        let (left, right) = tokio::io::duplex(64 * 1024);
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let registry = || Arc::new(stratus_net::PacketListenerRegistry::new());
        let a = NetworkChannel::spawn(
            left,
            addr,
            addr,
            registry(),
            Arc::new(stratus_net::NoopChannelHandler),
        )
        .await;
        let b = NetworkChannel::spawn(
            right,
            addr,
            addr,
            registry(),
            Arc::new(stratus_net::NoopChannelHandler),
        )
        .await;
        (a, b)
    }
}
