//! Snapshot synchronization flows: publish, fan-out, and lifecycle
//! monotonicity at the authority.

#[cfg(test)]
mod tests {
    use crate::support::{
        service_configuration, start_node, start_wrapper, wait_until, EventRecorder,
    };
    use stratus_bus::{ClusterEvent, EventKind};
    use stratus_types::ServiceLifecycle;

    #[tokio::test]
    async fn test_publish_updates_registry_and_fans_out() {
        let (node, addr) = start_node().await;
        let publisher = start_wrapper(&node, addr, service_configuration("Lobby-1", "Lobby")).await;
        let observer = start_wrapper(&node, addr, service_configuration("Lobby-2", "Lobby")).await;
        let instance_id = publisher.service_id().instance_id;

        let recorder =
            EventRecorder::install(observer.event_bus(), &[EventKind::ServiceInfoUpdated]);

        publisher.publish_service_info_update();

        // The authority's registry advanced to Running...
        wait_until(|| {
            node.services()
                .snapshot(&instance_id)
                .is_some_and(|s| s.lifecycle == ServiceLifecycle::Running)
        })
        .await;

        // ...and the other agent observed the fan-out.
        recorder
            .wait_until(|events| {
                events.iter().any(|event| {
                    matches!(
                        event,
                        ClusterEvent::ServiceInfoUpdated(s)
                            if s.service_id().instance_id == instance_id
                    )
                })
            })
            .await;
    }

    #[tokio::test]
    async fn test_local_pair_rotates_only_for_own_service() {
        let (node, addr) = start_node().await;
        let wrapper = start_wrapper(&node, addr, service_configuration("Lobby-1", "Lobby")).await;

        // A snapshot of some other service passes through untouched.
        let foreign = {
            let configuration = service_configuration("Other-1", "Other");
            prepared_snapshot(configuration)
        };
        let channel = wrapper.channel().expect("connected");
        wrapper.service_info().publish(&channel, foreign);

        // start() already rotated once (the initial Running publish);
        // the foreign publish must not rotate again.
        assert_eq!(wrapper.service_info().current().lifecycle, ServiceLifecycle::Running);
        assert_eq!(
            wrapper.service_info().current().service_id(),
            wrapper.service_id()
        );
    }

    #[tokio::test]
    async fn test_lifecycle_regression_is_rejected_at_the_node() {
        let (node, addr) = start_node().await;
        let wrapper = start_wrapper(&node, addr, service_configuration("Lobby-1", "Lobby")).await;
        let instance_id = wrapper.service_id().instance_id;

        wait_until(|| {
            node.services()
                .snapshot(&instance_id)
                .is_some_and(|s| s.lifecycle == ServiceLifecycle::Running)
        })
        .await;

        // Hand-craft a stale Prepared snapshot and publish it.
        let mut stale = wrapper.service_info().current();
        stale.lifecycle = ServiceLifecycle::Prepared;
        let channel = wrapper.channel().expect("connected");
        channel.send(
            stratus_net::Packet::typed(
                stratus_net::channels::SERVICE_INFO_PUBLISH,
                stratus_types::Document::new(),
                &stale,
            )
            .unwrap(),
        );

        wait_until(|| node.services().regressions_rejected() >= 1).await;
        assert_eq!(
            node.services().snapshot(&instance_id).unwrap().lifecycle,
            ServiceLifecycle::Running
        );
    }

    #[tokio::test]
    async fn test_identical_republish_still_fans_out_latest() {
        let (node, addr) = start_node().await;
        let publisher = start_wrapper(&node, addr, service_configuration("Lobby-1", "Lobby")).await;
        let observer = start_wrapper(&node, addr, service_configuration("Lobby-2", "Lobby")).await;
        let instance_id = publisher.service_id().instance_id;

        let recorder =
            EventRecorder::install(observer.event_bus(), &[EventKind::ServiceInfoUpdated]);

        // Two back-to-back publishes with identical property documents.
        publisher.publish_service_info_update();
        publisher.publish_service_info_update();

        recorder
            .wait_until(|events| {
                events
                    .iter()
                    .filter(|event| {
                        matches!(
                            event,
                            ClusterEvent::ServiceInfoUpdated(s)
                                if s.service_id().instance_id == instance_id
                        )
                    })
                    .count()
                    >= 2
            })
            .await;

        assert_eq!(node.services().regressions_rejected(), 0);
        assert_eq!(
            node.services().snapshot(&instance_id).unwrap().lifecycle,
            ServiceLifecycle::Running
        );
    }

    /// Build a `Prepared` snapshot for a configuration the same way the
    /// node seeds its registry.
    fn prepared_snapshot(
        configuration: stratus_types::ServiceConfiguration,
    ) -> stratus_types::ServiceInfoSnapshot {
        stratus_types::ServiceInfoSnapshot {
            creation_time_millis: 0,
            address: "127.0.0.1:25565".parse().unwrap(),
            connected_time_millis: 0,
            lifecycle: ServiceLifecycle::Prepared,
            process: stratus_types::ProcessSnapshot::empty(),
            properties: stratus_types::Document::new(),
            configuration,
        }
    }
}
