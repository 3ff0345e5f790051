//! Authorization handshake flows: accept, deny, and their effects on
//! startup.

#[cfg(test)]
mod tests {
    use crate::support::{
        service_configuration, start_node, start_wrapper, wait_until, TEST_CONNECTION_KEY,
    };
    use stratus_wrapper::{Wrapper, WrapperError, WrapperOptions};

    #[tokio::test]
    async fn test_accepted_agent_reaches_steady_state() {
        let (node, addr) = start_node().await;
        let configuration = service_configuration("Lobby-1", "Lobby");
        let instance_id = configuration.service_id.instance_id;

        let wrapper = start_wrapper(&node, addr, configuration).await;

        // The node assigned a runtime configuration during the handshake.
        let assigned = wrapper.runtime_configuration();
        assert_eq!(assigned.get_string("node"), Some("Node-1"));
        assert_eq!(assigned.get_string("service"), Some("Lobby-1"));

        // The agent is authorized and its service is registered.
        wait_until(|| node.agents().count() == 1).await;
        wait_until(|| node.services().snapshot(&instance_id).is_some()).await;
    }

    #[tokio::test]
    async fn test_wrong_connection_key_is_denied_without_driver_calls() {
        let (node, addr) = start_node().await;
        let configuration = service_configuration("Lobby-1", "Lobby");
        node.provision(configuration.clone());

        let mut options = WrapperOptions::new(addr, TEST_CONNECTION_KEY, configuration);
        options.connection_key = "wrong-key".to_string();
        let wrapper = Wrapper::new(options, None);

        let error = wrapper.start().await.expect_err("must be denied");
        assert!(matches!(error, WrapperError::Handshake(_)));

        // Startup aborted before any driver-API call went out.
        assert_eq!(
            wrapper
                .queries()
                .stats()
                .registered
                .load(std::sync::atomic::Ordering::Relaxed),
            0
        );
        assert_eq!(node.agents().count(), 0);
    }

    #[tokio::test]
    async fn test_unprovisioned_service_is_denied() {
        let (node, addr) = start_node().await;
        // Deliberately NOT provisioned on the node.
        let configuration = service_configuration("Rogue-1", "Rogue");

        let options = WrapperOptions::new(addr, TEST_CONNECTION_KEY, configuration);
        let wrapper = Wrapper::new(options, None);

        let error = wrapper.start().await.expect_err("must be denied");
        assert!(matches!(error, WrapperError::Handshake(_)));
        assert_eq!(node.agents().count(), 0);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_the_previous_channel() {
        let (node, addr) = start_node().await;
        let configuration = service_configuration("Lobby-1", "Lobby");

        let first = start_wrapper(&node, addr, configuration.clone()).await;
        wait_until(|| node.agents().count() == 1).await;

        // Same service identity connects again: the stale channel is
        // replaced, never kept alongside.
        let options = WrapperOptions::new(addr, TEST_CONNECTION_KEY, configuration);
        let second = Wrapper::new(options, None);
        second.start().await.expect("second start");

        wait_until(|| node.agents().count() == 1).await;
        wait_until(|| first.channel().map(|c| c.is_closed()).unwrap_or(true)).await;
        assert!(second.channel().is_some_and(|c| !c.is_closed()));
    }
}
