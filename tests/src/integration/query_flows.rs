//! Driver-API query flows: correlated responses, timeouts, and the
//! impersonated command path.

#[cfg(test)]
mod tests {
    use crate::support::{service_configuration, start_node, start_wrapper};
    use std::sync::Arc;
    use std::time::Duration;
    use stratus_bus::{EventKind, EventListener, EventListenerResult, EventOwner};
    use stratus_net::{
        channels, NetworkChannel, NoopChannelHandler, Packet, PacketListenerRegistry, QueryError,
        QueryManager,
    };
    use stratus_node::CommandExecutor;
    use stratus_types::{Document, PermissionUser, ServiceTemplate};
    use stratus_wrapper::DriverApiError;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_template_listing_round_trips() {
        let (node, addr) = start_node().await;
        node.register_templates(
            "local",
            vec![ServiceTemplate {
                prefix: "Lobby".into(),
                name: "default".into(),
                storage: "local".into(),
            }],
        );

        let wrapper = start_wrapper(&node, addr, service_configuration("Lobby-1", "Lobby")).await;

        let templates = wrapper
            .api()
            .get_local_template_storage_templates()
            .await
            .expect("templates");
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].to_string(), "local:Lobby/default");

        // An unknown storage yields an empty list, not an error.
        let none = wrapper
            .api()
            .get_template_storage_templates("missing")
            .await
            .expect("empty");
        assert!(none.is_empty());

        // All pending entries drained once the calls resolved.
        assert_eq!(wrapper.queries().pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_authority_times_out_and_drains_the_map() {
        // Two raw channels with no driver-api listener on the far side:
        // the authority never answers.
        let (left, right) = tokio::io::duplex(64 * 1024);
        let addr: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
        let silent_registry = Arc::new(PacketListenerRegistry::new());
        let _authority = NetworkChannel::spawn(
            right,
            addr,
            addr,
            silent_registry,
            Arc::new(NoopChannelHandler),
        )
        .await;
        let agent = NetworkChannel::spawn(
            left,
            addr,
            addr,
            Arc::new(PacketListenerRegistry::new()),
            Arc::new(NoopChannelHandler),
        )
        .await;

        let queries = QueryManager::new();
        let request = Packet::typed(
            channels::DRIVER_API,
            Document::new(),
            &stratus_types::DriverRequest::GetTemplateStorageTemplates { storage: "local".into() },
        )
        .unwrap();

        let started = tokio::time::Instant::now();
        let result = queries.query(&agent, request, Duration::from_secs(5)).await;
        let elapsed = started.elapsed();

        assert!(matches!(result, Err(QueryError::Timeout(_))));
        assert!(elapsed >= Duration::from_secs(5));
        assert_eq!(queries.pending_count(), 0);
    }

    struct EchoExecutor;

    impl CommandExecutor for EchoExecutor {
        fn execute(&self, user: &PermissionUser, command_line: &str) -> (bool, Vec<String>) {
            (true, vec![format!("{} ran: {}", user.name, command_line)])
        }
    }

    #[tokio::test]
    async fn test_impersonated_command_runs_through_the_executor() {
        let (node, addr) = start_node().await;
        node.set_command_executor(Arc::new(EchoExecutor));

        let user = PermissionUser::new(Uuid::new_v4(), "derklaro", 100);
        node.permissions().add_user(user.clone());

        let wrapper = start_wrapper(&node, addr, service_configuration("Lobby-1", "Lobby")).await;

        let (success, output) = wrapper
            .api()
            .send_command_line_as_permission_user(user.unique_id, "stop Lobby-2")
            .await
            .expect("command result");

        assert!(success);
        assert_eq!(output, vec!["derklaro ran: stop Lobby-2".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_permission_user_fails_the_command() {
        let (node, addr) = start_node().await;
        node.set_command_executor(Arc::new(EchoExecutor));
        let wrapper = start_wrapper(&node, addr, service_configuration("Lobby-1", "Lobby")).await;

        let result = wrapper
            .api()
            .send_command_line_as_permission_user(Uuid::new_v4(), "stop Lobby-2")
            .await;

        assert!(matches!(result, Err(DriverApiError::Remote(_))));
    }

    struct CommandVeto;

    impl EventListener for CommandVeto {
        fn handle(&self, event: &mut stratus_bus::ClusterEvent) -> EventListenerResult {
            event.set_cancelled(true);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cancelled_pre_process_blocks_execution() {
        let (node, addr) = start_node().await;
        node.set_command_executor(Arc::new(EchoExecutor));
        node.event_bus()
            .register(EventKind::CommandPreProcess, EventOwner::new(), Arc::new(CommandVeto));

        let user = PermissionUser::new(Uuid::new_v4(), "derklaro", 100);
        node.permissions().add_user(user.clone());

        let wrapper = start_wrapper(&node, addr, service_configuration("Lobby-1", "Lobby")).await;

        let (success, output) = wrapper
            .api()
            .send_command_line_as_permission_user(user.unique_id, "stop Lobby-2")
            .await
            .expect("command result");

        assert!(!success);
        assert_eq!(output, vec!["command execution cancelled".to_string()]);
    }
}
