//! Channel-message relay flows: broadcast, targeted, and node-terminal
//! delivery.

#[cfg(test)]
mod tests {
    use crate::support::{service_configuration, start_node, start_wrapper, EventRecorder};
    use std::time::Duration;
    use stratus_bus::{ClusterEvent, EventKind};
    use stratus_types::{ChannelMessage, Document, MessageTarget};

    fn received(events: &[ClusterEvent], message_name: &str) -> usize {
        events
            .iter()
            .filter(|event| {
                matches!(
                    event,
                    ClusterEvent::ChannelMessageReceived(m) if m.message == message_name
                )
            })
            .count()
    }

    #[tokio::test]
    async fn test_broadcast_reaches_other_agents_and_the_node() {
        let (node, addr) = start_node().await;
        let sender = start_wrapper(&node, addr, service_configuration("Lobby-1", "Lobby")).await;
        let receiver = start_wrapper(&node, addr, service_configuration("Lobby-2", "Lobby")).await;

        let sender_events =
            EventRecorder::install(sender.event_bus(), &[EventKind::ChannelMessageReceived]);
        let receiver_events =
            EventRecorder::install(receiver.event_bus(), &[EventKind::ChannelMessageReceived]);
        let node_events =
            EventRecorder::install(node.event_bus(), &[EventKind::ChannelMessageReceived]);

        sender.messenger().send(&ChannelMessage::broadcast(
            "cloud",
            "restart_all",
            Document::new().append("delay_seconds", 30u64),
        ));

        receiver_events.wait_until(|events| received(events, "restart_all") == 1).await;
        node_events.wait_until(|events| received(events, "restart_all") == 1).await;

        // The publisher itself is not a recipient of its own broadcast.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(received(&sender_events.events(), "restart_all"), 0);
    }

    #[tokio::test]
    async fn test_service_target_reaches_exactly_that_service() {
        let (node, addr) = start_node().await;
        let sender = start_wrapper(&node, addr, service_configuration("Lobby-1", "Lobby")).await;
        let target = start_wrapper(&node, addr, service_configuration("Bungee-1", "Bungee")).await;
        let bystander = start_wrapper(&node, addr, service_configuration("Lobby-2", "Lobby")).await;

        let target_events =
            EventRecorder::install(target.event_bus(), &[EventKind::ChannelMessageReceived]);
        let bystander_events =
            EventRecorder::install(bystander.event_bus(), &[EventKind::ChannelMessageReceived]);

        sender.messenger().send(&ChannelMessage::to_service(
            "cloud",
            "motd",
            Document::new().append("line", "welcome"),
            "Bungee-1",
        ));

        target_events.wait_until(|events| received(events, "motd") == 1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(received(&bystander_events.events(), "motd"), 0);
    }

    #[tokio::test]
    async fn test_node_target_is_terminal_at_the_node() {
        let (node, addr) = start_node().await;
        let sender = start_wrapper(&node, addr, service_configuration("Lobby-1", "Lobby")).await;
        let bystander = start_wrapper(&node, addr, service_configuration("Lobby-2", "Lobby")).await;

        let node_events =
            EventRecorder::install(node.event_bus(), &[EventKind::ChannelMessageReceived]);
        let bystander_events =
            EventRecorder::install(bystander.event_bus(), &[EventKind::ChannelMessageReceived]);

        sender.messenger().send(&ChannelMessage {
            channel: "cloud".to_string(),
            message: "report".to_string(),
            data: Document::new(),
            target: MessageTarget::Node("Node-1".to_string()),
        });

        node_events.wait_until(|events| received(events, "report") == 1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(received(&bystander_events.events(), "report"), 0);
    }

    #[tokio::test]
    async fn test_task_group_target_reaches_every_member() {
        let (node, addr) = start_node().await;
        let sender = start_wrapper(&node, addr, service_configuration("Bungee-1", "Bungee")).await;
        let lobby_1 = start_wrapper(&node, addr, service_configuration("Lobby-1", "Lobby")).await;
        let lobby_2 = start_wrapper(&node, addr, service_configuration("Lobby-2", "Lobby")).await;

        let lobby_1_events =
            EventRecorder::install(lobby_1.event_bus(), &[EventKind::ChannelMessageReceived]);
        let lobby_2_events =
            EventRecorder::install(lobby_2.event_bus(), &[EventKind::ChannelMessageReceived]);
        let sender_events =
            EventRecorder::install(sender.event_bus(), &[EventKind::ChannelMessageReceived]);

        sender.messenger().send(&ChannelMessage {
            channel: "cloud".to_string(),
            message: "clear_cache".to_string(),
            data: Document::new(),
            target: MessageTarget::TaskGroup("Lobby".to_string()),
        });

        lobby_1_events.wait_until(|events| received(events, "clear_cache") == 1).await;
        lobby_2_events.wait_until(|events| received(events, "clear_cache") == 1).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(received(&sender_events.events(), "clear_cache"), 0);
    }

    #[tokio::test]
    async fn test_unknown_target_is_dropped_best_effort() {
        let (node, addr) = start_node().await;
        let sender = start_wrapper(&node, addr, service_configuration("Lobby-1", "Lobby")).await;

        // No such service connected; the message just disappears.
        sender.messenger().send(&ChannelMessage::to_service(
            "cloud",
            "motd",
            Document::new(),
            "Ghost-1",
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(node.agents().count(), 1);
    }
}
