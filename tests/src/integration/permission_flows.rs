//! Permission replication flows: write-through mutations, authority
//! pushes, and handler hooks.

#[cfg(test)]
mod tests {
    use crate::support::{service_configuration, start_node, start_wrapper, wait_until};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use stratus_types::{Permission, PermissionGroup, PermissionUser};
    use stratus_wrapper::{DriverApiError, PermissionHandler};
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingHandler {
        added_groups: Mutex<Vec<String>>,
        deleted_groups: AtomicUsize,
    }

    impl PermissionHandler for RecordingHandler {
        fn handle_add_group(&self, group: &PermissionGroup) {
            self.added_groups.lock().push(group.name.clone());
        }
        fn handle_delete_group(&self, _group: &PermissionGroup) {
            self.deleted_groups.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_group_mutation_replicates_to_other_agents() {
        let (node, addr) = start_node().await;
        let first = start_wrapper(&node, addr, service_configuration("Lobby-1", "Lobby")).await;
        let second = start_wrapper(&node, addr, service_configuration("Lobby-2", "Lobby")).await;

        let first_handler = Arc::new(RecordingHandler::default());
        let second_handler = Arc::new(RecordingHandler::default());
        first.permissions().add_handler(first_handler.clone());
        second.permissions().add_handler(second_handler.clone());

        let mut group = PermissionGroup::new("admin");
        group.permissions.push(Permission::named("stratus.command.stop"));
        first.permissions().add_group(group).await.expect("mutation acked");

        // The mutating agent applied on its ack...
        assert!(first.permissions().cached_group("admin").is_some());
        assert_eq!(*first_handler.added_groups.lock(), ["admin"]);

        // ...the authority holds the truth...
        assert!(node.permissions().group("admin").is_some());

        // ...and the other agent converges via the push, hooks firing
        // exactly once.
        wait_until(|| second.permissions().cached_group("admin").is_some()).await;
        assert_eq!(*second_handler.added_groups.lock(), ["admin"]);
    }

    #[tokio::test]
    async fn test_group_delete_push_fires_hook_once_and_evicts_cache() {
        let (node, addr) = start_node().await;
        let first = start_wrapper(&node, addr, service_configuration("Lobby-1", "Lobby")).await;
        let second = start_wrapper(&node, addr, service_configuration("Lobby-2", "Lobby")).await;

        first.permissions().add_group(PermissionGroup::new("admin")).await.unwrap();
        wait_until(|| second.permissions().cached_group("admin").is_some()).await;

        let handler = Arc::new(RecordingHandler::default());
        second.permissions().add_handler(handler.clone());

        first.permissions().delete_group("admin").await.expect("delete acked");

        wait_until(|| second.permissions().cached_group("admin").is_none()).await;
        assert_eq!(handler.deleted_groups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_mutation_leaves_both_sides_unchanged() {
        let (node, addr) = start_node().await;
        let wrapper = start_wrapper(&node, addr, service_configuration("Lobby-1", "Lobby")).await;

        let ghost = PermissionUser::new(Uuid::new_v4(), "ghost", 0);
        let result = wrapper.permissions().update_user(ghost.clone()).await;

        assert!(matches!(result, Err(DriverApiError::Remote(_))));
        assert!(wrapper.permissions().cached_user(&ghost.unique_id).is_none());
        assert!(node.permissions().user(&ghost.unique_id).is_none());
    }

    #[tokio::test]
    async fn test_cache_initializes_from_the_authority() {
        let (node, addr) = start_node().await;
        node.permissions().add_group(PermissionGroup::new("default"));
        node.permissions().add_group(PermissionGroup::new("admin"));

        let wrapper = start_wrapper(&node, addr, service_configuration("Lobby-1", "Lobby")).await;

        // init() ran inside start(); both groups are already cached.
        assert_eq!(wrapper.permissions().cached_groups().len(), 2);
    }

    #[tokio::test]
    async fn test_user_fetch_is_authoritative() {
        let (node, addr) = start_node().await;
        let wrapper = start_wrapper(&node, addr, service_configuration("Lobby-1", "Lobby")).await;

        let user = PermissionUser::new(Uuid::new_v4(), "derklaro", 100);
        node.permissions().add_user(user.clone());

        // Not yet cached locally, but fetchable.
        assert!(wrapper.permissions().cached_user(&user.unique_id).is_none());
        let fetched = wrapper.permissions().fetch_user(user.unique_id).await.unwrap();
        assert_eq!(fetched, Some(user.clone()));
        assert!(wrapper.permissions().cached_user(&user.unique_id).is_some());
    }
}
