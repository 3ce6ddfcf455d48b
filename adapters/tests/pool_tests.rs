//! Connection pool, managed connection and handle tests

mod common;

use common::Harness;
use resource_adapter::connection::{ConnectionEventKind, ConnectionState};
use resource_adapter::credential::Credential;
use resource_adapter::settings::keys;
use resource_adapter::{ConnectionRequestInfo, Error, Lifecycle};
use std::time::Duration;

fn request(channel_id: &str) -> ConnectionRequestInfo {
    ConnectionRequestInfo::for_channel(channel_id)
}

#[tokio::test]
async fn test_allocate_reuses_matching_connection() {
    let h = Harness::new();
    h.outbound("out-1", &[]);
    let manager = h.adapter.connection_manager();

    let first = manager.allocate(None, &request("out-1")).await.unwrap();
    let second = manager.allocate(None, &request("out-1")).await.unwrap();

    let mc = first.managed_connection().unwrap();
    assert_eq!(mc.id(), second.managed_connection().unwrap().id());
    assert_eq!(mc.handle_count(), 2);
    assert_eq!(h.adapter.factory().connection_count(), 1);
    assert_eq!(mc.sink_path(), Some(h.out_dir().join("out-1.0.txt")));
}

#[tokio::test]
async fn test_match_skips_destroyed_connection() {
    let h = Harness::new();
    h.outbound("out-1", &[]);
    let factory = h.adapter.factory();

    let stale = factory
        .create_managed_connection(None, &request("out-1"))
        .await
        .unwrap();
    let live = factory
        .create_managed_connection(None, &request("out-1"))
        .await
        .unwrap();
    stale.destroy(false).unwrap();

    let candidates = vec![stale.clone(), live.clone()];
    let matched = factory
        .match_managed_connections(&candidates, None, &request("out-1"))
        .unwrap();

    assert_eq!(matched.id(), live.id());
    assert!(factory
        .match_managed_connections(&candidates[..1], None, &request("out-1"))
        .is_none());
}

#[tokio::test]
async fn test_allocate_replaces_destroyed_connection() {
    let h = Harness::new();
    h.outbound("out-1", &[]);
    let manager = h.adapter.connection_manager();

    let handle = manager.allocate(None, &request("out-1")).await.unwrap();
    let old = handle.managed_connection().unwrap();
    old.destroy(false).unwrap();

    let fresh = manager.allocate(None, &request("out-1")).await.unwrap();
    assert_ne!(fresh.managed_connection().unwrap().id(), old.id());
    assert!(matches!(
        handle.managed_connection(),
        Err(Error::IllegalState(_))
    ));
}

#[tokio::test]
async fn test_destroy_reaches_every_connection_of_channel() {
    let h = Harness::new();
    h.outbound("out-1", &[]);
    let factory = h.adapter.factory();

    let first = factory
        .create_managed_connection(None, &request("out-1"))
        .await
        .unwrap();
    let second = factory
        .create_managed_connection(None, &request("out-1"))
        .await
        .unwrap();
    assert_eq!(factory.connection_count(), 2);
    assert_eq!(factory.connections_for("out-1").len(), 2);

    factory.destroy_managed_connection("out-1").unwrap();

    assert!(first.is_destroyed());
    assert!(second.is_destroyed());
    assert_eq!(factory.connection_count(), 0);
    assert!(factory.connections_for("out-1").is_empty());
}

#[tokio::test]
async fn test_self_destroy_keeps_sibling_indexed() {
    let h = Harness::new();
    h.outbound("out-1", &[]);
    let factory = h.adapter.factory();

    let first = factory
        .create_managed_connection(None, &request("out-1"))
        .await
        .unwrap();
    let second = factory
        .create_managed_connection(None, &request("out-1"))
        .await
        .unwrap();

    first.destroy(false).unwrap();

    let indexed = factory.connections_for("out-1");
    assert_eq!(indexed.len(), 1);
    assert_eq!(indexed[0].id(), second.id());

    factory.destroy_all();
    assert!(second.is_destroyed());
    assert_eq!(factory.connection_count(), 0);
}

#[tokio::test]
async fn test_destroy_is_idempotent() {
    let h = Harness::new();
    h.outbound("out-1", &[]);
    let handle = h
        .adapter
        .connection_manager()
        .allocate(None, &request("out-1"))
        .await
        .unwrap();
    let mc = handle.managed_connection().unwrap();

    h.adapter.factory().destroy_managed_connection("out-1").unwrap();
    h.adapter.factory().destroy_managed_connection("out-1").unwrap();
    mc.destroy(false).unwrap();

    assert_eq!(mc.state(), ConnectionState::Destroyed);
    assert_eq!(h.adapter.factory().connection_count(), 0);
    assert!(!handle.is_valid());
    assert!(mc.sink_path().is_none());
    assert!(matches!(mc.get_connection(None, None), Err(Error::IllegalState(_))));
    assert!(matches!(mc.cleanup(), Err(Error::IllegalState(_))));
    assert!(matches!(mc.metadata(), Err(Error::IllegalState(_))));
}

#[tokio::test]
async fn test_cleanup_invalidates_handles_and_recycles_sink() {
    let h = Harness::new();
    h.outbound("out-1", &[]);
    let manager = h.adapter.connection_manager();
    let a = manager.allocate(None, &request("out-1")).await.unwrap();
    let b = manager.allocate(None, &request("out-1")).await.unwrap();
    let mc = a.managed_connection().unwrap();

    mc.cleanup().unwrap();
    mc.cleanup().unwrap();

    assert!(!a.is_valid());
    assert!(!b.is_valid());
    assert!(matches!(a.create_interaction(), Err(Error::IllegalState(_))));
    assert_eq!(mc.state(), ConnectionState::Cleaned);
    assert_eq!(mc.sink_path(), Some(h.out_dir().join("out-1.2.txt")));

    let c = mc.get_connection(None, Some(&request("out-1"))).unwrap();
    assert!(c.is_valid());
    assert_eq!(mc.state(), ConnectionState::Open);
}

#[tokio::test]
async fn test_security_mismatch() {
    let h = Harness::new();
    h.outbound("out-1", &[]);
    let info = request("out-1").with_user("alice", "secret");
    let handle = h
        .adapter
        .connection_manager()
        .allocate(None, &info)
        .await
        .unwrap();
    let mc = handle.managed_connection().unwrap();

    let bob = Credential::password("bob", "secret");
    assert!(matches!(
        mc.get_connection(Some(&bob), None),
        Err(Error::SecurityMismatch(_))
    ));
    assert!(matches!(
        mc.get_connection(None, None),
        Err(Error::SecurityMismatch(_))
    ));
    assert!(mc.get_connection(None, Some(&info)).is_ok());
    assert_eq!(mc.metadata().unwrap().user_name.as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_handle_reassociation() {
    let h = Harness::new();
    h.outbound("out-1", &[]);
    h.outbound("out-2", &[]);
    let manager = h.adapter.connection_manager();
    let handle = manager.allocate(None, &request("out-1")).await.unwrap();
    let other = manager.allocate(None, &request("out-2")).await.unwrap();
    let first = handle.managed_connection().unwrap();
    let second = other.managed_connection().unwrap();

    second.associate_connection(&handle).unwrap();

    assert_eq!(handle.managed_connection().unwrap().id(), second.id());
    assert_eq!(first.handle_count(), 0);
    assert_eq!(second.handle_count(), 2);

    // Cleaning the old owner no longer affects the moved handle
    first.cleanup().unwrap();
    assert!(handle.is_valid());

    second.destroy(false).unwrap();
    assert!(matches!(
        first.associate_connection(&handle),
        Ok(())
    ));
    assert!(handle.is_valid());
}

#[tokio::test]
async fn test_associate_with_destroyed_connection_fails() {
    let h = Harness::new();
    h.outbound("out-1", &[]);
    h.outbound("out-2", &[]);
    let manager = h.adapter.connection_manager();
    let handle = manager.allocate(None, &request("out-1")).await.unwrap();
    let other = manager.allocate(None, &request("out-2")).await.unwrap();
    let target = other.managed_connection().unwrap();
    target.destroy(false).unwrap();

    assert!(matches!(
        target.associate_connection(&handle),
        Err(Error::IllegalState(_))
    ));
    assert!(handle.is_valid());
}

#[tokio::test]
async fn test_closing_last_handle_returns_connection_to_pool() {
    let h = Harness::new();
    h.outbound("out-1", &[]);
    let manager = h.adapter.connection_manager();
    let a = manager.allocate(None, &request("out-1")).await.unwrap();
    let b = manager.allocate(None, &request("out-1")).await.unwrap();
    let mc = a.managed_connection().unwrap();

    a.close().unwrap();
    assert_eq!(mc.state(), ConnectionState::Open);
    assert!(matches!(a.close(), Err(Error::IllegalState(_))));

    b.close().unwrap();
    assert_eq!(mc.state(), ConnectionState::Cleaned);
    assert!(!mc.is_destroyed());

    let again = manager.allocate(None, &request("out-1")).await.unwrap();
    assert_eq!(again.managed_connection().unwrap().id(), mc.id());
}

#[tokio::test]
async fn test_idle_cleanup_spares_issued_handle() {
    let h = Harness::new();
    h.outbound("out-1", &[]);
    let mc = h
        .adapter
        .factory()
        .create_managed_connection(None, &request("out-1"))
        .await
        .unwrap();
    let sink = mc.sink_path();

    let handle = mc.get_connection(None, Some(&request("out-1"))).unwrap();
    assert!(!mc.cleanup_if_idle().unwrap());
    assert!(handle.is_valid());
    assert_eq!(mc.state(), ConnectionState::Open);
    assert_eq!(mc.sink_path(), sink);

    handle.close().unwrap();
    assert!(mc.cleanup_if_idle().unwrap());
    assert_eq!(mc.state(), ConnectionState::Cleaned);

    mc.destroy(false).unwrap();
    assert!(!mc.cleanup_if_idle().unwrap());
    assert_eq!(mc.state(), ConnectionState::Destroyed);
}

#[tokio::test]
async fn test_error_event_destroys_connection() {
    let h = Harness::new();
    h.outbound("out-1", &[]);
    let handle = h
        .adapter
        .connection_manager()
        .allocate(None, &request("out-1"))
        .await
        .unwrap();
    let mc = handle.managed_connection().unwrap();

    mc.send_event(ConnectionEventKind::Error, None, Some("sink lost".to_string()));

    assert!(mc.is_destroyed());
    assert_eq!(h.adapter.factory().connection_count(), 0);
}

#[tokio::test]
async fn test_unknown_channel_is_config_unavailable() {
    let h = Harness::new();

    let result = h
        .adapter
        .connection_manager()
        .allocate(None, &request("missing"))
        .await;

    assert!(matches!(result, Err(Error::ConfigUnavailable { .. })));
}

#[tokio::test]
async fn test_missing_sink_directory_is_resource_open_error() {
    let h = Harness::new();
    h.outbound("out-1", &[(keys::SINK_DIRECTORY, "/nonexistent/adapter/out")]);

    let result = h
        .adapter
        .connection_manager()
        .allocate(None, &request("out-1"))
        .await;

    assert!(matches!(result, Err(Error::ResourceOpen { .. })));
    assert_eq!(h.adapter.factory().connection_count(), 0);
}

#[tokio::test]
async fn test_local_transactions_and_metadata() {
    let h = Harness::new();
    h.outbound("out-1", &[]);
    let handle = h
        .adapter
        .connection_manager()
        .allocate(None, &request("out-1"))
        .await
        .unwrap();
    let mc = handle.managed_connection().unwrap();

    assert!(!mc.supports_local_transactions());
    assert!(matches!(
        mc.set_supports_local_transactions(true),
        Err(Error::NotSupported(_))
    ));
    assert!(mc.set_supports_local_transactions(false).is_ok());

    let metadata = mc.metadata().unwrap();
    assert_eq!(metadata.channel_id, "out-1");
    assert_eq!(metadata.active_handles, 1);
    assert_eq!(metadata.user_name, None);
}

#[tokio::test]
async fn test_channel_removal_destroys_connection() {
    let h = Harness::new();
    h.outbound("out-1", &[]);
    h.adapter.start().await.unwrap();
    let handle = h
        .adapter
        .connection_manager()
        .allocate(None, &request("out-1"))
        .await
        .unwrap();
    let mc = handle.managed_connection().unwrap();

    h.lookup.remove_channel("out-1");
    for _ in 0..100 {
        if mc.is_destroyed() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(mc.is_destroyed());
    assert!(!handle.is_valid());
    assert_eq!(h.adapter.factory().connection_count(), 0);
    h.adapter.stop().await.unwrap();
}
