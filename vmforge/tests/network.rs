//! Integration tests for per-user isolation network resolution.

use std::sync::Arc;
use std::time::Duration;

use vmforge::UserIdentity;
use vmforge_test_utils::{RecordingSwitch, TestContext};

#[tokio::test]
async fn test_fixed_tags_per_user() {
    let ctx = TestContext::new();
    let manager = ctx.manager().unwrap();

    for (user, tag, subnet) in [
        ("user1", 100, "192.168.100.0/24"),
        ("user2", 101, "192.168.101.0/24"),
        ("user3", 102, "192.168.102.0/24"),
    ] {
        let network = manager.resolve_network(user).await.unwrap();
        assert_eq!(network.tag.value(), tag);
        assert_eq!(network.name, format!("vmforge-net-{}", tag));
        assert_eq!(network.bridge, format!("virbr{}", tag));
        assert_eq!(network.subnet, subnet);
        assert!(network.active);
    }

    assert_eq!(ctx.control_plane.network_names().len(), 3);
    assert_eq!(manager.metrics().networks_defined_total(), 3);
}

#[tokio::test]
async fn test_resolve_is_idempotent() {
    let ctx = TestContext::new();
    let manager = ctx.manager().unwrap();

    let first = manager.resolve_network("user1").await.unwrap();
    let second = manager.resolve_network("user1").await.unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.tag, second.tag);
    assert_eq!(ctx.control_plane.calls("define_network"), 1);
    assert_eq!(ctx.control_plane.calls("start_network"), 1);
    assert!(ctx.control_plane.network("vmforge-net-100").unwrap().autostart);
}

#[tokio::test]
async fn test_inactive_network_is_started_not_redefined() {
    let ctx = TestContext::new();
    ctx.control_plane.add_network("vmforge-net-101", false);
    let manager = ctx.manager().unwrap();

    let network = manager.resolve_network("user2").await.unwrap();

    assert!(!network.created);
    assert_eq!(ctx.control_plane.calls("define_network"), 0);
    assert_eq!(ctx.control_plane.calls("start_network"), 1);
    assert!(ctx.control_plane.network("vmforge-net-101").unwrap().active);
}

#[tokio::test]
async fn test_unknown_user_makes_no_external_calls() {
    let ctx = TestContext::new();
    let manager = ctx.manager().unwrap();

    let err = manager.resolve_network("user9").await.unwrap_err();

    assert_eq!(err.code_name(), "INVALID_NETWORK_CONFIG");
    assert_eq!(ctx.control_plane.total_calls(), 0);
}

#[tokio::test]
async fn test_define_rejection_carries_subsystem_text() {
    let ctx = TestContext::new();
    ctx.control_plane
        .reject_network_define("internal error: bridge virbr100 already in use");
    let manager = ctx.manager().unwrap();

    let err = manager.resolve_network("user1").await.unwrap_err();

    assert_eq!(err.code_name(), "NETWORK_DEFINE_FAILED");
    assert_eq!(err.details(), "internal error: bridge virbr100 already in use");
    assert!(ctx.control_plane.network("vmforge-net-100").is_none());
}

#[tokio::test]
async fn test_network_defined_by_another_process_is_adopted() {
    let ctx = TestContext::new();
    ctx.control_plane.define_network_elsewhere();
    let manager = ctx.manager().unwrap();

    let network = manager.resolve_network("user1").await.unwrap();

    assert!(!network.created);
    assert!(network.active);
    assert_eq!(ctx.control_plane.calls("define_network"), 1);
    assert_eq!(ctx.control_plane.calls("start_network"), 0);
    assert_eq!(manager.metrics().networks_defined_total(), 0);
}

#[tokio::test]
async fn test_network_started_by_another_process_is_accepted() {
    let ctx = TestContext::new();
    ctx.control_plane.add_network("vmforge-net-100", false);
    ctx.control_plane.start_network_elsewhere();
    let manager = ctx.manager().unwrap();

    let network = manager.resolve_network("user1").await.unwrap();

    assert!(!network.created);
    assert!(ctx.control_plane.network("vmforge-net-100").unwrap().active);
}

#[tokio::test]
async fn test_start_rejection() {
    let ctx = TestContext::new();
    ctx.control_plane.reject_network_start("network is already in use by interface virbr100");
    let manager = ctx.manager().unwrap();

    let err = manager.resolve_network("user1").await.unwrap_err();
    assert_eq!(err.code_name(), "NETWORK_START_FAILED");
}

#[tokio::test]
async fn test_unreachable_control_plane() {
    let ctx = TestContext::new();
    ctx.control_plane.set_unreachable(true);
    let manager = ctx.manager().unwrap();

    let err = manager.resolve_network("user1").await.unwrap_err();
    assert_eq!(err.code_name(), "CONTROL_PLANE_UNREACHABLE");
    assert_eq!(err.category().as_str(), "connection");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_same_user_defines_once() {
    let ctx = TestContext::new();
    ctx.control_plane
        .delay_network_define(Duration::from_millis(50));
    let manager = ctx.manager().unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.resolve_network("user3").await })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        let network = handle.await.unwrap().unwrap();
        assert_eq!(network.tag.value(), 102);
        if network.created {
            created += 1;
        }
    }

    assert_eq!(created, 1);
    assert_eq!(ctx.control_plane.calls("define_network"), 1);
    assert_eq!(manager.metrics().networks_defined_total(), 1);
}

#[tokio::test]
async fn test_switch_enforced_with_tag() {
    let mut ctx = TestContext::new();
    let switch = Arc::new(RecordingSwitch::default());
    ctx.switch = switch.clone();
    let manager = ctx.manager().unwrap();

    manager.resolve_network("user2").await.unwrap();
    manager.resolve_network("user2").await.unwrap();

    let enforced = switch.enforced();
    assert_eq!(enforced.len(), 2);
    assert!(
        enforced
            .iter()
            .all(|(bridge, tag)| bridge == "virbr101" && *tag == UserIdentity::User2.isolation_tag())
    );
}
