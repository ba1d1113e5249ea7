//! Integration tests for the create-and-start pipeline.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use vmforge::net::IsolationTag;
use vmforge::{
    AddressResolution, PendingReason, ProvisionControl, ProvisionResponse, RollbackPolicy,
    UserIdentity, VmRequest, VmStatus,
};
use vmforge_test_utils::{LeaseMode, TEST_POOL, TestContext};

fn request(name: &str, user: &str) -> VmRequest {
    VmRequest::new(name, user, 2, 2048, 20)
}

fn user1_tag() -> IsolationTag {
    UserIdentity::User1.isolation_tag()
}

#[tokio::test]
async fn test_create_and_start_success() {
    let ctx = TestContext::new();
    let manager = ctx.manager().unwrap();

    let record = manager
        .create_and_start(request("vm-001", "user1"))
        .await
        .unwrap();

    assert_eq!(record.status(), VmStatus::Running);
    assert_eq!(record.isolation_tag().value(), 100);
    assert_eq!(record.username, "ubuntu");
    assert_eq!((record.cpus, record.memory_mb, record.disk_gb), (2, 2048, 20));
    assert_eq!(record.network.as_deref(), Some("vmforge-net-100"));

    let secret = record.secret().unwrap();
    assert!(secret.len() >= 16);

    let address = record.address().unwrap();
    assert!(user1_tag().contains(address), "{} outside 192.168.100.0/24", address);
    assert_eq!(record.address_resolution(), AddressResolution::Resolved);

    let domain = ctx.control_plane.domain("vm-001").unwrap();
    assert!(domain.running);
    assert_eq!(domain.network.as_deref(), Some("vmforge-net-100"));

    assert_eq!(ctx.pool_volumes(), vec!["vm-001-seed.iso", "vm-001.qcow2"]);
    assert_eq!(ctx.scratch_entries(), 0);
    assert_eq!(manager.metrics().vms_created_total(), 1);
    assert_eq!(manager.metrics().vms_failed_total(), 0);
}

#[tokio::test]
async fn test_lookup_after_create_reports_running_without_secret() {
    let ctx = TestContext::new();
    let manager = ctx.manager().unwrap();

    let created = manager
        .create_and_start(request("vm-001", "user1"))
        .await
        .unwrap();
    let stored = manager.get("vm-001").unwrap();

    assert_eq!(stored.status(), VmStatus::Running);
    assert_eq!(stored.address(), created.address());
    assert!(stored.secret().is_none());
    assert_eq!(manager.list().len(), 1);
}

#[tokio::test]
async fn test_response_shape_on_success() {
    let ctx = TestContext::new();
    let manager = ctx.manager().unwrap();

    let result = manager.create_and_start(request("vm-001", "user1")).await;
    let json = serde_json::to_value(ProvisionResponse::from_result(&result)).unwrap();

    assert_eq!(json["success"], true);
    assert_eq!(json["vm"]["isolation_tag"], 100);
    assert_eq!(json["vm"]["status"], "running");
    assert_eq!(json["vm"]["ssh"]["username"], "ubuntu");
    assert!(json["vm"]["ssh"]["secret"].as_str().unwrap().len() >= 16);
    assert!(
        json["vm"]["ssh"]["address"]
            .as_str()
            .unwrap()
            .starts_with("192.168.100.")
    );
}

#[tokio::test]
async fn test_duplicate_name_is_rejected() {
    let ctx = TestContext::new();
    let manager = ctx.manager().unwrap();

    manager
        .create_and_start(request("vm-001", "user1"))
        .await
        .unwrap();
    let err = manager
        .create_and_start(request("vm-001", "user1"))
        .await
        .unwrap_err();

    assert!(err.is_already_exists());
    assert_eq!(err.code_name(), "VM_ALREADY_EXISTS");
    assert_eq!(err.category().as_str(), "creation");
    assert_eq!(ctx.control_plane.calls("define_domain"), 1);

    // The first VM is untouched.
    assert_eq!(manager.get("vm-001").unwrap().status(), VmStatus::Running);
    assert_eq!(ctx.pool_volumes(), vec!["vm-001-seed.iso", "vm-001.qcow2"]);
}

#[tokio::test]
async fn test_domain_defined_out_of_band_is_rejected_before_side_effects() {
    let ctx = TestContext::new();
    ctx.control_plane.add_domain("vm-007");
    let manager = ctx.manager().unwrap();

    let err = manager
        .create_and_start(request("vm-007", "user1"))
        .await
        .unwrap_err();

    assert!(err.is_already_exists());
    assert_eq!(ctx.control_plane.calls("define_network"), 0);
    assert_eq!(ctx.control_plane.calls("define_domain"), 0);
    assert!(ctx.pool_volumes().is_empty());
    assert_eq!(manager.get("vm-007").unwrap().status(), VmStatus::Failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_same_name_only_one_wins() {
    let ctx = TestContext::new();
    let manager = ctx.manager().unwrap();

    let (a, b) = tokio::join!(
        manager.create_and_start(request("vm-001", "user1")),
        manager.create_and_start(request("vm-001", "user2")),
    );

    assert!(a.is_ok() ^ b.is_ok());
    let err = a.err().or(b.err()).unwrap();
    assert!(err.is_already_exists());
    assert_eq!(ctx.control_plane.calls("define_domain"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_same_user_shares_network() {
    let ctx = TestContext::new();
    let manager = ctx.manager().unwrap();

    let (a, b) = tokio::join!(
        manager.create_and_start(request("vm-a", "user1")),
        manager.create_and_start(request("vm-b", "user1")),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(ctx.control_plane.calls("define_network"), 1);
    assert_eq!(a.network, b.network);
    assert_ne!(a.address(), b.address());
    assert!(user1_tag().contains(a.address().unwrap()));
    assert!(user1_tag().contains(b.address().unwrap()));
}

#[tokio::test]
async fn test_unknown_user_fails_before_any_external_call() {
    let ctx = TestContext::new();
    let manager = ctx.manager().unwrap();

    let err = manager
        .create_and_start(request("vm-001", "mallory"))
        .await
        .unwrap_err();

    assert_eq!(err.code_name(), "UNKNOWN_USER");
    assert_eq!(err.category().as_str(), "configuration");
    assert_eq!(ctx.control_plane.total_calls(), 0);
    assert!(manager.get("vm-001").is_none());
}

#[tokio::test]
async fn test_out_of_range_resources_rejected() {
    let ctx = TestContext::new();
    let manager = ctx.manager().unwrap();

    let err = manager
        .create_and_start(VmRequest::new("vm-001", "user1", 0, 2048, 20))
        .await
        .unwrap_err();

    assert_eq!(err.code_name(), "INVALID_FIELD");
    assert_eq!(ctx.control_plane.total_calls(), 0);
}

#[tokio::test]
async fn test_missing_pool_leaves_no_domain_or_volume() {
    let ctx = TestContext::new();
    ctx.control_plane.remove_pool(TEST_POOL);
    let manager = ctx.manager().unwrap();

    let err = manager
        .create_and_start(request("vm-001", "user1"))
        .await
        .unwrap_err();

    assert_eq!(err.code_name(), "STORAGE_POOL_NOT_FOUND");
    assert_eq!(err.category().as_str(), "resource");
    assert!(ctx.control_plane.domain_names().is_empty());
    assert!(ctx.pool_volumes().is_empty());
    assert_eq!(ctx.scratch_entries(), 0);

    let staged: Vec<_> = std::fs::read_dir(manager.layout().seeds_dir())
        .unwrap()
        .collect();
    assert!(staged.is_empty(), "staged seed left behind: {:?}", staged);

    assert_eq!(manager.get("vm-001").unwrap().status(), VmStatus::Failed);
    assert_eq!(manager.metrics().vms_failed_total(), 1);
}

#[tokio::test]
async fn test_inactive_pool() {
    let ctx = TestContext::new();
    ctx.control_plane.add_pool(TEST_POOL, &ctx.pool_dir(), false);
    let manager = ctx.manager().unwrap();

    let err = manager
        .create_and_start(request("vm-001", "user1"))
        .await
        .unwrap_err();
    assert_eq!(err.code_name(), "STORAGE_POOL_INACTIVE");
}

#[tokio::test]
async fn test_missing_base_image() {
    let ctx = TestContext::new();
    std::fs::remove_file(ctx.base_image()).unwrap();
    let manager = ctx.manager().unwrap();

    let err = manager
        .create_and_start(request("vm-001", "user1"))
        .await
        .unwrap_err();

    assert_eq!(err.code_name(), "BASE_IMAGE_MISSING");
    assert!(ctx.pool_volumes().is_empty());
}

#[tokio::test]
async fn test_clone_failure_discards_volume() {
    let ctx = TestContext::new();
    ctx.disk_cloner.fail_with("qemu-img: Could not open base image");
    let manager = ctx.manager().unwrap();

    let err = manager
        .create_and_start(request("vm-001", "user1"))
        .await
        .unwrap_err();

    assert_eq!(err.code_name(), "VOLUME_CREATE_FAILED");
    assert!(err.details().contains("Could not open base image"));
    assert!(ctx.pool_volumes().is_empty());
}

#[tokio::test]
async fn test_seed_packaging_failure() {
    let ctx = TestContext::new();
    ctx.seed_packager.fail_with("genisoimage: No space left on device");
    let manager = ctx.manager().unwrap();

    let err = manager
        .create_and_start(request("vm-001", "user1"))
        .await
        .unwrap_err();

    assert_eq!(err.code_name(), "SEED_PACKAGING_FAILED");
    assert_eq!(err.details(), "genisoimage: No space left on device");
    assert_eq!(ctx.scratch_entries(), 0);
    assert!(ctx.pool_volumes().is_empty());
}

#[tokio::test]
async fn test_secret_never_in_error_details() {
    let ctx = TestContext::new();
    ctx.control_plane.reject_domain_start("internal error: process exited");
    let manager = ctx.manager().unwrap();

    let err = manager
        .create_and_start(request("vm-001", "user1"))
        .await
        .unwrap_err();

    let json = serde_json::to_string(&ProvisionResponse::failure(&err)).unwrap();
    assert!(!json.contains("secret"));
    assert!(!json.contains("passwd"));
}

#[tokio::test]
async fn test_lease_budget_exhausted_reports_pending() {
    let ctx = TestContext::new();
    ctx.control_plane.set_lease_mode(LeaseMode::Never);
    let manager = ctx.manager().unwrap();

    let record = manager
        .create_and_start(request("vm-001", "user1"))
        .await
        .unwrap();

    assert_eq!(record.status(), VmStatus::Running);
    assert!(record.address().is_none());
    assert_eq!(
        record.address_resolution(),
        AddressResolution::Pending {
            reason: PendingReason::RetriesExhausted
        }
    );
    assert_eq!(
        ctx.control_plane.calls("list_leases"),
        ctx.options.lease_poll.max_attempts as usize
    );
    assert_eq!(manager.metrics().addresses_pending_total(), 1);

    let json = serde_json::to_value(ProvisionResponse::success(&record)).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["vm"]["status"], "running");
    assert_eq!(json["vm"]["ssh"]["address"], "");
    assert_eq!(json["vm"]["ssh"]["address_pending"], true);

    // The lease shows up later; the caller can ask again.
    ctx.control_plane.set_lease_mode(LeaseMode::Immediate);
    let address = manager.address_for("vm-001").await.unwrap();
    assert!(user1_tag().contains(address));
    assert_eq!(manager.get("vm-001").unwrap().address(), Some(address));
}

#[tokio::test]
async fn test_lease_found_after_retries() {
    let ctx = TestContext::new();
    ctx.control_plane.set_lease_mode(LeaseMode::AfterQueries(2));
    let manager = ctx.manager().unwrap();

    let record = manager
        .create_and_start(request("vm-001", "user1"))
        .await
        .unwrap();

    assert!(record.address().is_some());
    assert_eq!(ctx.control_plane.calls("list_leases"), 3);
    assert_eq!(manager.metrics().addresses_pending_total(), 0);
}

#[tokio::test]
async fn test_failing_lease_queries_are_retried_then_pending() {
    let ctx = TestContext::new();
    ctx.control_plane.set_lease_mode(LeaseMode::QueryFails);
    let manager = ctx.manager().unwrap();

    let record = manager
        .create_and_start(request("vm-001", "user1"))
        .await
        .unwrap();

    assert!(record.address_resolution().is_pending());
    assert_eq!(
        ctx.control_plane.calls("list_leases"),
        ctx.options.lease_poll.max_attempts as usize
    );
}

#[tokio::test]
async fn test_start_failure_rolls_back() {
    let ctx = TestContext::new();
    ctx.control_plane
        .reject_domain_start("internal error: qemu unexpectedly closed the monitor");
    let manager = ctx.manager().unwrap();

    let err = manager
        .create_and_start(request("vm-001", "user1"))
        .await
        .unwrap_err();

    assert_eq!(err.code_name(), "DOMAIN_START_FAILED");
    assert_eq!(
        err.details(),
        "internal error: qemu unexpectedly closed the monitor"
    );
    assert!(ctx.control_plane.domain("vm-001").is_none());
    assert_eq!(ctx.control_plane.calls("undefine_domain"), 1);
    assert_eq!(ctx.control_plane.calls("delete_volume"), 2);
    assert!(ctx.pool_volumes().is_empty());
    assert_eq!(manager.get("vm-001").unwrap().status(), VmStatus::Failed);

    // The isolation network is shared and survives.
    assert!(ctx.control_plane.network("vmforge-net-100").is_some());
}

#[tokio::test]
async fn test_start_failure_preserved() {
    let mut ctx = TestContext::new();
    ctx.options.rollback = RollbackPolicy::Preserve;
    ctx.control_plane.reject_domain_start("internal error: no space left");
    let manager = ctx.manager().unwrap();

    let err = manager
        .create_and_start(request("vm-001", "user1"))
        .await
        .unwrap_err();

    assert_eq!(err.code_name(), "DOMAIN_START_FAILED");
    assert!(ctx.control_plane.domain("vm-001").is_some());
    assert_eq!(ctx.control_plane.calls("undefine_domain"), 0);
    assert_eq!(ctx.pool_volumes(), vec!["vm-001-seed.iso", "vm-001.qcow2"]);
    assert_eq!(manager.get("vm-001").unwrap().status(), VmStatus::Failed);

    // The preserved domain blocks a retry under the same name.
    let retry = manager
        .create_and_start(request("vm-001", "user1"))
        .await
        .unwrap_err();
    assert!(retry.is_already_exists());
}

#[tokio::test]
async fn test_preserve_does_not_apply_before_domain_stage() {
    let mut ctx = TestContext::new();
    ctx.options.rollback = RollbackPolicy::Preserve;
    ctx.seed_packager.fail_with("genisoimage: write error");
    let manager = ctx.manager().unwrap();

    manager
        .create_and_start(request("vm-001", "user1"))
        .await
        .unwrap_err();
    assert!(ctx.pool_volumes().is_empty());
}

#[tokio::test]
async fn test_define_failure_discards_volumes() {
    let ctx = TestContext::new();
    ctx.control_plane
        .reject_domain_define("XML error: unsupported configuration: machine type");
    let manager = ctx.manager().unwrap();

    let err = manager
        .create_and_start(request("vm-001", "user1"))
        .await
        .unwrap_err();

    assert_eq!(err.code_name(), "DOMAIN_DEFINE_FAILED");
    assert!(ctx.pool_volumes().is_empty());
    assert_eq!(ctx.control_plane.calls("undefine_domain"), 0);
}

#[tokio::test]
async fn test_refused_volume_delete_still_removes_files() {
    let ctx = TestContext::new();
    ctx.control_plane.reject_domain_start("internal error: process exited");
    ctx.control_plane
        .reject_volume_delete("storage volume 'vm-001.qcow2' is not known to the pool");
    let manager = ctx.manager().unwrap();

    manager
        .create_and_start(request("vm-001", "user1"))
        .await
        .unwrap_err();

    assert_eq!(ctx.control_plane.calls("delete_volume"), 2);
    assert!(ctx.pool_volumes().is_empty());
}

#[tokio::test]
async fn test_cancel_after_clone_discards_everything() {
    let ctx = TestContext::new();
    let token = CancellationToken::new();
    let cancel = token.clone();
    ctx.disk_cloner.after_clone(move || cancel.cancel());
    let manager = ctx.manager().unwrap();

    let control = ProvisionControl::new().with_token(token);
    let err = manager
        .create_and_start_with(request("vm-001", "user1"), control)
        .await
        .unwrap_err();

    assert_eq!(err.code_name(), "CANCELLED");
    assert_eq!(ctx.disk_cloner.clones(), 1);
    assert!(ctx.pool_volumes().is_empty());
    assert!(ctx.control_plane.domain_names().is_empty());
    assert_eq!(ctx.control_plane.calls("define_domain"), 0);

    let staged: Vec<_> = std::fs::read_dir(manager.layout().seeds_dir())
        .unwrap()
        .collect();
    assert!(staged.is_empty(), "staged seed left behind: {:?}", staged);
    assert_eq!(manager.get("vm-001").unwrap().status(), VmStatus::Failed);
}

#[tokio::test]
async fn test_preserve_releases_volumes_when_define_rejected() {
    let mut ctx = TestContext::new();
    ctx.options.rollback = RollbackPolicy::Preserve;
    ctx.control_plane
        .reject_domain_define("XML error: unsupported configuration: machine type");
    let manager = ctx.manager().unwrap();

    let err = manager
        .create_and_start(request("vm-001", "user1"))
        .await
        .unwrap_err();

    assert_eq!(err.code_name(), "DOMAIN_DEFINE_FAILED");
    assert!(ctx.control_plane.domain("vm-001").is_none());
    assert!(ctx.pool_volumes().is_empty());

    // Nothing left behind, so the name is free again.
    ctx.control_plane.accept_domain_define();
    let record = manager
        .create_and_start(request("vm-001", "user1"))
        .await
        .unwrap();
    assert_eq!(record.status(), VmStatus::Running);
}

#[tokio::test]
async fn test_failed_name_can_be_retried() {
    let ctx = TestContext::new();
    ctx.control_plane.remove_pool(TEST_POOL);
    let manager = ctx.manager().unwrap();

    manager
        .create_and_start(request("vm-001", "user1"))
        .await
        .unwrap_err();

    ctx.control_plane.add_pool(TEST_POOL, &ctx.pool_dir(), true);
    let record = manager
        .create_and_start(request("vm-001", "user1"))
        .await
        .unwrap();
    assert_eq!(record.status(), VmStatus::Running);
}

#[tokio::test]
async fn test_cancelled_before_start_touches_nothing() {
    let ctx = TestContext::new();
    let manager = ctx.manager().unwrap();

    let control = ProvisionControl::new();
    control.cancel();

    let err = manager
        .create_and_start_with(request("vm-001", "user1"), control)
        .await
        .unwrap_err();

    assert_eq!(err.code_name(), "CANCELLED");
    assert_eq!(err.category().as_str(), "cancelled");
    assert_eq!(ctx.control_plane.total_calls(), 0);
}

#[tokio::test]
async fn test_expired_deadline() {
    let ctx = TestContext::new();
    let manager = ctx.manager().unwrap();

    let control = ProvisionControl::new().with_timeout(Duration::ZERO);
    let err = manager
        .create_and_start_with(request("vm-001", "user1"), control)
        .await
        .unwrap_err();

    assert_eq!(err.code_name(), "CANCELLED");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_during_address_poll_keeps_domain_running() {
    let mut ctx = TestContext::new();
    ctx.options.lease_poll.max_attempts = 1_000;
    ctx.options.lease_poll.initial_delay_ms = 20;
    ctx.options.lease_poll.max_delay_ms = 20;
    ctx.options.lease_poll.deadline_ms = 60_000;
    ctx.control_plane.set_lease_mode(LeaseMode::Never);
    let manager = ctx.manager().unwrap();

    let token = CancellationToken::new();
    let control = ProvisionControl::new().with_token(token.clone());

    let control_plane = ctx.control_plane.clone();
    let canceller = tokio::spawn(async move {
        while control_plane.calls("list_leases") == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        token.cancel();
    });

    let record = manager
        .create_and_start_with(request("vm-001", "user1"), control)
        .await
        .unwrap();
    canceller.await.unwrap();

    assert_eq!(record.status(), VmStatus::Running);
    assert_eq!(
        record.address_resolution(),
        AddressResolution::Pending {
            reason: PendingReason::Cancelled
        }
    );
    assert!(ctx.control_plane.domain("vm-001").unwrap().running);
    assert_eq!(ctx.pool_volumes(), vec!["vm-001-seed.iso", "vm-001.qcow2"]);
}

#[tokio::test]
async fn test_second_manager_on_same_home_is_refused() {
    let ctx = TestContext::new();
    let _manager = ctx.manager().unwrap();

    let err = ctx.manager().unwrap_err();
    assert!(err.to_string().contains("already using"));
}
