use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fleet_bus::{MemoryBus, Transport};
use fleet_core::command::PackageSpec;
use fleet_core::config::TimeoutConfig;
use fleet_core::types::{EncryptionStatus, MeshSettings, PeerState, VolumeState, VolumeType};
use fleet_core::{
    Action, Agent, AgentStatus, FleetError, OperationState, PackageAction, Resource, ResourceDb,
    ResourceKey, VolumeAction,
};
use fleet_server::mesh_api::SetupKeyIssuer;
use fleet_server::orchestrator::Orchestrator;
use serde_json::{json, Value};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct FixedKey(&'static str);

#[async_trait]
impl SetupKeyIssuer for FixedKey {
    async fn issue_one_off_key(
        &self,
        _settings: &MeshSettings,
        _name: &str,
    ) -> fleet_core::Result<String> {
        Ok(self.0.to_string())
    }
}

struct Harness {
    _dir: TempDir,
    db: Arc<ResourceDb>,
    bus: MemoryBus,
    orch: Arc<Orchestrator>,
}

fn fast_timeouts() -> TimeoutConfig {
    TimeoutConfig {
        status_secs: 1,
        toggle_secs: 1,
        install_secs: 1,
    }
}

/// Agent A1 (tenant acme) with system volume C:, data volume D: and mesh settings.
fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(ResourceDb::open(&dir.path().join("console.redb")).unwrap());
    db.put_agent(&Agent::new("A1", "acme", "10.0.0.5")).unwrap();
    db.put_resource(&Resource::volume("A1", "C:", VolumeState::new(VolumeType::System)))
        .unwrap();
    db.put_resource(&Resource::volume("A1", "D:", VolumeState::new(VolumeType::Fixed)))
        .unwrap();
    db.put_mesh_settings(
        "acme",
        &MeshSettings {
            management_url: "https://mesh.acme.io".into(),
            access_token: "nbp_acme".into(),
        },
    )
    .unwrap();

    let bus = MemoryBus::new();
    let transport: Arc<dyn Transport> = Arc::new(bus.clone());
    let orch = Orchestrator::new(Arc::clone(&db), transport)
        .with_timeouts(fast_timeouts())
        .with_key_issuer(Arc::new(FixedKey("KEY-1")));
    Harness {
        _dir: dir,
        db,
        bus,
        orch: Arc::new(orch),
    }
}

fn reply(v: Value) -> Option<Bytes> {
    Some(Bytes::from(serde_json::to_vec(&v).unwrap()))
}

fn payload_json(payload: &Bytes) -> Value {
    serde_json::from_slice(payload).unwrap()
}

fn drive(d: &str) -> ResourceKey {
    ResourceKey::Volume(d.into())
}

fn resource(h: &Harness, key: &ResourceKey) -> Resource {
    h.db.get_resource("A1", key).unwrap().unwrap()
}

/// Answer every bitlocker request successfully, reporting C: and D: for status.
fn healthy_bitlocker(bus: &MemoryBus) {
    bus.respond("agent.bitlocker.A1", |_, payload| {
        let req: Value = serde_json::from_slice(&payload).unwrap();
        if req["Operation"] == "status" {
            return reply(json!({
                "Operation": "status",
                "Error": "",
                "Volumes": [
                    {
                        "Volume": "C:",
                        "VolumeType": "system",
                        "EncryptionStatus": "encrypted",
                        "ProtectionStatus": "on"
                    },
                    {
                        "Volume": "D:",
                        "VolumeType": "fixed",
                        "EncryptionStatus": "encrypted",
                        "ProtectionStatus": "on",
                        "PassphraseVolumeKeyProtectorID": "{pp-1}"
                    }
                ]
            }));
        }
        reply(json!({
            "Operation": req["Operation"],
            "Volume": req["Volume"],
            "Error": "",
            "PassphraseVolumeKeyProtectorID": "{pp-1}"
        }))
    });
}

// ---------------------------------------------------------------------------
// Volumes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn encrypt_persists_passphrase_and_returns_to_idle() {
    let h = harness();
    healthy_bitlocker(&h.bus);

    let r = h.orch.encrypt("A1", "D:", Some("Secr3tPass!")).await.unwrap();
    assert!(r.operation.is_idle());
    let vol = r.volume_state().unwrap();
    assert_eq!(vol.passphrase.as_deref(), Some("Secr3tPass!"));
    assert_eq!(vol.passphrase_protector_id.as_deref(), Some("{pp-1}"));
    assert_eq!(vol.encryption, EncryptionStatus::Encrypting);

    let stored = resource(&h, &drive("D:"));
    assert_eq!(stored, r);

    let sent = h.bus.delivered();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "agent.bitlocker.A1");
    assert_eq!(
        payload_json(&sent[0].payload),
        json!({"Operation": "encrypt", "Volume": "D:", "Passphrase": "Secr3tPass!"})
    );
}

#[tokio::test]
async fn busy_resource_is_a_conflict_and_sends_nothing() {
    let h = harness();
    healthy_bitlocker(&h.bus);
    h.db.try_begin_operation("A1", &drive("D:"), Action::Volume(VolumeAction::Decrypt))
        .unwrap();

    let err = h
        .orch
        .encrypt("A1", "D:", Some("Secr3tPass!"))
        .await
        .unwrap_err();
    assert!(
        matches!(err, FleetError::Conflict { ref action, .. } if action == "volume.decrypt"),
        "{err}"
    );
    assert_eq!(h.bus.delivered_count(), 0);
}

#[tokio::test]
async fn invalid_passphrase_sends_nothing_and_mutates_nothing() {
    let h = harness();
    healthy_bitlocker(&h.bus);
    let before = h.db.get_raw("A1", &drive("D:")).unwrap();

    let err = h.orch.encrypt("A1", "D:", Some("short")).await.unwrap_err();
    assert!(matches!(err, FleetError::Validation(_)));
    assert_eq!(h.bus.delivered_count(), 0);
    assert_eq!(h.db.get_raw("A1", &drive("D:")).unwrap(), before);
}

#[tokio::test]
async fn resume_on_data_volume_is_invalid_device() {
    let h = harness();
    healthy_bitlocker(&h.bus);

    let err = h.orch.resume_protection("A1", "D:").await.unwrap_err();
    assert!(matches!(err, FleetError::Validation(ref m) if m == "invalid device"));
    assert_eq!(h.bus.delivered_count(), 0);

    let r = h.orch.suspend_protection("A1", "C:").await.unwrap();
    assert!(r.operation.is_idle());
}

#[tokio::test]
async fn offline_agent_leaves_resource_idle() {
    let h = harness();

    let err = h
        .orch
        .encrypt("A1", "D:", Some("Secr3tPass!"))
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::Offline(_)));
    assert_eq!(err.to_string(), "agent A1 is offline");

    let r = resource(&h, &drive("D:"));
    assert!(r.operation.is_idle());
    assert!(r.last_error.is_none());
}

#[tokio::test]
async fn timeout_stalls_until_cleared() {
    let h = harness();
    h.bus.respond("agent.bitlocker.A1", |_, _| None);

    let err = h.orch.decrypt("A1", "D:").await.unwrap_err();
    assert!(matches!(err, FleetError::Timeout { .. }), "{err}");
    let r = resource(&h, &drive("D:"));
    assert!(matches!(r.operation, OperationState::Stalled { .. }));

    healthy_bitlocker(&h.bus);
    let err = h
        .orch
        .encrypt("A1", "D:", Some("Secr3tPass!"))
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::Conflict { .. }));

    let previous = h.orch.clear_operation("A1", &drive("D:")).await.unwrap();
    assert_eq!(
        previous.in_progress(),
        Some(Action::Volume(VolumeAction::Decrypt))
    );
    assert!(resource(&h, &drive("D:")).operation.is_idle());
    h.orch.encrypt("A1", "D:", Some("Secr3tPass!")).await.unwrap();
}

#[tokio::test]
async fn remote_error_stalls_with_reason() {
    let h = harness();
    h.bus.respond("agent.bitlocker.A1", |_, _| {
        reply(json!({"Operation": "decrypt", "Volume": "D:", "Error": "access denied"}))
    });

    let err = h.orch.decrypt("A1", "D:").await.unwrap_err();
    assert!(matches!(err, FleetError::Remote { ref message, .. } if message == "access denied"));
    let r = resource(&h, &drive("D:"));
    assert!(matches!(
        r.operation,
        OperationState::Stalled { ref reason, .. } if reason == "access denied"
    ));
}

#[tokio::test]
async fn unknown_agent_and_volume_are_not_found() {
    let h = harness();
    assert!(matches!(
        h.orch.decrypt("A9", "D:").await,
        Err(FleetError::AgentNotFound(_))
    ));
    assert!(matches!(
        h.orch.decrypt("A1", "Z:").await,
        Err(FleetError::ResourceNotFound { .. })
    ));
}

// ---------------------------------------------------------------------------
// Mesh
// ---------------------------------------------------------------------------

#[tokio::test]
async fn install_creates_mesh_row() {
    let h = harness();
    h.bus.respond("agent.netbird.install.A1", |_, _| {
        reply(json!({"Error": "", "Installed": true, "Version": "0.28.4"}))
    });

    let r = h.orch.mesh_install("A1").await.unwrap();
    let peer = r.peer_state().unwrap();
    assert!(peer.installed);
    assert_eq!(peer.version.as_deref(), Some("0.28.4"));

    let sent = h.bus.delivered();
    assert_eq!(
        payload_json(&sent[0].payload)["ManagementURL"],
        "https://mesh.acme.io"
    );
}

#[tokio::test]
async fn install_without_token_creates_no_mesh_row() {
    let h = harness();
    h.db.put_agent(&Agent::new("B1", "nomesh", "10.0.0.6")).unwrap();

    let err = h.orch.mesh_install("B1").await.unwrap_err();
    assert!(matches!(err, FleetError::Validation(_)));
    assert_eq!(h.bus.delivered_count(), 0);
    assert!(h.db.get_resource("B1", &ResourceKey::Mesh).unwrap().is_none());
}

#[tokio::test]
async fn offline_install_records_error() {
    let h = harness();

    let err = h.orch.mesh_install("A1").await.unwrap_err();
    assert!(matches!(err, FleetError::Offline(_)));
    let r = resource(&h, &ResourceKey::Mesh);
    assert!(r.operation.is_idle());
    assert_eq!(r.last_error.as_deref(), Some("agent A1 is offline"));
}

#[tokio::test]
async fn register_sends_issued_setup_key() {
    let h = harness();
    h.db.put_resource(&Resource::mesh(
        "A1",
        PeerState {
            installed: true,
            ..Default::default()
        },
    ))
    .unwrap();
    let seen = Arc::new(Mutex::new(None));
    let captured = Arc::clone(&seen);
    h.bus.respond("agent.netbird.register.A1", move |_, payload| {
        *captured.lock().unwrap() = Some(payload);
        reply(json!({}))
    });

    let r = h.orch.mesh_register("A1").await.unwrap();
    let peer = r.peer_state().unwrap();
    assert!(peer.connected);
    assert_eq!(peer.management_url.as_deref(), Some("https://mesh.acme.io"));

    let payload = seen.lock().unwrap().clone().unwrap();
    assert_eq!(payload_json(&payload)["OneOffKey"], "KEY-1");
}

#[tokio::test]
async fn mesh_without_settings_is_validation() {
    let h = harness();
    h.db.put_agent(&Agent::new("B1", "nomesh", "10.0.0.6")).unwrap();
    h.db.put_resource(&Resource::mesh("B1", PeerState::default()))
        .unwrap();

    let err = h.orch.mesh_connect("B1").await.unwrap_err();
    assert!(matches!(err, FleetError::Validation(_)));
    assert_eq!(h.bus.delivered_count(), 0);
}

#[tokio::test]
async fn switch_profile_needs_a_name() {
    let h = harness();
    h.db.put_resource(&Resource::mesh("A1", PeerState::default()))
        .unwrap();

    assert!(matches!(
        h.orch.mesh_switch_profile("A1", "  ").await,
        Err(FleetError::Validation(_))
    ));
    assert_eq!(h.bus.delivered_count(), 0);
}

// ---------------------------------------------------------------------------
// Agent-level commands
// ---------------------------------------------------------------------------

#[tokio::test]
async fn admit_enables_waiting_agent_once() {
    let h = harness();
    h.bus.respond("agent.enable.A1", |_, _| Some(Bytes::new()));

    let agent = h.orch.admit_agent("A1").await.unwrap();
    assert_eq!(agent.status, AgentStatus::Enabled);
    assert_eq!(h.bus.delivered()[0].subject, "agent.enable.A1");

    assert!(matches!(
        h.orch.admit_agent("A1").await,
        Err(FleetError::Validation(_))
    ));
}

#[tokio::test]
async fn disable_updates_inventory_status() {
    let h = harness();
    h.bus.respond("agent.disable.A1", |_, _| reply(json!({"Error": ""})));

    let agent = h.orch.disable_agent("A1").await.unwrap();
    assert_eq!(agent.status, AgentStatus::Disabled);
    assert_eq!(
        h.db.get_agent("A1").unwrap().unwrap().status,
        AgentStatus::Disabled
    );
}

#[tokio::test]
async fn remote_session_sends_generated_pin() {
    let h = harness();
    h.bus.respond("agent.startvnc.A1", |_, _| Some(Bytes::new()));

    let session = h.orch.start_remote_session("A1", true).await.unwrap();
    assert_eq!(session.pin.len(), 6);

    let sent = payload_json(&h.bus.delivered()[0].payload);
    assert_eq!(sent["PIN"], session.pin.as_str());
    assert_eq!(sent["NotifyUser"], true);
}

#[tokio::test]
async fn force_report_to_offline_agent_is_offline() {
    let h = harness();
    assert!(matches!(
        h.orch.force_report("A1").await,
        Err(FleetError::Offline(_))
    ));
}

// ---------------------------------------------------------------------------
// Packages
// ---------------------------------------------------------------------------

fn firefox() -> PackageSpec {
    PackageSpec {
        package_id: "Mozilla.Firefox".into(),
        package_name: "Firefox".into(),
        repository: "winget".into(),
    }
}

async fn wait_until_idle(h: &Harness, key: &ResourceKey) -> Resource {
    for _ in 0..100 {
        let r = resource(h, key);
        if r.operation.is_idle() {
            return r;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("{key} never returned to idle");
}

#[tokio::test]
async fn deploy_stays_pending_until_confirmed() {
    let h = harness();
    h.orch.spawn_package_listener().await.unwrap();

    let r = h
        .orch
        .deploy_package("A1", PackageAction::Install, &firefox())
        .await
        .unwrap();
    assert!(matches!(r.operation, OperationState::Pending { .. }));
    assert_eq!(h.bus.delivered()[0].subject, "agent.installpackage.A1");

    let err = h
        .orch
        .deploy_package("A1", PackageAction::Update, &firefox())
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::Conflict { .. }));

    h.bus
        .publish(
            "agent.package.result.A1",
            Bytes::from(
                serde_json::to_vec(&json!({
                    "AgentId": "A1",
                    "PackageId": "Mozilla.Firefox",
                    "Action": "install",
                    "Error": ""
                }))
                .unwrap(),
            ),
        )
        .await
        .unwrap();

    let key = ResourceKey::Package("Mozilla.Firefox".into());
    let r = wait_until_idle(&h, &key).await;
    let pkg = r.package_state().unwrap();
    assert!(pkg.installed);
    assert_eq!(pkg.last_action, Some(PackageAction::Install));
    assert_eq!(pkg.name, "Firefox");
}

#[tokio::test]
async fn failed_package_result_records_error() {
    let h = harness();
    h.orch
        .deploy_package("A1", PackageAction::Install, &firefox())
        .await
        .unwrap();

    let result = serde_json::from_value(json!({
        "AgentId": "A1",
        "PackageId": "Mozilla.Firefox",
        "Action": "install",
        "Error": "installer exited with 1603"
    }))
    .unwrap();
    let r = h.orch.handle_package_result(result).await.unwrap();
    assert!(r.operation.is_idle());
    assert_eq!(r.last_error.as_deref(), Some("installer exited with 1603"));
    assert!(!r.package_state().unwrap().installed);
}

fn package_result(action: &str) -> fleet_core::command::PackageResult {
    serde_json::from_value(json!({
        "AgentId": "A1",
        "PackageId": "Mozilla.Firefox",
        "Action": action,
        "Error": ""
    }))
    .unwrap()
}

#[tokio::test]
async fn mismatched_package_result_keeps_guard() {
    let h = harness();
    h.orch
        .deploy_package("A1", PackageAction::Install, &firefox())
        .await
        .unwrap();
    let key = ResourceKey::Package("Mozilla.Firefox".into());
    let before = h.db.get_raw("A1", &key).unwrap();

    let err = h
        .orch
        .handle_package_result(package_result("uninstall"))
        .await
        .unwrap_err();
    assert!(
        matches!(err, FleetError::Conflict { ref action, .. } if action == "package.install")
    );
    assert_eq!(h.db.get_raw("A1", &key).unwrap(), before);
    assert!(matches!(
        resource(&h, &key).operation,
        OperationState::Pending { .. }
    ));

    let r = h
        .orch
        .handle_package_result(package_result("install"))
        .await
        .unwrap();
    assert!(r.operation.is_idle());
    assert!(r.package_state().unwrap().installed);
}

#[tokio::test]
async fn unsolicited_package_result_is_dropped() {
    let h = harness();
    h.orch
        .deploy_package("A1", PackageAction::Install, &firefox())
        .await
        .unwrap();
    h.orch
        .handle_package_result(package_result("install"))
        .await
        .unwrap();
    let key = ResourceKey::Package("Mozilla.Firefox".into());
    let before = h.db.get_raw("A1", &key).unwrap();

    let err = h
        .orch
        .handle_package_result(package_result("uninstall"))
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::Conflict { ref action, .. } if action == "idle"));
    assert_eq!(h.db.get_raw("A1", &key).unwrap(), before);
    assert!(resource(&h, &key).package_state().unwrap().installed);
}

#[tokio::test]
async fn package_without_name_is_validation() {
    let h = harness();
    let mut spec = firefox();
    spec.package_name = String::new();
    assert!(matches!(
        h.orch
            .deploy_package("A1", PackageAction::Install, &spec)
            .await,
        Err(FleetError::Validation(_))
    ));
    assert_eq!(h.bus.delivered_count(), 0);
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

fn healthy_mesh(bus: &MemoryBus) {
    bus.respond("agent.netbird.refresh.A1", |_, _| {
        reply(json!({
            "Error": "",
            "Installed": true,
            "Connected": true,
            "IP": "100.64.0.12",
            "Profiles": ["default"],
            "Profile": "default"
        }))
    });
}

#[tokio::test]
async fn refresh_twice_leaves_identical_rows() {
    let h = harness();
    healthy_bitlocker(&h.bus);
    healthy_mesh(&h.bus);

    let first = h.orch.refresh("A1").await.unwrap();
    assert_eq!(first.volumes, 2);
    assert!(first.mesh);
    let snapshot: Vec<_> = [drive("C:"), drive("D:"), ResourceKey::Mesh]
        .iter()
        .map(|k| h.db.get_raw("A1", k).unwrap())
        .collect();

    h.orch.refresh("A1").await.unwrap();
    let again: Vec<_> = [drive("C:"), drive("D:"), ResourceKey::Mesh]
        .iter()
        .map(|k| h.db.get_raw("A1", k).unwrap())
        .collect();
    assert_eq!(snapshot, again);
}

#[tokio::test]
async fn refresh_overwrites_stalled_marker() {
    let h = harness();
    healthy_bitlocker(&h.bus);
    h.db.try_begin_operation("A1", &drive("D:"), Action::Volume(VolumeAction::Encrypt))
        .unwrap();
    h.db.mark_stalled("A1", &drive("D:"), "no reply").unwrap();

    assert_eq!(h.orch.refresh_volumes("A1").await.unwrap(), 2);
    let r = resource(&h, &drive("D:"));
    assert!(r.operation.is_idle());
    assert_eq!(
        r.volume_state().unwrap().encryption,
        EncryptionStatus::Encrypted
    );
}

#[tokio::test]
async fn refresh_keeps_passphrase_while_protector_reported() {
    let h = harness();
    healthy_bitlocker(&h.bus);
    h.orch.encrypt("A1", "D:", Some("Secr3tPass!")).await.unwrap();

    h.orch.refresh_volumes("A1").await.unwrap();
    let r = resource(&h, &drive("D:"));
    assert_eq!(
        r.volume_state().unwrap().passphrase.as_deref(),
        Some("Secr3tPass!")
    );
}

#[tokio::test]
async fn refresh_keeps_rows_for_unreported_volumes() {
    let h = harness();
    healthy_bitlocker(&h.bus);
    h.db.put_resource(&Resource::volume(
        "A1",
        "E:",
        VolumeState::new(VolumeType::Removable),
    ))
    .unwrap();

    assert_eq!(h.orch.refresh_volumes("A1").await.unwrap(), 2);
    assert!(h.db.get_resource("A1", &drive("E:")).unwrap().is_some());
}

#[tokio::test]
async fn refresh_without_mesh_settings_skips_mesh() {
    let h = harness();
    h.db.put_agent(&Agent::new("B1", "nomesh", "10.0.0.6")).unwrap();
    h.bus.respond("agent.bitlocker.B1", |_, _| {
        reply(json!({"Operation": "status", "Error": "", "Volumes": []}))
    });

    let report = h.orch.refresh("B1").await.unwrap();
    assert_eq!(report.written(), 0);
    assert!(!report.mesh);
}

#[tokio::test]
async fn sweep_demotes_aged_pending_only() {
    let h = harness();
    h.db.save_operation_state(
        "A1",
        &drive("C:"),
        OperationState::Pending {
            action: Action::Volume(VolumeAction::Encrypt),
            started_at: chrono::Utc::now() - chrono::Duration::hours(2),
        },
    )
    .unwrap();
    h.db.try_begin_operation("A1", &drive("D:"), Action::Volume(VolumeAction::Encrypt))
        .unwrap();

    assert_eq!(
        h.orch.sweep_stalled(Duration::from_secs(3600)).await.unwrap(),
        1
    );
    assert!(matches!(
        resource(&h, &drive("C:")).operation,
        OperationState::Stalled { .. }
    ));
    assert!(matches!(
        resource(&h, &drive("D:")).operation,
        OperationState::Pending { .. }
    ));
}
