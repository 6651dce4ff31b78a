//! Unit tests for the Migration reconciler

#[cfg(test)]
mod tests {
    use crate::cluster::{ExternalKind, ResourceKind};
    use crate::mock::{MockCluster, RecordingPower};
    use crate::reconciler::Reconciler;
    use crate::reconciler::migration::builder::{POPULATE_TARGET_FINALIZER, RECREATIONS_ANNOTATION, VM_ID_LABEL};
    use crate::test_utils::*;
    use chrono::Utc;
    use crds::condition::{self, Condition, condition_type};
    use crds::*;
    use inventory_client::{Disk, GuestNetwork, MockSourceAdapter, Nic, Vm};
    use k8s_openapi::api::core::v1::{PersistentVolumeClaim, PersistentVolumeClaimSpec, Pod, PodStatus, VolumeResourceRequirements};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube_runtime::controller::Action;
    use serde_json::{Value, json};
    use std::collections::{BTreeMap, HashMap};
    use std::time::Duration;

    fn ready() -> Vec<Condition> {
        vec![Condition::truthy(condition_type::READY, "Ready", "")]
    }

    fn meta(name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("mtv".to_string()),
            ..Default::default()
        }
    }

    /// Ready plan `p1` moving `web` (vm-1) with maps for net-1 and ds-1.
    fn setup(source: ProviderType, power: RecordingPower) -> (Reconciler, MockCluster, MockSourceAdapter) {
        let cluster = MockCluster::new();
        let adapter = MockSourceAdapter::new(source);
        let reconciler = reconciler_with(&cluster, &adapter, power);

        cluster.add_provider(ready_provider("vcenter", "mtv", source));
        cluster.add_provider(host_provider("mtv"));
        cluster.add_secret(secret("vcenter-secret", "mtv", &[("user", "admin"), ("password", "secret")]));
        adapter.add_network(network("net-1", "ovirtmgmt"));
        adapter.add_storage(storage("ds-1", "data"));
        adapter.add_vm(vm("vm-1", "web", &[("disk-1", 1 << 30, "ds-1")], &["net-1"]));

        let providers = ProviderPair {
            source: ResourceRef::new("vcenter"),
            destination: ResourceRef::new("host"),
        };
        cluster.add_network_map(NetworkMap {
            metadata: meta("nets"),
            spec: NetworkMapSpec {
                provider: providers.clone(),
                map: vec![NetworkPair {
                    source: SourceRef::by_id("net-1"),
                    destination: DestinationNetwork::pod(),
                }],
            },
            status: Some(MapStatus {
                conditions: ready(),
                observed_generation: Some(1),
            }),
        });
        cluster.add_storage_map(StorageMap {
            metadata: meta("disks"),
            spec: StorageMapSpec {
                provider: providers,
                map: vec![StoragePair {
                    source: SourceRef::by_id("ds-1"),
                    destination: DestinationStorage {
                        storage_class: "ceph-rbd".to_string(),
                        ..Default::default()
                    },
                    offload_plugin: None,
                }],
            },
            status: Some(MapStatus {
                conditions: ready(),
                observed_generation: Some(1),
            }),
        });

        let mut p = plan("p1", "mtv", &["vm-1"]);
        p.spec.map = PlanMaps {
            network: Some(ResourceRef::new("nets")),
            storage: Some(ResourceRef::new("disks")),
        };
        p.status = Some(PlanStatus {
            conditions: ready(),
            resolved_vms: vec![PlanVm {
                id: Some("vm-1".to_string()),
                name: "web".to_string(),
                namespace: None,
            }],
            ..Default::default()
        });
        cluster.add_plan(p);
        (reconciler, cluster, adapter)
    }

    /// Run one pass and feed the written status back into `m`.
    async fn pass(reconciler: &Reconciler, cluster: &MockCluster, m: &mut Migration) -> Action {
        let action = reconciler.reconcile_migration(m).await.unwrap();
        m.status = cluster
            .status(ResourceKind::Migration, "mtv", "m1")
            .map(|s| serde_json::from_value(s).unwrap());
        action
    }

    fn vm_status(m: &Migration) -> VmStatus {
        m.status.as_ref().unwrap().vms[0].clone()
    }

    fn edit_plan(cluster: &MockCluster, edit: impl FnOnce(&mut Plan)) {
        let mut plans = cluster.plans.lock().unwrap();
        edit(plans.get_mut("mtv/p1").unwrap());
    }

    /// Make `vm` the only VM the plan resolved.
    fn resolve(cluster: &MockCluster, adapter: &MockSourceAdapter, vm: Vm) {
        let resolved = PlanVm {
            id: Some(vm.id.clone()),
            name: vm.name.clone(),
            namespace: vm.namespace.clone(),
        };
        adapter.add_vm(vm);
        edit_plan(cluster, |p| p.status.as_mut().unwrap().resolved_vms = vec![resolved]);
    }

    fn claim(namespace: &str, name: &str, class: &str, size: &str, labels: BTreeMap<String, String>) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                storage_class_name: Some(class.to_string()),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([("storage".to_string(), Quantity(size.to_string()))])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            status: None,
        }
    }

    /// KubeVirt VM `web` in namespace `apps` with one claim `web-root`.
    fn resolve_openshift_vm(cluster: &MockCluster, adapter: &MockSourceAdapter, power: &str) {
        cluster.add_pvc(claim("apps", "web-root", "standard", "10Gi", BTreeMap::new()));
        resolve(
            cluster,
            adapter,
            Vm {
                id: "vm-os".to_string(),
                name: "web".to_string(),
                namespace: Some("apps".to_string()),
                disks: vec![Disk {
                    id: "web-root".to_string(),
                    name: Some("rootdisk".to_string()),
                    ..Default::default()
                }],
                nics: vec![Nic {
                    network: "net-1".to_string(),
                    ..Default::default()
                }],
                power_state: Some(power.to_string()),
                ..Default::default()
            },
        );
    }

    fn pod(cluster: &MockCluster, name: &str) -> Pod {
        cluster.pods.lock().unwrap().get(&format!("target/{name}")).cloned().unwrap()
    }

    fn pod_env(pod: &Pod) -> HashMap<String, String> {
        pod.spec.as_ref().unwrap().containers[0]
            .env
            .iter()
            .flatten()
            .map(|e| (e.name.clone(), e.value.clone().unwrap_or_default()))
            .collect()
    }

    fn target_vm(cluster: &MockCluster, name: &str) -> Value {
        cluster
            .virtual_machines
            .lock()
            .unwrap()
            .get(&format!("target/{name}"))
            .cloned()
            .unwrap()
    }

    fn claim_names(vm: &Value) -> Vec<String> {
        vm["spec"]["template"]["spec"]["volumes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["persistentVolumeClaim"]["claimName"].as_str().unwrap().to_string())
            .collect()
    }

    fn worker_pod(uid: &str, phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(format!("populate-{uid}")),
                namespace: Some("target".to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_cold_ovirt_migration_succeeds() {
        let (reconciler, cluster, adapter) = setup(ProviderType::Ovirt, RecordingPower::default());
        adapter.set_power_state("vm-1", "down");
        let mut m = migration("m1", "mtv", "p1");

        let action = pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));
        assert_eq!(vm_status(&m).phase, VmPhase::Populating);

        let journal = cluster.journal();
        assert!(journal.contains(&"create secret target/p1-vcenter-secret".to_string()));
        assert!(journal.contains(&"create OvirtVolumePopulator target/web-disk-1".to_string()));
        assert!(journal.contains(&"create pvc target/web-disk-1".to_string()));
        let populator = cluster.populator("target", "web-disk-1").unwrap();
        assert_eq!(populator["spec"]["diskId"], "disk-1");
        assert_eq!(populator["spec"]["engineSecretName"], "p1-vcenter-secret");

        cluster.set_populator_progress("target", "web-disk-1", "42");
        pass(&reconciler, &cluster, &mut m).await;
        let step = vm_status(&m).step(VmPhase::Populating).cloned().unwrap();
        assert_eq!(step.tasks[0].progress, 42);
        assert_eq!(step.tasks[0].phase, DiskPhase::Populating);

        cluster.set_pvc_phase("target", "Bound");
        let action = pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(action, Action::await_change());

        let vm = vm_status(&m);
        assert_eq!(vm.phase, VmPhase::Succeeded);
        assert_eq!(vm.restore_power_state, Some(PowerState::Off));
        assert!(cluster.populator("target", "web-disk-1").is_none());
        assert!(cluster.journal().contains(&"create virtualmachine target/web".to_string()));

        let status = m.status.as_ref().unwrap();
        assert!(condition::is_true(&status.conditions, condition_type::SUCCEEDED));
        assert!(!condition::is_true(&status.conditions, condition_type::EXECUTING));
        assert!(status.timed.is_completed());

        let plan_status: PlanStatus =
            serde_json::from_value(cluster.status(ResourceKind::Plan, "mtv", "p1").unwrap()).unwrap();
        assert_eq!(plan_status.vms[0].phase, VmPhase::Succeeded);
        assert_eq!(plan_status.migration.unwrap().name, "m1");
        assert!(condition::is_true(&plan_status.conditions, condition_type::SUCCEEDED));
        assert!(condition::is_true(&plan_status.conditions, condition_type::READY));
    }

    #[tokio::test]
    async fn test_pipeline_steps_are_monotonic() {
        let (reconciler, cluster, adapter) = setup(ProviderType::Ovirt, RecordingPower::default());
        adapter.set_power_state("vm-1", "down");
        let mut m = migration("m1", "mtv", "p1");

        pass(&reconciler, &cluster, &mut m).await;
        cluster.set_pvc_phase("target", "Bound");
        pass(&reconciler, &cluster, &mut m).await;

        let vm = vm_status(&m);
        for pair in vm.pipeline.windows(2) {
            let (a, b) = (&pair[0].timed, &pair[1].timed);
            assert!(a.completed.unwrap() <= b.started.unwrap());
        }
        assert!(vm.timed.started.unwrap() <= vm.timed.completed.unwrap());
    }

    #[tokio::test]
    async fn test_source_powered_off_once_then_awaited() {
        let power = RecordingPower::default();
        let requests = power.requests.clone();
        let (reconciler, cluster, adapter) = setup(ProviderType::Ovirt, power);
        let mut m = migration("m1", "mtv", "p1");

        pass(&reconciler, &cluster, &mut m).await;
        pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(*requests.lock().unwrap(), vec!["vm-1".to_string()]);
        let vm = vm_status(&m);
        assert_eq!(vm.phase, VmPhase::PreCheck);
        assert_eq!(vm.restore_power_state, Some(PowerState::On));

        adapter.set_power_state("vm-1", "down");
        pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(vm_status(&m).phase, VmPhase::Populating);
        assert_eq!(vm_status(&m).restore_power_state, Some(PowerState::On));
    }

    #[tokio::test]
    async fn test_unsupported_power_off_warns_once() {
        let power = RecordingPower {
            unsupported: true,
            ..Default::default()
        };
        let (reconciler, cluster, _) = setup(ProviderType::Openstack, power);
        let mut m = migration("m1", "mtv", "p1");

        pass(&reconciler, &cluster, &mut m).await;
        pass(&reconciler, &cluster, &mut m).await;

        let warnings = cluster
            .event_reasons()
            .into_iter()
            .filter(|r| r == "PowerOffUnsupported")
            .count();
        assert_eq!(warnings, 1);
        assert_eq!(vm_status(&m).phase, VmPhase::PreCheck);
    }

    #[tokio::test]
    async fn test_restart_limit_fails_vm() {
        let (reconciler, cluster, adapter) = setup(ProviderType::Ovirt, RecordingPower::default());
        adapter.set_power_state("vm-1", "down");
        let mut m = migration("m1", "mtv", "p1");
        pass(&reconciler, &cluster, &mut m).await;

        let claim = cluster.pvc("target", "web-disk-1").unwrap();
        let uid = claim.metadata.uid.clone().unwrap();
        cluster
            .pvcs
            .lock()
            .unwrap()
            .get_mut("target/web-disk-1")
            .unwrap()
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(RECREATIONS_ANNOTATION.to_string(), "3".to_string());
        cluster.add_pod(worker_pod(&uid, "Failed"));

        let action = pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(action, Action::await_change());

        let vm = vm_status(&m);
        assert_eq!(vm.phase, VmPhase::Failed);
        assert_eq!(vm.restarts, 3);
        assert_eq!(vm.error.as_ref().unwrap().phase, "Populating");
        let task = &vm.step(VmPhase::Populating).unwrap().tasks[0];
        assert_eq!(task.phase, DiskPhase::Failed);

        let status = m.status.as_ref().unwrap();
        assert!(condition::is_true(&status.conditions, condition_type::FAILED));
        assert!(cluster.event_reasons().contains(&"VMFailed".to_string()));
    }

    #[tokio::test]
    async fn test_failed_worker_under_limit_keeps_waiting() {
        let (reconciler, cluster, adapter) = setup(ProviderType::Ovirt, RecordingPower::default());
        adapter.set_power_state("vm-1", "down");
        let mut m = migration("m1", "mtv", "p1");
        pass(&reconciler, &cluster, &mut m).await;

        let uid = cluster.pvc("target", "web-disk-1").unwrap().metadata.uid.unwrap();
        cluster.add_pod(worker_pod(&uid, "Failed"));

        let action = pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));
        assert_eq!(vm_status(&m).phase, VmPhase::Populating);
    }

    #[tokio::test]
    async fn test_cancel_removes_workers_before_releasing_claims() {
        let (reconciler, cluster, adapter) = setup(ProviderType::Ovirt, RecordingPower::default());
        adapter.set_power_state("vm-1", "down");
        let mut m = migration("m1", "mtv", "p1");
        pass(&reconciler, &cluster, &mut m).await;

        let uid = cluster.pvc("target", "web-disk-1").unwrap().metadata.uid.unwrap();
        cluster.add_pod(worker_pod(&uid, "Running"));
        cluster
            .pvcs
            .lock()
            .unwrap()
            .get_mut("target/web-disk-1")
            .unwrap()
            .metadata
            .finalizers = Some(vec![POPULATE_TARGET_FINALIZER.to_string()]);

        m.spec.cancel = vec!["web".to_string()];
        let action = pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(action, Action::await_change());

        let journal = cluster.journal();
        let position = |entry: String| journal.iter().position(|e| *e == entry).unwrap();
        let pod_deleted = position(format!("delete pod target/populate-{uid}"));
        let shadow_deleted = position(format!("delete pvc target/prime-{uid}"));
        let released = position("patch pvc target/web-disk-1".to_string());
        assert!(pod_deleted < released);
        assert!(shadow_deleted < released);
        assert!(!journal.contains(&"delete pvc target/web-disk-1".to_string()));

        let claim = cluster.pvc("target", "web-disk-1").unwrap();
        assert!(claim.metadata.finalizers.unwrap_or_default().is_empty());
        assert!(cluster.populator("target", "web-disk-1").is_none());

        assert_eq!(vm_status(&m).phase, VmPhase::Canceled);
        let status = m.status.as_ref().unwrap();
        assert!(condition::is_true(&status.conditions, condition_type::CANCELED));
    }

    #[tokio::test]
    async fn test_waits_for_plan_readiness() {
        let (reconciler, cluster, _) = setup(ProviderType::Ovirt, RecordingPower::default());
        cluster.plans.lock().unwrap().get_mut("mtv/p1").unwrap().status = None;
        let mut m = migration("m1", "mtv", "p1");

        let action = pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));

        let status = m.status.unwrap();
        assert!(status.vms.is_empty());
        let executing = condition::find(&status.conditions, condition_type::EXECUTING).unwrap();
        assert_eq!(executing.reason, "PlanNotReady");
        assert!(cluster.journal().is_empty());
    }

    #[tokio::test]
    async fn test_unmapped_network_fails_precheck() {
        let (reconciler, cluster, adapter) = setup(ProviderType::Ovirt, RecordingPower::default());
        adapter.add_vm(vm("vm-2", "db", &[("disk-2", 1 << 30, "ds-1")], &["net-9"]));
        let mut plan = cluster.plans.lock().unwrap().get("mtv/p1").cloned().unwrap();
        plan.status.as_mut().unwrap().resolved_vms = vec![PlanVm {
            id: Some("vm-2".to_string()),
            name: "db".to_string(),
            namespace: None,
        }];
        cluster.add_plan(plan);
        let mut m = migration("m1", "mtv", "p1");

        pass(&reconciler, &cluster, &mut m).await;

        let vm = vm_status(&m);
        assert_eq!(vm.phase, VmPhase::Failed);
        let error = vm.error.unwrap();
        assert_eq!(error.phase, "PreCheck");
        assert!(error.reasons[0].contains("net-9"));
        assert!(!cluster.journal().iter().any(|e| e.starts_with("create pvc")));
    }

    #[tokio::test]
    async fn test_finished_migration_is_left_alone() {
        let (reconciler, cluster, _) = setup(ProviderType::Ovirt, RecordingPower::default());
        let mut m = migration("m1", "mtv", "p1");
        m.status = Some(MigrationStatus {
            conditions: vec![Condition::truthy(condition_type::SUCCEEDED, "Completed", "")],
            ..Default::default()
        });

        let action = reconciler.reconcile_migration(&m).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(cluster.patches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deleted_migration_cleans_up_and_releases() {
        let (reconciler, cluster, adapter) = setup(ProviderType::Ovirt, RecordingPower::default());
        adapter.set_power_state("vm-1", "down");
        let mut m = migration("m1", "mtv", "p1");
        pass(&reconciler, &cluster, &mut m).await;
        let uid = cluster.pvc("target", "web-disk-1").unwrap().metadata.uid.unwrap();

        m.metadata.finalizers = Some(vec![crate::reconciler::FINALIZER.to_string()]);
        m.metadata.deletion_timestamp = Some(serde_json::from_value(serde_json::json!("2026-01-01T00:00:00Z")).unwrap());
        let action = reconciler.reconcile_migration(&m).await.unwrap();
        assert_eq!(action, Action::await_change());

        assert!(cluster.journal().contains(&format!("delete pod target/populate-{uid}")));
        assert!(cluster.pvc("target", "web-disk-1").is_some());
        let patches = cluster.patches.lock().unwrap();
        let last = patches.last().unwrap();
        assert_eq!(last.2["metadata"]["finalizers"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_cold_vsphere_converts_populated_disks() {
        let (reconciler, cluster, adapter) = setup(ProviderType::Vsphere, RecordingPower::default());
        adapter.set_power_state("vm-1", "poweredOff");
        let mut m = migration("m1", "mtv", "p1");

        pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(vm_status(&m).phase, VmPhase::Populating);
        assert!(
            cluster
                .journal()
                .contains(&"create VSphereXcopyVolumePopulator target/web-disk-1".to_string())
        );
        let populator = cluster.populator("target", "web-disk-1").unwrap();
        assert_eq!(populator["spec"]["vmdkPath"], "[ds-1] web/disk-1.vmdk");

        cluster.set_pvc_phase("target", "Bound");
        pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(vm_status(&m).phase, VmPhase::Convert);
        let convert = pod(&cluster, "web-m1uid-convert");
        let env = pod_env(&convert);
        assert_eq!(env["V2V_source"], "vsphere");
        assert!(!env.contains_key("V2V_preserveStaticIPs"));
        assert!(!env.contains_key("V2V_diskSources"));

        cluster.set_pod_phase("target", "web-m1uid-convert", "Succeeded");
        let action = pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(action, Action::await_change());
        assert_eq!(vm_status(&m).phase, VmPhase::Succeeded);

        let target = target_vm(&cluster, "web");
        assert_eq!(claim_names(&target), vec!["web-disk-1".to_string()]);
        let disks = &target["spec"]["template"]["spec"]["domain"]["devices"]["disks"];
        assert_eq!(disks[0]["disk"]["bus"], "virtio");
        assert_eq!(target["spec"]["runStrategy"], "Halted");
    }

    #[tokio::test]
    async fn test_warm_final_sync_runs_after_power_off() {
        let power = RecordingPower::default();
        let requests = power.requests.clone();
        let (reconciler, cluster, adapter) = setup(ProviderType::Ovirt, power);
        edit_plan(&cluster, |p| p.spec.type_ = MigrationType::Warm);
        let mut m = migration("m1", "mtv", "p1");

        pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(vm_status(&m).phase, VmPhase::Populating);
        assert!(requests.lock().unwrap().is_empty());

        cluster.set_pvc_phase("target", "Bound");
        pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(vm_status(&m).phase, VmPhase::Cutover);

        m.spec.cutover = Some(Utc::now() - chrono::Duration::minutes(1));
        pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(vm_status(&m).phase, VmPhase::Cutover);
        assert_eq!(*requests.lock().unwrap(), vec!["vm-1".to_string()]);
        let syncs = |cluster: &MockCluster| {
            cluster
                .journal()
                .iter()
                .filter(|e| *e == "create pod target/web-disk-1-sync")
                .count()
        };
        assert_eq!(syncs(&cluster), 0);

        adapter.set_power_state("vm-1", "down");
        pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(vm_status(&m).phase, VmPhase::FinalSync);
        assert_eq!(syncs(&cluster), 1);
        let sync = pod(&cluster, "web-disk-1-sync");
        let args = sync.spec.as_ref().unwrap().containers[0].args.clone().unwrap();
        assert_eq!(args[0], "--mode=sync");
        assert!(args.contains(&"--disk-id=disk-1".to_string()));
        assert!(args.contains(&"--pvc-size=1073741824".to_string()));

        pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(vm_status(&m).phase, VmPhase::FinalSync);
        assert_eq!(syncs(&cluster), 1);
        let status = vm_status(&m);
        let task = &status.step(VmPhase::FinalSync).unwrap().tasks[0];
        assert_eq!(task.phase, DiskPhase::Populating);

        cluster.set_pod_phase("target", "web-disk-1-sync", "Succeeded");
        let action = pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(action, Action::await_change());

        let vm = vm_status(&m);
        assert_eq!(vm.phase, VmPhase::Succeeded);
        let step = vm.step(VmPhase::FinalSync).unwrap();
        assert_eq!(step.tasks[0].phase, DiskPhase::Bound);
        assert!(step.timed.is_completed());
        let journal = cluster.journal();
        let position = |entry: &str| journal.iter().position(|e| e == entry).unwrap();
        assert!(position("delete pod target/web-disk-1-sync") < position("create virtualmachine target/web"));
    }

    #[tokio::test]
    async fn test_failed_final_sync_fails_vm() {
        let (reconciler, cluster, adapter) = setup(ProviderType::Ovirt, RecordingPower::default());
        edit_plan(&cluster, |p| p.spec.type_ = MigrationType::Warm);
        adapter.set_power_state("vm-1", "down");
        let mut m = migration("m1", "mtv", "p1");
        m.spec.cutover = Some(Utc::now());

        pass(&reconciler, &cluster, &mut m).await;
        cluster.set_pvc_phase("target", "Bound");
        pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(vm_status(&m).phase, VmPhase::FinalSync);

        cluster.set_pod_phase("target", "web-disk-1-sync", "Failed");
        pass(&reconciler, &cluster, &mut m).await;
        let vm = vm_status(&m);
        assert_eq!(vm.phase, VmPhase::Failed);
        assert_eq!(vm.error.unwrap().phase, "FinalSync");
        assert!(!cluster.journal().iter().any(|e| e.starts_with("create virtualmachine")));
    }

    #[tokio::test]
    async fn test_live_openshift_hands_over_to_receiver() {
        let (reconciler, cluster, adapter) = setup(ProviderType::Openshift, RecordingPower::default());
        edit_plan(&cluster, |p| p.spec.type_ = MigrationType::Live);
        resolve_openshift_vm(&cluster, &adapter, "Running");
        let mut m = migration("m1", "mtv", "p1");
        let kind = ExternalKind::VirtualMachineInstanceMigration;

        pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(vm_status(&m).phase, VmPhase::Cutover);
        let journal = cluster.journal();
        let position = |entry: &str| journal.iter().position(|e| e == entry).unwrap();
        assert!(
            position("create DataVolume target/web-web-root") < position("create virtualmachine target/web")
        );
        assert!(
            position("create virtualmachine target/web")
                < position("create VirtualMachineInstanceMigration target/web-m1uid-receive")
        );

        let volume = cluster.object(ExternalKind::DataVolume, "target", "web-web-root").unwrap();
        assert!(volume["spec"]["source"].get("blank").is_some());
        assert_eq!(volume["spec"]["storage"]["storageClassName"], "ceph-rbd");
        assert_eq!(volume["spec"]["storage"]["resources"]["requests"]["storage"], "10Gi");

        let target = target_vm(&cluster, "web");
        assert_eq!(target["spec"]["runStrategy"], "WaitAsReceiver");
        assert_eq!(claim_names(&target), vec!["web-web-root".to_string()]);

        pass(&reconciler, &cluster, &mut m).await;
        assert!(cluster.object(kind, "apps", "web-m1uid-send").is_none());

        cluster.set_object_status(
            kind,
            "target",
            "web-m1uid-receive",
            json!({ "synchronizationAddresses": ["10.128.0.7:9185"] }),
        );
        pass(&reconciler, &cluster, &mut m).await;
        let send = cluster.object(kind, "apps", "web-m1uid-send").unwrap();
        let receive = cluster.object(kind, "target", "web-m1uid-receive").unwrap();
        assert_eq!(send["spec"]["vmiName"], "web");
        assert_eq!(send["spec"]["sendTo"]["connectURL"], "10.128.0.7:9185");
        assert_eq!(send["spec"]["sendTo"]["migrationID"], receive["spec"]["receive"]["migrationID"]);
        assert_eq!(vm_status(&m).phase, VmPhase::Cutover);

        cluster.set_object_status(kind, "target", "web-m1uid-receive", json!({ "phase": "Succeeded" }));
        let action = pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(action, Action::await_change());
        let vm = vm_status(&m);
        assert_eq!(vm.phase, VmPhase::Succeeded);
        assert_eq!(vm.step(VmPhase::Cutover).unwrap().progress, Progress { completed: 3, total: 3 });
    }

    #[tokio::test]
    async fn test_failed_live_handover_fails_vm() {
        let (reconciler, cluster, adapter) = setup(ProviderType::Openshift, RecordingPower::default());
        edit_plan(&cluster, |p| p.spec.type_ = MigrationType::Live);
        resolve_openshift_vm(&cluster, &adapter, "Running");
        let mut m = migration("m1", "mtv", "p1");

        pass(&reconciler, &cluster, &mut m).await;
        cluster.set_object_status(
            ExternalKind::VirtualMachineInstanceMigration,
            "target",
            "web-m1uid-receive",
            json!({ "phase": "Failed" }),
        );
        pass(&reconciler, &cluster, &mut m).await;
        let vm = vm_status(&m);
        assert_eq!(vm.phase, VmPhase::Failed);
        assert_eq!(vm.error.unwrap().phase, "Cutover");
    }

    #[tokio::test]
    async fn test_cold_openshift_clones_source_claims() {
        let (reconciler, cluster, adapter) = setup(ProviderType::Openshift, RecordingPower::default());
        resolve_openshift_vm(&cluster, &adapter, "Stopped");
        let mut m = migration("m1", "mtv", "p1");

        pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(vm_status(&m).phase, VmPhase::Populating);
        let volume = cluster.object(ExternalKind::DataVolume, "target", "web-web-root").unwrap();
        assert_eq!(volume["spec"]["source"]["pvc"], json!({ "namespace": "apps", "name": "web-root" }));

        cluster.set_object_status(
            ExternalKind::DataVolume,
            "target",
            "web-web-root",
            json!({ "phase": "CloneInProgress", "progress": "45.00%" }),
        );
        pass(&reconciler, &cluster, &mut m).await;
        let task = vm_status(&m).step(VmPhase::Populating).unwrap().tasks[0].clone();
        assert_eq!(task.phase, DiskPhase::Populating);
        assert_eq!(task.progress, 45);

        cluster.set_object_status(ExternalKind::DataVolume, "target", "web-web-root", json!({ "phase": "Succeeded" }));
        pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(vm_status(&m).phase, VmPhase::Succeeded);
        assert_eq!(claim_names(&target_vm(&cluster, "web")), vec!["web-web-root".to_string()]);
        assert!(cluster.populators.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cold_ova_converts_into_blank_volumes() {
        let (reconciler, cluster, adapter) = setup(ProviderType::Ova, RecordingPower::default());
        adapter.set_power_state("vm-1", "off");
        let mut m = migration("m1", "mtv", "p1");

        pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(vm_status(&m).phase, VmPhase::Populating);
        let volume = cluster.object(ExternalKind::DataVolume, "target", "web-disk-1").unwrap();
        assert!(volume["spec"]["source"].get("blank").is_some());
        assert_eq!(volume["spec"]["storage"]["resources"]["requests"]["storage"], "1073741824");

        cluster.set_object_status(
            ExternalKind::DataVolume,
            "target",
            "web-disk-1",
            json!({ "phase": "WaitForFirstConsumer" }),
        );
        pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(vm_status(&m).phase, VmPhase::Convert);
        let convert = pod(&cluster, "web-m1uid-convert");
        let env = pod_env(&convert);
        assert_eq!(env["V2V_source"], "ova");
        assert_eq!(env["V2V_diskSources"], "[ds-1] web/disk-1.vmdk");
        assert_eq!(env["V2V_sourceURL"], "https://vcenter.example.com/sdk");
        let env_from = convert.spec.unwrap().containers[0].env_from.clone().unwrap();
        assert_eq!(env_from[0].secret_ref.as_ref().unwrap().name, "p1-vcenter-secret");

        cluster.set_pod_phase("target", "web-m1uid-convert", "Succeeded");
        pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(vm_status(&m).phase, VmPhase::Succeeded);
        assert_eq!(claim_names(&target_vm(&cluster, "web")), vec!["web-disk-1".to_string()]);
    }

    #[tokio::test]
    async fn test_conversion_only_converts_labelled_claims() {
        let (reconciler, cluster, adapter) = setup(ProviderType::Vsphere, RecordingPower::default());
        edit_plan(&cluster, |p| p.spec.type_ = MigrationType::ConversionOnly);
        let labels = BTreeMap::from([(VM_ID_LABEL.to_string(), "vm-1".to_string())]);
        cluster.add_pvc(claim("target", "web-boot", "ceph-rbd", "1Gi", labels));
        let mut m = migration("m1", "mtv", "p1");

        pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(vm_status(&m).phase, VmPhase::Convert);
        let convert = pod(&cluster, "web-m1uid-convert");
        let volumes = convert.spec.as_ref().unwrap().volumes.clone().unwrap();
        assert_eq!(volumes[0].persistent_volume_claim.as_ref().unwrap().claim_name, "web-boot");
        let journal = cluster.journal();
        assert!(!journal.iter().any(|e| e.contains("VolumePopulator") || e.contains("DataVolume")));
        assert!(!journal.iter().any(|e| e.starts_with("create pvc")));

        cluster.set_pod_phase("target", "web-m1uid-convert", "Succeeded");
        pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(vm_status(&m).phase, VmPhase::Succeeded);
        assert_eq!(claim_names(&target_vm(&cluster, "web")), vec!["web-boot".to_string()]);
    }

    #[tokio::test]
    async fn test_preflight_inspection_gates_transfer() {
        let (reconciler, cluster, adapter) = setup(ProviderType::Vsphere, RecordingPower::default());
        edit_plan(&cluster, |p| p.spec.run_preflight_inspection = true);
        adapter.set_power_state("vm-1", "poweredOff");
        let mut m = migration("m1", "mtv", "p1");

        pass(&reconciler, &cluster, &mut m).await;
        pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(vm_status(&m).phase, VmPhase::PreCheck);
        let inspect = pod(&cluster, "web-m1uid-inspect");
        assert_eq!(pod_env(&inspect)["V2V_inspector"], "true");
        let journal = cluster.journal();
        assert_eq!(journal.iter().filter(|e| *e == "create pod target/web-m1uid-inspect").count(), 1);
        assert!(!journal.iter().any(|e| e.contains("VolumePopulator")));

        cluster.set_pod_phase("target", "web-m1uid-inspect", "Succeeded");
        pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(vm_status(&m).phase, VmPhase::Populating);
    }

    #[tokio::test]
    async fn test_failed_preflight_inspection_fails_vm() {
        let (reconciler, cluster, adapter) = setup(ProviderType::Vsphere, RecordingPower::default());
        edit_plan(&cluster, |p| p.spec.run_preflight_inspection = true);
        adapter.set_power_state("vm-1", "poweredOff");
        let mut m = migration("m1", "mtv", "p1");

        pass(&reconciler, &cluster, &mut m).await;
        cluster.set_pod_phase("target", "web-m1uid-inspect", "Failed");
        pass(&reconciler, &cluster, &mut m).await;

        let vm = vm_status(&m);
        assert_eq!(vm.phase, VmPhase::Failed);
        let error = vm.error.unwrap();
        assert_eq!(error.phase, "PreCheck");
        assert!(error.reasons[0].contains("preflight inspection"));
    }

    #[tokio::test]
    async fn test_inspection_skipped_when_not_requested() {
        let (reconciler, cluster, adapter) = setup(ProviderType::Vsphere, RecordingPower::default());
        adapter.set_power_state("vm-1", "poweredOff");
        let mut m = migration("m1", "mtv", "p1");

        pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(vm_status(&m).phase, VmPhase::Populating);
        assert!(!cluster.journal().iter().any(|e| e.ends_with("-inspect")));
    }

    #[tokio::test]
    async fn test_compatibility_mode_shapes_target_vm() {
        let (reconciler, cluster, adapter) = setup(ProviderType::Ovirt, RecordingPower::default());
        edit_plan(&cluster, |p| p.spec.compatibility_mode = true);
        adapter.set_power_state("vm-1", "down");
        let mut m = migration("m1", "mtv", "p1");

        pass(&reconciler, &cluster, &mut m).await;
        cluster.set_pvc_phase("target", "Bound");
        pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(vm_status(&m).phase, VmPhase::Succeeded);

        let devices = target_vm(&cluster, "web")["spec"]["template"]["spec"]["domain"]["devices"].clone();
        assert_eq!(devices["disks"][0]["disk"]["bus"], "sata");
        assert_eq!(devices["interfaces"][0]["model"], "e1000e");
    }

    #[tokio::test]
    async fn test_static_ips_reach_conversion() {
        let (reconciler, cluster, adapter) = setup(ProviderType::Vsphere, RecordingPower::default());
        edit_plan(&cluster, |p| p.spec.preserve_static_ips = true);
        let mut db = vm("vm-2", "db", &[("disk-2", 1 << 30, "ds-1")], &["net-1"]);
        db.power_state = Some("poweredOff".to_string());
        db.guest_networks = vec![
            GuestNetwork {
                mac: "00:50:56:aa:bb:cc".to_string(),
                ip: "10.0.0.10".to_string(),
                prefix_length: 24,
                gateway: Some("10.0.0.1".to_string()),
                dns: vec!["10.0.0.2".to_string()],
                is_static: true,
            },
            GuestNetwork {
                mac: "00:50:56:aa:bb:dd".to_string(),
                ip: "192.168.1.5".to_string(),
                prefix_length: 24,
                gateway: None,
                dns: Vec::new(),
                is_static: false,
            },
        ];
        resolve(&cluster, &adapter, db);
        let mut m = migration("m1", "mtv", "p1");

        pass(&reconciler, &cluster, &mut m).await;
        cluster.set_pvc_phase("target", "Bound");
        pass(&reconciler, &cluster, &mut m).await;
        assert_eq!(vm_status(&m).phase, VmPhase::Convert);

        let env = pod_env(&pod(&cluster, "db-m1uid-convert"));
        assert_eq!(env["V2V_preserveStaticIPs"], "true");
        assert_eq!(env["V2V_staticIPs"], "00:50:56:aa:bb:cc:ip:10.0.0.10,10.0.0.1,24,10.0.0.2");
    }
}
