//! Unit tests for the PVC reconciler

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::error::PopulatorError;
    use crate::mock::{MockPopulatorCluster, MockProgress};
    use crate::reconciler::Reconciler;
    use crds::{POPULATE_TARGET_FINALIZER, PopulatorKind};
    use k8s_openapi::api::core::v1::{
        ObjectReference, PersistentVolume, PersistentVolumeClaim, PersistentVolumeClaimSpec,
        PersistentVolumeClaimStatus, PersistentVolumeSpec, PodStatus, TypedObjectReference,
        VolumeResourceRequirements,
    };
    use k8s_openapi::api::storage::v1::StorageClass;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube_runtime::controller::Action;
    use serde_json::{Value, json};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    const NS: &str = "target";
    const PVC: &str = "web-disk-1";
    const POD: &str = "populate-u-1";
    const SHADOW: &str = "prime-u-1";
    const METRICS: &str = "http://10.0.0.7:2112/metrics";

    fn waiting() -> Action {
        Action::requeue(Duration::from_secs(5))
    }

    fn user_pvc(class: &str) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(PVC.to_string()),
                namespace: Some(NS.to_string()),
                uid: Some("u-1".to_string()),
                resource_version: Some("1".to_string()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                storage_class_name: Some(class.to_string()),
                volume_mode: Some("Filesystem".to_string()),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([("storage".to_string(), Quantity("1073741824".to_string()))])),
                    ..Default::default()
                }),
                data_source_ref: Some(TypedObjectReference {
                    api_group: Some("forklift.konveyor.io".to_string()),
                    kind: "OvirtVolumePopulator".to_string(),
                    name: PVC.to_string(),
                    namespace: None,
                }),
                ..Default::default()
            }),
            status: None,
        }
    }

    fn storage_class(name: &str, provisioner: &str, binding: &str) -> StorageClass {
        StorageClass {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            provisioner: provisioner.to_string(),
            volume_binding_mode: Some(binding.to_string()),
            ..Default::default()
        }
    }

    fn ovirt_request() -> Value {
        json!({
            "apiVersion": "forklift.konveyor.io/v1beta1",
            "kind": "OvirtVolumePopulator",
            "metadata": { "name": PVC, "namespace": NS, "labels": { "migration": "m-1" } },
            "spec": {
                "engineUrl": "https://engine.local",
                "engineSecretName": "p1-engine",
                "diskId": "disk-1"
            }
        })
    }

    fn pv(name: &str, claim_name: &str, claim_uid: &str) -> PersistentVolume {
        PersistentVolume {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeSpec {
                claim_ref: Some(ObjectReference {
                    namespace: Some(NS.to_string()),
                    name: Some(claim_name.to_string()),
                    uid: Some(claim_uid.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            status: None,
        }
    }

    fn setup_with(class: StorageClass) -> (Reconciler, MockPopulatorCluster, MockProgress) {
        let cluster = MockPopulatorCluster::new();
        let progress = MockProgress::default();
        let reconciler = Reconciler::new(Arc::new(cluster.clone()), Arc::new(progress.clone()), Config::default());
        let class_name = class.metadata.name.clone().unwrap_or_default();
        cluster.add_storage_class(class);
        cluster.add_populator(PopulatorKind::Ovirt, ovirt_request());
        cluster.add_pvc(user_pvc(&class_name));
        (reconciler, cluster, progress)
    }

    fn setup() -> (Reconciler, MockPopulatorCluster, MockProgress) {
        setup_with(storage_class("ceph-rbd", "rbd.csi.ceph.com", "Immediate"))
    }

    /// Reconcile the stored user PVC, as the watcher would after a change
    async fn pass(reconciler: &Reconciler, cluster: &MockPopulatorCluster) -> Result<Action, PopulatorError> {
        let pvc = cluster.pvc(NS, PVC).unwrap();
        reconciler.reconcile_pvc(&pvc).await
    }

    fn set_pod_phase(cluster: &MockPopulatorCluster, phase: &str) {
        cluster.update_pod(NS, POD, |pod| {
            pod.status = Some(PodStatus {
                phase: Some(phase.to_string()),
                pod_ip: Some("10.0.0.7".to_string()),
                ..Default::default()
            });
        });
    }

    fn count(cluster: &MockPopulatorCluster, reason: &str) -> usize {
        cluster.reasons().iter().filter(|r| *r == reason).count()
    }

    #[tokio::test]
    async fn test_first_pass_creates_worker_and_shadow() {
        let (reconciler, cluster, _) = setup();

        assert_eq!(pass(&reconciler, &cluster).await.unwrap(), waiting());
        assert_eq!(
            cluster.journal(),
            vec![
                format!("patch pvc {NS}/{PVC}"),
                format!("create pod {NS}/{POD}"),
                format!("create pvc {NS}/{SHADOW}"),
            ]
        );
        let pvc = cluster.pvc(NS, PVC).unwrap();
        assert_eq!(pvc.metadata.finalizers, Some(vec![POPULATE_TARGET_FINALIZER.to_string()]));
        assert_eq!(cluster.reasons(), vec!["PopulatorCreated"]);

        let pod = cluster.pod(NS, POD).unwrap();
        assert_eq!(pod.metadata.labels.unwrap()["migration"], "m-1");
        let args = pod.spec.unwrap().containers[0].args.clone().unwrap();
        assert!(args.contains(&"--disk-id=disk-1".to_string()));
        assert!(args.contains(&"--pvc-size=1073741824".to_string()));

        // Pod pending, nothing new to create
        cluster.clear_journal();
        assert_eq!(pass(&reconciler, &cluster).await.unwrap(), waiting());
        assert!(cluster.journal().is_empty());
    }

    #[tokio::test]
    async fn test_ignores_foreign_data_source() {
        let (reconciler, cluster, _) = setup();
        cluster.update_pvc(NS, PVC, |pvc| {
            let source = pvc.spec.as_mut().unwrap().data_source_ref.as_mut().unwrap();
            source.api_group = Some("snapshot.storage.k8s.io".to_string());
            source.kind = "VolumeSnapshot".to_string();
        });

        assert_eq!(pass(&reconciler, &cluster).await.unwrap(), Action::await_change());
        assert!(cluster.journal().is_empty());
        assert!(cluster.reasons().is_empty());
    }

    #[tokio::test]
    async fn test_waits_for_missing_request() {
        let (reconciler, cluster, _) = setup();
        cluster.populators.lock().unwrap().clear();

        assert_eq!(pass(&reconciler, &cluster).await.unwrap(), waiting());
        assert!(cluster.journal().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_intree_provisioner() {
        let (reconciler, cluster, _) = setup_with(storage_class("gp2", "kubernetes.io/aws-ebs", "Immediate"));

        assert_eq!(pass(&reconciler, &cluster).await.unwrap(), Action::await_change());
        assert!(cluster.journal().is_empty());
        assert_eq!(cluster.reasons(), vec!["IntreeUnsupported"]);
    }

    #[tokio::test]
    async fn test_wait_for_first_consumer_pins_node() {
        let (reconciler, cluster, _) = setup_with(storage_class("local", "local.csi.io", "WaitForFirstConsumer"));

        assert_eq!(pass(&reconciler, &cluster).await.unwrap(), waiting());
        assert!(cluster.journal().is_empty());

        cluster.update_pvc(NS, PVC, |pvc| {
            pvc.metadata.annotations = Some(BTreeMap::from([(
                "volume.kubernetes.io/selected-node".to_string(),
                "node-a".to_string(),
            )]));
        });
        pass(&reconciler, &cluster).await.unwrap();

        let pod = cluster.pod(NS, POD).unwrap();
        assert_eq!(pod.spec.unwrap().node_name.as_deref(), Some("node-a"));
        let shadow = cluster.pvc(NS, SHADOW).unwrap();
        assert_eq!(shadow.metadata.annotations.unwrap()["volume.kubernetes.io/selected-node"], "node-a");
    }

    #[tokio::test]
    async fn test_progress_copied_to_request() {
        let (reconciler, cluster, progress) = setup();
        pass(&reconciler, &cluster).await.unwrap();
        set_pod_phase(&cluster, "Running");
        progress.set(METRICS, "volume_populators_ovirt_volume_populator{disk_id=\"disk-1\"} 42\n");

        assert_eq!(pass(&reconciler, &cluster).await.unwrap(), waiting());
        assert_eq!(cluster.populator(NS, PVC).unwrap()["status"]["progress"], "42");
        assert_eq!(count(&cluster, "PopulatorProgress"), 1);

        // Unchanged value, no write
        cluster.clear_journal();
        pass(&reconciler, &cluster).await.unwrap();
        assert!(cluster.journal().is_empty());

        progress.set(METRICS, "volume_populators_ovirt_volume_populator{disk_id=\"disk-1\"} 60\n");
        pass(&reconciler, &cluster).await.unwrap();
        assert_eq!(cluster.populator(NS, PVC).unwrap()["status"]["progress"], "60");
        assert_eq!(count(&cluster, "PopulatorProgress"), 1);
    }

    #[tokio::test]
    async fn test_unreachable_metrics_keep_waiting() {
        let (reconciler, cluster, progress) = setup();
        pass(&reconciler, &cluster).await.unwrap();
        set_pod_phase(&cluster, "Running");

        assert_eq!(pass(&reconciler, &cluster).await.unwrap(), waiting());
        assert_eq!(*progress.requests.lock().unwrap(), vec![METRICS.to_string()]);
        assert!(cluster.populator(NS, PVC).unwrap().get("status").is_none());
    }

    #[tokio::test]
    async fn test_pod_without_address_is_not_scraped() {
        let (reconciler, cluster, progress) = setup();
        pass(&reconciler, &cluster).await.unwrap();
        progress.set(METRICS, "volume_populators_ovirt_volume_populator{disk_id=\"disk-1\"} 42\n");

        for ip in [None, Some(String::new())] {
            cluster.update_pod(NS, POD, |pod| {
                pod.status = Some(PodStatus {
                    phase: Some("Running".to_string()),
                    pod_ip: ip.clone(),
                    ..Default::default()
                });
            });
            assert_eq!(pass(&reconciler, &cluster).await.unwrap(), waiting());
        }
        assert!(progress.requests.lock().unwrap().is_empty());
        assert!(cluster.populator(NS, PVC).unwrap().get("status").is_none());
        assert_eq!(count(&cluster, "PopulatorProgress"), 0);
    }

    #[tokio::test]
    async fn test_failed_worker_recreated() {
        let (reconciler, cluster, _) = setup();
        pass(&reconciler, &cluster).await.unwrap();
        set_pod_phase(&cluster, "Failed");
        cluster.clear_journal();

        assert_eq!(pass(&reconciler, &cluster).await.unwrap(), waiting());
        assert_eq!(
            cluster.journal(),
            vec![format!("patch pvc {NS}/{PVC}"), format!("delete pod {NS}/{POD}")]
        );
        assert_eq!(cluster.pvc(NS, PVC).unwrap().metadata.annotations.unwrap()["recreations"], "1");

        pass(&reconciler, &cluster).await.unwrap();
        assert!(cluster.pod(NS, POD).is_some());
        assert_eq!(count(&cluster, "PopulatorCreated"), 2);
    }

    #[tokio::test]
    async fn test_restart_limit() {
        let (reconciler, cluster, _) = setup();
        pass(&reconciler, &cluster).await.unwrap();
        cluster.update_pvc(NS, PVC, |pvc| {
            pvc.metadata.annotations = Some(BTreeMap::from([("recreations".to_string(), "3".to_string())]));
        });
        set_pod_phase(&cluster, "Failed");

        let err = pass(&reconciler, &cluster).await.unwrap_err();
        assert!(matches!(err, PopulatorError::WorkerFailed(_)));
        assert_eq!(reconciler.error_action(&err), Action::await_change());
        assert_eq!(count(&cluster, "PopulatorFailed"), 1);
        // Failed pod kept for its logs
        assert!(cluster.pod(NS, POD).is_some());
    }

    #[tokio::test]
    async fn test_worker_succeeds_after_two_failures() {
        let (reconciler, cluster, _) = setup();
        pass(&reconciler, &cluster).await.unwrap();

        for attempt in 1..=2 {
            set_pod_phase(&cluster, "Failed");
            assert_eq!(pass(&reconciler, &cluster).await.unwrap(), waiting());
            assert!(cluster.pod(NS, POD).is_none());
            let annotations = cluster.pvc(NS, PVC).unwrap().metadata.annotations.unwrap();
            assert_eq!(annotations["recreations"], attempt.to_string());

            assert_eq!(pass(&reconciler, &cluster).await.unwrap(), waiting());
            assert!(cluster.pod(NS, POD).is_some());
        }
        assert_eq!(count(&cluster, "PopulatorCreated"), 3);

        set_pod_phase(&cluster, "Succeeded");
        cluster.update_pvc(NS, SHADOW, |shadow| {
            shadow.spec.as_mut().unwrap().volume_name = Some("pv-1".to_string());
        });
        cluster.add_pv(pv("pv-1", SHADOW, "s-1"));
        assert_eq!(pass(&reconciler, &cluster).await.unwrap(), waiting());
        assert_eq!(cluster.pv("pv-1").unwrap().spec.unwrap().claim_ref.unwrap().uid.as_deref(), Some("u-1"));
        assert_eq!(cluster.populator(NS, PVC).unwrap()["status"]["progress"], "100");

        cluster.update_pvc(NS, PVC, |pvc| {
            pvc.spec.as_mut().unwrap().volume_name = Some("pv-1".to_string());
            pvc.status = Some(PersistentVolumeClaimStatus {
                phase: Some("Bound".to_string()),
                ..Default::default()
            });
        });
        cluster.update_pvc(NS, SHADOW, |shadow| {
            shadow.status = Some(PersistentVolumeClaimStatus {
                phase: Some("Lost".to_string()),
                ..Default::default()
            });
        });
        assert_eq!(pass(&reconciler, &cluster).await.unwrap(), Action::await_change());

        let pvc = cluster.pvc(NS, PVC).unwrap();
        assert_eq!(pvc.metadata.annotations.unwrap()["recreations"], "2");
        assert!(pvc.metadata.finalizers.unwrap_or_default().is_empty());
        assert_eq!(count(&cluster, "PopulatorFinished"), 1);
        assert_eq!(count(&cluster, "PopulatorFailed"), 0);
    }

    #[tokio::test]
    async fn test_hand_over_and_finish() {
        let (reconciler, cluster, _) = setup();
        pass(&reconciler, &cluster).await.unwrap();
        set_pod_phase(&cluster, "Succeeded");
        cluster.update_pvc(NS, SHADOW, |shadow| {
            shadow.spec.as_mut().unwrap().volume_name = Some("pv-1".to_string());
        });
        cluster.add_pv(pv("pv-1", SHADOW, "s-1"));

        assert_eq!(pass(&reconciler, &cluster).await.unwrap(), waiting());
        let volume = cluster.pv("pv-1").unwrap();
        let claim = volume.spec.unwrap().claim_ref.unwrap();
        assert_eq!(claim.name.as_deref(), Some(PVC));
        assert_eq!(claim.uid.as_deref(), Some("u-1"));
        assert_eq!(
            volume.metadata.annotations.unwrap()["forklift.konveyor.io/populated-from"],
            "target/web-disk-1"
        );
        assert_eq!(cluster.populator(NS, PVC).unwrap()["status"]["progress"], "100");

        // Already handed over
        cluster.clear_journal();
        assert_eq!(pass(&reconciler, &cluster).await.unwrap(), waiting());
        assert!(cluster.journal().is_empty());

        // User PVC bound, shadow not yet released
        cluster.update_pvc(NS, PVC, |pvc| {
            pvc.spec.as_mut().unwrap().volume_name = Some("pv-1".to_string());
        });
        cluster.update_pvc(NS, SHADOW, |shadow| {
            shadow.status = Some(PersistentVolumeClaimStatus {
                phase: Some("Bound".to_string()),
                ..Default::default()
            });
        });
        assert_eq!(pass(&reconciler, &cluster).await.unwrap(), waiting());
        assert!(cluster.journal().is_empty());

        cluster.update_pvc(NS, SHADOW, |shadow| {
            shadow.status = Some(PersistentVolumeClaimStatus {
                phase: Some("Lost".to_string()),
                ..Default::default()
            });
        });
        assert_eq!(pass(&reconciler, &cluster).await.unwrap(), Action::await_change());
        assert_eq!(
            cluster.journal(),
            vec![
                format!("delete pod {NS}/{POD}"),
                format!("delete pvc {NS}/{SHADOW}"),
                format!("patch pvc {NS}/{PVC}"),
            ]
        );
        assert!(cluster.pvc(NS, PVC).unwrap().metadata.finalizers.unwrap_or_default().is_empty());
        assert_eq!(count(&cluster, "PopulatorFinished"), 1);

        // Bound and released: nothing left to do
        cluster.clear_journal();
        assert_eq!(pass(&reconciler, &cluster).await.unwrap(), Action::await_change());
        assert!(cluster.journal().is_empty());
        assert_eq!(count(&cluster, "PopulatorFinished"), 1);
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let (reconciler, cluster, _) = setup();
        pass(&reconciler, &cluster).await.unwrap();
        set_pod_phase(&cluster, "Succeeded");
        cluster.update_pvc(NS, SHADOW, |shadow| {
            shadow.spec.as_mut().unwrap().volume_name = Some("pv-1".to_string());
        });
        cluster.add_pv(pv("pv-1", "someone-else", "x-9"));

        let err = pass(&reconciler, &cluster).await.unwrap_err();
        assert!(matches!(err, PopulatorError::BindConflict(_)));
        assert!(!err.is_retriable());
        assert_eq!(cluster.pv("pv-1").unwrap().spec.unwrap().claim_ref.unwrap().uid.as_deref(), Some("x-9"));
    }

    #[tokio::test]
    async fn test_deleted_pvc_releases_objects() {
        let (reconciler, cluster, _) = setup();
        pass(&reconciler, &cluster).await.unwrap();
        cluster.update_pvc(NS, PVC, |pvc| {
            pvc.metadata.deletion_timestamp =
                Some(serde_json::from_value(json!("2026-01-01T00:00:00Z")).unwrap());
        });
        cluster.clear_journal();

        assert_eq!(pass(&reconciler, &cluster).await.unwrap(), Action::await_change());
        assert_eq!(
            cluster.journal(),
            vec![
                format!("delete pod {NS}/{POD}"),
                format!("delete pvc {NS}/{SHADOW}"),
                format!("patch pvc {NS}/{PVC}"),
            ]
        );
        assert_eq!(count(&cluster, "PopulatorFinished"), 0);
    }

    #[tokio::test]
    async fn test_stale_finalizer_write_conflicts() {
        let (reconciler, cluster, _) = setup();
        let stale = cluster.pvc(NS, PVC).unwrap();
        cluster.update_pvc(NS, PVC, |pvc| {
            pvc.metadata.resource_version = Some("7".to_string());
        });

        let err = reconciler.reconcile_pvc(&stale).await.unwrap_err();
        assert!(matches!(err, PopulatorError::Conflict(_)));
        assert!(err.is_retriable());
        assert!(cluster.pod(NS, POD).is_none());
    }
}
