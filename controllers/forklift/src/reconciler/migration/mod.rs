//! Migration reconciler
//!
//! Walks every VM of the plan through its itinerary. Each pass moves a VM
//! as far as it can without blocking: a phase that waits on the cluster
//! (a PVC to bind, a pod to finish, the source to power off) leaves the VM
//! where it is and the migration is requeued.
//!
//! Disks reach the target through volume populators (oVirt, OpenStack,
//! vSphere) or CDI DataVolumes: blank ones the guest conversion fills for OVA
//! and EC2, clones of the source claims for OpenShift, and blank receivers
//! for a live handover.
//!
//! Retriable errors leave the VM in its phase for the next pass; anything
//! else fails the VM. Canceled VMs have their in-flight transfer objects
//! removed, but user PVCs are kept.

pub mod builder;
pub mod itinerary;
pub mod pipeline;

#[cfg(test)]
mod migration_test;

use self::builder::*;
use self::itinerary::{aggregate, itinerary};
use self::pipeline::{advance, cancel, enter, new_vm_status};
use super::{Reconciler, has_finalizer, identity, with_finalizer, without_finalizer};
use crate::cluster::{EventRecord, ExternalKind, ResourceKind};
use crate::error::ControllerError;
use crate::inventory::provider_credentials;
use chrono::{DateTime, Utc};
use crds::condition::{self, Condition, condition_type, reason};
use crds::{
    DiskPhase, DiskTask, Host, Migration, MigrationStatus, MigrationType, NetworkPair, Plan, PopulatorKind,
    PopulatorStatus, PowerState, Progress, Provider, ProviderType, ResourceRef, StoragePair, VmPhase, VmStatus,
};
use serde_json::Value;
use inventory_client::adapters::openstack::DEFAULT_VOLUME_TYPE;
use inventory_client::{Disk, SourceCredentials, Storage, Vm};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

const PLAN_NOT_READY: &str = "PlanNotReady";
const POWER_OFF_UNSUPPORTED: &str = "PowerOffUnsupported";
const VM_FAILED: &str = "VMFailed";
const VM_CANCELED: &str = "VMCanceled";

/// Outcome of running one phase for one VM
#[derive(Debug, PartialEq, Eq)]
enum Step {
    Advance,
    Wait,
    Fail(String),
}

/// Everything one pass needs about the plan and its source
struct Execution<'a> {
    migration: &'a Migration,
    plan: &'a Plan,
    source: Provider,
    credentials: SourceCredentials,
    phases: Vec<VmPhase>,
    path: TransferPath,
    inventory: Vec<Vm>,
    /// Inventory network id to name
    network_names: BTreeMap<String, String>,
    storages: Vec<Storage>,
    network_pairs: Vec<NetworkPair>,
    storage_pairs: Vec<StoragePair>,
    hosts: Vec<Host>,
    now: DateTime<Utc>,
}

impl Execution<'_> {
    fn target_namespace(&self) -> &str {
        &self.plan.spec.target_namespace
    }

    fn scope(&self, vm: &VmStatus) -> VmScope {
        vm_scope(self.migration, self.plan, vm)
    }

    fn source_vm(&self, id: &str) -> Option<&Vm> {
        self.inventory.iter().find(|vm| vm.id == id)
    }

    fn transfers_disks(&self) -> bool {
        self.phases.contains(&VmPhase::CreateDataVolumes)
    }

    /// Disks that get a populator; shared disks only when the plan asks for them.
    fn disks<'v>(&self, vm: &'v Vm) -> impl Iterator<Item = &'v Disk> {
        let shared = self.plan.spec.migrate_shared_disks;
        vm.disks.iter().filter(move |d| shared || !d.shared)
    }

    fn storage_pair_for(&self, disk: &Disk) -> Option<&StoragePair> {
        match &disk.storage {
            Some(id) => {
                let name = self.storages.iter().find(|s| &s.id == id).map(|s| s.name.as_str());
                self.storage_pairs.iter().find(|p| {
                    p.source.id.as_deref() == Some(id.as_str())
                        || p.source.name.is_some()
                            && (p.source.name.as_deref() == name || p.source.name.as_deref() == Some(id.as_str()))
                })
            }
            None => self.storage_pairs.iter().find(|p| {
                matches!(p.source.type_.as_deref(), Some("default") | Some(DEFAULT_VOLUME_TYPE))
                    || p.source.name.as_deref() == Some(DEFAULT_VOLUME_TYPE)
            }),
        }
    }

    /// Pair for a source claim of an OpenShift VM: the one naming its storage
    /// class, else the first.
    fn storage_pair_for_class(&self, class: Option<&str>) -> Option<&StoragePair> {
        class
            .and_then(|class| {
                self.storage_pairs
                    .iter()
                    .find(|p| p.source.name.as_deref() == Some(class) || p.source.id.as_deref() == Some(class))
            })
            .or_else(|| self.storage_pairs.first())
    }

    /// Namespace of the source VM on an OpenShift cluster.
    fn source_namespace<'v>(&'v self, vm: &'v VmStatus, source_vm: &'v Vm) -> Result<&'v str, ControllerError> {
        source_vm
            .namespace
            .as_deref()
            .or(vm.namespace.as_deref())
            .ok_or_else(|| ControllerError::Configuration(format!("VM {} has no source namespace", vm.id)))
    }

    fn network_mapped(&self, network: &str) -> bool {
        let name = self.network_names.get(network).map(String::as_str);
        self.network_pairs.iter().any(|p| {
            p.source.id.as_deref() == Some(network) || (name.is_some() && p.source.name.as_deref() == name)
        })
    }

    /// Why `vm` cannot be migrated with the plan's maps, if it cannot.
    fn unmapped(&self, vm: &Vm) -> Option<String> {
        if let Some(nic) = vm.nics.iter().find(|nic| !self.network_mapped(&nic.network)) {
            return Some(format!("network {} of VM {} is not mapped", nic.network, vm.name));
        }
        if self.transfers_disks() && self.source.spec.type_ == ProviderType::Openshift {
            if self.storage_pairs.is_empty() && self.disks(vm).next().is_some() {
                return Some(format!("no storage is mapped for the disks of VM {}", vm.name));
            }
        } else if self.transfers_disks() {
            if let Some(disk) = self.disks(vm).find(|d| self.storage_pair_for(d).is_none()) {
                let storage = disk.storage.as_deref().unwrap_or(DEFAULT_VOLUME_TYPE);
                return Some(format!("storage {} of disk {} is not mapped", storage, disk.id));
            }
        }
        None
    }

    /// Namespace and name of the secret holding credentials for reading
    /// `vm`'s disks: the ESXi host's when one is registered, else the provider's.
    fn credentials_secret(&self, vm: &Vm) -> Result<(String, String), ControllerError> {
        let provider_ns = self.source.namespace().unwrap_or_default();
        let host = vm.host.as_deref().and_then(|id| {
            self.hosts
                .iter()
                .find(|h| h.spec.id == id && h.spec.provider.name == self.source.name_any())
        });
        if let Some((host, secret)) = host.and_then(|h| h.spec.secret.as_ref().map(|s| (h, s))) {
            let host_ns = host.namespace().unwrap_or_else(|| provider_ns.clone());
            return Ok((secret.namespace_or(&host_ns).to_string(), secret.name.clone()));
        }
        let secret = self.source.spec.secret.as_ref().ok_or_else(|| {
            ControllerError::Configuration(format!("provider {} has no credentials secret", self.source.name_any()))
        })?;
        Ok((secret.namespace_or(&provider_ns).to_string(), secret.name.clone()))
    }
}

fn vm_scope(migration: &Migration, plan: &Plan, vm: &VmStatus) -> VmScope {
    VmScope {
        migration_uid: migration.uid().unwrap_or_default(),
        plan_uid: plan.uid().unwrap_or_default(),
        vm_id: vm.id.clone(),
        vm_name: if vm.name.is_empty() { vm.id.clone() } else { vm.name.clone() },
        namespace: plan.spec.target_namespace.clone(),
    }
}

fn claim_phase(claim: &PersistentVolumeClaim) -> Option<&str> {
    claim.status.as_ref().and_then(|s| s.phase.as_deref())
}

fn claim_size(claim: &PersistentVolumeClaim) -> Option<String> {
    let requests = claim.spec.as_ref()?.resources.as_ref()?.requests.as_ref()?;
    requests.get("storage").map(|q| q.0.clone())
}

fn pod_phase(pod: Pod) -> Option<String> {
    pod.status.and_then(|s| s.phase)
}

/// `"45.50%"` as a whole percentage
fn percent(progress: &str) -> u8 {
    progress
        .trim()
        .trim_end_matches('%')
        .parse::<f64>()
        .map(|p| p.clamp(0.0, 100.0) as u8)
        .unwrap_or(0)
}

/// Disk tasks of a VM: recorded on its populating step, or on volume
/// creation when the itinerary has no populating step.
fn disk_tasks(vm: &VmStatus) -> &[DiskTask] {
    [VmPhase::Populating, VmPhase::CreateDataVolumes]
        .into_iter()
        .filter_map(|phase| vm.step(phase))
        .map(|step| step.tasks.as_slice())
        .find(|tasks| !tasks.is_empty())
        .unwrap_or_default()
}

/// Worker recreations recorded on a user PVC.
fn recreations(claim: &PersistentVolumeClaim) -> u32 {
    claim
        .annotations()
        .get(RECREATIONS_ANNOTATION)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

fn disk_source(claim: &PersistentVolumeClaim) -> Option<&str> {
    claim.annotations().get(DISK_SOURCE_ANNOTATION).map(String::as_str)
}

/// Claims in pipeline task order; claims without a task keep listing order.
fn ordered_claims(mut claims: Vec<PersistentVolumeClaim>, tasks: &[DiskTask]) -> Vec<PersistentVolumeClaim> {
    let rank = |c: &PersistentVolumeClaim| {
        tasks
            .iter()
            .position(|t| t.pvc.is_some() && t.pvc == c.metadata.name)
            .unwrap_or(usize::MAX)
    };
    claims.sort_by_key(rank);
    claims
}

impl Reconciler {
    pub async fn reconcile_migration(&self, migration: &Migration) -> Result<Action, ControllerError> {
        let (namespace, name) = identity(migration);
        info!("Reconciling Migration {}/{}", namespace, name);

        if migration.metadata.deletion_timestamp.is_some() {
            return self.finalize_migration(migration).await;
        }
        let mut status = migration.status.clone().unwrap_or_default();
        if status.is_terminal() {
            debug!("Migration {}/{} already finished", namespace, name);
            return Ok(Action::await_change());
        }
        if !has_finalizer(migration) {
            self.set_finalizers(ResourceKind::Migration, &namespace, &name, &with_finalizer(migration))
                .await?;
        }
        status.observed_generation = migration.metadata.generation;

        let plan_ref = &migration.spec.plan;
        let plan = self
            .cluster
            .get_plan(plan_ref.namespace_or(&namespace), &plan_ref.name)
            .await?
            .ok_or_else(|| ControllerError::NotFound(format!("plan {}", plan_ref.key(&namespace))))?;
        let plan_ready = plan
            .status
            .as_ref()
            .is_some_and(|s| condition::is_true(&s.conditions, condition_type::READY));
        if !plan_ready {
            info!("Migration {}/{} waits for plan {}", namespace, name, plan_ref.key(&namespace));
            condition::set(
                &mut status.conditions,
                Condition::falsy(
                    condition_type::EXECUTING,
                    PLAN_NOT_READY,
                    format!("plan {} is not ready", plan_ref.key(&namespace)),
                ),
            );
            self.write_status(ResourceKind::Migration, &namespace, &name, &status)
                .await?;
            return Ok(Action::requeue(self.config.requeue));
        }

        let execution = self.execution(migration, &plan).await?;
        if status.vms.is_empty() {
            let resolved = plan.status.as_ref().map(|s| s.resolved_vms.as_slice()).unwrap_or_default();
            status.vms = resolved.iter().map(|vm| new_vm_status(vm, &execution.phases)).collect();
            info!("Migration {}/{} started with {} VM(s)", namespace, name, status.vms.len());
            self.event(
                migration,
                EventRecord::normal(reason::STARTED, format!("Migrating {} VM(s)", status.vms.len())),
            )
            .await;
        }
        status.timed.mark_started();

        for vm in status.vms.iter_mut().filter(|vm| !vm.phase.is_terminal()) {
            let canceled = migration.spec.cancel.iter().any(|c| *c == vm.id || *c == vm.name);
            if canceled {
                self.cleanup_vm(&execution.scope(vm), vm.namespace.as_deref()).await?;
                cancel(vm);
                info!("Migration {}/{}: VM {} canceled", namespace, name, vm.id);
                self.event(migration, EventRecord::normal(VM_CANCELED, format!("VM {} canceled", vm.name)))
                    .await;
                continue;
            }
            self.run_vm(&execution, vm).await;
        }

        let finished = self.update_conditions(migration, &mut status).await;
        self.write_status(ResourceKind::Migration, &namespace, &name, &status)
            .await?;
        self.mirror_to_plan(migration, &plan, &status).await?;

        if finished {
            Ok(Action::await_change())
        } else {
            Ok(Action::requeue(self.config.requeue))
        }
    }

    /// Remove in-flight transfer objects of unfinished VMs, then the finalizer.
    async fn finalize_migration(&self, migration: &Migration) -> Result<Action, ControllerError> {
        let (namespace, name) = identity(migration);
        if !has_finalizer(migration) {
            return Ok(Action::await_change());
        }
        if let Some(status) = migration.status.as_ref().filter(|s| !s.is_terminal()) {
            let plan_ref = &migration.spec.plan;
            match self.cluster.get_plan(plan_ref.namespace_or(&namespace), &plan_ref.name).await? {
                Some(plan) => {
                    for vm in status.vms.iter().filter(|vm| !vm.phase.is_terminal()) {
                        self.cleanup_vm(&vm_scope(migration, &plan, vm), vm.namespace.as_deref())
                            .await?;
                    }
                }
                None => warn!(
                    "Migration {}/{}: plan {} is gone, cannot clean up its target namespace",
                    namespace,
                    name,
                    plan_ref.key(&namespace)
                ),
            }
        }
        self.set_finalizers(ResourceKind::Migration, &namespace, &name, &without_finalizer(migration))
            .await?;
        info!("Migration {}/{} released", namespace, name);
        Ok(Action::await_change())
    }

    async fn execution<'a>(&self, migration: &'a Migration, plan: &'a Plan) -> Result<Execution<'a>, ControllerError> {
        let (plan_ns, _) = identity(plan);
        let source = self
            .ready_provider(&plan.spec.provider.source, &plan_ns)
            .await?
            .map_err(ControllerError::NotFound)?;
        let credentials = provider_credentials(self.cluster.as_ref(), &source).await?;
        let adapter = self.adapters.adapter(&source, credentials.clone());

        let inventory = adapter.list_vms().await?;
        let network_names = adapter
            .list_networks()
            .await?
            .into_iter()
            .map(|n| (n.id, n.name))
            .collect();
        let storages = match source.spec.type_ {
            ProviderType::Openshift => Vec::new(),
            _ => adapter.list_storages().await?,
        };

        let network_pairs = match &plan.spec.map.network {
            Some(r) => self
                .cluster
                .get_network_map(r.namespace_or(&plan_ns), &r.name)
                .await?
                .map(|m| m.spec.map)
                .unwrap_or_default(),
            None => Vec::new(),
        };
        let storage_pairs = match &plan.spec.map.storage {
            Some(r) => self
                .cluster
                .get_storage_map(r.namespace_or(&plan_ns), &r.name)
                .await?
                .map(|m| m.spec.map)
                .unwrap_or_default(),
            None => Vec::new(),
        };
        let hosts = match source.spec.type_ {
            ProviderType::Vsphere => {
                let provider_ns = source.namespace().unwrap_or_default();
                self.cluster
                    .list_hosts(&provider_ns)
                    .await?
                    .into_iter()
                    .filter(|h| h.spec.provider.name == source.name_any())
                    .collect()
            }
            _ => Vec::new(),
        };

        Ok(Execution {
            migration,
            plan,
            phases: itinerary(plan.spec.type_, source.spec.type_),
            path: transfer_path(plan.spec.type_, source.spec.type_),
            source,
            credentials,
            inventory,
            network_names,
            storages,
            network_pairs,
            storage_pairs,
            hosts,
            now: Utc::now(),
        })
    }

    /// Move one VM forward until it has to wait.
    async fn run_vm(&self, ex: &Execution<'_>, vm: &mut VmStatus) {
        let (namespace, name) = identity(ex.migration);
        if !vm.timed.is_started() {
            enter(vm, VmPhase::Pending);
        }
        for _ in 0..=ex.phases.len() {
            if vm.phase.is_terminal() {
                break;
            }
            let phase = vm.phase;
            let failure = match self.run_phase(ex, vm).await {
                Ok(Step::Advance) => {
                    let next = advance(vm, &ex.phases);
                    debug!("Migration {}/{}: VM {} {} -> {}", namespace, name, vm.id, phase, next);
                    continue;
                }
                Ok(Step::Wait) => break,
                Ok(Step::Fail(message)) => message,
                Err(e) if e.is_retriable() => {
                    warn!("Migration {}/{}: VM {} in {}: {}", namespace, name, vm.id, phase, e);
                    break;
                }
                Err(e) => e.to_string(),
            };
            warn!("Migration {}/{}: VM {} failed in {}: {}", namespace, name, vm.id, phase, failure);
            vm.fail(failure.clone());
            self.event(
                ex.migration,
                EventRecord::warning(VM_FAILED, format!("VM {} failed in {}: {}", vm.name, phase, failure)),
            )
            .await;
        }
    }

    async fn run_phase(&self, ex: &Execution<'_>, vm: &mut VmStatus) -> Result<Step, ControllerError> {
        let Some(source_vm) = ex.source_vm(&vm.id) else {
            return Ok(Step::Fail(format!("VM {} is not in the source inventory", vm.id)));
        };
        match vm.phase {
            VmPhase::Pending => Ok(Step::Advance),
            VmPhase::PreCheck => self.precheck(ex, vm, source_vm).await,
            VmPhase::CreateDataVolumes => self.create_data_volumes(ex, vm, source_vm).await,
            VmPhase::Populating => self.populating(ex, vm).await,
            VmPhase::Cutover => self.cutover(ex, vm, source_vm).await,
            VmPhase::FinalSync => self.final_sync(ex, vm, source_vm).await,
            VmPhase::Convert => self.convert(ex, vm, source_vm).await,
            VmPhase::CreateTargetVm => self.create_target_vm(ex, vm, source_vm).await,
            VmPhase::Succeeded | VmPhase::Failed | VmPhase::Canceled => Ok(Step::Wait),
        }
    }

    async fn precheck(&self, ex: &Execution<'_>, vm: &mut VmStatus, source_vm: &Vm) -> Result<Step, ControllerError> {
        if let Some(message) = ex.unmapped(source_vm) {
            return Ok(Step::Fail(message));
        }
        if vm.restore_power_state.is_none() {
            vm.restore_power_state = Some(if source_vm.is_powered_on() {
                PowerState::On
            } else {
                PowerState::Off
            });
        }
        if ex.plan.spec.run_preflight_inspection && ex.source.spec.type_.requires_conversion() {
            match self.inspect(ex, vm, source_vm).await? {
                Step::Advance => {}
                other => return Ok(other),
            }
        }
        if ex.plan.spec.type_ == MigrationType::Cold {
            return self.power_off(ex, vm, VmPhase::PreCheck, source_vm).await;
        }
        Ok(Step::Advance)
    }

    /// Run the guest inspection once and wait for its verdict.
    async fn inspect(&self, ex: &Execution<'_>, vm: &VmStatus, source_vm: &Vm) -> Result<Step, ControllerError> {
        let scope = ex.scope(vm);
        let pod_name = scope.inspect_pod_name();
        let Some(pod) = self.cluster.get_pod(&scope.namespace, &pod_name).await? else {
            let secret = self.source_secret(ex, source_vm).await?;
            let pod = inspection_pod(
                &scope,
                &self.config.virt_v2v_image,
                ex.source.spec.type_,
                source_vm,
                secret.as_deref(),
            );
            self.cluster.create_pod(&pod).await?;
            info!("Started preflight inspection {}/{} for VM {}", scope.namespace, pod_name, vm.id);
            return Ok(Step::Wait);
        };
        match pod_phase(pod).as_deref() {
            Some("Succeeded") => Ok(Step::Advance),
            Some("Failed") => Ok(Step::Fail(format!("preflight inspection of VM {} failed", vm.name))),
            _ => Ok(Step::Wait),
        }
    }

    /// Copy of the source credentials in the target namespace, when the
    /// provider has any.
    async fn source_secret(&self, ex: &Execution<'_>, source_vm: &Vm) -> Result<Option<String>, ControllerError> {
        match ex.credentials_secret(source_vm) {
            Ok((namespace, name)) => Ok(Some(self.copy_secret(ex, &namespace, &name).await?)),
            Err(ControllerError::Configuration(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Ask the source to power the VM off once, then wait until the
    /// inventory reports it off.
    async fn power_off(
        &self,
        ex: &Execution<'_>,
        vm: &mut VmStatus,
        phase: VmPhase,
        source_vm: &Vm,
    ) -> Result<Step, ControllerError> {
        if !source_vm.is_powered_on() {
            return Ok(Step::Advance);
        }
        let requested = vm.step(phase).is_some_and(|s| s.progress.completed > 0);
        if !requested {
            match self.power.power_off(&ex.source, &ex.credentials, &vm.id).await {
                Ok(()) => info!("Requested power off of VM {}", vm.id),
                Err(ControllerError::Unsupported(message)) => {
                    warn!("Cannot power off VM {} from here: {}", vm.id, message);
                    self.event(
                        ex.migration,
                        EventRecord::warning(
                            POWER_OFF_UNSUPPORTED,
                            format!("Power off VM {} on the source to continue", vm.name),
                        ),
                    )
                    .await;
                }
                Err(e) => return Err(e),
            }
            if let Some(step) = vm.step_mut(phase) {
                step.progress = Progress { completed: 1, total: 1 };
            }
        }
        debug!("Waiting for VM {} to power off", vm.id);
        Ok(Step::Wait)
    }

    async fn create_data_volumes(
        &self,
        ex: &Execution<'_>,
        vm: &mut VmStatus,
        source_vm: &Vm,
    ) -> Result<Step, ControllerError> {
        let scope = ex.scope(vm);
        let tasks = match ex.path {
            TransferPath::Populator(kind) => self.create_populated_claims(ex, vm, source_vm, kind, &scope).await?,
            TransferPath::Blank | TransferPath::Clone => self.create_cdi_volumes(ex, vm, source_vm, &scope).await?,
        };
        if ex.phases.contains(&VmPhase::Populating) {
            if let Some(step) = vm.step_mut(VmPhase::Populating) {
                step.tasks = tasks;
                step.reflect_tasks();
            }
        } else if let Some(step) = vm.step_mut(VmPhase::CreateDataVolumes) {
            step.tasks = tasks;
        }
        Ok(Step::Advance)
    }

    async fn create_populated_claims(
        &self,
        ex: &Execution<'_>,
        vm: &VmStatus,
        source_vm: &Vm,
        kind: PopulatorKind,
        scope: &VmScope,
    ) -> Result<Vec<DiskTask>, ControllerError> {
        let existing = self.cluster.list_pvcs(&scope.namespace, &scope.selector()).await?;

        let mut tasks = Vec::new();
        for disk in ex.disks(source_vm) {
            let pair = ex.storage_pair_for(disk).ok_or_else(|| {
                ControllerError::Configuration(format!("storage of disk {} is not mapped", disk.id))
            })?;
            let transfer = self.transfer_source(ex, source_vm, pair).await?;
            let populator = scope.volume_name(disk);
            let spec = populator_spec(kind, &ex.source, source_vm, disk, &transfer)?;
            let object = populator_object(scope, disk, &spec)?;
            self.cluster.create_populator(kind, &scope.namespace, &object).await?;

            let pvc = match existing.iter().find(|c| disk_source(c) == Some(disk.id.as_str())) {
                Some(claim) => claim.metadata.name.clone(),
                None => {
                    let claim = user_pvc(
                        scope,
                        kind,
                        &populator,
                        disk,
                        pair,
                        ex.plan.spec.pvc_name_template_use_generate_name,
                    )?;
                    let created = self.cluster.create_pvc(&claim).await?;
                    info!(
                        "Created PVC {}/{} for disk {} of VM {}",
                        scope.namespace,
                        created.name_any(),
                        disk.id,
                        vm.id
                    );
                    created.metadata.name
                }
            };
            tasks.push(DiskTask {
                name: disk.id.clone(),
                pvc,
                populator: Some(populator),
                phase: DiskPhase::Pending,
                ..Default::default()
            });
        }
        Ok(tasks)
    }

    /// DataVolumes for sources without a populator. OpenShift disks are
    /// sized and mapped after their source claims.
    async fn create_cdi_volumes(
        &self,
        ex: &Execution<'_>,
        vm: &VmStatus,
        source_vm: &Vm,
        scope: &VmScope,
    ) -> Result<Vec<DiskTask>, ControllerError> {
        let mut tasks = Vec::new();
        for disk in ex.disks(source_vm) {
            let (pair, size, source) = if ex.source.spec.type_ == ProviderType::Openshift {
                let namespace = ex.source_namespace(vm, source_vm)?;
                let claim = self
                    .cluster
                    .get_pvc(namespace, &disk.id)
                    .await?
                    .ok_or_else(|| ControllerError::NotFound(format!("claim {}/{}", namespace, disk.id)))?;
                let class = claim.spec.as_ref().and_then(|s| s.storage_class_name.as_deref());
                let pair = ex.storage_pair_for_class(class);
                match ex.path {
                    TransferPath::Clone => {
                        let source = DataVolumeSource::Pvc {
                            namespace: namespace.to_string(),
                            name: disk.id.clone(),
                        };
                        (pair, None, source)
                    }
                    _ => (pair, claim_size(&claim), DataVolumeSource::Blank),
                }
            } else {
                let size = (disk.capacity > 0).then(|| disk.capacity.to_string());
                (ex.storage_pair_for(disk), size, DataVolumeSource::Blank)
            };
            let pair = pair.ok_or_else(|| {
                ControllerError::Configuration(format!("storage of disk {} is not mapped", disk.id))
            })?;
            let name = scope.volume_name(disk);
            let object = data_volume(scope, disk, pair, size, &source)?;
            self.cluster
                .create_object(ExternalKind::DataVolume, &scope.namespace, &object)
                .await?;
            info!(
                "Created DataVolume {}/{} for disk {} of VM {}",
                scope.namespace, name, disk.id, vm.id
            );
            tasks.push(DiskTask {
                name: disk.id.clone(),
                pvc: Some(name),
                populator: None,
                phase: DiskPhase::Pending,
                ..Default::default()
            });
        }
        Ok(tasks)
    }

    /// Worker credentials for one disk. Offloaded copies use the secret named
    /// by the storage pair; streamed copies get the host or provider secret
    /// copied into the target namespace.
    async fn transfer_source(
        &self,
        ex: &Execution<'_>,
        source_vm: &Vm,
        pair: &StoragePair,
    ) -> Result<TransferSource, ControllerError> {
        let transfer_network = ex.plan.spec.transfer_network.clone();
        let offload = pair.offload_plugin.as_ref().and_then(|o| o.vsphere_xcopy_config.as_ref());
        if let Some(config) = offload {
            return Ok(TransferSource {
                secret_name: config.secret_ref.clone(),
                vendor: Some(config.storage_vendor_product.to_string()),
                transfer_network,
            });
        }
        let (secret_ns, secret_name) = ex.credentials_secret(source_vm)?;
        let secret_name = self.copy_secret(ex, &secret_ns, &secret_name).await?;
        Ok(TransferSource {
            secret_name,
            vendor: None,
            transfer_network,
        })
    }

    /// Copy of a credentials secret in the target namespace, shared by every
    /// migration of the plan.
    async fn copy_secret(&self, ex: &Execution<'_>, namespace: &str, name: &str) -> Result<String, ControllerError> {
        let target_ns = ex.target_namespace();
        let copy_name = dns1123(&format!("{}-{}", ex.plan.name_any(), name));
        if self.cluster.get_secret(target_ns, &copy_name).await?.is_some() {
            return Ok(copy_name);
        }
        let original = self
            .cluster
            .get_secret(namespace, name)
            .await?
            .ok_or_else(|| ControllerError::NotFound(format!("secret {namespace}/{name}")))?;
        let copy = Secret {
            metadata: ObjectMeta {
                name: Some(copy_name.clone()),
                namespace: Some(target_ns.to_string()),
                labels: Some(BTreeMap::from([(PLAN_LABEL.to_string(), ex.plan.uid().unwrap_or_default())])),
                ..Default::default()
            },
            data: original.data,
            type_: original.type_,
            ..Default::default()
        };
        self.cluster.create_secret(&copy).await?;
        debug!("Copied secret {}/{} to {}/{}", namespace, name, target_ns, copy_name);
        Ok(copy_name)
    }

    async fn populating(&self, ex: &Execution<'_>, vm: &mut VmStatus) -> Result<Step, ControllerError> {
        let kind = ex.path.populator();
        let scope = ex.scope(vm);
        let claims = self.cluster.list_pvcs(&scope.namespace, &scope.selector()).await?;
        let limit = self.config.restart_limit;

        let mut tasks = vm.step(VmPhase::Populating).map(|s| s.tasks.clone()).unwrap_or_default();
        let mut restarts = 0;
        let mut failure = None;
        for task in tasks.iter_mut() {
            if task.populator.is_none() {
                if let Some(message) = self.track_data_volume(&scope.namespace, ex.path, task).await? {
                    failure = Some(message);
                }
                continue;
            }
            let Some(claim) = claims.iter().find(|c| task.pvc.is_some() && c.metadata.name == task.pvc) else {
                task.phase = DiskPhase::Pending;
                continue;
            };
            let recreated = recreations(claim);
            restarts += recreated;
            if claim_phase(claim) == Some("Bound") {
                task.phase = DiskPhase::Bound;
                task.progress = 100;
                continue;
            }
            if recreated >= limit && self.worker_failed(&scope.namespace, claim).await? {
                let message = format!("disk {} exceeded the restart limit of {}", task.name, limit);
                task.phase = DiskPhase::Failed;
                task.error = Some(message.clone());
                failure = Some(message);
                continue;
            }
            task.phase = DiskPhase::Populating;
            if let (Some(kind), Some(populator)) = (kind, &task.populator) {
                if let Some(object) = self.cluster.get_populator(kind, &scope.namespace, populator).await? {
                    let status: PopulatorStatus = object
                        .get("status")
                        .cloned()
                        .map(serde_json::from_value)
                        .transpose()?
                        .unwrap_or_default();
                    task.progress = status.percent();
                }
            }
        }

        vm.restarts = restarts;
        let bound = tasks.iter().all(|t| t.phase == DiskPhase::Bound);
        let populators: Vec<String> = tasks.iter().filter_map(|t| t.populator.clone()).collect();
        if let Some(step) = vm.step_mut(VmPhase::Populating) {
            step.tasks = tasks;
            step.reflect_tasks();
        }
        if let Some(message) = failure {
            return Ok(Step::Fail(message));
        }
        if !bound {
            return Ok(Step::Wait);
        }
        if let Some(kind) = kind {
            for populator in populators {
                self.cluster.delete_populator(kind, &scope.namespace, &populator).await?;
            }
        }
        info!("All disks of VM {} populated", vm.id);
        Ok(Step::Advance)
    }

    /// Reflect a DataVolume's phase on its task. Blank volumes waiting for
    /// their first consumer are ready: the guest conversion is that consumer.
    async fn track_data_volume(
        &self,
        namespace: &str,
        path: TransferPath,
        task: &mut DiskTask,
    ) -> Result<Option<String>, ControllerError> {
        let Some(name) = task.pvc.as_deref() else {
            return Ok(None);
        };
        let object = self.cluster.get_object(ExternalKind::DataVolume, namespace, name).await?;
        let status = object.as_ref().and_then(|o| o.get("status"));
        let phase = status.and_then(|s| s.get("phase")).and_then(Value::as_str);
        match phase {
            Some("Succeeded") => {
                task.phase = DiskPhase::Bound;
                task.progress = 100;
            }
            Some("WaitForFirstConsumer" | "PendingPopulation") if path == TransferPath::Blank => {
                task.phase = DiskPhase::Bound;
                task.progress = 100;
            }
            Some("Failed") => {
                let message = format!("DataVolume {name} of disk {} failed", task.name);
                task.phase = DiskPhase::Failed;
                task.error = Some(message.clone());
                return Ok(Some(message));
            }
            Some(_) => {
                task.phase = DiskPhase::Populating;
                if let Some(progress) = status.and_then(|s| s.get("progress")).and_then(Value::as_str) {
                    task.progress = percent(progress);
                }
            }
            None => task.phase = DiskPhase::Pending,
        }
        Ok(None)
    }

    /// True when the populator's worker pod for `claim` ended in failure.
    async fn worker_failed(&self, namespace: &str, claim: &PersistentVolumeClaim) -> Result<bool, ControllerError> {
        let Some(uid) = claim.metadata.uid.as_deref() else {
            return Ok(false);
        };
        let pod = self
            .cluster
            .get_pod(namespace, &format!("{WORKER_POD_PREFIX}{uid}"))
            .await?;
        Ok(pod
            .and_then(|p| p.status)
            .and_then(|s| s.phase)
            .is_some_and(|phase| phase == "Failed"))
    }

    async fn cutover(&self, ex: &Execution<'_>, vm: &mut VmStatus, source_vm: &Vm) -> Result<Step, ControllerError> {
        match (ex.plan.spec.type_, ex.migration.spec.cutover) {
            (MigrationType::Live, Some(at)) if at > ex.now => Ok(Step::Wait),
            (MigrationType::Live, _) => self.live_handover(ex, vm, source_vm).await,
            (MigrationType::Warm, Some(at)) if at <= ex.now => {
                self.power_off(ex, vm, VmPhase::Cutover, source_vm).await
            }
            (MigrationType::Warm, _) => Ok(Step::Wait),
            _ => Ok(Step::Advance),
        }
    }

    /// Hand a running VM over to the waiting target: a receiving migration
    /// next to the target VM, then, once it publishes where it listens, a
    /// sending migration next to the source.
    async fn live_handover(
        &self,
        ex: &Execution<'_>,
        vm: &mut VmStatus,
        source_vm: &Vm,
    ) -> Result<Step, ControllerError> {
        let kind = ExternalKind::VirtualMachineInstanceMigration;
        let scope = ex.scope(vm);
        let set_progress = |vm: &mut VmStatus, completed| {
            if let Some(step) = vm.step_mut(VmPhase::Cutover) {
                step.progress = Progress { completed, total: 3 };
            }
        };

        let receive_name = scope.receive_migration_name();
        let Some(receive) = self.cluster.get_object(kind, &scope.namespace, &receive_name).await? else {
            self.cluster
                .create_object(kind, &scope.namespace, &receive_migration(&scope))
                .await?;
            set_progress(vm, 1);
            info!("Waiting to receive VM {} in {}/{}", vm.id, scope.namespace, scope.target_vm_name());
            return Ok(Step::Wait);
        };
        match receive.pointer("/status/phase").and_then(Value::as_str) {
            Some("Succeeded") => {
                set_progress(vm, 3);
                info!("VM {} handed over to {}/{}", vm.id, scope.namespace, scope.target_vm_name());
                return Ok(Step::Advance);
            }
            Some("Failed") => return Ok(Step::Fail(format!("live migration of VM {} failed", vm.name))),
            _ => {}
        }
        let Some(url) = receive
            .pointer("/status/synchronizationAddresses/0")
            .and_then(Value::as_str)
        else {
            debug!("Receiver {}/{} has no address yet", scope.namespace, receive_name);
            return Ok(Step::Wait);
        };

        let source_ns = ex.source_namespace(vm, source_vm)?.to_string();
        let send_name = scope.send_migration_name();
        if self.cluster.get_object(kind, &source_ns, &send_name).await?.is_none() {
            let object = send_migration(&scope, &source_ns, &source_vm.name, url);
            self.cluster.create_object(kind, &source_ns, &object).await?;
            set_progress(vm, 2);
            info!("Sending VM {} from {}/{} to {}", vm.id, source_ns, source_vm.name, url);
        }
        Ok(Step::Wait)
    }

    /// Copy what changed on each populated disk since the precopy, with the
    /// source powered off.
    async fn final_sync(&self, ex: &Execution<'_>, vm: &mut VmStatus, source_vm: &Vm) -> Result<Step, ControllerError> {
        let Some(kind) = ex.path.populator() else {
            return Ok(Step::Advance);
        };
        let scope = ex.scope(vm);
        let namespace = scope.namespace.as_str();
        let claims = self.cluster.list_pvcs(namespace, &scope.selector()).await?;
        let populated = vm.step(VmPhase::Populating).map(|s| s.tasks.clone()).unwrap_or_default();

        let mut tasks = Vec::with_capacity(populated.len());
        let mut failure = None;
        for done in &populated {
            let Some(claim) = claims.iter().find(|c| done.pvc.is_some() && c.metadata.name == done.pvc) else {
                return Ok(Step::Fail(format!("claim of disk {} is gone", done.name)));
            };
            let claim_name = claim.name_any();
            let pod_name = scope.sync_pod_name(&claim_name);
            let mut task = DiskTask {
                name: done.name.clone(),
                pvc: Some(claim_name),
                ..Default::default()
            };
            match self.cluster.get_pod(namespace, &pod_name).await? {
                None => {
                    let disk = source_vm.disks.iter().find(|d| d.id == done.name).ok_or_else(|| {
                        ControllerError::Configuration(format!("disk {} left VM {}", done.name, vm.id))
                    })?;
                    let pair = ex.storage_pair_for(disk).ok_or_else(|| {
                        ControllerError::Configuration(format!("storage of disk {} is not mapped", disk.id))
                    })?;
                    let transfer = self.transfer_source(ex, source_vm, pair).await?;
                    let spec = populator_spec(kind, &ex.source, source_vm, disk, &transfer)?;
                    let pod = sync_pod(&scope, self.config.worker_image(kind), &spec, claim, &transfer);
                    self.cluster.create_pod(&pod).await?;
                    info!("Started final sync {}/{} for disk {} of VM {}", namespace, pod_name, disk.id, vm.id);
                }
                Some(pod) => match pod_phase(pod).as_deref() {
                    Some("Succeeded") => {
                        task.phase = DiskPhase::Bound;
                        task.progress = 100;
                    }
                    Some("Failed") => {
                        let message = format!("final sync of disk {} failed", done.name);
                        task.phase = DiskPhase::Failed;
                        task.error = Some(message.clone());
                        failure = Some(message);
                    }
                    _ => task.phase = DiskPhase::Populating,
                },
            }
            tasks.push(task);
        }

        let synced = tasks.iter().all(|t| t.phase == DiskPhase::Bound);
        let pods: Vec<String> = tasks
            .iter()
            .filter_map(|t| t.pvc.as_deref())
            .map(|claim| scope.sync_pod_name(claim))
            .collect();
        if let Some(step) = vm.step_mut(VmPhase::FinalSync) {
            step.tasks = tasks;
            step.reflect_tasks();
        }
        if let Some(message) = failure {
            return Ok(Step::Fail(message));
        }
        if !synced {
            return Ok(Step::Wait);
        }
        for pod in pods {
            self.cluster.delete_pod(namespace, &pod).await?;
        }
        info!("Final sync of VM {} done", vm.id);
        Ok(Step::Advance)
    }

    /// Claims of a VM in disk order. Conversion-only plans use the PVCs the
    /// user labelled with the VM id.
    async fn vm_claims(&self, ex: &Execution<'_>, vm: &VmStatus) -> Result<Vec<PersistentVolumeClaim>, ControllerError> {
        let scope = ex.scope(vm);
        let selector = match ex.plan.spec.type_ {
            MigrationType::ConversionOnly => format!("{}={}", VM_ID_LABEL, dns1123(&vm.id)),
            _ => scope.selector(),
        };
        let claims = self.cluster.list_pvcs(&scope.namespace, &selector).await?;
        Ok(ordered_claims(claims, disk_tasks(vm)))
    }

    async fn convert(&self, ex: &Execution<'_>, vm: &mut VmStatus, source_vm: &Vm) -> Result<Step, ControllerError> {
        let scope = ex.scope(vm);
        let pod_name = scope.convert_pod_name();
        let Some(pod) = self.cluster.get_pod(&scope.namespace, &pod_name).await? else {
            let claims = self.vm_claims(ex, vm).await?;
            if claims.is_empty() {
                return Ok(Step::Fail(format!("VM {} has no disks to convert", vm.id)));
            }
            let options = self.conversion_options(ex, source_vm).await?;
            let pod = convert_pod(&scope, &self.config.virt_v2v_image, ex.source.spec.type_, &claims, &options);
            self.cluster.create_pod(&pod).await?;
            info!("Started guest conversion {}/{} for VM {}", scope.namespace, pod_name, vm.id);
            return Ok(Step::Wait);
        };
        match pod.status.and_then(|s| s.phase).as_deref() {
            Some("Succeeded") => Ok(Step::Advance),
            Some("Failed") => Ok(Step::Fail(format!("guest conversion pod {pod_name} failed"))),
            _ => Ok(Step::Wait),
        }
    }

    /// Static addresses to keep, and for disks nothing populated, where the
    /// conversion reads them from.
    async fn conversion_options(&self, ex: &Execution<'_>, source_vm: &Vm) -> Result<ConversionOptions, ControllerError> {
        let preserve_static_ips = ex.plan.spec.preserve_static_ips;
        let mut options = ConversionOptions {
            preserve_static_ips,
            static_ips: if preserve_static_ips { static_ips(source_vm) } else { None },
            ..Default::default()
        };
        if ex.transfers_disks() && ex.path == TransferPath::Blank {
            options.disk_sources = ex
                .disks(source_vm)
                .map(|d| d.file.clone().unwrap_or_else(|| d.id.clone()))
                .collect();
            options.source_url = Some(ex.source.spec.url.clone()).filter(|u| !u.is_empty());
            options.secret_name = self.source_secret(ex, source_vm).await?;
        }
        Ok(options)
    }

    async fn create_target_vm(
        &self,
        ex: &Execution<'_>,
        vm: &mut VmStatus,
        source_vm: &Vm,
    ) -> Result<Step, ControllerError> {
        let scope = ex.scope(vm);
        let vm_name = scope.target_vm_name();
        if self.cluster.get_virtual_machine(&scope.namespace, &vm_name).await?.is_none() {
            let claims = self.vm_claims(ex, vm).await?;
            let options = TargetOptions {
                compatibility_mode: ex.plan.spec.compatibility_mode,
                receiver: ex.plan.spec.type_ == MigrationType::Live,
            };
            let object = virtual_machine(
                &scope,
                source_vm,
                vm,
                &claims,
                &ex.network_pairs,
                &ex.network_names,
                options,
            )?;
            self.cluster.create_virtual_machine(&scope.namespace, &object).await?;
            info!("Created VirtualMachine {}/{} for VM {}", scope.namespace, vm_name, vm.id);
        }
        Ok(Step::Advance)
    }

    /// Delete populator requests, worker pods, shadow PVCs, the guest pods
    /// and live handover objects of one VM, then release the user PVCs from
    /// the populator finalizer. DataVolumes stay with the claims they own.
    async fn cleanup_vm(&self, scope: &VmScope, source_namespace: Option<&str>) -> Result<(), ControllerError> {
        let namespace = scope.namespace.as_str();
        let claims = self.cluster.list_pvcs(namespace, &scope.selector()).await?;
        for claim in &claims {
            let source = claim.spec.as_ref().and_then(|s| s.data_source_ref.as_ref());
            if let Some((kind, source)) = source.and_then(|s| PopulatorKind::from_kind(&s.kind).map(|k| (k, s))) {
                self.cluster.delete_populator(kind, namespace, &source.name).await?;
            }
            if let Some(uid) = claim.metadata.uid.as_deref() {
                self.cluster
                    .delete_pod(namespace, &format!("{WORKER_POD_PREFIX}{uid}"))
                    .await?;
                self.cluster
                    .delete_pvc(namespace, &format!("{SHADOW_PVC_PREFIX}{uid}"))
                    .await?;
            }
            self.cluster
                .delete_pod(namespace, &scope.sync_pod_name(&claim.name_any()))
                .await?;
        }
        self.cluster.delete_pod(namespace, &scope.convert_pod_name()).await?;
        self.cluster.delete_pod(namespace, &scope.inspect_pod_name()).await?;

        let handover = ExternalKind::VirtualMachineInstanceMigration;
        self.cluster
            .delete_object(handover, namespace, &scope.receive_migration_name())
            .await?;
        if let Some(source_ns) = source_namespace {
            self.cluster
                .delete_object(handover, source_ns, &scope.send_migration_name())
                .await?;
        }

        for claim in &claims {
            if !claim.finalizers().iter().any(|f| f == POPULATE_TARGET_FINALIZER) {
                continue;
            }
            let kept: Vec<&String> = claim
                .finalizers()
                .iter()
                .filter(|f| *f != POPULATE_TARGET_FINALIZER)
                .collect();
            let patch = serde_json::json!({ "metadata": { "finalizers": kept } });
            self.cluster.patch_pvc(namespace, &claim.name_any(), &patch).await?;
        }
        debug!("Cleaned up transfer objects of VM {} in {}", scope.vm_id, namespace);
        Ok(())
    }

    /// Fold VM phases into the migration conditions. Returns true once the
    /// migration is finished.
    async fn update_conditions(&self, migration: &Migration, status: &mut MigrationStatus) -> bool {
        let Some(phase) = aggregate(&status.vms) else {
            let done = status.vms.iter().filter(|vm| vm.phase.is_terminal()).count();
            condition::set(
                &mut status.conditions,
                Condition::truthy(
                    condition_type::EXECUTING,
                    reason::STARTED,
                    format!("{} of {} VM(s) finished", done, status.vms.len()),
                ),
            );
            return false;
        };

        let (type_, why, event) = match phase {
            VmPhase::Succeeded => (
                condition_type::SUCCEEDED,
                reason::COMPLETED,
                EventRecord::normal(reason::COMPLETED, "Migration succeeded"),
            ),
            VmPhase::Failed => (
                condition_type::FAILED,
                reason::FAILED,
                EventRecord::warning(reason::FAILED, "Migration failed"),
            ),
            _ => (
                condition_type::CANCELED,
                reason::CANCELED,
                EventRecord::normal(reason::CANCELED, "Migration canceled"),
            ),
        };
        condition::set(
            &mut status.conditions,
            Condition::falsy(condition_type::EXECUTING, why, "The migration has finished."),
        );
        condition::set(&mut status.conditions, Condition::truthy(type_, why, ""));
        status.timed.mark_completed();
        info!("Migration {}: {}", migration.name_any(), event.note);
        self.event(migration, event).await;
        true
    }

    /// Reflect the latest migration on its plan.
    async fn mirror_to_plan(
        &self,
        migration: &Migration,
        plan: &Plan,
        status: &MigrationStatus,
    ) -> Result<(), ControllerError> {
        let (plan_ns, plan_name) = identity(plan);
        let (namespace, name) = identity(migration);
        let mut plan_status = plan.status.clone().unwrap_or_default();
        plan_status.vms = status.vms.clone();
        plan_status.migration = Some(ResourceRef::with_namespace(name, namespace));
        for type_ in [
            condition_type::EXECUTING,
            condition_type::SUCCEEDED,
            condition_type::FAILED,
            condition_type::CANCELED,
        ] {
            match condition::find(&status.conditions, type_) {
                Some(c) => condition::set(&mut plan_status.conditions, c.clone()),
                None => {
                    condition::remove(&mut plan_status.conditions, type_);
                }
            }
        }
        self.write_status(ResourceKind::Plan, &plan_ns, &plan_name, &plan_status)
            .await
    }
}
