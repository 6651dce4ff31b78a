//! Plan reconciler
//!
//! Resolves the plan's VMs against the source inventory, makes sure a
//! network map and (except for conversion-only plans) a storage map exist,
//! and reports readiness. Maps are generated when the plan names none:
//! from the pair strings in the plan annotations when present, otherwise
//! from the default mapping rules. Generated maps are owned by the plan.
//!
//! A finalizer keeps the plan alive while one of its migrations runs.

use super::migration::builder::transfer_path;
use super::{Reconciler, has_finalizer, identity, set_ready, with_finalizer, without_finalizer};
use crate::cluster::{EventRecord, ResourceKind};
use crate::error::ControllerError;
use crate::ownership::owner_reference;
use crds::condition::{self, Condition, condition_type, reason};
use crds::{
    Migration, MigrationType, NetworkMap, NetworkMapSpec, Plan, PlanStatus, PlanVm, Provider, ProviderPair,
    ProviderType, ResourceRef, StorageMap, StorageMapSpec,
};
use inventory_client::{SourceAdapter, Vm, find_vm_in};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use mapping::{
    StorageOptions, default_network_pairs, default_storage_pairs, parse_network_pairs, parse_storage_pairs,
    resolve_network_pairs, resolve_storage_pairs, source_networks_for, source_storages_for,
};
use tracing::{debug, info, warn};

/// Network pair string (`source:target,...`) used when generating the network map
pub const NETWORK_PAIRS_ANNOTATION: &str = "forklift.konveyor.io/network-pairs";

/// Storage pair string used when generating the storage map
pub const STORAGE_PAIRS_ANNOTATION: &str = "forklift.konveyor.io/storage-pairs";

/// Default network target for generated network maps
pub const DEFAULT_NETWORK_ANNOTATION: &str = "forklift.konveyor.io/default-network";

/// Default storage class for generated storage maps
pub const DEFAULT_STORAGE_CLASS_ANNOTATION: &str = "forklift.konveyor.io/default-storage-class";

/// Result of checking a plan's prerequisites
#[derive(Debug, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Not ready yet; re-checked after the requeue interval
    Blocked(&'static str, String),
}

/// Spec checks that need no lookups.
pub fn validate_plan_spec(plan: &Plan) -> Result<(), ControllerError> {
    if plan.spec.target_namespace.trim().is_empty() {
        return Err(ControllerError::Validation("targetNamespace is required".to_string()));
    }
    if plan.spec.vms.is_empty() {
        return Err(ControllerError::Validation("plan lists no VMs".to_string()));
    }
    if !plan.spec.type_.requires_storage_map() && plan.spec.map.storage.is_some() {
        return Err(ControllerError::Validation(
            "conversion-only plans must not reference a storage map".to_string(),
        ));
    }
    Ok(())
}

/// True while `migration` executes `plan` and has not reached a terminal state.
pub fn runs_plan(migration: &Migration, plan_namespace: &str, plan_name: &str) -> bool {
    let namespace = migration.namespace().unwrap_or_default();
    let plan_ref = &migration.spec.plan;
    plan_ref.name == plan_name
        && plan_ref.namespace_or(&namespace) == plan_namespace
        && !migration.status.as_ref().is_some_and(|s| s.is_terminal())
}

fn annotation<'a>(plan: &'a Plan, key: &str) -> Option<&'a str> {
    plan.annotations()
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
}

/// Why a referenced map cannot be used yet, if it cannot.
fn map_blocker(kind: &str, key: &str, conditions: Option<&[Condition]>) -> Option<String> {
    match conditions {
        None => Some(format!("{kind} {key} not found")),
        Some(c) if !condition::is_true(c, condition_type::READY) => Some(format!("{kind} {key} is not ready")),
        Some(_) => None,
    }
}

impl Reconciler {
    pub async fn reconcile_plan(&self, plan: &Plan) -> Result<Action, ControllerError> {
        let (namespace, name) = identity(plan);
        info!("Reconciling Plan {}/{}", namespace, name);

        if plan.metadata.deletion_timestamp.is_some() {
            return self.finalize_plan(plan).await;
        }
        if !has_finalizer(plan) {
            self.set_finalizers(ResourceKind::Plan, &namespace, &name, &with_finalizer(plan))
                .await?;
        }

        let mut status = plan.status.clone().unwrap_or_default();
        status.observed_generation = plan.metadata.generation;

        match self.prepare_plan(plan, &mut status).await {
            Ok(Readiness::Ready) => {
                info!("Plan {}/{} is ready with {} VM(s)", namespace, name, status.resolved_vms.len());
                set_ready(&mut status.conditions, Ok(()), None);
                self.write_status(ResourceKind::Plan, &namespace, &name, &status).await?;
                Ok(Action::await_change())
            }
            Ok(Readiness::Blocked(why, message)) => {
                info!("Plan {}/{} not ready ({}): {}", namespace, name, why, message);
                set_ready(&mut status.conditions, Err((why, message)), None);
                self.write_status(ResourceKind::Plan, &namespace, &name, &status).await?;
                Ok(Action::requeue(self.config.requeue))
            }
            Err(e) => {
                warn!("Plan {}/{} failed validation: {}", namespace, name, e);
                set_ready(&mut status.conditions, Err((e.reason(), e.to_string())), None);
                self.write_status(ResourceKind::Plan, &namespace, &name, &status).await?;
                if e.is_retriable() {
                    Err(e)
                } else {
                    Ok(Action::await_change())
                }
            }
        }
    }

    /// Release the finalizer once no migration of the plan is running.
    async fn finalize_plan(&self, plan: &Plan) -> Result<Action, ControllerError> {
        let (namespace, name) = identity(plan);
        if !has_finalizer(plan) {
            return Ok(Action::await_change());
        }
        let running: Vec<String> = self
            .cluster
            .list_migrations(&namespace)
            .await?
            .iter()
            .filter(|m| runs_plan(m, &namespace, &name))
            .map(|m| m.name_any())
            .collect();
        if !running.is_empty() {
            info!(
                "Plan {}/{} deletion waits for running migration(s): {}",
                namespace,
                name,
                running.join(", ")
            );
            return Ok(Action::requeue(self.config.requeue));
        }
        self.set_finalizers(ResourceKind::Plan, &namespace, &name, &without_finalizer(plan))
            .await?;
        info!("Plan {}/{} released", namespace, name);
        Ok(Action::await_change())
    }

    /// Provider behind `reference`, or a message saying why it cannot be used.
    pub(crate) async fn ready_provider(
        &self,
        reference: &ResourceRef,
        namespace: &str,
    ) -> Result<Result<Provider, String>, ControllerError> {
        let key = reference.key(namespace);
        let Some(provider) = self
            .cluster
            .get_provider(reference.namespace_or(namespace), &reference.name)
            .await?
        else {
            return Ok(Err(format!("provider {key} not found")));
        };
        let ready = provider
            .status
            .as_ref()
            .is_some_and(|s| condition::is_true(&s.conditions, condition_type::READY));
        if !ready {
            return Ok(Err(format!("provider {key} is not ready")));
        }
        Ok(Ok(provider))
    }

    async fn prepare_plan(&self, plan: &Plan, status: &mut PlanStatus) -> Result<Readiness, ControllerError> {
        let (namespace, _) = identity(plan);
        validate_plan_spec(plan)?;

        let source = match self.ready_provider(&plan.spec.provider.source, &namespace).await? {
            Ok(p) => p,
            Err(message) => return Ok(Readiness::Blocked(reason::PROVIDER_NOT_READY, message)),
        };
        if let Err(message) = self.ready_provider(&plan.spec.provider.destination, &namespace).await? {
            return Ok(Readiness::Blocked(reason::PROVIDER_NOT_READY, message));
        }
        if plan.spec.type_ == MigrationType::Live && source.spec.type_ != ProviderType::Openshift {
            return Err(ControllerError::Validation(format!(
                "live migration requires an openshift source, not {}",
                source.spec.type_
            )));
        }
        if plan.spec.type_ == MigrationType::Warm && transfer_path(plan.spec.type_, source.spec.type_).populator().is_none()
        {
            return Err(ControllerError::Validation(format!(
                "warm migration needs a volume populator, none reads {} sources",
                source.spec.type_
            )));
        }

        let adapter = self.adapter_for(&source).await?;
        let vms = self.resolve_vms(plan, adapter.as_ref(), status).await?;
        if vms.is_empty() {
            return Ok(Readiness::Blocked(
                reason::NO_VALID_VMS,
                "none of the plan's VMs exist in the source inventory".to_string(),
            ));
        }

        let mut created = serde_json::Map::new();
        match &plan.spec.map.network {
            Some(reference) => {
                let map = self
                    .cluster
                    .get_network_map(reference.namespace_or(&namespace), &reference.name)
                    .await?;
                let conditions = map.as_ref().map(|m| m.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or_default());
                if let Some(message) = map_blocker("network map", &reference.key(&namespace), conditions) {
                    return Ok(Readiness::Blocked(reason::MAP_NOT_READY, message));
                }
            }
            None => {
                let reference = self.ensure_network_map(plan, &source, adapter.as_ref(), &vms).await?;
                created.insert("network".to_string(), serde_json::to_value(reference)?);
            }
        }
        if plan.spec.type_.requires_storage_map() {
            match &plan.spec.map.storage {
                Some(reference) => {
                    let map = self
                        .cluster
                        .get_storage_map(reference.namespace_or(&namespace), &reference.name)
                        .await?;
                    let conditions = map.as_ref().map(|m| m.status.as_ref().map(|s| s.conditions.as_slice()).unwrap_or_default());
                    if let Some(message) = map_blocker("storage map", &reference.key(&namespace), conditions) {
                        return Ok(Readiness::Blocked(reason::MAP_NOT_READY, message));
                    }
                }
                None => {
                    let reference = self.ensure_storage_map(plan, &source, adapter.as_ref(), &vms).await?;
                    created.insert("storage".to_string(), serde_json::to_value(reference)?);
                }
            }
        }

        if !created.is_empty() {
            let (namespace, name) = identity(plan);
            let names: Vec<String> = created
                .values()
                .filter_map(|v| v.get("name").and_then(|n| n.as_str()).map(str::to_string))
                .collect();
            let patch = serde_json::json!({ "spec": { "map": created } });
            self.cluster
                .patch_resource(ResourceKind::Plan, &namespace, &name, &patch)
                .await?;
            return Ok(Readiness::Blocked(
                reason::MAP_CREATED,
                format!("generated {}, waiting for validation", names.join(" and ")),
            ));
        }
        Ok(Readiness::Ready)
    }

    /// Inventory VMs for the plan's entries; missing ones are dropped with a warning event.
    async fn resolve_vms(
        &self,
        plan: &Plan,
        adapter: &dyn SourceAdapter,
        status: &mut PlanStatus,
    ) -> Result<Vec<Vm>, ControllerError> {
        let (namespace, name) = identity(plan);
        let inventory = adapter.list_vms().await?;
        let mut resolved = Vec::with_capacity(plan.spec.vms.len());
        for entry in &plan.spec.vms {
            match find_vm_in(&inventory, entry.id.as_deref(), &entry.name, entry.namespace.as_deref()) {
                Some(vm) => {
                    debug!("Plan {}/{}: VM {} resolved to {}", namespace, name, entry.key(), vm.id);
                    resolved.push(vm.clone());
                }
                None => {
                    warn!("Plan {}/{}: VM {} not found in inventory, dropping it", namespace, name, entry.key());
                    self.event(
                        plan,
                        EventRecord::warning(
                            reason::VM_NOT_FOUND,
                            format!("VM {} not found in the source inventory", entry.key()),
                        ),
                    )
                    .await;
                }
            }
        }
        status.resolved_vms = resolved
            .iter()
            .map(|vm| PlanVm {
                id: Some(vm.id.clone()),
                name: vm.name.clone(),
                namespace: vm.namespace.clone(),
            })
            .collect();
        Ok(resolved)
    }

    fn generated_meta(plan: &Plan, suffix: &str) -> Result<ObjectMeta, ControllerError> {
        let (namespace, name) = identity(plan);
        let owner = owner_reference(plan, true)
            .ok_or_else(|| ControllerError::Configuration(format!("plan {namespace}/{name} has no uid")))?;
        Ok(ObjectMeta {
            name: Some(format!("{name}-{suffix}")),
            namespace: Some(namespace),
            owner_references: Some(vec![owner]),
            ..Default::default()
        })
    }

    async fn ensure_network_map(
        &self,
        plan: &Plan,
        source: &Provider,
        adapter: &dyn SourceAdapter,
        vms: &[Vm],
    ) -> Result<ResourceRef, ControllerError> {
        let (namespace, name) = identity(plan);
        let map_name = format!("{name}-network-map");
        if self.cluster.get_network_map(&namespace, &map_name).await?.is_some() {
            debug!("Plan {}/{} reuses network map {}", namespace, name, map_name);
            return Ok(ResourceRef::with_namespace(map_name, namespace));
        }

        let target_ns = plan.spec.target_namespace.as_str();
        let pairs = match annotation(plan, NETWORK_PAIRS_ANNOTATION) {
            Some(input) => resolve_network_pairs(&parse_network_pairs(input, target_ns)?, adapter).await?,
            None => {
                let sources = source_networks_for(vms, &adapter.list_networks().await?);
                let targets = self.cluster.list_network_attachment_definitions(target_ns).await?;
                default_network_pairs(
                    source.spec.type_,
                    &sources,
                    &targets,
                    annotation(plan, DEFAULT_NETWORK_ANNOTATION),
                    target_ns,
                )
            }
        };
        let map = NetworkMap {
            metadata: Self::generated_meta(plan, "network-map")?,
            spec: NetworkMapSpec {
                provider: self.map_providers(plan, &namespace),
                map: pairs,
            },
            status: None,
        };
        self.cluster.create_network_map(&map).await?;
        info!("Plan {}/{}: created network map {} with {} pair(s)", namespace, name, map_name, map.spec.map.len());
        self.event(plan, EventRecord::normal(reason::MAP_CREATED, format!("Created network map {map_name}")))
            .await;
        Ok(ResourceRef::with_namespace(map_name, namespace))
    }

    async fn ensure_storage_map(
        &self,
        plan: &Plan,
        source: &Provider,
        adapter: &dyn SourceAdapter,
        vms: &[Vm],
    ) -> Result<ResourceRef, ControllerError> {
        let (namespace, name) = identity(plan);
        let map_name = format!("{name}-storage-map");
        if self.cluster.get_storage_map(&namespace, &map_name).await?.is_some() {
            debug!("Plan {}/{} reuses storage map {}", namespace, name, map_name);
            return Ok(ResourceRef::with_namespace(map_name, namespace));
        }

        let pairs = match annotation(plan, STORAGE_PAIRS_ANNOTATION) {
            Some(input) => {
                resolve_storage_pairs(&parse_storage_pairs(input, &StorageOptions::default())?, adapter).await?
            }
            None => {
                let storages = match source.spec.type_ {
                    ProviderType::Openshift => Vec::new(),
                    _ => adapter.list_storages().await?,
                };
                let sources = source_storages_for(vms, &storages, source.spec.type_);
                let classes = self.cluster.list_storage_classes().await?;
                default_storage_pairs(
                    source.spec.type_,
                    &sources,
                    &classes,
                    annotation(plan, DEFAULT_STORAGE_CLASS_ANNOTATION),
                )
            }
        };
        let map = StorageMap {
            metadata: Self::generated_meta(plan, "storage-map")?,
            spec: StorageMapSpec {
                provider: self.map_providers(plan, &namespace),
                map: pairs,
            },
            status: None,
        };
        self.cluster.create_storage_map(&map).await?;
        info!("Plan {}/{}: created storage map {} with {} pair(s)", namespace, name, map_name, map.spec.map.len());
        self.event(plan, EventRecord::normal(reason::MAP_CREATED, format!("Created storage map {map_name}")))
            .await;
        Ok(ResourceRef::with_namespace(map_name, namespace))
    }

    fn map_providers(&self, plan: &Plan, namespace: &str) -> ProviderPair {
        let qualify = |r: &ResourceRef| ResourceRef::with_namespace(r.name.clone(), r.namespace_or(namespace));
        ProviderPair {
            source: qualify(&plan.spec.provider.source),
            destination: qualify(&plan.spec.provider.destination),
        }
    }
}
