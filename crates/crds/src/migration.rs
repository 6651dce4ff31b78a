//! Migration CRD
//!
//! A single execution of a Plan. The status carries one pipeline per VM; each
//! pipeline step is a [`Timed`] record that is started once and completed once.

use crate::condition::Condition;
use crate::references::ResourceRef;
use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "forklift.konveyor.io",
    version = "v1beta1",
    kind = "Migration",
    namespaced,
    status = "MigrationStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSpec {
    /// Plan being executed
    pub plan: ResourceRef,

    /// Cutover time for warm migrations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cutover: Option<DateTime<Utc>>,

    /// VMs to cancel
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cancel: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatus {
    /// Executing, Succeeded, Failed, Canceled
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Per-VM pipelines
    #[serde(default)]
    pub vms: Vec<VmStatus>,

    #[serde(flatten)]
    pub timed: Timed,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl MigrationStatus {
    /// True once a terminal condition has been recorded.
    pub fn is_terminal(&self) -> bool {
        use crate::condition::{condition_type, is_true};
        is_true(&self.conditions, condition_type::SUCCEEDED)
            || is_true(&self.conditions, condition_type::FAILED)
            || is_true(&self.conditions, condition_type::CANCELED)
    }

    pub fn find_vm(&self, id: &str) -> Option<&VmStatus> {
        self.vms.iter().find(|vm| vm.id == id)
    }

    pub fn find_vm_mut(&mut self, id: &str) -> Option<&mut VmStatus> {
        self.vms.iter_mut().find(|vm| vm.id == id)
    }
}

/// Start and completion timestamps
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Timed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
}

impl Timed {
    /// Mark started. No-op when already started.
    pub fn mark_started(&mut self) {
        if self.started.is_none() {
            self.started = Some(Utc::now());
        }
    }

    /// Mark completed, starting first if needed. No-op when already completed.
    pub fn mark_completed(&mut self) {
        self.mark_started();
        if self.completed.is_none() {
            let now = Utc::now();
            // Clock skew between replicas must not produce completed < started.
            self.completed = Some(match self.started {
                Some(started) if started > now => started,
                _ => now,
            });
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.is_some()
    }

    pub fn is_completed(&self) -> bool {
        self.completed.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.is_started() && !self.is_completed()
    }
}

/// Per-VM phases
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "PascalCase")]
pub enum VmPhase {
    /// Awaiting VM resolution against the source inventory
    #[default]
    #[serde(alias = "pending")]
    Pending,
    #[serde(alias = "precheck")]
    PreCheck,
    #[serde(alias = "createDataVolumes")]
    CreateDataVolumes,
    #[serde(alias = "populating")]
    Populating,
    #[serde(alias = "convert")]
    Convert,
    #[serde(rename = "CreateTargetVM", alias = "createTargetVM")]
    CreateTargetVm,
    #[serde(alias = "cutover")]
    Cutover,
    #[serde(alias = "finalSync")]
    FinalSync,
    #[serde(alias = "succeeded")]
    Succeeded,
    #[serde(alias = "failed")]
    Failed,
    #[serde(alias = "canceled")]
    Canceled,
}

impl VmPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::PreCheck => "PreCheck",
            Self::CreateDataVolumes => "CreateDataVolumes",
            Self::Populating => "Populating",
            Self::Convert => "Convert",
            Self::CreateTargetVm => "CreateTargetVM",
            Self::Cutover => "Cutover",
            Self::FinalSync => "FinalSync",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Canceled => "Canceled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    /// Human readable description used for pipeline steps
    pub fn description(self) -> &'static str {
        match self {
            Self::Pending => "Resolve the VM against the source inventory.",
            Self::PreCheck => "Run preflight checks and prepare the source VM.",
            Self::CreateDataVolumes => "Create the target volume of each disk.",
            Self::Populating => "Transfer disks.",
            Self::Convert => "Convert the guest for the target platform.",
            Self::CreateTargetVm => "Create the target VM definition.",
            Self::Cutover => "Hand the VM over from the source.",
            Self::FinalSync => "Copy what changed on each disk since the precopy.",
            Self::Succeeded | Self::Failed | Self::Canceled => "",
        }
    }
}

impl std::fmt::Display for VmPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed state of one VM
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VmStatus {
    /// Inventory id
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default)]
    pub phase: VmPhase,

    /// Ordered pipeline steps for this VM's itinerary
    #[serde(default)]
    pub pipeline: Vec<PipelineStep>,

    /// Power state recorded before the source was powered off
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_power_state: Option<PowerState>,

    /// Terminal error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<VmError>,

    /// Worker restarts observed across all disks
    #[serde(default)]
    pub restarts: u32,

    #[serde(flatten)]
    pub timed: Timed,
}

impl VmStatus {
    pub fn step(&self, phase: VmPhase) -> Option<&PipelineStep> {
        self.pipeline.iter().find(|s| s.name == phase.as_str())
    }

    pub fn step_mut(&mut self, phase: VmPhase) -> Option<&mut PipelineStep> {
        self.pipeline.iter_mut().find(|s| s.name == phase.as_str())
    }

    /// Record a terminal error against the current phase.
    pub fn fail(&mut self, reason: impl Into<String>) {
        let phase = self.phase;
        let reason = reason.into();
        if let Some(step) = self.step_mut(phase) {
            step.error = Some(reason.clone());
            step.timed.mark_completed();
        }
        self.error = Some(VmError {
            phase: phase.as_str().to_string(),
            reasons: vec![reason],
        });
        self.phase = VmPhase::Failed;
        self.timed.mark_completed();
    }
}

/// Source power state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum PowerState {
    On,
    Off,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VmError {
    /// Phase the VM was in when it failed
    pub phase: String,

    #[serde(default)]
    pub reasons: Vec<String>,
}

/// One step of a VM pipeline
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStep {
    /// Phase name
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Aggregate progress of the step
    #[serde(default)]
    pub progress: Progress,

    /// Per-disk tasks (Populating only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<DiskTask>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(flatten)]
    pub timed: Timed,
}

impl PipelineStep {
    pub fn new(phase: VmPhase) -> Self {
        Self {
            name: phase.as_str().to_string(),
            description: phase.description().to_string(),
            ..Default::default()
        }
    }

    /// Recompute aggregate progress from the disk tasks.
    pub fn reflect_tasks(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        self.progress.total = 100 * self.tasks.len() as i64;
        self.progress.completed = self.tasks.iter().map(|t| i64::from(t.progress)).sum();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub completed: i64,
    pub total: i64,
}

/// Per-disk transfer task
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiskTask {
    /// Source disk id
    pub name: String,

    /// User PVC backing the disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvc: Option<String>,

    /// Populator CR driving the disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub populator: Option<String>,

    #[serde(default)]
    pub phase: DiskPhase,

    /// Percent in [0, 100]
    #[serde(default)]
    pub progress: u8,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum DiskPhase {
    #[default]
    #[serde(alias = "pending")]
    Pending,
    #[serde(alias = "populating")]
    Populating,
    #[serde(alias = "bound")]
    Bound,
    #[serde(alias = "failed")]
    Failed,
}
