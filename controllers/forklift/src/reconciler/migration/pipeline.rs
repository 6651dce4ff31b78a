//! Pipeline bookkeeping on a VM status
//!
//! A step is started when the VM enters its phase and completed when the VM
//! leaves it. Phases only move forward along the itinerary.

use super::itinerary::next_phase;
use crds::{PipelineStep, PlanVm, VmPhase, VmStatus};

/// Fresh status for a resolved plan VM.
pub fn new_vm_status(vm: &PlanVm, phases: &[VmPhase]) -> VmStatus {
    VmStatus {
        id: vm.id.clone().unwrap_or_default(),
        name: vm.name.clone(),
        namespace: vm.namespace.clone(),
        phase: VmPhase::Pending,
        pipeline: phases.iter().map(|p| PipelineStep::new(*p)).collect(),
        ..Default::default()
    }
}

/// Enter `phase`, starting its step.
pub fn enter(vm: &mut VmStatus, phase: VmPhase) {
    vm.timed.mark_started();
    vm.phase = phase;
    if let Some(step) = vm.step_mut(phase) {
        step.timed.mark_started();
    }
    if phase.is_terminal() {
        vm.timed.mark_completed();
    }
}

/// Complete the current step and enter the next phase of the itinerary.
pub fn advance(vm: &mut VmStatus, phases: &[VmPhase]) -> VmPhase {
    let current = vm.phase;
    if current.is_terminal() {
        return current;
    }
    if let Some(step) = vm.step_mut(current) {
        step.timed.mark_completed();
        if step.progress.total == 0 {
            step.progress.total = 1;
            step.progress.completed = 1;
        }
    }
    let next = next_phase(phases, current);
    enter(vm, next);
    next
}

/// Stop the VM where it is.
pub fn cancel(vm: &mut VmStatus) {
    if vm.phase.is_terminal() {
        return;
    }
    let current = vm.phase;
    if let Some(step) = vm.step_mut(current) {
        step.timed.mark_completed();
    }
    enter(vm, VmPhase::Canceled);
}
