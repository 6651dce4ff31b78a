//! Per-VM itineraries
//!
//! The ordered phases a VM walks through for each migration type. Guest
//! conversion is only part of the itinerary for sources whose guests need
//! it (or when conversion is all the plan does). Warm migrations copy what
//! changed since the precopy once the source is off; live migrations create
//! empty volumes for the handover to fill.

use crds::{MigrationType, ProviderType, VmPhase, VmStatus};

use VmPhase::*;

const COLD: &[VmPhase] = &[Pending, PreCheck, CreateDataVolumes, Populating, Convert, CreateTargetVm];
const WARM: &[VmPhase] = &[
    Pending,
    PreCheck,
    CreateDataVolumes,
    Populating,
    Cutover,
    FinalSync,
    Convert,
    CreateTargetVm,
];
const LIVE: &[VmPhase] = &[Pending, PreCheck, CreateDataVolumes, CreateTargetVm, Cutover];
const CONVERSION_ONLY: &[VmPhase] = &[Pending, PreCheck, Convert, CreateTargetVm];

/// Phases for a migration type and source platform.
pub fn itinerary(type_: MigrationType, source: ProviderType) -> Vec<VmPhase> {
    let phases = match type_ {
        MigrationType::Cold => COLD,
        MigrationType::Warm => WARM,
        MigrationType::Live => LIVE,
        MigrationType::ConversionOnly => return CONVERSION_ONLY.to_vec(),
    };
    phases
        .iter()
        .copied()
        .filter(|p| *p != Convert || source.requires_conversion())
        .collect()
}

/// Phase after `current`; `Succeeded` after the last one.
pub fn next_phase(phases: &[VmPhase], current: VmPhase) -> VmPhase {
    phases
        .iter()
        .position(|p| *p == current)
        .and_then(|i| phases.get(i + 1))
        .copied()
        .unwrap_or(Succeeded)
}

/// Terminal phase of a whole migration, once every VM is terminal.
///
/// Any failure fails the migration. Otherwise it succeeded only if every VM
/// did; a mix of successes and cancellations is canceled.
pub fn aggregate(vms: &[VmStatus]) -> Option<VmPhase> {
    if vms.iter().any(|vm| !vm.phase.is_terminal()) {
        return None;
    }
    if vms.iter().any(|vm| vm.phase == Failed) {
        return Some(Failed);
    }
    if vms.iter().all(|vm| vm.phase == Succeeded) {
        return Some(Succeeded);
    }
    Some(Canceled)
}
