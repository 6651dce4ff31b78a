//! Print every CRD as a multi-document YAML stream.
//!
//! `cargo run -p crds --bin crdgen > config/crd/all.yaml`

use crds::{
    Host, Migration, NetworkMap, OpenstackVolumePopulator, OvirtVolumePopulator, Plan, Provider,
    StorageMap, VSphereXcopyVolumePopulator,
};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    let crds = [
        Provider::crd(),
        NetworkMap::crd(),
        StorageMap::crd(),
        Host::crd(),
        Plan::crd(),
        Migration::crd(),
        OvirtVolumePopulator::crd(),
        OpenstackVolumePopulator::crd(),
        VSphereXcopyVolumePopulator::crd(),
    ];
    for crd in crds {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
